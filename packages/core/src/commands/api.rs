use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use crate::cli::{ApiArgs, Endpoint, PagingArgs};
use crate::config::Config;
use crate::credential::{self, Credential};
use crate::error::AppError;
use crate::host;
use crate::ledger::UsageLedger;
use crate::output::{self, OutputOptions};
use crate::profile;
use crate::request::{compose, ActiveLedger};
use crate::services::koios::{ApiCall, ClientOptions, KoiosClient, KoiosTransport};

/// Map a CLI endpoint onto its Koios REST call.
pub fn endpoint_call(endpoint: &Endpoint) -> ApiCall {
    match endpoint {
        Endpoint::Tip => ApiCall::get("tip"),
        Endpoint::Genesis => ApiCall::get("genesis"),
        Endpoint::Totals { epoch } => ApiCall::get("totals").param_opt("_epoch_no", *epoch),
        Endpoint::ParamUpdates => ApiCall::get("param_updates"),
        Endpoint::ReserveWithdrawals => ApiCall::get("reserve_withdrawals"),
        Endpoint::TreasuryWithdrawals => ApiCall::get("treasury_withdrawals"),
        Endpoint::EpochInfo { epoch } => ApiCall::get("epoch_info").param_opt("_epoch_no", *epoch),
        Endpoint::EpochParams { epoch } => {
            ApiCall::get("epoch_params").param_opt("_epoch_no", *epoch)
        }
        Endpoint::Blocks => ApiCall::get("blocks"),
        Endpoint::BlockInfo { hashes } => {
            ApiCall::post("block_info", json!({ "_block_hashes": hashes }))
        }
        Endpoint::TxInfo { tx_hashes } => {
            ApiCall::post("tx_info", json!({ "_tx_hashes": tx_hashes }))
        }
        Endpoint::TxStatus { tx_hashes } => {
            ApiCall::post("tx_status", json!({ "_tx_hashes": tx_hashes }))
        }
        Endpoint::AddressInfo { addresses } => {
            ApiCall::post("address_info", json!({ "_addresses": addresses }))
        }
        Endpoint::AccountList => ApiCall::get("account_list"),
        Endpoint::AccountInfo { stake_addresses } => {
            ApiCall::post("account_info", json!({ "_stake_addresses": stake_addresses }))
        }
        Endpoint::AssetList => ApiCall::get("asset_list"),
        Endpoint::PoolList => ApiCall::get("pool_list"),
        Endpoint::PoolInfo { pool_ids } => {
            ApiCall::post("pool_info", json!({ "_pool_bech32_ids": pool_ids }))
        }
        Endpoint::NativeScriptList => ApiCall::get("native_script_list"),
        Endpoint::PlutusScriptList => ApiCall::get("plutus_script_list"),
    }
}

/// Compose, send and render a single endpoint call.
pub async fn execute(
    transport: &dyn KoiosTransport,
    endpoint: &Endpoint,
    paging: &PagingArgs,
    ledger: Option<&mut ActiveLedger>,
    options: OutputOptions,
) -> Result<String, AppError> {
    let request = compose(&paging.pagination(), paging.query.as_deref(), ledger)?;
    let response = transport.execute(&endpoint_call(endpoint), &request).await?;
    output::render_response(&response, request.usage_stamp(), options)
}

/// Ledger, bearer token and timeout for one `api` invocation.
#[derive(Debug)]
pub struct Invocation {
    pub ledger: Option<ActiveLedger>,
    pub token: Option<String>,
    pub timeout: Duration,
}

/// Work out which profile, token and timeout an `api` call uses.
///
/// `--auth` and `--profile` are mutually exclusive. Without `--auth` the
/// profile falls back to the configured default. The timeout is taken from
/// `--timeout`, then the credential, then the config.
pub fn resolve_invocation(
    args: &ApiArgs,
    config: &Config,
    ledger: &UsageLedger,
) -> Result<Invocation, AppError> {
    if args.profile.is_some() && args.auth.is_some() {
        return Err(AppError::Config(
            "--profile and --auth cannot be used together".to_string(),
        ));
    }

    let profile = match &args.auth {
        Some(_) => None,
        None => args.profile.clone().or_else(|| config.default_profile.clone()),
    };
    let active = match profile.as_deref() {
        Some(name) => Some(profile::open(config, ledger, name)?),
        None => None,
    };

    let token = args
        .auth
        .clone()
        .or_else(|| active.as_ref().map(|a| a.token().to_string()));
    let credential = token.as_deref().map(credential::parse).transpose()?;
    if let Some(credential) = &credential {
        warn_if_expired(credential);
    }

    let timeout = args
        .connection
        .timeout
        .map(Duration::from_secs)
        .or(credential.as_ref().map(|c| c.max_query_timeout))
        .unwrap_or(config.timeout);

    Ok(Invocation {
        ledger: active,
        token,
        timeout,
    })
}

pub async fn run(args: ApiArgs, config: &Config) -> Result<(), AppError> {
    let host = host::resolve(&args.connection.hosts.selections())?;
    let Invocation {
        ledger: mut active,
        token,
        timeout,
    } = resolve_invocation(&args, config, &UsageLedger::default())?;

    let options = super::client_options(&args.connection, &host, timeout, token);
    tracing::debug!("Koios client configuration: {:?}", ClientDebug(&options));
    let client = KoiosClient::new(options)?;

    let output = OutputOptions {
        no_format: args.no_format,
        stats: args.stats,
    };
    let rendered = execute(&client, &args.endpoint, &args.paging, active.as_mut(), output).await?;
    println!("{}", rendered);
    Ok(())
}

fn warn_if_expired(credential: &Credential) {
    if credential.is_expired(Utc::now()) {
        tracing::warn!(
            "Token for project {} expired at {}",
            credential.project_id,
            credential.expiry
        );
    }
}

/// Debug view of client options that never prints the bearer token.
struct ClientDebug<'a>(&'a ClientOptions);

impl std::fmt::Debug for ClientDebug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("base_url", &self.0.base_url())
            .field("origin", &self.0.origin)
            .field("timeout", &self.0.timeout)
            .field("auth", &self.0.auth_token.is_some())
            .finish()
    }
}
