use std::num::NonZeroU32;

use clap::{Args, Parser, Subcommand};

use crate::host::{HostChoice, HostSelection, Network};
use crate::request::Pagination;
use crate::services::koios::{DEFAULT_API_VERSION, DEFAULT_PORT, DEFAULT_SCHEME};

/// Koios CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "koios-cli",
    version,
    about = "Command-line client for the Koios Cardano REST API"
)]
pub struct Cli {
    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interact with Koios API REST endpoints
    Api(ApiArgs),

    /// Manage subscription profiles created from koios.rest tokens
    #[command(subcommand)]
    Auth(AuthCommand),

    /// Check that a Koios instance serves a recent chain tip
    Healthcheck(HealthcheckArgs),
}

/// Host selection flags. At most one may be given.
#[derive(Debug, Clone, Default, Args)]
pub struct HostArgs {
    /// Custom API host
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Use the EU mainnet host
    #[arg(long, global = true)]
    pub host_eu: bool,

    /// Use the preview network host
    #[arg(long, global = true)]
    pub host_preview: bool,

    /// Use the preprod network host
    #[arg(long, global = true)]
    pub host_preprod: bool,

    /// Use the guildnet network host
    #[arg(long, global = true)]
    pub host_guildnet: bool,
}

impl HostArgs {
    /// The host selectors the user actually passed.
    pub fn selections(&self) -> Vec<HostSelection> {
        let mut selections = Vec::new();
        if let Some(host) = &self.host {
            selections.push(HostSelection::new("--host", HostChoice::Custom(host.clone())));
        }
        let toggles = [
            (self.host_eu, "--host-eu", Network::MainnetEu),
            (self.host_preview, "--host-preview", Network::Preview),
            (self.host_preprod, "--host-preprod", Network::Preprod),
            (self.host_guildnet, "--host-guildnet", Network::Guildnet),
        ];
        for (set, flag, network) in toggles {
            if set {
                selections.push(HostSelection::new(flag, HostChoice::Named(network)));
            }
        }
        selections
    }
}

#[derive(Debug, Clone, Args)]
pub struct ConnectionArgs {
    #[command(flatten)]
    pub hosts: HostArgs,

    /// API server port
    #[arg(long, global = true, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// URL scheme
    #[arg(long, global = true, default_value = DEFAULT_SCHEME)]
    pub scheme: String,

    /// API version
    #[arg(long, global = true, default_value = DEFAULT_API_VERSION)]
    pub api_version: String,

    /// Origin header sent with every request
    #[arg(long, global = true)]
    pub origin: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true, value_name = "SECONDS")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct PagingArgs {
    /// Page number for paginated responses
    #[arg(long, global = true)]
    pub page: Option<NonZeroU32>,

    /// Page size for paginated responses
    #[arg(long, global = true)]
    pub page_size: Option<NonZeroU32>,

    /// Custom query for the request, e.g. "select=epoch_no&order=epoch_no.desc"
    #[arg(long, global = true)]
    pub query: Option<String>,
}

impl PagingArgs {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            page_size: self.page_size,
        }
    }
}

#[derive(Debug, Args)]
pub struct ApiArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub paging: PagingArgs,

    /// Profile (project ID) whose token and usage ledger to use
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// JWT bearer token from the koios.rest profile page (not saved)
    #[arg(long, global = true, value_name = "TOKEN")]
    pub auth: Option<String>,

    /// Include request stats and today's usage in the output
    #[arg(long, global = true)]
    pub stats: bool,

    /// Print responses as compact single-line JSON
    #[arg(long, global = true)]
    pub no_format: bool,

    #[command(subcommand)]
    pub endpoint: Endpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
#[command(rename_all = "snake_case")]
pub enum Endpoint {
    /// Get the tip info about the latest block seen by chain
    Tip,
    /// Get the Genesis parameters used to start specific era on chain
    Genesis,
    /// Get circulating utxo, treasury, rewards, supply and reserves per epoch
    Totals {
        #[arg(long)]
        epoch: Option<u64>,
    },
    /// Get all parameter update proposals submitted to the chain
    ParamUpdates,
    /// List of all withdrawals from reserves against stake accounts
    ReserveWithdrawals,
    /// List of all withdrawals from treasury against stake accounts
    TreasuryWithdrawals,
    /// Get the epoch information, all epochs if no epoch specified
    EpochInfo {
        #[arg(long)]
        epoch: Option<u64>,
    },
    /// Get the protocol parameters for a specific epoch
    EpochParams {
        #[arg(long)]
        epoch: Option<u64>,
    },
    /// Get summarised details about all blocks (paginated, latest first)
    Blocks,
    /// Get detailed information about specific blocks
    BlockInfo {
        #[arg(long = "hash", required = true)]
        hashes: Vec<String>,
    },
    /// Get detailed information about transactions
    TxInfo {
        #[arg(long = "tx", required = true)]
        tx_hashes: Vec<String>,
    },
    /// Get the number of block confirmations for transactions
    TxStatus {
        #[arg(long = "tx", required = true)]
        tx_hashes: Vec<String>,
    },
    /// Get address info: balance, associated stake address and UTxO set
    AddressInfo {
        #[arg(long = "address", required = true)]
        addresses: Vec<String>,
    },
    /// Get a list of all stake addresses that have at least one transaction
    AccountList,
    /// Get the account information for given stake addresses
    AccountInfo {
        #[arg(long = "address", required = true)]
        stake_addresses: Vec<String>,
    },
    /// Get the list of all native assets (paginated)
    AssetList,
    /// List of brief info for all pools
    PoolList,
    /// Current pool statuses and details for specified pool ids
    PoolInfo {
        #[arg(long = "pool", required = true)]
        pool_ids: Vec<String>,
    },
    /// List of all existing native script hashes
    NativeScriptList,
    /// List of all existing Plutus script hashes
    PlutusScriptList,
}

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Create a profile from a JWT bearer token generated on koios.rest
    Add {
        token: String,

        /// Overwrite an existing profile with the same project ID
        #[arg(long)]
        force: bool,
    },
    /// Remove a profile and its usage ledger
    Remove { profile: String },
    /// List saved profiles and today's usage
    List,
    /// Show the entitlements encoded in a token without saving it
    Inspect { token: String },
}

#[derive(Debug, Args)]
pub struct HealthcheckArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Maximum allowed age of the last block, in seconds
    #[arg(long, short, default_value_t = 600)]
    pub age: u64,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,

    /// Print nothing, only set the exit status
    #[arg(long)]
    pub quiet: bool,
}
