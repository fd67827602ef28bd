//! Target host resolution.
//!
//! A user may pick the API host either with `--host <name>` or with one of
//! the named-network toggles. At most one of them may be given.

use std::fmt;

use crate::error::CoreError;

/// Public mainnet host used when no selector is given.
pub const MAINNET_HOST: &str = "api.koios.rest";
pub const MAINNET_EU_HOST: &str = "eu-api.koios.rest";
pub const PREVIEW_HOST: &str = "preview.koios.rest";
pub const PREPROD_HOST: &str = "preprod.koios.rest";
pub const GUILDNET_HOST: &str = "guild.koios.rest";

/// Known Koios networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    MainnetEu,
    Preview,
    Preprod,
    Guildnet,
}

impl Network {
    pub fn host(self) -> &'static str {
        match self {
            Self::Mainnet => MAINNET_HOST,
            Self::MainnetEu => MAINNET_EU_HOST,
            Self::Preview => PREVIEW_HOST,
            Self::Preprod => PREPROD_HOST,
            Self::Guildnet => GUILDNET_HOST,
        }
    }
}

/// The resolved target of an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostChoice {
    Default,
    Named(Network),
    Custom(String),
}

impl HostChoice {
    pub fn hostname(&self) -> &str {
        match self {
            Self::Default => MAINNET_HOST,
            Self::Named(network) => network.host(),
            Self::Custom(host) => host,
        }
    }
}

impl fmt::Display for HostChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hostname())
    }
}

/// One explicitly supplied selector: the flag it came from and what it picks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSelection {
    pub flag: String,
    pub choice: HostChoice,
}

impl HostSelection {
    pub fn new(flag: impl Into<String>, choice: HostChoice) -> Self {
        Self {
            flag: flag.into(),
            choice,
        }
    }
}

/// Resolve the explicitly supplied selectors to exactly one host.
///
/// Only selectors the user actually passed belong in `selections`; a flag
/// sitting at its default value is not a selection.
pub fn resolve(selections: &[HostSelection]) -> Result<HostChoice, CoreError> {
    match selections {
        [] => Ok(HostChoice::Default),
        [only] => Ok(only.choice.clone()),
        many => Err(CoreError::AmbiguousHostSelection {
            flags: many.iter().map(|s| s.flag.clone()).collect(),
        }),
    }
}
