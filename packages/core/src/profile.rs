//! Local profiles: one directory per project, each holding a usage ledger.
//!
//! Nothing here prompts the user. Overwrite confirmation is expressed as a
//! `force` flag by the caller.

use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::credential::{self, Credential, Tier};
use crate::error::CoreError;
use crate::ledger::{Subscription, UsageLedger};
use crate::request::ActiveLedger;

/// One row of `auth list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSummary {
    pub name: String,
    pub tier: Tier,
    pub expires: DateTime<Utc>,
    pub requests_today: u64,
}

/// Register `token` as a new profile named after its project ID.
pub fn add(
    config: &Config,
    ledger: &UsageLedger,
    token: &str,
    force: bool,
) -> Result<(Credential, PathBuf), CoreError> {
    let token = token.trim();
    let credential = credential::parse(token)?;
    ensure_valid_name(&credential.project_id)?;

    let dir = config.profile_dir(&credential.project_id);
    let path = config.ledger_path(&credential.project_id);

    if path.exists() && !force {
        return Err(CoreError::ProfileExists {
            name: credential.project_id.clone(),
        });
    }

    create_private_dir(&dir).map_err(|e| CoreError::io(&dir, e))?;
    ledger.save(&mut Subscription::new(token), &path)?;

    tracing::info!("Profile {} saved to {}", credential.project_id, path.display());
    Ok((credential, path))
}

/// Delete a profile's ledger, and its directory once empty.
pub fn remove(config: &Config, name: &str) -> Result<PathBuf, CoreError> {
    let name = name.trim();
    ensure_valid_name(name)?;

    let path = config.ledger_path(name);
    if !path.exists() {
        return Err(CoreError::ProfileNotFound { path });
    }

    fs::remove_file(&path).map_err(|e| CoreError::io(&path, e))?;
    // Leaves the directory alone if the user keeps other files there.
    let _ = fs::remove_dir(config.profile_dir(name));

    tracing::info!("Profile {} removed", name);
    Ok(path)
}

/// Open the named profile's ledger for metered requests.
pub fn open(config: &Config, ledger: &UsageLedger, name: &str) -> Result<ActiveLedger, CoreError> {
    ensure_valid_name(name)?;
    ActiveLedger::open(ledger.clone(), config.ledger_path(name))
}

/// Every profile directory that holds a ledger, sorted by name.
pub fn list(config: &Config, ledger: &UsageLedger) -> Result<Vec<ProfileSummary>, CoreError> {
    let root = config.profiles_dir();
    let entries = match fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CoreError::io(&root, e)),
    };

    let mut profiles = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| CoreError::io(&root, e))?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = config.ledger_path(&name);
        if !path.exists() {
            continue;
        }

        let record = ledger.load(&path)?;
        let credential = credential::parse(&record.credential_token)?;
        profiles.push(ProfileSummary {
            name,
            tier: credential.tier,
            expires: credential.expiry,
            requests_today: record.requests_today,
        });
    }

    profiles.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(profiles)
}

fn ensure_valid_name(name: &str) -> Result<(), CoreError> {
    let mut components = Path::new(name).components();
    let is_single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if name.is_empty() || !is_single_normal {
        return Err(CoreError::malformed_credential(format!(
            "{:?} is not a valid profile name",
            name
        )));
    }
    Ok(())
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}
