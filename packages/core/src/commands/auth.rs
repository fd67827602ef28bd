use std::fmt::Write;
use std::time::Duration;

use crate::cli::AuthCommand;
use crate::config::Config;
use crate::credential::{self, Credential};
use crate::error::AppError;
use crate::ledger::UsageLedger;
use crate::profile::{self, ProfileSummary};

const EXPIRY_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

pub fn run(command: AuthCommand, config: &Config) -> Result<(), AppError> {
    let ledger = UsageLedger::default();
    match command {
        AuthCommand::Add { token, force } => {
            let (credential, path) = profile::add(config, &ledger, &token, force)?;
            println!("{}", credential_table(&credential));
            println!("Profile saved to {}", path.display());
        }
        AuthCommand::Remove { profile } => {
            let path = profile::remove(config, &profile)?;
            println!("Removed {}", path.display());
        }
        AuthCommand::List => {
            let profiles = profile::list(config, &ledger)?;
            if profiles.is_empty() {
                println!("No profiles found in {}", config.profiles_dir().display());
            } else {
                println!("{}", profiles_table(&profiles));
            }
        }
        AuthCommand::Inspect { token } => {
            let credential = credential::parse(&token)?;
            println!("{}", credential_table(&credential));
        }
    }
    Ok(())
}

/// Two-column key/value view of a credential.
pub fn credential_table(credential: &Credential) -> String {
    let rows = vec![
        vec!["Project ID".to_string(), credential.project_id.clone()],
        vec!["Tier".to_string(), credential.tier.to_string()],
        vec!["Stake Address".to_string(), credential.address.clone()],
        vec![
            "Expires".to_string(),
            credential.expiry.format(EXPIRY_FORMAT).to_string(),
        ],
        vec![
            "Max Requests / Day".to_string(),
            credential.max_requests_per_day.to_string(),
        ],
        vec![
            "Max Requests / Second".to_string(),
            credential.max_requests_per_second.to_string(),
        ],
        vec![
            "Max Query Timeout".to_string(),
            format_seconds(credential.max_query_timeout),
        ],
        vec![
            "CORS Restricted".to_string(),
            credential.cors_restricted.to_string(),
        ],
    ];
    table(&[], &rows)
}

pub fn profiles_table(profiles: &[ProfileSummary]) -> String {
    let rows: Vec<Vec<String>> = profiles
        .iter()
        .map(|p| {
            vec![
                p.name.clone(),
                p.tier.to_string(),
                p.expires.format(EXPIRY_FORMAT).to_string(),
                p.requests_today.to_string(),
            ]
        })
        .collect();
    table(&["Profile", "Tier", "Expires", "Requests Today"], &rows)
}

fn format_seconds(duration: Duration) -> String {
    format!("{}s", duration.as_secs())
}

/// Left-aligned columns separated by two spaces. Empty `headers` omits the header row.
fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let columns = headers
        .len()
        .max(rows.iter().map(Vec::len).max().unwrap_or(0));
    let mut widths = vec![0; columns];
    for (i, header) in headers.iter().enumerate() {
        widths[i] = widths[i].max(header.chars().count());
    }
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let mut push_row = |cells: Vec<&str>| {
        let line: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
            .collect();
        let _ = writeln!(out, "{}", line.join("  ").trim_end());
    };

    if !headers.is_empty() {
        push_row(headers.to_vec());
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        push_row(rule.iter().map(String::as_str).collect());
    }
    for row in rows {
        push_row(row.iter().map(String::as_str).collect());
    }

    out.trim_end().to_string()
}
