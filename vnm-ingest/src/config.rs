//! Runtime settings for the ingest service
//!
//! Every setting resolves through three tiers: command line, then
//! environment, then TOML (which already carries compiled defaults).

use std::path::PathBuf;
use tracing::{info, warn};
use vnm_common::config::TomlConfig;
use vnm_common::{Error, Result};

use crate::models::Protocol;
use crate::services::deduplicator::ImportPolicy;
use crate::services::probe_orchestrator::ProbePolicy;
use crate::services::rechecker::RecheckPolicy;

pub const ENV_BIND: &str = "VNM_BIND";
pub const ENV_PROBE_CONCURRENCY: &str = "VNM_PROBE_CONCURRENCY";
pub const ENV_ACTIVATION_COMMAND: &str = "VNM_ACTIVATION_COMMAND";

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub root_folder: Option<PathBuf>,
    pub bind: Option<String>,
    pub log_level: Option<String>,
    pub concurrency: Option<usize>,
}

/// Fully resolved settings
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub bind_address: String,
    pub log_level: String,
    pub default_protocol: Protocol,
    pub import: ImportPolicy,
    pub probe: ProbePolicy,
    pub activation_command: Option<String>,
    /// None when scheduled re-checks are disabled
    pub recheck: Option<RecheckPolicy>,
}

impl ServiceSettings {
    pub fn resolve(cli: &CliOverrides, toml: &TomlConfig) -> Result<Self> {
        let bind_address = pick(
            "bind address",
            cli.bind.clone(),
            env_value(ENV_BIND),
            Some(toml.bind_address.clone()),
        )
        .unwrap_or_else(|| toml.bind_address.clone());

        let env_concurrency = match env_value(ENV_PROBE_CONCURRENCY) {
            Some(raw) => Some(raw.parse::<usize>().map_err(|_| {
                Error::Config(format!("{} must be a positive integer, got '{}'", ENV_PROBE_CONCURRENCY, raw))
            })?),
            None => None,
        };
        let mut probe = ProbePolicy::from_config(&toml.probe);
        if let Some(concurrency) = pick("probe concurrency", cli.concurrency, env_concurrency, None) {
            probe.concurrency = concurrency.max(1);
        }

        let activation_command = pick(
            "activation command",
            None,
            env_value(ENV_ACTIVATION_COMMAND),
            toml.activation.command.clone(),
        );

        let default_protocol: Protocol = toml
            .import
            .default_protocol
            .parse()
            .map_err(|e: String| Error::Config(format!("import.default_protocol: {}", e)))?;

        Ok(Self {
            bind_address,
            log_level: cli.log_level.clone().unwrap_or_else(|| toml.logging.level.clone()),
            default_protocol,
            import: ImportPolicy {
                freshness_window: vnm_common::time::days(toml.import.freshness_window_days),
            },
            probe,
            activation_command,
            recheck: toml
                .recheck
                .enabled
                .then(|| RecheckPolicy::from_config(&toml.recheck)),
        })
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// First present value by priority; logs the winning tier
fn pick<T>(what: &str, cli: Option<T>, env: Option<T>, toml: Option<T>) -> Option<T> {
    let present = [cli.is_some(), env.is_some(), toml.is_some()]
        .iter()
        .filter(|p| **p)
        .count();
    if present > 1 {
        warn!("{} set in more than one place; command line wins over environment over TOML", what);
    }

    if let Some(value) = cli {
        info!("{} taken from command line", what);
        return Some(value);
    }
    if let Some(value) = env {
        info!("{} taken from environment", what);
        return Some(value);
    }
    toml
}
