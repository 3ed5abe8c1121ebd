//! Reachability and throughput probing
//!
//! The orchestrator sees only [`NetworkProbe`]. [`CommandProbe`] shells out:
//! the system `ping` for reachability and a configured command template for
//! throughput. Children are killed when the probe future is dropped, so a
//! per-probe timeout never leaves a stray process behind.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

use crate::models::{NodeRecord, Protocol};

/// Probe failures that are not a clean "unreachable" answer
///
/// The orchestrator treats these exactly like a failed probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Probe command not found: {0}")]
    BinaryNotFound(String),

    #[error("Probe command failed: {0}")]
    Execution(String),

    #[error("Cannot parse probe output: {0}")]
    Parse(String),

    #[error("Probe not configured: {0}")]
    NotConfigured(String),
}

/// What a probe needs to know about a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeTarget {
    pub ip: String,
    pub login: String,
    pub password: String,
    pub protocol: Protocol,
}

impl From<&NodeRecord> for ProbeTarget {
    fn from(node: &NodeRecord) -> Self {
        Self {
            ip: node.ip.clone(),
            login: node.login.clone(),
            password: node.password.clone(),
            protocol: node.protocol,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PingReport {
    pub success: bool,
    pub latency_ms: Option<f64>,
    /// Percent, 0.0 to 100.0
    pub packet_loss: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputReport {
    pub success: bool,
    pub mbps: Option<f64>,
}

#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn ping(&self, target: &ProbeTarget, timeout: Duration) -> Result<PingReport, ProbeError>;

    async fn throughput(
        &self,
        target: &ProbeTarget,
        timeout: Duration,
    ) -> Result<ThroughputReport, ProbeError>;
}

static PACKET_LOSS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)% packet loss").expect("valid regex"));

/// `rtt min/avg/max/mdev = 10.1/12.3/14.5/1.2 ms` (iputils) or `round-trip` (BSD)
static AVG_RTT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"=\s*[\d.]+/([\d.]+)/[\d.]+").expect("valid regex"));

static FIRST_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("valid regex"));

/// Parse the summary of a `ping` run
pub fn parse_ping_output(output: &str) -> Result<PingReport, ProbeError> {
    let packet_loss = PACKET_LOSS
        .captures(output)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .ok_or_else(|| ProbeError::Parse("no packet loss summary".to_string()))?;
    let latency_ms = AVG_RTT
        .captures(output)
        .and_then(|caps| caps[1].parse::<f64>().ok());

    Ok(PingReport {
        success: packet_loss < 100.0,
        latency_ms,
        packet_loss,
    })
}

/// First number printed by a throughput command, in Mbps
pub fn parse_mbps(output: &str) -> Result<f64, ProbeError> {
    FIRST_NUMBER
        .captures(output)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .ok_or_else(|| ProbeError::Parse(format!("no Mbps figure in '{}'", output.trim())))
}

/// Substitute `{ip}`, `{login}`, `{password}`, `{protocol}` in each argument
pub fn expand_template(template: &str, target: &ProbeTarget) -> Vec<String> {
    template
        .split_whitespace()
        .map(|arg| {
            arg.replace("{ip}", &target.ip)
                .replace("{login}", &target.login)
                .replace("{password}", &target.password)
                .replace("{protocol}", target.protocol.as_str())
        })
        .collect()
}

/// Probe backed by external commands
#[derive(Debug, Clone)]
pub struct CommandProbe {
    ping_command: String,
    ping_count: u32,
    throughput_command: Option<String>,
    min_mbps: f64,
}

impl CommandProbe {
    pub fn new(
        ping_command: impl Into<String>,
        ping_count: u32,
        throughput_command: Option<String>,
        min_mbps: f64,
    ) -> Self {
        Self {
            ping_command: ping_command.into(),
            ping_count: ping_count.max(1),
            throughput_command,
            min_mbps,
        }
    }

    pub fn from_config(config: &vnm_common::config::ProbeConfig) -> Self {
        Self::new(
            config.ping_command.clone(),
            config.ping_count,
            config.throughput_command.clone(),
            config.min_mbps,
        )
    }

    async fn run(program: &str, args: &[String]) -> Result<std::process::Output, ProbeError> {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ProbeError::BinaryNotFound(program.to_string()),
                _ => ProbeError::Execution(e.to_string()),
            })
    }
}

#[async_trait]
impl NetworkProbe for CommandProbe {
    async fn ping(&self, target: &ProbeTarget, timeout: Duration) -> Result<PingReport, ProbeError> {
        // Per-reply wait so the whole run fits inside the caller's timeout
        let wait_secs = (timeout.as_secs() / u64::from(self.ping_count)).max(1);
        let args = vec![
            "-c".to_string(),
            self.ping_count.to_string(),
            "-W".to_string(),
            wait_secs.to_string(),
            target.ip.clone(),
        ];

        tracing::debug!(ip = %target.ip, count = self.ping_count, "Running ping");
        let output = Self::run(&self.ping_command, &args).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        // ping exits non-zero on total loss but still prints a summary
        match parse_ping_output(&stdout) {
            Ok(report) => Ok(report),
            Err(_) if !output.status.success() => Ok(PingReport {
                success: false,
                latency_ms: None,
                packet_loss: 100.0,
            }),
            Err(e) => Err(e),
        }
    }

    async fn throughput(
        &self,
        target: &ProbeTarget,
        _timeout: Duration,
    ) -> Result<ThroughputReport, ProbeError> {
        let template = self
            .throughput_command
            .as_deref()
            .ok_or_else(|| ProbeError::NotConfigured("probe.throughput_command".to_string()))?;
        let mut args = expand_template(template, target);
        if args.is_empty() {
            return Err(ProbeError::NotConfigured("probe.throughput_command is empty".to_string()));
        }
        let program = args.remove(0);

        tracing::debug!(ip = %target.ip, program = %program, "Running throughput measurement");
        let output = Self::run(&program, &args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Execution(format!(
                "exit code {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let mbps = parse_mbps(&String::from_utf8_lossy(&output.stdout))?;
        Ok(ThroughputReport {
            success: mbps >= self.min_mbps,
            mbps: Some(mbps),
        })
    }
}
