//! Service activation collaborator
//!
//! Activation brings up the SOCKS/OVPN service for a node that passed the
//! throughput test. [`CommandActivator`] hands the node to an external
//! command as JSON on stdin and reads the grant back from stdout:
//!
//! ```json
//! {"success": true, "socks": {"ip": "10.8.0.2", "port": 1080, "login": "u", "password": "p"},
//!  "ovpn_config": null, "ppp_interface": "ppp0"}
//! {"success": false, "reason": "no free interface"}
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::models::{NodeRecord, ServiceData};

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("Activation command not found: {0}")]
    BinaryNotFound(String),

    #[error("Activation command failed: {0}")]
    Execution(String),

    #[error("Cannot parse activation output: {0}")]
    Parse(String),

    #[error("Activation not configured")]
    NotConfigured,
}

/// Answer from the activator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchReport {
    Launched(ServiceData),
    Refused { reason: String },
}

#[async_trait]
pub trait ServiceActivator: Send + Sync {
    /// Only ever called for nodes at `speed_ok`
    async fn launch(&self, node: &NodeRecord) -> Result<LaunchReport, ActivationError>;
}

#[derive(Debug, Deserialize)]
struct SocksGrant {
    ip: String,
    port: u16,
    login: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct ActivationResponse {
    success: bool,
    #[serde(default)]
    socks: Option<SocksGrant>,
    #[serde(default)]
    ovpn_config: Option<String>,
    #[serde(default)]
    ppp_interface: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct ActivationRequest<'a> {
    id: i64,
    ip: &'a str,
    login: &'a str,
    password: &'a str,
    protocol: &'a str,
}

/// Parse the JSON an activation command printed
pub fn parse_activation_output(stdout: &str) -> Result<LaunchReport, ActivationError> {
    let response: ActivationResponse =
        serde_json::from_str(stdout.trim()).map_err(|e| ActivationError::Parse(e.to_string()))?;

    if !response.success {
        return Ok(LaunchReport::Refused {
            reason: response
                .reason
                .unwrap_or_else(|| "activator refused without a reason".to_string()),
        });
    }

    let socks = response
        .socks
        .ok_or_else(|| ActivationError::Parse("success without socks grant".to_string()))?;

    Ok(LaunchReport::Launched(ServiceData {
        socks_ip: socks.ip,
        socks_port: socks.port,
        socks_login: socks.login,
        socks_password: socks.password,
        ovpn_config: response.ovpn_config,
        ppp_interface: response.ppp_interface,
    }))
}

/// Activator backed by an external command
#[derive(Debug, Clone)]
pub struct CommandActivator {
    command: Option<String>,
}

impl CommandActivator {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ServiceActivator for CommandActivator {
    async fn launch(&self, node: &NodeRecord) -> Result<LaunchReport, ActivationError> {
        let command = self.command.as_deref().ok_or(ActivationError::NotConfigured)?;
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or(ActivationError::NotConfigured)?;

        let request = serde_json::to_vec(&ActivationRequest {
            id: node.id,
            ip: &node.ip,
            login: &node.login,
            password: &node.password,
            protocol: node.protocol.as_str(),
        })
        .map_err(|e| ActivationError::Execution(e.to_string()))?;

        tracing::debug!(node_id = node.id, program, "Running activation command");

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ActivationError::BinaryNotFound(program.to_string()),
                _ => ActivationError::Execution(e.to_string()),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&request)
                .await
                .map_err(|e| ActivationError::Execution(e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ActivationError::Execution(e.to_string()))?;

        if !output.status.success() {
            return Err(ActivationError::Execution(format!(
                "exit code {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_activation_output(&String::from_utf8_lossy(&output.stdout))
    }
}
