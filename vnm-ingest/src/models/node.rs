//! Node record, status set and store-facing value types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Store-assigned node identifier
pub type NodeId = i64;

/// Lifecycle status of a node
///
/// `not_tested → ping_ok | ping_failed → speed_ok → online | offline`.
/// `speed_ok` and `online` are protected: automatic and batch work never
/// moves a node out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    NotTested,
    PingOk,
    PingFailed,
    SpeedOk,
    Online,
    Offline,
}

impl NodeStatus {
    pub const ALL: [NodeStatus; 6] = [
        NodeStatus::NotTested,
        NodeStatus::PingOk,
        NodeStatus::PingFailed,
        NodeStatus::SpeedOk,
        NodeStatus::Online,
        NodeStatus::Offline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::NotTested => "not_tested",
            NodeStatus::PingOk => "ping_ok",
            NodeStatus::PingFailed => "ping_failed",
            NodeStatus::SpeedOk => "speed_ok",
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
        }
    }

    pub fn is_protected(&self) -> bool {
        matches!(self, NodeStatus::SpeedOk | NodeStatus::Online)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown node status: {}", s))
    }
}

/// Tunnel protocol of a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Pptp,
    Socks,
    Ovpn,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Pptp => "pptp",
            Protocol::Socks => "socks",
            Protocol::Ovpn => "ovpn",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pptp" => Ok(Protocol::Pptp),
            "socks" | "socks5" => Ok(Protocol::Socks),
            "ovpn" | "openvpn" => Ok(Protocol::Ovpn),
            other => Err(format!("Unknown protocol: {}", other)),
        }
    }
}

/// Deduplication identity `(ip, login, password)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub ip: String,
    pub login: String,
    pub password: String,
}

/// A parsed node that has not been stored yet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCandidate {
    pub ip: String,
    pub login: String,
    pub password: String,
    pub protocol: Protocol,
    pub provider: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub zipcode: Option<String>,
    pub comment: Option<String>,
}

impl NodeCandidate {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            ip: self.ip.clone(),
            login: self.login.clone(),
            password: self.password.clone(),
        }
    }
}

/// Service endpoints written once by the activation collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceData {
    pub socks_ip: String,
    pub socks_port: u16,
    pub socks_login: String,
    pub socks_password: String,
    pub ovpn_config: Option<String>,
    pub ppp_interface: Option<String>,
}

/// A node under lifecycle management
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub ip: String,
    pub login: String,
    pub password: String,
    pub protocol: Protocol,
    pub provider: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub zipcode: Option<String>,
    pub comment: Option<String>,
    pub status: NodeStatus,
    pub last_update: DateTime<Utc>,
    /// Populated only once the node reaches `online`
    pub service: Option<ServiceData>,
}

impl NodeRecord {
    /// Materialize a candidate as a fresh `not_tested` record
    pub fn from_candidate(id: NodeId, candidate: NodeCandidate, now: DateTime<Utc>) -> Self {
        Self {
            id,
            ip: candidate.ip,
            login: candidate.login,
            password: candidate.password,
            protocol: candidate.protocol,
            provider: candidate.provider,
            country: candidate.country,
            state: candidate.state,
            city: candidate.city,
            zipcode: candidate.zipcode,
            comment: candidate.comment,
            status: NodeStatus::NotTested,
            last_update: now,
            service: None,
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            ip: self.ip.clone(),
            login: self.login.clone(),
            password: self.password.clone(),
        }
    }

    pub fn same_credentials(&self, candidate: &NodeCandidate) -> bool {
        self.login == candidate.login && self.password == candidate.password
    }

    /// Take over a candidate's credentials and descriptive data
    ///
    /// Validated state belonged to the old credentials, so status returns to
    /// `not_tested` and service data is dropped.
    pub fn replace_with(&mut self, candidate: &NodeCandidate, now: DateTime<Utc>) {
        self.login = candidate.login.clone();
        self.password = candidate.password.clone();
        self.protocol = candidate.protocol;
        self.provider = candidate.provider.clone().or(self.provider.take());
        self.country = candidate.country.clone().or(self.country.take());
        self.state = candidate.state.clone().or(self.state.take());
        self.city = candidate.city.clone().or(self.city.take());
        self.zipcode = candidate.zipcode.clone().or(self.zipcode.take());
        self.comment = candidate.comment.clone().or(self.comment.take());
        self.status = NodeStatus::NotTested;
        self.last_update = now;
        self.service = None;
    }
}

/// Status write applied by compare-and-set
#[derive(Debug, Clone, PartialEq)]
pub struct StatusWrite {
    pub status: NodeStatus,
    pub at: DateTime<Utc>,
    /// Written together with the status (activation only)
    pub service: Option<ServiceData>,
}

impl StatusWrite {
    pub fn new(status: NodeStatus, at: DateTime<Utc>) -> Self {
        Self {
            status,
            at,
            service: None,
        }
    }

    pub fn with_service(mut self, service: ServiceData) -> Self {
        self.service = Some(service);
        self
    }
}

/// Filters for node queries; empty filter matches everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeFilter {
    #[serde(default)]
    pub statuses: Vec<NodeStatus>,
    pub ip: Option<String>,
    pub protocol: Option<Protocol>,
    /// Only nodes whose last_update is strictly before this instant
    pub updated_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl NodeFilter {
    pub fn with_statuses(statuses: &[NodeStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            ..Self::default()
        }
    }

    pub fn matches(&self, node: &NodeRecord) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&node.status) {
            return false;
        }
        if let Some(ip) = &self.ip {
            if &node.ip != ip {
                return false;
            }
        }
        if let Some(protocol) = self.protocol {
            if node.protocol != protocol {
                return false;
            }
        }
        if let Some(before) = self.updated_before {
            if node.last_update >= before {
                return false;
            }
        }
        true
    }
}
