//! Import pipeline integration tests
//!
//! Parse → deduplicate → persist → report, against the in-memory stores.

mod helpers;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use helpers::{candidate, node, socks_grant};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vnm_common::events::{EventBus, NodeEvent};
use vnm_ingest::models::{
    NodeCandidate, NodeFilter, NodeId, NodeRecord, NodeStatus, Protocol, ResolveAction, StatusWrite,
    VerificationStatus,
};
use vnm_ingest::parser::TextImportParser;
use vnm_ingest::services::{ImportPolicy, Importer, InFlight};
use vnm_ingest::store::{MemoryNodeStore, NodeStore, Stores};

fn importer() -> (Importer, Stores, EventBus) {
    let stores = Stores::in_memory();
    let events = EventBus::new(64);
    let importer = Importer::new(stores.clone(), events.clone(), ImportPolicy::default());
    (importer, stores, events)
}

/// Importer over a store pre-seeded through the memory store handle
async fn importer_with(records: Vec<vnm_ingest::models::NodeRecord>) -> (Importer, Stores) {
    let memory = Arc::new(MemoryNodeStore::new());
    for record in records {
        memory.seed(record).await;
    }
    let mut stores = Stores::in_memory();
    stores.nodes = memory as Arc<dyn NodeStore>;
    let importer = Importer::new(stores.clone(), EventBus::new(16), ImportPolicy::default());
    (importer, stores)
}

// ============================================================================
// Format recognition
// ============================================================================

#[test]
fn test_each_format_yields_expected_fields() {
    let parser = TextImportParser::new(Protocol::Pptp);
    let cases: Vec<(&str, (&str, &str, &str, Option<&str>, Option<&str>, Option<&str>, Option<&str>))> = vec![
        (
            "76.178.64.46 admin admin CA",
            ("76.178.64.46", "admin", "admin", None, Some("California"), None, None),
        ),
        (
            "70.171.218.52:admin:admin:US:Arizona:85001",
            ("70.171.218.52", "admin", "admin", Some("United States"), Some("Arizona"), None, Some("85001")),
        ),
        (
            "24.1.2.3 - user1:pw1 - TX/Austin 73301 | 2024-03-01 12:30:00",
            ("24.1.2.3", "user1", "pw1", None, Some("Texas"), Some("Austin"), Some("73301")),
        ),
        (
            "Ip: 5.6.7.8\nLogin: l\nPass: p\nState: NY\nCity: Buffalo\nZip: 14201\n",
            ("5.6.7.8", "l", "p", None, Some("New York"), Some("Buffalo"), Some("14201")),
        ),
        (
            "IP: 9.9.9.9\nCredentials: bob:hunter2\nLocation: Ohio (Columbus)\nZIP: 43004\n",
            ("9.9.9.9", "bob", "hunter2", None, Some("Ohio"), Some("Columbus"), Some("43004")),
        ),
        (
            "⚡ VPN DROP ⚡\n@fresh_nodes\nIP: 9.9.9.10\nCredentials: eve:pw\nLocation: OH (Dayton)\nZIP: 45402\n",
            ("9.9.9.10", "eve", "pw", None, Some("Ohio"), Some("Dayton"), Some("45402")),
        ),
    ];

    for (input, expected) in cases {
        let outcome = parser.parse(input);
        assert!(outcome.errors.is_empty(), "errors for {:?}: {:?}", input, outcome.errors);
        assert_eq!(outcome.candidates.len(), 1, "input {:?}", input);
        let c = &outcome.candidates[0];
        let actual = (
            c.ip.as_str(),
            c.login.as_str(),
            c.password.as_str(),
            c.country.as_deref(),
            c.state.as_deref(),
            c.city.as_deref(),
            c.zipcode.as_deref(),
        );
        assert_eq!(actual, expected, "input {:?}", input);
    }
}

// ============================================================================
// Import reports
// ============================================================================

#[tokio::test]
async fn test_comments_and_blank_lines_are_not_counted() {
    let (importer, stores, _) = importer();
    let text = "# today's list\n76.178.64.46 admin admin CA\n\n// skip\n70.171.218.52:admin:admin:US:Arizona:85001\n";

    let report = importer.import(text, Protocol::Pptp).await.unwrap();
    assert_eq!(report.added, 2);
    assert_eq!(report.total_processed, 2);
    assert_eq!(report.format_errors, 0);
    assert!(report.is_consistent());

    let nodes = stores.nodes.query(&NodeFilter::default()).await.unwrap();
    assert_eq!(nodes.len(), 2);
    assert!(nodes.iter().all(|n| n.status == NodeStatus::NotTested));
}

#[tokio::test]
async fn test_reimport_is_idempotent() {
    let (importer, stores, _) = importer();
    let text = "1.1.1.1 a b TX\n2.2.2.2:c:d:US:Texas:73301\n";

    let first = importer.import(text, Protocol::Pptp).await.unwrap();
    let second = importer.import(text, Protocol::Pptp).await.unwrap();

    assert_eq!(first.added, 2);
    assert_eq!(second.added, 0);
    assert_eq!(second.skipped_duplicates, 2);
    assert_eq!(stores.nodes.query(&NodeFilter::default()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_duplicates_within_one_paste_collapse() {
    let (importer, _, _) = importer();
    let text = "1.1.1.1 a b\n1.1.1.1:a:b\n1.1.1.1 - a:b - TX\n";

    let report = importer.import(text, Protocol::Pptp).await.unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(report.skipped_duplicates, 2);
    assert!(report.is_consistent());
}

#[tokio::test]
async fn test_format_errors_are_logged_and_counted() {
    let (importer, stores, _) = importer();
    let text = "not a node at all\n3.3.3.3 x y\n";

    let report = importer.import(text, Protocol::Pptp).await.unwrap();
    assert_eq!(report.format_errors, 1);
    assert_eq!(report.added, 1);
    assert_eq!(report.total_processed, 2);

    let logged = stores.format_errors.list().await.unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].raw_line_or_block, "not a node at all");
}

#[tokio::test]
async fn test_import_emits_completion_event() {
    let (importer, _, events) = importer();
    let mut rx = events.subscribe();

    importer.import("4.4.4.4 a b", Protocol::Socks).await.unwrap();

    match rx.recv().await.unwrap() {
        NodeEvent::ImportCompleted { added, total_processed, .. } => {
            assert_eq!(added, 1);
            assert_eq!(total_processed, 1);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

// ============================================================================
// Freshness rule
// ============================================================================

#[tokio::test]
async fn test_stale_conflict_replaces_credentials() {
    let old = Utc::now() - chrono::Duration::days(40);
    let (importer, stores) = importer_with(vec![node(1, "8.8.8.8", NodeStatus::Online, old)]).await;

    let report = importer.import("8.8.8.8 newuser newpass", Protocol::Pptp).await.unwrap();
    assert_eq!(report.replaced_old, 1);
    assert_eq!(report.added, 0);

    let record = stores.nodes.get(1).await.unwrap().unwrap();
    assert_eq!(record.login, "newuser");
    assert_eq!(record.password, "newpass");
    // New credentials have not been validated
    assert_eq!(record.status, NodeStatus::NotTested);
    assert!(record.service.is_none());
}

/// Node store that validates node 1 right after the importer reads an IP
struct RevalidatingStore {
    inner: Arc<MemoryNodeStore>,
    fired: AtomicBool,
}

#[async_trait]
impl NodeStore for RevalidatingStore {
    async fn get(&self, id: NodeId) -> vnm_common::Result<Option<NodeRecord>> {
        self.inner.get(id).await
    }

    async fn get_by_ip(&self, ip: &str) -> vnm_common::Result<Vec<NodeRecord>> {
        let snapshot = self.inner.get_by_ip(ip).await?;
        if !self.fired.swap(true, Ordering::SeqCst) {
            let write = StatusWrite::new(NodeStatus::Online, Utc::now()).with_service(socks_grant(1));
            assert!(self
                .inner
                .compare_and_set_status(1, NodeStatus::SpeedOk, write)
                .await?);
        }
        Ok(snapshot)
    }

    async fn insert(&self, candidate: NodeCandidate, now: DateTime<Utc>) -> vnm_common::Result<NodeRecord> {
        self.inner.insert(candidate, now).await
    }

    async fn put(&self, record: &NodeRecord) -> vnm_common::Result<()> {
        self.inner.put(record).await
    }

    async fn replace_if_unchanged(
        &self,
        record: &NodeRecord,
        expected_status: NodeStatus,
        expected_last_update: DateTime<Utc>,
    ) -> vnm_common::Result<bool> {
        self.inner
            .replace_if_unchanged(record, expected_status, expected_last_update)
            .await
    }

    async fn compare_and_set_status(
        &self,
        id: NodeId,
        expected: NodeStatus,
        write: StatusWrite,
    ) -> vnm_common::Result<bool> {
        self.inner.compare_and_set_status(id, expected, write).await
    }

    async fn query(&self, filter: &NodeFilter) -> vnm_common::Result<Vec<NodeRecord>> {
        self.inner.query(filter).await
    }

    async fn count_by_status(&self) -> vnm_common::Result<HashMap<NodeStatus, usize>> {
        self.inner.count_by_status().await
    }
}

#[tokio::test]
async fn test_node_validated_during_import_is_not_replaced() {
    let old = Utc::now() - chrono::Duration::days(60);
    let inner = Arc::new(MemoryNodeStore::new());
    inner.seed(node(1, "9.9.9.9", NodeStatus::SpeedOk, old)).await;

    let mut stores = Stores::in_memory();
    stores.nodes = Arc::new(RevalidatingStore {
        inner: inner.clone(),
        fired: AtomicBool::new(false),
    }) as Arc<dyn NodeStore>;
    let importer = Importer::new(stores.clone(), EventBus::new(16), ImportPolicy::default());

    let report = importer.import("9.9.9.9 newuser newpass TX", Protocol::Pptp).await.unwrap();
    assert_eq!(report.replaced_old, 0);
    assert_eq!(report.queued_for_verification, 1);

    let record = inner.get(1).await.unwrap().unwrap();
    assert_eq!(record.status, NodeStatus::Online);
    assert_eq!(record.login, "admin");
    assert!(record.service.is_some());

    let queue = stores.verification.list(Some(VerificationStatus::Pending)).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].conflicting_node_ids, vec![1]);
    assert_eq!(queue[0].candidate_node_data.login, "newuser");
}

#[tokio::test]
async fn test_stale_node_under_test_is_not_replaced() {
    let old = Utc::now() - chrono::Duration::days(40);
    let (_, stores) = importer_with(vec![node(1, "8.8.8.8", NodeStatus::PingFailed, old)]).await;
    let registry = Arc::new(InFlight::default());
    let importer = Importer::new(stores.clone(), EventBus::new(16), ImportPolicy::default())
        .with_in_flight(registry.clone());

    let claim = registry.try_claim(1).unwrap();
    let report = importer.import("8.8.8.8 newuser newpass", Protocol::Pptp).await.unwrap();
    drop(claim);

    assert_eq!(report.replaced_old, 0);
    assert_eq!(report.queued_for_verification, 1);
    let record = stores.nodes.get(1).await.unwrap().unwrap();
    assert_eq!(record.login, "admin");
    assert_eq!(record.status, NodeStatus::PingFailed);
    assert!(!registry.contains(1));
}

#[tokio::test]
async fn test_fresh_conflict_is_queued_not_replaced() {
    let recent = Utc::now() - chrono::Duration::days(3);
    let (importer, stores) = importer_with(vec![node(1, "8.8.8.8", NodeStatus::SpeedOk, recent)]).await;

    let report = importer.import("8.8.8.8 newuser newpass", Protocol::Pptp).await.unwrap();
    assert_eq!(report.queued_for_verification, 1);
    assert_eq!(report.replaced_old, 0);

    let record = stores.nodes.get(1).await.unwrap().unwrap();
    assert_eq!(record.login, "admin");
    assert_eq!(record.status, NodeStatus::SpeedOk);

    let queue = stores.verification.list(Some(VerificationStatus::Pending)).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].conflicting_node_ids, vec![1]);
    assert_eq!(queue[0].candidate_node_data, candidate("8.8.8.8", "newuser", "newpass"));
}

#[tokio::test]
async fn test_conflict_with_staged_candidate_is_queued() {
    let (importer, stores, _) = importer();

    let report = importer
        .import("7.7.7.7 first pw1\n7.7.7.7 second pw2\n", Protocol::Pptp)
        .await
        .unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(report.queued_for_verification, 1);

    let queue = stores.verification.list(None).await.unwrap();
    assert!(queue[0].conflicting_node_ids.is_empty());
}

// ============================================================================
// Operator review
// ============================================================================

#[tokio::test]
async fn test_accept_replaces_conflicting_node() {
    let recent = Utc::now() - chrono::Duration::days(1);
    let (importer, stores) = importer_with(vec![node(1, "8.8.8.8", NodeStatus::PingOk, recent)]).await;
    importer.import("8.8.8.8 fresh creds", Protocol::Pptp).await.unwrap();

    let entry = &importer.pending_conflicts().await.unwrap()[0];
    let outcome = importer.resolve_conflict(entry.id, ResolveAction::Accept).await.unwrap();

    assert_eq!(outcome.entry.status, VerificationStatus::Resolved);
    let updated = outcome.node.unwrap();
    assert_eq!(updated.id, 1);
    assert_eq!(updated.login, "fresh");
    assert_eq!(stores.nodes.get(1).await.unwrap().unwrap().status, NodeStatus::NotTested);
    assert!(importer.pending_conflicts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_accept_waits_for_running_test() {
    let recent = Utc::now() - chrono::Duration::days(1);
    let (_, stores) = importer_with(vec![node(1, "8.8.8.8", NodeStatus::PingOk, recent)]).await;
    let registry = Arc::new(InFlight::default());
    let importer = Importer::new(stores.clone(), EventBus::new(16), ImportPolicy::default())
        .with_in_flight(registry.clone());
    importer.import("8.8.8.8 fresh creds", Protocol::Pptp).await.unwrap();
    let entry_id = importer.pending_conflicts().await.unwrap()[0].id;

    let claim = registry.try_claim(1).unwrap();
    let result = importer.resolve_conflict(entry_id, ResolveAction::Accept).await;
    assert!(matches!(result, Err(vnm_common::Error::InvalidInput(_))));
    assert_eq!(stores.nodes.get(1).await.unwrap().unwrap().login, "admin");
    assert_eq!(importer.pending_conflicts().await.unwrap().len(), 1);

    drop(claim);
    let outcome = importer.resolve_conflict(entry_id, ResolveAction::Accept).await.unwrap();
    assert_eq!(outcome.node.unwrap().login, "fresh");
}

#[tokio::test]
async fn test_reject_leaves_node_untouched() {
    let recent = Utc::now() - chrono::Duration::days(1);
    let (importer, stores) = importer_with(vec![node(1, "8.8.8.8", NodeStatus::Online, recent)]).await;
    importer.import("8.8.8.8 fresh creds", Protocol::Pptp).await.unwrap();

    let entry_id = importer.pending_conflicts().await.unwrap()[0].id;
    let outcome = importer.resolve_conflict(entry_id, ResolveAction::Reject).await.unwrap();
    assert!(outcome.node.is_none());

    let record = stores.nodes.get(1).await.unwrap().unwrap();
    assert_eq!(record.login, "admin");
    assert_eq!(record.status, NodeStatus::Online);

    // A decided entry cannot be decided again
    let again = importer.resolve_conflict(entry_id, ResolveAction::Accept).await;
    assert!(matches!(again, Err(vnm_common::Error::InvalidInput(_))));
}

#[tokio::test]
async fn test_unknown_entry_is_not_found() {
    let (importer, _, _) = importer();
    let result = importer.resolve_conflict(999, ResolveAction::Reject).await;
    assert!(matches!(result, Err(vnm_common::Error::NotFound(_))));
}
