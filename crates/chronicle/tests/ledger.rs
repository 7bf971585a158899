//! End-to-end behavior of the ledger over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use chronicle::core::{BreakKind, ChainKey, EventType, Severity};
use chronicle::store::{LedgerStoreExt, MemoryStore};
use chronicle::{
    CancellationToken, EventFilter, Ledger, LedgerConfig, LedgerError, NewEvent, PageRequest,
    RequestContext,
};

fn ledger_over(store: Arc<MemoryStore>) -> Ledger<MemoryStore> {
    // RUST_LOG=chronicle=debug cargo test -- --nocapture
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Ledger::from_arc(store, LedgerConfig::default()).unwrap()
}

fn modification(before: i64, after: i64) -> NewEvent {
    NewEvent::new(EventType::DataModification, "update", "record")
        .resource_id("rec-1")
        .before(json!({ "v": before }))
        .after(json!({ "v": after }))
}

#[tokio::test]
async fn test_example_scenario() {
    let store = Arc::new(MemoryStore::new());
    let ledger = ledger_over(store.clone());
    let ctx = RequestContext::new("A", "alice", "req-1");

    let event1 = ledger.append_event(&ctx, modification(1, 2)).await.unwrap();
    assert_eq!(event1.previous_hash, None);

    let event2 = ledger.append_event(&ctx, modification(2, 3)).await.unwrap();
    assert_eq!(event2.previous_hash, Some(event1.integrity_hash));

    let key = ChainKey::new("A", "req-1", EventType::DataModification);
    let report = ledger.verify_chain(&key).await.unwrap();
    assert!(report.valid);
    assert_eq!(report.verified_count, 2);
    assert_eq!(report.total_count, 2);

    assert!(store.tamper(&event1.id, |e| e.action = "TAMPERED".into()));

    let report = ledger.verify_chain(&key).await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.verified_count, 0);
    let brk = report.broken_at.unwrap();
    assert_eq!(brk.index, 0);
    assert_eq!(brk.event_id, Some(event1.id));
}

#[tokio::test]
async fn test_empty_chain_is_valid() {
    let ledger = ledger_over(Arc::new(MemoryStore::new()));
    let key = ChainKey::new("org-1", "nothing-here", EventType::DataExport);

    let report = ledger.verify_chain(&key).await.unwrap();
    assert!(report.valid);
    assert_eq!(report.verified_count, 0);
    assert_eq!(report.total_count, 0);
    assert_eq!(report.broken_at, None);
}

#[tokio::test]
async fn test_chains_are_independent() {
    let ledger = ledger_over(Arc::new(MemoryStore::new()));
    let ctx = RequestContext::new("org-1", "alice", "req-1");

    let role = ledger
        .append_event(&ctx, NewEvent::new(EventType::RoleChange, "promote", "member"))
        .await
        .unwrap();
    let data = ledger.append_event(&ctx, modification(1, 2)).await.unwrap();
    let other_req = ledger
        .append_event(&ctx.clone().with_correlation("req-2"), modification(1, 2))
        .await
        .unwrap();

    for event in [&role, &data, &other_req] {
        assert_eq!(event.sequence, 0);
        assert_eq!(event.previous_hash, None);
    }
    assert_ne!(role.chain_id(), data.chain_id());
    assert_ne!(data.chain_id(), other_req.chain_id());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_appends_form_one_chain() {
    const K: usize = 64;

    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(ledger_over(store.clone()));
    let ctx = RequestContext::new("org-1", "alice", "req-burst");

    let mut handles = Vec::with_capacity(K);
    for i in 0..K {
        let ledger = ledger.clone();
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .append_event(&ctx, modification(i as i64, i as i64 + 1))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let key = ctx.chain_key(EventType::DataModification);
    let events = store.load_chain(&key.id(), 10).await.unwrap();
    assert_eq!(events.len(), K);

    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.sequence, i as u64);
        if i == 0 {
            assert_eq!(event.previous_hash, None);
        } else {
            assert_eq!(event.previous_hash, Some(events[i - 1].integrity_hash));
        }
    }

    let report = ledger.verify_chain(&key).await.unwrap();
    assert!(report.valid);
    assert_eq!(report.verified_count, K as u64);
}

#[tokio::test]
async fn test_system_actor_and_security_severity() {
    let ledger = ledger_over(Arc::new(MemoryStore::new()));
    let ctx = RequestContext::system("org-1", "job-7");

    let event = ledger
        .append_event(
            &ctx,
            NewEvent::new(EventType::SecurityEvent, "lockout", "account")
                .severity(Severity::Critical),
        )
        .await
        .unwrap();
    assert_eq!(event.user_id, None);
    assert_eq!(event.actor(), "system");
    assert_eq!(event.severity, Severity::Critical);

    let missing = ledger
        .append_event(&ctx, NewEvent::new(EventType::SecurityEvent, "lockout", "account"))
        .await;
    assert!(matches!(missing, Err(LedgerError::Validation(_))));
}

#[tokio::test]
async fn test_purged_event_breaks_chain() {
    let store = Arc::new(MemoryStore::new());
    let ledger = ledger_over(store.clone());
    let ctx = RequestContext::new("org-1", "alice", "req-1");

    let mut events = Vec::new();
    for i in 0..4 {
        events.push(ledger.append_event(&ctx, modification(i, i + 1)).await.unwrap());
    }
    assert!(store.purge(&events[1].id));

    let report = ledger
        .verify_chain(&ctx.chain_key(EventType::DataModification))
        .await
        .unwrap();
    assert!(!report.valid);
    assert_eq!(report.verified_count, 1);
    assert!(matches!(
        report.broken_at.unwrap().kind,
        BreakKind::SequenceGap { expected: 1, found: 2 }
    ));
}

#[tokio::test]
async fn test_query_events_newest_first_with_filters() {
    let ledger = ledger_over(Arc::new(MemoryStore::new()));
    let alice = RequestContext::new("org-1", "alice", "req-1");
    let bob = RequestContext::new("org-1", "bob", "req-2");
    let other_org = RequestContext::new("org-2", "carol", "req-3");

    ledger.append_event(&alice, modification(1, 2)).await.unwrap();
    ledger
        .append_event(
            &bob,
            NewEvent::new(EventType::DataDeletion, "purge", "Invoice").resource_type("billing"),
        )
        .await
        .unwrap();
    ledger.append_event(&alice, modification(2, 3)).await.unwrap();
    ledger.append_event(&other_org, modification(1, 2)).await.unwrap();

    let all = ledger
        .query_events("org-1", &EventFilter::all(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(all.total, 3);
    for pair in all.items.windows(2) {
        assert!(pair[0].timestamp >= pair[1].timestamp);
    }

    let filter = EventFilter {
        user_ids: vec!["bob".into()],
        ..Default::default()
    };
    let page = ledger
        .query_events("org-1", &filter, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].action, "purge");

    let filter = EventFilter {
        severities: vec![Severity::High],
        text: Some("INVOICE".into()),
        ..Default::default()
    };
    let page = ledger
        .query_events("org-1", &filter, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(page.total, 1);

    let paged = ledger
        .query_events("org-1", &EventFilter::all(), PageRequest::first(2))
        .await
        .unwrap();
    assert_eq!(paged.items.len(), 2);
    assert!(paged.has_more());

    let fetched = ledger.get_event(&paged.items[0].id).await.unwrap();
    assert_eq!(fetched.as_ref(), Some(&paged.items[0]));
}

#[tokio::test]
async fn test_verify_organization() {
    let store = Arc::new(MemoryStore::new());
    let ledger = ledger_over(store.clone());
    let ctx = RequestContext::new("org-1", "alice", "req-1");

    let modified = ledger.append_event(&ctx, modification(1, 2)).await.unwrap();
    ledger
        .append_event(&ctx, NewEvent::new(EventType::DataAccess, "read", "record"))
        .await
        .unwrap();
    ledger
        .append_event(
            &ctx.clone().with_correlation("req-9"),
            NewEvent::new(EventType::Authentication, "login", "session"),
        )
        .await
        .unwrap();

    let report = ledger
        .verify_organization("org-1", &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.valid);
    assert_eq!(report.chains.len(), 3);
    assert_eq!(report.total_events, 3);
    assert_eq!(report.broken_chains().count(), 0);

    store.tamper(&modified.id, |e| e.resource_id = Some("rec-2".into()));
    let report = ledger
        .verify_organization("org-1", &CancellationToken::new())
        .await
        .unwrap();
    assert!(!report.valid);
    let broken: Vec<_> = report.broken_chains().collect();
    assert_eq!(broken.len(), 1);
    assert_eq!(broken[0].chain, modified.chain_key());

    let chains = ledger.list_chains("org-1").await.unwrap();
    assert_eq!(chains.len(), 3);
    assert!(chains.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_cancelled_verification_is_an_error() {
    let ledger = ledger_over(Arc::new(MemoryStore::new()));
    let ctx = RequestContext::new("org-1", "alice", "req-1");
    ledger.append_event(&ctx, modification(1, 2)).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = ledger
        .verify_chain_with(&ctx.chain_key(EventType::DataModification), &cancel)
        .await;
    assert!(matches!(result, Err(LedgerError::Cancelled)));

    let result = ledger.verify_organization("org-1", &cancel).await;
    assert!(matches!(result, Err(LedgerError::Cancelled)));
}

#[tokio::test]
async fn test_abandoned_append_does_not_wedge_chain() {
    let ledger = ledger_over(Arc::new(MemoryStore::new()));
    let ctx = RequestContext::new("org-1", "alice", "req-1");

    // An append abandoned while waiting on the chain lock must not wedge it.
    let held = ledger.append_event(&ctx, modification(1, 2));
    let abandoned = tokio::time::timeout(Duration::from_nanos(1), held).await;
    drop(abandoned);

    let event = ledger.append_event(&ctx, modification(2, 3)).await.unwrap();
    let report = ledger.verify_chain(&event.chain_key()).await.unwrap();
    assert!(report.valid);
    assert_eq!(report.verified_count, event.sequence + 1);
}
