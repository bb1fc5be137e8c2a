use std::sync::Arc;
use std::time::Duration;

use slotline_core::domain::session::{SessionId, StageName};
use slotline_store::{InMemorySessionStore, SessionStore};

async fn run_stages(store: Arc<InMemorySessionStore>, id: SessionId, stages: Vec<StageName>) {
    let mut lease = store.acquire(&id, "+15551234567").await.expect("acquire");
    for stage in stages {
        lease.record_step(stage);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    lease.commit();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_leases_on_one_session_never_interleave() {
    let store = Arc::new(InMemorySessionStore::default());
    let id = SessionId("sess_shared".to_string());
    let run_a = vec![StageName::WelcomeNotify, StageName::IntentExtraction, StageName::ReplyNotify];
    let run_b = vec![
        StageName::IntentExtraction,
        StageName::DateTimeValidation,
        StageName::AvailabilityCheck,
        StageName::BookingCreation,
    ];

    let first = tokio::spawn(run_stages(Arc::clone(&store), id.clone(), run_a.clone()));
    let second = tokio::spawn(run_stages(Arc::clone(&store), id.clone(), run_b.clone()));
    first.await.expect("first run");
    second.await.expect("second run");

    let steps = store.find(&id).await.expect("find").expect("session exists").steps().to_vec();
    let a_then_b: Vec<StageName> = run_a.iter().chain(run_b.iter()).copied().collect();
    let b_then_a: Vec<StageName> = run_b.iter().chain(run_a.iter()).copied().collect();

    assert!(steps == a_then_b || steps == b_then_a, "interleaved steps: {steps:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_sessions_proceed_in_parallel() {
    let store = Arc::new(InMemorySessionStore::default());
    let first = SessionId("sess_one".to_string());
    let second = SessionId("sess_two".to_string());

    let held = store.acquire(&first, "+15550000001").await.expect("hold first");
    let other = tokio::time::timeout(
        Duration::from_secs(1),
        store.acquire(&second, "+15550000002"),
    )
    .await
    .expect("second session is not blocked by the first")
    .expect("acquire second");

    drop(other);
    drop(held);
    assert_eq!(store.list().await.expect("list").len(), 2);
}
