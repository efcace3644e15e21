mod common;

use bson::Bson;
use common::{position, projector, subscriber, MemoryIndex, MemoryStore, Session, Step};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use subscriber_sync::event::{ChangeEvent, Operation, ResumePosition};
use subscriber_sync::{
    ChangeStreamConsumer, ConsumerState, ResumeStore, RetryPolicy, SyncError,
};

fn id(s: &str) -> Bson {
    Bson::String(s.to_string())
}

fn consumer(store: &Arc<MemoryStore>, index: &Arc<MemoryIndex>) -> ChangeStreamConsumer {
    ChangeStreamConsumer::new(store.clone(), projector(index), store.listener())
        .with_reconnect_delay(Duration::from_millis(1))
}

#[derive(Default)]
struct MemoryResumeStore {
    saved: Mutex<Vec<ResumePosition>>,
}

impl ResumeStore for MemoryResumeStore {
    fn load(&self) -> subscriber_sync::Result<Option<ResumePosition>> {
        Ok(self.saved.lock().unwrap().last().cloned())
    }

    fn save(&self, position: &ResumePosition) -> subscriber_sync::Result<()> {
        self.saved.lock().unwrap().push(position.clone());
        Ok(())
    }
}

#[test]
fn test_events_for_one_id_apply_in_order() {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    store.push_session(Session::Open(vec![
        Step::Event(ChangeEvent::insert(
            subscriber("ATL001", "Rajesh Kumar", "Bangalore", "v1"),
            position(1),
        )),
        Step::Event(ChangeEvent::update(
            id("ATL001"),
            Some(subscriber("ATL001", "Rajesh Kumar", "Bangalore", "v2")),
            position(2),
        )),
        Step::Event(ChangeEvent::update(
            id("ATL001"),
            Some(subscriber("ATL001", "Rajesh Kumar", "Bangalore", "v3")),
            position(3),
        )),
    ]));

    let mut consumer = consumer(&store, &index);
    consumer.run().unwrap();

    assert_eq!(index.get("ATL001").unwrap()["status"], "v3");
    assert_eq!(consumer.stats().upserts, 3);
    assert_eq!(consumer.resume_position(), Some(&position(3)));
    assert_eq!(consumer.state(), ConsumerState::Closed);
}

#[test]
fn test_interrupted_stream_resumes_from_last_position() {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    store.push_session(Session::Open(vec![
        Step::Event(ChangeEvent::insert(
            subscriber("ATL001", "Rajesh Kumar", "Bangalore", "active"),
            position(1),
        )),
        Step::Interrupt,
    ]));
    store.push_session(Session::Open(vec![Step::Event(ChangeEvent::insert(
        subscriber("ATL002", "Priya Sharma", "Mumbai", "active"),
        position(2),
    ))]));

    let mut consumer = consumer(&store, &index);
    consumer.run().unwrap();

    assert!(index.get("ATL001").is_some());
    assert!(index.get("ATL002").is_some());
    assert_eq!(store.watched_from(), vec![None, Some(position(1))]);
    assert_eq!(consumer.stats().reconnects, 1);
}

#[test]
fn test_rejected_resume_position_falls_back_to_tail() {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    store.push_session(Session::RejectToken);
    store.push_session(Session::Open(vec![Step::Event(ChangeEvent::insert(
        subscriber("ATL003", "Anil Mehta", "Delhi", "active"),
        position(9),
    ))]));

    let mut consumer = consumer(&store, &index).with_resume_position(position(1));
    consumer.run().unwrap();

    assert_eq!(store.watched_from(), vec![Some(position(1)), None]);
    assert!(index.get("ATL003").is_some());
    assert_eq!(consumer.resume_position(), Some(&position(9)));
}

#[test]
fn test_update_without_full_document_looks_it_up() {
    let store = Arc::new(MemoryStore::with_docs(vec![subscriber(
        "ATL001",
        "Rajesh Kumar",
        "Bangalore",
        "suspended",
    )]));
    let index = Arc::new(MemoryIndex::new());
    store.push_session(Session::Open(vec![
        Step::Event(ChangeEvent::update(id("ATL001"), None, position(1))),
        // document is gone by the time we look it up.
        Step::Event(ChangeEvent::update(id("ATL404"), None, position(2))),
    ]));

    let mut consumer = consumer(&store, &index);
    consumer.run().unwrap();

    assert_eq!(index.get("ATL001").unwrap()["status"], "suspended");
    assert!(index.get("ATL404").is_none());
    assert_eq!(consumer.stats().upserts, 1);
    assert_eq!(consumer.stats().skipped, 1);
    assert_eq!(consumer.stats().failures, 0);
    assert_eq!(consumer.resume_position(), Some(&position(2)));
}

#[test]
fn test_delete_and_unknown_operations() {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    let drop_event = ChangeEvent {
        operation: Operation::Other("drop".to_string()),
        document_id: None,
        full_document: None,
        resume_position: position(3),
    };
    store.push_session(Session::Open(vec![
        Step::Event(ChangeEvent::insert(
            subscriber("ATL001", "Rajesh Kumar", "Bangalore", "active"),
            position(1),
        )),
        Step::Event(ChangeEvent::delete(id("ATL001"), position(2))),
        Step::Event(drop_event),
    ]));

    let mut consumer = consumer(&store, &index);
    consumer.run().unwrap();

    assert!(index.get("ATL001").is_none());
    assert_eq!(consumer.stats().deletes, 1);
    assert_eq!(consumer.stats().skipped, 1);
    assert_eq!(consumer.stats().events, 3);
    assert_eq!(consumer.resume_position(), Some(&position(3)));
}

#[test]
fn test_failed_projection_does_not_stop_consumer() {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    index.fail_id("ATL001", 1);
    store.push_session(Session::Open(vec![
        Step::Event(ChangeEvent::insert(
            subscriber("ATL001", "Rajesh Kumar", "Bangalore", "active"),
            position(1),
        )),
        Step::Event(ChangeEvent::insert(
            subscriber("ATL002", "Priya Sharma", "Mumbai", "active"),
            position(2),
        )),
    ]));

    let mut consumer = consumer(&store, &index);
    consumer.run().unwrap();

    assert!(index.get("ATL001").is_none());
    assert!(index.get("ATL002").is_some());
    assert_eq!(consumer.stats().failures, 1);
    assert_eq!(consumer.dead_letters().ids(), vec!["ATL001".to_string()]);
    assert_eq!(consumer.resume_position(), Some(&position(2)));
}

#[test]
fn test_retry_policy_recovers_transient_failures() {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    index.fail_id("ATL001", 2);
    store.push_session(Session::Open(vec![Step::Event(ChangeEvent::insert(
        subscriber("ATL001", "Rajesh Kumar", "Bangalore", "active"),
        position(1),
    ))]));

    let mut consumer = consumer(&store, &index).with_retry_policy(RetryPolicy::exponential(
        3,
        Duration::from_millis(1),
        Duration::from_millis(2),
    ));
    consumer.run().unwrap();

    assert!(index.get("ATL001").is_some());
    assert_eq!(consumer.stats().failures, 0);
    assert!(consumer.dead_letters().is_empty());
}

#[test]
fn test_gives_up_when_store_stays_unreachable() {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    for _ in 0..3 {
        store.push_session(Session::Refuse);
    }

    let mut consumer = consumer(&store, &index).with_max_connect_attempts(3);
    match consumer.run() {
        Err(SyncError::StoreUnreachable { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(consumer.state(), ConsumerState::Closed);
    assert_eq!(store.watched_from().len(), 3);
}

#[test]
fn test_successful_connection_resets_failure_count() {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    store.push_session(Session::Refuse);
    store.push_session(Session::Open(vec![Step::Interrupt]));
    store.push_session(Session::Refuse);
    store.push_session(Session::Open(vec![Step::Event(ChangeEvent::insert(
        subscriber("ATL001", "Rajesh Kumar", "Bangalore", "active"),
        position(1),
    ))]));

    let mut consumer = consumer(&store, &index).with_max_connect_attempts(3);
    consumer.run().unwrap();

    assert!(index.get("ATL001").is_some());
    assert_eq!(consumer.stats().reconnects, 3);
}

#[test]
fn test_resume_position_is_saved_and_loaded() {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    let resume_store = Arc::new(MemoryResumeStore::default());
    resume_store.save(&position(7)).unwrap();
    store.push_session(Session::Open(vec![Step::Event(ChangeEvent::insert(
        subscriber("ATL001", "Rajesh Kumar", "Bangalore", "active"),
        position(8),
    ))]));

    let mut consumer = consumer(&store, &index).with_resume_store(resume_store.clone());
    consumer.run().unwrap();

    assert_eq!(store.watched_from(), vec![Some(position(7))]);
    assert_eq!(resume_store.load().unwrap(), Some(position(8)));
}

#[test]
fn test_stream_broken_before_first_event_resumes_where_it_opened() {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    store.push_session(Session::OpenAt(position(5), vec![Step::Interrupt]));
    store.push_session(Session::Open(vec![Step::Event(ChangeEvent::insert(
        subscriber("ATL002", "Priya Sharma", "Mumbai", "active"),
        position(6),
    ))]));

    let mut consumer = consumer(&store, &index);
    consumer.run().unwrap();

    assert_eq!(store.watched_from(), vec![None, Some(position(5))]);
    assert!(index.get("ATL002").is_some());
    assert_eq!(consumer.resume_position(), Some(&position(6)));
}

#[test]
fn test_empty_poll_moves_resume_position() {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    store.push_session(Session::OpenAt(
        position(5),
        vec![Step::Idle(position(6)), Step::Interrupt],
    ));
    store.push_session(Session::Open(vec![]));

    let mut consumer = consumer(&store, &index);
    consumer.run().unwrap();

    assert_eq!(store.watched_from(), vec![None, Some(position(6))]);
    assert_eq!(consumer.stats().events, 0);
}

#[test]
fn test_empty_poll_position_is_not_saved() {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    let resume_store = Arc::new(MemoryResumeStore::default());
    store.push_session(Session::OpenAt(position(5), vec![Step::Idle(position(6))]));

    let mut consumer = consumer(&store, &index).with_resume_store(resume_store.clone());
    consumer.run().unwrap();

    assert_eq!(consumer.resume_position(), Some(&position(6)));
    assert_eq!(resume_store.load().unwrap(), None);
}

#[test]
fn test_token_rejected_mid_stream_restarts_from_tail() {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    store.push_session(Session::Open(vec![Step::RejectToken]));
    store.push_session(Session::Open(vec![Step::Event(ChangeEvent::insert(
        subscriber("ATL003", "Anil Mehta", "Delhi", "active"),
        position(9),
    ))]));

    let mut consumer = consumer(&store, &index).with_resume_position(position(1));
    consumer.run().unwrap();

    assert_eq!(store.watched_from(), vec![Some(position(1)), None]);
    assert!(index.get("ATL003").is_some());
    // a lost token is not a connection failure.
    assert_eq!(consumer.stats().reconnects, 0);
    assert_eq!(consumer.resume_position(), Some(&position(9)));
}
