//! End-to-end engine tests: queueing, worker scheduling and the control
//! surface, against a mock HTTP server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use download_manager::{
    Database, DownloadEngine, DownloadRecord, DownloadState, DownloadStatusListener, EngineConfig,
    EngineError, RecordStore,
};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Complete { id: String },
    Failed { id: String, code: i32 },
}

#[derive(Debug, Default)]
struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn completions(&self, id: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Event::Complete { id: done } if done == id))
            .count()
    }
}

impl DownloadStatusListener for RecordingListener {
    fn on_download_complete(&self, id: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Complete { id: id.to_string() });
    }

    fn on_download_failed(&self, id: &str, error_code: i32, _message: &str) {
        self.events.lock().unwrap().push(Event::Failed {
            id: id.to_string(),
            code: error_code,
        });
    }
}

struct Harness {
    engine: DownloadEngine,
    store: RecordStore,
    listener: Arc<RecordingListener>,
    dir: TempDir,
}

async fn harness() -> Harness {
    let db = Database::new_in_memory().await.unwrap();
    let store = RecordStore::new(db);
    let listener = Arc::new(RecordingListener::default());
    let engine = DownloadEngine::new(
        store.clone(),
        Arc::clone(&listener) as Arc<dyn DownloadStatusListener>,
        &EngineConfig::default(),
    );
    Harness {
        engine,
        store,
        listener,
        dir: tempfile::tempdir().unwrap(),
    }
}

impl Harness {
    fn dest(&self, name: &str) -> String {
        self.dir.path().join(name).display().to_string()
    }
}

async fn wait_for_state(store: &RecordStore, id: &str, state: DownloadState) {
    let deadline = async {
        loop {
            if let Ok(Some(record)) = store.find_by_id(id).await
                && record.state() == state
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), deadline)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {id} to become {state}"));
}

async fn mount_body(server: &MockServer, route: &str, body: Vec<u8>, delay: Option<Duration>) {
    let mut template = ResponseTemplate::new(200).set_body_bytes(body);
    if let Some(delay) = delay {
        template = template.set_delay(delay);
    }
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(template)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_add_downloads_to_completion() {
    let h = harness().await;
    let server = MockServer::start().await;
    mount_body(&server, "/file.bin", b"hello engine".to_vec(), None).await;

    let dest = h.dest("file.bin");
    let record = DownloadRecord::new(
        "d1",
        format!("{}/file.bin", server.uri()),
        dest.clone(),
        false,
    );
    h.engine.add(record).await.unwrap();

    wait_for_state(&h.store, "d1", DownloadState::Complete).await;
    assert_eq!(std::fs::read(&dest).unwrap(), b"hello engine");
    assert_eq!(h.listener.completions("d1"), 1);

    h.engine.release().await;
}

#[tokio::test]
async fn test_add_same_id_twice_downloads_once() {
    let h = harness().await;
    let server = MockServer::start().await;
    mount_body(
        &server,
        "/file.bin",
        b"once".to_vec(),
        Some(Duration::from_millis(300)),
    )
    .await;

    let record = DownloadRecord::new(
        "d1",
        format!("{}/file.bin", server.uri()),
        h.dest("file.bin"),
        false,
    );
    h.engine.add(record.clone()).await.unwrap();
    // Let the worker take it in flight, then re-add the same id.
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.engine.add(record).await.unwrap();

    wait_for_state(&h.store, "d1", DownloadState::Complete).await;
    assert_eq!(h.listener.completions("d1"), 1);
    assert!(h.engine.is_queue_empty().await);

    h.engine.release().await;
}

#[tokio::test]
async fn test_cancel_parked_record_removes_file_and_row() {
    let h = harness().await;

    let dest = h.dest("parked.bin");
    std::fs::write(&dest, b"partial bytes").unwrap();
    let mut record = DownloadRecord::new("d1", "https://example.com/parked.bin", &dest, false);
    record.downloaded_bytes = 13;
    record.set_state(DownloadState::Paused);
    h.store.insert_or_update(&record).await.unwrap();

    h.engine.cancel("d1").await.unwrap();

    assert!(!std::path::Path::new(&dest).exists());
    assert!(h.store.find_by_id("d1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancel_unknown_id_errors() {
    let h = harness().await;
    let result = h.engine.cancel("missing").await;
    assert!(matches!(result, Err(EngineError::RecordNotFound(id)) if id == "missing"));
}

#[tokio::test]
async fn test_pause_all_parks_queue_and_in_flight() {
    let h = harness().await;
    let server = MockServer::start().await;
    mount_body(
        &server,
        "/slow.bin",
        vec![0u8; 1_000],
        Some(Duration::from_millis(500)),
    )
    .await;
    mount_body(&server, "/b.bin", b"b".to_vec(), None).await;
    mount_body(&server, "/c.bin", b"c".to_vec(), None).await;

    h.engine
        .add(DownloadRecord::new(
            "slow",
            format!("{}/slow.bin", server.uri()),
            h.dest("slow.bin"),
            false,
        ))
        .await
        .unwrap();
    // The slow transfer occupies the worker; b and c stay queued.
    tokio::time::sleep(Duration::from_millis(100)).await;
    for id in ["b", "c"] {
        h.engine
            .add(DownloadRecord::new(
                id,
                format!("{}/{id}.bin", server.uri()),
                h.dest(&format!("{id}.bin")),
                false,
            ))
            .await
            .unwrap();
    }

    h.engine.pause_all().await.unwrap();

    wait_for_state(&h.store, "slow", DownloadState::Paused).await;
    for id in ["b", "c"] {
        let stored = h.store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.state(), DownloadState::Paused, "record {id}");
    }
    assert!(h.engine.is_queue_empty().await);

    h.engine.release().await;
}

#[tokio::test]
async fn test_pause_all_continues_past_store_error() {
    let h = harness().await;
    let server = MockServer::start().await;
    mount_body(
        &server,
        "/slow.bin",
        vec![0u8; 1_000],
        Some(Duration::from_millis(500)),
    )
    .await;
    mount_body(&server, "/b.bin", b"b".to_vec(), None).await;
    mount_body(&server, "/c.bin", b"c".to_vec(), None).await;

    h.engine
        .add(DownloadRecord::new(
            "slow",
            format!("{}/slow.bin", server.uri()),
            h.dest("slow.bin"),
            false,
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    for id in ["b", "c"] {
        h.engine
            .add(DownloadRecord::new(
                id,
                format!("{}/{id}.bin", server.uri()),
                h.dest(&format!("{id}.bin")),
                false,
            ))
            .await
            .unwrap();
    }

    // Drop b's row behind the engine's back so its drain fix-up errors.
    h.store.delete("b").await.unwrap();

    let result = h.engine.pause_all().await;
    assert!(result.is_err(), "missing row must surface as an error");

    // The error must not abandon the rest of the drained records.
    let stored = h.store.find_by_id("c").await.unwrap().unwrap();
    assert_eq!(stored.state(), DownloadState::Paused);
    assert!(h.engine.is_queue_empty().await);
    wait_for_state(&h.store, "slow", DownloadState::Paused).await;

    h.engine.release().await;
}

#[tokio::test]
async fn test_requeue_all_keeps_records_queued() {
    let h = harness().await;
    let server = MockServer::start().await;
    mount_body(
        &server,
        "/slow.bin",
        vec![0u8; 1_000],
        Some(Duration::from_millis(500)),
    )
    .await;
    mount_body(&server, "/b.bin", b"b".to_vec(), None).await;

    h.engine
        .add(DownloadRecord::new(
            "slow",
            format!("{}/slow.bin", server.uri()),
            h.dest("slow.bin"),
            false,
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.engine
        .add(DownloadRecord::new(
            "b",
            format!("{}/b.bin", server.uri()),
            h.dest("b.bin"),
            false,
        ))
        .await
        .unwrap();

    h.engine.requeue_all().await.unwrap();
    h.engine.release().await;

    for id in ["slow", "b"] {
        let stored = h.store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.state(), DownloadState::Queued, "record {id}");
    }
}

#[tokio::test]
async fn test_resume_promotes_queued_over_in_flight() {
    let h = harness().await;
    let server = MockServer::start().await;
    mount_body(
        &server,
        "/slow.bin",
        vec![0u8; 1_000],
        Some(Duration::from_millis(500)),
    )
    .await;
    mount_body(&server, "/a.bin", b"a".to_vec(), None).await;

    h.engine
        .add(DownloadRecord::new(
            "slow",
            format!("{}/slow.bin", server.uri()),
            h.dest("slow.bin"),
            false,
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.engine
        .add(DownloadRecord::new(
            "a",
            format!("{}/a.bin", server.uri()),
            h.dest("a.bin"),
            false,
        ))
        .await
        .unwrap();

    // Resume of a queued record preempts the in-flight one.
    h.engine.resume("a").await.unwrap();

    wait_for_state(&h.store, "a", DownloadState::Complete).await;
    wait_for_state(&h.store, "slow", DownloadState::Paused).await;
    assert_eq!(h.listener.completions("a"), 1);

    h.engine.release().await;
}

#[tokio::test]
async fn test_resume_reenqueues_paused_record_from_store() {
    let h = harness().await;
    let server = MockServer::start().await;
    mount_body(&server, "/file.bin", b"resumed".to_vec(), None).await;

    let mut record = DownloadRecord::new(
        "d1",
        format!("{}/file.bin", server.uri()),
        h.dest("file.bin"),
        false,
    );
    record.set_state(DownloadState::Paused);
    h.store.insert_or_update(&record).await.unwrap();

    h.engine.resume("d1").await.unwrap();

    wait_for_state(&h.store, "d1", DownloadState::Complete).await;
    h.engine.release().await;
}

#[tokio::test]
async fn test_resume_unknown_id_errors() {
    let h = harness().await;
    let result = h.engine.resume("missing").await;
    assert!(matches!(result, Err(EngineError::RecordNotFound(id)) if id == "missing"));
}

#[tokio::test]
async fn test_wifi_only_record_defers_until_network_returns() {
    let h = harness().await;
    let server = MockServer::start().await;
    mount_body(&server, "/file.bin", b"wifi".to_vec(), None).await;

    h.engine.set_preferred_network_available(false);
    let dest = h.dest("file.bin");
    let record = DownloadRecord::new(
        "d1",
        format!("{}/file.bin", server.uri()),
        dest.clone(),
        true,
    );
    h.engine.add(record).await.unwrap();

    // Persisted but held out of the queue.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stored = h.store.find_by_id("d1").await.unwrap().unwrap();
    assert_eq!(stored.state(), DownloadState::Queued);
    assert!(h.engine.is_queue_empty().await);
    assert!(!std::path::Path::new(&dest).exists());

    h.engine.set_preferred_network_available(true);
    h.engine.reload().await.unwrap();

    wait_for_state(&h.store, "d1", DownloadState::Complete).await;
    h.engine.release().await;
}

#[tokio::test]
async fn test_reload_recovers_interrupted_session() {
    let h = harness().await;
    let server = MockServer::start().await;
    mount_body(&server, "/file.bin", b"recovered".to_vec(), None).await;

    // A record left in_progress by a crashed session.
    let mut record = DownloadRecord::new(
        "d1",
        format!("{}/file.bin", server.uri()),
        h.dest("file.bin"),
        false,
    );
    record.set_state(DownloadState::InProgress);
    h.store.insert_or_update(&record).await.unwrap();

    h.engine.reload().await.unwrap();

    wait_for_state(&h.store, "d1", DownloadState::Complete).await;
    h.engine.release().await;
}

#[tokio::test]
async fn test_release_requeues_in_flight_record() {
    let h = harness().await;
    let server = MockServer::start().await;
    mount_body(
        &server,
        "/slow.bin",
        vec![0u8; 1_000],
        Some(Duration::from_secs(2)),
    )
    .await;

    h.engine
        .add(DownloadRecord::new(
            "slow",
            format!("{}/slow.bin", server.uri()),
            h.dest("slow.bin"),
            false,
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    h.engine.release().await;

    let stored = h.store.find_by_id("slow").await.unwrap().unwrap();
    assert_eq!(stored.state(), DownloadState::Queued);
    assert_eq!(h.engine.current_download_id().await, None);
}

#[tokio::test]
async fn test_release_returns_while_worker_waits_on_empty_queue() {
    let h = harness().await;
    let server = MockServer::start().await;
    mount_body(&server, "/file.bin", b"done".to_vec(), None).await;

    h.engine
        .add(DownloadRecord::new(
            "d1",
            format!("{}/file.bin", server.uri()),
            h.dest("file.bin"),
            false,
        ))
        .await
        .unwrap();
    wait_for_state(&h.store, "d1", DownloadState::Complete).await;

    // The worker is now parked on the empty queue; release must still
    // reach it and return instead of hanging on the join handle.
    tokio::time::timeout(Duration::from_secs(5), h.engine.release())
        .await
        .expect("release timed out with an idle worker");
    assert_eq!(h.engine.current_download_id().await, None);
}

#[tokio::test]
async fn test_pause_ignores_queued_only_id() {
    let h = harness().await;
    let server = MockServer::start().await;
    mount_body(
        &server,
        "/slow.bin",
        vec![0u8; 1_000],
        Some(Duration::from_millis(500)),
    )
    .await;
    mount_body(&server, "/b.bin", b"b".to_vec(), None).await;

    h.engine
        .add(DownloadRecord::new(
            "slow",
            format!("{}/slow.bin", server.uri()),
            h.dest("slow.bin"),
            false,
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.engine
        .add(DownloadRecord::new(
            "b",
            format!("{}/b.bin", server.uri()),
            h.dest("b.bin"),
            false,
        ))
        .await
        .unwrap();

    // Pause targets the in-flight transfer only; b still runs afterwards.
    h.engine.pause("b").await;

    wait_for_state(&h.store, "slow", DownloadState::Complete).await;
    wait_for_state(&h.store, "b", DownloadState::Complete).await;

    h.engine.release().await;
}
