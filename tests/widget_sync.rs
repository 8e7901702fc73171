use lesson_sheets::{
    BroadcastHub, CellValue, EngineError, EngineResult, EndEditing, GridEngine, LessonKey,
    LessonSeed, MemoryStorage, SnapshotSource, SnapshotStore, SpreadsheetEngine, StorageBackend,
    SyncConfig, SyncMessage, ValidationStatus, Widget, WidgetError, WidgetState,
    WorkbookSnapshot,
};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

type TestWidget = Widget<GridEngine, MemoryStorage>;

fn lesson_one() -> LessonSeed {
    LessonSeed::new(
        "lesson-1",
        [
            vec!["Date", "Description", "Amount"],
            vec!["2024-01-05", "Groceries", "54.20"],
        ],
    )
}

fn key() -> LessonKey {
    LessonKey::new("lesson-1")
}

fn first_cell(snapshot: &WorkbookSnapshot) -> &serde_json::Value {
    &snapshot.as_value()["sheets"]["lesson-sheet"]["cellData"]["0"]["0"]["v"]
}

fn quick_config() -> SyncConfig {
    SyncConfig {
        max_attempts: 1,
        retry_delay_ms: 10,
        ..SyncConfig::default()
    }
}

fn mount_embedded(store: &SnapshotStore<MemoryStorage>, hub: &BroadcastHub) -> TestWidget {
    Widget::mount_embedded(
        GridEngine::new(),
        lesson_one(),
        store.clone(),
        hub,
        SyncConfig::default(),
    )
    .unwrap()
}

/// Runs `widget` in its own task, as if it lived in another tab.
fn serve(mut widget: TestWidget) -> (oneshot::Sender<()>, JoinHandle<TestWidget>) {
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        widget
            .serve_until(async {
                let _ = stop_rx.await;
            })
            .await;
        widget
    });
    (stop_tx, handle)
}

#[test]
fn first_mount_seeds_and_edits_persist() {
    let store = SnapshotStore::new(MemoryStorage::new());
    let hub = BroadcastHub::new();

    let mut widget = mount_embedded(&store, &hub);
    assert_eq!(widget.state(), WidgetState::Ready);
    assert_eq!(widget.source(), SnapshotSource::Seed);
    assert_eq!(store.load(&key()), None);

    widget.set_cell(0, 0, "2024-01-01").unwrap();

    let saved = store.load(&key()).unwrap();
    assert_eq!(first_cell(&saved), "2024-01-01");
}

#[test]
fn remount_picks_up_stored_state() {
    let store = SnapshotStore::new(MemoryStorage::new());
    let hub = BroadcastHub::new();

    let mut widget = mount_embedded(&store, &hub);
    widget.set_cell(2, 1, "Coffee").unwrap();
    let before = widget.snapshot().unwrap();
    widget.unmount();

    let widget = mount_embedded(&store, &hub);
    assert_eq!(widget.source(), SnapshotSource::Stored);
    assert_eq!(widget.snapshot().unwrap(), before);
}

#[tokio::test]
async fn reset_clears_storage_and_skips_the_next_save() {
    let store = SnapshotStore::new(MemoryStorage::new());
    let hub = BroadcastHub::new();

    let mut widget = mount_embedded(&store, &hub);
    widget.set_cell(0, 0, "2024-01-01").unwrap();
    assert!(store.load(&key()).is_some());

    widget.reset().unwrap();
    assert_eq!(store.load(&key()), None);
    assert!(widget.skip_next_persist());
    assert_eq!(
        widget.read_values(0, 0, 1, 1).await.unwrap(),
        vec![vec![CellValue::from("Date")]]
    );

    widget.unmount();
    assert_eq!(store.load(&key()), None);
}

#[test]
fn edit_after_reset_is_saved_again() {
    let store = SnapshotStore::new(MemoryStorage::new());
    let hub = BroadcastHub::new();

    let mut widget = mount_embedded(&store, &hub);
    widget.reset().unwrap();
    widget.set_cell(0, 0, "Day").unwrap();
    assert!(!widget.skip_next_persist());
    drop(widget);

    assert_eq!(first_cell(&store.load(&key()).unwrap()), "Day");
}

#[test]
fn corrupt_entry_falls_back_to_seed() {
    let storage = MemoryStorage::new();
    let store = SnapshotStore::new(storage.clone());
    let hub = BroadcastHub::new();
    storage
        .set_item(&store.storage_key(&key()), "{\"sheets\":")
        .unwrap();

    let widget = mount_embedded(&store, &hub);
    assert_eq!(widget.source(), SnapshotSource::Seed);
    assert_eq!(
        storage.raw(&store.storage_key(&key())).as_deref(),
        Some("{\"sheets\":")
    );
}

#[test]
fn stored_snapshot_the_engine_rejects_falls_back_to_seed() {
    let storage = MemoryStorage::new();
    let store = SnapshotStore::new(storage.clone());
    let hub = BroadcastHub::new();
    storage
        .set_item(&store.storage_key(&key()), r#"{"sheets":{}}"#)
        .unwrap();

    let widget = mount_embedded(&store, &hub);
    assert_eq!(widget.source(), SnapshotSource::Seed);
}

#[test]
fn storage_failures_do_not_break_editing() {
    let storage = MemoryStorage::new();
    let store = SnapshotStore::new(storage.clone());
    let hub = BroadcastHub::new();
    storage.set_disabled(true);

    let mut widget = mount_embedded(&store, &hub);
    widget.set_cell(0, 0, "still works").unwrap();
    assert_eq!(first_cell(&widget.snapshot().unwrap()), "still works");
    widget.unmount();

    storage.set_disabled(false);
    assert_eq!(store.load(&key()), None);
}

#[tokio::test(start_paused = true)]
async fn full_view_adopts_live_embedded_state() {
    let store = SnapshotStore::new(MemoryStorage::new());
    let hub = BroadcastHub::new();

    let mut embedded = mount_embedded(&store, &hub);
    embedded.set_cell(0, 0, "live edit").unwrap();
    embedded.type_text(1, 2, "99.99").unwrap();
    embedded.end_editing().await.unwrap();
    let live = embedded.snapshot().unwrap();
    // Only a live answer can produce this state now.
    store.clear(&key());
    let (stop, server) = serve(embedded);

    let started = Instant::now();
    let full = Widget::mount_full_view(
        GridEngine::new(),
        lesson_one(),
        store.clone(),
        &hub,
        SyncConfig::default(),
    )
    .await
    .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(full.source(), SnapshotSource::Live);
    assert_eq!(full.snapshot().unwrap(), live);

    stop.send(()).unwrap();
    server.await.unwrap().unmount();
}

#[tokio::test(start_paused = true)]
async fn full_view_takes_a_late_answer_from_a_later_attempt() {
    let store = SnapshotStore::new(MemoryStorage::new());
    let hub = BroadcastHub::new();

    let mut embedded = mount_embedded(&store, &hub);
    embedded.set_cell(0, 0, "answered late").unwrap();
    store.clear(&key());

    let started = Instant::now();
    let task = tokio::spawn({
        let (store, hub) = (store.clone(), hub.clone());
        async move {
            Widget::mount_full_view(
                GridEngine::new(),
                lesson_one(),
                store,
                &hub,
                SyncConfig::default(),
            )
            .await
        }
    });
    // The embedded view only starts listening during the third attempt.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let (stop, server) = serve(embedded);

    let full = task.await.unwrap().unwrap();
    let waited = started.elapsed();
    assert_eq!(full.source(), SnapshotSource::Live);
    assert_eq!(first_cell(&full.snapshot().unwrap()), "answered late");
    assert!(waited >= Duration::from_millis(2500), "waited {:?}", waited);
    assert!(waited < Duration::from_secs(5), "waited {:?}", waited);

    stop.send(()).unwrap();
    server.await.unwrap().unmount();
}

#[tokio::test(start_paused = true)]
async fn full_view_falls_back_to_storage_within_budget() {
    let store = SnapshotStore::new(MemoryStorage::new());
    let hub = BroadcastHub::new();

    let mut embedded = mount_embedded(&store, &hub);
    embedded.set_cell(0, 0, "saved earlier").unwrap();
    embedded.unmount();

    let started = Instant::now();
    let full = Widget::mount_full_view(
        GridEngine::new(),
        lesson_one(),
        store.clone(),
        &hub,
        SyncConfig::default(),
    )
    .await
    .unwrap();
    let waited = started.elapsed();

    assert_eq!(full.source(), SnapshotSource::Stored);
    assert_eq!(first_cell(&full.snapshot().unwrap()), "saved earlier");
    // Five attempts one second apart; the slack only covers timer rounding.
    assert!(waited >= Duration::from_secs(5), "waited {:?}", waited);
    assert!(
        waited < Duration::from_secs(5) + Duration::from_millis(50),
        "waited {:?}",
        waited
    );
}

#[tokio::test(start_paused = true)]
async fn full_view_falls_back_to_seed_when_nothing_saved() {
    let store = SnapshotStore::new(MemoryStorage::new());
    let hub = BroadcastHub::new();

    let mut full = Widget::mount_full_view(
        GridEngine::new(),
        lesson_one(),
        store.clone(),
        &hub,
        SyncConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(full.source(), SnapshotSource::Seed);
    assert_eq!(
        full.data_array().await.unwrap(),
        vec![
            vec!["Date", "Description", "Amount"],
            vec!["2024-01-05", "Groceries", "54.20"],
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn other_lessons_do_not_answer() {
    let store = SnapshotStore::new(MemoryStorage::new());
    let hub = BroadcastHub::new();

    let mut embedded = mount_embedded(&store, &hub);
    embedded.set_cell(0, 0, "lesson one data").unwrap();
    let (stop, server) = serve(embedded);

    let other = LessonSeed::new("lesson-2", [["Name", "Email", "Phone"]]);
    let full = Widget::mount_full_view(
        GridEngine::new(),
        other,
        store.clone(),
        &hub,
        SyncConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(full.source(), SnapshotSource::Seed);
    assert_eq!(first_cell(&full.snapshot().unwrap()), "Name");

    stop.send(()).unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn updates_mirror_between_open_views() {
    let store = SnapshotStore::new(MemoryStorage::new());
    let hub = BroadcastHub::new();

    let mut embedded = mount_embedded(&store, &hub);
    let mut full = Widget::mount_full_view(
        GridEngine::new(),
        lesson_one(),
        store.clone(),
        &hub,
        quick_config(),
    )
    .await
    .unwrap();
    // Answers the request the full view already gave up on; the full view
    // ignores the late response.
    embedded.pump();
    full.pump();

    full.set_cell(2, 1, "Coffee").unwrap();
    assert_eq!(embedded.pump(), 1);
    assert_eq!(embedded.snapshot().unwrap(), full.snapshot().unwrap());

    embedded.set_cell(2, 2, "3.50").unwrap();
    full.pump();
    assert_eq!(
        full.read_values(2, 1, 1, 2).await.unwrap(),
        vec![vec![CellValue::from("Coffee"), CellValue::from("3.50")]]
    );
    assert_eq!(store.load(&key()).unwrap(), embedded.snapshot().unwrap());
}

#[tokio::test]
async fn reset_is_mirrored_to_open_views() {
    let store = SnapshotStore::new(MemoryStorage::new());
    let hub = BroadcastHub::new();

    let mut embedded = mount_embedded(&store, &hub);
    let mut full = Widget::mount_full_view(
        GridEngine::new(),
        lesson_one(),
        store.clone(),
        &hub,
        quick_config(),
    )
    .await
    .unwrap();
    embedded.pump();
    full.pump();

    embedded.set_cell(0, 0, "changed").unwrap();
    full.pump();
    embedded.reset().unwrap();
    full.pump();

    assert_eq!(first_cell(&full.snapshot().unwrap()), "Date");
}

#[tokio::test]
async fn pending_edit_is_committed_before_reading() {
    let store = SnapshotStore::new(MemoryStorage::new());
    let hub = BroadcastHub::new();

    let mut widget = mount_embedded(&store, &hub);
    widget.type_text(0, 0, "2024-01-01").unwrap();
    assert!(widget.engine().is_editing());

    let values = widget.read_values(0, 0, 1, 1).await.unwrap();
    assert_eq!(values, vec![vec![CellValue::from("2024-01-01")]]);
    assert!(!widget.engine().is_editing());
    assert_eq!(first_cell(&store.load(&key()).unwrap()), "2024-01-01");
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_commit_waits_the_settle_delay() {
    let store = SnapshotStore::new(MemoryStorage::new());
    let hub = BroadcastHub::new();
    let config = SyncConfig::default();

    let mut widget = Widget::mount_embedded(
        GridEngine::with_unconfirmed_commits(),
        lesson_one(),
        store.clone(),
        &hub,
        config.clone(),
    )
    .unwrap();
    widget.type_text(0, 0, "typed").unwrap();

    let started = Instant::now();
    let values = widget.read_values(0, 0, 1, 1).await.unwrap();
    assert!(started.elapsed() >= config.end_editing_settle());
    assert_eq!(values, vec![vec![CellValue::from("typed")]]);
    assert_eq!(first_cell(&store.load(&key()).unwrap()), "typed");
}

/// Commits without confirming and without change notifications.
struct SilentEngine(GridEngine);

impl SpreadsheetEngine for SilentEngine {
    fn seed_snapshot(&self, seed: &LessonSeed) -> EngineResult<WorkbookSnapshot> {
        self.0.seed_snapshot(seed)
    }

    fn create_workbook(&mut self, snapshot: &WorkbookSnapshot) -> EngineResult<()> {
        self.0.create_workbook(snapshot)
    }

    fn snapshot(&self) -> EngineResult<WorkbookSnapshot> {
        self.0.snapshot()
    }

    fn get_values(
        &self,
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    ) -> EngineResult<Vec<Vec<CellValue>>> {
        self.0.get_values(row, col, rows, cols)
    }

    fn set_values(
        &mut self,
        row: usize,
        col: usize,
        values: &[Vec<CellValue>],
    ) -> EngineResult<()> {
        self.0.set_values(row, col, values)
    }

    fn used_extent(&self) -> EngineResult<(usize, usize)> {
        self.0.used_extent()
    }

    fn start_editing(&mut self, row: usize, col: usize, text: &str) -> EngineResult<()> {
        self.0.start_editing(row, col, text)
    }

    fn end_editing(&mut self) -> EngineResult<EndEditing> {
        self.0.end_editing()
    }

    fn dispose(&mut self) {
        self.0.dispose()
    }
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_commit_without_notifications_is_still_saved() {
    let store = SnapshotStore::new(MemoryStorage::new());
    let hub = BroadcastHub::new();
    let config = SyncConfig::default();
    let mut peer = hub.open(&config.channel_name);

    let mut widget = Widget::mount_embedded(
        SilentEngine(GridEngine::with_unconfirmed_commits()),
        lesson_one(),
        store.clone(),
        &hub,
        config,
    )
    .unwrap();
    widget.type_text(0, 0, "typed").unwrap();

    let values = widget.read_values(0, 0, 1, 1).await.unwrap();
    assert_eq!(values, vec![vec![CellValue::from("typed")]]);
    assert_eq!(first_cell(&store.load(&key()).unwrap()), "typed");

    let update = peer.try_recv().unwrap();
    assert!(matches!(update, SyncMessage::Update { .. }));
    assert_eq!(first_cell(update.snapshot_for(&key()).unwrap()), "typed");
}

#[tokio::test]
async fn check_answer_reads_live_data() {
    let store = SnapshotStore::new(MemoryStorage::new());
    let hub = BroadcastHub::new();

    let mut widget = mount_embedded(&store, &hub);
    assert_eq!(
        widget.check_answer().await.unwrap().status,
        ValidationStatus::Correct
    );

    widget.type_text(1, 1, "Groceries + Snacks").unwrap();
    let result = widget.check_answer().await.unwrap();
    assert_eq!(result.status, ValidationStatus::Partial);
    assert!(result.details[0].starts_with("Cells B2 "));
}

#[tokio::test(start_paused = true)]
async fn full_view_from_query() {
    let store = SnapshotStore::new(MemoryStorage::new());
    let hub = BroadcastHub::new();
    let seeds = vec![lesson_one()];

    let url = key().full_view_url();
    let (_, query) = url.split_once('?').unwrap();
    let full = Widget::mount_full_view_from_query(
        GridEngine::new(),
        query,
        &seeds,
        store.clone(),
        &hub,
        quick_config(),
    )
    .await
    .unwrap();
    assert_eq!(full.key(), &key());

    let missing = Widget::mount_full_view_from_query(
        GridEngine::new(),
        "?tab=2",
        &seeds,
        store.clone(),
        &hub,
        quick_config(),
    )
    .await;
    assert!(matches!(missing, Err(WidgetError::MissingLessonParam)));

    let unknown = Widget::mount_full_view_from_query(
        GridEngine::new(),
        "lesson=lesson-9",
        &seeds,
        store.clone(),
        &hub,
        quick_config(),
    )
    .await;
    assert!(matches!(unknown, Err(WidgetError::UnknownLesson(name)) if name == "lesson-9"));
}

#[tokio::test(start_paused = true)]
async fn torn_down_full_view_stops_waiting() {
    let store = SnapshotStore::new(MemoryStorage::new());
    let hub = BroadcastHub::new();
    let config = SyncConfig::default();

    let task = tokio::spawn({
        let (store, hub, config) = (store.clone(), hub.clone(), config.clone());
        async move {
            Widget::mount_full_view(GridEngine::new(), lesson_one(), store, &hub, config).await
        }
    });
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(hub.subscriber_count(&config.channel_name), 1);

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert_eq!(hub.subscriber_count(&config.channel_name), 0);
    assert_eq!(store.load(&key()), None);
}

#[test]
fn dropping_a_widget_releases_its_channel() {
    let store = SnapshotStore::new(MemoryStorage::new());
    let hub = BroadcastHub::new();
    let name = SyncConfig::default().channel_name;

    let widget = mount_embedded(&store, &hub);
    assert_eq!(hub.subscriber_count(&name), 1);
    drop(widget);
    assert_eq!(hub.subscriber_count(&name), 0);
    // A plain unmount persists the untouched seed.
    assert_eq!(first_cell(&store.load(&key()).unwrap()), "Date");
}

struct BrokenEngine;

impl SpreadsheetEngine for BrokenEngine {
    fn seed_snapshot(&self, seed: &LessonSeed) -> EngineResult<WorkbookSnapshot> {
        GridEngine::new().seed_snapshot(seed)
    }

    fn create_workbook(&mut self, _snapshot: &WorkbookSnapshot) -> EngineResult<()> {
        Err(EngineError::InvalidWorkbook("renderer unavailable".into()))
    }

    fn snapshot(&self) -> EngineResult<WorkbookSnapshot> {
        Err(EngineError::NoWorkbook)
    }

    fn get_values(
        &self,
        _row: usize,
        _col: usize,
        _rows: usize,
        _cols: usize,
    ) -> EngineResult<Vec<Vec<CellValue>>> {
        Err(EngineError::NoWorkbook)
    }

    fn set_values(
        &mut self,
        _row: usize,
        _col: usize,
        _values: &[Vec<CellValue>],
    ) -> EngineResult<()> {
        Err(EngineError::NoWorkbook)
    }

    fn used_extent(&self) -> EngineResult<(usize, usize)> {
        Err(EngineError::NoWorkbook)
    }

    fn start_editing(&mut self, _row: usize, _col: usize, _text: &str) -> EngineResult<()> {
        Err(EngineError::NoWorkbook)
    }

    fn end_editing(&mut self) -> EngineResult<EndEditing> {
        Err(EngineError::NoWorkbook)
    }

    fn dispose(&mut self) {}
}

#[test]
fn engine_failure_is_fatal_to_the_widget() {
    let storage = MemoryStorage::new();
    let store = SnapshotStore::new(storage.clone());
    let hub = BroadcastHub::new();

    let result = Widget::mount_embedded(
        BrokenEngine,
        lesson_one(),
        store,
        &hub,
        SyncConfig::default(),
    );
    assert!(matches!(result, Err(WidgetError::Engine(_))));
    assert!(storage.is_empty());
    assert_eq!(hub.subscriber_count(&SyncConfig::default().channel_name), 0);
}
