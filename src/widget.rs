use log::{debug, info, warn};
use std::future::Future;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::cell::CellValue;
use crate::channel::{BroadcastChannel, BroadcastHub};
use crate::config::SyncConfig;
use crate::engine::{CellChange, EndEditing, SpreadsheetEngine};
use crate::error::WidgetResult;
use crate::lesson::{LessonKey, LessonSeed};
use crate::protocol::SyncMessage;
use crate::snapshot::WorkbookSnapshot;
use crate::store::{SnapshotStore, StorageBackend};
use crate::validation::{ValidationResult, validate_practice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetState {
    Uninitialized,
    Loading,
    Ready,
    Disposed,
}

/// Which view of the lesson a widget is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewRole {
    /// Inline in the lesson page. Answers snapshot requests.
    Embedded,
    /// Alone on the full-view route. Asks for a live snapshot while loading.
    FullView,
}

/// Where a widget's initial workbook came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    Live,
    Stored,
    Seed,
}

/// One mounted spreadsheet bound to a lesson.
///
/// The widget owns its engine and its channel handle outright; other views
/// only ever see its snapshots, through the store or the channel. Dropping a
/// widget runs the same cleanup as [`Widget::unmount`].
#[derive(Debug)]
pub struct Widget<E: SpreadsheetEngine, B: StorageBackend> {
    role: ViewRole,
    state: WidgetState,
    engine: E,
    seed: LessonSeed,
    store: SnapshotStore<B>,
    config: SyncConfig,
    channel: Option<BroadcastChannel>,
    changes: Option<UnboundedReceiver<CellChange>>,
    skip_next_persist: bool,
    source: SnapshotSource,
}

impl<E: SpreadsheetEngine, B: StorageBackend> Widget<E, B> {
    pub(crate) fn new(
        role: ViewRole,
        engine: E,
        seed: LessonSeed,
        store: SnapshotStore<B>,
        config: SyncConfig,
    ) -> Self {
        Widget {
            role,
            state: WidgetState::Uninitialized,
            engine,
            seed,
            store,
            config,
            channel: None,
            changes: None,
            skip_next_persist: false,
            source: SnapshotSource::Seed,
        }
    }

    /// Mounts the inline widget: stored snapshot if there is one, lesson
    /// defaults otherwise.
    ///
    /// Fails only when the engine cannot build a workbook at all.
    pub fn mount_embedded(
        engine: E,
        seed: LessonSeed,
        store: SnapshotStore<B>,
        hub: &BroadcastHub,
        config: SyncConfig,
    ) -> WidgetResult<Self> {
        let mut widget = Widget::new(ViewRole::Embedded, engine, seed, store, config);
        widget.state = WidgetState::Loading;
        widget.load_initial(None)?;
        widget.enter_ready(hub);
        Ok(widget)
    }

    /// Builds the workbook from the freshest snapshot available: `live`,
    /// then the store, then the lesson defaults.
    pub(crate) fn load_initial(&mut self, live: Option<WorkbookSnapshot>) -> WidgetResult<()> {
        if let Some(snapshot) = live {
            match self.engine.create_workbook(&snapshot) {
                Ok(()) => {
                    self.source = SnapshotSource::Live;
                    return Ok(());
                }
                Err(e) => warn!("live snapshot for {:?} rejected: {}", self.key().as_str(), e),
            }
        }
        if let Some(snapshot) = self.store.load(&self.seed.key) {
            match self.engine.create_workbook(&snapshot) {
                Ok(()) => {
                    self.source = SnapshotSource::Stored;
                    return Ok(());
                }
                Err(e) => warn!("stored snapshot for {:?} rejected: {}", self.key().as_str(), e),
            }
        }
        let snapshot = self.engine.seed_snapshot(&self.seed)?;
        self.engine.create_workbook(&snapshot)?;
        self.source = SnapshotSource::Seed;
        Ok(())
    }

    pub(crate) fn enter_ready(&mut self, hub: &BroadcastHub) {
        if self.channel.is_none() {
            self.channel = Some(hub.open(&self.config.channel_name));
        }
        self.changes = self.engine.subscribe_changes();
        self.state = WidgetState::Ready;
        info!(
            "{:?} widget for {:?} ready ({:?})",
            self.role,
            self.key().as_str(),
            self.source
        );
    }

    pub(crate) fn set_channel(&mut self, channel: BroadcastChannel) {
        self.channel = Some(channel);
    }

    pub(crate) fn set_state(&mut self, state: WidgetState) {
        self.state = state;
    }

    pub fn key(&self) -> &LessonKey {
        &self.seed.key
    }

    pub fn role(&self) -> ViewRole {
        self.role
    }

    pub fn state(&self) -> WidgetState {
        self.state
    }

    pub fn source(&self) -> SnapshotSource {
        self.source
    }

    pub fn skip_next_persist(&self) -> bool {
        self.skip_next_persist
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn store(&self) -> &SnapshotStore<B> {
        &self.store
    }

    /// Current in-memory state.
    pub fn snapshot(&self) -> WidgetResult<WorkbookSnapshot> {
        Ok(self.engine.snapshot()?)
    }

    /// Commits `value` to one cell, then persists and broadcasts.
    pub fn set_cell(
        &mut self,
        row: usize,
        col: usize,
        value: impl Into<CellValue>,
    ) -> WidgetResult<()> {
        self.set_values(row, col, &[vec![value.into()]])
    }

    pub fn set_values(
        &mut self,
        row: usize,
        col: usize,
        values: &[Vec<CellValue>],
    ) -> WidgetResult<()> {
        self.engine.set_values(row, col, values)?;
        self.commit();
        Ok(())
    }

    /// Puts `text` in the cell editor without committing it.
    pub fn type_text(&mut self, row: usize, col: usize, text: &str) -> WidgetResult<()> {
        self.engine.start_editing(row, col, text)?;
        Ok(())
    }

    /// Asks the engine to close its editor so pending input lands in the
    /// sheet. Engines that cannot confirm get the configured settle delay,
    /// which narrows the read-after-edit race but does not close it.
    pub async fn end_editing(&mut self) -> WidgetResult<()> {
        match self.engine.end_editing()? {
            EndEditing::Flushed { committed: true } => self.commit(),
            EndEditing::Flushed { committed: false } => {}
            EndEditing::Requested => {
                tokio::time::sleep(self.config.end_editing_settle()).await;
                // Without notifications there is no telling whether the
                // editor held anything, so commit anyway.
                if self.changes.is_none() || self.drain_changes() > 0 {
                    self.commit();
                }
            }
        }
        Ok(())
    }

    pub async fn read_values(
        &mut self,
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    ) -> WidgetResult<Vec<Vec<CellValue>>> {
        self.end_editing().await?;
        Ok(self.engine.get_values(row, col, rows, cols)?)
    }

    /// Every non-empty row and column of the active sheet, as text.
    pub async fn data_array(&mut self) -> WidgetResult<Vec<Vec<String>>> {
        self.end_editing().await?;
        let (rows, cols) = self.engine.used_extent()?;
        if rows == 0 || cols == 0 {
            return Ok(Vec::new());
        }
        let values = self.engine.get_values(0, 0, rows, cols)?;
        Ok(values
            .into_iter()
            .map(|row| row.iter().map(CellValue::to_string).collect())
            .collect())
    }

    pub async fn check_answer(&mut self) -> WidgetResult<ValidationResult> {
        let data = self.data_array().await?;
        Ok(validate_practice(&data))
    }

    /// Back to the lesson defaults. The stored entry is removed and the next
    /// unmount will not write it back.
    pub fn reset(&mut self) -> WidgetResult<()> {
        let snapshot = self.engine.seed_snapshot(&self.seed)?;
        self.engine.create_workbook(&snapshot)?;
        self.drain_changes();
        self.store.clear(&self.seed.key);
        self.skip_next_persist = true;
        self.source = SnapshotSource::Seed;
        self.post(&SyncMessage::update(&self.seed.key, snapshot));
        info!("reset {:?} to lesson defaults", self.key().as_str());
        Ok(())
    }

    /// Reacts to one message from another view.
    pub fn handle_message(&mut self, message: SyncMessage) {
        if message.lesson_key() != self.key() || self.state != WidgetState::Ready {
            return;
        }
        match message {
            SyncMessage::RequestSnapshot { .. } if self.role == ViewRole::Embedded => {
                match self.engine.snapshot() {
                    Ok(snapshot) => {
                        self.post(&SyncMessage::response(&self.seed.key, snapshot));
                    }
                    Err(e) => warn!("cannot answer snapshot request: {}", e),
                }
            }
            SyncMessage::Update { snapshot, .. } => {
                match self.engine.create_workbook(&snapshot) {
                    Ok(()) => {
                        self.drain_changes();
                        debug!("adopted update for {:?}", self.key().as_str());
                    }
                    Err(e) => warn!("ignoring unusable update: {}", e),
                }
            }
            other => debug!("{:?} widget ignores {}", self.role, other.kind()),
        }
    }

    /// Handles everything already queued, without waiting. Returns how many
    /// messages were processed.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(message) = self.channel.as_mut().and_then(BroadcastChannel::try_recv) {
            self.handle_message(message);
            handled += 1;
        }
        if self.drain_changes() > 0 {
            self.commit();
        }
        handled
    }

    /// Processes messages and engine changes as they arrive until `shutdown`
    /// completes.
    pub async fn serve_until<F: Future<Output = ()>>(&mut self, shutdown: F) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                message = next_message(&mut self.channel) => self.handle_message(message),
                _ = next_change(&mut self.changes) => {
                    self.drain_changes();
                    self.commit();
                }
            }
        }
    }

    /// Final cleanup: persist unless a reset asked us not to, then release
    /// the channel and the engine.
    pub fn unmount(mut self) {
        self.dispose();
    }

    fn dispose(&mut self) {
        if self.state == WidgetState::Disposed {
            return;
        }
        if self.state == WidgetState::Ready {
            if self.skip_next_persist {
                self.skip_next_persist = false;
                debug!("skipping final save for {:?}", self.key().as_str());
            } else {
                self.persist();
            }
        }
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.changes = None;
        self.engine.dispose();
        self.state = WidgetState::Disposed;
        info!("{:?} widget for {:?} disposed", self.role, self.key().as_str());
    }

    fn persist(&self) -> Option<WorkbookSnapshot> {
        match self.engine.snapshot() {
            Ok(snapshot) => {
                self.store.save(&self.seed.key, &snapshot);
                Some(snapshot)
            }
            Err(e) => {
                warn!("no snapshot to save for {:?}: {}", self.key().as_str(), e);
                None
            }
        }
    }

    fn commit(&mut self) {
        self.skip_next_persist = false;
        self.drain_changes();
        if let Some(snapshot) = self.persist() {
            self.post(&SyncMessage::update(&self.seed.key, snapshot));
        }
    }

    fn post(&self, message: &SyncMessage) {
        if let Some(channel) = &self.channel {
            channel.post(message);
        }
    }

    fn drain_changes(&mut self) -> usize {
        let mut drained = 0;
        if let Some(changes) = self.changes.as_mut() {
            while changes.try_recv().is_ok() {
                drained += 1;
            }
        }
        drained
    }
}

impl<E: SpreadsheetEngine, B: StorageBackend> Drop for Widget<E, B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn next_message(channel: &mut Option<BroadcastChannel>) -> SyncMessage {
    if let Some(channel) = channel {
        if let Some(message) = channel.recv().await {
            return message;
        }
    }
    std::future::pending().await
}

async fn next_change(changes: &mut Option<UnboundedReceiver<CellChange>>) -> CellChange {
    if let Some(changes) = changes {
        if let Some(change) = changes.recv().await {
            return change;
        }
    }
    std::future::pending().await
}
