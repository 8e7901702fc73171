use log::{debug, info};
use tokio::time::{Instant, timeout_at};

use crate::channel::{BroadcastChannel, BroadcastHub};
use crate::config::SyncConfig;
use crate::engine::SpreadsheetEngine;
use crate::error::{WidgetError, WidgetResult};
use crate::lesson::{LessonKey, LessonSeed};
use crate::protocol::SyncMessage;
use crate::snapshot::WorkbookSnapshot;
use crate::store::{SnapshotStore, StorageBackend};
use crate::widget::{ViewRole, Widget, WidgetState};

/// Asks whoever is listening for the live state of `lesson`.
///
/// Posts `REQUEST_SNAPSHOT` up to `max_attempts` times, waiting
/// `retry_delay` after each for a matching `RESPONSE_SNAPSHOT` (an `UPDATE`
/// for the lesson is just as fresh and is taken too). Gives up after
/// `max_attempts * retry_delay` at most. Dropping the future stops the loop.
pub async fn request_live_snapshot(
    channel: &mut BroadcastChannel,
    lesson: &LessonKey,
    config: &SyncConfig,
) -> Option<WorkbookSnapshot> {
    let attempts = config.max_attempts.max(1);
    for attempt in 1..=attempts {
        channel.post(&SyncMessage::request(lesson));
        let deadline = Instant::now() + config.retry_delay();
        loop {
            match timeout_at(deadline, channel.recv()).await {
                Ok(Some(message)) => match message.snapshot_for(lesson) {
                    Some(snapshot) => {
                        debug!(
                            "live snapshot for {:?} on attempt {}",
                            lesson.as_str(),
                            attempt
                        );
                        return Some(snapshot.clone());
                    }
                    None => debug!("ignoring {} while loading", message.kind()),
                },
                Ok(None) => return None,
                Err(_) => break,
            }
        }
        debug!(
            "no answer for {:?} (attempt {}/{})",
            lesson.as_str(),
            attempt,
            attempts
        );
    }
    info!(
        "no live view of {:?} answered; using saved or default data",
        lesson.as_str()
    );
    None
}

impl<E: SpreadsheetEngine, B: StorageBackend> Widget<E, B> {
    /// Mounts the stand-alone view. A live embedded view wins over the
    /// store, the store wins over the lesson defaults.
    pub async fn mount_full_view(
        engine: E,
        seed: LessonSeed,
        store: SnapshotStore<B>,
        hub: &BroadcastHub,
        config: SyncConfig,
    ) -> WidgetResult<Self> {
        let mut channel = hub.open(&config.channel_name);
        let mut widget = Widget::new(ViewRole::FullView, engine, seed, store, config);
        widget.set_state(WidgetState::Loading);

        let key = widget.key().clone();
        let config = widget.config().clone();
        let live = request_live_snapshot(&mut channel, &key, &config).await;
        widget.set_channel(channel);
        widget.load_initial(live)?;
        widget.enter_ready(hub);
        Ok(widget)
    }

    /// Mounts the full view for the lesson named by a `lesson=<key>` query.
    pub async fn mount_full_view_from_query(
        engine: E,
        query: &str,
        seeds: &[LessonSeed],
        store: SnapshotStore<B>,
        hub: &BroadcastHub,
        config: SyncConfig,
    ) -> WidgetResult<Self> {
        let key = LessonKey::from_query(query).ok_or(WidgetError::MissingLessonParam)?;
        let seed = LessonSeed::find(seeds, &key)
            .cloned()
            .ok_or_else(|| WidgetError::UnknownLesson(key.to_string()))?;
        Self::mount_full_view(engine, seed, store, hub, config).await
    }
}
