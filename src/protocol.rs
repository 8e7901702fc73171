//! Messages exchanged between live views of a lesson workbook.
//!
//! On the wire each message is a JSON object tagged by `type`:
//!
//! | type                | fields                  | sent by            |
//! |---------------------|-------------------------|--------------------|
//! | `REQUEST_SNAPSHOT`  | `lessonKey`             | a loading full view |
//! | `RESPONSE_SNAPSHOT` | `lessonKey`, `snapshot` | an embedded view    |
//! | `UPDATE`            | `lessonKey`, `snapshot` | any view after an edit |

use serde::{Deserialize, Serialize};

use crate::lesson::LessonKey;
use crate::snapshot::WorkbookSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMessage {
    #[serde(rename_all = "camelCase")]
    RequestSnapshot { lesson_key: LessonKey },
    #[serde(rename_all = "camelCase")]
    ResponseSnapshot {
        lesson_key: LessonKey,
        snapshot: WorkbookSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    Update {
        lesson_key: LessonKey,
        snapshot: WorkbookSnapshot,
    },
}

impl SyncMessage {
    pub fn request(lesson_key: &LessonKey) -> Self {
        SyncMessage::RequestSnapshot {
            lesson_key: lesson_key.clone(),
        }
    }

    pub fn response(lesson_key: &LessonKey, snapshot: WorkbookSnapshot) -> Self {
        SyncMessage::ResponseSnapshot {
            lesson_key: lesson_key.clone(),
            snapshot,
        }
    }

    pub fn update(lesson_key: &LessonKey, snapshot: WorkbookSnapshot) -> Self {
        SyncMessage::Update {
            lesson_key: lesson_key.clone(),
            snapshot,
        }
    }

    pub fn lesson_key(&self) -> &LessonKey {
        match self {
            SyncMessage::RequestSnapshot { lesson_key }
            | SyncMessage::ResponseSnapshot { lesson_key, .. }
            | SyncMessage::Update { lesson_key, .. } => lesson_key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::RequestSnapshot { .. } => "REQUEST_SNAPSHOT",
            SyncMessage::ResponseSnapshot { .. } => "RESPONSE_SNAPSHOT",
            SyncMessage::Update { .. } => "UPDATE",
        }
    }

    /// The snapshot a message carries, if it is for `lesson`.
    pub fn snapshot_for(&self, lesson: &LessonKey) -> Option<&WorkbookSnapshot> {
        match self {
            SyncMessage::ResponseSnapshot {
                lesson_key,
                snapshot,
            }
            | SyncMessage::Update {
                lesson_key,
                snapshot,
            } if lesson_key == lesson => Some(snapshot),
            _ => None,
        }
    }
}
