/*!
# Lesson Sheets

Persistence and cross-view synchronization for the practice spreadsheets of
an Excel lessons site.

## Overview

Every lesson page carries an editable spreadsheet for hands-on practice. The
same workbook can also be opened on its own, full-page route. The two views
never share memory: each owns its spreadsheet engine and coordinates with the
other only through workbook snapshots.

## Architecture

### Snapshot layer
- **WorkbookSnapshot** - the engine's serialized workbook, treated as an opaque
  JSON value with a single shape check (a `sheets` mapping)
- **SnapshotStore** - lesson-keyed save/load/clear over a storage backend
  (in-memory or one gzip file per key); failures degrade to "not persisted"

### Sync layer
- **BroadcastHub / BroadcastChannel** - named, best-effort publish/subscribe
  between live views; a message never comes back to its sender
- **SyncMessage** - `REQUEST_SNAPSHOT`, `RESPONSE_SNAPSHOT` and `UPDATE`

### Views
- **Embedded widget** - loads the stored snapshot or the lesson defaults,
  persists and broadcasts every committed edit, answers snapshot requests
- **Full view** - asks live views for their state with bounded retries
  (5 x 1s by default) before falling back to the store and then the defaults

Consistency is "last writer wins" in the store plus best-effort live
mirroring through `UPDATE` messages.

## Modules

- **cell**: cell values, `cellData` entries, A1 address helpers
- **lesson**: lesson keys, default practice data, full-view URLs
- **snapshot**: the opaque workbook snapshot
- **store**: storage backends and the snapshot store
- **protocol**: sync messages and their wire format
- **channel**: the broadcast hub
- **engine**: the spreadsheet engine contract and an in-memory engine
- **widget**: widget lifecycle, editing, reset, message handling
- **full_view**: live snapshot requests and full-view mounting
- **validation**: practice answer checks
- **config**: sync tunables
- **error**: error types
*/

pub mod cell;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod full_view;
pub mod lesson;
pub mod protocol;
pub mod snapshot;
pub mod store;
pub mod validation;
pub mod widget;

/// Re-export everything from these modules to make it easier to use
pub use cell::*;
pub use channel::*;
pub use config::*;
pub use engine::*;
pub use error::*;
pub use full_view::*;
pub use lesson::*;
pub use protocol::*;
pub use snapshot::*;
pub use store::*;
pub use validation::*;
pub use widget::*;
