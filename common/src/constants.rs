//! Constants used throughout the workspace.

use std::time::Duration;

/// Default size of mpsc channels between actors.
pub const DEFAULT_CHANNEL_SIZE: usize = 256;

/// Size of small mpsc channels used for infrequent events.
pub const SMALL_CHANNEL_SIZE: usize = 16;

/// How long the task supervisor waits for remaining tasks after a shutdown
/// signal before declaring them hung.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Lowest id assigned to media catalogue entries shared across all stores.
/// Entries below this id are local to one store.
pub const GLOBAL_MEDIA_ID: i32 = 1_000_000;
