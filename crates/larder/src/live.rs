//! Live reload: filesystem watching and change fan-out.

pub mod broadcast;
pub mod watcher;

pub use broadcast::{Broadcaster, SubscriberId};
pub use watcher::{ChangeMessage, ChangeWatcher};

/// WebSocket path the injected client connects to.
pub const LIVE_ENDPOINT: &str = "/__larder/live";

pub const HEALTH_ENDPOINT: &str = "/__larder/health";
