mod history;
mod types;
mod watcher;

pub use history::ConsoleHistory;
pub use types::{InstanceConfig, InstanceSettings, InstanceStatus};
pub use watcher::{ConsoleChunk, OutputCallback, ProcessWatcher, STOPPED_SENTINEL};
