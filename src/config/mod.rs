//! Configuration management for bulkq.
//!
//! File settings live in `~/.bulkq/config.yaml`; [`QueueConfig`] is the
//! runtime form handed to a queue, with callbacks attached.

mod paths;
mod queue;
mod settings;

pub use paths::Paths;
pub use queue::{
    ErrorCallback, FlushCallback, QueueConfig, SuccessCallback, DEFAULT_FLUSH_INTERVAL,
    DEFAULT_RETRY_DELAY,
};
pub use settings::{ColorSetting, Config, GeneralConfig, QueueSettings};
