// Configuration loading

pub mod settings;

pub use settings::{GridSettings, RetrySettings, ServerSettings, Settings, SyncSettings};
