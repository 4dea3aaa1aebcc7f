pub mod engine;
pub mod error;
pub mod types;

pub use engine::HookPipeline;
pub use error::{HookError, Result};
pub use types::{PostHook, PreHook, PRIORITY_CRITICAL, PRIORITY_HIGH, PRIORITY_LOW, PRIORITY_NORMAL};
