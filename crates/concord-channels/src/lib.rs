pub mod channel;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod types;

pub use channel::ChannelPlugin;
pub use error::ChannelError;
pub use registry::ChannelRegistry;
pub use runtime::PluginRuntime;
pub use types::{HealthStatus, RegistrationHandle, StartupReport};
