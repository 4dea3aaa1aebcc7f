pub mod dispatcher;
pub mod error;
pub mod gateway;

pub use dispatcher::{EscalationFormatterRegistry, NoFormatters, ResponseDispatcher};
pub use error::Result;
pub use gateway::ChannelGateway;
