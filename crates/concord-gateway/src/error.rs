use concord_core::GatewayError;

pub type Result<T> = std::result::Result<T, GatewayError>;
