use concord_core::GatewayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
    /// A hook was registered under a name already taken in that list.
    #[error("hook '{0}' is already registered")]
    DuplicateName(String),

    /// A pre- or post-hook returned an error, aborting the pipeline (§4.7).
    #[error(transparent)]
    Aborted(GatewayError),
}

pub type Result<T> = std::result::Result<T, HookError>;
