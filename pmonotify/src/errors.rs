use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("No controller registered under '{0}'")]
    UnknownController(String),
    #[error("Controller '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("Event loop is stopped")]
    LoopStopped,
}

/// Failure reported by the platform surface while rendering a snapshot.
///
/// Logged at the boundary, never retried and never returned to producers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Render failed: {0}")]
pub struct RenderError(pub String);

impl RenderError {
    pub fn new(message: impl Into<String>) -> Self {
        RenderError(message.into())
    }
}

/// The platform refused to grant the deferred resource.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Resource unavailable: {0}")]
pub struct ResourceUnavailable(pub String);

impl ResourceUnavailable {
    pub fn new(message: impl Into<String>) -> Self {
        ResourceUnavailable(message.into())
    }
}
