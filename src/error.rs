//! Error types for mediabridge
//!
//! Every public operation returns one of these instead of panicking across the
//! component boundary. Sample drops are not errors and never show up here.

use thiserror::Error;

/// Main error type shared by the stream sink, the event channel and the
/// orchestration workers.
///
/// The type is `Clone` so that a single operation outcome can be observed by
/// every waiter holding an [`crate::workers::OperationHandle`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Operation not legal in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Operation attempted after terminal shutdown
    #[error("Object has been shut down")]
    Shutdown,

    /// Media type negotiation rejected an incompatible type
    #[error("Invalid media type: {0}")]
    InvalidMediaType(String),

    /// Media type index past the end of the supported list
    #[error("No media type at index {0}")]
    NoMoreTypes(usize),

    /// A second asynchronous event request while one is still pending
    #[error("An event request is already pending")]
    MultipleSubscribers,

    /// Device or session setup failed; partial resources were rolled back
    #[error("Resource acquisition failed: {0}")]
    ResourceAcquisitionFailed(String),

    /// An in-flight operation did not reach its own terminal outcome
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// The object has not been set up for this call yet
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The downstream consumer refused a sample
    #[error("Consumer error: {0}")]
    Consumer(String),
}

impl BridgeError {
    /// Stable numeric code reported to the host through `Failed` callbacks.
    pub fn code(&self) -> i32 {
        match self {
            BridgeError::InvalidState(_) => 1,
            BridgeError::Shutdown => 2,
            BridgeError::InvalidMediaType(_) => 3,
            BridgeError::NoMoreTypes(_) => 4,
            BridgeError::MultipleSubscribers => 5,
            BridgeError::ResourceAcquisitionFailed(_) => 6,
            BridgeError::Cancelled(_) => 7,
            BridgeError::NotInitialized(_) => 8,
            BridgeError::InvalidArgument(_) => 9,
            BridgeError::Consumer(_) => 10,
        }
    }

    /// Wrap a collaborator failure met while building a run.
    pub(crate) fn acquisition(step: &str, err: BridgeError) -> Self {
        match err {
            BridgeError::ResourceAcquisitionFailed(msg) => {
                BridgeError::ResourceAcquisitionFailed(format!("{}: {}", step, msg))
            }
            other => BridgeError::ResourceAcquisitionFailed(format!("{}: {}", step, other)),
        }
    }
}

/// Result alias used across the crate
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
