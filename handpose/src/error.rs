//! Error types for pose recognition.

use thiserror::Error;

use crate::pose::HandId;

/// Recoverable failures from the engine's write and lookup paths.
///
/// Missing tracking data during matching is never reported here; sweeps
/// simply wait for the next tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoseError {
    /// No session registered under this id.
    #[error("unknown hand: {0}")]
    UnknownHand(HandId),

    /// The hand has not reported left/right yet.
    #[error("handedness of hand {0} is unknown")]
    HandednessUnknown(HandId),

    /// The wrist has no usable transform, so nothing can be normalized.
    #[error("wrist of hand {0} is not tracked")]
    WristUntracked(HandId),

    /// A pose record must carry at least one name.
    #[error("pose record needs at least one name")]
    NoNames,

    #[error("no pose named {0:?}")]
    UnknownPose(String),

    #[error("unknown joint: {0}")]
    UnknownJoint(String),

    #[error("unknown digit: {0}")]
    UnknownDigit(String),
}

/// Result type alias for pose operations.
pub type Result<T> = std::result::Result<T, PoseError>;
