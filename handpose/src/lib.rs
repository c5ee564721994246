//! EWWM hand pose recognition.
//!
//! Matches live hand skeletons against a library of recorded poses and
//! reports began/ended/changed events. Part of the EXWM-VR project; the
//! compositor feeds joint data in and Emacs consumes events over IPC.

pub mod error;
pub mod ipc;
pub mod pose;

pub use error::{PoseError, Result};
