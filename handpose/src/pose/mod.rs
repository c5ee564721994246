//! Pose subsystem: static hand pose recognition from tracked skeletons.
//!
//! Provides:
//! - `skeleton`: joint topology, `HandSkeleton`, the `JointSource` trait
//! - `normalize`: wrist-relative millimeter snapshots
//! - `library`: named reference poses per handedness
//! - `matcher`: time-budgeted, resumable nearest-neighbour search
//! - `events`: began/ended/changed events and the match state machine
//! - `session`: per-hand orchestration and the `PoseQuery` trait
//! - `engine`: registry of hands, the per-frame `update()` entry point

pub mod config;
pub mod engine;
pub mod events;
pub mod library;
pub mod matcher;
pub mod normalize;
pub mod session;
pub mod skeleton;

pub use config::PoseConfig;
pub use engine::PoseEngine;
pub use events::{MatchState, PoseEvent, PoseMatch};
pub use library::{PoseId, PoseLibrary, PoseRecord};
pub use matcher::{Clock, MatchResult, MonotonicClock, SearchMethod, SearchStats, SteppingClock};
pub use normalize::{normalize, JointPositions, NormalizedPose};
pub use session::{HandId, HandSession, PoseQuery};
pub use skeleton::{Digit, Hand, HandJoint, HandSkeleton, JointPose, JointSource, JOINT_COUNT};
