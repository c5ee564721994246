//! Joint frame normalization.
//!
//! Converts a hand's world-space joint transforms into wrist-relative
//! positions, rounded to whole millimeters so tracking jitter below a
//! millimeter never changes a score.

use super::skeleton::{quat_normalize, quat_rotate_inverse, HandJoint, JointSource, JOINT_COUNT};

/// Per-slot joint positions in millimeters, `None` where a joint is absent.
pub type JointPositions = [Option<[i32; 3]>; JOINT_COUNT];

/// A wrist-relative, millimeter-quantized snapshot of one hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPose {
    positions: JointPositions,
}

impl NormalizedPose {
    pub fn positions(&self) -> &JointPositions {
        &self.positions
    }

    pub fn into_positions(self) -> JointPositions {
        self.positions
    }

    /// Position of one joint, if present.
    pub fn get(&self, joint: HandJoint) -> Option<[i32; 3]> {
        self.positions[joint.index()]
    }

    /// Number of slots carrying a position.
    pub fn present_count(&self) -> usize {
        self.positions.iter().filter(|p| p.is_some()).count()
    }
}

/// Convert meters to whole millimeters.
fn to_mm(v: [f32; 3]) -> [i32; 3] {
    [
        (v[0] * 1000.0).round() as i32,
        (v[1] * 1000.0).round() as i32,
        (v[2] * 1000.0).round() as i32,
    ]
}

/// Express every tracked joint in the wrist's local frame.
///
/// Returns `None` when the wrist has no usable transform; joints that are
/// untracked or sit exactly on the world origin come out absent.
pub fn normalize<S: JointSource + ?Sized>(source: &S) -> Option<NormalizedPose> {
    let wrist = source.joint(HandJoint::Wrist).filter(|j| j.is_tracked())?;
    let wrist_rot = quat_normalize(wrist.orientation)?;
    let origin = wrist.position;

    let mut positions: JointPositions = [None; JOINT_COUNT];
    for joint in HandJoint::ALL {
        let Some(pose) = source.joint(joint).filter(|j| j.is_tracked()) else {
            continue;
        };
        let offset = [
            pose.position[0] - origin[0],
            pose.position[1] - origin[1],
            pose.position[2] - origin[2],
        ];
        positions[joint.index()] = Some(to_mm(quat_rotate_inverse(wrist_rot, offset)));
    }

    Some(NormalizedPose { positions })
}
