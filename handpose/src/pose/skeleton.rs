//! Hand skeleton data structures fed into pose recognition.
//!
//! Models 26 joints per hand as defined by XR_EXT_hand_tracking.
//! The tracking runtime fills a `HandSkeleton` every frame; the engine
//! only ever reads it through the `JointSource` trait.

// ── Joint definitions ──────────────────────────────────────

/// The 26 hand joints defined by XR_EXT_hand_tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandJoint {
    Palm,
    Wrist,
    ThumbMetacarpal,
    ThumbProximal,
    ThumbDistal,
    ThumbTip,
    IndexMetacarpal,
    IndexProximal,
    IndexIntermediate,
    IndexDistal,
    IndexTip,
    MiddleMetacarpal,
    MiddleProximal,
    MiddleIntermediate,
    MiddleDistal,
    MiddleTip,
    RingMetacarpal,
    RingProximal,
    RingIntermediate,
    RingDistal,
    RingTip,
    LittleMetacarpal,
    LittleProximal,
    LittleIntermediate,
    LittleDistal,
    LittleTip,
}

/// Total number of joints per hand.
pub const JOINT_COUNT: usize = 26;

impl HandJoint {
    /// Every joint in slot order.
    pub const ALL: [HandJoint; JOINT_COUNT] = [
        Self::Palm,
        Self::Wrist,
        Self::ThumbMetacarpal,
        Self::ThumbProximal,
        Self::ThumbDistal,
        Self::ThumbTip,
        Self::IndexMetacarpal,
        Self::IndexProximal,
        Self::IndexIntermediate,
        Self::IndexDistal,
        Self::IndexTip,
        Self::MiddleMetacarpal,
        Self::MiddleProximal,
        Self::MiddleIntermediate,
        Self::MiddleDistal,
        Self::MiddleTip,
        Self::RingMetacarpal,
        Self::RingProximal,
        Self::RingIntermediate,
        Self::RingDistal,
        Self::RingTip,
        Self::LittleMetacarpal,
        Self::LittleProximal,
        Self::LittleIntermediate,
        Self::LittleDistal,
        Self::LittleTip,
    ];

    /// Convert joint enum to slot index (0-25).
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Joint at a slot index, if in range.
    pub fn from_index(index: usize) -> Option<HandJoint> {
        Self::ALL.get(index).copied()
    }

    /// String representation for IPC.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Palm => "palm",
            Self::Wrist => "wrist",
            Self::ThumbMetacarpal => "thumb-metacarpal",
            Self::ThumbProximal => "thumb-proximal",
            Self::ThumbDistal => "thumb-distal",
            Self::ThumbTip => "thumb-tip",
            Self::IndexMetacarpal => "index-metacarpal",
            Self::IndexProximal => "index-proximal",
            Self::IndexIntermediate => "index-intermediate",
            Self::IndexDistal => "index-distal",
            Self::IndexTip => "index-tip",
            Self::MiddleMetacarpal => "middle-metacarpal",
            Self::MiddleProximal => "middle-proximal",
            Self::MiddleIntermediate => "middle-intermediate",
            Self::MiddleDistal => "middle-distal",
            Self::MiddleTip => "middle-tip",
            Self::RingMetacarpal => "ring-metacarpal",
            Self::RingProximal => "ring-proximal",
            Self::RingIntermediate => "ring-intermediate",
            Self::RingDistal => "ring-distal",
            Self::RingTip => "ring-tip",
            Self::LittleMetacarpal => "little-metacarpal",
            Self::LittleProximal => "little-proximal",
            Self::LittleIntermediate => "little-intermediate",
            Self::LittleDistal => "little-distal",
            Self::LittleTip => "little-tip",
        }
    }

    /// Parse an IPC joint name. Accepts "pinky-" as an alias for "little-".
    pub fn from_name(name: &str) -> Option<HandJoint> {
        let name = name
            .trim()
            .to_ascii_lowercase()
            .replace(|c: char| c == ' ' || c == '_', "-");
        let name = match name.strip_prefix("pinky-") {
            Some(rest) => format!("little-{rest}"),
            None => name,
        };
        Self::ALL.iter().copied().find(|j| j.as_str() == name)
    }

    /// Fingertip joints for convenience.
    pub fn fingertip_joints() -> [HandJoint; 5] {
        [
            Self::ThumbTip,
            Self::IndexTip,
            Self::MiddleTip,
            Self::RingTip,
            Self::LittleTip,
        ]
    }

    /// Whether this joint is one of the five digit tips.
    pub fn is_fingertip(&self) -> bool {
        Self::fingertip_joints().contains(self)
    }
}

// ── Digits ─────────────────────────────────────────────────

/// The five digits of a hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Digit {
    Thumb,
    Index,
    Middle,
    Ring,
    Little,
}

/// Below this base-to-tip angle (degrees) a digit counts as extended.
pub const DIGIT_EXTENDED_MAX_DEG: f32 = 45.0;

/// Above this base-to-tip angle (degrees) a digit counts as contracted.
pub const DIGIT_CONTRACTED_MIN_DEG: f32 = 110.0;

impl Digit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thumb => "thumb",
            Self::Index => "index",
            Self::Middle => "middle",
            Self::Ring => "ring",
            Self::Little => "little",
        }
    }

    pub fn from_name(name: &str) -> Option<Digit> {
        match name.trim().to_ascii_lowercase().as_str() {
            "thumb" => Some(Self::Thumb),
            "index" => Some(Self::Index),
            "middle" => Some(Self::Middle),
            "ring" => Some(Self::Ring),
            "little" | "pinky" => Some(Self::Little),
            _ => None,
        }
    }

    /// Proximal phalanx joint, the base of the angle measurement.
    pub fn proximal(&self) -> HandJoint {
        match self {
            Self::Thumb => HandJoint::ThumbProximal,
            Self::Index => HandJoint::IndexProximal,
            Self::Middle => HandJoint::MiddleProximal,
            Self::Ring => HandJoint::RingProximal,
            Self::Little => HandJoint::LittleProximal,
        }
    }

    pub fn tip(&self) -> HandJoint {
        match self {
            Self::Thumb => HandJoint::ThumbTip,
            Self::Index => HandJoint::IndexTip,
            Self::Middle => HandJoint::MiddleTip,
            Self::Ring => HandJoint::RingTip,
            Self::Little => HandJoint::LittleTip,
        }
    }
}

// ── Hand enum ──────────────────────────────────────────────

/// Which hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    /// Parse a handedness label. Anything but "left"/"right" is unknown.
    pub fn parse(s: &str) -> Option<Hand> {
        match s {
            "left" => Some(Hand::Left),
            "right" => Some(Hand::Right),
            _ => None,
        }
    }
}

// ── Joint pose ─────────────────────────────────────────────

/// Pose data for a single joint.
#[derive(Debug, Clone, PartialEq)]
pub struct JointPose {
    /// Position in meters (x, y, z).
    pub position: [f32; 3],
    /// Orientation quaternion (x, y, z, w).
    pub orientation: [f32; 4],
    /// Joint radius in meters.
    pub radius: f32,
    /// Whether this joint has valid tracking data.
    pub valid: bool,
}

impl Default for JointPose {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, 0.0],
            orientation: [0.0, 0.0, 0.0, 1.0],
            radius: 0.01,
            valid: false,
        }
    }
}

impl JointPose {
    /// A valid joint at a position with the given orientation.
    pub fn tracked(position: [f32; 3], orientation: [f32; 4]) -> Self {
        Self {
            position,
            orientation,
            valid: true,
            ..Self::default()
        }
    }

    /// Usable for matching: flagged valid and not sitting on the origin,
    /// which runtimes report for joints they have no data for.
    pub fn is_tracked(&self) -> bool {
        self.valid && self.position != [0.0, 0.0, 0.0]
    }
}

// ── Joint source ───────────────────────────────────────────

/// Anything that can report a hand's current joint transforms.
pub trait JointSource {
    /// Handedness label, `None` while unknown.
    fn handedness(&self) -> Option<Hand>;

    /// Current transform of a joint, `None` when not reported at all.
    fn joint(&self, joint: HandJoint) -> Option<&JointPose>;
}

// ── Hand skeleton ──────────────────────────────────────────

/// Complete skeleton data for one hand.
#[derive(Debug, Clone)]
pub struct HandSkeleton {
    /// Which hand this skeleton represents, if the runtime has said.
    pub hand: Option<Hand>,
    /// 26 joint poses indexed by HandJoint.
    pub joints: Vec<JointPose>,
    /// Timestamp of last update in nanoseconds.
    pub timestamp_ns: u64,
}

impl HandSkeleton {
    /// Create a new skeleton with default (untracked) joint poses.
    pub fn new(hand: Option<Hand>) -> Self {
        let joints = (0..JOINT_COUNT).map(|_| JointPose::default()).collect();
        Self {
            hand,
            joints,
            timestamp_ns: 0,
        }
    }

    /// Overwrite a single joint.
    pub fn set_joint(&mut self, joint: HandJoint, pose: JointPose) {
        self.joints[joint.index()] = pose;
    }

    /// Reset all joint data to defaults.
    pub fn reset(&mut self) {
        for joint in &mut self.joints {
            *joint = JointPose::default();
        }
        self.timestamp_ns = 0;
    }

    fn tracked_joint(&self, joint: HandJoint) -> Option<&JointPose> {
        self.joints.get(joint.index()).filter(|j| j.is_tracked())
    }

    /// Distance between two joints in centimeters.
    ///
    /// `None` when either joint is untracked or both report the same
    /// position (a runtime glitch rather than a real measurement).
    pub fn joint_distance_cm(&self, a: HandJoint, b: HandJoint) -> Option<f32> {
        let pa = self.tracked_joint(a)?.position;
        let pb = self.tracked_joint(b)?.position;
        if pa == pb {
            return None;
        }
        let dx = pb[0] - pa[0];
        let dy = pb[1] - pa[1];
        let dz = pb[2] - pa[2];
        Some((dx * dx + dy * dy + dz * dz).sqrt() * 100.0)
    }

    /// Angle in degrees between a digit's proximal phalanx and its tip.
    pub fn digit_angle(&self, digit: Digit) -> Option<f32> {
        let base = self.joints.get(digit.proximal().index())?;
        let tip = self.joints.get(digit.tip().index())?;
        if !base.valid || !tip.valid {
            return None;
        }
        quat_angle(base.orientation, tip.orientation).map(f32::to_degrees)
    }

    pub fn digit_is_extended(&self, digit: Digit) -> bool {
        self.digit_angle(digit)
            .map(|a| a < DIGIT_EXTENDED_MAX_DEG)
            .unwrap_or(false)
    }

    pub fn digit_is_contracted(&self, digit: Digit) -> bool {
        self.digit_angle(digit)
            .map(|a| a > DIGIT_CONTRACTED_MIN_DEG)
            .unwrap_or(false)
    }
}

impl JointSource for HandSkeleton {
    fn handedness(&self) -> Option<Hand> {
        self.hand
    }

    fn joint(&self, joint: HandJoint) -> Option<&JointPose> {
        self.joints.get(joint.index())
    }
}

// ── Quaternion helpers ─────────────────────────────────────

/// Normalize a quaternion; `None` for a zero-length or non-finite input.
pub(crate) fn quat_normalize(q: [f32; 4]) -> Option<[f32; 4]> {
    let len = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    if !len.is_finite() || len < f32::EPSILON {
        return None;
    }
    Some([q[0] / len, q[1] / len, q[2] / len, q[3] / len])
}

/// Rotate `v` by the inverse of unit quaternion `q`.
pub(crate) fn quat_rotate_inverse(q: [f32; 4], v: [f32; 3]) -> [f32; 3] {
    // conjugate of a unit quaternion is its inverse
    let (ux, uy, uz, w) = (-q[0], -q[1], -q[2], q[3]);
    // t = 2 * (u x v)
    let tx = 2.0 * (uy * v[2] - uz * v[1]);
    let ty = 2.0 * (uz * v[0] - ux * v[2]);
    let tz = 2.0 * (ux * v[1] - uy * v[0]);
    // v' = v + w * t + u x t
    [
        v[0] + w * tx + (uy * tz - uz * ty),
        v[1] + w * ty + (uz * tx - ux * tz),
        v[2] + w * tz + (ux * ty - uy * tx),
    ]
}

/// Smallest rotation angle (radians) between two orientations.
fn quat_angle(a: [f32; 4], b: [f32; 4]) -> Option<f32> {
    let a = quat_normalize(a)?;
    let b = quat_normalize(b)?;
    let dot = (a[0] * b[0] + a[1] * b[1] + a[2] * b[2] + a[3] * b[3]).abs();
    Some(2.0 * dot.min(1.0).acos())
}

// ── Tests ──────────────────────────────────────────────────
