//! Pose engine: the registry of tracked hands plus the shared library.
//!
//! Call `update()` once per frame. Each registered hand gets its own
//! slice of the search budget and reports its own events.

use std::collections::BTreeMap;

use tracing::{debug, info};

use super::config::PoseConfig;
use super::events::PoseEvent;
use super::library::{PoseId, PoseLibrary};
use super::matcher::{Clock, MatchResult, MonotonicClock};
use super::session::{HandId, HandSession, PoseQuery};
use super::skeleton::{Hand, HandSkeleton, JointSource};
use crate::error::{PoseError, Result};

/// Central pose recognition state.
pub struct PoseEngine<S = HandSkeleton, C = MonotonicClock> {
    /// Configuration.
    pub config: PoseConfig,
    library: PoseLibrary,
    sessions: BTreeMap<HandId, HandSession<S>>,
    next_hand_id: u64,
    clock: C,
}

impl PoseEngine {
    /// Create an engine on the real clock with default configuration.
    pub fn new() -> Self {
        Self::with_clock(PoseConfig::default(), MonotonicClock::default())
    }
}

impl Default for PoseEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: JointSource, C: Clock> PoseEngine<S, C> {
    pub fn with_clock(config: PoseConfig, clock: C) -> Self {
        Self {
            config,
            library: PoseLibrary::new(),
            sessions: BTreeMap::new(),
            next_hand_id: 1,
            clock,
        }
    }

    pub fn library(&self) -> &PoseLibrary {
        &self.library
    }

    /// Library write access, for seeding reference poses.
    ///
    /// Appending while a sweep is in flight is safe: new records land
    /// after every cursor and are scored before that sweep completes.
    pub fn library_mut(&mut self) -> &mut PoseLibrary {
        &mut self.library
    }

    // ── Hand registry ─────────────────────────────────────

    /// Start recognizing a newly tracked hand.
    pub fn add_hand(&mut self, source: S) -> HandId {
        let id = HandId(self.next_hand_id);
        self.next_hand_id += 1;
        info!(
            hand_id = id.0,
            handedness = source.handedness().map(|h| h.as_str()).unwrap_or("unknown"),
            "hand registered"
        );
        self.sessions.insert(id, HandSession::new(id, source));
        id
    }

    /// Stop tracking a hand, handing back its joint source.
    pub fn remove_hand(&mut self, id: HandId) -> Option<S> {
        let session = self.sessions.remove(&id)?;
        info!(hand_id = id.0, "hand removed");
        Some(session.into_source())
    }

    pub fn hand(&self, id: HandId) -> Option<&HandSession<S>> {
        self.sessions.get(&id)
    }

    pub fn hand_mut(&mut self, id: HandId) -> Option<&mut HandSession<S>> {
        self.sessions.get_mut(&id)
    }

    fn session(&self, id: HandId) -> Result<&HandSession<S>> {
        self.sessions.get(&id).ok_or(PoseError::UnknownHand(id))
    }

    /// All registered hands in registration order.
    pub fn hands(&self) -> impl Iterator<Item = &HandSession<S>> {
        self.sessions.values()
    }

    pub fn hand_count(&self) -> usize {
        self.sessions.len()
    }

    /// First registered hand currently reporting the given handedness.
    pub fn find_hand(&self, hand: Hand) -> Option<&HandSession<S>> {
        self.sessions.values().find(|s| s.handedness() == Some(hand))
    }

    // ── Per-frame work ────────────────────────────────────

    /// Advance every hand's search and collect the events, hand by hand.
    pub fn update(&mut self) -> Vec<PoseEvent> {
        if !self.config.enabled {
            return Vec::new();
        }

        let mut events = Vec::new();
        for session in self.sessions.values_mut() {
            events.extend(session.tick(&self.library, &self.config, &self.clock));
        }
        if !events.is_empty() {
            debug!(count = events.len(), "pose events emitted");
        }
        events
    }

    // ── Queries ───────────────────────────────────────────

    /// `PoseQuery::is_pose` for a registered hand.
    pub fn is_pose(
        &self,
        id: HandId,
        name: &str,
        threshold_mm: Option<f64>,
    ) -> Result<Option<&MatchResult>> {
        Ok(self.session(id)?.is_pose(name, threshold_mm))
    }

    pub fn results(&self, id: HandId) -> Result<&[MatchResult]> {
        Ok(self.session(id)?.results())
    }

    // ── Recording ─────────────────────────────────────────

    /// Snapshot a hand's live joints and append them to its library half.
    pub fn record_live_pose<I, N>(&mut self, id: HandId, names: I) -> Result<PoseId>
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let session = self.session(id)?;
        let hand = session
            .handedness()
            .ok_or(PoseError::HandednessUnknown(id))?;
        let sample = session.snapshot().ok_or(PoseError::WristUntracked(id))?;

        let pose = self.library.insert(hand, names, sample.into_positions())?;
        if let Some(record) = self.library.get(pose) {
            info!("pose recorded: {}", record.to_sexp());
        }
        Ok(pose)
    }

    /// Generate s-expression for IPC status.
    pub fn status_sexp(&self) -> String {
        let hands: Vec<String> = self.sessions.values().map(|s| s.status_sexp()).collect();
        format!(
            "(:config {} :library {} :hands ({}))",
            self.config.status_sexp(),
            self.library.status_sexp(),
            hands.join(" "),
        )
    }
}

// ── Tests ──────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::matcher::SteppingClock;
    use crate::pose::normalize::JointPositions;
    use crate::pose::skeleton::{HandJoint, JointPose, JOINT_COUNT};

    const IDENTITY: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

    fn test_engine() -> PoseEngine<HandSkeleton, SteppingClock> {
        PoseEngine::with_clock(PoseConfig::default(), SteppingClock::new(0.0))
    }

    fn hand_at(hand: Option<Hand>, entries: &[(HandJoint, [i32; 3])]) -> HandSkeleton {
        let mut skel = HandSkeleton::new(hand);
        skel.set_joint(HandJoint::Wrist, JointPose::tracked([0.3, 1.2, -0.4], IDENTITY));
        for (joint, [x, y, z]) in entries {
            let p = [
                0.3 + *x as f32 / 1000.0,
                1.2 + *y as f32 / 1000.0,
                -0.4 + *z as f32 / 1000.0,
            ];
            skel.set_joint(*joint, JointPose::tracked(p, IDENTITY));
        }
        skel
    }

    fn positions_with(entries: &[(HandJoint, [i32; 3])]) -> JointPositions {
        let mut positions: JointPositions = [None; JOINT_COUNT];
        for (joint, mm) in entries {
            positions[joint.index()] = Some(*mm);
        }
        positions
    }

    #[test]
    fn test_registry_lifecycle() {
        let mut engine = test_engine();
        let a = engine.add_hand(HandSkeleton::new(Some(Hand::Left)));
        let b = engine.add_hand(HandSkeleton::new(Some(Hand::Right)));
        assert_ne!(a, b);
        assert_eq!(engine.hand_count(), 2);
        assert_eq!(engine.find_hand(Hand::Right).unwrap().id(), b);

        let removed = engine.remove_hand(a).unwrap();
        assert_eq!(removed.hand, Some(Hand::Left));
        assert!(engine.hand(a).is_none());
        assert!(engine.remove_hand(a).is_none());
        assert!(engine.find_hand(Hand::Left).is_none());
    }

    #[test]
    fn test_hands_are_independent() {
        let mut engine = test_engine();
        engine
            .library_mut()
            .insert(Hand::Left, ["point"], positions_with(&[(HandJoint::IndexTip, [0, 90, 0])]))
            .unwrap();
        engine
            .library_mut()
            .insert(Hand::Right, ["fist"], positions_with(&[(HandJoint::IndexTip, [10, 20, 0])]))
            .unwrap();

        let left = engine.add_hand(hand_at(Some(Hand::Left), &[(HandJoint::IndexTip, [0, 90, 0])]));
        let right = engine.add_hand(hand_at(Some(Hand::Right), &[(HandJoint::IndexTip, [10, 20, 0])]));

        let events = engine.update();
        let began: Vec<(HandId, String)> = events
            .iter()
            .filter(|e| e.kind() == "began")
            .map(|e| (e.hand(), e.matched().name.clone()))
            .collect();
        assert_eq!(
            began,
            vec![(left, "point".to_string()), (right, "fist".to_string())]
        );
        assert!(engine.is_pose(left, "point", None).unwrap().is_some());
        assert!(engine.is_pose(left, "fist", None).unwrap().is_none());
    }

    #[test]
    fn test_disabled_engine_is_idle() {
        let mut engine = test_engine();
        engine
            .library_mut()
            .insert(Hand::Right, ["fist"], positions_with(&[(HandJoint::IndexTip, [10, 20, 0])]))
            .unwrap();
        let id = engine.add_hand(hand_at(Some(Hand::Right), &[(HandJoint::IndexTip, [10, 20, 0])]));
        engine.config.enabled = false;
        assert!(engine.update().is_empty());
        assert!(engine.results(id).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_hand_errors() {
        let engine = test_engine();
        assert_eq!(
            engine.is_pose(HandId(9), "fist", None),
            Err(PoseError::UnknownHand(HandId(9)))
        );
        assert!(engine.results(HandId(9)).is_err());
    }

    #[test]
    fn test_record_live_pose() {
        let mut engine = test_engine();
        let id = engine.add_hand(hand_at(
            Some(Hand::Right),
            &[(HandJoint::IndexTip, [5, 95, -3]), (HandJoint::MiddleTip, [-15, 40, 2])],
        ));
        let pose = engine.record_live_pose(id, ["point"]).unwrap();
        let record = engine.library().get(pose).unwrap();
        assert_eq!(record.hand(), Hand::Right);
        assert_eq!(record.positions[HandJoint::IndexTip.index()], Some([5, 95, -3]));
        assert_eq!(record.positions[HandJoint::Wrist.index()], Some([0, 0, 0]));
        assert_eq!(record.positions[HandJoint::ThumbTip.index()], None);

        // the freshly recorded pose is found on the next sweep
        let events = engine.update();
        assert!(events.iter().any(|e| e.kind() == "began" && e.matched().name == "point"));
        assert_eq!(engine.is_pose(id, "point", None).unwrap().unwrap().distance, 0);
    }

    #[test]
    fn test_record_live_pose_failures() {
        let mut engine = test_engine();
        let unknown = engine.add_hand(hand_at(None, &[]));
        assert_eq!(
            engine.record_live_pose(unknown, ["x"]),
            Err(PoseError::HandednessUnknown(unknown))
        );
        let untracked = engine.add_hand(HandSkeleton::new(Some(Hand::Left)));
        assert_eq!(
            engine.record_live_pose(untracked, ["x"]),
            Err(PoseError::WristUntracked(untracked))
        );
        assert_eq!(
            engine.record_live_pose(HandId(99), ["x"]),
            Err(PoseError::UnknownHand(HandId(99)))
        );
        assert!(engine.library().is_empty());
    }

    #[test]
    fn test_status_sexp() {
        let mut engine = test_engine();
        engine.add_hand(HandSkeleton::new(Some(Hand::Left)));
        let sexp = engine.status_sexp();
        assert!(sexp.starts_with("(:config (:enabled t"));
        assert!(sexp.contains(":library (:left 0 :right 0)"));
        assert!(sexp.contains(":hands ((:hand-id 1 :handedness :left"));
    }
}
