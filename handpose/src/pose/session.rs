//! Per-hand recognition session.
//!
//! Owns one hand's joint source, its resumable search and its match
//! state. Sessions share nothing with each other; the engine only hands
//! them the library and the clock for the duration of a tick.

use std::fmt;

use super::config::PoseConfig;
use super::events::{MatchState, PoseEvent};
use super::library::PoseLibrary;
use super::matcher::{Clock, MatchResult, Matcher, SearchProgress, SearchStats};
use super::normalize::{normalize, NormalizedPose};
use super::skeleton::{Hand, HandSkeleton, JointSource};

/// Engine-assigned identifier of a tracked hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandId(pub u64);

impl fmt::Display for HandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read access to a hand's recognition results.
pub trait PoseQuery {
    /// Ranked results of the last completed sweep, best first.
    fn results(&self) -> &[MatchResult];

    fn stats(&self) -> &SearchStats;

    /// Look up a pose by name.
    ///
    /// Without a threshold, only the top result counts. With one, the
    /// best-ranked result carrying `name` whose distance is within
    /// `threshold_mm` millimeters (compared squared) is returned. An
    /// infinite threshold accepts any rank; a negative or NaN one matches
    /// nothing.
    fn is_pose(&self, name: &str, threshold_mm: Option<f64>) -> Option<&MatchResult> {
        let results = self.results();
        match threshold_mm {
            None => results.first().filter(|r| r.has_name(name)),
            Some(t) if t >= 0.0 => {
                let limit = t * t;
                results
                    .iter()
                    .find(|r| r.has_name(name) && r.distance as f64 <= limit)
            }
            Some(_) => None,
        }
    }
}

/// Recognition state for one tracked hand.
#[derive(Debug)]
pub struct HandSession<S = HandSkeleton> {
    id: HandId,
    source: S,
    matcher: Matcher,
    results: Vec<MatchResult>,
    state: MatchState,
    /// Handedness the in-flight sweep was started for.
    searched_hand: Option<Hand>,
}

impl<S: JointSource> HandSession<S> {
    pub fn new(id: HandId, source: S) -> Self {
        Self {
            id,
            source,
            matcher: Matcher::new(),
            results: Vec::new(),
            state: MatchState::default(),
            searched_hand: None,
        }
    }

    pub fn id(&self) -> HandId {
        self.id
    }

    pub fn handedness(&self) -> Option<Hand> {
        self.source.handedness()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Mutable access for the tracking runtime to push new joint data.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn state(&self) -> &MatchState {
        &self.state
    }

    /// Normalize the live joints right now, outside any sweep.
    pub fn snapshot(&self) -> Option<NormalizedPose> {
        normalize(&self.source)
    }

    /// Advance this hand's search by one tick and return any events.
    pub fn tick(
        &mut self,
        library: &PoseLibrary,
        config: &PoseConfig,
        clock: &dyn Clock,
    ) -> Vec<PoseEvent> {
        let hand = self.source.handedness();
        if hand != self.searched_hand {
            self.matcher.reset();
            self.searched_hand = hand;
        }
        let records = hand.map(|h| library.poses(h)).unwrap_or(&[]);

        match self.matcher.advance(
            records,
            &self.source,
            config.search_method,
            config.search_budget_ms,
            clock,
        ) {
            SearchProgress::Complete(results) => {
                let previous = std::mem::replace(&mut self.results, results);
                self.state.observe(self.id, &previous, &self.results)
            }
            SearchProgress::Pending { .. } | SearchProgress::Aborted => Vec::new(),
        }
    }

    /// Generate s-expression for IPC status.
    pub fn status_sexp(&self) -> String {
        format!(
            "(:hand-id {} :handedness {} :top {} :cursor {} :stats {})",
            self.id,
            self.handedness()
                .map(|h| format!(":{}", h.as_str()))
                .unwrap_or_else(|| "nil".to_string()),
            self.state
                .top()
                .map(MatchResult::to_sexp)
                .unwrap_or_else(|| "nil".to_string()),
            self.matcher.cursor(),
            self.matcher.stats().status_sexp(),
        )
    }
}

impl<S: JointSource> PoseQuery for HandSession<S> {
    fn results(&self) -> &[MatchResult] {
        &self.results
    }

    fn stats(&self) -> &SearchStats {
        self.matcher.stats()
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

    fn positions_with(entries: &[(HandJoint, [i32; 3])]) -> JointPositions {
        let mut positions: JointPositions = [None; JOINT_COUNT];
        for (joint, mm) in entries {
            positions[joint.index()] = Some(*mm);
        }
        positions
    }

    fn place(skel: &mut HandSkeleton, entries: &[(HandJoint, [i32; 3])]) {
        skel.set_joint(HandJoint::Wrist, JointPose::tracked([0.0, 1.0, 0.0], IDENTITY));
        for (joint, [x, y, z]) in entries {
            let p = [*x as f32 / 1000.0, 1.0 + *y as f32 / 1000.0, *z as f32 / 1000.0];
            skel.set_joint(*joint, JointPose::tracked(p, IDENTITY));
        }
    }

    fn library() -> PoseLibrary {
        let mut lib = PoseLibrary::new();
        lib.insert(Hand::Right, ["fist"], positions_with(&[(HandJoint::IndexTip, [20, 30, 0])]))
            .unwrap();
        lib.insert(Hand::Right, ["point"], positions_with(&[(HandJoint::IndexTip, [20, 90, 0])]))
            .unwrap();
        lib.insert(Hand::Right, ["peace", "asl-2"], positions_with(&[(HandJoint::IndexTip, [20, 70, 0])]))
            .unwrap();
        lib
    }

    fn session_at(entries: &[(HandJoint, [i32; 3])]) -> HandSession {
        let mut skel = HandSkeleton::new(Some(Hand::Right));
        place(&mut skel, entries);
        HandSession::new(HandId(1), skel)
    }

    #[test]
    fn test_is_pose_before_any_sweep() {
        let session = session_at(&[(HandJoint::IndexTip, [20, 30, 0])]);
        assert!(session.is_pose("fist", None).is_none());
        assert!(session.is_pose("fist", Some(1000.0)).is_none());
        assert!(session.results().is_empty());
    }

    #[test]
    fn test_tick_matches_top() {
        let lib = library();
        let mut session = session_at(&[(HandJoint::IndexTip, [20, 30, 0])]);
        let events = session.tick(&lib, &PoseConfig::default(), &SteppingClock::new(0.0));
        assert_eq!(events.len(), 2);
        let fist = session.is_pose("fist", None).unwrap();
        assert_eq!(fist.distance, 0);
        assert!(session.is_pose("point", None).is_none());
    }

    #[test]
    fn test_is_pose_with_threshold() {
        let lib = library();
        // index tip 10mm above "peace" and 10mm below "point"
        let mut session = session_at(&[(HandJoint::IndexTip, [20, 80, 0])]);
        session.tick(&lib, &PoseConfig::default(), &SteppingClock::new(0.0));
        assert_eq!(session.results()[0].primary_name(), "point");

        // not top, but within 10mm
        let peace = session.is_pose("asl-2", Some(10.0)).unwrap();
        assert_eq!(peace.distance, 100);
        assert!(session.is_pose("peace", Some(9.9)).is_none());
        assert!(session.is_pose("peace", None).is_none());
        assert!(session.is_pose("peace", Some(-1.0)).is_none());
        // fist is 50mm away
        assert!(session.is_pose("fist", Some(50.0)).is_some());
        assert!(session.is_pose("fist", Some(49.0)).is_none());
        // unbounded threshold reaches the last rank
        let fist = session.is_pose("fist", Some(f64::INFINITY)).unwrap();
        assert_eq!(fist.distance, 2500);
        assert!(session.is_pose("fist", Some(f64::NAN)).is_none());
        assert!(session.is_pose("nope", Some(f64::INFINITY)).is_none());
    }

    #[test]
    fn test_stable_pose_no_events() {
        let lib = library();
        let mut session = session_at(&[(HandJoint::IndexTip, [20, 30, 0])]);
        let clock = SteppingClock::new(0.0);
        assert!(!session.tick(&lib, &PoseConfig::default(), &clock).is_empty());
        place(session.source_mut(), &[(HandJoint::IndexTip, [22, 31, 0])]);
        assert!(session.tick(&lib, &PoseConfig::default(), &clock).is_empty());
        assert_eq!(session.results()[0].distance, 5);
    }

    #[test]
    fn test_lost_tracking_keeps_results() {
        let lib = library();
        let mut session = session_at(&[(HandJoint::IndexTip, [20, 30, 0])]);
        let clock = SteppingClock::new(0.0);
        session.tick(&lib, &PoseConfig::default(), &clock);

        session.source_mut().reset();
        for _ in 0..3 {
            assert!(session.tick(&lib, &PoseConfig::default(), &clock).is_empty());
        }
        assert!(session.is_pose("fist", None).is_some());
        assert_eq!(session.stats().sweeps_aborted, 3);
    }

    #[test]
    fn test_unknown_handedness_never_sweeps() {
        let lib = library();
        let mut skel = HandSkeleton::new(None);
        place(&mut skel, &[(HandJoint::IndexTip, [20, 30, 0])]);
        let mut session = HandSession::new(HandId(3), skel);
        assert!(session
            .tick(&lib, &PoseConfig::default(), &SteppingClock::new(0.0))
            .is_empty());
        assert_eq!(session.stats().sweeps_completed, 0);
    }

    #[test]
    fn test_handedness_change_restarts_sweep() {
        let lib = library();
        let mut session = session_at(&[(HandJoint::IndexTip, [20, 30, 0])]);
        let clock = SteppingClock::new(10.0);
        session.tick(&lib, &PoseConfig::default(), &clock);
        assert_eq!(session.matcher().cursor(), 1);

        session.source_mut().hand = Some(Hand::Left);
        // left library is empty: the right-hand sweep is dropped
        session.tick(&lib, &PoseConfig::default(), &clock);
        assert_eq!(session.matcher().cursor(), 0);
        assert!(!session.matcher().in_progress());
    }

    #[test]
    fn test_status_sexp() {
        let session = session_at(&[]);
        let sexp = session.status_sexp();
        assert!(sexp.starts_with("(:hand-id 1 :handedness :right :top nil :cursor 0"));
        assert!(sexp.contains(":stats (:sweeps 0"));
    }
}
