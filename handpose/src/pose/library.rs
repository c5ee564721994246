//! Pose library: named reference poses, partitioned by handedness.
//!
//! Records are append-only. A record's slot order matches `HandJoint`,
//! and absent slots mean "this joint does not matter for this pose".

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use super::matcher::{squared_distance, SearchMethod};
use super::normalize::JointPositions;
use super::skeleton::{Hand, HandJoint};
use crate::error::{PoseError, Result};

/// Stable handle to a library record.
///
/// The library never removes or reorders records, so the position within
/// a handedness partition identifies a record for the library's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoseId {
    pub hand: Hand,
    pub index: usize,
}

/// A named reference pose.
#[derive(Debug, Clone)]
pub struct PoseRecord {
    pub id: PoseId,
    /// Aliases; every name denotes the same record.
    pub names: Arc<[String]>,
    pub positions: JointPositions,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_ms: u64,
}

impl PoseRecord {
    pub fn hand(&self) -> Hand {
        self.id.hand
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// First name, used as the record's display name.
    pub fn primary_name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or("")
    }

    /// Serialize as an s-expression that `pose-define` accepts back.
    pub fn to_sexp(&self) -> String {
        let names: Vec<String> = self
            .names
            .iter()
            .map(|n| format!("\"{}\"", n.replace('\\', "\\\\").replace('"', "\\\"")))
            .collect();
        let mut positions = String::new();
        for joint in HandJoint::ALL {
            if let Some([x, y, z]) = self.positions[joint.index()] {
                if !positions.is_empty() {
                    positions.push(' ');
                }
                positions.push_str(&format!("(:joint \"{}\" :mm ({} {} {}))", joint.as_str(), x, y, z));
            }
        }
        format!(
            "(:names ({}) :handedness :{} :index {} :created {} :positions ({}))",
            names.join(" "),
            self.hand().as_str(),
            self.id.index,
            self.created_ms,
            positions,
        )
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Reference poses for both hands.
#[derive(Debug, Default)]
pub struct PoseLibrary {
    left: Vec<PoseRecord>,
    right: Vec<PoseRecord>,
}

impl PoseLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records for a hand, in insertion order.
    pub fn poses(&self, hand: Hand) -> &[PoseRecord] {
        match hand {
            Hand::Left => &self.left,
            Hand::Right => &self.right,
        }
    }

    fn poses_mut(&mut self, hand: Hand) -> &mut Vec<PoseRecord> {
        match hand {
            Hand::Left => &mut self.left,
            Hand::Right => &mut self.right,
        }
    }

    pub fn len(&self, hand: Hand) -> usize {
        self.poses(hand).len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty() && self.right.is_empty()
    }

    pub fn get(&self, id: PoseId) -> Option<&PoseRecord> {
        self.poses(id.hand).get(id.index)
    }

    /// Append a record. Blank names are dropped; at least one must remain.
    pub fn insert<I, S>(&mut self, hand: Hand, names: I, positions: JointPositions) -> Result<PoseId>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names
            .into_iter()
            .map(Into::into)
            .filter(|n| !n.trim().is_empty())
            .collect();
        if names.is_empty() {
            return Err(PoseError::NoNames);
        }
        if positions.iter().all(Option::is_none) {
            warn!(
                "pose {:?} ({}) has no joint positions and will match everything",
                names,
                hand.as_str()
            );
        }

        let records = self.poses_mut(hand);
        let id = PoseId {
            hand,
            index: records.len(),
        };
        records.push(PoseRecord {
            id,
            names: names.into(),
            positions,
            created_ms: now_ms(),
        });
        debug!(hand = hand.as_str(), index = id.index, "pose added to library");
        Ok(id)
    }

    /// First record for a hand carrying `name`.
    pub fn find(&self, hand: Hand, name: &str) -> Option<&PoseRecord> {
        self.poses(hand).iter().find(|p| p.has_name(name))
    }

    fn find_or_err(&self, hand: Hand, name: &str) -> Result<&PoseRecord> {
        self.find(hand, name)
            .ok_or_else(|| PoseError::UnknownPose(name.to_string()))
    }

    /// Squared distance between two named records of the same hand.
    pub fn compare(&self, hand: Hand, a: &str, b: &str) -> Result<u64> {
        let pa = self.find_or_err(hand, a)?;
        let pb = self.find_or_err(hand, b)?;
        Ok(squared_distance(
            &pa.positions,
            &pb.positions,
            SearchMethod::JointPositions,
        ))
    }

    /// Every record of a hand ranked by its distance to the named record.
    pub fn compare_all_to(&self, hand: Hand, name: &str) -> Result<Vec<(PoseId, u64)>> {
        let reference = self.find_or_err(hand, name)?;
        let mut ranked: Vec<(PoseId, u64)> = self
            .poses(hand)
            .iter()
            .map(|p| {
                let d = squared_distance(
                    &reference.positions,
                    &p.positions,
                    SearchMethod::JointPositions,
                );
                (p.id, d)
            })
            .collect();
        ranked.sort_by_key(|&(_, d)| d);
        Ok(ranked)
    }

    /// Generate s-expression for IPC status.
    pub fn status_sexp(&self) -> String {
        format!("(:left {} :right {})", self.left.len(), self.right.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::skeleton::JOINT_COUNT;

    fn positions_with(entries: &[(HandJoint, [i32; 3])]) -> JointPositions {
        let mut positions: JointPositions = [None; JOINT_COUNT];
        for (joint, mm) in entries {
            positions[joint.index()] = Some(*mm);
        }
        positions
    }

    #[test]
    fn test_insert_preserves_order() {
        let mut lib = PoseLibrary::new();
        let a = lib
            .insert(Hand::Right, ["fist"], positions_with(&[(HandJoint::IndexTip, [0, 10, 0])]))
            .unwrap();
        let b = lib
            .insert(Hand::Right, ["peace", "asl-2"], positions_with(&[(HandJoint::IndexTip, [0, 90, 0])]))
            .unwrap();
        assert_eq!(a.index, 0);
        assert_eq!(b.index, 1);
        assert_eq!(lib.len(Hand::Right), 2);
        assert_eq!(lib.len(Hand::Left), 0);
        assert_eq!(lib.poses(Hand::Right)[1].primary_name(), "peace");
        assert!(lib.get(b).unwrap().has_name("asl-2"));
    }

    #[test]
    fn test_partitions_are_independent() {
        let mut lib = PoseLibrary::new();
        let l = lib.insert(Hand::Left, ["fist"], positions_with(&[])).unwrap();
        let r = lib.insert(Hand::Right, ["fist"], positions_with(&[])).unwrap();
        assert_ne!(l, r);
        assert_eq!(l.index, r.index);
        assert_eq!(lib.find(Hand::Left, "fist").unwrap().id, l);
        assert_eq!(lib.find(Hand::Right, "fist").unwrap().id, r);
    }

    #[test]
    fn test_insert_requires_name() {
        let mut lib = PoseLibrary::new();
        let none: [&str; 0] = [];
        assert_eq!(
            lib.insert(Hand::Left, none, positions_with(&[])),
            Err(PoseError::NoNames)
        );
        assert_eq!(
            lib.insert(Hand::Left, ["  "], positions_with(&[])),
            Err(PoseError::NoNames)
        );
        assert!(lib.is_empty());
    }

    #[test]
    fn test_all_absent_record_accepted() {
        let mut lib = PoseLibrary::new();
        assert!(lib.insert(Hand::Left, ["blank"], positions_with(&[])).is_ok());
        assert_eq!(lib.len(Hand::Left), 1);
    }

    #[test]
    fn test_compare() {
        let mut lib = PoseLibrary::new();
        lib.insert(Hand::Right, ["a"], positions_with(&[(HandJoint::IndexTip, [0, 0, 10])]))
            .unwrap();
        lib.insert(
            Hand::Right,
            ["b"],
            positions_with(&[(HandJoint::IndexTip, [3, 4, 10]), (HandJoint::ThumbTip, [9, 9, 9])]),
        )
        .unwrap();
        assert_eq!(lib.compare(Hand::Right, "a", "b"), Ok(25));
        assert_eq!(
            lib.compare(Hand::Right, "a", "zzz"),
            Err(PoseError::UnknownPose("zzz".to_string()))
        );
    }

    #[test]
    fn test_compare_all_to() {
        let mut lib = PoseLibrary::new();
        lib.insert(Hand::Left, ["far"], positions_with(&[(HandJoint::ThumbTip, [100, 0, 0])]))
            .unwrap();
        lib.insert(Hand::Left, ["ref"], positions_with(&[(HandJoint::ThumbTip, [0, 0, 0])]))
            .unwrap();
        lib.insert(Hand::Left, ["near"], positions_with(&[(HandJoint::ThumbTip, [1, 0, 0])]))
            .unwrap();
        let ranked = lib.compare_all_to(Hand::Left, "ref").unwrap();
        let order: Vec<usize> = ranked.iter().map(|(id, _)| id.index).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert_eq!(ranked[2].1, 10_000);
    }

    #[test]
    fn test_record_sexp() {
        let mut lib = PoseLibrary::new();
        let id = lib
            .insert(Hand::Right, ["peace"], positions_with(&[(HandJoint::IndexTip, [1, -2, 3])]))
            .unwrap();
        let sexp = lib.get(id).unwrap().to_sexp();
        assert!(sexp.starts_with("(:names (\"peace\") :handedness :right :index 0"));
        assert!(sexp.contains("(:joint \"index-tip\" :mm (1 -2 3))"));
        assert!(!sexp.contains("thumb-tip"));
    }

    #[test]
    fn test_status_sexp() {
        let mut lib = PoseLibrary::new();
        lib.insert(Hand::Right, ["x"], positions_with(&[])).unwrap();
        assert_eq!(lib.status_sexp(), "(:left 0 :right 1)");
    }
}
