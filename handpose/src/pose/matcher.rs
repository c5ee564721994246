//! Time-budgeted nearest-neighbour search over the pose library.
//!
//! A sweep scores every library record against one frozen
//! `NormalizedPose`. Sweeps may span several ticks: after each record the
//! matcher checks the tick's wall-clock budget and, if it is spent, parks
//! the cursor and resumes from there on the next call to `advance`.
//!
//! Scores are squared Euclidean distances in mm². The root is never
//! taken; ranking only needs the order.

use std::cell::Cell;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use super::library::{PoseId, PoseRecord};
use super::normalize::{normalize, JointPositions, NormalizedPose};
use super::skeleton::{HandJoint, JointSource};

// ── Scoring ────────────────────────────────────────────────

/// Which joint slots contribute to a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMethod {
    /// Every joint slot.
    JointPositions,
    /// Only the five fingertips.
    DigitTips,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JointPositions => "joint-positions",
            Self::DigitTips => "digit-tips",
        }
    }

    pub fn parse(s: &str) -> Option<SearchMethod> {
        match s {
            "joint-positions" => Some(Self::JointPositions),
            "digit-tips" => Some(Self::DigitTips),
            _ => None,
        }
    }

    fn includes(&self, slot: usize) -> bool {
        match self {
            Self::JointPositions => true,
            Self::DigitTips => HandJoint::from_index(slot)
                .map(|j| j.is_fingertip())
                .unwrap_or(false),
        }
    }
}

/// Saturates at `u64::MAX` instead of overflowing on extreme coordinates.
fn squared_offset(a: [i32; 3], b: [i32; 3]) -> u64 {
    a.iter().zip(b.iter()).fold(0u64, |acc, (&pa, &pb)| {
        let d = (i64::from(pa) - i64::from(pb)).unsigned_abs();
        acc.saturating_add(d.saturating_mul(d))
    })
}

/// Squared distance over the slots present on both sides.
///
/// A slot absent from either operand contributes nothing, which lets a
/// reference pose leave out joints it does not care about.
pub fn squared_distance(a: &JointPositions, b: &JointPositions, method: SearchMethod) -> u64 {
    a.iter()
        .zip(b.iter())
        .enumerate()
        .filter(|(slot, _)| method.includes(*slot))
        .filter_map(|(_, (pa, pb))| Some(squared_offset((*pa)?, (*pb)?)))
        .fold(0, u64::saturating_add)
}

// ── Results ────────────────────────────────────────────────

/// One library record scored against the live hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub pose: PoseId,
    pub names: Arc<[String]>,
    /// Squared distance in mm².
    pub distance: u64,
}

impl MatchResult {
    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn primary_name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or("")
    }

    /// Format for IPC.
    pub fn to_sexp(&self) -> String {
        let names: Vec<String> = self
            .names
            .iter()
            .map(|n| format!("\"{}\"", n.replace('\\', "\\\\").replace('"', "\\\"")))
            .collect();
        format!(
            "(:names ({}) :index {} :distance {})",
            names.join(" "),
            self.pose.index,
            self.distance
        )
    }
}

// ── Clock ──────────────────────────────────────────────────

/// Source of wall-clock readings for the search budget.
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin.
    fn now_ms(&self) -> f64;
}

/// Real monotonic time.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Deterministic clock that moves forward by `step_ms` on every reading.
///
/// Used to replay recorded sessions and to force sweeps across ticks.
#[derive(Debug, Clone)]
pub struct SteppingClock {
    now: Cell<f64>,
    step_ms: f64,
}

impl SteppingClock {
    pub fn new(step_ms: f64) -> Self {
        Self {
            now: Cell::new(0.0),
            step_ms,
        }
    }
}

impl Clock for SteppingClock {
    fn now_ms(&self) -> f64 {
        let t = self.now.get();
        self.now.set(t + self.step_ms);
        t
    }
}

// ── Matcher ────────────────────────────────────────────────

/// Counters for tuning the search budget.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub sweeps_completed: u64,
    /// Sweeps abandoned at start (no wrist, unknown hand or empty library).
    pub sweeps_aborted: u64,
    pub records_scored: u64,
    /// Ticks the most recent completed sweep took.
    pub ticks_last_sweep: u32,
    /// Most ticks any completed sweep took.
    pub ticks_max_sweep: u32,
}

impl SearchStats {
    /// Generate s-expression for IPC status.
    pub fn status_sexp(&self) -> String {
        format!(
            "(:sweeps {} :aborted {} :scored {} :ticks-last {} :ticks-max {})",
            self.sweeps_completed,
            self.sweeps_aborted,
            self.records_scored,
            self.ticks_last_sweep,
            self.ticks_max_sweep,
        )
    }
}

/// Outcome of one `Matcher::advance` call.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchProgress {
    /// No sweep could start this tick.
    Aborted,
    /// Budget spent; the sweep resumes at `next_index`.
    Pending { next_index: usize },
    /// Sweep finished; results ranked by ascending distance.
    Complete(Vec<MatchResult>),
}

/// Resumable search state for one hand.
#[derive(Debug, Default)]
pub struct Matcher {
    next_index: usize,
    sample: Option<NormalizedPose>,
    buffer: Vec<MatchResult>,
    ticks_this_sweep: u32,
    stats: SearchStats,
}

impl Matcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Library index the next tick resumes from; 0 between sweeps.
    pub fn cursor(&self) -> usize {
        self.next_index
    }

    pub fn in_progress(&self) -> bool {
        self.sample.is_some()
    }

    /// The sample the current sweep is scoring against.
    pub fn sample(&self) -> Option<&NormalizedPose> {
        self.sample.as_ref()
    }

    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    /// Drop any partial sweep. The next `advance` starts from index 0.
    pub fn reset(&mut self) {
        self.next_index = 0;
        self.sample = None;
        self.buffer.clear();
        self.ticks_this_sweep = 0;
    }

    /// Spend up to `budget_ms` scoring `records` against the hand.
    ///
    /// A fresh sample is taken from `source` only when a sweep starts.
    /// The budget is checked after each record, so one record may run
    /// past it.
    pub fn advance<S: JointSource + ?Sized>(
        &mut self,
        records: &[PoseRecord],
        source: &S,
        method: SearchMethod,
        budget_ms: f64,
        clock: &dyn Clock,
    ) -> SearchProgress {
        let began = clock.now_ms();

        if self.sample.is_none() || self.next_index > records.len() {
            self.reset();
            if records.is_empty() {
                self.stats.sweeps_aborted += 1;
                return SearchProgress::Aborted;
            }
            match normalize(source) {
                Some(sample) => self.sample = Some(sample),
                None => {
                    self.stats.sweeps_aborted += 1;
                    return SearchProgress::Aborted;
                }
            }
        }

        let Some(sample) = self.sample.as_ref() else {
            return SearchProgress::Aborted;
        };
        self.ticks_this_sweep += 1;

        let mut i = self.next_index;
        while i < records.len() {
            let record = &records[i];
            self.buffer.push(MatchResult {
                pose: record.id,
                names: Arc::clone(&record.names),
                distance: squared_distance(&record.positions, sample.positions(), method),
            });
            self.stats.records_scored += 1;
            i += 1;

            if i < records.len() && clock.now_ms() - began > budget_ms {
                self.next_index = i;
                return SearchProgress::Pending { next_index: i };
            }
        }

        // stable: equal distances keep library order
        let mut results = std::mem::take(&mut self.buffer);
        results.sort_by_key(|r| r.distance);

        let ticks = self.ticks_this_sweep;
        self.stats.sweeps_completed += 1;
        self.stats.ticks_last_sweep = ticks;
        self.stats.ticks_max_sweep = self.stats.ticks_max_sweep.max(ticks);
        self.reset();

        debug!(
            records = results.len(),
            ticks,
            top = results.first().map(|r| r.primary_name()).unwrap_or(""),
            "pose sweep complete"
        );
        SearchProgress::Complete(results)
    }
}

// ── Tests ──────────────────────────────────────────────────
