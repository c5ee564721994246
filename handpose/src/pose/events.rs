//! Pose transition events and the per-hand match state machine.
//!
//! A hand is either in `NoMatch` (no sweep has completed yet) or
//! `Matched` on the top record of its last completed sweep. Transitions
//! compare records by `PoseId`, never by name or distance, so a pose that
//! stays on top produces no events however much its score wobbles.

use tracing::debug;

use super::library::PoseId;
use super::matcher::MatchResult;
use super::session::HandId;

// ── Events ─────────────────────────────────────────────────

/// The record and score an event refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoseMatch {
    pub pose: PoseId,
    /// The name this event is about (one event per alias).
    pub name: String,
    /// Squared distance in mm².
    pub distance: u64,
}

/// Events emitted when a hand's top match changes.
#[derive(Debug, Clone, PartialEq)]
pub enum PoseEvent {
    /// A pose name became the top match.
    Began {
        hand: HandId,
        matched: PoseMatch,
        message: String,
    },
    /// A pose name stopped being the top match.
    Ended {
        hand: HandId,
        matched: PoseMatch,
        message: String,
    },
    /// The top record changed. Carries both ranked snapshots.
    Changed {
        hand: HandId,
        matched: PoseMatch,
        previous: Vec<MatchResult>,
        current: Vec<MatchResult>,
        message: String,
    },
}

impl PoseEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Began { .. } => "began",
            Self::Ended { .. } => "ended",
            Self::Changed { .. } => "changed",
        }
    }

    pub fn hand(&self) -> HandId {
        match self {
            Self::Began { hand, .. } | Self::Ended { hand, .. } | Self::Changed { hand, .. } => {
                *hand
            }
        }
    }

    pub fn matched(&self) -> &PoseMatch {
        match self {
            Self::Began { matched, .. }
            | Self::Ended { matched, .. }
            | Self::Changed { matched, .. } => matched,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Began { message, .. }
            | Self::Ended { message, .. }
            | Self::Changed { message, .. } => message,
        }
    }

    /// Format for IPC. Snapshots are summarized by their top entries.
    pub fn to_sexp(&self) -> String {
        let m = self.matched();
        let mut s = format!(
            "(:event :pose-{} :hand-id {} :name \"{}\" :handedness :{} :index {} :distance {}",
            self.kind(),
            self.hand().0,
            escape(&m.name),
            m.pose.hand.as_str(),
            m.pose.index,
            m.distance,
        );
        if let Self::Changed {
            previous, current, ..
        } = self
        {
            s.push_str(&format!(
                " :was {} :is {}",
                previous.first().map(MatchResult::to_sexp).unwrap_or_else(|| "nil".into()),
                current.first().map(MatchResult::to_sexp).unwrap_or_else(|| "nil".into()),
            ));
        }
        s.push_str(&format!(" :message \"{}\")", escape(self.message())));
        s
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn names_list(result: &MatchResult) -> String {
    let quoted: Vec<String> = result.names.iter().map(|n| format!("\"{n}\"")).collect();
    format!("[{}]", quoted.join(", "))
}

// ── State machine ──────────────────────────────────────────

/// Top-match state of one hand.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum MatchState {
    #[default]
    NoMatch,
    Matched(MatchResult),
}

impl MatchState {
    /// Record the hand is currently matched on, if any.
    pub fn top(&self) -> Option<&MatchResult> {
        match self {
            Self::NoMatch => None,
            Self::Matched(result) => Some(result),
        }
    }

    /// Feed a completed sweep and return the transition events.
    ///
    /// `previous` is the ranking from the sweep before `current`. Events
    /// come out as: one `Ended` per old name, one `Changed`, one `Began`
    /// per new name. The state moves only after all are built.
    pub fn observe(
        &mut self,
        hand: HandId,
        previous: &[MatchResult],
        current: &[MatchResult],
    ) -> Vec<PoseEvent> {
        let Some(top) = current.first() else {
            return Vec::new();
        };
        let old = self.top();
        if old.map(|o| o.pose) == Some(top.pose) {
            return Vec::new();
        }

        let side = top.pose.hand.as_str();
        let mut events = Vec::new();

        if let Some(old) = old {
            for name in old.names.iter() {
                events.push(PoseEvent::Ended {
                    hand,
                    matched: PoseMatch {
                        pose: old.pose,
                        name: name.clone(),
                        distance: old.distance,
                    },
                    message: format!(
                        "{} hand ended pose \"{}\" (last squared distance {} mm²).",
                        old.pose.hand.as_str(),
                        name,
                        old.distance
                    ),
                });
            }
        }

        events.push(PoseEvent::Changed {
            hand,
            matched: PoseMatch {
                pose: top.pose,
                name: top.primary_name().to_string(),
                distance: top.distance,
            },
            previous: previous.to_vec(),
            current: current.to_vec(),
            message: format!(
                "{} hand pose changed from {} to {}.",
                side,
                old.map(names_list).unwrap_or_else(|| "nothing".to_string()),
                names_list(top),
            ),
        });

        for name in top.names.iter() {
            events.push(PoseEvent::Began {
                hand,
                matched: PoseMatch {
                    pose: top.pose,
                    name: name.clone(),
                    distance: top.distance,
                },
                message: format!(
                    "{} hand began pose \"{}\" at a squared distance of {} mm².",
                    side, name, top.distance
                ),
            });
        }

        debug!(
            hand = hand.0,
            from = old.map(|o| o.primary_name()).unwrap_or("none"),
            to = top.primary_name(),
            "pose transition"
        );
        *self = Self::Matched(top.clone());
        events
    }
}

// ── Tests ──────────────────────────────────────────────────
