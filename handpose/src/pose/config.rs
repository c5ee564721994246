//! Runtime configuration for pose recognition.

use super::matcher::SearchMethod;

/// Default per-hand slice of a tick the search may use (ms).
pub const DEFAULT_SEARCH_BUDGET_MS: f64 = 6.0;

/// Configuration for the pose engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseConfig {
    /// Enable pose recognition. A disabled engine ticks nothing.
    pub enabled: bool,
    /// Per-hand wall-clock budget for one tick of searching (ms).
    pub search_budget_ms: f64,
    /// Which joint slots contribute to the score.
    pub search_method: SearchMethod,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            search_budget_ms: DEFAULT_SEARCH_BUDGET_MS,
            search_method: SearchMethod::JointPositions,
        }
    }
}

impl PoseConfig {
    /// Set the search budget, ignoring non-positive or non-finite values.
    /// Returns whether the value was accepted.
    pub fn set_search_budget_ms(&mut self, budget_ms: f64) -> bool {
        if budget_ms.is_finite() && budget_ms > 0.0 {
            self.search_budget_ms = budget_ms;
            true
        } else {
            false
        }
    }

    /// Generate s-expression for IPC status.
    pub fn status_sexp(&self) -> String {
        format!(
            "(:enabled {} :search-budget-ms {:.1} :search-method :{})",
            if self.enabled { "t" } else { "nil" },
            self.search_budget_ms,
            self.search_method.as_str(),
        )
    }
}
