//! Reconciliation primitives.
//!
//! This library provides helpers for comparing declared state against what
//! the host actually has. Key concepts:
//!
//! - **Desired state**: What the registry says should exist.
//! - **Observed state**: What the operating system reports.
//! - **Drift**: The difference between the two, if any.
//!
//! # Invariants
//!
//! - Classification is deterministic given the same inputs
//! - Classification never touches the host; repair is the caller's decision

use serde::Serialize;

/// Convergence status for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    /// Resource has converged (observed matches desired).
    Converged,

    /// Resource was repaired during this pass.
    Converging,

    /// Resource has diverged (requires intervention).
    Diverged,

    /// Resource could not be observed or repaired.
    Failed,
}

impl ConvergenceStatus {
    /// Returns true if the resource has converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }

    /// Returns true if the resource was repaired this pass.
    pub fn is_converging(&self) -> bool {
        matches!(self, Self::Converging)
    }

    /// Returns true if the pass failed for this resource.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl std::fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Converged => "converged",
            Self::Converging => "converging",
            Self::Diverged => "diverged",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Field-by-field comparison between a desired and an observed value.
pub trait Diff {
    /// Names of the fields where `observed` differs from `self`.
    fn diverging_fields(&self, observed: &Self) -> Vec<&'static str>;
}

/// Difference between desired and observed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Drift {
    /// Observed state matches desired state.
    InSync,

    /// Nothing was observed.
    Missing,

    /// Observed state exists but differs.
    Diverged { fields: Vec<&'static str> },

    /// Observed state could not be read.
    Unknown,
}

impl Drift {
    /// Classify observed state against desired state.
    pub fn classify<T: Diff>(desired: &T, observed: Option<&T>) -> Self {
        let Some(observed) = observed else {
            return Self::Missing;
        };

        let fields = desired.diverging_fields(observed);
        if fields.is_empty() {
            Self::InSync
        } else {
            Self::Diverged { fields }
        }
    }

    /// Returns true if there is no drift.
    pub fn is_in_sync(&self) -> bool {
        matches!(self, Self::InSync)
    }
}

impl std::fmt::Display for Drift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InSync => f.write_str("in sync"),
            Self::Missing => f.write_str("missing"),
            Self::Diverged { fields } => write!(f, "diverged ({})", fields.join(", ")),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// How a reconciliation pass treats drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileMode {
    /// Only classify drift.
    #[default]
    Report,

    /// Classify drift and converge the resource.
    Repair,
}

/// Action taken for a resource during a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    /// Nothing was changed.
    None,

    /// The resource was missing and has been created.
    Created,

    /// The resource diverged and has been recreated.
    Recreated,
}

impl ReconcileAction {
    /// Action needed to repair the given drift.
    pub fn for_drift(drift: &Drift) -> Self {
        match drift {
            Drift::InSync | Drift::Unknown => Self::None,
            Drift::Missing => Self::Created,
            Drift::Diverged { .. } => Self::Recreated,
        }
    }
}

/// Result of reconciling one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    /// Drift found before any action.
    pub drift: Drift,

    /// Action taken.
    pub action: ReconcileAction,

    /// Why observing or repairing the resource failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReconcileOutcome {
    /// Outcome of a report-only pass.
    pub fn reported(drift: Drift) -> Self {
        Self {
            drift,
            action: ReconcileAction::None,
            error: None,
        }
    }

    /// Outcome of a pass that repaired the given drift.
    pub fn repaired(drift: Drift) -> Self {
        let action = ReconcileAction::for_drift(&drift);
        Self {
            drift,
            action,
            error: None,
        }
    }

    /// Outcome of a pass that could not observe or repair the resource.
    pub fn failed(drift: Drift, error: impl std::fmt::Display) -> Self {
        Self {
            drift,
            action: ReconcileAction::None,
            error: Some(error.to_string()),
        }
    }

    /// Convergence status after this pass.
    pub fn status(&self) -> ConvergenceStatus {
        if self.error.is_some() {
            return ConvergenceStatus::Failed;
        }
        match (&self.drift, self.action) {
            (Drift::InSync, _) => ConvergenceStatus::Converged,
            (_, ReconcileAction::None) => ConvergenceStatus::Diverged,
            _ => ConvergenceStatus::Converging,
        }
    }
}
