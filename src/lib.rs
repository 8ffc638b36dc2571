// lib.rs
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod bde;
pub mod candidate;
pub mod common;
pub mod output;

pub use bde::BdeSolver;
pub use candidate::{CandidateSource, CandidateSwitchFinder, CandidateSwitchPoint};
pub use output::{PiecewiseOutput, PlotData};

use common::*;

/// Which history an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    State,
    Forced,
}

impl fmt::Display for HistoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryKind::State => write!(f, "state"),
            HistoryKind::Forced => write!(f, "forced input"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BdeError {
    #[error("Shape mismatch: {message}")]
    ShapeMismatch { message: String },

    #[error("First {history} switch time must be 0, got {first}")]
    HistoryOrigin { history: HistoryKind, first: f64 },

    #[error("Invalid delay: {message}")]
    InvalidDelay { message: String },

    #[error("Forced input mismatch: {message}")]
    ForcedInputMismatch { message: String },

    #[error("Invalid simulation window: {message}")]
    InvalidWindow { message: String },

    #[error("Tolerances must be finite and >= 0 (rel_tol = {rel_tol}, abs_tol = {abs_tol})")]
    InvalidTolerance { rel_tol: f64, abs_tol: f64 },

    #[error(
        "{history} switch times must be finite and strictly increasing: \
         time {index} is {time} after {previous}"
    )]
    UnorderedHistory {
        history: HistoryKind,
        index: usize,
        previous: f64,
        time: f64,
    },
}

/// Values of the boolean variables at one switch point.
pub type State = Vec<bool>;

/// `f(Z)` where `Z[i][v]` is variable `v` delayed by `delays[i]`.
pub type UnforcedFunction = Box<dyn Fn(&[State]) -> State>;

/// `f(Z, Z2)` where `Z2[i][v]` is forced input `v` delayed by `delays[i]`.
pub type ForcedFunction = Box<dyn Fn(&[State], &[State]) -> State>;

pub enum Transition {
    Unforced(UnforcedFunction),
    Forced(ForcedFunction),
}

impl Transition {
    pub fn unforced(f: impl Fn(&[State]) -> State + 'static) -> Self {
        Transition::Unforced(Box::new(f))
    }

    pub fn forced(f: impl Fn(&[State], &[State]) -> State + 'static) -> Self {
        Transition::Forced(Box::new(f))
    }

    pub fn is_forced(&self) -> bool {
        matches!(self, Transition::Forced(_))
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Unforced(_) => f.write_str("Transition::Unforced(..)"),
            Transition::Forced(_) => f.write_str("Transition::Forced(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveBdeOptions {
    pub rel_tol: f64,
    pub abs_tol: f64,
}

impl Default for SolveBdeOptions {
    fn default() -> Self {
        Self {
            rel_tol: DEFAULT_REL_TOL,
            abs_tol: DEFAULT_ABS_TOL,
        }
    }
}

/// Switch point history produced by a solve: the input history followed by
/// the computed switch points, always ending at the end time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BdeSolution {
    pub x: Vec<f64>,
    pub y: Vec<State>,
}

impl BdeSolution {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn final_time(&self) -> Option<f64> {
        self.x.last().copied()
    }

    /// Iterate over `(time, state)` switch points.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &[bool])> + '_ {
        self.x.iter().copied().zip(self.y.iter().map(Vec::as_slice))
    }
}

/// Builds a solver for the given history and runs it over `[t0, t1]`.
///
/// `forced` holds the forced input switch times and states, and must be
/// present exactly when `func` is a [`Transition::Forced`].
#[allow(clippy::too_many_arguments)]
pub fn solve_bde(
    func: Transition,
    delays: Vec<f64>,
    x: Vec<f64>,
    y: Vec<State>,
    forced: Option<(Vec<f64>, Vec<State>)>,
    t0: f64,
    t1: f64,
    options: Option<SolveBdeOptions>,
) -> Result<BdeSolution, BdeError> {
    let opts = options.unwrap_or_default();
    let (forced_x, forced_y) = match forced {
        Some((fx, fy)) => (Some(fx), Some(fy)),
        None => (None, None),
    };

    let mut solver = BdeSolver::new(func, delays, x, y, forced_x, forced_y, opts)?;
    solver.solve(t0, t1)
}
