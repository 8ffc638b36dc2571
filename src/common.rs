// common.rs
use crate::{BdeError, HistoryKind, State};

pub const DEFAULT_REL_TOL: f64 = 1e-9;
pub const DEFAULT_ABS_TOL: f64 = 0.0;

/// Symmetric relative + absolute closeness test used for every time comparison.
///
/// Two times are equal iff `|t1 - t2| <= max(rel_tol * max(|t1|, |t2|), abs_tol)`.
#[inline]
pub fn times_equal(t1: f64, t2: f64, rel_tol: f64, abs_tol: f64) -> bool {
    if t1 == t2 {
        return true;
    }
    let diff = (t1 - t2).abs();
    diff <= (rel_tol * t1.abs().max(t2.abs())).max(abs_tol)
}

/// True if `t` is before `end` or equal to it within tolerance.
#[inline]
pub fn is_time_before_end(t: f64, end: f64, rel_tol: f64, abs_tol: f64) -> bool {
    t < end || times_equal(t, end, rel_tol, abs_tol)
}

pub fn validate_tol(rel_tol: f64, abs_tol: f64) -> Result<(), BdeError> {
    if !(rel_tol >= 0.0 && rel_tol.is_finite() && abs_tol >= 0.0 && abs_tol.is_finite()) {
        return Err(BdeError::InvalidTolerance { rel_tol, abs_tol });
    }
    Ok(())
}

pub fn max_delay(delays: &[f64]) -> f64 {
    delays.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

pub fn validate_delays(delays: &[f64]) -> Result<(), BdeError> {
    if delays.is_empty() {
        return Err(BdeError::InvalidDelay {
            message: "at least one delay is required".to_string(),
        });
    }
    for (i, &d) in delays.iter().enumerate() {
        if !(d >= 0.0 && d.is_finite()) {
            return Err(BdeError::InvalidDelay {
                message: format!("delay {} is {}, all delays must be finite and >= 0", i, d),
            });
        }
    }
    Ok(())
}

/// Checks one switch point history and returns its state width.
pub fn validate_history(kind: HistoryKind, x: &[f64], y: &[State]) -> Result<usize, BdeError> {
    if x.len() != y.len() {
        return Err(BdeError::ShapeMismatch {
            message: format!(
                "{} times ({}) and states ({}) must be the same length",
                kind,
                x.len(),
                y.len()
            ),
        });
    }
    if x.is_empty() {
        return Err(BdeError::ShapeMismatch {
            message: format!("{} history must contain at least one switch point", kind),
        });
    }
    if x[0] != 0.0 {
        return Err(BdeError::HistoryOrigin { history: kind, first: x[0] });
    }
    for (i, pair) in x.windows(2).enumerate() {
        if !(pair[1] > pair[0] && pair[1].is_finite()) {
            return Err(BdeError::UnorderedHistory {
                history: kind,
                index: i + 1,
                previous: pair[0],
                time: pair[1],
            });
        }
    }

    let width = y[0].len();
    if let Some((i, s)) = y.iter().enumerate().find(|(_, s)| s.len() != width) {
        return Err(BdeError::ShapeMismatch {
            message: format!(
                "{} state {} has {} variables, expected {}",
                kind,
                i,
                s.len(),
                width
            ),
        });
    }
    Ok(width)
}
