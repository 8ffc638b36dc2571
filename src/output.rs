// output.rs
use serde::Serialize;

use crate::{BdeSolution, State};

/// Evaluation of a piecewise-constant switch point signal.
pub trait PiecewiseOutput {
    /// State in effect at `t`, or `None` before the first switch point.
    fn call(&self, t: f64) -> Option<&[bool]>;
    fn t_min(&self) -> f64;
    fn t_max(&self) -> f64;
}

impl PiecewiseOutput for BdeSolution {
    fn call(&self, t: f64) -> Option<&[bool]> {
        // Index of the last switch point at or before t.
        let n = self.x.partition_point(|&xi| xi <= t);
        if n == 0 {
            return None;
        }
        self.y.get(n - 1).map(Vec::as_slice)
    }

    fn t_min(&self) -> f64 {
        self.x.first().copied().unwrap_or(f64::NAN)
    }

    fn t_max(&self) -> f64 {
        self.x.last().copied().unwrap_or(f64::NAN)
    }
}

/// Step-plot data: each switch drawn as two points at the same time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotData {
    pub x: Vec<f64>,
    /// One 0/1 series per variable.
    pub y: Vec<Vec<u8>>,
}

/// Converts switch points into step-plot data, optionally holding the final
/// state until `end_time`.
///
/// One series is produced per variable of the first state; a variable
/// missing from a shorter state plots as 0.
pub fn to_plots(x: &[f64], y: &[State], end_time: Option<f64>) -> PlotData {
    let mut plot_x = Vec::with_capacity(2 * x.len() + 1);
    if let Some(&first) = x.first() {
        plot_x.push(first);
    }
    for &xi in x.iter().skip(1) {
        plot_x.push(xi);
        plot_x.push(xi);
    }
    if let Some(end) = end_time {
        plot_x.push(end);
    }

    let width = y.first().map_or(0, Vec::len);
    let plot_y = (0..width)
        .map(|v| {
            let mut series = Vec::with_capacity(plot_x.len());
            for state in &y[..y.len() - 1] {
                let value = bit(state, v);
                series.push(value);
                series.push(value);
            }
            let last = bit(&y[y.len() - 1], v);
            series.push(last);
            if end_time.is_some() {
                series.push(last);
            }
            series
        })
        .collect();

    PlotData { x: plot_x, y: plot_y }
}

fn bit(state: &[bool], v: usize) -> u8 {
    state.get(v).map_or(0, |&b| b as u8)
}

/// `1`/`0` style values to booleans; anything above zero is true.
pub fn to_logical(values: &[i64]) -> Vec<bool> {
    values.iter().map(|&v| v > 0).collect()
}

pub fn boolean_list_to_string(values: &[bool]) -> String {
    values.iter().map(|&b| if b { "T " } else { "F " }).collect()
}

/// One line per interval between switch points, plus the final switch point
/// as a zero-length interval when it is distinct from the one before.
pub fn format_result(x: &[f64], y: &[State]) -> String {
    let mut out = String::new();
    let n = x.len().min(y.len());
    if n == 0 {
        return out;
    }

    for i in 0..n - 1 {
        out.push_str(&format_interval(x[i], x[i + 1], &y[i]));
    }
    if n == 1 || x[n - 2] != x[n - 1] {
        out.push_str(&format_interval(x[n - 1], x[n - 1], &y[n - 1]));
    }
    out
}

fn format_interval(from: f64, to: f64, state: &[bool]) -> String {
    format!("{:8.2} -> {:8.2} : {}\n", from, to, boolean_list_to_string(state))
}
