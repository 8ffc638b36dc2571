// candidate.rs
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tracing::{debug, trace};

use crate::common::*;

/// Where a candidate switch point came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    /// `x[index] + delays[delay]` over the state (or result) history.
    Variable { delay: usize, index: usize },
    /// `forced_x[index] + delays[delay]` over the forced input history.
    ForcedInput { delay: usize, index: usize },
    /// The simulation start, carrying no index information.
    Start,
}

#[derive(Debug, Clone, Copy)]
pub struct CandidateSwitchPoint {
    pub time: f64,
    pub source: CandidateSource,
    seq: u64,
}

// Reversed so that `BinaryHeap` pops the earliest time first. Equal times
// fall back to insertion order.
impl Ord for CandidateSwitchPoint {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for CandidateSwitchPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for CandidateSwitchPoint {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CandidateSwitchPoint {}

/// Discovers candidate switch points and keeps, for each delay, the index of
/// the state (and forced input) switch point in effect at the current time.
///
/// The caller is responsible for validating `start`/`end` against the
/// history and delays before construction.
pub struct CandidateSwitchFinder {
    delays: Vec<f64>,
    end: f64,
    rel_tol: f64,
    abs_tol: f64,
    indices: Vec<usize>,
    forced_indices: Option<Vec<usize>>,
    queue: BinaryHeap<CandidateSwitchPoint>,
    next_seq: u64,
}

impl CandidateSwitchFinder {
    pub fn new(
        delays: &[f64],
        x: &[f64],
        start: f64,
        end: f64,
        forced_x: Option<&[f64]>,
        rel_tol: f64,
        abs_tol: f64,
    ) -> Self {
        let mut finder = Self {
            delays: delays.to_vec(),
            end,
            rel_tol,
            abs_tol,
            indices: vec![0; delays.len()],
            forced_indices: forced_x.map(|_| vec![0; delays.len()]),
            queue: BinaryHeap::new(),
            next_seq: 0,
        };

        for (i, &d) in delays.iter().enumerate() {
            for (j, &t) in x.iter().enumerate() {
                finder.push_if_before_end(t + d, CandidateSource::Variable { delay: i, index: j });
            }
            if let Some(forced_x) = forced_x {
                for (j, &t) in forced_x.iter().enumerate() {
                    finder.push_if_before_end(
                        t + d,
                        CandidateSource::ForcedInput { delay: i, index: j },
                    );
                }
            }
        }

        finder.pop_until_start(start);
        debug!("Processed all CSPs before start.");

        finder.push(start, CandidateSource::Start);
        finder
    }

    /// Current index into the result history for each delay.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Current index into the forced input history for each delay, if any.
    pub fn forced_indices(&self) -> Option<&[usize]> {
        self.forced_indices.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Seeds future candidates from a switch point just appended to the
    /// result history at `variable_state_index`.
    pub fn add_new_times(&mut self, t: f64, variable_state_index: usize) {
        for i in 0..self.delays.len() {
            let new_time = self.delays[i] + t;
            self.push_if_before_end(
                new_time,
                CandidateSource::Variable { delay: i, index: variable_state_index },
            );
        }
    }

    /// Pops every candidate tolerance-equal to the earliest one, updating the
    /// indices for each, and returns the median of the popped times.
    ///
    /// Each queued time is compared against the first popped time, not
    /// against its neighbour.
    pub fn get_next_time(&mut self) -> Option<f64> {
        trace!(queue = ?self.queue, "CSPs");

        let next_time = self.pop_and_update_indices()?;
        let mut times = vec![next_time];

        while let Some(candidate) = self.queue.peek() {
            if !times_equal(candidate.time, next_time, self.rel_tol, self.abs_tol) {
                break;
            }
            times.push(candidate.time);
            self.pop_and_update_indices();
        }

        let next_time = times[times.len() / 2];
        debug!(t = next_time, merged = times.len(), "Next time");
        Some(next_time)
    }

    fn push_if_before_end(&mut self, time: f64, source: CandidateSource) {
        if is_time_before_end(time, self.end, self.rel_tol, self.abs_tol) {
            self.push(time, source);
        }
    }

    fn push(&mut self, time: f64, source: CandidateSource) {
        debug!(t = time, ?source, "Adding CSP");
        self.queue.push(CandidateSwitchPoint { time, source, seq: self.next_seq });
        self.next_seq += 1;
    }

    fn pop_until_start(&mut self, start: f64) {
        while self.queue.peek().is_some_and(|c| c.time < start) {
            self.pop_and_update_indices();
        }
    }

    fn pop_and_update_indices(&mut self) -> Option<f64> {
        let candidate = self.queue.pop()?;
        match candidate.source {
            CandidateSource::Variable { delay, index } => self.indices[delay] = index,
            CandidateSource::ForcedInput { delay, index } => {
                debug_assert!(self.forced_indices.is_some(), "forced CSP without forced inputs");
                if let Some(forced) = self.forced_indices.as_mut() {
                    forced[delay] = index;
                }
            }
            CandidateSource::Start => {}
        }
        Some(candidate.time)
    }
}
