// bde.rs
use std::io::{self, Write};

use tracing::debug;

use crate::candidate::CandidateSwitchFinder;
use crate::common::*;
use crate::output::{format_result, to_plots, PlotData};
use crate::{BdeError, BdeSolution, HistoryKind, SolveBdeOptions, State, Transition};

/// Binary delay equation solver.
///
/// Validates the history at construction; `solve` validates the simulation
/// window and runs the event loop. The result of the last successful solve
/// is kept on the solver.
pub struct BdeSolver {
    func: Transition,
    delays: Vec<f64>,
    x: Vec<f64>,
    y: Vec<State>,
    forced_x: Option<Vec<f64>>,
    forced_y: Option<Vec<State>>,
    width: usize,
    rel_tol: f64,
    abs_tol: f64,
    result: Option<BdeSolution>,
    window: Option<(f64, f64)>,
}

impl BdeSolver {
    pub fn new(
        func: Transition,
        delays: Vec<f64>,
        x: Vec<f64>,
        y: Vec<State>,
        forced_x: Option<Vec<f64>>,
        forced_y: Option<Vec<State>>,
        options: SolveBdeOptions,
    ) -> Result<Self, BdeError> {
        match (&forced_x, &forced_y) {
            (Some(_), None) => {
                return Err(BdeError::ForcedInputMismatch {
                    message: "Must specify forced_y input if specifying forced_x input".into(),
                })
            }
            (None, Some(_)) => {
                return Err(BdeError::ForcedInputMismatch {
                    message: "Must specify forced_x input if specifying forced_y input".into(),
                })
            }
            _ => {}
        }

        let have_forced_inputs = forced_x.is_some();
        if func.is_forced() != have_forced_inputs {
            return Err(BdeError::ForcedInputMismatch {
                message: if have_forced_inputs {
                    "forced inputs were given but the transition function takes only Z".into()
                } else {
                    "the transition function takes Z2 but no forced inputs were given".into()
                },
            });
        }

        validate_tol(options.rel_tol, options.abs_tol)?;
        let width = validate_history(HistoryKind::State, &x, &y)?;
        if let (Some(fx), Some(fy)) = (&forced_x, &forced_y) {
            validate_history(HistoryKind::Forced, fx, fy)?;
        }
        validate_delays(&delays)?;

        Ok(Self {
            func,
            delays,
            x,
            y,
            forced_x,
            forced_y,
            width,
            rel_tol: options.rel_tol,
            abs_tol: options.abs_tol,
            result: None,
            window: None,
        })
    }

    pub fn delays(&self) -> &[f64] {
        &self.delays
    }

    pub fn have_forced_inputs(&self) -> bool {
        self.forced_x.is_some()
    }

    /// Result of the last successful `solve`.
    pub fn result(&self) -> Option<&BdeSolution> {
        self.result.as_ref()
    }

    /// `(start, end)` of the last successful `solve`.
    pub fn window(&self) -> Option<(f64, f64)> {
        self.window
    }

    /// Run the simulation from `start` until `end`.
    ///
    /// Returns the switch point times and states, beginning with the input
    /// history and ending with a switch point at exactly `end`.
    pub fn solve(&mut self, start: f64, end: f64) -> Result<BdeSolution, BdeError> {
        self.validate_window(start, end)?;

        let mut res_x = self.x.clone();
        let mut res_y = self.y.clone();

        let mut finder = CandidateSwitchFinder::new(
            &self.delays,
            &self.x,
            start,
            end,
            self.forced_x.as_deref(),
            self.rel_tol,
            self.abs_tol,
        );

        while let Some(t) = finder.get_next_time() {
            let z: Vec<State> = finder.indices().iter().map(|&i| res_y[i].clone()).collect();

            let new_state = match (&self.func, finder.forced_indices(), &self.forced_y) {
                (Transition::Unforced(f), _, _) => {
                    debug!(t, ?z, "Input to model function");
                    f(&z)
                }
                (Transition::Forced(f), Some(forced_indices), Some(forced_y)) => {
                    let z2: Vec<State> =
                        forced_indices.iter().map(|&i| forced_y[i].clone()).collect();
                    debug!(t, ?z, ?z2, "Input to model function");
                    f(&z, &z2)
                }
                // Construction rejects a forced function without forced inputs.
                (Transition::Forced(_), _, _) => {
                    unreachable!("forced function without forced inputs")
                }
            };
            debug!(t, ?new_state, "New state");

            if new_state.len() != self.width {
                return Err(BdeError::ShapeMismatch {
                    message: format!(
                        "transition function returned {} variables at t = {}, expected {}",
                        new_state.len(),
                        t,
                        self.width
                    ),
                });
            }

            // Keep this state if it has changed. The end of the simulation is
            // recorded once even if unchanged, without seeding new candidates.
            let changed = res_y.last().map_or(true, |last| *last != new_state);
            if changed {
                debug!(t, "State has changed, adding switch point");
                res_x.push(t);
                res_y.push(new_state);
                finder.add_new_times(t, res_x.len() - 1);
            } else if t == end && res_x.last() != Some(&end) {
                debug!(t, "State has not changed, recording end point");
                res_x.push(t);
                res_y.push(new_state);
            } else {
                debug!(t, "State has not changed");
            }
        }

        if let (Some(&last_time), Some(last_state)) = (res_x.last(), res_y.last()) {
            if last_time < end && !times_equal(last_time, end, self.rel_tol, self.abs_tol) {
                let last_state = last_state.clone();
                res_x.push(end);
                res_y.push(last_state);
            }
        }

        let solution = BdeSolution { x: res_x, y: res_y };
        self.result = Some(solution.clone());
        self.window = Some((start, end));
        Ok(solution)
    }

    fn validate_window(&self, start: f64, end: f64) -> Result<(), BdeError> {
        if !(start.is_finite() && end.is_finite()) {
            return Err(BdeError::InvalidWindow {
                message: format!("start ({}) and end ({}) must be finite", start, end),
            });
        }

        let max_delay = max_delay(&self.delays);
        if start < max_delay {
            return Err(BdeError::InvalidWindow {
                message: format!(
                    "start time ({}) must be greater than or equal to the maximum delay ({})",
                    start, max_delay
                ),
            });
        }

        let last_input = self.x[self.x.len() - 1];
        if start <= last_input {
            return Err(BdeError::InvalidWindow {
                message: format!(
                    "start time ({}) must be greater than final input time ({})",
                    start, last_input
                ),
            });
        }

        if start >= end {
            return Err(BdeError::InvalidWindow {
                message: format!("start time ({}) must be less than end time ({})", start, end),
            });
        }
        Ok(())
    }

    /// Writes the last result as one line per interval.
    pub fn print_result<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        match &self.result {
            Some(result) => writer.write_all(format_result(&result.x, &result.y).as_bytes()),
            None => Ok(()),
        }
    }

    /// Plot data of the last result, followed by the forced inputs extended
    /// to the end time when present.
    pub fn result_plots(&self) -> Option<(PlotData, Option<PlotData>)> {
        let result = self.result.as_ref()?;
        let (_, end) = self.window?;
        let forced = self.forced_plots(end);
        Some((to_plots(&result.x, &result.y, None), forced))
    }

    /// Plot data of the inputs: the state history extended to `start` and
    /// the forced inputs extended to `end`.
    pub fn input_plots(&self, start: f64, end: f64) -> (PlotData, Option<PlotData>) {
        (to_plots(&self.x, &self.y, Some(start)), self.forced_plots(end))
    }

    fn forced_plots(&self, end: f64) -> Option<PlotData> {
        match (&self.forced_x, &self.forced_y) {
            (Some(fx), Some(fy)) => Some(to_plots(fx, fy, Some(end))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inverter() -> Transition {
        Transition::unforced(|z: &[State]| vec![!z[0][0]])
    }

    fn oscillator() -> BdeSolver {
        BdeSolver::new(
            inverter(),
            vec![1.0],
            vec![0.0],
            vec![vec![false]],
            None,
            None,
            SolveBdeOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_forced_x_without_forced_y_is_rejected() {
        let result = BdeSolver::new(
            Transition::forced(|_z: &[State], z2: &[State]| z2[0].clone()),
            vec![1.0],
            vec![0.0],
            vec![vec![false]],
            Some(vec![0.0]),
            None,
            SolveBdeOptions::default(),
        );
        match result {
            Err(BdeError::ForcedInputMismatch { message }) => assert!(message.contains("forced_y")),
            other => panic!("Expected forced input mismatch, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_forced_y_without_forced_x_is_rejected() {
        let result = BdeSolver::new(
            inverter(),
            vec![1.0],
            vec![0.0],
            vec![vec![false]],
            None,
            Some(vec![vec![true]]),
            SolveBdeOptions::default(),
        );
        assert!(matches!(result, Err(BdeError::ForcedInputMismatch { .. })));
    }

    #[test]
    fn test_transition_kind_must_match_forced_inputs() {
        let result = BdeSolver::new(
            inverter(),
            vec![1.0],
            vec![0.0],
            vec![vec![false]],
            Some(vec![0.0]),
            Some(vec![vec![true]]),
            SolveBdeOptions::default(),
        );
        assert!(matches!(result, Err(BdeError::ForcedInputMismatch { .. })));

        let result = BdeSolver::new(
            Transition::forced(|z: &[State], _z2: &[State]| z[0].clone()),
            vec![1.0],
            vec![0.0],
            vec![vec![false]],
            None,
            None,
            SolveBdeOptions::default(),
        );
        assert!(matches!(result, Err(BdeError::ForcedInputMismatch { .. })));
    }

    #[test]
    fn test_construction_validates_history() {
        let build = |delays: Vec<f64>, x: Vec<f64>, y: Vec<State>| {
            BdeSolver::new(inverter(), delays, x, y, None, None, SolveBdeOptions::default())
        };

        assert!(matches!(
            build(vec![1.0], vec![0.0, 1.0], vec![vec![false]]),
            Err(BdeError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            build(vec![1.0], vec![0.1], vec![vec![false]]),
            Err(BdeError::HistoryOrigin { history: HistoryKind::State, .. })
        ));
        assert!(matches!(
            build(vec![-1.0], vec![0.0], vec![vec![false]]),
            Err(BdeError::InvalidDelay { .. })
        ));
        assert!(matches!(
            build(vec![1.0], vec![0.0, 1.0], vec![vec![false], vec![true, true]]),
            Err(BdeError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_construction_validates_forced_history() {
        let result = BdeSolver::new(
            Transition::forced(|_z: &[State], z2: &[State]| vec![z2[0][0]]),
            vec![1.0],
            vec![0.0],
            vec![vec![false]],
            Some(vec![1.0]),
            Some(vec![vec![true]]),
            SolveBdeOptions::default(),
        );
        assert!(matches!(
            result,
            Err(BdeError::HistoryOrigin { history: HistoryKind::Forced, .. })
        ));
    }

    #[test]
    fn test_solve_validates_window() {
        let mut solver = oscillator();
        for (start, end) in [(0.5, 5.0), (0.0, 5.0), (2.0, 2.0), (3.0, 1.0), (1.0, f64::NAN)] {
            match solver.solve(start, end) {
                Err(BdeError::InvalidWindow { .. }) => {}
                other => panic!(
                    "Expected invalid window for ({}, {}), got {:?}",
                    start, end, other
                ),
            }
        }
        assert!(solver.result().is_none());
        assert!(solver.window().is_none());
    }

    #[test]
    fn test_window_error_reports_values() {
        let mut solver = BdeSolver::new(
            inverter(),
            vec![1.0],
            vec![0.0, 2.0],
            vec![vec![false], vec![true]],
            None,
            None,
            SolveBdeOptions::default(),
        )
        .unwrap();
        let err = solver.solve(2.0, 5.0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid simulation window: start time (2) must be greater than final input time (2)"
        );
    }

    #[test]
    fn test_solve_persists_result() {
        let mut solver = oscillator();
        let solution = solver.solve(1.0, 5.0).unwrap();
        assert_eq!(solver.result(), Some(&solution));
        assert_eq!(solver.window(), Some((1.0, 5.0)));

        // A second solve starts again from the input history.
        let again = solver.solve(1.0, 3.0).unwrap();
        assert_eq!(again.x, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_end_is_recorded_when_state_unchanged() {
        let func = Transition::unforced(|z: &[State]| vec![z[0][0] || z[1][0]]);
        let mut solver = BdeSolver::new(
            func,
            vec![1.0, 2.0],
            vec![0.0, 1.0],
            vec![vec![false], vec![true]],
            None,
            None,
            SolveBdeOptions::default(),
        )
        .unwrap();

        let solution = solver.solve(2.0, 3.0).unwrap();
        // At 2: Z = [y(1), y(0)] = [T, F] -> T, unchanged from y(1).
        // At 3: Z = [y(1), y(1)] = [T, T] -> T, unchanged, but 3 is the end.
        assert_eq!(solution.x, vec![0.0, 1.0, 3.0]);
        assert_eq!(solution.y, vec![vec![false], vec![true], vec![true]]);
    }

    #[test]
    fn test_two_delay_coincidence_processed_once() {
        let calls = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen = calls.clone();
        let func = Transition::unforced(move |z: &[State]| {
            seen.borrow_mut().push(z.to_vec());
            vec![!(z[0][0] && z[1][0])]
        });

        let mut solver = BdeSolver::new(
            func,
            vec![1.0, 2.0],
            vec![0.0, 1.0],
            vec![vec![true], vec![true]],
            None,
            None,
            SolveBdeOptions::default(),
        )
        .unwrap();
        let solution = solver.solve(2.0, 2.5).unwrap();

        // Only t = 2 is a candidate inside the window; it must be seen once
        // with both delay channels pointing at the right history entries.
        assert_eq!(calls.borrow().len(), 1);
        assert_eq!(calls.borrow()[0], vec![vec![true], vec![true]]);
        assert_eq!(solution.x, vec![0.0, 1.0, 2.0, 2.5]);
        assert_eq!(solution.y.last(), Some(&vec![false]));
    }

    #[test]
    fn test_construction_validates_forced_shape() {
        let build = |forced_x: Vec<f64>, forced_y: Vec<State>| {
            BdeSolver::new(
                Transition::forced(|_z: &[State], z2: &[State]| vec![z2[0][0]]),
                vec![1.0],
                vec![0.0],
                vec![vec![false]],
                Some(forced_x),
                Some(forced_y),
                SolveBdeOptions::default(),
            )
        };

        match build(vec![0.0, 1.0], vec![vec![true]]) {
            Err(BdeError::ShapeMismatch { message }) => assert!(message.contains("forced input")),
            other => panic!("Expected shape mismatch, got {:?}", other.err()),
        }
        match build(vec![0.0, 1.0], vec![vec![true, false], vec![true]]) {
            Err(BdeError::ShapeMismatch { message }) => {
                assert!(message.contains("forced input state 1"))
            }
            other => panic!("Expected shape mismatch, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_zero_delay_terminates_at_end() {
        let calls = std::rc::Rc::new(std::cell::Cell::new(0usize));
        let counter = calls.clone();
        let func = Transition::unforced(move |z: &[State]| {
            counter.set(counter.get() + 1);
            assert!(counter.get() < 100, "solve did not terminate");
            z[1].clone()
        });

        let mut solver = BdeSolver::new(
            func,
            vec![0.0, 1.0],
            vec![0.0, 0.5],
            vec![vec![false], vec![true]],
            None,
            None,
            SolveBdeOptions::default(),
        )
        .unwrap();
        let solution = solver.solve(1.0, 1.5).unwrap();

        // At 1 and 1.5 the delay-1 channel echoes y(0) and y(0.5); each new
        // switch point is re-evaluated once through the zero delay.
        assert_eq!(solution.x, vec![0.0, 0.5, 1.0, 1.5]);
        assert_eq!(
            solution.y,
            vec![vec![false], vec![true], vec![false], vec![true]]
        );
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn test_unchanged_end_point_recorded_once_with_zero_delay() {
        // The end candidate comes from x = 0.5 through the unit delay and
        // leaves the state unchanged.
        let func = Transition::unforced(|z: &[State]| vec![z[0][0] || z[1][0]]);
        let mut solver = BdeSolver::new(
            func,
            vec![0.0, 1.0],
            vec![0.0, 0.5],
            vec![vec![false], vec![true]],
            None,
            None,
            SolveBdeOptions::default(),
        )
        .unwrap();
        let solution = solver.solve(1.0, 1.5).unwrap();

        assert_eq!(solution.x, vec![0.0, 0.5, 1.5]);
        assert_eq!(solution.y, vec![vec![false], vec![true], vec![true]]);
    }

    #[test]
    fn test_wrong_state_width_from_function() {
        let mut solver = BdeSolver::new(
            Transition::unforced(|_z: &[State]| vec![true, true]),
            vec![1.0],
            vec![0.0],
            vec![vec![false]],
            None,
            None,
            SolveBdeOptions::default(),
        )
        .unwrap();
        assert!(matches!(
            solver.solve(1.0, 2.0),
            Err(BdeError::ShapeMismatch { .. })
        ));
        assert!(solver.result().is_none());
    }

    #[test]
    fn test_print_result() {
        let mut solver = oscillator();
        solver.solve(1.0, 3.0).unwrap();

        let mut out = Vec::new();
        solver.print_result(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "    0.00 ->     1.00 : F ",
                "    1.00 ->     2.00 : T ",
                "    2.00 ->     3.00 : F ",
                "    3.00 ->     3.00 : T ",
            ]
        );
    }

    #[test]
    fn test_input_and_result_plots() {
        let mut solver = BdeSolver::new(
            Transition::forced(|_z: &[State], z2: &[State]| vec![z2[0][0]]),
            vec![1.0],
            vec![0.0],
            vec![vec![false]],
            Some(vec![0.0, 2.0]),
            Some(vec![vec![false], vec![true]]),
            SolveBdeOptions::default(),
        )
        .unwrap();

        let (inputs, forced) = solver.input_plots(1.0, 4.0);
        assert_eq!(inputs.x, vec![0.0, 1.0]);
        assert_eq!(inputs.y, vec![vec![0, 0]]);
        let forced = forced.unwrap();
        assert_eq!(forced.x, vec![0.0, 2.0, 2.0, 4.0]);
        assert_eq!(forced.y, vec![vec![0, 0, 1, 1]]);

        assert!(solver.result_plots().is_none());
        solver.solve(1.0, 4.0).unwrap();
        let (result, forced) = solver.result_plots().unwrap();
        assert_eq!(result.x, vec![0.0, 3.0, 3.0, 4.0, 4.0]);
        assert_eq!(result.y, vec![vec![0, 0, 1, 1, 1]]);
        assert!(forced.is_some());
    }
}
