//! A solver that enumerates every assignment of the variables.

use std::fmt::{self, Debug};

use delegate::delegate;
use tracing::{debug, warn};

use crate::{
	helpers::approx_eq,
	ilp::{IlpVar, RowId, ZeroOneIlpProblem},
	solver::{IlpSolver, SearchStatistics, SolverConfig, TermSignal, TerminateCallback},
};

/// Solver that finds an optimal solution by checking all `2ⁿ` assignments of
/// the variables. When several assignments are optimal, the first one in
/// enumeration order is returned.
///
/// Problems with more than [`ExhaustiveSolver::MAX_VARIABLES`] variables are
/// rejected.
pub struct ExhaustiveSolver {
	/// The problem to solve.
	problem: ZeroOneIlpProblem,
	/// The configuration of the search.
	config: SolverConfig,
	/// Callback used to check whether the enumeration should be stopped.
	terminate: Option<TerminateCallback>,
	/// The best solution found, if any.
	solution: Option<Vec<bool>>,
	/// The objective value of `solution`.
	objective_value: f64,
	/// Statistics of the last enumeration.
	statistics: SearchStatistics,
}

impl ExhaustiveSolver {
	/// The largest number of variables for which the solver will attempt to
	/// enumerate all assignments.
	pub const MAX_VARIABLES: usize = 24;

	/// Create a new solver for the given problem.
	pub fn with_problem(problem: ZeroOneIlpProblem, config: SolverConfig) -> Self {
		Self {
			problem,
			config,
			terminate: None,
			solution: None,
			objective_value: f64::INFINITY,
			statistics: SearchStatistics::default(),
		}
	}
}

impl Debug for ExhaustiveSolver {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ExhaustiveSolver")
			.field("problem", &self.problem)
			.field("config", &self.config)
			.field("solution", &self.solution)
			.field("objective_value", &self.objective_value)
			.finish_non_exhaustive()
	}
}

impl Default for ExhaustiveSolver {
	fn default() -> Self {
		Self::with_problem(ZeroOneIlpProblem::default(), SolverConfig::default())
	}
}

impl IlpSolver for ExhaustiveSolver {
	delegate! {
		to self.problem {
			fn add_boolean_variable(&mut self, objective: f64) -> IlpVar;
			fn add_discrete_variable(&mut self, objective: &[f64]) -> Vec<IlpVar>;
			fn add_equality_constraint(&mut self, terms: Vec<(IlpVar, f64)>, bound: f64) -> RowId;
			fn add_greater_than_constraint(&mut self, terms: Vec<(IlpVar, f64)>, bound: f64) -> RowId;
			fn add_less_than_constraint(&mut self, terms: Vec<(IlpVar, f64)>, bound: f64) -> RowId;
			fn set_maximize(&mut self, maximize: bool);
		}
	}

	fn boolean_value(&self, var: IlpVar) -> bool {
		self.solution
			.as_ref()
			.is_some_and(|sol| sol[var.index()])
	}

	fn is_solved(&self) -> bool {
		self.solution.is_some()
	}

	fn objective_value(&self) -> f64 {
		self.objective_value
	}

	fn problem(&self) -> &ZeroOneIlpProblem {
		&self.problem
	}

	fn reset(&mut self) {
		self.problem.reset();
		self.solution = None;
		self.objective_value = f64::INFINITY;
		self.statistics = SearchStatistics::default();
	}

	fn set_terminate_callback(&mut self, cb: Option<TerminateCallback>) {
		self.terminate = cb;
	}

	#[tracing::instrument(level = "debug", skip_all, fields(variables = self.problem.columns()))]
	fn solve(&mut self) -> bool {
		let n = self.problem.columns();
		self.solution = None;
		self.statistics = SearchStatistics::default();
		if n > Self::MAX_VARIABLES {
			warn!(
				variables = n,
				limit = Self::MAX_VARIABLES,
				"too many variables for exhaustive enumeration"
			);
			return false;
		}

		let tolerance = self.config.tolerance();
		let maximize = self.problem.maximize();
		let mut best: Option<(Vec<bool>, f64)> = None;
		let mut x = vec![false; n];
		for bits in 0u64..(1 << n) {
			if let Some(cb) = self.terminate.as_mut() {
				if cb() == TermSignal::Terminate {
					self.statistics.interrupted = true;
					break;
				}
			}
			self.statistics.nodes += 1;
			for (j, xj) in x.iter_mut().enumerate() {
				*xj = bits & (1 << j) != 0;
			}
			if !self.problem.constraints_satisfied(&x) {
				continue;
			}
			let value = self.problem.evaluate(&x);
			let improves = match &best {
				None => true,
				Some((_, v)) if approx_eq(value, *v, tolerance) => false,
				Some((_, v)) => (value > *v) == maximize,
			};
			if improves {
				self.statistics.incumbents += 1;
				best = Some((x.clone(), value));
				if self.config.first_feasible() {
					break;
				}
			}
		}

		if let Some((sol, value)) = best {
			self.solution = Some(sol);
			self.objective_value = value;
		} else {
			self.objective_value = if maximize {
				f64::NEG_INFINITY
			} else {
				f64::INFINITY
			};
		}
		debug!(
			found = self.solution.is_some(),
			objective = self.objective_value,
			assignments = self.statistics.nodes,
			"enumeration finished"
		);
		self.solution.is_some()
	}

	fn statistics(&self) -> SearchStatistics {
		self.statistics.clone()
	}
}
