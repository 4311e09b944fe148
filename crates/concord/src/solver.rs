//! Solvers for 0-1 integer linear programs.
//!
//! The [`IlpSolver`] trait describes the interface used by
//! [`crate::Inference`] to build and solve a [`ZeroOneIlpProblem`]. The
//! default implementation is [`BalasSolver`], an implementation of Balas'
//! additive algorithm. The [`ExhaustiveSolver`] enumerates all assignments,
//! and is only suitable for very small problems.

pub mod balas;
pub mod exhaustive;
pub(crate) mod trail;

use std::fmt::{self, Debug};

use crate::{
	ilp::{IlpVar, RowId, ZeroOneIlpProblem, TOLERANCE},
	solver::{balas::BalasSolver, exhaustive::ExhaustiveSolver},
};

/// Callback function that is periodically called by a solver during the
/// search, allowing the user to stop the search early.
pub type TerminateCallback = Box<dyn FnMut() -> TermSignal>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Signal returned by a [`TerminateCallback`].
pub enum TermSignal {
	/// Continue the search.
	Continue,
	/// Stop the search as soon as possible.
	Terminate,
}

#[derive(Clone, Debug, Default, PartialEq)]
/// Configuration of a solver for 0-1 integer linear programs.
pub struct SolverConfig {
	/// Whether to stop the search at the first feasible solution, instead of
	/// searching for an optimal one.
	first_feasible: bool,
	/// The tolerance used when comparing objective values and the left-hand
	/// sides of constraints.
	tolerance: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
/// Statistics gathered during the last call to [`IlpSolver::solve`].
pub struct SearchStatistics {
	/// Number of nodes of the search tree that were visited.
	pub(crate) nodes: u64,
	/// Number of times an improving solution was found.
	pub(crate) incumbents: u64,
	/// Peak depth of the search tree.
	pub(crate) peak_depth: u32,
	/// Whether the search was stopped by a [`TerminateCallback`].
	pub(crate) interrupted: bool,
}

/// Interface of a solver for 0-1 integer linear programs.
///
/// The problem is built incrementally: variables receive increasing indices
/// in the order they are added, and each constraint receives the index of the
/// row it occupies. Once [`IlpSolver::solve`] returns `true`, the values of the
/// variables in the optimal solution can be queried.
pub trait IlpSolver: Debug {
	/// Add a new Boolean variable with the given objective coefficient, returning
	/// its index.
	fn add_boolean_variable(&mut self, objective: f64) -> IlpVar;

	/// Add a set of Boolean variables, one for each objective coefficient, of
	/// which exactly one must be true.
	fn add_discrete_variable(&mut self, objective: &[f64]) -> Vec<IlpVar>;

	/// Add the constraint `Σ aᵢ·xᵢ = b`.
	fn add_equality_constraint(&mut self, terms: Vec<(IlpVar, f64)>, bound: f64) -> RowId;

	/// Add the constraint `Σ aᵢ·xᵢ ≥ b`.
	fn add_greater_than_constraint(&mut self, terms: Vec<(IlpVar, f64)>, bound: f64) -> RowId;

	/// Add the constraint `Σ aᵢ·xᵢ ≤ b`.
	fn add_less_than_constraint(&mut self, terms: Vec<(IlpVar, f64)>, bound: f64) -> RowId;

	/// The value of `var` in the solution found by the last call to
	/// [`IlpSolver::solve`].
	///
	/// Returns `false` when no solution is available.
	fn boolean_value(&self, var: IlpVar) -> bool;

	/// Returns whether a solution is available.
	fn is_solved(&self) -> bool;

	/// The objective value of the solution found by the last call to
	/// [`IlpSolver::solve`].
	fn objective_value(&self) -> f64;

	/// Access the problem that is solved by the solver.
	fn problem(&self) -> &ZeroOneIlpProblem;

	/// Remove all variables and constraints, and forget any solution.
	fn reset(&mut self);

	/// Set whether the objective function is to be maximized.
	fn set_maximize(&mut self, maximize: bool);

	/// Set a callback function used to indicate a termination requirement to the
	/// solver.
	///
	/// The solver will call this function at every node of the search tree and
	/// check its return value. Subsequent calls to this method override the
	/// previously set callback function.
	fn set_terminate_callback(&mut self, cb: Option<TerminateCallback>);

	/// Solve the problem, returning whether a solution was found.
	///
	/// Unless the search was interrupted, or the solver is configured to stop at
	/// the first feasible solution, the solution found is optimal.
	fn solve(&mut self) -> bool;

	/// Statistics of the last call to [`IlpSolver::solve`].
	fn statistics(&self) -> SearchStatistics;

	/// Write the problem to `out`, in the format accepted by
	/// [`ZeroOneIlpProblem`]'s [`std::str::FromStr`] implementation.
	fn write(&self, out: &mut dyn fmt::Write) -> fmt::Result {
		write!(out, "{}", self.problem())
	}
}

impl IlpSolver for Box<dyn IlpSolver> {
	fn add_boolean_variable(&mut self, objective: f64) -> IlpVar {
		self.as_mut().add_boolean_variable(objective)
	}

	fn add_discrete_variable(&mut self, objective: &[f64]) -> Vec<IlpVar> {
		self.as_mut().add_discrete_variable(objective)
	}

	fn add_equality_constraint(&mut self, terms: Vec<(IlpVar, f64)>, bound: f64) -> RowId {
		self.as_mut().add_equality_constraint(terms, bound)
	}

	fn add_greater_than_constraint(&mut self, terms: Vec<(IlpVar, f64)>, bound: f64) -> RowId {
		self.as_mut().add_greater_than_constraint(terms, bound)
	}

	fn add_less_than_constraint(&mut self, terms: Vec<(IlpVar, f64)>, bound: f64) -> RowId {
		self.as_mut().add_less_than_constraint(terms, bound)
	}

	fn boolean_value(&self, var: IlpVar) -> bool {
		self.as_ref().boolean_value(var)
	}

	fn is_solved(&self) -> bool {
		self.as_ref().is_solved()
	}

	fn objective_value(&self) -> f64 {
		self.as_ref().objective_value()
	}

	fn problem(&self) -> &ZeroOneIlpProblem {
		self.as_ref().problem()
	}

	fn reset(&mut self) {
		self.as_mut().reset();
	}

	fn set_maximize(&mut self, maximize: bool) {
		self.as_mut().set_maximize(maximize);
	}

	fn set_terminate_callback(&mut self, cb: Option<TerminateCallback>) {
		self.as_mut().set_terminate_callback(cb);
	}

	fn solve(&mut self) -> bool {
		self.as_mut().solve()
	}

	fn statistics(&self) -> SearchStatistics {
		self.as_ref().statistics()
	}
}

impl SearchStatistics {
	/// Returns the number of improving solutions found during the search.
	pub fn incumbents(&self) -> u64 {
		self.incumbents
	}
	/// Returns whether the search was stopped by a [`TerminateCallback`] before
	/// it was completed.
	pub fn interrupted(&self) -> bool {
		self.interrupted
	}
	/// Returns the number of nodes of the search tree that were visited.
	pub fn nodes(&self) -> u64 {
		self.nodes
	}
	/// Returns the peak depth of the search tree.
	pub fn peak_depth(&self) -> u32 {
		self.peak_depth
	}
}

impl SolverConfig {
	/// The default tolerance used when comparing floating point values.
	pub const DEFAULT_TOLERANCE: f64 = TOLERANCE;

	/// Create a solver for the given problem using this configuration.
	///
	/// `exhaustive` selects the [`ExhaustiveSolver`] rather than the
	/// [`BalasSolver`].
	pub fn build(self, problem: ZeroOneIlpProblem, exhaustive: bool) -> Box<dyn IlpSolver> {
		if exhaustive {
			Box::new(ExhaustiveSolver::with_problem(problem, self))
		} else {
			Box::new(BalasSolver::with_problem(problem, self))
		}
	}

	/// Get whether the search stops at the first feasible solution.
	pub fn first_feasible(&self) -> bool {
		self.first_feasible
	}

	/// Get the tolerance used when comparing floating point values.
	pub fn tolerance(&self) -> f64 {
		self.tolerance.unwrap_or(Self::DEFAULT_TOLERANCE)
	}

	/// Change whether the search stops at the first feasible solution.
	pub fn with_first_feasible(mut self, first_feasible: bool) -> Self {
		self.first_feasible = first_feasible;
		self
	}

	/// Change the tolerance used when comparing floating point values.
	pub fn with_tolerance(mut self, tolerance: f64) -> Self {
		self.tolerance = Some(tolerance);
		self
	}
}
