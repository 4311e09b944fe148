//! Balas' additive algorithm for 0-1 integer linear programs.
//!
//! The problem is first brought into a canonical form in which the objective
//! function is minimized, all objective coefficients are non-negative, and all
//! constraints are `≤` constraints. Equality constraints are replaced by a
//! pair of inequalities, and variables with a negative objective coefficient
//! are replaced by their complement.
//!
//! The search starts from the assignment in which all variables are zero,
//! which has the smallest objective value possible. Variables are then set to
//! one, guided by the amount by which the constraints are violated, until all
//! constraints are satisfied. Subtrees that cannot produce a solution better
//! than the best solution found so far, or that can no longer satisfy a
//! violated constraint, are pruned.

use std::fmt::{self, Debug, Display};

use delegate::delegate;
use tracing::{debug, trace};

use crate::{
	helpers::snap_to_integer,
	ilp::{write_signed, Comparison, IlpVar, RowId, ZeroOneIlpProblem},
	solver::{
		trail::{Trail, TrailEvent},
		IlpSolver, SearchStatistics, SolverConfig, TermSignal, TerminateCallback,
	},
};

/// Solver for 0-1 integer linear programs using Balas' additive branch and
/// bound algorithm.
pub struct BalasSolver {
	/// The problem as given by the user.
	problem: ZeroOneIlpProblem,
	/// The configuration of the search.
	config: SolverConfig,
	/// Callback used to check whether the search should be stopped.
	terminate: Option<TerminateCallback>,
	/// The best solution found by the last search, if any.
	solution: Option<Vec<bool>>,
	/// The objective value of `solution`.
	objective_value: f64,
	/// Statistics of the last search.
	statistics: SearchStatistics,
}

#[derive(Clone, Debug, Default, PartialEq)]
/// A 0-1 integer linear program in the form used during the search: minimize
/// an objective function with non-negative coefficients, subject to `≤`
/// constraints.
struct CanonicalForm {
	/// The (non-negative) objective coefficient of each variable.
	objective: Vec<f64>,
	/// Whether each variable has been replaced by its complement.
	negated: Vec<bool>,
	/// The `≤` constraints.
	rows: Vec<CanonicalRow>,
	/// For each variable, the rows in which it occurs and its coefficient in
	/// that row.
	columns: Vec<Vec<(usize, f64)>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
/// The constraint `Σ aᵢ·xᵢ ≤ b` of a [`CanonicalForm`].
struct CanonicalRow {
	/// The variables in the constraint, in increasing order.
	vars: Vec<usize>,
	/// The coefficient of each variable in `vars`.
	coefficients: Vec<f64>,
	/// The right-hand side of the constraint.
	bound: f64,
}

/// The state of a search over a [`CanonicalForm`].
struct SearchState<'a> {
	/// The problem being searched.
	form: &'a CanonicalForm,
	/// Whether to stop at the first feasible solution.
	first_feasible: bool,
	/// Tolerance used when comparing floating point values.
	tolerance: f64,
	/// Callback used to check whether the search should be stopped.
	terminate: Option<&'a mut TerminateCallback>,
	/// The current assignment.
	x: Vec<bool>,
	/// For each row, the bound minus the left-hand side under `x`.
	slack: Vec<f64>,
	/// Variables that are not allowed to change in the current subtree.
	cancelled: Vec<bool>,
	/// Trail used to undo assignments and cancellations on backtracking.
	trail: Trail,
	/// The best assignment found so far.
	incumbent: Option<Vec<bool>>,
	/// The objective value of the incumbent, or infinity if there is none.
	incumbent_value: f64,
	/// Statistics of the search.
	stats: SearchStatistics,
}

impl BalasSolver {
	/// Create a new solver without any variables or constraints.
	pub fn new(config: SolverConfig) -> Self {
		Self::with_problem(ZeroOneIlpProblem::default(), config)
	}

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

	/// Access the configuration of the solver.
	pub fn config(&self) -> &SolverConfig {
		&self.config
	}

	/// Change whether the search stops at the first feasible solution.
	pub fn set_first_feasible(&mut self, first_feasible: bool) {
		self.config = self.config.clone().with_first_feasible(first_feasible);
	}

	/// The solution found by the last search, if any.
	pub fn solution(&self) -> Option<&[bool]> {
		self.solution.as_deref()
	}
}

impl Debug for BalasSolver {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BalasSolver")
			.field("problem", &self.problem)
			.field("config", &self.config)
			.field("solution", &self.solution)
			.field("objective_value", &self.objective_value)
			.field("statistics", &self.statistics)
			.finish_non_exhaustive()
	}
}

impl Default for BalasSolver {
	fn default() -> Self {
		Self::new(SolverConfig::default())
	}
}

impl IlpSolver for BalasSolver {
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

	#[tracing::instrument(level = "debug", skip_all, fields(variables = self.problem.columns(), constraints = self.problem.rows()))]
	fn solve(&mut self) -> bool {
		let tolerance = self.config.tolerance();
		let form = CanonicalForm::new(&self.problem, tolerance);
		trace!("canonical form:\n{form}");

		let mut state = SearchState::new(
			&form,
			self.config.first_feasible(),
			tolerance,
			self.terminate.as_mut(),
		);
		let found = state.search(0.0, 0);
		let SearchState {
			incumbent,
			incumbent_value,
			stats,
			..
		} = state;

		self.statistics = stats;
		self.solution = incumbent.map(|mut x| {
			for (xi, &neg) in x.iter_mut().zip(&form.negated) {
				if neg {
					*xi = !*xi;
				}
			}
			x
		});
		let mut value = incumbent_value;
		if self.solution.is_some() {
			for (&c, &neg) in form.objective.iter().zip(&form.negated) {
				if neg {
					value -= c;
				}
			}
		}
		self.objective_value = if self.problem.maximize() {
			-value
		} else {
			value
		};

		debug!(
			found,
			objective = self.objective_value,
			nodes = self.statistics.nodes,
			incumbents = self.statistics.incumbents,
			interrupted = self.statistics.interrupted,
			"search finished"
		);
		found
	}

	fn statistics(&self) -> SearchStatistics {
		self.statistics.clone()
	}
}

impl CanonicalForm {
	/// Bring `problem` into canonical form.
	fn new(problem: &ZeroOneIlpProblem, tolerance: f64) -> Self {
		let mut rows = Vec::with_capacity(problem.rows());
		for (_, row) in problem.iter_rows() {
			let vars: Vec<usize> = row.terms().map(|(v, _)| v.index()).collect();
			let coefficients: Vec<f64> = row.terms().map(|(_, c)| c).collect();
			let negated = || CanonicalRow {
				vars: vars.clone(),
				coefficients: coefficients.iter().map(|c| -c).collect(),
				bound: -row.bound(),
			};
			match row.comparison() {
				Comparison::LessEqual => rows.push(CanonicalRow {
					vars: vars.clone(),
					coefficients: coefficients.clone(),
					bound: row.bound(),
				}),
				Comparison::GreaterEqual => rows.push(negated()),
				Comparison::Equal => {
					rows.push(CanonicalRow {
						vars: vars.clone(),
						coefficients: coefficients.clone(),
						bound: row.bound(),
					});
					rows.push(negated());
				}
			}
		}

		let mut objective = problem.objective_coefficients().to_vec();
		let mut negated = vec![false; objective.len()];
		for (j, c) in objective.iter_mut().enumerate() {
			if c.abs() < tolerance {
				*c = 0.0;
				continue;
			}
			if problem.maximize() {
				*c = -*c;
			}
			if *c < 0.0 {
				*c = -*c;
				for row in rows.iter_mut() {
					if let Ok(k) = row.vars.binary_search(&j) {
						row.bound -= row.coefficients[k];
						row.coefficients[k] = -row.coefficients[k];
					}
				}
				negated[j] = true;
			}
		}

		let mut columns = vec![Vec::new(); objective.len()];
		for (i, row) in rows.iter().enumerate() {
			for (&j, &a) in row.vars.iter().zip(&row.coefficients) {
				columns[j].push((i, a));
			}
		}

		Self {
			objective,
			negated,
			rows,
			columns,
		}
	}

	/// The coefficient of variable `j` in row `i`, if it occurs in the row.
	fn coefficient(&self, i: usize, j: usize) -> Option<f64> {
		let row = &self.rows[i];
		row.vars
			.binary_search(&j)
			.ok()
			.map(|k| row.coefficients[k])
	}
}

impl Display for CanonicalForm {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("min")?;
		for (j, (&c, &neg)) in self.objective.iter().zip(&self.negated).enumerate() {
			f.write_str(" ")?;
			write_signed(f, c)?;
			if neg {
				write!(f, " (x_{j})")?;
			} else {
				write!(f, " x_{j}")?;
			}
		}
		writeln!(f)?;
		for row in &self.rows {
			f.write_str(" ")?;
			for (&j, &a) in row.vars.iter().zip(&row.coefficients) {
				f.write_str(" ")?;
				write_signed(f, a)?;
				write!(f, " x_{j}")?;
			}
			writeln!(f, " <= {:?}", row.bound)?;
		}
		Ok(())
	}
}

impl<'a> SearchState<'a> {
	/// Create the initial state of the search, in which all variables are zero.
	fn new(
		form: &'a CanonicalForm,
		first_feasible: bool,
		tolerance: f64,
		terminate: Option<&'a mut TerminateCallback>,
	) -> Self {
		let n = form.objective.len();
		let slack = form
			.rows
			.iter()
			.map(|row| snap_to_integer(row.bound, tolerance))
			.collect();
		Self {
			form,
			first_feasible,
			tolerance,
			terminate,
			x: vec![false; n],
			slack,
			cancelled: vec![false; n],
			trail: Trail::default(),
			incumbent: None,
			incumbent_value: f64::INFINITY,
			stats: SearchStatistics::default(),
		}
	}

	/// Set variable `j` to one, recording the change on the trail.
	fn assign(&mut self, j: usize) {
		debug_assert!(!self.x[j]);
		self.x[j] = true;
		for &(i, a) in &self.form.columns[j] {
			self.slack[i] -= a;
		}
		self.trail.record(TrailEvent::Assign(j));
	}

	/// Undo all assignments and cancellations of the most recent level.
	fn backtrack(&mut self) {
		for event in self.trail.pop_level() {
			match event {
				TrailEvent::Assign(j) => {
					self.x[j] = false;
					for &(i, a) in &self.form.columns[j] {
						self.slack[i] += a;
					}
				}
				TrailEvent::Cancel(j) => self.cancelled[j] = false,
			}
		}
	}

	/// Make variable `j` ineligible for branching, recording the change on the
	/// trail.
	fn cancel(&mut self, j: usize) {
		debug_assert!(!self.cancelled[j]);
		self.cancelled[j] = true;
		self.trail.record(TrailEvent::Cancel(j));
	}

	/// Determine, for each violated row, the total of the negative coefficients
	/// of the eligible variables, i.e. the largest decrease of the left-hand
	/// side that can still be achieved.
	///
	/// Returns [`None`] if this is not sufficient to satisfy one of the rows.
	/// Otherwise, the rows that can only be satisfied by setting all of these
	/// variables to one are added to `at_equality`.
	fn constraint_satisfiability(
		&self,
		violated: &[usize],
		eligible: &[usize],
		at_equality: &mut Vec<usize>,
	) -> Option<Vec<f64>> {
		let mut lhs_negative = vec![0.0; violated.len()];
		for (neg, &i) in lhs_negative.iter_mut().zip(violated) {
			let row = &self.form.rows[i];
			for (j, &a) in row.vars.iter().zip(&row.coefficients) {
				if a < 0.0 && eligible.binary_search(j).is_ok() {
					*neg += a;
				}
			}
			if *neg - self.tolerance > self.slack[i] {
				return None;
			}
			if (self.slack[i] - *neg).abs() < self.tolerance {
				at_equality.push(i);
			}
		}
		Some(lhs_negative)
	}

	/// The variables that can be set to one in the current subtree: they are not
	/// cancelled, setting them does not exceed the objective value of the
	/// incumbent, and they reduce the left-hand side of a violated row.
	fn eligible_variables(&self, z: f64, violated: &[usize]) -> Vec<usize> {
		(0..self.x.len())
			.filter(|&j| {
				!self.cancelled[j]
					&& z + self.form.objective[j] < self.incumbent_value - self.tolerance
					&& violated
						.iter()
						.any(|&i| self.form.coefficient(i, j).is_some_and(|a| a < 0.0))
			})
			.collect()
	}

	/// Explore the subtree rooted at the current assignment, whose objective
	/// value is `z`.
	///
	/// Returns whether an improving solution was found in the subtree.
	fn search(&mut self, z: f64, depth: u32) -> bool {
		self.stats.nodes += 1;
		self.stats.peak_depth = self.stats.peak_depth.max(depth);
		if let Some(cb) = self.terminate.as_mut() {
			if cb() == TermSignal::Terminate {
				self.stats.interrupted = true;
			}
		}
		if self.stats.interrupted {
			return false;
		}

		let level = self.trail.level();
		self.trail.push_level();
		let result = self.search_node(z, depth);
		self.backtrack();
		debug_assert_eq!(self.trail.level(), level, "search node left the trail unbalanced");
		result
	}

	/// Process a node of the search tree, see [`Self::search`].
	///
	/// Any cancellations made by this method are undone by the caller.
	fn search_node(&mut self, z: f64, depth: u32) -> bool {
		let form = self.form;
		let violated: Vec<usize> = (0..self.slack.len())
			.filter(|&i| self.slack[i] < 0.0)
			.collect();
		if violated.is_empty() {
			trace!(objective = z, depth, "new incumbent");
			self.incumbent = Some(self.x.clone());
			self.incumbent_value = z;
			self.stats.incumbents += 1;
			return true;
		}

		let eligible = self.eligible_variables(z, &violated);
		if eligible.is_empty() {
			return false;
		}
		let mut at_equality = Vec::new();
		let Some(mut lhs_negative) =
			self.constraint_satisfiability(&violated, &eligible, &mut at_equality)
		else {
			return false;
		};

		let mut order: Option<Vec<usize>> = None;
		let mut best_index = 0;
		let mut ineligibles: isize = 0;
		let mut result = false;
		loop {
			if !at_equality.is_empty() {
				result |= self.satisfy_all(&at_equality, z, &eligible, depth);
				break;
			}

			let order = order.get_or_insert_with(|| self.sort_by_violations(&eligible));
			let mut best = eligible[order[best_index]];
			best_index += 1;
			while best_index < eligible.len() && self.cancelled[best] {
				best = eligible[order[best_index]];
				best_index += 1;
				ineligibles -= 1;
			}
			if self.cancelled[best] {
				break;
			}

			self.cancel(best);
			let incumbents = self.stats.incumbents;
			self.trail.push_level();
			self.assign(best);
			result |= self.search(z + form.objective[best], depth + 1);
			self.backtrack();
			if (self.first_feasible && result) || self.stats.interrupted {
				break;
			}

			// Once the incumbent improves, the remaining candidates that cannot
			// improve on it are cancelled as well.
			let mut newly_ineligible = vec![best];
			if incumbents != self.stats.incumbents {
				for &k in &order[best_index..] {
					let j = eligible[k];
					if !self.cancelled[j]
						&& z + form.objective[j] >= self.incumbent_value - self.tolerance
					{
						newly_ineligible.push(j);
						self.cancel(j);
					}
				}
				ineligibles += newly_ineligible.len() as isize - 1;
			}

			let mut satisfiable =
				eligible.len() as isize - best_index as isize - ineligibles > 0;
			for (neg, &i) in lhs_negative.iter_mut().zip(&violated) {
				if !satisfiable {
					break;
				}
				for &j in &newly_ineligible {
					if let Some(a) = form.coefficient(i, j) {
						if a < 0.0 {
							*neg -= a;
						}
					}
				}
				satisfiable = *neg - self.tolerance <= self.slack[i];
				if satisfiable && (self.slack[i] - *neg).abs() < self.tolerance {
					at_equality.push(i);
				}
			}
			if !satisfiable {
				break;
			}
		}
		result
	}

	/// Set all eligible variables with a negative coefficient in one of the rows
	/// in `at_equality` to one, since this is the only way to satisfy these
	/// rows, and continue the search if this might improve the incumbent.
	fn satisfy_all(&mut self, at_equality: &[usize], z: f64, eligible: &[usize], depth: u32) -> bool {
		let form = self.form;
		let mut forced = Vec::new();
		let mut z = z;
		for &i in at_equality {
			let row = &form.rows[i];
			for (&j, &a) in row.vars.iter().zip(&row.coefficients) {
				if self.cancelled[j] {
					continue;
				}
				if a < 0.0 && eligible.binary_search(&j).is_ok() {
					forced.push(j);
					self.cancel(j);
					z += form.objective[j];
				}
			}
		}

		if z < self.incumbent_value - self.tolerance {
			self.trail.push_level();
			for &j in &forced {
				self.assign(j);
			}
			let result = self.search(z, depth + 1);
			self.backtrack();
			result
		} else {
			false
		}
	}

	/// Order the eligible variables by the total amount by which the rows would
	/// be violated after setting the variable to one. Ties are broken by the
	/// smallest objective coefficient, and then by the position in `eligible`.
	///
	/// Returns the sorted positions in `eligible`.
	fn sort_by_violations(&self, eligible: &[usize]) -> Vec<usize> {
		let violations: Vec<f64> = eligible
			.iter()
			.map(|&j| {
				(0..self.slack.len())
					.map(|i| {
						let a = self.form.coefficient(i, j).unwrap_or(0.0);
						(a - self.slack[i]).max(0.0)
					})
					.sum()
			})
			.collect();
		let tol = self.tolerance;
		let precedes = |k1: usize, k2: usize| {
			if (violations[k1] - violations[k2]).abs() < tol {
				let c1 = self.form.objective[eligible[k1]];
				let c2 = self.form.objective[eligible[k2]];
				if (c1 - c2).abs() < tol {
					k1 < k2
				} else {
					c1 < c2
				}
			} else {
				violations[k1] < violations[k2]
			}
		};

		// The tolerance makes the comparison intransitive, so an insertion sort is
		// used rather than `sort_by`, which may panic on such orderings.
		let mut order = Vec::with_capacity(eligible.len());
		for k in 0..eligible.len() {
			let mut pos = order.len();
			while pos > 0 && precedes(k, order[pos - 1]) {
				pos -= 1;
			}
			order.insert(pos, k);
		}
		order
	}
}
