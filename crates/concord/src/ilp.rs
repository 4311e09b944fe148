//! Sparse representation of 0-1 integer linear programs, and the plain-text
//! format used to write and read them.
//!
//! A [`ZeroOneIlpProblem`] consists of Boolean (0-1) variables, each with a
//! coefficient in the objective function, and linear constraints over those
//! variables. Every constraint is stored as a row that is sorted by variable,
//! so that the coefficient of a variable in a row can be found using binary
//! search.

use std::{
	fmt::{self, Display, Write},
	str::FromStr,
};

use index_vec::{define_index_type, IndexVec};
use thiserror::Error;

use crate::helpers::snap_to_integer;

/// The tolerance used for all floating point comparisons of coefficients,
/// bounds, and objective values.
///
/// Values that lie within the tolerance of an integer are snapped to that
/// integer when they are added to a [`ZeroOneIlpProblem`].
pub const TOLERANCE: f64 = 1e-10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// The comparison that relates the left-hand side of a linear constraint to its
/// bound.
pub enum Comparison {
	/// The left-hand side must be equal to the bound.
	Equal,
	/// The left-hand side must be less than or equal to the bound.
	LessEqual,
	/// The left-hand side must be greater than or equal to the bound.
	GreaterEqual,
}

#[derive(Error, Debug, Clone, PartialEq)]
/// Errors that can occur when reading a [`ZeroOneIlpProblem`] from its textual
/// representation.
pub enum IlpError {
	#[error("the problem does not contain an objective function")]
	/// The input did not contain any (non-empty) lines.
	MissingObjective,
	#[error("line {line}: {reason}")]
	/// A line of the input could not be parsed.
	Parse {
		/// The (1-based) line number of the offending line.
		line: usize,
		/// Description of the problem.
		reason: String,
	},
	#[error("line {line}: constraint uses x_{var}, but the objective only declares {columns} variables")]
	/// A constraint used a variable that was not declared in the objective
	/// function.
	UnknownVariable {
		/// The (1-based) line number of the offending line.
		line: usize,
		/// The index of the unknown variable.
		var: usize,
		/// The number of variables declared by the objective function.
		columns: usize,
	},
}

#[derive(Clone, Debug, PartialEq)]
/// A linear constraint `Σ aᵢ·xᵢ ⋈ b` of a [`ZeroOneIlpProblem`].
pub struct Row {
	/// The variables in the constraint, sorted in increasing order.
	vars: Vec<IlpVar>,
	/// The coefficient of each variable in `vars`.
	coefficients: Vec<f64>,
	/// The comparison between the left-hand side and the bound.
	comparison: Comparison,
	/// The right-hand side of the constraint.
	bound: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
/// A 0-1 integer linear program: an objective function over Boolean variables
/// that is to be minimized or maximized, subject to linear constraints.
pub struct ZeroOneIlpProblem {
	/// Whether the objective function is to be maximized.
	maximize: bool,
	/// The coefficient of each variable in the objective function.
	objective: IndexVec<IlpVar, f64>,
	/// The constraints of the problem.
	rows: IndexVec<RowId, Row>,
}

impl Comparison {
	/// Returns whether `lhs` compares to `bound` as required, allowing for the
	/// given tolerance.
	pub fn holds(&self, lhs: f64, bound: f64, tolerance: f64) -> bool {
		match self {
			Comparison::Equal => (lhs - bound).abs() < tolerance,
			Comparison::LessEqual => lhs <= bound + tolerance,
			Comparison::GreaterEqual => lhs >= bound - tolerance,
		}
	}

	/// The symbol used for the comparison in the textual format.
	pub fn symbol(&self) -> &'static str {
		match self {
			Comparison::Equal => "=",
			Comparison::LessEqual => "<=",
			Comparison::GreaterEqual => ">=",
		}
	}
}

impl Display for Comparison {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.symbol())
	}
}

impl FromStr for Comparison {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"=" | "==" => Ok(Comparison::Equal),
			"<=" => Ok(Comparison::LessEqual),
			">=" => Ok(Comparison::GreaterEqual),
			_ => Err(format!("unknown comparison operator `{s}'")),
		}
	}
}

impl Row {
	/// Create a new row from the given terms, sorting them by variable and
	/// merging terms that use the same variable.
	fn new(
		terms: impl IntoIterator<Item = (IlpVar, f64)>,
		comparison: Comparison,
		bound: f64,
	) -> Self {
		let mut terms: Vec<(IlpVar, f64)> = terms.into_iter().collect();
		terms.sort_by_key(|&(v, _)| v);

		let mut vars: Vec<IlpVar> = Vec::with_capacity(terms.len());
		let mut coefficients: Vec<f64> = Vec::with_capacity(terms.len());
		for (v, c) in terms {
			if vars.last() == Some(&v) {
				if let Some(last) = coefficients.last_mut() {
					*last += c;
				}
			} else {
				vars.push(v);
				coefficients.push(c);
			}
		}
		for c in coefficients.iter_mut() {
			*c = snap_to_integer(*c, TOLERANCE);
		}

		Self {
			vars,
			coefficients,
			comparison,
			bound,
		}
	}

	/// The right-hand side of the constraint.
	pub fn bound(&self) -> f64 {
		self.bound
	}

	/// The coefficient of `var` in the row, if it occurs in the row.
	pub fn coefficient(&self, var: IlpVar) -> Option<f64> {
		self.vars
			.binary_search(&var)
			.ok()
			.map(|i| self.coefficients[i])
	}

	/// The comparison between the left-hand side and the bound.
	pub fn comparison(&self) -> Comparison {
		self.comparison
	}

	/// Returns whether the row contains no terms.
	pub fn is_empty(&self) -> bool {
		self.vars.is_empty()
	}

	/// Evaluate the left-hand side of the row under the given assignment.
	pub fn lhs(&self, x: &[bool]) -> f64 {
		self.terms()
			.filter(|(v, _)| x[v.index()])
			.map(|(_, c)| c)
			.sum()
	}

	/// The number of terms in the row.
	pub fn len(&self) -> usize {
		self.vars.len()
	}

	/// Set the coefficient of `var` in the row, inserting a new term when the
	/// variable does not yet occur in the row.
	fn set_coefficient(&mut self, var: IlpVar, coefficient: f64) {
		let coefficient = snap_to_integer(coefficient, TOLERANCE);
		match self.vars.binary_search(&var) {
			Ok(i) => self.coefficients[i] = coefficient,
			Err(i) => {
				self.vars.insert(i, var);
				self.coefficients.insert(i, coefficient);
			}
		}
	}

	/// Iterate over the terms of the row, in increasing order of the variables.
	pub fn terms(&self) -> impl Iterator<Item = (IlpVar, f64)> + '_ {
		self.vars
			.iter()
			.copied()
			.zip(self.coefficients.iter().copied())
	}
}

impl ZeroOneIlpProblem {
	/// Add a linear constraint with the given comparison to the problem.
	///
	/// The terms are sorted by variable, repeated variables are merged, and
	/// coefficients within [`TOLERANCE`] of an integer are snapped to that
	/// integer.
	pub fn add_constraint(
		&mut self,
		terms: impl IntoIterator<Item = (IlpVar, f64)>,
		comparison: Comparison,
		bound: f64,
	) -> RowId {
		let row = Row::new(terms, comparison, bound);
		debug_assert!(
			row.vars.iter().all(|v| v.index() < self.objective.len()),
			"constraint refers to a variable that does not exist"
		);
		self.rows.push(row)
	}

	/// Add a new Boolean variable with the given objective coefficient, returning
	/// its index.
	pub fn add_boolean_variable(&mut self, objective: f64) -> IlpVar {
		self.objective.push(objective)
	}

	/// Add a discrete variable that takes exactly one of `objective.len()`
	/// values.
	///
	/// One Boolean variable is created for each value, with the corresponding
	/// objective coefficient, and an equality constraint is added that ensures
	/// exactly one of them is true.
	pub fn add_discrete_variable(&mut self, objective: &[f64]) -> Vec<IlpVar> {
		let vars: Vec<IlpVar> = objective
			.iter()
			.map(|&c| self.add_boolean_variable(c))
			.collect();
		let _ = self.add_equality_constraint(vars.iter().map(|&v| (v, 1.0)), 1.0);
		vars
	}

	/// Add the constraint `Σ aᵢ·xᵢ = b` to the problem.
	pub fn add_equality_constraint(
		&mut self,
		terms: impl IntoIterator<Item = (IlpVar, f64)>,
		bound: f64,
	) -> RowId {
		self.add_constraint(terms, Comparison::Equal, bound)
	}

	/// Add the constraint `Σ aᵢ·xᵢ ≥ b` to the problem.
	pub fn add_greater_than_constraint(
		&mut self,
		terms: impl IntoIterator<Item = (IlpVar, f64)>,
		bound: f64,
	) -> RowId {
		self.add_constraint(terms, Comparison::GreaterEqual, bound)
	}

	/// Add the constraint `Σ aᵢ·xᵢ ≤ b` to the problem.
	pub fn add_less_than_constraint(
		&mut self,
		terms: impl IntoIterator<Item = (IlpVar, f64)>,
		bound: f64,
	) -> RowId {
		self.add_constraint(terms, Comparison::LessEqual, bound)
	}

	/// The coefficient of `var` in the constraint `row`, or zero if the variable
	/// does not occur in the constraint.
	pub fn coefficient(&self, row: RowId, var: IlpVar) -> f64 {
		self.rows[row].coefficient(var).unwrap_or(0.0)
	}

	/// The number of variables in the problem.
	pub fn columns(&self) -> usize {
		self.objective.len()
	}

	/// Returns whether the given assignment satisfies all constraints of the
	/// problem.
	pub fn constraints_satisfied(&self, x: &[bool]) -> bool {
		debug_assert_eq!(x.len(), self.columns());
		self.rows
			.iter()
			.all(|r| r.comparison.holds(r.lhs(x), r.bound, TOLERANCE))
	}

	/// Evaluate the objective function under the given assignment.
	pub fn evaluate(&self, x: &[bool]) -> f64 {
		debug_assert_eq!(x.len(), self.columns());
		self.objective
			.iter()
			.zip(x)
			.filter(|(_, &b)| b)
			.map(|(&c, _)| c)
			.sum()
	}

	/// Returns whether the objective function is to be maximized.
	pub fn maximize(&self) -> bool {
		self.maximize
	}

	/// The coefficient of `var` in the objective function.
	pub fn objective_coefficient(&self, var: IlpVar) -> f64 {
		self.objective[var]
	}

	/// The coefficients of all variables in the objective function.
	pub fn objective_coefficients(&self) -> &[f64] {
		self.objective.as_raw_slice()
	}

	/// Clear all variables and constraints from the problem, and set it to
	/// minimize again.
	pub fn reset(&mut self) {
		*self = Self::default();
	}

	/// Access the constraint `row`.
	pub fn row(&self, row: RowId) -> &Row {
		&self.rows[row]
	}

	/// The number of constraints in the problem.
	pub fn rows(&self) -> usize {
		self.rows.len()
	}

	/// Iterate over the constraints in the problem, in the order they were
	/// added.
	pub fn iter_rows(&self) -> impl Iterator<Item = (RowId, &Row)> + '_ {
		self.rows.iter_enumerated()
	}

	/// Set the coefficient of `var` in the constraint `row`.
	pub fn set_coefficient(&mut self, row: RowId, var: IlpVar, coefficient: f64) {
		debug_assert!(var.index() < self.columns());
		self.rows[row].set_coefficient(var, coefficient);
	}

	/// Set whether the objective function is to be maximized.
	pub fn set_maximize(&mut self, maximize: bool) {
		self.maximize = maximize;
	}

	/// Set the coefficient of `var` in the objective function.
	pub fn set_objective_coefficient(&mut self, var: IlpVar, coefficient: f64) {
		self.objective[var] = coefficient;
	}
}

/// Write a coefficient with an explicit sign, as used in the textual format.
pub(crate) fn write_signed(f: &mut dyn fmt::Write, c: f64) -> fmt::Result {
	// avoid writing "+-0.0"
	let c = if c == 0.0 { 0.0 } else { c };
	if c >= 0.0 {
		f.write_char('+')?;
	}
	write!(f, "{c:?}")
}

impl Display for ZeroOneIlpProblem {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(if self.maximize { "max" } else { "min" })?;
		for (v, &c) in self.objective.iter_enumerated() {
			f.write_char(' ')?;
			write_signed(f, c)?;
			write!(f, " {v}")?;
		}
		writeln!(f)?;

		for row in &self.rows {
			f.write_char(' ')?;
			for (v, c) in row.terms() {
				f.write_char(' ')?;
				write_signed(f, c)?;
				write!(f, " {v}")?;
			}
			writeln!(f, " {} {:?}", row.comparison, row.bound)?;
		}
		Ok(())
	}
}

/// Parse a variable reference of the form `x_i` or `(x_i)`, returning `i`.
fn parse_var(token: &str) -> Option<usize> {
	let token = token
		.strip_prefix('(')
		.and_then(|t| t.strip_suffix(')'))
		.unwrap_or(token);
	token.strip_prefix("x_")?.parse().ok()
}

/// Parse a finite floating point number, describing it as `what` in errors.
fn parse_number(line: usize, token: &str, what: &str) -> Result<f64, IlpError> {
	match token.parse::<f64>() {
		Ok(val) if val.is_finite() => Ok(val),
		_ => Err(IlpError::Parse {
			line,
			reason: format!("invalid {what} `{token}'"),
		}),
	}
}

/// Parse a sequence of `coefficient variable` pairs.
fn parse_terms(line: usize, tokens: &[&str]) -> Result<Vec<(usize, f64)>, IlpError> {
	if tokens.len() % 2 != 0 {
		return Err(IlpError::Parse {
			line,
			reason: "expected pairs of coefficients and variables".to_owned(),
		});
	}
	tokens
		.chunks_exact(2)
		.map(|pair| {
			let c = parse_number(line, pair[0], "coefficient")?;
			let v = parse_var(pair[1]).ok_or_else(|| IlpError::Parse {
				line,
				reason: format!("invalid variable `{}'", pair[1]),
			})?;
			Ok((v, c))
		})
		.collect()
}

impl FromStr for ZeroOneIlpProblem {
	type Err = IlpError;

	/// Read a problem in the format produced by the [`Display`] implementation.
	///
	/// The first non-empty line contains `max` or `min` followed by the
	/// objective function. It may be followed by a line containing `subject
	/// to`. Each remaining line contains a constraint.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut lines = s
			.lines()
			.enumerate()
			.map(|(i, l)| (i + 1, l.trim()))
			.filter(|(_, l)| !l.is_empty());

		let (line, objective) = lines.next().ok_or(IlpError::MissingObjective)?;
		let tokens: Vec<&str> = objective.split_whitespace().collect();
		let mut problem = ZeroOneIlpProblem::default();
		problem.maximize = match tokens[0] {
			"max" | "maximize" => true,
			"min" | "minimize" => false,
			direction => {
				return Err(IlpError::Parse {
					line,
					reason: format!("expected `max' or `min', found `{direction}'"),
				})
			}
		};
		let terms = parse_terms(line, &tokens[1..])?;
		// every variable is listed in the objective, so no index can exceed the
		// number of terms
		if let Some(&(v, _)) = terms.iter().find(|&&(v, _)| v >= terms.len()) {
			return Err(IlpError::Parse {
				line,
				reason: format!("x_{v} is out of range for an objective of {} terms", terms.len()),
			});
		}
		for (v, c) in terms {
			if v >= problem.objective.len() {
				problem.objective.resize(v + 1, 0.0);
			}
			problem.objective[IlpVar::new(v)] = c;
		}

		for (line, text) in lines {
			if text.contains("subject") {
				continue;
			}
			let tokens: Vec<&str> = text.split_whitespace().collect();
			if tokens.len() < 2 {
				return Err(IlpError::Parse {
					line,
					reason: "expected a comparison and a bound".to_owned(),
				});
			}
			let (terms, tail) = tokens.split_at(tokens.len() - 2);
			let comparison = tail[0]
				.parse::<Comparison>()
				.map_err(|reason| IlpError::Parse { line, reason })?;
			let bound = parse_number(line, tail[1], "bound")?;
			let terms = parse_terms(line, terms)?;
			if let Some(&(var, _)) = terms.iter().find(|(v, _)| *v >= problem.columns()) {
				return Err(IlpError::UnknownVariable {
					line,
					var,
					columns: problem.columns(),
				});
			}
			let _ = problem.add_constraint(
				terms.into_iter().map(|(v, c)| (IlpVar::new(v), c)),
				comparison,
				bound,
			);
		}

		Ok(problem)
	}
}

define_index_type! {
	/// Reference to a Boolean variable in a [`ZeroOneIlpProblem`].
	pub struct IlpVar = u32;
	DISPLAY_FORMAT = "x_{}";
}

define_index_type! {
	/// Reference to a constraint in a [`ZeroOneIlpProblem`].
	pub struct RowId = u32;
}
