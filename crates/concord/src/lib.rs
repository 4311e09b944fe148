//! # Concord - Constrained Joint Inference over Classifier Predictions
//!
//! Concord reconciles the predictions of independently trained classifiers
//! with declarative constraints. Each (classifier, example) pair contributes a
//! distribution of scores over candidate labels, and a first-order constraint
//! describes which joint label assignments are acceptable. Concord finds the
//! acceptable assignment with the largest total score.
//!
//! The pipeline consists of the following parts:
//!
//! - [`constraint`]: first-order constraints, which may quantify over finite
//!   collections and compare the labels of classifiers.
//! - [`formula`]: ground propositional formulas over "classifier(example) ==
//!   label" literals, together with their algebraic rewriting (simplification,
//!   negation, normal forms).
//! - [`inference`]: the session object that expands the constraints, lowers
//!   them into a 0-1 integer linear program, solves it, and answers queries.
//! - [`ilp`]: the sparse representation of 0-1 integer linear programs.
//! - [`solver`]: solvers for 0-1 integer linear programs, most importantly
//!   Balas' additive branch and bound algorithm.

pub mod constraint;
pub mod formula;
pub(crate) mod helpers;
pub mod ilp;
pub mod inference;
pub mod normalizer;
pub mod solver;
#[cfg(test)]
pub(crate) mod tests;
pub mod variable;

use index_vec::define_index_type;

pub use crate::{
	constraint::{Constraint, ConstraintError, Env, LabelLookup, Term, Value, VarTerm},
	formula::{Formula, GroundLiteral},
	ilp::{Comparison, IlpError, IlpVar, RowId, ZeroOneIlpProblem},
	inference::{Inference, InferenceConfig, InferenceError, ScoreFn, ScoreProvider, Verbosity},
	normalizer::{IdentityNormalizer, Normalizer, Sigmoid, Softmax},
	solver::{
		balas::BalasSolver, exhaustive::ExhaustiveSolver, IlpSolver, SearchStatistics,
		SolverConfig, TermSignal, TerminateCallback,
	},
	variable::{LabelVar, LabelVarId, LabelVariable, VariableRegistry},
};

#[derive(Clone, Debug, PartialEq)]
/// A score assigned by a classifier to a candidate label of an example.
pub struct Score {
	/// The candidate label.
	pub label: String,
	/// The score of the label, where larger is better.
	pub value: f64,
}

/// A function that decides the truth value of ground literals.
///
/// This trait is used to evaluate [`Formula`] objects, and is automatically
/// implemented for any suitable closure.
pub trait Valuation: Fn(&GroundLiteral) -> bool {}

impl Score {
	/// Create a new score for the given label.
	pub fn new(label: impl Into<String>, value: f64) -> Self {
		Self {
			label: label.into(),
			value,
		}
	}

	/// Select the score with the largest value, preferring the earliest score
	/// when several share the largest value.
	pub fn arg_max(scores: &[Score]) -> Option<&Score> {
		scores
			.iter()
			.reduce(|best, s| if s.value > best.value { s } else { best })
	}
}

impl<F: Fn(&GroundLiteral) -> bool> Valuation for F {}

define_index_type! {
	/// Reference to a classifier registered with an [`Inference`] session.
	pub struct ClassifierId = u32;
	DISPLAY_FORMAT = "c{}";
}

define_index_type! {
	/// Reference to an example stored in the arena of an [`Inference`]
	/// session.
	///
	/// Two references are the same example if and only if they are equal, no
	/// structural comparison of the examples themselves takes place.
	pub struct ExampleId = u32;
	DISPLAY_FORMAT = "e{}";
}
