//! Inference sessions: the expansion of a constraint over the predictions of a
//! set of classifiers into a 0-1 ILP, and the answers to queries about the
//! optimal joint assignment of labels.

pub(crate) mod lower;

use std::{
	collections::HashMap,
	fmt::{self, Debug},
};

use index_vec::IndexVec;
use thiserror::Error;
use tracing::{debug, error, trace};

use crate::{
	constraint::{Constraint, ConstraintError, Env, LabelLookup},
	formula::{Formula, GroundLiteral},
	ilp::IlpVar,
	inference::lower::Lowering,
	normalizer::{IdentityNormalizer, Normalizer},
	solver::{balas::BalasSolver, IlpSolver, SolverConfig},
	variable::{LabelVar, LabelVarId, LabelVariable, VariableRegistry},
	ClassifierId, ExampleId, Score,
};

/// A source of scores for the candidate labels of examples of type `E`.
pub trait ScoreProvider<E> {
	/// The name of the classifier, used in diagnostics.
	fn name(&self) -> &str;

	/// The scores of the candidate labels of `example`, where larger scores are
	/// better.
	fn scores(&self, example: &E) -> Vec<Score>;
}

/// A [`ScoreProvider`] defined by a name and a function.
pub struct ScoreFn<F> {
	/// The name of the classifier.
	name: String,
	/// The function computing the scores.
	f: F,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// The amount of diagnostic output produced during inference.
pub enum Verbosity {
	#[default]
	/// No output beyond warnings and errors.
	None,
	/// Phase markers and the sizes of the generated problem, as `debug` events.
	Low,
	/// Every column, gate and the full problem text, as `trace` events.
	High,
}

#[derive(Clone, Debug, Default, PartialEq)]
/// Configuration of an [`Inference`] session.
pub struct InferenceConfig {
	/// The configuration of the solver.
	solver: SolverConfig,
	/// The amount of diagnostic output.
	verbosity: Verbosity,
}

/// Errors that can occur during inference.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum InferenceError {
	/// A classifier did not return any scores for an example in the constraint.
	#[error("classifier `{classifier}' did not return any scores, its labels cannot be constrained")]
	NoScores {
		/// The name of the classifier.
		classifier: String,
	},
	/// The constraint could not be evaluated or propositionalized.
	#[error(transparent)]
	Constraint(#[from] ConstraintError),
	/// The constraints could not be satisfied.
	#[error("inference for `{head}' is not optimal, the constraints cannot be satisfied")]
	NotOptimal {
		/// The head object of the session.
		head: String,
		/// The problem given to the solver, in the textual format of
		/// [`crate::ZeroOneIlpProblem`].
		problem: String,
	},
	/// A label variable refers to a classifier or example that is not part of
	/// the session.
	#[error("label variable {0} refers to an unknown classifier or example")]
	UnknownVariable(LabelVar),
	/// A literal does not correspond to any candidate label after normalization.
	#[error("literal {0} does not correspond to a column of the ILP problem")]
	UnknownLiteral(GroundLiteral),
}

/// A classifier registered with a session.
struct Classifier<E> {
	/// The source of the scores.
	provider: Box<dyn ScoreProvider<E>>,
	/// The normalizer applied to the scores before they enter the objective.
	normalizer: Box<dyn Normalizer>,
}

/// Access to the scores and current labels of the variables of a session.
struct SessionLookup<'a, E> {
	/// The examples of the session.
	examples: &'a IndexVec<ExampleId, E>,
	/// The classifiers of the session.
	classifiers: &'a IndexVec<ClassifierId, Classifier<E>>,
	/// The registered label variables.
	registry: &'a VariableRegistry,
}

/// A constrained inference session scoped to a single head object.
///
/// The session owns the examples and classifiers, the constraint on their
/// labels, and the solver used to find the optimal joint assignment. The
/// assignment is computed lazily by [`Inference::infer`], and reused until the
/// constraint is changed.
pub struct Inference<E, S = BalasSolver> {
	/// Description of the head object, used in diagnostics.
	head: String,
	/// The examples, referred to by [`ExampleId`].
	examples: IndexVec<ExampleId, E>,
	/// The classifiers, referred to by [`ClassifierId`].
	classifiers: IndexVec<ClassifierId, Classifier<E>>,
	/// The constraint on the labels, if any has been added.
	constraint: Option<Constraint>,
	/// The canonical label variables.
	registry: VariableRegistry,
	/// The solver for the generated problem.
	solver: S,
	/// The configuration of the session.
	config: InferenceConfig,
	/// Whether the constraint was found to hold for every assignment.
	tautology: bool,
}

impl<E> Inference<E, BalasSolver> {
	/// Create a session for `head` that uses the [`BalasSolver`].
	pub fn new(head: impl Into<String>) -> Self {
		Self::with_config(head, InferenceConfig::default())
	}

	/// Create a session for `head` that uses the [`BalasSolver`] with the
	/// given configuration.
	pub fn with_config(head: impl Into<String>, config: InferenceConfig) -> Self {
		let solver = BalasSolver::new(config.solver().clone());
		Self::with_solver(head, solver, config)
	}
}

impl<E, S: IlpSolver> Inference<E, S> {
	/// Register a classifier, returning the identifier used to refer to it in
	/// constraints.
	pub fn add_classifier(&mut self, provider: impl ScoreProvider<E> + 'static) -> ClassifierId {
		self.classifiers.push(Classifier {
			provider: Box::new(provider),
			normalizer: Box::new(IdentityNormalizer),
		})
	}

	/// Add a constraint, which is conjoined with the constraints added before.
	///
	/// Any previously computed assignment is discarded.
	pub fn add_constraint(&mut self, constraint: Constraint) {
		self.constraint = Some(match self.constraint.take() {
			Some(prev) => Constraint::and(prev, constraint),
			None => constraint,
		});
		self.solver.reset();
		self.registry.clear_chosen();
		self.tautology = false;
	}

	/// Add an example, returning the identifier used to refer to it in
	/// constraints.
	pub fn add_example(&mut self, example: E) -> ExampleId {
		self.examples.push(example)
	}

	/// Access the configuration of the session.
	pub fn config(&self) -> &InferenceConfig {
		&self.config
	}

	/// Access the constraint of the session, if any has been added.
	pub fn constraint(&self) -> Option<&Constraint> {
		self.constraint.as_ref()
	}

	/// Access an example of the session.
	pub fn example(&self, id: ExampleId) -> Option<&E> {
		self.examples.get(id)
	}

	/// Description of the head object of the session.
	pub fn head(&self) -> &str {
		&self.head
	}

	/// Compute the optimal assignment of labels that satisfies the constraint,
	/// unless it has already been computed.
	///
	/// When the constraint holds for every assignment, no problem is solved, and
	/// every variable takes the label preferred by its classifier.
	#[tracing::instrument(level = "debug", skip_all, fields(head = %self.head))]
	pub fn infer(&mut self) -> Result<(), InferenceError> {
		if self.tautology || self.solver.is_solved() {
			return Ok(());
		}
		let Some(constraint) = &self.constraint else {
			self.tautology = true;
			return Ok(());
		};
		let verbosity = self.config.verbosity();
		// a previous attempt may have failed after building (part of) the problem
		self.solver.reset();
		self.solver.set_maximize(true);
		constraint.consolidate_variables(&mut self.registry, &Env::root())?;

		let lookup = SessionLookup {
			examples: &self.examples,
			classifiers: &self.classifiers,
			registry: &self.registry,
		};
		let mut columns: HashMap<GroundLiteral, IlpVar> = HashMap::new();
		let mut blocks: Vec<(LabelVarId, Vec<(IlpVar, String)>)> = Vec::with_capacity(self.registry.len());
		for (id, v) in self.registry.iter_enumerated() {
			let var = v.var();
			let (Some(classifier), Some(_)) = (self.classifiers.get(var.classifier), self.examples.get(var.example))
			else {
				return Err(InferenceError::UnknownVariable(var));
			};
			let scores = classifier
				.normalizer
				.normalize(lookup.scores(var).to_vec());
			if scores.is_empty() {
				return Err(InferenceError::NoScores {
					classifier: classifier.provider.name().to_owned(),
				});
			}
			let objective: Vec<f64> = scores.iter().map(|s| s.value).collect();
			let xs = self.solver.add_discrete_variable(&objective);
			let mut block = Vec::with_capacity(xs.len());
			for (s, x) in scores.into_iter().zip(xs) {
				if verbosity >= Verbosity::High {
					trace!(column = %x, score = s.value, variable = %var, label = %s.label, "allocate column");
				}
				let _ = columns.insert(
					GroundLiteral {
						classifier: var.classifier,
						example: var.example,
						label: s.label.clone(),
					},
					x,
				);
				block.push((x, s.label));
			}
			blocks.push((id, block));
		}
		if verbosity >= Verbosity::Low {
			debug!(
				variables = blocks.len(),
				columns = columns.len(),
				"allocated label variables"
			);
		}

		let formula = constraint
			.propositionalize(&Env::root(), &lookup)?
			.simplify_top_level();
		if verbosity >= Verbosity::High {
			trace!(%formula, "simplified constraint");
		}
		match formula {
			Formula::Constant(true) => {
				if verbosity >= Verbosity::Low {
					debug!("constraint holds for every assignment");
				}
				self.tautology = true;
				return Ok(());
			}
			Formula::Constant(false) => {
				error!(head = %self.head, "unsatisfiable constraints");
				let _ = self.solver.add_equality_constraint(Vec::new(), 1.0);
			}
			f => {
				let mut lowering = Lowering::new(&mut self.solver, &columns);
				lowering.lower(&f)?;
				let gates = lowering.gates();
				if verbosity >= Verbosity::Low {
					debug!(
						gates,
						rows = self.solver.problem().rows(),
						"lowered constraint"
					);
				}
			}
		}
		if verbosity >= Verbosity::High {
			let mut text = String::new();
			if self.solver.write(&mut text).is_ok() {
				trace!(problem = %text, "generated problem");
			}
		}

		if !self.solver.solve() {
			let mut problem = String::new();
			let _ = self.solver.write(&mut problem);
			return Err(InferenceError::NotOptimal {
				head: self.head.clone(),
				problem,
			});
		}
		if verbosity >= Verbosity::Low {
			debug!(
				objective = self.solver.objective_value(),
				"found optimal assignment"
			);
		}
		for (id, block) in blocks {
			if let Some((_, label)) = block
				.into_iter()
				.find(|(x, _)| self.solver.boolean_value(*x))
			{
				self.registry.set_chosen(id, label);
			}
		}
		Ok(())
	}

	/// The label preferred by `classifier` for `example` without any
	/// constraints, i.e., the label with the largest score after the normalizer
	/// of the classifier is applied.
	pub fn local_prediction(&self, classifier: ClassifierId, example: ExampleId) -> Option<String> {
		let var = LabelVar::new(classifier, example);
		let lookup = self.lookup();
		let fetched;
		let scores = if self.registry.get(var).is_some() {
			lookup.scores(var)
		} else {
			fetched = lookup.fetch(var);
			&fetched
		};
		lookup.preferred(var, scores).map(|s| s.label.clone())
	}

	/// Access the scores and labels of the variables of the session.
	fn lookup(&self) -> SessionLookup<'_, E> {
		SessionLookup {
			examples: &self.examples,
			classifiers: &self.classifiers,
			registry: &self.registry,
		}
	}

	/// Evaluate the constraint using the current labels of the variables.
	///
	/// Variables without an inferred label are evaluated using their local
	/// prediction.
	pub fn satisfied(&mut self) -> Result<bool, InferenceError> {
		let Some(constraint) = &self.constraint else {
			return Ok(true);
		};
		constraint.consolidate_variables(&mut self.registry, &Env::root())?;
		let lookup = SessionLookup {
			examples: &self.examples,
			classifiers: &self.classifiers,
			registry: &self.registry,
		};
		Ok(constraint.evaluate(&Env::root(), &lookup)?)
	}

	/// Replace the normalizer applied to the scores of `classifier`.
	pub fn set_normalizer(&mut self, classifier: ClassifierId, normalizer: impl Normalizer + 'static) {
		self.classifiers[classifier].normalizer = Box::new(normalizer);
	}

	/// Access the solver, e.g., to inspect the generated problem.
	pub fn solver(&self) -> &S {
		&self.solver
	}

	/// The label of `classifier` for `example` in the optimal assignment,
	/// performing inference if required.
	///
	/// Variables that do not occur in the constraint take the label preferred
	/// by their classifier.
	pub fn value_of(&mut self, classifier: ClassifierId, example: ExampleId) -> Result<String, InferenceError> {
		self.infer()?;
		let var = LabelVar::new(classifier, example);
		let Some(provider) = self.classifiers.get(classifier).map(|c| &c.provider) else {
			return Err(InferenceError::UnknownVariable(var));
		};
		if self.examples.get(example).is_none() {
			return Err(InferenceError::UnknownVariable(var));
		}
		if let Some(label) = self.registry.get(var).and_then(LabelVariable::chosen) {
			return Ok(label.to_owned());
		}
		let name = provider.name().to_owned();
		self.local_prediction(classifier, example)
			.ok_or(InferenceError::NoScores { classifier: name })
	}

	/// Iterate over the label variables of the session, in the order in which
	/// they were first encountered in the constraint.
	pub fn variables(&self) -> impl Iterator<Item = &LabelVariable> + '_ {
		self.registry.iter()
	}

	/// Create a session for `head` that uses the given solver.
	pub fn with_solver(head: impl Into<String>, solver: S, config: InferenceConfig) -> Self {
		Self {
			head: head.into(),
			examples: IndexVec::new(),
			classifiers: IndexVec::new(),
			constraint: None,
			registry: VariableRegistry::default(),
			solver,
			config,
			tautology: false,
		}
	}
}

impl<E, S: Debug> Debug for Inference<E, S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Inference")
			.field("head", &self.head)
			.field("examples", &self.examples.len())
			.field("classifiers", &self.classifiers.len())
			.field("constraint", &self.constraint)
			.field("registry", &self.registry)
			.field("solver", &self.solver)
			.field("config", &self.config)
			.field("tautology", &self.tautology)
			.finish()
	}
}

impl InferenceConfig {
	/// Get the configuration of the solver.
	pub fn solver(&self) -> &SolverConfig {
		&self.solver
	}

	/// Get the amount of diagnostic output.
	pub fn verbosity(&self) -> Verbosity {
		self.verbosity
	}

	/// Change the configuration of the solver.
	pub fn with_solver(mut self, solver: SolverConfig) -> Self {
		self.solver = solver;
		self
	}

	/// Change the amount of diagnostic output.
	pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
		self.verbosity = verbosity;
		self
	}
}

impl<F> ScoreFn<F> {
	/// Create a classifier named `name` that computes its scores using `f`.
	pub fn new(name: impl Into<String>, f: F) -> Self {
		Self {
			name: name.into(),
			f,
		}
	}
}

impl<F> Debug for ScoreFn<F> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ScoreFn")
			.field("name", &self.name)
			.finish_non_exhaustive()
	}
}

impl<E, F: Fn(&E) -> Vec<Score>> ScoreProvider<E> for ScoreFn<F> {
	fn name(&self) -> &str {
		&self.name
	}

	fn scores(&self, example: &E) -> Vec<Score> {
		(self.f)(example)
	}
}

impl<E> SessionLookup<'_, E> {
	/// Ask the classifier of `var` for the scores of its example.
	fn fetch(&self, var: LabelVar) -> Vec<Score> {
		match (
			self.classifiers.get(var.classifier),
			self.examples.get(var.example),
		) {
			(Some(c), Some(e)) => c.provider.scores(e),
			_ => Vec::new(),
		}
	}

	/// The entry of `scores` with the largest value once the normalizer of the
	/// classifier of `var` is applied.
	fn preferred<'s>(&self, var: LabelVar, scores: &'s [Score]) -> Option<&'s Score> {
		let normalized = match self.classifiers.get(var.classifier) {
			Some(c) => c.normalizer.normalize(scores.to_vec()),
			None => scores.to_vec(),
		};
		let best = Score::arg_max(&normalized)?;
		scores.iter().find(|s| s.label == best.label)
	}
}

impl<E> LabelLookup for SessionLookup<'_, E> {
	fn scores(&self, var: LabelVar) -> &[Score] {
		match self.registry.get(var) {
			Some(v) => v.scores_or_fetch(|| self.fetch(var)),
			None => &[],
		}
	}

	fn value(&self, var: LabelVar) -> Option<&str> {
		let v = self.registry.get(var)?;
		v.chosen()
			.or_else(|| self.preferred(var, self.scores(var)).map(|s| s.label.as_str()))
	}
}

#[cfg(test)]
mod tests {
	use tracing_test::traced_test;

	use crate::{
		constraint::{Constraint, VarTerm},
		inference::{Inference, InferenceConfig, InferenceError, ScoreFn, Verbosity},
		normalizer::Sigmoid,
		solver::{exhaustive::ExhaustiveSolver, IlpSolver},
		variable::{LabelVar, LabelVariable},
		ClassifierId, ExampleId, Score, Value,
	};

	/// A classifier that returns the given scores for every example.
	fn fixed(name: &str, scores: &[(&'static str, f64)]) -> ScoreFn<impl Fn(&()) -> Vec<Score>> {
		let scores: Vec<Score> = scores.iter().map(|&(l, v)| Score::new(l, v)).collect();
		ScoreFn::new(name, move |_: &()| scores.clone())
	}

	#[test]
	#[traced_test]
	fn test_unconstrained_variables_use_local_prediction() {
		let mut inf: Inference<()> = Inference::new("doc");
		let e = inf.add_example(());
		let c = inf.add_classifier(fixed("c", &[("A", 0.2), ("B", 0.7), ("C", 0.7)]));
		assert_eq!(inf.value_of(c, e), Ok("B".to_owned()));
		assert_eq!(inf.satisfied(), Ok(true));
		assert_eq!(inf.head(), "doc");
		assert_eq!(
			inf.value_of(ClassifierId::new(3), e),
			Err(InferenceError::UnknownVariable(LabelVar::new(ClassifierId::new(3), e)))
		);
	}

	#[test]
	#[traced_test]
	fn test_missing_scores() {
		let mut inf: Inference<()> = Inference::new("doc");
		let e = inf.add_example(());
		let c0 = inf.add_classifier(fixed("empty", &[]));
		let c1 = inf.add_classifier(fixed("full", &[("A", 1.0)]));
		inf.add_constraint(Constraint::vars_ne(VarTerm::fixed(c0, e), VarTerm::fixed(c1, e)));
		let err = inf.infer().unwrap_err();
		assert_eq!(
			err,
			InferenceError::NoScores {
				classifier: "empty".to_owned()
			}
		);
		assert_eq!(
			err.to_string(),
			"classifier `empty' did not return any scores, its labels cannot be constrained"
		);
	}

	#[test]
	#[traced_test]
	fn test_add_constraint_resets() {
		let mut inf: Inference<()> = Inference::with_config(
			"doc",
			InferenceConfig::default().with_verbosity(Verbosity::High),
		);
		let e = inf.add_example(());
		let c = inf.add_classifier(fixed("c", &[("A", 0.9), ("B", 0.5), ("C", 0.1)]));
		let v = VarTerm::fixed(c, e);
		inf.add_constraint(Constraint::label_ne(v.clone(), "C"));
		assert_eq!(inf.value_of(c, e), Ok("A".to_owned()));
		assert!(logs_contain("allocate column"));

		inf.add_constraint(Constraint::label_ne(v, "A"));
		assert!(!inf.solver().is_solved());
		assert_eq!(inf.value_of(c, e), Ok("B".to_owned()));
		assert_eq!(inf.satisfied(), Ok(true));
		assert_eq!(inf.variables().count(), 1);
		assert_eq!(
			inf.variables().next().and_then(LabelVariable::chosen),
			Some("B")
		);
	}

	#[test]
	#[traced_test]
	fn test_normalizer_override() {
		let mut inf: Inference<()> = Inference::new("doc");
		let e = inf.add_example(());
		let c0 = inf.add_classifier(fixed("c0", &[("A", 10.0), ("B", 0.0)]));
		let c1 = inf.add_classifier(fixed("c1", &[("A", 0.0), ("B", 8.0)]));
		inf.add_constraint(Constraint::vars_eq(VarTerm::fixed(c0, e), VarTerm::fixed(c1, e)));
		assert_eq!(inf.value_of(c1, e), Ok("A".to_owned()));

		let mut inf2: Inference<()> = Inference::new("doc");
		let e = inf2.add_example(());
		let c0 = inf2.add_classifier(fixed("c0", &[("A", 10.0), ("B", 0.0)]));
		let c1 = inf2.add_classifier(fixed("c1", &[("A", 0.0), ("B", 8.0)]));
		inf2.set_normalizer(c0, Sigmoid::default());
		inf2.add_constraint(Constraint::vars_eq(VarTerm::fixed(c0, e), VarTerm::fixed(c1, e)));
		assert_eq!(inf2.value_of(c0, e), Ok("B".to_owned()));
		assert_eq!(inf2.value_of(c1, e), Ok("B".to_owned()));
	}

	#[test]
	#[traced_test]
	fn test_local_prediction_is_normalized() {
		let mut inf: Inference<()> = Inference::new("doc");
		let e = inf.add_example(());
		let c = inf.add_classifier(fixed("c", &[("A", 0.9), ("B", 0.1)]));
		let d = inf.add_classifier(fixed("d", &[("A", 0.9), ("B", 0.1)]));
		assert_eq!(inf.local_prediction(c, e), Some("A".to_owned()));
		inf.set_normalizer(c, Sigmoid { alpha: -1.0 });
		assert_eq!(inf.local_prediction(c, e), Some("B".to_owned()));
		assert_eq!(inf.value_of(c, e), Ok("B".to_owned()));

		// unconstrained variables evaluate to their normalized preference
		inf.add_constraint(Constraint::implication(
			Constraint::label_eq(VarTerm::fixed(d, e), "A"),
			Constraint::label_eq(VarTerm::fixed(c, e), "B"),
		));
		assert_eq!(inf.satisfied(), Ok(true));
	}

	#[test]
	#[traced_test]
	fn test_generic_solver() {
		let mut inf: Inference<(), ExhaustiveSolver> =
			Inference::with_solver("doc", ExhaustiveSolver::default(), InferenceConfig::default());
		let examples: Vec<ExampleId> = (0..3).map(|_| inf.add_example(())).collect();
		let c = inf.add_classifier(fixed("c", &[("yes", 0.6), ("no", 0.4)]));
		inf.add_constraint(Constraint::at_most(
			1,
			examples.iter().map(|&e| Value::Example(e)).collect::<Vec<_>>(),
			Constraint::label_eq(VarTerm::bound(c, 0), "yes"),
		));
		let labels: Vec<String> = examples
			.iter()
			.map(|&e| inf.value_of(c, e).unwrap())
			.collect();
		assert_eq!(labels.iter().filter(|l| *l == "yes").count(), 1);
		assert!((inf.solver().objective_value() - 1.4).abs() < 1e-9);
	}
}
