//! Crate level tests: end-to-end inference scenarios, and randomized checks of
//! the formula rewriting and of the solvers against each other.

use expect_test::expect;
use itertools::Itertools;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing_test::traced_test;

use crate::{
	constraint::{Constraint, Env, LabelLookup, Value, VarTerm},
	formula::{Formula, GroundLiteral},
	ilp::{IlpVar, ZeroOneIlpProblem},
	inference::{Inference, InferenceError, ScoreFn},
	solver::{balas::BalasSolver, exhaustive::ExhaustiveSolver, IlpSolver, SolverConfig},
	variable::LabelVar,
	ClassifierId, ExampleId, Score,
};

/// Candidate labels used by the randomized inference checks.
const LABELS: [&str; 3] = ["a", "b", "c"];

/// A complete assignment of labels to the examples of a single classifier.
struct Assignment<'a> {
	/// The scores of each example.
	scores: &'a [Vec<Score>],
	/// The label of each example.
	labels: Vec<&'a str>,
}

impl LabelLookup for Assignment<'_> {
	fn scores(&self, var: LabelVar) -> &[Score] {
		&self.scores[var.example.index()]
	}

	fn value(&self, var: LabelVar) -> Option<&str> {
		self.labels.get(var.example.index()).copied()
	}
}

/// Returns whether `a` and `b` have the same truth table over the literals of
/// [`random_formula`].
fn equivalent(a: &Formula, b: &Formula) -> bool {
	(0..16_u32).all(|bits| {
		let val = |l: &GroundLiteral| ((bits >> l.example.index()) & 1) == 1;
		a.evaluate(&val) == b.evaluate(&val)
	})
}

/// Returns whether `f` is a constant or a (negated) literal.
fn is_leaf(f: &Formula) -> bool {
	matches!(f, Formula::Constant(_)) || f.is_literal()
}

/// Returns whether `f` is a conjunction of disjunctions of literals.
fn is_cnf(f: &Formula) -> bool {
	/// A disjunction of literals.
	fn clause(f: &Formula) -> bool {
		is_leaf(f) || matches!(f, Formula::Disjunction(ch) if ch.iter().all(is_leaf))
	}
	clause(f) || matches!(f, Formula::Conjunction(ch) if ch.iter().all(clause))
}

/// Returns whether `f` is a disjunction of conjunctions of literals.
fn is_dnf(f: &Formula) -> bool {
	/// A conjunction of literals.
	fn term(f: &Formula) -> bool {
		is_leaf(f) || matches!(f, Formula::Conjunction(ch) if ch.iter().all(is_leaf))
	}
	term(f) || matches!(f, Formula::Disjunction(ch) if ch.iter().all(term))
}

/// Returns whether negations in `f` only occur directly on literals, and `f`
/// contains no implications.
fn is_nnf(f: &Formula) -> bool {
	match f {
		Formula::Constant(_) | Formula::Variable(_) => true,
		Formula::Negation(c) => matches!(c.as_ref(), Formula::Variable(_)),
		Formula::Conjunction(ch) | Formula::Disjunction(ch) => ch.iter().all(is_nnf),
		Formula::AtLeast(ch, _) => ch.iter().all(is_nnf),
		Formula::Implication(..) | Formula::DoubleImplication(..) => false,
	}
}

/// Build a random constraint over the labels of `classifier` for `examples`.
fn random_constraint(
	rng: &mut StdRng,
	classifier: ClassifierId,
	examples: &[ExampleId],
	depth: usize,
) -> Constraint {
	let n = examples.len();
	let i = rng.gen_range(0..n);
	let label = LABELS[rng.gen_range(0..LABELS.len())];
	if depth == 0 || rng.gen_bool(0.3) {
		let var = VarTerm::fixed(classifier, examples[i]);
		let other = VarTerm::fixed(classifier, examples[(i + rng.gen_range(1..n)) % n]);
		return match rng.gen_range(0..4) {
			0 => Constraint::label_eq(var, label),
			1 => Constraint::label_ne(var, label),
			2 => Constraint::vars_eq(var, other),
			_ => Constraint::vars_ne(var, other),
		};
	}
	let all: Vec<Value> = examples.iter().map(|&e| Value::Example(e)).collect();
	let body = if rng.gen_bool(0.5) {
		Constraint::label_eq(VarTerm::bound(classifier, 0), label)
	} else {
		Constraint::vars_ne(
			VarTerm::bound(classifier, 0),
			VarTerm::fixed(classifier, examples[i]),
		)
	};
	let m = rng.gen_range(0..=n as i64 + 1);
	match rng.gen_range(0..9) {
		0 => Constraint::negation(random_constraint(rng, classifier, examples, depth - 1)),
		1 => Constraint::and(
			random_constraint(rng, classifier, examples, depth - 1),
			random_constraint(rng, classifier, examples, depth - 1),
		),
		2 => Constraint::or(
			random_constraint(rng, classifier, examples, depth - 1),
			random_constraint(rng, classifier, examples, depth - 1),
		),
		3 => Constraint::implication(
			random_constraint(rng, classifier, examples, depth - 1),
			random_constraint(rng, classifier, examples, depth - 1),
		),
		4 => Constraint::equivalence(
			random_constraint(rng, classifier, examples, depth - 1),
			random_constraint(rng, classifier, examples, depth - 1),
		),
		5 => Constraint::forall(all, body),
		6 => Constraint::exists(all, body),
		7 => Constraint::at_least(m, all, body),
		_ => Constraint::at_most(m, all, body),
	}
}

/// Build a random formula over four literals.
fn random_formula(rng: &mut StdRng, depth: usize) -> Formula {
	if depth == 0 || rng.gen_bool(0.25) {
		return if rng.gen_bool(0.1) {
			Formula::Constant(rng.gen_bool(0.5))
		} else {
			Formula::literal(ClassifierId::new(0), ExampleId::new(rng.gen_range(0..4)), "a")
		};
	}
	match rng.gen_range(0..6) {
		0 => Formula::negation(random_formula(rng, depth - 1)),
		1 => Formula::conjunction(random_formulas(rng, depth - 1)),
		2 => Formula::disjunction(random_formulas(rng, depth - 1)),
		3 => Formula::implication(random_formula(rng, depth - 1), random_formula(rng, depth - 1)),
		4 => Formula::equivalence(random_formula(rng, depth - 1), random_formula(rng, depth - 1)),
		_ => {
			let children = random_formulas(rng, depth - 1);
			let m = rng.gen_range(0..=children.len() + 1);
			Formula::at_least(children, m)
		}
	}
}

/// Build one or two random formulas.
fn random_formulas(rng: &mut StdRng, depth: usize) -> Vec<Formula> {
	let n = rng.gen_range(1..=2);
	(0..n).map(|_| random_formula(rng, depth)).collect()
}

/// Build a random 0-1 ILP that is satisfied by at least one assignment.
fn random_problem(rng: &mut StdRng) -> ZeroOneIlpProblem {
	let n = rng.gen_range(1..=15);
	let mut problem = ZeroOneIlpProblem::default();
	problem.set_maximize(rng.gen_bool(0.5));
	let mut vars = Vec::with_capacity(n);
	let mut witness = Vec::with_capacity(n);
	for _ in 0..n {
		vars.push(problem.add_boolean_variable(f64::from(rng.gen_range(-5_i32..=5))));
		witness.push(rng.gen_bool(0.5));
	}
	for _ in 0..rng.gen_range(0..=5) {
		let mut terms: Vec<(IlpVar, f64)> = Vec::new();
		for &v in &vars {
			if rng.gen_bool(0.6) {
				terms.push((v, f64::from(rng.gen_range(-3_i32..=3))));
			}
		}
		let lhs: f64 = terms
			.iter()
			.filter(|(v, _)| witness[v.index()])
			.map(|(_, c)| c)
			.sum();
		let slack = f64::from(rng.gen_range(0_i32..=2));
		let _ = match rng.gen_range(0..3) {
			0 => problem.add_equality_constraint(terms, lhs),
			1 => problem.add_less_than_constraint(terms, lhs + slack),
			_ => problem.add_greater_than_constraint(terms, lhs - slack),
		};
	}
	problem
}

/// A classifier that returns the given scores for every example.
fn uniform<E>(name: &str, scores: &[(&'static str, f64)]) -> ScoreFn<impl Fn(&E) -> Vec<Score>> {
	let scores: Vec<Score> = scores.iter().map(|&(l, v)| Score::new(l, v)).collect();
	ScoreFn::new(name, move |_: &E| scores.clone())
}

#[test]
#[traced_test]
fn test_agreement_of_two_classifiers() {
	let mut inf: Inference<&'static str> = Inference::new("sentence");
	let e = inf.add_example("token");
	let c1 = inf.add_classifier(uniform("first", &[("A", 0.7), ("B", 0.3)]));
	let c2 = inf.add_classifier(uniform("second", &[("A", 0.2), ("B", 0.8)]));
	assert_eq!(inf.local_prediction(c1, e), Some("A".to_owned()));
	inf.add_constraint(Constraint::vars_eq(VarTerm::fixed(c1, e), VarTerm::fixed(c2, e)));

	assert_eq!(inf.value_of(c1, e), Ok("B".to_owned()));
	assert_eq!(inf.value_of(c2, e), Ok("B".to_owned()));
	assert!((inf.solver().objective_value() - 1.1).abs() < 1e-9);
	assert_eq!(inf.satisfied(), Ok(true));
	// the local prediction ignores the constraint
	assert_eq!(inf.local_prediction(c1, e), Some("A".to_owned()));
}

#[test]
#[traced_test]
fn test_at_least_two_of_three() {
	let mut inf: Inference<()> = Inference::new("poll");
	let examples: Vec<ExampleId> = (0..3).map(|_| inf.add_example(())).collect();
	let c = inf.add_classifier(uniform("vote", &[("yes", 0.6), ("no", 0.4)]));
	let all: Vec<Value> = examples.iter().map(|&e| Value::Example(e)).collect();
	inf.add_constraint(Constraint::at_least(
		2,
		all,
		Constraint::label_eq(VarTerm::bound(c, 0), "yes"),
	));

	let labels: Vec<String> = examples
		.iter()
		.map(|&e| inf.value_of(c, e).unwrap())
		.collect();
	assert_eq!(labels.iter().filter(|l| *l == "yes").count(), 2);
	assert!((inf.solver().objective_value() - 1.6).abs() < 1e-9);
}

#[test]
#[traced_test]
fn test_unsatisfiable_cardinality() {
	let mut inf: Inference<()> = Inference::new("poll");
	let examples: Vec<ExampleId> = (0..3).map(|_| inf.add_example(())).collect();
	let c = inf.add_classifier(uniform("vote", &[("yes", 0.6), ("no", 0.4)]));
	let all: Vec<Value> = examples.iter().map(|&e| Value::Example(e)).collect();
	inf.add_constraint(Constraint::at_least(
		4,
		all,
		Constraint::label_eq(VarTerm::bound(c, 0), "yes"),
	));

	let Err(InferenceError::NotOptimal { head, problem }) = inf.value_of(c, examples[0]) else {
		panic!("expected inference to fail");
	};
	assert!(logs_contain("unsatisfiable constraints"));
	assert_eq!(head, "poll");
	expect![[r#"
		max +0.6 x_0 +0.4 x_1 +0.6 x_2 +0.4 x_3 +0.6 x_4 +0.4 x_5
		  +1.0 x_0 +1.0 x_1 = 1.0
		  +1.0 x_2 +1.0 x_3 = 1.0
		  +1.0 x_4 +1.0 x_5 = 1.0
		  = 1.0
	"#]]
	.assert_eq(&problem);
	assert!(!inf.solver().is_solved());

	// retrying rebuilds the same problem
	let Err(InferenceError::NotOptimal { problem: again, .. }) = inf.infer() else {
		panic!("expected inference to fail");
	};
	assert_eq!(again, problem);
}

#[test]
#[traced_test]
fn test_disjunction_with_cardinality() {
	let mut rng = StdRng::seed_from_u64(11);
	for case in 0..40 {
		let votes: Vec<f64> = (0..3).map(|_| rng.gen_range(0.0..1.0)).collect();
		let veto: f64 = rng.gen_range(0.0..1.0);
		let table = votes.clone();
		let mut inf: Inference<usize> = Inference::new(format!("case {case}"));
		let examples: Vec<ExampleId> = (0..3).map(|i| inf.add_example(i)).collect();
		let c = inf.add_classifier(ScoreFn::new("vote", move |&i: &usize| {
			vec![Score::new("yes", table[i]), Score::new("no", 1.0 - table[i])]
		}));
		let v = inf.add_classifier(ScoreFn::new("veto", move |_: &usize| {
			vec![Score::new("A", veto), Score::new("B", 1.0 - veto)]
		}));
		let all: Vec<Value> = examples.iter().map(|&e| Value::Example(e)).collect();
		// two votes in favour, or the veto is overruled
		inf.add_constraint(Constraint::or(
			Constraint::at_least(2, all, Constraint::label_eq(VarTerm::bound(c, 0), "yes")),
			Constraint::label_eq(VarTerm::fixed(v, examples[0]), "A"),
		));

		let mut best = f64::NEG_INFINITY;
		for bits in 0..16_u32 {
			let overruled = bits & 0b1000 != 0;
			if (bits & 0b111).count_ones() < 2 && !overruled {
				continue;
			}
			let total: f64 = votes
				.iter()
				.enumerate()
				.map(|(i, &p)| if bits & (1 << i) != 0 { p } else { 1.0 - p })
				.sum::<f64>()
				+ if overruled { veto } else { 1.0 - veto };
			best = best.max(total);
		}

		inf.infer().unwrap();
		assert!(
			(inf.solver().objective_value() - best).abs() < 1e-9,
			"{case}: {votes:?} {veto}"
		);
		let yes = examples
			.iter()
			.filter(|&&e| inf.value_of(c, e).unwrap() == "yes")
			.count();
		let overruled = inf.value_of(v, examples[0]).unwrap() == "A";
		assert!(yes >= 2 || overruled, "{case}: {votes:?} {veto}");
		assert_eq!(inf.satisfied(), Ok(true));
	}
}

#[test]
#[traced_test]
fn test_inference_matches_enumeration() {
	let mut rng = StdRng::seed_from_u64(0x5eed);
	for case in 0..150 {
		let scores: Vec<Vec<Score>> = (0..3)
			.map(|_| {
				LABELS
					.iter()
					.map(|&l| Score::new(l, rng.gen_range(0.0..1.0)))
					.collect()
			})
			.collect();
		let table = scores.clone();
		let mut inf: Inference<usize> = Inference::new(format!("case {case}"));
		let examples: Vec<ExampleId> = (0..3).map(|i| inf.add_example(i)).collect();
		let c = inf.add_classifier(ScoreFn::new("c", move |&i: &usize| table[i].clone()));
		let constraint = random_constraint(&mut rng, c, &examples, 2);
		inf.add_constraint(constraint.clone());

		let mut best: Option<f64> = None;
		for labels in (0..examples.len())
			.map(|_| LABELS.iter().copied())
			.multi_cartesian_product()
		{
			let total: f64 = labels
				.iter()
				.zip(&scores)
				.map(|(l, s)| s.iter().find(|s| s.label == *l).unwrap().value)
				.sum();
			let lookup = Assignment {
				scores: &scores,
				labels,
			};
			if constraint.evaluate(&Env::root(), &lookup).unwrap() {
				best = Some(best.map_or(total, |b| b.max(total)));
			}
		}

		match best {
			None => assert!(
				matches!(inf.infer(), Err(InferenceError::NotOptimal { .. })),
				"{case}: {constraint:?}"
			),
			Some(best) => {
				let total: f64 = examples
					.iter()
					.map(|&e| {
						let label = inf.value_of(c, e).unwrap();
						scores[e.index()]
							.iter()
							.find(|s| s.label == label)
							.unwrap()
							.value
					})
					.sum();
				assert!((total - best).abs() < 1e-9, "{case}: {constraint:?}");
				assert_eq!(inf.satisfied(), Ok(true), "{case}: {constraint:?}");
			}
		}
	}
}

#[test]
#[traced_test]
fn test_balas_matches_exhaustive() {
	let mut rng = StdRng::seed_from_u64(42);
	for case in 0..300 {
		let problem = random_problem(&mut rng);
		let mut balas = BalasSolver::with_problem(problem.clone(), SolverConfig::default());
		let mut exhaustive = ExhaustiveSolver::with_problem(problem.clone(), SolverConfig::default());
		assert!(exhaustive.solve(), "{case}:\n{problem}");
		assert!(balas.solve(), "{case}:\n{problem}");
		assert!(
			(balas.objective_value() - exhaustive.objective_value()).abs() < 1e-9,
			"{case}:\n{problem}"
		);
		let solution = balas.solution().unwrap();
		assert!(problem.constraints_satisfied(solution), "{case}:\n{problem}");
		assert!((problem.evaluate(solution) - balas.objective_value()).abs() < 1e-9);
	}
}

#[test]
#[traced_test]
fn test_contradictory_rows() {
	let mut problem = ZeroOneIlpProblem::default();
	let x = problem.add_boolean_variable(1.0);
	let _ = problem.add_equality_constraint([(x, 1.0)], 1.0);
	let _ = problem.add_equality_constraint([(x, 1.0)], 0.0);
	for mut slv in [
		SolverConfig::default().build(problem.clone(), false),
		SolverConfig::default().build(problem.clone(), true),
	] {
		assert!(!slv.solve());
		assert!(!slv.is_solved());
	}
}

#[test]
#[traced_test]
fn test_formula_rewriting() {
	let mut rng = StdRng::seed_from_u64(7);
	for _ in 0..300 {
		let f = random_formula(&mut rng, 3);
		assert!(equivalent(&f.negate().negate(), &f), "{f}");
		assert!(equivalent(&f.factor(), &f), "{f}");
		assert!(!equivalent(&f.negate(), &f), "{f}");
		assert!(is_nnf(&f.negate()), "{f} => {}", f.negate());
		assert!(is_nnf(&f.nnf()), "{f} => {}", f.nnf());
		assert!(equivalent(&f.nnf(), &f), "{f}");

		let simple = f.simplify();
		assert_eq!(simple.simplify(), simple, "{f}");
		assert!(equivalent(&simple, &f), "{f}");

		// normal forms can be exponentially larger
		let f = random_formula(&mut rng, 2);
		let cnf = f.cnf();
		assert!(is_cnf(&cnf), "{f} => {cnf}");
		assert!(equivalent(&cnf, &f), "{f} => {cnf}");

		let dnf = f.dnf();
		assert!(is_dnf(&dnf), "{f} => {dnf}");
		assert!(equivalent(&dnf, &f), "{f} => {dnf}");
	}
}
