//! First-order constraints over label variables.
//!
//! A [`Constraint`] may quantify over finite collections of [`Value`]s. The
//! values bound by the enclosing quantifiers are passed explicitly to every
//! operation as an [`Env`], and are read by [`Term::Bound`] leaves using the
//! nesting depth of the quantifier that bound them (the outermost quantifier
//! binds depth 0).

use std::{
	fmt::{self, Debug},
	sync::Arc,
};

use thiserror::Error;

use crate::{
	formula::Formula,
	variable::{LabelVar, VariableRegistry},
	ClassifierId, ExampleId, Score,
};

/// Function computing the value of a [`Term::Derived`] from the quantification
/// variables in scope.
pub type DeriveFn<T> = Arc<dyn Fn(&Env<'_>) -> Result<T, ConstraintError> + Send + Sync>;

/// Function building the constraint of a [`Constraint::Invocation`] from its
/// argument.
pub type InvokeFn = Arc<dyn Fn(&Value) -> Constraint + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// A value that can be bound to a quantification variable.
pub enum Value {
	/// An example of the inference session.
	Example(ExampleId),
	/// A label.
	Label(String),
	/// An integer, such as the bound of a nested cardinality quantifier.
	Integer(i64),
	/// A collection of values, over which a nested quantifier may range.
	List(Vec<Value>),
}

#[derive(Clone, Copy, Debug)]
/// The values bound by the enclosing quantifiers, one per nesting depth.
pub struct Env<'a> {
	/// The environment of the enclosing quantifier.
	parent: Option<&'a Env<'a>>,
	/// The value bound by the innermost quantifier.
	value: Option<&'a Value>,
	/// The number of bound values.
	len: usize,
}

/// A leaf of a constraint that is either given directly, or depends on the
/// values bound by the enclosing quantifiers.
pub enum Term<T> {
	/// A value known when the constraint is built.
	Fixed(T),
	/// The value bound by the quantifier at the given nesting depth.
	Bound(usize),
	/// A value computed from the quantification variables in scope.
	Derived(DeriveFn<T>),
}

/// Types that can be read from a [`Value`] bound to a quantification variable.
pub trait FromValue: Clone {
	/// Description of the expected kind of value, used in error messages.
	const KIND: &'static str;

	/// Read the value, returning `None` if it is of the wrong kind.
	fn from_value(value: &Value) -> Option<Self>;
}

#[derive(Clone, Debug, PartialEq)]
/// Reference to a label variable, in which the example may depend on the
/// quantification variables in scope.
pub struct VarTerm {
	/// The classifier that predicts the label.
	pub classifier: ClassifierId,
	/// The example for which the label is predicted.
	pub example: Term<ExampleId>,
}

#[derive(Clone, Debug, PartialEq)]
/// A quantifier's collection together with the body that is instantiated for
/// every element.
pub struct Quantifier {
	/// The collection over which the quantification variable ranges.
	pub collection: Term<Vec<Value>>,
	/// The constraint instantiated for every element of the collection.
	pub body: Box<Constraint>,
}

#[derive(Clone)]
/// A constraint that is built on demand from an argument, which may depend on
/// the quantification variables in scope.
///
/// The built constraint does not see the quantification variables of the
/// invocation, only the argument.
pub struct Invocation {
	/// The argument passed to `make`.
	pub argument: Term<Value>,
	/// The function building the constraint.
	pub make: InvokeFn,
}

#[derive(Clone, Debug)]
/// A first-order constraint.
///
/// Conjunctions and disjunctions are flattened and deduplicated when built
/// using [`Constraint::conjunction`] and [`Constraint::disjunction`], and their
/// equality does not depend on the order of their children.
pub enum Constraint {
	/// A Boolean constant.
	Constant(bool),
	/// Compare two label values.
	EqualityOfValues {
		/// The left-hand side.
		left: Term<String>,
		/// The right-hand side.
		right: Term<String>,
		/// Whether the values must be equal, rather than different.
		equal: bool,
	},
	/// Compare the label of a variable with a label value.
	EqualityWithConstant {
		/// The label variable.
		var: VarTerm,
		/// The label compared against.
		label: Term<String>,
		/// Whether the labels must be equal, rather than different.
		equal: bool,
	},
	/// Compare the labels of two variables.
	EqualityOfVariables {
		/// The left-hand side.
		left: VarTerm,
		/// The right-hand side.
		right: VarTerm,
		/// Whether the labels must be equal, rather than different.
		equal: bool,
	},
	/// The negation of a constraint.
	Negation(Box<Constraint>),
	/// All children must hold.
	Conjunction(Vec<Constraint>),
	/// At least one child must hold.
	Disjunction(Vec<Constraint>),
	/// When the left constraint holds, the right constraint must hold.
	Implication(Box<Constraint>, Box<Constraint>),
	/// Both constraints hold or neither does.
	DoubleImplication(Box<Constraint>, Box<Constraint>),
	/// The body holds for every element of the collection.
	Universal(Quantifier),
	/// The body holds for some element of the collection.
	Existential(Quantifier),
	/// The body holds for at least `m` elements of the collection.
	///
	/// The bound is resolved in the environment of the quantifier, and negative
	/// values are treated as zero.
	AtLeast(Term<i64>, Quantifier),
	/// The body holds for at most `m` elements of the collection.
	///
	/// The bound is resolved in the environment of the quantifier, and negative
	/// values are treated as zero.
	AtMost(Term<i64>, Quantifier),
	/// A constraint built from an argument.
	Invocation(Invocation),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
/// Errors that can occur when evaluating or propositionalizing a
/// [`Constraint`].
pub enum ConstraintError {
	/// A quantification variable was read that is not bound by any enclosing
	/// quantifier.
	#[error(
		"quantification variable at depth {depth} is read, but only {bound} quantification variables are bound"
	)]
	UnboundQuantification {
		/// The depth of the variable that was read.
		depth: usize,
		/// The number of bound quantification variables.
		bound: usize,
	},
	/// A quantification variable was bound to a value of the wrong kind.
	#[error("quantification variable at depth {depth} is bound to `{found}', but {expected} was expected")]
	BindingKind {
		/// The depth of the variable that was read.
		depth: usize,
		/// The expected kind of value.
		expected: &'static str,
		/// The bound value.
		found: Value,
	},
}

/// Access to the scores and the current labels of label variables, used when
/// evaluating and propositionalizing constraints.
pub trait LabelLookup {
	/// The scores of the candidate labels of `var`.
	fn scores(&self, var: LabelVar) -> &[Score];

	/// The current label of `var`, if it is known.
	fn value(&self, var: LabelVar) -> Option<&str>;
}

impl Constraint {
	/// Create a conjunction of `a` and `b`.
	pub fn and(a: Constraint, b: Constraint) -> Self {
		Self::conjunction([a, b])
	}

	/// Create a constraint that holds when `body` holds for at least `m`
	/// elements of `collection`. Negative values of `m` are treated as zero.
	pub fn at_least(m: i64, collection: impl Into<Term<Vec<Value>>>, body: Constraint) -> Self {
		Constraint::AtLeast(Term::Fixed(m), Quantifier::new(collection, body))
	}

	/// Create a constraint that holds when `body` holds for at most `m`
	/// elements of `collection`. Negative values of `m` are treated as zero.
	pub fn at_most(m: i64, collection: impl Into<Term<Vec<Value>>>, body: Constraint) -> Self {
		Constraint::AtMost(Term::Fixed(m), Quantifier::new(collection, body))
	}

	/// Register the label variables referenced by the constraint in `registry`,
	/// expanding quantifiers to discover the variables of every instantiation.
	pub fn consolidate_variables(
		&self,
		registry: &mut VariableRegistry,
		env: &Env<'_>,
	) -> Result<(), ConstraintError> {
		match self {
			Constraint::Constant(_) | Constraint::EqualityOfValues { .. } => {}
			Constraint::EqualityWithConstant { var, .. } => {
				let _ = registry.register(var.resolve(env)?);
			}
			Constraint::EqualityOfVariables { left, right, .. } => {
				let _ = registry.register(left.resolve(env)?);
				let _ = registry.register(right.resolve(env)?);
			}
			Constraint::Negation(c) => c.consolidate_variables(registry, env)?,
			Constraint::Conjunction(ch) | Constraint::Disjunction(ch) => {
				for c in ch {
					c.consolidate_variables(registry, env)?;
				}
			}
			Constraint::Implication(l, r) | Constraint::DoubleImplication(l, r) => {
				l.consolidate_variables(registry, env)?;
				r.consolidate_variables(registry, env)?;
			}
			Constraint::Universal(q)
			| Constraint::Existential(q)
			| Constraint::AtLeast(_, q)
			| Constraint::AtMost(_, q) => {
				for v in q.collection.resolve(env)? {
					q.body.consolidate_variables(registry, &env.bind(&v))?;
				}
			}
			Constraint::Invocation(inv) => {
				inv.build(env)?
					.consolidate_variables(registry, &Env::root())?;
			}
		}
		Ok(())
	}

	/// Create a conjunction of the given constraints.
	pub fn conjunction(children: impl IntoIterator<Item = Constraint>) -> Self {
		Constraint::Conjunction(collect_children(children, |c| match c {
			Constraint::Conjunction(ch) => Ok(ch),
			c => Err(c),
		}))
	}

	/// Create a disjunction of the given constraints.
	pub fn disjunction(children: impl IntoIterator<Item = Constraint>) -> Self {
		Constraint::Disjunction(collect_children(children, |c| match c {
			Constraint::Disjunction(ch) => Ok(ch),
			c => Err(c),
		}))
	}

	/// Create a double implication between `left` and `right`.
	pub fn equivalence(left: Constraint, right: Constraint) -> Self {
		Constraint::DoubleImplication(Box::new(left), Box::new(right))
	}

	/// Evaluate the constraint using the current labels of the label variables.
	///
	/// Quantifiers stop instantiating their body as soon as the outcome is
	/// decided: [`Constraint::AtLeast`] stops once `m` instantiations hold, and
	/// [`Constraint::AtMost`] stops once more than `m` instantiations hold.
	pub fn evaluate(&self, env: &Env<'_>, lookup: &dyn LabelLookup) -> Result<bool, ConstraintError> {
		Ok(match self {
			Constraint::Constant(b) => *b,
			Constraint::EqualityOfValues { left, right, equal } => {
				(left.resolve(env)? == right.resolve(env)?) == *equal
			}
			Constraint::EqualityWithConstant { var, label, equal } => {
				let var = var.resolve(env)?;
				let label = label.resolve(env)?;
				(lookup.value(var) == Some(label.as_str())) == *equal
			}
			Constraint::EqualityOfVariables { left, right, equal } => {
				let (left, right) = (left.resolve(env)?, right.resolve(env)?);
				(lookup.value(left) == lookup.value(right)) == *equal
			}
			Constraint::Negation(c) => !c.evaluate(env, lookup)?,
			Constraint::Conjunction(ch) => {
				for c in ch {
					if !c.evaluate(env, lookup)? {
						return Ok(false);
					}
				}
				true
			}
			Constraint::Disjunction(ch) => {
				for c in ch {
					if c.evaluate(env, lookup)? {
						return Ok(true);
					}
				}
				false
			}
			Constraint::Implication(l, r) => !l.evaluate(env, lookup)? || r.evaluate(env, lookup)?,
			Constraint::DoubleImplication(l, r) => l.evaluate(env, lookup)? == r.evaluate(env, lookup)?,
			Constraint::Universal(q) => {
				for v in q.collection.resolve(env)? {
					if !q.body.evaluate(&env.bind(&v), lookup)? {
						return Ok(false);
					}
				}
				true
			}
			Constraint::Existential(q) => {
				for v in q.collection.resolve(env)? {
					if q.body.evaluate(&env.bind(&v), lookup)? {
						return Ok(true);
					}
				}
				false
			}
			Constraint::AtLeast(m, q) => {
				let m = resolve_bound(m, env)?;
				let mut satisfied = 0;
				for v in q.collection.resolve(env)? {
					if satisfied >= m {
						break;
					}
					if q.body.evaluate(&env.bind(&v), lookup)? {
						satisfied += 1;
					}
				}
				satisfied == m
			}
			Constraint::AtMost(m, q) => {
				let m = resolve_bound(m, env)?;
				let mut satisfied = 0;
				for v in q.collection.resolve(env)? {
					if satisfied > m {
						break;
					}
					if q.body.evaluate(&env.bind(&v), lookup)? {
						satisfied += 1;
					}
				}
				satisfied <= m
			}
			Constraint::Invocation(inv) => inv.build(env)?.evaluate(&Env::root(), lookup)?,
		})
	}

	/// Create a constraint that holds when `body` holds for some element of
	/// `collection`.
	pub fn exists(collection: impl Into<Term<Vec<Value>>>, body: Constraint) -> Self {
		Constraint::Existential(Quantifier::new(collection, body))
	}

	/// Create a constraint that holds when `body` holds for every element of
	/// `collection`.
	pub fn forall(collection: impl Into<Term<Vec<Value>>>, body: Constraint) -> Self {
		Constraint::Universal(Quantifier::new(collection, body))
	}

	/// Create an implication `left ⇒ right`.
	pub fn implication(left: Constraint, right: Constraint) -> Self {
		Constraint::Implication(Box::new(left), Box::new(right))
	}

	/// Create a constraint built on demand by `make` from `argument`.
	pub fn invoke(
		argument: impl Into<Term<Value>>,
		make: impl Fn(&Value) -> Constraint + Send + Sync + 'static,
	) -> Self {
		Constraint::Invocation(Invocation {
			argument: argument.into(),
			make: Arc::new(make),
		})
	}

	/// Create the constraint that `var` is labeled `label`.
	pub fn label_eq(var: VarTerm, label: impl Into<Term<String>>) -> Self {
		Constraint::EqualityWithConstant {
			var,
			label: label.into(),
			equal: true,
		}
	}

	/// Create the constraint that `var` is not labeled `label`.
	pub fn label_ne(var: VarTerm, label: impl Into<Term<String>>) -> Self {
		Constraint::EqualityWithConstant {
			var,
			label: label.into(),
			equal: false,
		}
	}

	/// Create the negation of `c`.
	pub fn negation(c: Constraint) -> Self {
		Constraint::Negation(Box::new(c))
	}

	/// Create a disjunction of `a` and `b`.
	pub fn or(a: Constraint, b: Constraint) -> Self {
		Self::disjunction([a, b])
	}

	/// Expand the quantifiers of the constraint, and translate the result into a
	/// ground propositional formula over the candidate labels of the label
	/// variables.
	pub fn propositionalize(&self, env: &Env<'_>, lookup: &dyn LabelLookup) -> Result<Formula, ConstraintError> {
		Ok(match self {
			Constraint::Constant(b) => Formula::Constant(*b),
			Constraint::EqualityOfValues { left, right, equal } => {
				Formula::Constant((left.resolve(env)? == right.resolve(env)?) == *equal)
			}
			Constraint::EqualityWithConstant { var, label, equal } => {
				let var = var.resolve(env)?;
				let label = label.resolve(env)?;
				let lit = if lookup.scores(var).iter().any(|s| s.label == label) {
					Formula::literal(var.classifier, var.example, label)
				} else {
					Formula::Constant(false)
				};
				if *equal {
					lit
				} else {
					lit.negate()
				}
			}
			Constraint::EqualityOfVariables { left, right, equal } => {
				let (left, right) = (left.resolve(env)?, right.resolve(env)?);
				label_agreement(left, right, *equal, lookup)
			}
			Constraint::Negation(c) => Formula::negation(c.propositionalize(env, lookup)?),
			Constraint::Conjunction(ch) => Formula::conjunction(
				ch.iter()
					.map(|c| c.propositionalize(env, lookup))
					.collect::<Result<Vec<_>, _>>()?,
			),
			Constraint::Disjunction(ch) => Formula::disjunction(
				ch.iter()
					.map(|c| c.propositionalize(env, lookup))
					.collect::<Result<Vec<_>, _>>()?,
			),
			Constraint::Implication(l, r) => {
				Formula::implication(l.propositionalize(env, lookup)?, r.propositionalize(env, lookup)?)
			}
			Constraint::DoubleImplication(l, r) => {
				Formula::equivalence(l.propositionalize(env, lookup)?, r.propositionalize(env, lookup)?)
			}
			Constraint::Universal(q) => Formula::conjunction(q.instantiate(env, lookup)?),
			Constraint::Existential(q) => Formula::disjunction(q.instantiate(env, lookup)?),
			Constraint::AtLeast(m, q) => {
				let m = resolve_bound(m, env)?;
				at_least_of(q.instantiate(env, lookup)?, m)
			}
			Constraint::AtMost(m, q) => {
				let m = resolve_bound(m, env)?;
				let bodies = q.instantiate(env, lookup)?;
				let m = bodies.len().saturating_sub(m);
				at_least_of(bodies.into_iter().map(Formula::negation).collect(), m)
			}
			Constraint::Invocation(inv) => inv.build(env)?.propositionalize(&Env::root(), lookup)?,
		})
	}

	/// Create the constraint that the labels of `left` and `right` are equal.
	pub fn vars_eq(left: VarTerm, right: VarTerm) -> Self {
		Constraint::EqualityOfVariables {
			left,
			right,
			equal: true,
		}
	}

	/// Create the constraint that the labels of `left` and `right` differ.
	pub fn vars_ne(left: VarTerm, right: VarTerm) -> Self {
		Constraint::EqualityOfVariables {
			left,
			right,
			equal: false,
		}
	}
}

impl PartialEq for Constraint {
	fn eq(&self, other: &Self) -> bool {
		/// Compare deduplicated children irrespective of their order.
		fn same_children(a: &[Constraint], b: &[Constraint]) -> bool {
			a.len() == b.len() && a.iter().all(|c| b.contains(c))
		}

		match (self, other) {
			(Constraint::Constant(a), Constraint::Constant(b)) => a == b,
			(
				Constraint::EqualityOfValues { left, right, equal },
				Constraint::EqualityOfValues {
					left: l2,
					right: r2,
					equal: e2,
				},
			) => equal == e2 && ((left == l2 && right == r2) || (left == r2 && right == l2)),
			(
				Constraint::EqualityWithConstant { var, label, equal },
				Constraint::EqualityWithConstant {
					var: v2,
					label: l2,
					equal: e2,
				},
			) => var == v2 && label == l2 && equal == e2,
			(
				Constraint::EqualityOfVariables { left, right, equal },
				Constraint::EqualityOfVariables {
					left: l2,
					right: r2,
					equal: e2,
				},
			) => equal == e2 && ((left == l2 && right == r2) || (left == r2 && right == l2)),
			(Constraint::Negation(a), Constraint::Negation(b)) => a == b,
			(Constraint::Conjunction(a), Constraint::Conjunction(b))
			| (Constraint::Disjunction(a), Constraint::Disjunction(b)) => same_children(a, b),
			(Constraint::Implication(l, r), Constraint::Implication(l2, r2)) => l == l2 && r == r2,
			(Constraint::DoubleImplication(l, r), Constraint::DoubleImplication(l2, r2)) => {
				(l == l2 && r == r2) || (l == r2 && r == l2)
			}
			(Constraint::Universal(a), Constraint::Universal(b))
			| (Constraint::Existential(a), Constraint::Existential(b)) => a == b,
			(Constraint::AtLeast(m, a), Constraint::AtLeast(m2, b))
			| (Constraint::AtMost(m, a), Constraint::AtMost(m2, b)) => m == m2 && a == b,
			(Constraint::Invocation(a), Constraint::Invocation(b)) => a == b,
			_ => false,
		}
	}
}

impl<'a> Env<'a> {
	/// Create a new environment extending this one with a binding of `value` to
	/// the next nesting depth.
	pub fn bind<'b>(&'b self, value: &'b Value) -> Env<'b> {
		Env {
			parent: Some(self),
			value: Some(value),
			len: self.len + 1,
		}
	}

	/// The number of bound values.
	pub fn depth(&self) -> usize {
		self.len
	}

	/// The value bound at nesting depth `depth`, read as an example.
	pub fn example(&self, depth: usize) -> Result<ExampleId, ConstraintError> {
		self.read(depth)
	}

	/// The value bound at nesting depth `depth`, read as a label.
	pub fn label(&self, depth: usize) -> Result<String, ConstraintError> {
		self.read(depth)
	}

	/// Read the value bound at nesting depth `depth` as a `T`.
	fn read<T: FromValue>(&self, depth: usize) -> Result<T, ConstraintError> {
		let value = self.value(depth)?;
		T::from_value(value).ok_or_else(|| ConstraintError::BindingKind {
			depth,
			expected: T::KIND,
			found: value.clone(),
		})
	}

	/// The environment without any bound values.
	pub fn root() -> Self {
		Env {
			parent: None,
			value: None,
			len: 0,
		}
	}

	/// The value bound at nesting depth `depth`.
	pub fn value(&self, depth: usize) -> Result<&'a Value, ConstraintError> {
		let unbound = ConstraintError::UnboundQuantification {
			depth,
			bound: self.len,
		};
		let mut env: &Env<'a> = self;
		loop {
			if env.len == depth + 1 {
				return env.value.ok_or(unbound);
			}
			if env.len <= depth {
				return Err(unbound);
			}
			env = env.parent.ok_or_else(|| unbound.clone())?;
		}
	}
}

impl FromValue for ExampleId {
	const KIND: &'static str = "an example";

	fn from_value(value: &Value) -> Option<Self> {
		match value {
			Value::Example(e) => Some(*e),
			_ => None,
		}
	}
}

impl FromValue for i64 {
	const KIND: &'static str = "an integer";

	fn from_value(value: &Value) -> Option<Self> {
		match value {
			Value::Integer(i) => Some(*i),
			_ => None,
		}
	}
}

impl FromValue for String {
	const KIND: &'static str = "a label";

	fn from_value(value: &Value) -> Option<Self> {
		match value {
			Value::Label(l) => Some(l.clone()),
			_ => None,
		}
	}
}

impl FromValue for Value {
	const KIND: &'static str = "a value";

	fn from_value(value: &Value) -> Option<Self> {
		Some(value.clone())
	}
}

impl FromValue for Vec<Value> {
	const KIND: &'static str = "a collection";

	fn from_value(value: &Value) -> Option<Self> {
		match value {
			Value::List(l) => Some(l.clone()),
			_ => None,
		}
	}
}

impl Invocation {
	/// Build the constraint for the argument resolved in `env`.
	fn build(&self, env: &Env<'_>) -> Result<Constraint, ConstraintError> {
		let arg = self.argument.resolve(env)?;
		Ok((self.make)(&arg))
	}
}

impl Debug for Invocation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Invocation")
			.field("argument", &self.argument)
			.finish_non_exhaustive()
	}
}

impl PartialEq for Invocation {
	fn eq(&self, other: &Self) -> bool {
		self.argument == other.argument && Arc::ptr_eq(&self.make, &other.make)
	}
}

impl Quantifier {
	/// Create a quantifier ranging over `collection`.
	pub fn new(collection: impl Into<Term<Vec<Value>>>, body: Constraint) -> Self {
		Self {
			collection: collection.into(),
			body: Box::new(body),
		}
	}

	/// Propositionalize the body for every element of the collection.
	fn instantiate(&self, env: &Env<'_>, lookup: &dyn LabelLookup) -> Result<Vec<Formula>, ConstraintError> {
		self.collection
			.resolve(env)?
			.iter()
			.map(|v| self.body.propositionalize(&env.bind(v), lookup))
			.collect()
	}
}

impl<T: FromValue> Term<T> {
	/// Create a term computed by `f` from the quantification variables in scope.
	pub fn derived(f: impl Fn(&Env<'_>) -> Result<T, ConstraintError> + Send + Sync + 'static) -> Self {
		Term::Derived(Arc::new(f))
	}

	/// Determine the value of the term in `env`.
	pub fn resolve(&self, env: &Env<'_>) -> Result<T, ConstraintError> {
		match self {
			Term::Fixed(v) => Ok(v.clone()),
			Term::Bound(depth) => env.read(*depth),
			Term::Derived(f) => f(env),
		}
	}
}

impl<T: Clone> Clone for Term<T> {
	fn clone(&self) -> Self {
		match self {
			Term::Fixed(v) => Term::Fixed(v.clone()),
			Term::Bound(d) => Term::Bound(*d),
			Term::Derived(f) => Term::Derived(Arc::clone(f)),
		}
	}
}

impl<T: Debug> Debug for Term<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Term::Fixed(v) => f.debug_tuple("Fixed").field(v).finish(),
			Term::Bound(d) => f.debug_tuple("Bound").field(d).finish(),
			Term::Derived(_) => f.write_str("Derived(..)"),
		}
	}
}

impl<T> From<T> for Term<T> {
	fn from(value: T) -> Self {
		Term::Fixed(value)
	}
}

impl From<&str> for Term<String> {
	fn from(value: &str) -> Self {
		Term::Fixed(value.to_owned())
	}
}

impl<T: PartialEq> PartialEq for Term<T> {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Term::Fixed(a), Term::Fixed(b)) => a == b,
			(Term::Bound(a), Term::Bound(b)) => a == b,
			(Term::Derived(a), Term::Derived(b)) => Arc::ptr_eq(a, b),
			_ => false,
		}
	}
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Value::Example(e) => write!(f, "{e}"),
			Value::Label(l) => write!(f, "{l}"),
			Value::Integer(i) => write!(f, "{i}"),
			Value::List(l) => {
				write!(f, "[")?;
				for (i, v) in l.iter().enumerate() {
					if i > 0 {
						write!(f, ", ")?;
					}
					write!(f, "{v}")?;
				}
				write!(f, "]")
			}
		}
	}
}

impl VarTerm {
	/// Reference the label variable of `classifier` for the example bound by the
	/// quantifier at nesting depth `depth`.
	pub fn bound(classifier: ClassifierId, depth: usize) -> Self {
		Self {
			classifier,
			example: Term::Bound(depth),
		}
	}

	/// Reference the label variable of `classifier` for `example`.
	pub fn fixed(classifier: ClassifierId, example: ExampleId) -> Self {
		Self {
			classifier,
			example: Term::Fixed(example),
		}
	}

	/// Determine the label variable referenced in `env`.
	pub fn resolve(&self, env: &Env<'_>) -> Result<LabelVar, ConstraintError> {
		Ok(LabelVar::new(self.classifier, self.example.resolve(env)?))
	}
}

/// Build a cardinality formula over the instantiations of a quantifier body,
/// resolving the cases in which its outcome does not depend on the bodies.
fn at_least_of(mut bodies: Vec<Formula>, m: usize) -> Formula {
	if bodies.len() < m {
		Formula::Constant(false)
	} else if m == 0 {
		Formula::Constant(true)
	} else if bodies.len() == 1 {
		bodies.pop().unwrap_or(Formula::Constant(false))
	} else {
		Formula::at_least(bodies, m)
	}
}

/// Resolve a quantifier bound in `env`, treating negative values as zero.
fn resolve_bound(m: &Term<i64>, env: &Env<'_>) -> Result<usize, ConstraintError> {
	Ok(usize::try_from(m.resolve(env)?).unwrap_or(0))
}

/// Collect the children of a conjunction or disjunction, inlining the children
/// of children accepted by `flatten` and removing duplicates.
fn collect_children(
	children: impl IntoIterator<Item = Constraint>,
	flatten: impl Fn(Constraint) -> Result<Vec<Constraint>, Constraint>,
) -> Vec<Constraint> {
	let mut result: Vec<Constraint> = Vec::new();
	for c in children {
		let add = match flatten(c) {
			Ok(nested) => nested,
			Err(c) => vec![c],
		};
		for c in add {
			if !result.contains(&c) {
				result.push(c);
			}
		}
	}
	result
}

/// Formula stating that the labels of `left` and `right` are equal (or differ,
/// when `equal` is `false`).
///
/// Only the candidate labels of the two variables are considered: a label
/// that is a candidate of only one of them can never make them equal.
fn label_agreement(left: LabelVar, right: LabelVar, equal: bool, lookup: &dyn LabelLookup) -> Formula {
	let (ls, rs) = (lookup.scores(left), lookup.scores(right));
	if ls.is_empty() || rs.is_empty() {
		return Formula::Constant(false);
	}
	if ls.len() == 1 && rs.len() == 1 {
		return Formula::Constant((ls[0].label == rs[0].label) == equal);
	}
	let lit = |var: LabelVar, label: &str| Formula::literal(var.classifier, var.example, label);
	let contains = |scores: &[Score], label: &str| scores.iter().any(|s| s.label == label);
	let common: Vec<&str> = ls
		.iter()
		.map(|s| s.label.as_str())
		.filter(|l| contains(rs, l))
		.collect();

	if !equal {
		if common.is_empty() {
			return Formula::Constant(true);
		}
		return Formula::conjunction(
			common
				.iter()
				.map(|l| Formula::or(lit(left, l).negate(), lit(right, l).negate())),
		);
	}
	if common.is_empty() {
		return Formula::Constant(false);
	}
	let mut clauses = Vec::new();
	for s in ls.iter().filter(|s| !contains(rs, &s.label)) {
		clauses.push(lit(left, &s.label).negate());
	}
	for s in rs.iter().filter(|s| !contains(ls, &s.label)) {
		clauses.push(lit(right, &s.label).negate());
	}
	// When both variables have the same candidates, the last label follows from
	// the others since every variable takes exactly one label.
	let pairs = if common.len() == ls.len() && common.len() == rs.len() {
		&common[..common.len() - 1]
	} else {
		&common[..]
	};
	for l in pairs {
		clauses.push(Formula::or(lit(left, l).negate(), lit(right, l)));
		clauses.push(Formula::or(lit(right, l).negate(), lit(left, l)));
	}
	Formula::conjunction(clauses)
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use itertools::Itertools;

	use crate::{
		constraint::{Constraint, ConstraintError, Env, LabelLookup, Quantifier, Term, Value, VarTerm},
		formula::{Formula, GroundLiteral},
		variable::{LabelVar, VariableRegistry},
		ClassifierId, ExampleId, Score,
	};

	#[derive(Debug, Default)]
	/// Label variables with fixed scores and current labels.
	struct Table {
		/// The scores of each variable.
		scores: HashMap<LabelVar, Vec<Score>>,
		/// The current label of each variable.
		values: HashMap<LabelVar, String>,
	}

	impl Table {
		/// Classifier 0 with the given candidate labels for examples `0..n`.
		fn with_examples(n: usize, labels: &[&str]) -> Self {
			let mut t = Table::default();
			for e in 0..n {
				let _ = t.scores.insert(
					var(0, e),
					labels.iter().map(|l| Score::new(*l, 0.5)).collect(),
				);
			}
			t
		}

		/// Valuation of literals consistent with the current labels.
		fn holds(&self, lit: &GroundLiteral) -> bool {
			self.values
				.get(&LabelVar::new(lit.classifier, lit.example))
				.is_some_and(|v| *v == lit.label)
		}
	}

	impl LabelLookup for Table {
		fn scores(&self, var: LabelVar) -> &[Score] {
			self.scores.get(&var).map_or(&[], Vec::as_slice)
		}

		fn value(&self, var: LabelVar) -> Option<&str> {
			self.values.get(&var).map(String::as_str)
		}
	}

	/// Shorthand for a label variable.
	fn var(c: usize, e: usize) -> LabelVar {
		LabelVar::new(ClassifierId::new(c), ExampleId::new(e))
	}

	/// The first `n` examples as quantification values.
	fn examples(n: usize) -> Vec<Value> {
		(0..n).map(|e| Value::Example(ExampleId::new(e))).collect()
	}

	#[test]
	fn test_env_bindings() {
		let root = Env::root();
		let a = Value::Label("a".to_owned());
		let b = Value::Example(ExampleId::new(2));
		let one = root.bind(&a);
		let two = one.bind(&b);
		assert_eq!(two.depth(), 2);
		assert_eq!(two.label(0), Ok("a".to_owned()));
		assert_eq!(two.example(1), Ok(ExampleId::new(2)));
		assert_eq!(
			one.example(1),
			Err(ConstraintError::UnboundQuantification { depth: 1, bound: 1 })
		);
		assert_eq!(
			two.example(0),
			Err(ConstraintError::BindingKind {
				depth: 0,
				expected: "an example",
				found: a.clone()
			})
		);
		let err = Term::<String>::Bound(0).resolve(&root).unwrap_err();
		assert_eq!(
			err.to_string(),
			"quantification variable at depth 0 is read, but only 0 quantification variables are bound"
		);
	}

	#[test]
	fn test_constructors() {
		let a = Constraint::label_eq(VarTerm::fixed(ClassifierId::new(0), ExampleId::new(0)), "A");
		let b = Constraint::label_eq(VarTerm::fixed(ClassifierId::new(1), ExampleId::new(0)), "B");
		let c = Constraint::and(Constraint::and(a.clone(), b.clone()), a.clone());
		let Constraint::Conjunction(ch) = &c else {
			panic!("expected a conjunction");
		};
		assert_eq!(ch.len(), 2);
		assert_eq!(c, Constraint::and(b.clone(), a.clone()));
		assert_eq!(
			Constraint::equivalence(a.clone(), b.clone()),
			Constraint::equivalence(b.clone(), a.clone())
		);
		assert_ne!(
			Constraint::implication(a.clone(), b.clone()),
			Constraint::implication(b, a)
		);
		let negative = Constraint::at_least(-3, examples(2), Constraint::Constant(true));
		assert!(matches!(negative, Constraint::AtLeast(Term::Fixed(-3), _)));
		assert_eq!(
			negative.propositionalize(&Env::root(), &Table::default()),
			Ok(Formula::Constant(true))
		);
	}

	#[test]
	fn test_consolidate_expands_quantifiers() {
		let mut reg = VariableRegistry::default();
		let c = Constraint::and(
			Constraint::forall(
				examples(3),
				Constraint::vars_eq(
					VarTerm::bound(ClassifierId::new(0), 0),
					VarTerm::bound(ClassifierId::new(1), 0),
				),
			),
			Constraint::label_eq(VarTerm::fixed(ClassifierId::new(0), ExampleId::new(1)), "x"),
		);
		c.consolidate_variables(&mut reg, &Env::root()).unwrap();
		let order = reg.iter().map(|v| v.var().to_string()).join(" ");
		assert_eq!(order, "c0(e0) c1(e0) c0(e1) c1(e1) c0(e2) c1(e2)");
	}

	#[test]
	fn test_label_equality() {
		let table = Table::with_examples(1, &["A", "B"]);
		let v = VarTerm::fixed(ClassifierId::new(0), ExampleId::new(0));
		let root = Env::root();
		assert_eq!(
			Constraint::label_eq(v.clone(), "A")
				.propositionalize(&root, &table)
				.unwrap()
				.to_string(),
			"c0(e0) :: A"
		);
		assert_eq!(
			Constraint::label_ne(v.clone(), "A")
				.propositionalize(&root, &table)
				.unwrap()
				.to_string(),
			"!c0(e0) :: A"
		);
		assert_eq!(
			Constraint::label_eq(v.clone(), "C").propositionalize(&root, &table),
			Ok(Formula::Constant(false))
		);
		assert_eq!(
			Constraint::label_ne(v, "C").propositionalize(&root, &table),
			Ok(Formula::Constant(true))
		);
	}

	#[test]
	fn test_variable_equality() {
		let mut table = Table::default();
		let labels = ["A", "B", "C"];
		let _ = table
			.scores
			.insert(var(0, 0), labels.iter().map(|l| Score::new(*l, 1.0)).collect());
		let _ = table
			.scores
			.insert(var(1, 0), vec![Score::new("B", 1.0), Score::new("C", 1.0), Score::new("D", 1.0)]);
		let _ = table.scores.insert(var(2, 0), vec![Score::new("A", 1.0)]);
		let _ = table.scores.insert(var(3, 0), vec![Score::new("A", 1.0)]);
		let vt = |c: usize| VarTerm::fixed(ClassifierId::new(c), ExampleId::new(0));
		let root = Env::root();

		assert_eq!(
			Constraint::vars_eq(vt(2), vt(3)).propositionalize(&root, &table),
			Ok(Formula::Constant(true))
		);
		assert_eq!(
			Constraint::vars_ne(vt(2), vt(3)).propositionalize(&root, &table),
			Ok(Formula::Constant(false))
		);
		assert_eq!(
			Constraint::vars_eq(vt(0), vt(9)).propositionalize(&root, &table),
			Ok(Formula::Constant(false))
		);

		// compare against the truth table of all label combinations
		for equal in [true, false] {
			let c = Constraint::EqualityOfVariables {
				left: vt(0),
				right: vt(1),
				equal,
			};
			let f = c.propositionalize(&root, &table).unwrap();
			for (l, r) in labels.iter().cartesian_product(["B", "C", "D"]) {
				let _ = table.values.insert(var(0, 0), (*l).to_owned());
				let _ = table.values.insert(var(1, 0), r.to_owned());
				let expected = (*l == r) == equal;
				assert_eq!(f.evaluate(&|lit: &GroundLiteral| table.holds(lit)), expected);
				assert_eq!(c.evaluate(&root, &table), Ok(expected));
			}
		}
	}

	#[test]
	fn test_quantifier_semantics() {
		let yes = |depth| Constraint::label_eq(VarTerm::bound(ClassifierId::new(0), depth), "yes");
		for n in [0, 1, 3] {
			let mut table = Table::with_examples(n, &["yes", "no"]);
			let coll = examples(n);
			let quantified = [
				("forall", 0, Constraint::forall(coll.clone(), yes(0))),
				("exists", 0, Constraint::exists(coll.clone(), yes(0))),
			]
			.into_iter()
			.chain([0, 1, n, n + 1].into_iter().flat_map(|m| {
				[
					("atleast", m, Constraint::at_least(m as i64, coll.clone(), yes(0))),
					("atmost", m, Constraint::at_most(m as i64, coll.clone(), yes(0))),
				]
			}))
			.collect_vec();

			for bits in 0..(1_usize << n) {
				for e in 0..n {
					let label = if bits & (1 << e) != 0 { "yes" } else { "no" };
					let _ = table.values.insert(var(0, e), label.to_owned());
				}
				let count = bits.count_ones() as usize;
				for (kind, m, c) in &quantified {
					let expected = match *kind {
						"forall" => count == n,
						"exists" => count > 0,
						"atleast" => count >= *m,
						"atmost" => count <= *m,
						_ => unreachable!(),
					};
					let f = c.propositionalize(&Env::root(), &table).unwrap();
					assert_eq!(
						f.evaluate(&|lit: &GroundLiteral| table.holds(lit)),
						expected,
						"{kind} {c:?} with {bits:b}"
					);
					assert_eq!(c.evaluate(&Env::root(), &table), Ok(expected));
				}
			}
		}
	}

	#[test]
	fn test_at_most_is_at_least_of_negation() {
		let body = Constraint::label_eq(VarTerm::bound(ClassifierId::new(0), 0), "yes");
		let mut table = Table::with_examples(3, &["yes", "no"]);
		for m in 0..=4 {
			let at_most = Constraint::at_most(m, examples(3), body.clone());
			let at_least = Constraint::at_least(3 - m, examples(3), Constraint::negation(body.clone()));
			let (f, g) = (
				at_most.propositionalize(&Env::root(), &table).unwrap(),
				at_least.propositionalize(&Env::root(), &table).unwrap(),
			);
			for assignment in (0..3).map(|_| ["yes", "no"]).multi_cartesian_product() {
				for (e, l) in assignment.iter().enumerate() {
					let _ = table.values.insert(var(0, e), (*l).to_owned());
				}
				let holds = |lit: &GroundLiteral| table.holds(lit);
				assert_eq!(f.evaluate(&holds), g.evaluate(&holds));
			}
		}
	}

	#[test]
	fn test_nested_quantifiers_and_invocation() {
		let mut table = Table::with_examples(4, &["yes", "no"]);
		let groups = vec![
			Value::List(examples(2)),
			Value::List(vec![Value::Example(ExampleId::new(2)), Value::Example(ExampleId::new(3))]),
		];
		// every group contains exactly one "yes"
		let c = Constraint::forall(
			groups,
			Constraint::and(
				Constraint::at_least(
					1,
					Term::Bound(0),
					Constraint::label_eq(VarTerm::bound(ClassifierId::new(0), 1), "yes"),
				),
				Constraint::at_most(
					1,
					Term::Bound(0),
					Constraint::label_eq(VarTerm::bound(ClassifierId::new(0), 1), "yes"),
				),
			),
		);
		for (e, l) in ["yes", "no", "no", "yes"].iter().enumerate() {
			let _ = table.values.insert(var(0, e), (*l).to_owned());
		}
		assert_eq!(c.evaluate(&Env::root(), &table), Ok(true));
		let _ = table.values.insert(var(0, 2), "yes".to_owned());
		assert_eq!(c.evaluate(&Env::root(), &table), Ok(false));

		// all but one member of every group says "yes"
		let all_but_one = Constraint::forall(
			vec![
				Value::List(examples(3)),
				Value::List(vec![Value::Example(ExampleId::new(3))]),
			],
			Constraint::AtLeast(
				Term::derived(|env| match env.value(0)? {
					Value::List(members) => Ok(members.len() as i64 - 1),
					_ => Ok(0),
				}),
				Quantifier::new(
					Term::Bound(0),
					Constraint::label_eq(VarTerm::bound(ClassifierId::new(0), 1), "yes"),
				),
			),
		);
		let f = all_but_one.propositionalize(&Env::root(), &table).unwrap();
		assert_eq!(f.literals().len(), 3);
		// e0, e2 and e3 are "yes"
		assert_eq!(all_but_one.evaluate(&Env::root(), &table), Ok(true));
		assert!(f.evaluate(&|lit: &GroundLiteral| table.holds(lit)));
		let _ = table.values.insert(var(0, 0), "no".to_owned());
		assert_eq!(all_but_one.evaluate(&Env::root(), &table), Ok(false));
		assert!(!f.evaluate(&|lit: &GroundLiteral| table.holds(lit)));

		// the bound is read from the outer quantification variable
		let at_most_outer = |bounds: Vec<Value>| {
			Constraint::forall(
				bounds,
				Constraint::AtMost(
					Term::Bound(0),
					Quantifier::new(
						examples(4),
						Constraint::label_eq(VarTerm::bound(ClassifierId::new(0), 1), "yes"),
					),
				),
			)
		};
		assert_eq!(
			at_most_outer(vec![Value::Integer(2)]).evaluate(&Env::root(), &table),
			Ok(true)
		);
		assert_eq!(
			at_most_outer(vec![Value::Integer(2), Value::Integer(1)]).evaluate(&Env::root(), &table),
			Ok(false)
		);
		assert_eq!(
			at_most_outer(examples(1)).propositionalize(&Env::root(), &table),
			Err(ConstraintError::BindingKind {
				depth: 0,
				expected: "an integer",
				found: Value::Example(ExampleId::new(0)),
			})
		);

		let inv = Constraint::forall(
			examples(2),
			Constraint::invoke(Term::Bound(0), |v| match v {
				Value::Example(e) => Constraint::label_eq(VarTerm::fixed(ClassifierId::new(0), *e), "yes"),
				_ => Constraint::Constant(false),
			}),
		);
		let f = inv.propositionalize(&Env::root(), &table).unwrap();
		assert_eq!(f.to_string(), "(c0(e0) :: yes /\\ c0(e1) :: yes)");

		let derived = Constraint::EqualityOfValues {
			left: Term::derived(|env| Ok(env.example(0)?.to_string())),
			right: "e1".into(),
			equal: true,
		};
		let c = Constraint::exists(examples(3), derived);
		assert_eq!(c.evaluate(&Env::root(), &table), Ok(true));
		assert_eq!(c.propositionalize(&Env::root(), &table), Ok(Formula::disjunction([
			Formula::Constant(false),
			Formula::Constant(true),
			Formula::Constant(false)
		])));
	}
}
