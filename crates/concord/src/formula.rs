//! Ground propositional formulas over label literals, and their algebraic
//! rewriting: simplification, negation, factoring, and conversion to
//! conjunctive and disjunctive normal form.
//!
//! Formulas are immutable values. Every rewriting operation returns a new
//! formula that is logically equivalent to (or, for [`Formula::negate`], the
//! complement of) the original.

use std::{collections::BTreeSet, fmt};

use itertools::Itertools;

use crate::{ClassifierId, ExampleId, Valuation};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// The ground literal stating that a classifier assigns a specific label to an
/// example.
pub struct GroundLiteral {
	/// The classifier making the prediction.
	pub classifier: ClassifierId,
	/// The example for which the prediction is made.
	pub example: ExampleId,
	/// The predicted label.
	pub label: String,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// A ground propositional formula.
///
/// The children of conjunctions and disjunctions are kept in a set, which
/// makes their equality independent of the order in which the children were
/// added. Use the constructor functions (e.g., [`Formula::conjunction`]) to
/// create formulas, they flatten nested connectives of the same kind.
pub enum Formula {
	/// A Boolean constant.
	Constant(bool),
	/// A literal.
	Variable(GroundLiteral),
	/// The negation of a formula.
	Negation(Box<Formula>),
	/// A conjunction, which is true when all children are true.
	Conjunction(BTreeSet<Formula>),
	/// A disjunction, which is true when any child is true.
	Disjunction(BTreeSet<Formula>),
	/// An implication `left ⇒ right`.
	Implication(Box<Formula>, Box<Formula>),
	/// A double implication `left ⇔ right`, with its two sides stored in
	/// ascending order.
	DoubleImplication(Box<Formula>, Box<Formula>),
	/// A cardinality formula, which is true when at least `m` of its children
	/// are true.
	AtLeast(Vec<Formula>, usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// The two n-ary connectives, each the dual of the other.
enum Connective {
	/// Conjunction.
	And,
	/// Disjunction.
	Or,
}

impl Connective {
	/// The children of `f` if it is a formula of this connective.
	fn children(self, f: &Formula) -> Option<&BTreeSet<Formula>> {
		match (self, f) {
			(Connective::And, Formula::Conjunction(ch)) | (Connective::Or, Formula::Disjunction(ch)) => {
				Some(ch)
			}
			_ => None,
		}
	}

	/// Build a formula of this connective from `children`, flattening children
	/// of the same connective.
	fn collect(self, children: impl IntoIterator<Item = Formula>) -> Formula {
		let mut set = BTreeSet::new();
		for c in children {
			self.insert(&mut set, c);
		}
		self.make(set)
	}

	/// Distribute this connective over its dual, turning e.g. a conjunction into
	/// a disjunction of conjunctions.
	fn distribute(self, children: &BTreeSet<Formula>) -> Formula {
		let dual = self.dual();
		let factored = self.factor(children.clone());
		let Some(children) = self.children(&factored) else {
			return factored.normal_form(dual);
		};
		let inner = self.collect(children.iter().map(|c| c.normal_form(dual)));
		let Some(children) = self.children(&inner) else {
			return inner;
		};
		if let Ok(only) = children.iter().exactly_one() {
			return only.clone();
		}
		if !children.iter().any(|c| dual.children(c).is_some()) {
			return inner;
		}
		let options: Vec<Vec<Formula>> = children
			.iter()
			.map(|c| match dual.children(c) {
				Some(alt) => alt.iter().cloned().collect(),
				None => vec![c.clone()],
			})
			.collect();
		dual.collect(
			options
				.into_iter()
				.multi_cartesian_product()
				.map(|combo| self.collect(combo)),
		)
		.simplify()
	}

	/// The connective of which this connective is the dual.
	fn dual(self) -> Self {
		match self {
			Connective::And => Connective::Or,
			Connective::Or => Connective::And,
		}
	}

	/// Repeatedly pull the children shared by two dual children of a formula of
	/// this connective out of them, e.g. `(a ∨ b) ∧ (a ∨ c)` becomes `a ∨ (b ∧
	/// c)` and `(a ∨ b) ∧ a` becomes `a`.
	fn factor(self, mut children: BTreeSet<Formula>) -> Formula {
		let inner = self.dual();
		loop {
			let list: Vec<&Formula> = children
				.iter()
				.filter(|c| inner.children(c).is_some())
				.chain(children.iter().filter(|c| inner.children(c).is_none()))
				.collect();

			let mut best: Option<(usize, usize, Vec<Formula>)> = None;
			for (i, a) in list.iter().enumerate() {
				let Some(a_children) = inner.children(a) else {
					break;
				};
				for (j, b) in list.iter().enumerate().skip(i + 1) {
					let common: Vec<Formula> = match inner.children(b) {
						Some(b_children) => a_children.intersection(b_children).cloned().collect(),
						None if a_children.contains(*b) => vec![(*b).clone()],
						None => Vec::new(),
					};
					if !common.is_empty() && best.as_ref().map_or(true, |(_, _, x)| common.len() > x.len())
					{
						best = Some((i, j, common));
					}
				}
			}
			let Some((i, j, common)) = best else {
				break;
			};

			let (a, b) = (list[i].clone(), list[j].clone());
			let mut merged = inner.reduce(common.iter().cloned());
			if let (Some(a_children), Some(b_children)) = (inner.children(&a), inner.children(&b)) {
				let rest_a = inner.reduce(a_children.iter().filter(|c| !common.contains(c)).cloned());
				let rest_b = inner.reduce(b_children.iter().filter(|c| !common.contains(c)).cloned());
				merged = inner
					.collect([merged, self.collect([rest_a, rest_b])])
					.simplify();
			}
			let _ = children.remove(&a);
			let _ = children.remove(&b);
			self.insert(&mut children, merged);
		}
		self.reduce(children)
	}

	/// The truth value of a formula of this connective without children.
	fn identity(self) -> bool {
		self == Connective::And
	}

	/// Insert `f` into a set of children of this connective, flattening it if it
	/// is a formula of the same connective.
	fn insert(self, set: &mut BTreeSet<Formula>, f: Formula) {
		match (self, f) {
			(Connective::And, Formula::Conjunction(ch)) | (Connective::Or, Formula::Disjunction(ch)) => {
				set.extend(ch);
			}
			(_, f) => {
				let _ = set.insert(f);
			}
		}
	}

	/// Create a formula of this connective with the given children.
	fn make(self, children: BTreeSet<Formula>) -> Formula {
		match self {
			Connective::And => Formula::Conjunction(children),
			Connective::Or => Formula::Disjunction(children),
		}
	}

	/// Negate a formula of this connective using De Morgan's laws.
	fn negate(self, children: &BTreeSet<Formula>) -> Formula {
		if children.len() == 1 {
			return children.iter().next().map_or(Formula::Constant(!self.identity()), Formula::negate);
		}
		self.dual().collect(children.iter().map(Formula::negate))
	}

	/// Like [`Connective::collect`], but without creating a formula for fewer
	/// than two children.
	fn reduce(self, children: impl IntoIterator<Item = Formula>) -> Formula {
		let mut set = BTreeSet::new();
		for c in children {
			self.insert(&mut set, c);
		}
		match set.len() {
			0 => Formula::Constant(self.identity()),
			1 => set.into_iter().next().unwrap_or(Formula::Constant(self.identity())),
			_ => self.make(set),
		}
	}

	/// Combine already simplified children into a simplified formula of this
	/// connective.
	fn simplify(self, children: impl IntoIterator<Item = Formula>) -> Formula {
		let mut set = BTreeSet::new();
		for c in children {
			match c {
				Formula::Constant(b) if b == self.identity() => {}
				Formula::Constant(_) => return Formula::Constant(!self.identity()),
				c => self.insert(&mut set, c),
			}
		}
		self.reduce(set)
	}

	/// The symbol used to display the connective.
	fn symbol(self) -> &'static str {
		match self {
			Connective::And => "/\\",
			Connective::Or => "\\/",
		}
	}
}

impl fmt::Display for GroundLiteral {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}({}) :: {}", self.classifier, self.example, self.label)
	}
}

impl Formula {
	/// Create a conjunction of `a` and `b`.
	pub fn and(a: Formula, b: Formula) -> Self {
		Connective::And.collect([a, b])
	}

	/// Create a cardinality formula that is true when at least `m` of `children`
	/// are true.
	pub fn at_least(children: Vec<Formula>, m: usize) -> Self {
		Formula::AtLeast(children, m)
	}

	/// Returns the normal form of the formula where the top-level connective is a
	/// conjunction of disjunctions of literals.
	pub fn cnf(&self) -> Formula {
		self.normal_form(Connective::And)
	}

	/// Create a conjunction of the given formulas.
	pub fn conjunction(children: impl IntoIterator<Item = Formula>) -> Self {
		Connective::And.collect(children)
	}

	/// Create a disjunction of the given formulas.
	pub fn disjunction(children: impl IntoIterator<Item = Formula>) -> Self {
		Connective::Or.collect(children)
	}

	/// Returns the normal form of the formula where the top-level connective is a
	/// disjunction of conjunctions of literals.
	pub fn dnf(&self) -> Formula {
		self.normal_form(Connective::Or)
	}

	/// Create a double implication, storing its sides in canonical order.
	pub fn equivalence(left: Formula, right: Formula) -> Self {
		let (l, r) = if left <= right {
			(left, right)
		} else {
			(right, left)
		};
		Formula::DoubleImplication(Box::new(l), Box::new(r))
	}

	/// Evaluate the formula, using `valuation` to decide the truth value of
	/// literals.
	pub fn evaluate(&self, valuation: &dyn Valuation) -> bool {
		match self {
			Formula::Constant(b) => *b,
			Formula::Variable(lit) => valuation(lit),
			Formula::Negation(c) => !c.evaluate(valuation),
			Formula::Conjunction(ch) => ch.iter().all(|c| c.evaluate(valuation)),
			Formula::Disjunction(ch) => ch.iter().any(|c| c.evaluate(valuation)),
			Formula::Implication(l, r) => !l.evaluate(valuation) || r.evaluate(valuation),
			Formula::DoubleImplication(l, r) => l.evaluate(valuation) == r.evaluate(valuation),
			Formula::AtLeast(ch, m) => {
				ch.iter()
					.filter(|c| c.evaluate(valuation))
					.take(*m)
					.count() == *m
			}
		}
	}

	/// Pull out the children shared by the children of a conjunction or
	/// disjunction. Other formulas are only simplified.
	pub fn factor(&self) -> Formula {
		match self.simplify() {
			Formula::Conjunction(ch) => Connective::And.factor(ch),
			Formula::Disjunction(ch) => Connective::Or.factor(ch),
			f => f,
		}
	}

	/// Create an implication `left ⇒ right`.
	pub fn implication(left: Formula, right: Formula) -> Self {
		Formula::Implication(Box::new(left), Box::new(right))
	}

	/// Returns whether the formula is a literal or the negation of a literal.
	pub fn is_literal(&self) -> bool {
		match self {
			Formula::Variable(_) => true,
			Formula::Negation(c) => matches!(c.as_ref(), Formula::Variable(_)),
			_ => false,
		}
	}

	/// Create the literal stating that `classifier` assigns `label` to
	/// `example`.
	pub fn literal(classifier: ClassifierId, example: ExampleId, label: impl Into<String>) -> Self {
		Formula::Variable(GroundLiteral {
			classifier,
			example,
			label: label.into(),
		})
	}

	/// The set of literals occurring in the formula.
	pub fn literals(&self) -> BTreeSet<&GroundLiteral> {
		let mut lits = BTreeSet::new();
		let mut stack = vec![self];
		while let Some(f) = stack.pop() {
			match f {
				Formula::Constant(_) => {}
				Formula::Variable(lit) => {
					let _ = lits.insert(lit);
				}
				Formula::Negation(c) => stack.push(c),
				Formula::Conjunction(ch) | Formula::Disjunction(ch) => stack.extend(ch),
				Formula::Implication(l, r) | Formula::DoubleImplication(l, r) => {
					stack.push(l);
					stack.push(r);
				}
				Formula::AtLeast(ch, _) => stack.extend(ch),
			}
		}
		lits
	}

	/// Returns the complement of the formula in negation normal form.
	pub fn negate(&self) -> Formula {
		match self {
			Formula::Constant(b) => Formula::Constant(!b),
			Formula::Variable(_) => Formula::Negation(Box::new(self.clone())),
			Formula::Negation(c) => c.nnf(),
			Formula::Conjunction(ch) => Connective::And.negate(ch),
			Formula::Disjunction(ch) => Connective::Or.negate(ch),
			Formula::Implication(l, r) => Formula::and(l.nnf(), r.negate()),
			Formula::DoubleImplication(l, r) => Formula::and(
				Formula::or(l.negate(), r.negate()),
				Formula::or(l.nnf(), r.nnf()),
			),
			Formula::AtLeast(ch, m) => Formula::AtLeast(
				ch.iter().map(Formula::negate).collect(),
				(ch.len() + 1).saturating_sub(*m),
			),
		}
	}

	/// Returns the negation normal form of the formula, in which negations only
	/// occur directly on literals and implications are expanded.
	pub fn nnf(&self) -> Formula {
		match self {
			Formula::Constant(_) | Formula::Variable(_) => self.clone(),
			Formula::Negation(c) => c.negate(),
			Formula::Conjunction(ch) => Formula::conjunction(ch.iter().map(Formula::nnf)),
			Formula::Disjunction(ch) => Formula::disjunction(ch.iter().map(Formula::nnf)),
			Formula::Implication(l, r) => Formula::or(l.negate(), r.nnf()),
			Formula::DoubleImplication(l, r) => Formula::and(
				Formula::or(l.negate(), r.nnf()),
				Formula::or(l.nnf(), r.negate()),
			),
			Formula::AtLeast(ch, m) => Formula::AtLeast(ch.iter().map(Formula::nnf).collect(), *m),
		}
	}

	/// Create the negation of `f`.
	pub fn negation(f: Formula) -> Self {
		Formula::Negation(Box::new(f))
	}

	/// Convert the formula into a normal form whose top-level connective is
	/// `outer`.
	fn normal_form(&self, outer: Connective) -> Formula {
		match self {
			Formula::Constant(_) | Formula::Variable(_) => self.clone(),
			Formula::Negation(_) => match self.simplify() {
				s @ Formula::Negation(_) => s,
				s => s.normal_form(outer),
			},
			Formula::Conjunction(ch) | Formula::Disjunction(ch) => {
				let conn = if matches!(self, Formula::Conjunction(_)) {
					Connective::And
				} else {
					Connective::Or
				};
				if conn == outer {
					conn.collect(ch.iter().map(|c| c.normal_form(outer)))
						.simplify()
				} else {
					conn.distribute(ch)
				}
			}
			Formula::Implication(l, r) => {
				Formula::or(Formula::negation(l.as_ref().clone()), r.as_ref().clone()).normal_form(outer)
			}
			Formula::DoubleImplication(l, r) => {
				let (l, r) = (l.as_ref().clone(), r.as_ref().clone());
				let (nl, nr) = (Formula::negation(l.clone()), Formula::negation(r.clone()));
				match outer {
					Connective::And => Formula::and(Formula::or(nl, r), Formula::or(nr, l)),
					Connective::Or => Formula::or(Formula::and(l, r), Formula::and(nl, nr)),
				}
				.normal_form(outer)
			}
			Formula::AtLeast(..) => match outer {
				Connective::And => self.dnf().cnf(),
				Connective::Or => match self.simplify() {
					Formula::AtLeast(ch, m) => Connective::Or
						.collect(
							ch.iter()
								.combinations(m)
								.map(|combo| Connective::And.collect(combo.into_iter().cloned())),
						)
						.dnf(),
					s => s.dnf(),
				},
			},
		}
	}

	/// Create a disjunction of `a` and `b`.
	pub fn or(a: Formula, b: Formula) -> Self {
		Connective::Or.collect([a, b])
	}

	/// Returns a simplified formula that is logically equivalent.
	///
	/// Constants are propagated, single-child connectives are replaced by their
	/// child, negations are pushed down onto literals, and implications are
	/// replaced by disjunctions. Cardinality formulas are resolved when their
	/// outcome is fixed, and replaced by a disjunction when one child suffices.
	pub fn simplify(&self) -> Formula {
		match self {
			Formula::Constant(_) | Formula::Variable(_) => self.clone(),
			Formula::Negation(c) => match c.as_ref() {
				Formula::Variable(_) => self.clone(),
				c => c.negate().simplify(),
			},
			Formula::Conjunction(ch) => Connective::And.simplify(ch.iter().map(Formula::simplify)),
			Formula::Disjunction(ch) => Connective::Or.simplify(ch.iter().map(Formula::simplify)),
			Formula::Implication(l, r) => Formula::or(l.negate(), r.as_ref().clone()).simplify(),
			Formula::DoubleImplication(l, r) => Formula::and(
				Formula::or(l.negate(), r.as_ref().clone()),
				Formula::or(r.negate(), l.as_ref().clone()),
			)
			.simplify(),
			Formula::AtLeast(ch, m) => Self::simplify_at_least(ch, *m),
		}
	}

	/// Simplify a cardinality formula.
	fn simplify_at_least(children: &[Formula], m: usize) -> Formula {
		if m == 0 {
			return Formula::Constant(true);
		}
		if m > children.len() {
			return Formula::Constant(false);
		}
		let mut satisfied = 0;
		let mut rest = Vec::with_capacity(children.len());
		for c in children {
			match c.simplify() {
				Formula::Constant(true) => satisfied += 1,
				Formula::Constant(false) => {}
				c => rest.push(c),
			}
		}
		let m = m.saturating_sub(satisfied);
		if m == 0 {
			return Formula::Constant(true);
		}
		if m > rest.len() {
			return Formula::Constant(false);
		}
		if rest.len() == 1 {
			return rest.pop().unwrap_or(Formula::Constant(false));
		}
		if m == 1 {
			return Connective::Or.simplify(rest);
		}
		Formula::AtLeast(rest, m)
	}

	/// Simplify the formula as the top-level formula of a constraint.
	///
	/// This differs from [`Formula::simplify`] only for conjunctions: double
	/// implications among their children are retained (with simplified sides)
	/// instead of being expanded, since they can be expressed by a single linear
	/// equality.
	pub fn simplify_top_level(&self) -> Formula {
		let Formula::Conjunction(ch) = self else {
			return self.simplify();
		};
		Connective::And.simplify(ch.iter().map(|c| match c {
			Formula::DoubleImplication(l, r) => {
				let (l, r) = (l.simplify(), r.simplify());
				if l == r {
					return Formula::Constant(true);
				}
				match (&l, &r) {
					(Formula::Constant(false), _) => r.negate().simplify(),
					(Formula::Constant(true), _) => r,
					(_, Formula::Constant(false)) => l.negate().simplify(),
					(_, Formula::Constant(true)) => l,
					_ => Formula::equivalence(l, r),
				}
			}
			c => c.simplify(),
		}))
	}
}

impl fmt::Display for Formula {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Formula::Constant(b) => write!(f, "{b}"),
			Formula::Variable(lit) => write!(f, "{lit}"),
			Formula::Negation(c) => write!(f, "!{c}"),
			Formula::Conjunction(ch) | Formula::Disjunction(ch) => {
				let conn = if matches!(self, Formula::Conjunction(_)) {
					Connective::And
				} else {
					Connective::Or
				};
				let sep = format!(" {} ", conn.symbol());
				write!(f, "({})", ch.iter().format(&sep))
			}
			Formula::Implication(l, r) => write!(f, "({l} => {r})"),
			Formula::DoubleImplication(l, r) => write!(f, "({l} <=> {r})"),
			Formula::AtLeast(ch, m) => write!(f, "(atleast {m} of {})", ch.iter().format(", ")),
		}
	}
}
