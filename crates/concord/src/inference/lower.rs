//! Lowering of simplified propositional formulas into linear constraints.

use std::{
	collections::HashMap,
	fmt::{self, Debug},
};

use tracing::trace;

use crate::{
	formula::{Formula, GroundLiteral},
	ilp::IlpVar,
	inference::InferenceError,
	solver::IlpSolver,
};

/// Translation of a simplified formula into the rows of a 0-1 ILP.
///
/// Compound sub-formulas that do not occur at the top level are represented by
/// gate variables, which are shared between structurally identical
/// sub-formulas.
pub(crate) struct Lowering<'a, S: IlpSolver + ?Sized> {
	/// The solver receiving the variables and rows.
	solver: &'a mut S,
	/// The ILP variable of every literal.
	columns: &'a HashMap<GroundLiteral, IlpVar>,
	/// Gate variables, keyed by the kind of gate and its operands.
	gates: HashMap<String, IlpVar>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// An ILP variable that occurs, possibly negated, in a linear sum.
struct Operand {
	/// The ILP variable.
	var: IlpVar,
	/// Whether the operand stands for `1 - var`.
	negated: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The kinds of gates.
enum GateKind {
	/// True when all operands are true.
	And,
	/// True when at least one operand is true.
	Or,
	/// True when at least the given number of operands are true.
	AtLeast(usize),
}

/// A linear sum of operands, as terms and the constant that has to be moved to
/// the right-hand side.
#[derive(Debug, Default)]
struct LinearSum {
	/// The terms of the sum.
	terms: Vec<(IlpVar, f64)>,
	/// The adjustment of the right-hand side caused by negated operands.
	offset: f64,
}

impl<S: IlpSolver + ?Sized> Debug for Lowering<'_, S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Lowering")
			.field("gates", &self.gates)
			.finish_non_exhaustive()
	}
}

impl<'a, S: IlpSolver + ?Sized> Lowering<'a, S> {
	/// Create a lowering that adds to `solver`, using `columns` for the literals.
	pub(crate) fn new(solver: &'a mut S, columns: &'a HashMap<GroundLiteral, IlpVar>) -> Self {
		Self {
			solver,
			columns,
			gates: HashMap::new(),
		}
	}

	/// The number of gate variables created.
	pub(crate) fn gates(&self) -> usize {
		self.gates.len()
	}

	/// Create (or reuse) the gate variable that is true exactly when the gate
	/// over `ops` holds.
	fn gate(&mut self, kind: GateKind, ops: &[Operand]) -> IlpVar {
		let key = Self::gate_key(kind, ops);
		if let Some(&y) = self.gates.get(&key) {
			return y;
		}
		let y = self.solver.add_boolean_variable(0.0);
		trace!(gate = %key, var = %y, "create gate variable");
		let _ = self.gates.insert(key, y);

		let n = ops.len() as f64;
		let sum = LinearSum::of(ops, 1.0);
		let with_gate = |coef: f64| {
			let mut terms = sum.terms.clone();
			terms.push((y, coef));
			terms
		};
		match kind {
			GateKind::And => {
				let _ = self
					.solver
					.add_greater_than_constraint(with_gate(-n), sum.offset);
				let _ = self
					.solver
					.add_less_than_constraint(with_gate(-1.0), sum.offset + n - 1.0);
			}
			GateKind::Or => {
				let _ = self
					.solver
					.add_greater_than_constraint(with_gate(-1.0), sum.offset);
				let _ = self
					.solver
					.add_less_than_constraint(with_gate(-n), sum.offset);
			}
			GateKind::AtLeast(m) => {
				let m = m as f64;
				let _ = self
					.solver
					.add_greater_than_constraint(with_gate(-m), sum.offset);
				let _ = self
					.solver
					.add_less_than_constraint(with_gate(-n), sum.offset + m - 1.0);
			}
		}
		y
	}

	/// The memoization key of a gate, which is independent of the order of the
	/// operands.
	fn gate_key(kind: GateKind, ops: &[Operand]) -> String {
		let mut names: Vec<String> = ops
			.iter()
			.map(|op| {
				let sign = if op.negated { "!" } else { "" };
				format!("{sign}{}", op.var.index())
			})
			.collect();
		names.sort();
		match kind {
			GateKind::And => names.join("&"),
			GateKind::Or => names.join("|"),
			GateKind::AtLeast(m) => format!("atl{m}of{}", names.join("&")),
		}
	}

	/// Add the rows enforcing `f`, which must be a simplified formula that is not
	/// a constant.
	pub(crate) fn lower(&mut self, f: &Formula) -> Result<(), InferenceError> {
		match f {
			Formula::Variable(_) | Formula::Negation(_) => {
				let op = self.operand(f)?;
				let value = if op.negated { 0.0 } else { 1.0 };
				let _ = self
					.solver
					.add_equality_constraint(vec![(op.var, 1.0)], value);
			}
			Formula::Conjunction(ch) => {
				let mut literals = Vec::new();
				for c in ch {
					if c.is_literal() {
						literals.push(self.operand(c)?);
					} else {
						self.lower(c)?;
					}
				}
				if !literals.is_empty() {
					let sum = LinearSum::of(&literals, 1.0);
					let _ = self
						.solver
						.add_equality_constraint(sum.terms, literals.len() as f64 + sum.offset);
				}
			}
			Formula::Disjunction(ch) => {
				let distributed = ch.iter().find(|c| !c.is_literal()).filter(|c| {
					matches!(c, Formula::Conjunction(_) | Formula::AtLeast(..))
				});
				match distributed {
					Some(sub) => {
						// y₁ ∨ … ∨ G, with G requiring k of its children: k·(y₁ + …) + Σ G ≥ k
						let (children, k): (Vec<&Formula>, usize) = match sub {
							Formula::Conjunction(sc) => (sc.iter().collect(), sc.len()),
							Formula::AtLeast(sc, m) => (sc.iter().collect(), *m),
							_ => unreachable!(),
						};
						let mut others = Vec::new();
						for c in ch.iter().filter(|c| *c != sub) {
							others.push(self.operand(c)?);
						}
						let mut inner = Vec::with_capacity(children.len());
						for c in children {
							inner.push(self.operand(c)?);
						}
						let k = k as f64;
						let mut sum = LinearSum::of(&others, k);
						sum.extend(&inner, 1.0);
						let _ = self
							.solver
							.add_greater_than_constraint(sum.terms, k + sum.offset);
					}
					None => {
						let mut ops = Vec::with_capacity(ch.len());
						for c in ch {
							ops.push(self.operand(c)?);
						}
						let sum = LinearSum::of(&ops, 1.0);
						let _ = self
							.solver
							.add_greater_than_constraint(sum.terms, 1.0 + sum.offset);
					}
				}
			}
			Formula::AtLeast(ch, m) => {
				let mut ops = Vec::with_capacity(ch.len());
				for c in ch {
					ops.push(self.operand(c)?);
				}
				let sum = LinearSum::of(&ops, 1.0);
				let _ = self
					.solver
					.add_greater_than_constraint(sum.terms, *m as f64 + sum.offset);
			}
			Formula::DoubleImplication(l, r) => {
				let (l, r) = (self.operand(l)?, self.operand(r)?);
				let mut sum = LinearSum::of(&[l], 1.0);
				sum.extend(&[r], -1.0);
				let _ = self.solver.add_equality_constraint(sum.terms, sum.offset);
			}
			Formula::Implication(..) => {
				unreachable!("implications are removed by simplification before lowering")
			}
			Formula::Constant(_) => {
				unreachable!("constant formulas are resolved before lowering")
			}
		}
		Ok(())
	}

	/// The operand representing `f` when it occurs nested inside another
	/// formula, creating a gate variable for compound formulas.
	fn operand(&mut self, f: &Formula) -> Result<Operand, InferenceError> {
		let (kind, children): (GateKind, Vec<&Formula>) = match f {
			Formula::Variable(lit) => {
				let var = self
					.columns
					.get(lit)
					.copied()
					.ok_or_else(|| InferenceError::UnknownLiteral(lit.clone()))?;
				return Ok(Operand {
					var,
					negated: false,
				});
			}
			Formula::Negation(c) => {
				let Formula::Variable(_) = c.as_ref() else {
					panic!("negation of compound formula `{c}' reached lowering");
				};
				let op = self.operand(c)?;
				return Ok(Operand {
					negated: true,
					..op
				});
			}
			Formula::Conjunction(ch) => (GateKind::And, ch.iter().collect()),
			Formula::Disjunction(ch) => (GateKind::Or, ch.iter().collect()),
			Formula::AtLeast(ch, m) => (GateKind::AtLeast(*m), ch.iter().collect()),
			Formula::DoubleImplication(..) => {
				unreachable!("double implications are only lowered at the top level")
			}
			Formula::Implication(..) => {
				unreachable!("implications are removed by simplification before lowering")
			}
			Formula::Constant(_) => unreachable!("constants are removed by simplification"),
		};
		let mut ops = Vec::with_capacity(children.len());
		for c in children {
			ops.push(self.operand(c)?);
		}
		Ok(Operand {
			var: self.gate(kind, &ops),
			negated: false,
		})
	}
}

impl LinearSum {
	/// Add the operands with coefficient `coef`.
	fn extend(&mut self, ops: &[Operand], coef: f64) {
		for op in ops {
			if op.negated {
				self.terms.push((op.var, -coef));
				self.offset -= coef;
			} else {
				self.terms.push((op.var, coef));
			}
		}
	}

	/// The sum of the operands, each with coefficient `coef`.
	fn of(ops: &[Operand], coef: f64) -> Self {
		let mut sum = Self::default();
		sum.extend(ops, coef);
		sum
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use expect_test::expect;
	use tracing_test::traced_test;

	use crate::{
		formula::Formula,
		ilp::{IlpVar, ZeroOneIlpProblem},
		inference::lower::Lowering,
		solver::{exhaustive::ExhaustiveSolver, IlpSolver, SolverConfig},
		ClassifierId, ExampleId, GroundLiteral,
	};

	/// Create a solver with one boolean variable per literal label.
	fn setup(labels: &[&str]) -> (ExhaustiveSolver, HashMap<GroundLiteral, IlpVar>, Vec<Formula>) {
		let mut slv = ExhaustiveSolver::with_problem(ZeroOneIlpProblem::default(), SolverConfig::default());
		let mut columns = HashMap::new();
		let mut lits = Vec::new();
		for l in labels {
			let f = Formula::literal(ClassifierId::new(0), ExampleId::new(0), *l);
			let Formula::Variable(lit) = &f else {
				unreachable!()
			};
			let _ = columns.insert(lit.clone(), slv.add_boolean_variable(0.0));
			lits.push(f);
		}
		(slv, columns, lits)
	}

	#[test]
	#[traced_test]
	fn test_lower_rows() {
		let (mut slv, columns, l) = setup(&["a", "b", "c", "d"]);
		let f = Formula::conjunction([
			Formula::negation(l[0].clone()),
			l[1].clone(),
			Formula::or(l[2].clone(), Formula::and(l[0].clone(), l[3].clone())),
			Formula::at_least(vec![l[1].clone(), l[2].clone(), Formula::negation(l[3].clone())], 2),
			Formula::equivalence(l[2].clone(), Formula::or(l[0].clone(), l[1].clone())),
		]);
		let mut lowering = Lowering::new(&mut slv, &columns);
		lowering.lower(&f).unwrap();
		assert_eq!(lowering.gates(), 1);
		let mut out = String::new();
		slv.write(&mut out).unwrap();
		expect![[r#"
			min +0.0 x_0 +0.0 x_1 +0.0 x_2 +0.0 x_3 +0.0 x_4
			  +1.0 x_0 +2.0 x_2 +1.0 x_3 >= 2.0
			  +1.0 x_0 +1.0 x_1 -1.0 x_4 >= 0.0
			  +1.0 x_0 +1.0 x_1 -2.0 x_4 <= 0.0
			  +1.0 x_2 -1.0 x_4 = 0.0
			  +1.0 x_1 +1.0 x_2 -1.0 x_3 >= 1.0
			  -1.0 x_0 +1.0 x_1 = 1.0
		"#]]
		.assert_eq(&out);
	}

	#[test]
	#[traced_test]
	fn test_gates_are_shared() {
		let (mut slv, columns, l) = setup(&["a", "b", "c"]);
		let ab = Formula::and(l[0].clone(), Formula::negation(l[1].clone()));
		let f = Formula::and(
			Formula::or(l[2].clone(), Formula::at_least(vec![ab.clone(), l[2].clone(), l[1].clone()], 2)),
			Formula::or(
				Formula::negation(l[2].clone()),
				Formula::at_least(vec![ab, l[0].clone(), l[2].clone()], 2),
			),
		);
		let mut lowering = Lowering::new(&mut slv, &columns);
		lowering.lower(&f).unwrap();
		assert_eq!(lowering.gates(), 1);
		assert!(logs_contain("gate=!1&0"));
	}

	#[test]
	#[traced_test]
	fn test_lowering_preserves_models() {
		// every model of the formula extends to exactly one solution of the rows
		let (mut slv, columns, l) = setup(&["a", "b", "c"]);
		let f = Formula::and(
			Formula::or(
				Formula::and(l[0].clone(), l[1].clone()),
				Formula::and(Formula::negation(l[0].clone()), l[2].clone()),
			),
			Formula::at_least(
				vec![
					Formula::or(l[1].clone(), l[2].clone()),
					Formula::negation(l[0].clone()),
					l[2].clone(),
				],
				2,
			),
		)
		.simplify_top_level();
		let mut lowering = Lowering::new(&mut slv, &columns);
		lowering.lower(&f).unwrap();
		let prb = slv.problem().clone();
		let n = prb.columns();
		for bits in 0..(1_u32 << 3) {
			let holds = |lit: &GroundLiteral| {
				let j = columns[lit].index();
				bits & (1 << j) != 0
			};
			let model = f.evaluate(&holds);
			let extensions = (0..(1_u32 << (n - 3)))
				.filter(|gates| {
					let x: Vec<bool> = (0..n)
						.map(|j| {
							if j < 3 {
								bits & (1 << j) != 0
							} else {
								gates & (1 << (j - 3)) != 0
							}
						})
						.collect();
					prb.constraints_satisfied(&x)
				})
				.count();
			assert_eq!(extensions, usize::from(model), "assignment {bits:03b}");
		}
	}
}
