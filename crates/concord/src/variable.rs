//! Label variables: the (classifier, example) pairs whose labels are decided
//! by joint inference, and the registry that keeps one canonical instance of
//! each.

use std::{cell::OnceCell, collections::HashMap, fmt};

use index_vec::{define_index_type, IndexVec};

use crate::{ClassifierId, ExampleId, Score};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// The identity of a label variable: a classifier applied to an example.
pub struct LabelVar {
	/// The classifier that predicts the label.
	pub classifier: ClassifierId,
	/// The example for which the label is predicted.
	pub example: ExampleId,
}

#[derive(Clone, Debug, PartialEq)]
/// The canonical instance of a label variable, holding the scores of its
/// candidate labels and the label chosen by inference.
pub struct LabelVariable {
	/// The identity of the variable.
	var: LabelVar,
	/// The scores of the candidate labels, fetched on first use.
	scores: OnceCell<Vec<Score>>,
	/// The label chosen by the last successful inference.
	chosen: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
/// Registry of the canonical [`LabelVariable`] instances, in the order in which
/// they were first encountered.
pub struct VariableRegistry {
	/// The canonical instances.
	vars: IndexVec<LabelVarId, LabelVariable>,
	/// Map from variable identity to its canonical instance.
	lookup: HashMap<LabelVar, LabelVarId>,
}

impl LabelVar {
	/// Create the identity of the label variable for `classifier` applied to
	/// `example`.
	pub fn new(classifier: ClassifierId, example: ExampleId) -> Self {
		Self {
			classifier,
			example,
		}
	}
}

impl fmt::Display for LabelVar {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}({})", self.classifier, self.example)
	}
}

impl LabelVariable {
	/// The label chosen by the last successful inference, if any.
	pub fn chosen(&self) -> Option<&str> {
		self.chosen.as_deref()
	}

	/// The scores of the candidate labels, if they have already been fetched.
	pub fn scores(&self) -> Option<&[Score]> {
		self.scores.get().map(Vec::as_slice)
	}

	/// The scores of the candidate labels, fetching them using `fetch` if this
	/// has not happened yet.
	pub fn scores_or_fetch(&self, fetch: impl FnOnce() -> Vec<Score>) -> &[Score] {
		self.scores.get_or_init(fetch)
	}

	/// The identity of the variable.
	pub fn var(&self) -> LabelVar {
		self.var
	}
}

impl VariableRegistry {
	/// Forget the labels chosen by previous inferences.
	pub fn clear_chosen(&mut self) {
		for v in self.vars.iter_mut() {
			v.chosen = None;
		}
	}

	/// Access the canonical instance of `var`, if it has been registered.
	pub fn get(&self, var: LabelVar) -> Option<&LabelVariable> {
		self.lookup.get(&var).map(|&id| &self.vars[id])
	}

	/// The index of the canonical instance of `var`, if it has been registered.
	pub fn id(&self, var: LabelVar) -> Option<LabelVarId> {
		self.lookup.get(&var).copied()
	}

	/// Returns whether no variables have been registered.
	pub fn is_empty(&self) -> bool {
		self.vars.is_empty()
	}

	/// Iterate over the canonical instances in registration order.
	pub fn iter(&self) -> impl Iterator<Item = &LabelVariable> + '_ {
		self.vars.iter()
	}

	/// Iterate over the canonical instances and their indices in registration
	/// order.
	pub fn iter_enumerated(&self) -> impl Iterator<Item = (LabelVarId, &LabelVariable)> + '_ {
		self.vars.iter_enumerated()
	}

	/// The number of registered variables.
	pub fn len(&self) -> usize {
		self.vars.len()
	}

	/// Return the index of the canonical instance of `var`, registering it if it
	/// has not been seen before.
	pub fn register(&mut self, var: LabelVar) -> LabelVarId {
		if let Some(&id) = self.lookup.get(&var) {
			return id;
		}
		let id = self.vars.push(LabelVariable {
			var,
			scores: OnceCell::new(),
			chosen: None,
		});
		let _ = self.lookup.insert(var, id);
		id
	}

	/// Record the label chosen for variable `id`.
	pub fn set_chosen(&mut self, id: LabelVarId, label: String) {
		self.vars[id].chosen = Some(label);
	}
}

define_index_type! {
	/// Reference to a canonical [`LabelVariable`] in a [`VariableRegistry`].
	pub struct LabelVarId = u32;
}

#[cfg(test)]
mod tests {
	use crate::{
		variable::{LabelVar, VariableRegistry},
		ClassifierId, ExampleId, Score,
	};

	#[test]
	fn test_register_is_canonical() {
		let mut reg = VariableRegistry::default();
		let a = LabelVar::new(ClassifierId::new(0), ExampleId::new(3));
		let b = LabelVar::new(ClassifierId::new(1), ExampleId::new(3));

		let ia = reg.register(a);
		let ib = reg.register(b);
		assert_ne!(ia, ib);
		assert_eq!(reg.register(a), ia);
		assert_eq!(reg.len(), 2);
		assert_eq!(reg.id(b), Some(ib));
		assert_eq!(a.to_string(), "c0(e3)");

		let order: Vec<LabelVar> = reg.iter().map(|v| v.var()).collect();
		assert_eq!(order, vec![a, b]);
	}

	#[test]
	fn test_scores_are_cached() {
		let mut reg = VariableRegistry::default();
		let a = LabelVar::new(ClassifierId::new(0), ExampleId::new(0));
		let _ = reg.register(a);
		let v = reg.get(a).unwrap();
		assert!(v.scores().is_none());

		let mut calls = 0;
		let first = v
			.scores_or_fetch(|| {
				calls += 1;
				vec![Score::new("A", 1.0)]
			})
			.len();
		let second = v
			.scores_or_fetch(|| {
				calls += 1;
				Vec::new()
			})
			.len();
		assert_eq!((first, second, calls), (1, 1, 1));
	}

	#[test]
	fn test_chosen_labels() {
		let mut reg = VariableRegistry::default();
		let a = LabelVar::new(ClassifierId::new(0), ExampleId::new(0));
		let id = reg.register(a);
		reg.set_chosen(id, "yes".to_owned());
		assert_eq!(reg.get(a).unwrap().chosen(), Some("yes"));
		reg.clear_chosen();
		assert_eq!(reg.get(a).unwrap().chosen(), None);
	}
}
