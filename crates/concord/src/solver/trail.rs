//! Trail of search decisions, used to restore the state of the search when
//! backtracking.

use std::vec::Drain;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// A trail of events, partitioned into levels, that can be undone in reverse
/// order.
pub(crate) struct Trail {
	/// The events recorded on the trail.
	events: Vec<TrailEvent>,
	/// The length of `events` at the start of each level.
	prev_len: Vec<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// An event that is recorded such that it can be undone.
pub(crate) enum TrailEvent {
	/// A variable was set to one.
	Assign(usize),
	/// A variable was made ineligible for branching.
	Cancel(usize),
}

impl Trail {
	/// The number of levels that have been pushed, but not yet popped.
	pub(crate) fn level(&self) -> usize {
		self.prev_len.len()
	}

	/// Remove the events of the most recent level from the trail, returning them
	/// in the order they must be undone (i.e., most recent first).
	pub(crate) fn pop_level(&mut self) -> std::iter::Rev<Drain<'_, TrailEvent>> {
		let len = self
			.prev_len
			.pop()
			.expect("pop_level called without a matching push_level");
		debug_assert!(len <= self.events.len());
		self.events.drain(len..).rev()
	}

	/// Start a new level on the trail.
	pub(crate) fn push_level(&mut self) {
		self.prev_len.push(self.events.len());
	}

	/// Record an event on the current level.
	pub(crate) fn record(&mut self, event: TrailEvent) {
		debug_assert!(!self.prev_len.is_empty(), "event recorded outside of a level");
		self.events.push(event);
	}
}
