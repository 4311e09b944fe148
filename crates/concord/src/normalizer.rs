//! Normalizers transform the raw scores of a classifier before they are used
//! as objective coefficients.

use std::fmt::Debug;

use crate::Score;

/// Transformation applied to the scores of a label variable before the
/// corresponding ILP columns are created.
///
/// A normalizer must keep the candidate labels and their order unchanged, and
/// only transform the score values.
pub trait Normalizer: Debug {
	/// Transform the given scores.
	fn normalize(&self, scores: Vec<Score>) -> Vec<Score>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
/// Normalizer that returns the scores unchanged.
pub struct IdentityNormalizer;

#[derive(Clone, Copy, Debug, PartialEq)]
/// Normalizer that turns the scores into a probability distribution using the
/// softmax function `exp(α·sᵢ) / Σⱼ exp(α·sⱼ)`.
pub struct Softmax {
	/// The scaling factor applied to the scores.
	pub alpha: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
/// Normalizer that maps every score independently into the interval `(0, 1)`
/// using the logistic function `1 / (1 + exp(-α·sᵢ))`.
pub struct Sigmoid {
	/// The scaling factor applied to the scores.
	pub alpha: f64,
}

impl Normalizer for IdentityNormalizer {
	fn normalize(&self, scores: Vec<Score>) -> Vec<Score> {
		scores
	}
}

impl Default for Softmax {
	fn default() -> Self {
		Self { alpha: 1.0 }
	}
}

impl Normalizer for Softmax {
	fn normalize(&self, mut scores: Vec<Score>) -> Vec<Score> {
		// shift by the maximum to avoid overflow
		let max = scores
			.iter()
			.map(|s| self.alpha * s.value)
			.fold(f64::NEG_INFINITY, f64::max);
		let mut total = 0.0;
		for s in scores.iter_mut() {
			s.value = (self.alpha * s.value - max).exp();
			total += s.value;
		}
		for s in scores.iter_mut() {
			s.value /= total;
		}
		scores
	}
}

impl Default for Sigmoid {
	fn default() -> Self {
		Self { alpha: 1.0 }
	}
}

impl Normalizer for Sigmoid {
	fn normalize(&self, mut scores: Vec<Score>) -> Vec<Score> {
		for s in scores.iter_mut() {
			s.value = 1.0 / (1.0 + (-self.alpha * s.value).exp());
		}
		scores
	}
}
