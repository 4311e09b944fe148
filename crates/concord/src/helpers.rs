//! Helper functions for comparing floating point values used as coefficients,
//! bounds, and objective values.

/// Round `val` to the nearest integer if it lies within `tolerance` of it,
/// otherwise return `val` unchanged.
pub(crate) fn snap_to_integer(val: f64, tolerance: f64) -> f64 {
	let rounded = val.round();
	if (rounded - val).abs() < tolerance {
		rounded
	} else {
		val
	}
}

#[inline]
/// Check whether two values are equal within `tolerance`.
pub(crate) fn approx_eq(a: f64, b: f64, tolerance: f64) -> bool {
	(a - b).abs() < tolerance
}
