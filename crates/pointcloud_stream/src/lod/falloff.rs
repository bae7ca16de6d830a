//! Distance shells for LOD selection.
//!
//! Shell far distances follow a hybrid linear-then-quartic falloff from the
//! closest-plane distance out to the camera far plane:
//!
//! ```text
//! g(t) = 0.5·t + 0.5·t⁴          t ∈ [0, 1]
//! d_i  = near + (far - near)·g(i / (n - 1))
//! ```
//!
//! `g` is strictly increasing on `[0, 1]`, so the series is monotonic and
//! ends exactly at the camera far plane.

use smallvec::SmallVec;

/// Smallest distance any shell may use.
pub const MIN_DISTANCE: f64 = f64::EPSILON;

/// Hybrid falloff curve, `g(0) = 0`, `g(1) = 1`.
#[inline]
pub fn falloff(t: f64) -> f64 {
  let t = t.clamp(0.0, 1.0);
  0.5 * t + 0.5 * t.powi(4)
}

/// Far distance of each shell, nearest first.
///
/// `closest` is scaled by `hint` and clamped into `[MIN_DISTANCE, far]`.
/// Non-finite inputs yield an empty series.
pub fn distance_series(closest: f64, hint: f64, far: f64, count: usize) -> SmallVec<[f64; 8]> {
  let mut out = SmallVec::new();
  if count == 0 || !closest.is_finite() || !hint.is_finite() || !far.is_finite() {
    return out;
  }
  let far = far.max(MIN_DISTANCE);
  let near = (closest * hint).clamp(MIN_DISTANCE, far);
  if count == 1 {
    out.push(far);
    return out;
  }
  let last = (count - 1) as f64;
  for i in 0..count {
    out.push(near + (far - near) * falloff(i as f64 / last));
  }
  out
}

/// Tree depth targeted by shell `shell`, deepest for the nearest shell.
#[inline]
pub fn shell_depth(max_depth: u32, shell: usize) -> u32 {
  let shell = u32::try_from(shell).unwrap_or(u32::MAX);
  max_depth.saturating_sub(shell)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_falloff_endpoints() {
    assert_eq!(falloff(0.0), 0.0);
    assert_eq!(falloff(1.0), 1.0);
    assert_eq!(falloff(0.5), 0.25 + 0.03125);
    assert_eq!(falloff(-3.0), 0.0);
  }

  #[test]
  fn test_series_monotonic_and_bounded() {
    for count in [2, 4, 6, 16] {
      let series = distance_series(100.0, 1.0, 10_000.0, count);
      assert_eq!(series.len(), count);
      assert_eq!(series[0], 100.0);
      assert_eq!(*series.last().unwrap(), 10_000.0);
      assert!(series.windows(2).all(|w| w[0] < w[1]), "{series:?}");
    }
  }

  #[test]
  fn test_hint_scales_closest_distance() {
    let near = distance_series(100.0, 1.0, 10_000.0, 4);
    let far = distance_series(100.0, 3.0, 10_000.0, 4);
    assert_eq!(far[0], 300.0);
    assert!(far.iter().zip(&near).all(|(a, b)| a >= b));
  }

  #[test]
  fn test_degenerate_inputs_clamp() {
    let series = distance_series(0.0, 0.0, 500.0, 3);
    assert_eq!(series[0], MIN_DISTANCE);
    // Closest beyond far collapses to far
    let series = distance_series(1e9, 1.0, 500.0, 3);
    assert!(series.iter().all(|d| *d == 500.0));
    assert_eq!(distance_series(100.0, 1.0, 500.0, 1).as_slice(), &[500.0]);
    assert!(distance_series(f64::NAN, 1.0, 500.0, 3).is_empty());
    assert!(distance_series(100.0, 1.0, 500.0, 0).is_empty());
  }

  #[test]
  fn test_shell_depth_clamps_at_root() {
    assert_eq!(shell_depth(5, 0), 5);
    assert_eq!(shell_depth(5, 2), 3);
    assert_eq!(shell_depth(5, 9), 0);
  }
}
