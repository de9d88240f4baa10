//! Cantor pairing: a bijection between pairs of non-negative integers and
//! single integers, used to build flat ids from composite keys.
//!
//! All arithmetic is done in `u128` with an integer square root, so the
//! round trip is exact for every `u64` result.

/// `(x + y)(x + y + 1) / 2 + y`, or `None` when the result does not fit in a
/// `u64`.
pub fn pair(x: u64, y: u64) -> Option<u64> {
    let sum = u128::from(x) + u128::from(y);
    let n = sum * (sum + 1) / 2 + u128::from(y);
    u64::try_from(n).ok()
}

/// Inverse of [`pair`].
pub fn unpair(n: u64) -> (u64, u64) {
    let n = u128::from(n);
    // Index of the diagonal containing `n`.
    let w = ((8 * n + 1).isqrt() - 1) / 2;
    let t = w * (w + 1) / 2;
    let y = n - t;
    let x = w - y;
    // Both halves are bounded by `w`, which is below 2^33.
    (x as u64, y as u64)
}
