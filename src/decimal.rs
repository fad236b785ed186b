//! Decimal-precision helpers backing the erasure codec
//!
//! The erasure codec needs to know, for a given double, how many decimal
//! places (`alpha`) and significant decimal digits (`beta*`) are required
//! to reproduce it exactly. These helpers derive both by scaling the value
//! through powers of ten until an integer is reached, verified by dividing
//! back. The search is capped at [`MAX_SIGNIFICANT_DIGITS`]; values that
//! are not exactly representable within the cap are reported as such and
//! left unerased by the caller.
//!
//! Everything here is total for finite inputs: out-of-range cases that
//! cannot arise from well-formed data resolve to the capped fallback
//! instead of panicking.

/// Hard bound on the significant-decimal-digit search.
///
/// A double carries at most 17 significant decimal digits; any value that
/// needs more is not an exact decimal and gains nothing from erasure.
pub(crate) const MAX_SIGNIFICANT_DIGITS: i32 = 17;

/// Sentinel for "no beta* seen yet in this block"
pub(crate) const BETA_UNSET: i32 = i32::MAX;

const LOG2_10: f64 = 3.321928094887362;

/// Mantissa bits needed to carry `alpha` decimal places, for small `alpha`
const F_ALPHA: [i32; 21] = [
    0, 4, 7, 10, 14, 17, 20, 24, 27, 30, 34, 37, 40, 44, 47, 50, 54, 57, 60, 64, 67,
];

const POW10_POS: [f64; 21] = [
    1.0, 1.0e1, 1.0e2, 1.0e3, 1.0e4, 1.0e5, 1.0e6, 1.0e7, 1.0e8, 1.0e9, 1.0e10, 1.0e11, 1.0e12,
    1.0e13, 1.0e14, 1.0e15, 1.0e16, 1.0e17, 1.0e18, 1.0e19, 1.0e20,
];

const POW10_NEG: [f64; 21] = [
    1.0, 1.0e-1, 1.0e-2, 1.0e-3, 1.0e-4, 1.0e-5, 1.0e-6, 1.0e-7, 1.0e-8, 1.0e-9, 1.0e-10,
    1.0e-11, 1.0e-12, 1.0e-13, 1.0e-14, 1.0e-15, 1.0e-16, 1.0e-17, 1.0e-18, 1.0e-19, 1.0e-20,
];

const SP_GREATER_1: [f64; 10] = [
    1.0, 10.0, 100.0, 1000.0, 10000.0, 100000.0, 1000000.0, 10000000.0, 100000000.0, 1000000000.0,
];

const SP_LESS_1: [f64; 11] = [
    1.0, 0.1, 0.01, 0.001, 0.0001, 0.00001, 0.000001, 0.0000001, 0.00000001, 0.000000001,
    0.0000000001,
];

/// 10^i for i >= 0, table-backed for the common range
pub(crate) fn pow10(i: i32) -> f64 {
    debug_assert!(i >= 0);
    match POW10_POS.get(i as usize) {
        Some(&p) => p,
        None => 10f64.powi(i),
    }
}

/// 10^-i for i >= 0, table-backed for the common range
pub(crate) fn pow10_neg(i: i32) -> f64 {
    debug_assert!(i >= 0);
    match POW10_NEG.get(i as usize) {
        Some(&p) => p,
        None => 10f64.powi(-i),
    }
}

/// Mantissa bits consumed by `alpha` decimal places
pub(crate) fn f_alpha(alpha: i32) -> i32 {
    debug_assert!(alpha >= 0);
    match F_ALPHA.get(alpha as usize) {
        Some(&f) => f,
        None => (alpha as f64 * LOG2_10).ceil() as i32,
    }
}

/// Decimal position of the leading significant digit of `v` (v > 0).
///
/// `sp(123.4) == 2`, `sp(0.01) == -2`. Table-driven over the common range,
/// falling back to `floor(log10(v))`.
pub(crate) fn get_sp(v: f64) -> i32 {
    if v >= 1.0 {
        for i in 0..SP_GREATER_1.len() - 1 {
            if v < SP_GREATER_1[i + 1] {
                return i as i32;
            }
        }
    } else {
        for i in 1..SP_LESS_1.len() {
            if v >= SP_LESS_1[i] {
                return -(i as i32);
            }
        }
    }
    v.log10().floor() as i32
}

/// Like [`get_sp`] but also reports whether `v` is an exact power of ten.
///
/// The table branch for `v >= 1` never reports an exact power: those
/// values have all-zero low mantissa bits and are handled by the raw path
/// upstream, so the distinction only matters below 1.
fn sp_and_pow10_flag(v: f64) -> (i32, bool) {
    if v >= 1.0 {
        for i in 0..SP_GREATER_1.len() - 1 {
            if v < SP_GREATER_1[i + 1] {
                return (i as i32, false);
            }
        }
    } else {
        for i in 1..SP_LESS_1.len() {
            if v >= SP_LESS_1[i] {
                return (-(i as i32), v == SP_LESS_1[i]);
            }
        }
    }
    let log10v = v.log10();
    (log10v.floor() as i32, (log10v as i64) as f64 == log10v)
}

/// Count the significant decimal digits of `v` (v > 0).
///
/// Starts the scale search from a hint derived from `last_beta_star`
/// (consecutive values in a block usually share precision), then widens
/// until `v * 10^i` is integral. Returns [`MAX_SIGNIFICANT_DIGITS`] when
/// the search overflows the exactly-representable integer range, meaning
/// `v` is not an exact decimal.
fn significant_count(v: f64, sp: i32, last_beta_star: i32) -> i32 {
    let mut i = if last_beta_star != BETA_UNSET && last_beta_star != 0 {
        (last_beta_star - sp - 1).max(1)
    } else if last_beta_star == BETA_UNSET {
        MAX_SIGNIFICANT_DIGITS - sp - 1
    } else if sp >= 0 {
        1
    } else {
        -sp
    };
    if i < 0 {
        return MAX_SIGNIFICANT_DIGITS;
    }

    let mut temp = v * pow10(i);
    loop {
        // Past this magnitude the i64 cast can no longer be exact, so the
        // search cannot converge: report the capped fallback.
        if !temp.is_finite() || temp.abs() >= 9.223372036854776e18 {
            return MAX_SIGNIFICANT_DIGITS;
        }
        if (temp as i64) as f64 == temp {
            break;
        }
        i += 1;
        temp = v * pow10(i);
    }

    if temp / pow10(i) != v {
        return MAX_SIGNIFICANT_DIGITS;
    }

    let mut t = temp as i64;
    while i > 0 && t % 10 == 0 {
        i -= 1;
        t /= 10;
    }
    sp + i + 1
}

/// Decimal place count and significant-digit count for `v`.
///
/// Returns `(alpha, beta_star)` where `alpha` is the number of decimal
/// places needed to represent `v` exactly and `beta_star` the significant
/// digit count, collapsed to 0 when `v` is an exact power of ten.
pub(crate) fn alpha_and_beta_star(v: f64, last_beta_star: i32) -> (i32, i32) {
    let v = v.abs();
    let (sp, is_pow10) = sp_and_pow10_flag(v);
    let beta = significant_count(v, sp, last_beta_star);
    let alpha = beta - sp - 1;
    let beta_star = if is_pow10 { 0 } else { beta };
    (alpha, beta_star)
}

/// Round `v` away from zero at `alpha` decimal places.
///
/// This is the exact inverse of mantissa erasure: the erased pattern is
/// always below the original in magnitude, so rounding up at the known
/// precision recovers the original decimal exactly.
pub(crate) fn round_up(v: f64, alpha: i32) -> f64 {
    let scale = pow10(alpha);
    if v < 0.0 {
        (v * scale).floor() / scale
    } else {
        (v * scale).ceil() / scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sp_positions() {
        assert_eq!(get_sp(1.0), 0);
        assert_eq!(get_sp(9.99), 0);
        assert_eq!(get_sp(123.4), 2);
        assert_eq!(get_sp(0.5), -1);
        assert_eq!(get_sp(0.01), -2);
        assert_eq!(get_sp(0.000123), -4);
        // outside the tables
        assert_eq!(get_sp(1.0e12), 12);
    }

    #[test]
    fn test_alpha_and_beta_star_plain_decimals() {
        // 3.14 -> two decimal places, three significant digits
        let (alpha, beta_star) = alpha_and_beta_star(3.14, BETA_UNSET);
        assert_eq!(alpha, 2);
        assert_eq!(beta_star, 3);

        // 123.456 -> three places, six digits
        let (alpha, beta_star) = alpha_and_beta_star(123.456, BETA_UNSET);
        assert_eq!(alpha, 3);
        assert_eq!(beta_star, 6);

        // sign does not matter
        let (alpha, beta_star) = alpha_and_beta_star(-0.25, BETA_UNSET);
        assert_eq!(alpha, 2);
        assert_eq!(beta_star, 2);
    }

    #[test]
    fn test_beta_star_collapses_for_powers_of_ten() {
        let (_, beta_star) = alpha_and_beta_star(0.001, BETA_UNSET);
        assert_eq!(beta_star, 0);
        let (_, beta_star) = alpha_and_beta_star(0.1, BETA_UNSET);
        assert_eq!(beta_star, 0);
    }

    #[test]
    fn test_inexact_decimal_hits_cap() {
        let (_, beta_star) = alpha_and_beta_star(std::f64::consts::PI, BETA_UNSET);
        assert_eq!(beta_star, MAX_SIGNIFICANT_DIGITS);

        // values far outside the scalable range resolve to the cap too
        let beta = significant_count(1.0e-300, -300, BETA_UNSET);
        assert_eq!(beta, MAX_SIGNIFICANT_DIGITS);
    }

    #[test]
    fn test_round_up_recovers_decimals() {
        // truncating low mantissa bits always lands below the original
        let truncated = f64::from_bits(3.14f64.to_bits() & (u64::MAX << 30));
        assert!(truncated < 3.14);
        assert_eq!(round_up(truncated, 2), 3.14);

        let truncated = f64::from_bits((-3.14f64).to_bits() & (u64::MAX << 30));
        assert_eq!(round_up(truncated, 2), -3.14);
    }

    #[test]
    fn test_f_alpha_extension() {
        assert_eq!(f_alpha(0), 0);
        assert_eq!(f_alpha(20), 67);
        // past the table: ceil(alpha * log2(10))
        assert_eq!(f_alpha(21), 70);
    }
}
