//! Bit-level float decomposition and well-behaved modulo.
//!
//! [`frexp32`]/[`frexp64`] pull a float apart into sign, biased exponent
//! and fraction with the implied bit made explicit; [`ldexp32`]/[`ldexp64`]
//! rebuild a float from such parts, normalizing denormalized fractions and
//! saturating to infinity on exponent overflow. The modulo functions return
//! a mathematical (always non-negative) remainder for negative operands,
//! which `%` does not.

/// Number of fraction bits in an `f32`.
pub const F32_FRACTION_BITS: u32 = 23;
/// Number of exponent bits in an `f32`.
pub const F32_EXPONENT_BITS: u32 = 8;

pub const F32_EXPONENT_SHIFT: u32 = F32_FRACTION_BITS;
pub const F32_SIGN_SHIFT: u32 = F32_FRACTION_BITS + F32_EXPONENT_BITS;

pub const F32_FRACTION_MASK: u32 = (1 << F32_FRACTION_BITS) - 1;
pub const F32_EXPONENT_MASK: u32 = ((1 << F32_EXPONENT_BITS) - 1) << F32_FRACTION_BITS;
pub const F32_SIGN_MASK: u32 = 1 << F32_SIGN_SHIFT;

/// The implicit leading fraction bit of a normal `f32`.
pub const F32_IMPLIED_BIT: u32 = 1 << F32_FRACTION_BITS;

pub const F32_MAX_EXPONENT: u32 = (1 << F32_EXPONENT_BITS) - 1;
pub const F32_BIAS: u32 = (1 << (F32_EXPONENT_BITS - 1)) - 1;

/// Number of fraction bits in an `f64`.
pub const F64_FRACTION_BITS: u32 = 52;
/// Number of exponent bits in an `f64`.
pub const F64_EXPONENT_BITS: u32 = 11;

pub const F64_EXPONENT_SHIFT: u32 = F64_FRACTION_BITS;
pub const F64_SIGN_SHIFT: u32 = F64_FRACTION_BITS + F64_EXPONENT_BITS;

pub const F64_FRACTION_MASK: u64 = (1 << F64_FRACTION_BITS) - 1;
pub const F64_EXPONENT_MASK: u64 = ((1u64 << F64_EXPONENT_BITS) - 1) << F64_FRACTION_BITS;
pub const F64_SIGN_MASK: u64 = 1 << F64_SIGN_SHIFT;

/// The implicit leading fraction bit of a normal `f64`.
pub const F64_IMPLIED_BIT: u64 = 1 << F64_FRACTION_BITS;

pub const F64_MAX_EXPONENT: u64 = (1 << F64_EXPONENT_BITS) - 1;
pub const F64_BIAS: u64 = (1 << (F64_EXPONENT_BITS - 1)) - 1;

/// Splits `f` into sign, biased exponent and fraction, setting the implied
/// fraction bit for normal values.
pub fn frexp32(f: f32) -> (u32, u32, u32) {
    let bits = f.to_bits();
    let sign = (bits & F32_SIGN_MASK) >> F32_SIGN_SHIFT;
    let exponent = (bits & F32_EXPONENT_MASK) >> F32_EXPONENT_SHIFT;
    let fraction = bits & F32_FRACTION_MASK;
    if exponent == 0 {
        (sign, 0, fraction)
    } else {
        (sign, exponent, fraction | F32_IMPLIED_BIT)
    }
}

/// Assembles an `f32` from sign, biased exponent and fraction.
///
/// The fraction is expected to carry the implied bit; a denormalized
/// fraction is normalized against the exponent first. Exponent overflow
/// saturates to infinity.
pub fn ldexp32(sign: u32, exponent: u32, fraction: u32) -> f32 {
    if fraction == 0 {
        return f32::from_bits(sign << F32_SIGN_SHIFT);
    }

    let mut exponent = exponent;
    let mut fraction = fraction;

    // One leading zero belongs to the sign bit and one is reclaimed by the
    // implied fraction bit, so the exponent width is the exact correction.
    let mut shift = fraction.leading_zeros() as i32 - F32_EXPONENT_BITS as i32;
    if shift <= 0 {
        if exponent == 0 {
            exponent = 1;
        }
        exponent += (-shift) as u32;
    } else if shift >= exponent as i32 {
        shift = exponent as i32 - 1;
        exponent = 0;
    } else {
        exponent -= shift as u32;
    }

    if exponent >= F32_MAX_EXPONENT {
        exponent = F32_MAX_EXPONENT;
        fraction = 0;
    } else if shift > 0 {
        fraction <<= shift as u32;
    } else if shift < 0 {
        fraction >>= (-shift) as u32;
    }

    f32::from_bits((sign << F32_SIGN_SHIFT) | (exponent << F32_EXPONENT_SHIFT) | (fraction & F32_FRACTION_MASK))
}

/// Splits `f` into sign, biased exponent and fraction, setting the implied
/// fraction bit for normal values.
pub fn frexp64(f: f64) -> (u64, u64, u64) {
    let bits = f.to_bits();
    let sign = (bits & F64_SIGN_MASK) >> F64_SIGN_SHIFT;
    let exponent = (bits & F64_EXPONENT_MASK) >> F64_EXPONENT_SHIFT;
    let fraction = bits & F64_FRACTION_MASK;
    if exponent == 0 {
        (sign, 0, fraction)
    } else {
        (sign, exponent, fraction | F64_IMPLIED_BIT)
    }
}

/// Assembles an `f64` from sign, biased exponent and fraction.
///
/// The fraction is expected to carry the implied bit; a denormalized
/// fraction is normalized against the exponent first. Exponent overflow
/// saturates to infinity.
pub fn ldexp64(sign: u64, exponent: u64, fraction: u64) -> f64 {
    if fraction == 0 {
        return f64::from_bits(sign << F64_SIGN_SHIFT);
    }

    let mut exponent = exponent;
    let mut fraction = fraction;

    let mut shift = fraction.leading_zeros() as i64 - F64_EXPONENT_BITS as i64;
    if shift <= 0 {
        if exponent == 0 {
            exponent = 1;
        }
        exponent += (-shift) as u64;
    } else if shift >= exponent as i64 {
        shift = exponent as i64 - 1;
        exponent = 0;
    } else {
        exponent -= shift as u64;
    }

    if exponent >= F64_MAX_EXPONENT {
        exponent = F64_MAX_EXPONENT;
        fraction = 0;
    } else if shift > 0 {
        fraction <<= shift as u64;
    } else if shift < 0 {
        fraction >>= (-shift) as u64;
    }

    f64::from_bits((sign << F64_SIGN_SHIFT) | (exponent << F64_EXPONENT_SHIFT) | (fraction & F64_FRACTION_MASK))
}

/// Mathematical modulo: the result is always non-negative, for any sign of
/// `x` or `divisor`.
///
/// # Panics
///
/// Panics when `divisor` is zero.
pub fn modulo(x: i64, divisor: i64) -> i64 {
    let divisor = divisor.abs();
    let remainder = x % divisor;
    if remainder < 0 {
        remainder + divisor
    } else {
        remainder
    }
}

/// Mathematical modulo for floats: always non-negative, exact for any sign
/// of `x` or `divisor`.
///
/// Returns NaN when either operand is NaN or the divisor is zero, and `|x|`
/// when the divisor is infinite.
pub fn modulo_f64(x: f64, divisor: f64) -> f64 {
    if divisor == 0.0 || x.is_nan() || divisor.is_nan() {
        return f64::NAN;
    }
    if divisor.is_infinite() {
        return x.abs();
    }
    let divisor = divisor.abs();

    // Subtract the largest power-of-two multiple of the divisor that still
    // fits; every step is exact, so no rounding error accumulates.
    let (yfr, yexp) = split(divisor);
    let mut r = x.abs();
    while r >= divisor {
        let (rfr, mut rexp) = split(r);
        if rfr < yfr {
            rexp -= 1;
        }
        r -= scale(divisor, rexp - yexp);
    }
    if x < 0.0 { divisor - r } else { r }
}

/// [`modulo_f64`] for `f32` operands. `f32` values convert to `f64`
/// exactly, so the computation is exact with a single rounding at the end.
pub fn modulo_f32(x: f32, divisor: f32) -> f32 {
    modulo_f64(f64::from(x), f64::from(divisor)) as f32
}

/// 2^64, used to pull subnormals into normal range before reading their
/// exponent.
const SUBNORMAL_SCALE: f64 = f64::from_bits((F64_BIAS + 64) << F64_EXPONENT_SHIFT);

/// Decomposes a finite, non-zero float as `fraction * 2^exponent` with the
/// fraction in `[0.5, 1)`.
fn split(x: f64) -> (f64, i64) {
    let mut x = x;
    let mut exponent = 0i64;
    if x.abs() < f64::MIN_POSITIVE {
        x *= SUBNORMAL_SCALE;
        exponent = -64;
    }
    let bits = x.to_bits();
    exponent += ((bits & F64_EXPONENT_MASK) >> F64_EXPONENT_SHIFT) as i64 - (F64_BIAS as i64 - 1);
    let fraction = f64::from_bits((bits & !F64_EXPONENT_MASK) | ((F64_BIAS - 1) << F64_EXPONENT_SHIFT));
    (fraction, exponent)
}

/// Multiplies by 2^exponent without going through `powi`, stepping in
/// maximal exact factors so intermediate products cannot overflow early.
fn scale(x: f64, exponent: i64) -> f64 {
    const MAX_STEP: i64 = 1023;
    const MIN_STEP: i64 = -1022;

    let mut x = x;
    let mut exponent = exponent;
    while exponent > MAX_STEP {
        x *= f64::from_bits(((F64_BIAS + MAX_STEP as u64) as u64) << F64_EXPONENT_SHIFT);
        exponent -= MAX_STEP;
    }
    while exponent < MIN_STEP {
        x *= f64::from_bits(((F64_BIAS as i64 + MIN_STEP) as u64) << F64_EXPONENT_SHIFT);
        exponent -= MIN_STEP;
    }
    x * f64::from_bits(((F64_BIAS as i64 + exponent) as u64) << F64_EXPONENT_SHIFT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::one(1.0)]
    #[case::negative(-3.5)]
    #[case::small_normal(1.0e-10)]
    #[case::max(f32::MAX)]
    #[case::min_positive(f32::MIN_POSITIVE)]
    #[case::zero(0.0)]
    #[case::negative_zero(-0.0)]
    #[case::infinity(f32::INFINITY)]
    #[case::negative_infinity(f32::NEG_INFINITY)]
    fn test_frexp_ldexp32_round_trip(#[case] value: f32) {
        let (sign, exponent, fraction) = frexp32(value);
        let rebuilt = ldexp32(sign, exponent, fraction);
        assert_eq!(rebuilt.to_bits(), value.to_bits());
    }

    #[rstest]
    #[case::one(1.0)]
    #[case::negative(-3.5)]
    #[case::small_normal(1.0e-300)]
    #[case::max(f64::MAX)]
    #[case::min_positive(f64::MIN_POSITIVE)]
    #[case::zero(0.0)]
    #[case::infinity(f64::INFINITY)]
    fn test_frexp_ldexp64_round_trip(#[case] value: f64) {
        let (sign, exponent, fraction) = frexp64(value);
        let rebuilt = ldexp64(sign, exponent, fraction);
        assert_eq!(rebuilt.to_bits(), value.to_bits());
    }

    #[test]
    fn test_frexp32_exposes_implied_bit() {
        let (sign, exponent, fraction) = frexp32(1.0);
        assert_eq!(sign, 0);
        assert_eq!(exponent, F32_BIAS);
        assert_eq!(fraction, F32_IMPLIED_BIT);
    }

    #[test]
    fn test_ldexp32_normalizes_denormalized_fraction() {
        // fraction 1 with a large exponent normalizes to an implied-bit
        // mantissa with the exponent corrected by the shift distance.
        let value = ldexp32(0, 150, 1);
        let (_, exponent, fraction) = frexp32(value);
        assert_eq!(fraction, F32_IMPLIED_BIT);
        assert_eq!(exponent, 150 - F32_FRACTION_BITS);
    }

    #[test]
    fn test_ldexp64_saturates_to_infinity() {
        let value = ldexp64(0, F64_MAX_EXPONENT + 1, F64_IMPLIED_BIT);
        assert!(value.is_infinite());
    }

    #[rstest]
    #[case(7, 3, 1)]
    #[case(-7, 3, 2)]
    #[case(7, -3, 1)]
    #[case(-7, -3, 2)]
    #[case(6, 3, 0)]
    #[case(-6, 3, 0)]
    fn test_modulo_is_always_non_negative(#[case] x: i64, #[case] divisor: i64, #[case] want: i64) {
        assert_eq!(modulo(x, divisor), want);
    }

    #[rstest]
    #[case(7.5, 2.0, 1.5)]
    #[case(-7.5, 2.0, 0.5)]
    #[case(7.5, -2.0, 1.5)]
    #[case(-7.5, -2.0, 0.5)]
    #[case(0.0, 2.0, 0.0)]
    fn test_modulo_f64(#[case] x: f64, #[case] divisor: f64, #[case] want: f64) {
        assert_eq!(modulo_f64(x, divisor), want);
    }

    #[test]
    fn test_modulo_f64_special_values() {
        assert!(modulo_f64(1.0, 0.0).is_nan());
        assert!(modulo_f64(f64::NAN, 2.0).is_nan());
        assert!(modulo_f64(1.0, f64::NAN).is_nan());
        assert_eq!(modulo_f64(-3.5, f64::INFINITY), 3.5);
    }

    #[test]
    fn test_modulo_f64_huge_ratio() {
        // Exercises the scaled-subtraction loop across a wide exponent gap.
        assert_eq!(modulo_f64(1.0e18, 3.0), 1.0);
    }

    #[test]
    fn test_modulo_f32() {
        assert_eq!(modulo_f32(-7.5, 2.0), 0.5);
        assert!(modulo_f32(1.0, 0.0).is_nan());
    }
}
