use crate::error::{bail, Trap};

// Portions adapted from wasmtime's libcalls.
const TOINT_32: f32 = 1.0 / f32::EPSILON;
const TOINT_64: f64 = 1.0 / f64::EPSILON;

/// Round to nearest, ties to even.
pub(crate) fn nearestf32(x: f32) -> f32 {
    let i = x.to_bits();
    let e = i >> 23 & 0xff;
    if e >= 0x7f_u32 + 23 {
        // Quiet any NaN.
        if e == 0xff && i & 0x7fffff != 0 {
            return f32::from_bits(i | (1 << 22));
        }
        x
    } else {
        f32::copysign(f32::abs(x) + TOINT_32 - TOINT_32, x)
    }
}

pub(crate) fn nearestf64(x: f64) -> f64 {
    let i = x.to_bits();
    let e = i >> 52 & 0x7ff;
    if e >= 0x3ff_u64 + 52 {
        if e == 0x7ff && i & 0xfffffffffffff != 0 {
            return f64::from_bits(i | (1 << 51));
        }
        x
    } else {
        f64::copysign(f64::abs(x) + TOINT_64 - TOINT_64, x)
    }
}

macro_rules! float_minmax {
    ($min:ident, $max:ident, $t:ty) => {
        /// NaN in either operand wins, and -0 sorts below +0.
        pub(crate) fn $min(lhs: $t, rhs: $t) -> $t {
            if lhs.is_nan() || rhs.is_nan() {
                return <$t>::NAN;
            }
            if lhs == rhs {
                // Only differs for signed zeros.
                return if lhs.is_sign_negative() { lhs } else { rhs };
            }
            lhs.min(rhs)
        }

        pub(crate) fn $max(lhs: $t, rhs: $t) -> $t {
            if lhs.is_nan() || rhs.is_nan() {
                return <$t>::NAN;
            }
            if lhs == rhs {
                return if lhs.is_sign_positive() { lhs } else { rhs };
            }
            lhs.max(rhs)
        }
    };
}

float_minmax!(fminf32, fmaxf32, f32);
float_minmax!(fminf64, fmaxf64, f64);

/// Trapping float to integer truncation. `lo` is inclusive and `hi`
/// exclusive; both are exact in f64.
macro_rules! trunc {
    ($name:ident, $from:ty, $to:ty, $lo:expr, $hi:expr) => {
        pub(crate) fn $name(x: $from) -> Result<$to, Trap> {
            if x.is_nan() {
                bail!("invalid conversion to integer");
            }
            let x = (x as f64).trunc();
            if !(x >= $lo && x < $hi) {
                bail!("integer overflow");
            }
            Ok(x as $to)
        }
    };
}

const TWO_31: f64 = 2147483648.0;
const TWO_32: f64 = 4294967296.0;
const TWO_63: f64 = 9223372036854775808.0;
const TWO_64: f64 = 18446744073709551616.0;

trunc!(i32_trunc_f32, f32, i32, -TWO_31, TWO_31);
trunc!(u32_trunc_f32, f32, u32, 0.0, TWO_32);
trunc!(i32_trunc_f64, f64, i32, -TWO_31, TWO_31);
trunc!(u32_trunc_f64, f64, u32, 0.0, TWO_32);
trunc!(i64_trunc_f32, f32, i64, -TWO_63, TWO_63);
trunc!(u64_trunc_f32, f32, u64, 0.0, TWO_64);
trunc!(i64_trunc_f64, f64, i64, -TWO_63, TWO_63);
trunc!(u64_trunc_f64, f64, u64, 0.0, TWO_64);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_nearest_ties_to_even() {
        assert_eq!(nearestf32(2.5), 2.0);
        assert_eq!(nearestf32(3.5), 4.0);
        assert_eq!(nearestf64(-0.5), -0.0);
        assert!(nearestf64(-0.5).is_sign_negative());
        assert!(nearestf64(f64::NAN).is_nan());
    }

    #[test]
    fn test_minmax_zeros_and_nan() {
        assert!(fminf32(0.0, -0.0).is_sign_negative());
        assert!(fmaxf32(-0.0, 0.0).is_sign_positive());
        assert!(fminf64(1.0, f64::NAN).is_nan());
        assert_eq!(fmaxf64(1.0, 2.0), 2.0);
    }

    #[test]
    fn test_trunc_bounds() -> anyhow::Result<()> {
        assert_eq!(i32_trunc_f64(-2147483648.9)?, i32::MIN);
        assert_eq!(i32_trunc_f32(-1.9)?, -1);
        assert_eq!(u32_trunc_f64(-0.9)?, 0);
        assert_eq!(u64_trunc_f64(1e19)?, 10_000_000_000_000_000_000);

        assert_eq!(i32_trunc_f64(2147483648.0).unwrap_err().message(), "integer overflow");
        assert_eq!(
            u32_trunc_f32(f32::NAN).unwrap_err().message(),
            "invalid conversion to integer"
        );
        assert!(i64_trunc_f32(f32::INFINITY).is_err());
        assert!(u64_trunc_f32(-1.0).is_err());
        Ok(())
    }
}
