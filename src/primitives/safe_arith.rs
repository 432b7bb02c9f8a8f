//! Safe arithmetic operations that guard against overflow.
//!
//! Reward math runs on `U256` wei amounts and 1e18 fixed-point ratios. Every
//! operation goes through [`SafeArith`] so an overflow or a zero divisor
//! surfaces as an [`ArithError`] instead of wrapping or panicking.

use alloy_primitives::U256;

/// Extension trait for iterators, providing a safe replacement for `sum`.
pub trait SafeArithIter<T> {
    fn safe_sum(self) -> Result<T>;
}

impl<I, T> SafeArithIter<T> for I
where
    I: Iterator<Item = T> + Sized,
    T: SafeArith,
{
    fn safe_sum(mut self) -> Result<T> {
        self.try_fold(T::ZERO, |acc, x| acc.safe_add(x))
    }
}

/// Error representing the failure of an arithmetic operation.
#[derive(thiserror::Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum ArithError {
    #[error("overflow")]
    Overflow,
    #[error("underflow")]
    Underflow,
    #[error("divide by zero")]
    DivisionByZero,
}

pub type Result<T> = std::result::Result<T, ArithError>;

macro_rules! assign_method {
    ($name:ident, $op:ident, $doc_op:expr) => {
        assign_method!($name, $op, Self, $doc_op);
    };
    ($name:ident, $op:ident, $rhs_ty:ty, $doc_op:expr) => {
        #[doc = "Safe variant of `"]
        #[doc = $doc_op]
        #[doc = "`."]
        #[inline]
        fn $name(&mut self, other: $rhs_ty) -> Result<()> {
            *self = self.$op(other)?;
            Ok(())
        }
    };
}

/// Trait providing safe arithmetic operations for integer types.
pub trait SafeArith<Rhs = Self>: Sized + Copy {
    const ZERO: Self;
    const ONE: Self;

    /// Safe variant of `+` that guards against overflow.
    fn safe_add(&self, other: Rhs) -> Result<Self>;

    /// Safe variant of `-` that guards against underflow.
    fn safe_sub(&self, other: Rhs) -> Result<Self>;

    /// Safe variant of `%` that guards against division by 0.
    fn safe_rem(&self, other: Rhs) -> Result<Self>;

    /// Safe variant of `/` that guards against division by 0.
    fn safe_div(&self, other: Rhs) -> Result<Self>;

    /// Safe variant of `*` that guards against overflow.
    fn safe_mul(&self, other: Rhs) -> Result<Self>;

    assign_method!(safe_add_assign, safe_add, Rhs, "+=");
    assign_method!(safe_sub_assign, safe_sub, Rhs, "-=");
    assign_method!(safe_rem_assign, safe_rem, Rhs, "%=");
    assign_method!(safe_div_assign, safe_div, Rhs, "/=");
    assign_method!(safe_mul_assign, safe_mul, Rhs, "*=");

    /// `self * mul / div`, truncating.
    #[inline]
    fn safe_mul_div(&self, mul: Rhs, div: Rhs) -> Result<Self> {
        self.safe_mul(mul)?.safe_div(div)
    }
}

macro_rules! impl_safe_arith {
    ($typ:ty, $zero:expr, $one:expr) => {
        impl SafeArith for $typ {
            const ZERO: Self = $zero;
            const ONE: Self = $one;

            #[inline]
            fn safe_add(&self, other: Self) -> Result<Self> {
                self.checked_add(other).ok_or(ArithError::Overflow)
            }

            #[inline]
            fn safe_sub(&self, other: Self) -> Result<Self> {
                self.checked_sub(other).ok_or(ArithError::Underflow)
            }

            #[inline]
            fn safe_rem(&self, other: Self) -> Result<Self> {
                self.checked_rem(other).ok_or(ArithError::DivisionByZero)
            }

            #[inline]
            fn safe_div(&self, other: Self) -> Result<Self> {
                self.checked_div(other).ok_or(ArithError::DivisionByZero)
            }

            #[inline]
            fn safe_mul(&self, other: Self) -> Result<Self> {
                self.checked_mul(other).ok_or(ArithError::Overflow)
            }
        }
    };
}

impl_safe_arith!(u64, 0, 1);
impl_safe_arith!(usize, 0, 1);
impl_safe_arith!(U256, U256::ZERO, U256::from_limbs([1, 0, 0, 0]));

/// Absolute difference of two `U256` values.
pub fn abs_diff(a: U256, b: U256) -> U256 {
    if a >= b {
        a - b
    } else {
        b - a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u64_overflow() {
        assert_eq!(u64::MAX.safe_add(1), Err(ArithError::Overflow));
        assert_eq!(0u64.safe_sub(1), Err(ArithError::Underflow));
        assert_eq!(5u64.safe_div(0), Err(ArithError::DivisionByZero));
        assert_eq!(6u64.safe_mul(7), Ok(42));
    }

    #[test]
    fn test_u256_mul_div() {
        let a = U256::from(1_000u64);
        assert_eq!(a.safe_mul_div(U256::from(3u64), U256::from(7u64)), Ok(U256::from(428u64)));
        assert_eq!(a.safe_mul_div(U256::from(3u64), U256::ZERO), Err(ArithError::DivisionByZero));
        assert_eq!(U256::MAX.safe_mul(U256::from(2u64)), Err(ArithError::Overflow));
    }

    #[test]
    fn test_safe_sum() {
        let values = vec![U256::from(1u64), U256::from(2u64), U256::from(3u64)];
        assert_eq!(values.into_iter().safe_sum(), Ok(U256::from(6u64)));
        assert_eq!(vec![u64::MAX, 1].into_iter().safe_sum(), Err(ArithError::Overflow));
    }

    #[test]
    fn test_assign_methods() {
        let mut value = U256::from(10u64);
        value.safe_sub_assign(U256::from(4u64)).unwrap();
        value.safe_mul_assign(U256::from(2u64)).unwrap();
        assert_eq!(value, U256::from(12u64));
        assert_eq!(abs_diff(U256::from(3u64), U256::from(10u64)), U256::from(7u64));
    }
}
