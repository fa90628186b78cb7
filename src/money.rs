//! Fixed-precision decimal arithmetic for CAD amounts and share counts.
//!
//! Every monetary quantity that flows through the replay engine is a [`Money`];
//! every share count is a [`Shares`]. Both wrap `rust_decimal::Decimal`, which
//! carries up to 28-29 significant digits of base-10 fixed point and never
//! drifts the way `f64` sums of thousands of lots would. Rounding to the
//! 2-decimal CAD convention only happens at the edges (serialisation, test
//! assertions) via `rounded_cad` / `rounded_shares`; internal computation keeps
//! full precision.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};
use std::str::FromStr;

const CAD_SCALE: u32 = 2;
const SHARE_SCALE: u32 = 6;

/// A CAD (or pre-conversion native-currency) monetary amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

/// A share quantity, fractional shares allowed (DRIPs routinely produce them).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Shares(Decimal);

macro_rules! decimal_newtype {
    ($name:ident, $scale:expr) => {
        impl $name {
            pub const ZERO: $name = $name(Decimal::ZERO);

            pub fn new(value: Decimal) -> Self {
                Self(value)
            }

            pub fn from_f64(value: f64) -> Self {
                Self(Decimal::try_from(value).unwrap_or(Decimal::ZERO))
            }

            pub fn raw(self) -> Decimal {
                self.0
            }

            pub fn is_zero(self) -> bool {
                self.0.is_zero()
            }

            pub fn is_negative(self) -> bool {
                self.0.is_sign_negative() && !self.0.is_zero()
            }

            pub fn is_positive(self) -> bool {
                self.0.is_sign_positive() && !self.0.is_zero()
            }

            pub fn abs(self) -> Self {
                Self(self.0.abs())
            }

            pub fn max(self, other: Self) -> Self {
                Self(self.0.max(other.0))
            }

            pub fn min(self, other: Self) -> Self {
                Self(self.0.min(other.0))
            }

            /// Rounds to this newtype's external precision using banker's
            /// rounding (round-half-to-even), for output boundaries only.
            pub fn rounded(self) -> Self {
                Self(self.0.round_dp_with_strategy($scale, RoundingStrategy::MidpointNearestEven))
            }
        }

        impl From<$name> for Decimal {
            fn from(value: $name) -> Decimal {
                value.0
            }
        }

        impl TryFrom<Decimal> for $name {
            type Error = std::convert::Infallible;
            fn try_from(value: Decimal) -> Result<Self, Self::Error> {
                Ok(Self(value))
            }
        }

        impl FromStr for $name {
            type Err = rust_decimal::Error;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Decimal::from_str(s)?))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.rounded().0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::ZERO
            }
        }

        impl Add for $name {
            type Output = Self;
            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl AddAssign for $name {
            fn add_assign(&mut self, rhs: Self) {
                self.0 += rhs.0;
            }
        }

        impl Sub for $name {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl SubAssign for $name {
            fn sub_assign(&mut self, rhs: Self) {
                self.0 -= rhs.0;
            }
        }

        impl Neg for $name {
            type Output = Self;
            fn neg(self) -> Self {
                Self(-self.0)
            }
        }

        impl Sum for $name {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                iter.fold(Self::ZERO, Add::add)
            }
        }
    };
}

decimal_newtype!(Money, CAD_SCALE);
decimal_newtype!(Shares, SHARE_SCALE);

impl Money {
    /// Rounds to the 2-decimal CAD output convention, banker's rounding.
    pub fn rounded_cad(self) -> Self {
        self.rounded()
    }

    /// `native_amount × fx_rate → CAD`. `fx_rate` is dimensionless
    /// (CAD per unit of native currency).
    pub fn convert_to_cad(native: Money, fx_rate: Decimal) -> Money {
        Money(native.0 * fx_rate)
    }
}

impl Shares {
    pub fn rounded_shares(self) -> Self {
        self.rounded()
    }
}

impl Mul<Decimal> for Money {
    type Output = Money;
    fn mul(self, rhs: Decimal) -> Money {
        Money(self.0 * rhs)
    }
}

impl Mul<Shares> for Money {
    type Output = Money;
    fn mul(self, rhs: Shares) -> Money {
        Money(self.0 * rhs.0)
    }
}

impl Mul<Decimal> for Shares {
    type Output = Shares;
    fn mul(self, rhs: Decimal) -> Shares {
        Shares(self.0 * rhs)
    }
}

impl Div<Shares> for Money {
    type Output = Money;
    /// ACB-per-share division; callers are expected to guard the zero-share
    /// case themselves (see `ComputedView::acb_per_share`).
    fn div(self, rhs: Shares) -> Money {
        if rhs.0.is_zero() {
            Money::ZERO
        } else {
            Money(self.0 / rhs.0)
        }
    }
}

impl Div<Decimal> for Shares {
    type Output = Shares;
    fn div(self, rhs: Decimal) -> Shares {
        Shares(self.0 / rhs)
    }
}
