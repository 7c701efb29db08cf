//! Semantic unit types for type-safe physical quantity handling
//!
//! Newtype wrappers over `f64` so that seconds are never silently added to
//! meters and µg·m⁻³ concentrations are never silently treated as µg·s⁻¹
//! emission rates. `f64` (not `f32`) is used throughout the engine because
//! the mass-conservation and SR round-trip invariants are specified to
//! 1e-9/1e-6 relative tolerances, well inside `f32` epsilon.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Sub, SubAssign};

#[inline]
fn total_cmp(a: f64, b: f64) -> Ordering {
    a.total_cmp(&b)
}

macro_rules! scalar_unit {
    ($name:ident, $suffix:expr) => {
        #[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(pub f64);

        impl $name {
            #[inline]
            pub fn new(value: f64) -> Self {
                $name(value)
            }

            #[inline]
            pub fn value(self) -> f64 {
                self.0
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.0 == other.0
            }
        }
        impl Eq for $name {}

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                total_cmp(self.0, other.0)
            }
        }

        impl Add for $name {
            type Output = $name;
            fn add(self, rhs: $name) -> $name {
                $name(self.0 + rhs.0)
            }
        }

        impl AddAssign for $name {
            fn add_assign(&mut self, rhs: $name) {
                self.0 += rhs.0;
            }
        }

        impl Sub for $name {
            type Output = $name;
            fn sub(self, rhs: $name) -> $name {
                $name(self.0 - rhs.0)
            }
        }

        impl SubAssign for $name {
            fn sub_assign(&mut self, rhs: $name) {
                self.0 -= rhs.0;
            }
        }

        impl Mul<f64> for $name {
            type Output = $name;
            fn mul(self, rhs: f64) -> $name {
                $name(self.0 * rhs)
            }
        }

        impl Div<f64> for $name {
            type Output = $name;
            fn div(self, rhs: f64) -> $name {
                $name(self.0 / rhs)
            }
        }

        impl From<f64> for $name {
            fn from(v: f64) -> Self {
                $name(v)
            }
        }

        impl From<$name> for f64 {
            fn from(v: $name) -> f64 {
                v.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", self.0, $suffix)
            }
        }
    };
}

scalar_unit!(Seconds, "s");
scalar_unit!(Meters, "m");
scalar_unit!(SquareMeters, "m^2");
scalar_unit!(CubicMeters, "m^3");
scalar_unit!(MetersPerSecond, "m/s");
/// Species concentration, µg·m⁻³.
scalar_unit!(Concentration, "ug/m3");
/// Source emission rate, µg·s⁻¹.
scalar_unit!(EmissionRate, "ug/s");
/// Per-cell volumetric emission flux, µg·m⁻³·s⁻¹.
scalar_unit!(VolumetricFlux, "ug/m3/s");
/// A bare per-second rate constant (deposition velocity over height, a
/// scavenging coefficient, a reaction rate).
scalar_unit!(PerSecond, "1/s");

impl Seconds {
    pub const ZERO: Seconds = Seconds(0.0);
}

impl Concentration {
    pub const ZERO: Concentration = Concentration(0.0);

    /// Clamp small negative rounding artifacts to zero: `Cf >= -eps`
    /// after every manipulator, `eps = 1e-12 * |peak|`.
    #[must_use]
    pub fn clamp_nonneg(self, peak: f64) -> Self {
        let eps = 1e-12 * peak.abs();
        if self.0 < 0.0 && self.0 >= -eps {
            Concentration(0.0)
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_preserves_unit() {
        let a = Seconds::new(2.0);
        let b = Seconds::new(3.0);
        assert_eq!((a + b).value(), 5.0);
        assert_eq!((b - a).value(), 1.0);
    }

    #[test]
    fn ordering_is_total_even_with_nan_free_inputs() {
        let mut v = vec![Concentration::new(3.0), Concentration::new(1.0), Concentration::new(2.0)];
        v.sort();
        assert_eq!(v[0].value(), 1.0);
        assert_eq!(v[2].value(), 3.0);
    }

    #[test]
    fn clamp_nonneg_only_touches_rounding_noise() {
        let peak = 10.0;
        let tiny_negative = Concentration::new(-1e-13 * peak);
        assert_eq!(tiny_negative.clamp_nonneg(peak).value(), 0.0);

        let real_negative = Concentration::new(-0.5);
        assert_eq!(real_negative.clamp_nonneg(peak).value(), -0.5);
    }
}
