use std::ops::{Add, AddAssign, Sub};

use crate::{units::Nanosecs, Error};

macro_rules! time_unit {
    ($name: ident) => {
        #[derive(
            Debug,
            Default,
            Copy,
            Clone,
            PartialOrd,
            Ord,
            PartialEq,
            Eq,
            Hash,
            derive_more::Add,
            derive_more::Display,
        )]
        pub struct $name(u128);

        impl $name {
            pub const ZERO: $name = Self::new(0);
            pub const ONE: $name = Self::new(1);

            pub const fn new(value: u128) -> Self {
                Self(value)
            }

            pub const fn into_u128(self) -> u128 {
                self.0
            }

            /// Saturates at `Nanosecs::MAX`, which no realistic run reaches.
            pub fn into_nanos(self) -> Nanosecs {
                Nanosecs::new(u64::try_from(self.0).unwrap_or(u64::MAX))
            }
        }
    };
}

// Absolute simulated time in nanoseconds
time_unit!(Time);

impl Time {
    /// The time elapsed since `earlier`, or zero if `earlier` is in the future.
    pub const fn saturating_sub(self, earlier: Time) -> Delta {
        Delta::new(self.0.saturating_sub(earlier.0))
    }
}

// A non-negative offset from now
time_unit!(Delta);

impl Delta {
    /// Converts a signed nanosecond offset into a delta. Scheduling into the past is not allowed.
    pub fn from_signed(nanos: i128) -> Result<Self, Error> {
        u128::try_from(nanos)
            .map(Self)
            .map_err(|_| Error::InvalidDelay(nanos))
    }
}

impl Add<Delta> for Time {
    type Output = Time;

    fn add(self, rhs: Delta) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign<Delta> for Time {
    fn add_assign(&mut self, rhs: Delta) {
        self.0 += rhs.0;
    }
}

impl Sub<Time> for Time {
    type Output = Delta;

    fn sub(self, rhs: Time) -> Self::Output {
        self.saturating_sub(rhs)
    }
}
