use crate::time::{Delta, Time};

macro_rules! unit {
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
            derive_more::Sub,
            derive_more::AddAssign,
            derive_more::SubAssign,
            derive_more::Sum,
            derive_more::Display,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const ZERO: $name = Self::new(0);
            pub const ONE: $name = Self::new(1);
            pub const MAX: $name = Self::new(u64::MAX);

            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn into_u64(self) -> u64 {
                self.0
            }

            pub const fn into_f64(self) -> f64 {
                self.0 as f64
            }

            pub const fn into_usize(self) -> usize {
                self.0 as usize
            }

            /// Multiplies by `val`, rounding to the nearest unit.
            pub fn scale_by(self, val: f64) -> Self {
                let inner = self.0 as f64 * val;
                Self(inner.round() as u64)
            }

            pub const fn checked_div(self, rhs: u64) -> Option<Self> {
                if rhs == 0 {
                    None
                } else {
                    Some(Self::new(self.0 / rhs))
                }
            }

            pub const fn saturating_sub(self, rhs: Self) -> Self {
                Self::new(self.0.saturating_sub(rhs.0))
            }
        }
    };
}

unit!(Nanosecs);

impl Nanosecs {
    pub fn into_time(self) -> Time {
        Time::new(u128::from(self.0))
    }

    pub fn into_delta(self) -> Delta {
        Delta::new(u128::from(self.0))
    }
}

impl From<Nanosecs> for Time {
    fn from(ns: Nanosecs) -> Self {
        ns.into_time()
    }
}

unit!(Bytes);
unit!(BitsPerSec);
unit!(Mbps);
unit!(Gbps);

impl BitsPerSec {
    /// The ratio `num / denom`. Returns zero if `denom` is zero.
    pub fn frac(num: Self, denom: Self) -> f64 {
        if denom == Self::ZERO {
            return 0.0;
        }
        num.into_f64() / denom.into_f64()
    }

    /// Serialization time of `size` bytes at this rate, rounded to the nearest nanosecond.
    pub fn length(&self, size: Bytes) -> Nanosecs {
        if size == Bytes::ZERO || *self == BitsPerSec::ZERO {
            return Nanosecs::ZERO;
        }
        let delta = (size.into_f64() * 8.0 * 1e9) / self.into_f64();
        Nanosecs::new(delta.round() as u64)
    }

    /// Bits per second achieved by moving `size` bytes in `delta`.
    pub fn over(size: Bytes, delta: Nanosecs) -> Self {
        if delta == Nanosecs::ZERO {
            return Self::ZERO;
        }
        let bps = size.into_f64() * 8.0 * 1e9 / delta.into_f64();
        Self::new(bps.round() as u64)
    }
}

impl Mbps {
    pub const fn into_bps(self) -> BitsPerSec {
        BitsPerSec::new(self.0 * 1_000_000)
    }
}

impl From<Mbps> for BitsPerSec {
    fn from(val: Mbps) -> Self {
        val.into_bps()
    }
}

impl Gbps {
    pub const fn into_bps(self) -> BitsPerSec {
        BitsPerSec::new(self.0 * 1_000_000_000)
    }

    pub fn length(&self, size: Bytes) -> Nanosecs {
        self.into_bps().length(size)
    }
}

impl From<Gbps> for BitsPerSec {
    fn from(val: Gbps) -> Self {
        val.into_bps()
    }
}
