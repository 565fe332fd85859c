/// Declares a dense, copyable index type. Ids double as vector indices, so they are handed out
/// from zero without gaps.
macro_rules! identifier {
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
            derive_more::Display,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(usize);

        impl $name {
            pub const ZERO: $name = Self::new(0);
            pub const ONE: $name = Self::new(1);

            pub const fn new(value: usize) -> Self {
                Self(value)
            }

            pub const fn into_usize(self) -> usize {
                self.0
            }

            /// The id allocated after this one.
            pub const fn next(self) -> Self {
                Self(self.0 + 1)
            }
        }

        impl From<usize> for $name {
            fn from(val: usize) -> Self {
                Self(val)
            }
        }
    };
}
