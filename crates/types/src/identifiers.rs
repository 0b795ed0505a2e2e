//! Strongly-typed integer identifiers.

use sbor::prelude::*;
use std::fmt;

macro_rules! u64_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BasicSbor)]
        #[sbor(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// The next value in sequence.
            pub fn next(self) -> Self {
                Self(self.0 + 1)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "{}"), self.0)
            }
        }
    };
}

u64_id!(
    /// Identity of a roster member.
    NodeId,
    "node-"
);

u64_id!(
    /// Leadership epoch. Each view has exactly one tree topology.
    View,
    "v"
);

u64_id!(
    /// Number of one execution of the signing protocol.
    RoundNumber,
    "r"
);

u64_id!(
    /// Position in the vote log. Indices start at 1; `VoteIndex(0)` means
    /// no vote.
    VoteIndex,
    "#"
);
