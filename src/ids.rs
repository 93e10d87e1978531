//! Typed ids for sessions and listeners.
//!
//! The CLI boundary is stringly-typed (`kill session 3`), but internally we
//! want a real integer newtype so `Manager`'s maps can't be indexed by a
//! malformed string. Parsing/formatting happens only at the boundary.

use std::fmt;
use std::str::FromStr;

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<u64>().map($name)
            }
        }
    };
}

typed_id!(SessionId);
typed_id!(ListenerId);

/// Monotonic id allocator shared by the session and listener maps.
#[derive(Debug, Default)]
pub struct IdCounter(std::sync::atomic::AtomicU64);

impl IdCounter {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}
