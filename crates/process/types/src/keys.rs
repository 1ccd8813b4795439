//! Engine-assigned numeric keys.
//!
//! Every entity the engine creates (definitions, instances, timers and
//! subscriptions) gets a key from one monotonic sequence, so keys also
//! order entities by creation.

use serde::{Deserialize, Serialize};

macro_rules! engine_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn new(value: i64) -> Self {
                Self(value)
            }

            pub fn value(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

engine_key!(
    /// Version key of a registered process definition
    ProcessKey
);

engine_key!(
    /// Identifier of a process instance
    InstanceKey
);

engine_key!(
    /// Identifier of a timer
    TimerKey
);

engine_key!(
    /// Identifier of a message subscription
    SubscriptionKey
);
