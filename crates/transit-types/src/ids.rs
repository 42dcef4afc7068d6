//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Every entity in the tracking service has a strongly-typed ID so a trip
//! identifier can never be passed where a route identifier is expected.
//! Identifiers minted by this service (connections, notifications) use
//! UUID v7 (time-ordered); identifiers of routes, stops, trips and users
//! come from the persistence layer and are only wrapped here.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for a scheduled route (an ordered list of stops).
    RouteId
}

define_id! {
    /// Unique identifier for a stop (a named coordinate on one or more routes).
    StopId
}

define_id! {
    /// Unique identifier for a single run of a vehicle along a route.
    TripId
}

define_id! {
    /// Unique identifier for an authenticated user.
    UserId
}

define_id! {
    /// Unique identifier for one live client transport session.
    ConnectionId
}

define_id! {
    /// Unique identifier for a persisted user notification.
    NotificationId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let trip = TripId::new();
        let route = RouteId::new();
        // Different types -- the compiler enforces no mixing.
        assert_ne!(trip.into_inner(), Uuid::nil());
        assert_ne!(route.into_inner(), Uuid::nil());
    }

    #[test]
    fn id_parses_from_string() {
        let id = TripId::new();
        let parsed: Result<TripId, _> = id.to_string().parse();
        assert_eq!(parsed.ok(), Some(id));
        assert!("not-a-uuid".parse::<RouteId>().is_err());
    }

    #[test]
    fn id_serializes_as_bare_uuid() {
        let id = ConnectionId::new();
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, format!("\"{}\"", id.into_inner()));
    }
}
