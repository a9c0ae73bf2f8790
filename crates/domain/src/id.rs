//! Typed identifier newtypes backed by UUIDs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[doc = $doc:expr])* $name:ident) => {
        $(#[doc = $doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(uuid::Uuid);

        impl Default for $name {
            fn default() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl $name {
            /// Generate a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self::default()
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Access the inner UUID.
            #[must_use]
            pub fn as_uuid(self) -> uuid::Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a device exposing parameters.
    DeviceId
);

define_id!(
    /// Unique identifier for a world (the current one or a hypothetical one).
    WorldId
);

define_id!(
    /// Unique identifier for a [`RuleDef`](crate::rule::RuleDef).
    RuleId
);

/// Namespace for condition UIDs (UUIDv5).
const CONDITION_NAMESPACE: uuid::Uuid = uuid::Uuid::from_u128(0x6c1f_4e0a_93d2_4b7e_8a55_d0b1_2f3c_9e71);

/// Stable identity of a condition.
///
/// Derived from the condition's defining parameters and the UIDs of its
/// operands, so two identical definitions always yield the same UID. The
/// UID keys trigger-context lookups and per-condition bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConditionUid(uuid::Uuid);

impl ConditionUid {
    /// Derive the UID of a condition of `kind` with the given parameters and
    /// operand UIDs.
    #[must_use]
    pub fn derive(kind: &str, params: &serde_json::Value, operands: &[ConditionUid]) -> Self {
        let identity = serde_json::json!({
            "kind": kind,
            "params": params,
            "operands": operands.iter().map(ToString::to_string).collect::<Vec<_>>(),
        });
        Self(uuid::Uuid::new_v5(
            &CONDITION_NAMESPACE,
            identity.to_string().as_bytes(),
        ))
    }

    /// The all-zero UID, used as a placeholder in tests and reports.
    #[must_use]
    pub fn nil() -> Self {
        Self(uuid::Uuid::nil())
    }

    /// Access the inner UUID.
    #[must_use]
    pub fn as_uuid(self) -> uuid::Uuid {
        self.0
    }
}

impl fmt::Display for ConditionUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_generate_unique_ids_when_called_twice() {
        let a = DeviceId::new();
        let b = DeviceId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn should_roundtrip_through_display_and_from_str() {
        let id = RuleId::new();
        let parsed: RuleId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn should_return_error_when_parsing_invalid_uuid() {
        assert!(WorldId::from_str("not-a-uuid").is_err());
    }

    #[test]
    fn should_derive_same_uid_for_same_identity() {
        let params = serde_json::json!({"value": 1});
        let a = ConditionUid::derive("parameter", &params, &[]);
        let b = ConditionUid::derive("parameter", &params, &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn should_derive_distinct_uids_for_distinct_kinds_or_operands() {
        let params = serde_json::Value::Null;
        let leaf = ConditionUid::derive("always", &params, &[]);
        let and = ConditionUid::derive("and", &params, &[leaf]);
        let or = ConditionUid::derive("or", &params, &[leaf]);
        assert_ne!(and, or);
        assert_ne!(and, ConditionUid::derive("and", &params, &[leaf, leaf]));
    }
}
