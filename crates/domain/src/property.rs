//! Property sets and trigger contexts.
//!
//! A [`PropertySet`] is the bag of named values attached to an `on` or
//! `trigger` transition. A [`TriggerContext`] records, for one evaluation
//! pass, which conditions pulsed and with which properties.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::id::ConditionUid;
use crate::value::ParamValue;

/// Named values produced by a condition transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertySet(BTreeMap<String, ParamValue>);

impl PropertySet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a property.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(name.into(), value.into());
    }

    /// Look up a property by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    /// Merge `other` into `self`; values from `other` win on collisions.
    pub fn merge(&mut self, other: &PropertySet) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for PropertySet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Transient record of the trigger pulses fired during one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerContext(HashMap<ConditionUid, PropertySet>);

impl TriggerContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pulse of `uid`. Repeated pulses within one pass merge their
    /// properties.
    pub fn record(&mut self, uid: ConditionUid, props: PropertySet) {
        self.0
            .entry(uid)
            .and_modify(|existing| existing.merge(&props))
            .or_insert(props);
    }

    /// Properties captured for `uid` during this pass, if it pulsed.
    #[must_use]
    pub fn get(&self, uid: &ConditionUid) -> Option<&PropertySet> {
        self.0.get(uid)
    }

    #[must_use]
    pub fn contains(&self, uid: &ConditionUid) -> bool {
        self.0.contains_key(uid)
    }

    /// Fold another context into this one.
    pub fn merge(&mut self, other: TriggerContext) {
        for (uid, props) in other.0 {
            self.record(uid, props);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Detach the recorded pulses, leaving this context empty.
    #[must_use]
    pub fn take(&mut self) -> TriggerContext {
        std::mem::take(self)
    }
}
