//! Rule: a condition, ordered actions and a priority.
//!
//! Rules are ranked by [`RuleRank`]: higher priority first; among equal
//! priorities of 100 and above the most recently created rule wins; ties
//! are broken by name then id so the order is total and stable.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::condition::ConditionDef;
use crate::error::{DomusError, ValidationError};
use crate::id::{DeviceId, RuleId};
use crate::time::Timestamp;

/// Priorities at or above this value prefer newer rules on ties.
pub const RECENCY_PRIORITY: i32 = 100;

/// Persisted rule definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDef {
    pub id: RuleId,
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    pub created_at: Timestamp,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub condition: ConditionDef,
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exception_actions: Vec<Action>,
}

fn default_enabled() -> bool {
    true
}

impl RuleDef {
    /// Create a builder for constructing a [`RuleDef`].
    #[must_use]
    pub fn builder() -> RuleDefBuilder {
        RuleDefBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`DomusError::Validation`] when:
    /// - `name` is empty ([`ValidationError::EmptyName`])
    /// - `actions` is empty ([`ValidationError::NoActions`])
    ///
    /// and [`DomusError::Composition`] when the condition tree is illegal.
    pub fn validate(&self) -> Result<(), DomusError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if self.actions.is_empty() {
            return Err(ValidationError::NoActions.into());
        }
        self.condition.validate()?;
        Ok(())
    }

    /// Devices touched by the main and exception action lists.
    #[must_use]
    pub fn devices(&self) -> BTreeSet<DeviceId> {
        self.actions
            .iter()
            .chain(&self.exception_actions)
            .filter_map(Action::device)
            .collect()
    }

    #[must_use]
    pub fn rank(&self) -> RuleRank {
        RuleRank {
            priority: self.priority,
            created_at: self.created_at,
            name: self.name.clone(),
            id: self.id,
        }
    }
}

/// Step-by-step builder for [`RuleDef`].
#[derive(Debug, Default)]
pub struct RuleDefBuilder {
    id: Option<RuleId>,
    name: Option<String>,
    priority: Option<i32>,
    created_at: Option<Timestamp>,
    enabled: Option<bool>,
    condition: Option<ConditionDef>,
    actions: Vec<Action>,
    exception_actions: Vec<Action>,
}

impl RuleDefBuilder {
    #[must_use]
    pub fn id(mut self, id: RuleId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn created_at(mut self, ts: Timestamp) -> Self {
        self.created_at = Some(ts);
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    #[must_use]
    pub fn condition(mut self, condition: ConditionDef) -> Self {
        self.condition = Some(condition);
        self
    }

    #[must_use]
    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    #[must_use]
    pub fn exception_action(mut self, action: Action) -> Self {
        self.exception_actions.push(action);
        self
    }

    /// Consume the builder, validate, and return a [`RuleDef`].
    ///
    /// Defaults: random id, priority 0, created now, enabled, condition
    /// [`ConditionDef::Always`].
    ///
    /// # Errors
    ///
    /// Returns [`DomusError`] if required fields are missing or the
    /// condition tree is illegal.
    pub fn build(self) -> Result<RuleDef, DomusError> {
        let rule = RuleDef {
            id: self.id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            priority: self.priority.unwrap_or_default(),
            created_at: self.created_at.unwrap_or_else(crate::time::now),
            enabled: self.enabled.unwrap_or(true),
            condition: self.condition.unwrap_or(ConditionDef::Always),
            actions: self.actions,
            exception_actions: self.exception_actions,
        };
        rule.validate()?;
        Ok(rule)
    }
}

/// Dispatch order key of a rule. Smaller ranks are evaluated first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleRank {
    pub priority: i32,
    pub created_at: Timestamp,
    pub name: String,
    pub id: RuleId,
}

impl Ord for RuleRank {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| {
                if self.priority >= RECENCY_PRIORITY {
                    other.created_at.cmp(&self.created_at)
                } else {
                    Ordering::Equal
                }
            })
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for RuleRank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
