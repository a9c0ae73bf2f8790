//! Program definition: the persisted form of a whole rule set.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::condition::ConditionDef;
use crate::error::{DomusError, ValidationError};
use crate::rule::RuleDef;

/// Shared named conditions plus the rules using them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramDef {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub shared: BTreeMap<String, ConditionDef>,
    #[serde(default)]
    pub rules: Vec<RuleDef>,
}

impl ProgramDef {
    /// Parse a program from its JSON text.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the text is not a valid program.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Validate every shared condition and rule.
    ///
    /// # Errors
    ///
    /// Returns the first invalid shared condition or rule,
    /// [`ValidationError::EmptyName`] for an unnamed shared condition, or
    /// [`ValidationError::DuplicateId`] when two rules share an id.
    pub fn validate(&self) -> Result<(), DomusError> {
        for (name, def) in &self.shared {
            if name.is_empty() {
                return Err(ValidationError::EmptyName.into());
            }
            def.validate()?;
        }
        let mut seen = HashSet::new();
        for rule in &self.rules {
            rule.validate()?;
            if !seen.insert(rule.id) {
                return Err(ValidationError::DuplicateId(rule.id.to_string()).into());
            }
        }
        Ok(())
    }
}
