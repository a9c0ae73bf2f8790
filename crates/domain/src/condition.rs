//! Condition definitions: the persisted form of a condition graph.
//!
//! A [`ConditionDef`] is plain data. The `app` crate turns it into a live
//! condition (listeners, per-world state, timers). Every definition has a
//! stable [`ConditionUid`] computed from its own parameters and the UIDs of
//! its operands, so identical sub-trees collapse to one runtime instance.

use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::calendar::CalendarWindow;
use crate::cron::CronSchedule;
use crate::error::{CompositionError, ValidationError};
use crate::id::{ConditionUid, DeviceId};
use crate::value::{ParamValue, ParameterRef};

/// Equality of a device parameter with a target value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub parameter: ParameterRef,
    pub value: ParamValue,
    /// Edge-triggered: pulse once when equality becomes true.
    #[serde(default)]
    pub trigger: bool,
}

/// Inclusive numeric bounds on a device parameter; either bound may be open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeSpec {
    pub parameter: ParameterRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    #[serde(default)]
    pub trigger: bool,
}

impl RangeSpec {
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        self.low.is_none_or(|low| value >= low) && self.high.is_none_or(|high| value <= high)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEnabledSpec {
    pub device: DeviceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSpec {
    pub window: CalendarWindow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSpec {
    pub schedule: CronSchedule,
}

/// Active while the calendar provider reports an event matching `pattern`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEventSpec {
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalSpec {
    pub operands: Vec<ConditionDef>,
}

/// On once the base has held for `min_millis`, off again after `max_millis`
/// (0 = unbounded). Over a trigger base, holds the pulse for `max_millis`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationSpec {
    pub base: Box<ConditionDef>,
    #[serde(default)]
    pub min_millis: u64,
    #[serde(default)]
    pub max_millis: u64,
}

impl DurationSpec {
    #[must_use]
    pub fn min(&self) -> Duration {
        Duration::from_millis(self.min_millis)
    }

    /// `None` when unbounded.
    #[must_use]
    pub fn max(&self) -> Option<Duration> {
        (self.max_millis > 0).then(|| Duration::from_millis(self.max_millis))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebounceSpec {
    pub base: Box<ConditionDef>,
    #[serde(default)]
    pub min_on_millis: u64,
    #[serde(default)]
    pub min_off_millis: u64,
}

impl DebounceSpec {
    #[must_use]
    pub fn min_on(&self) -> Duration {
        Duration::from_millis(self.min_on_millis)
    }

    #[must_use]
    pub fn min_off(&self) -> Duration {
        Duration::from_millis(self.min_off_millis)
    }
}

/// Sticky on-state. Unlatches at the earliest of: the next `reset_time`
/// (local time of day), `reset_after_millis` since the latest on-event, or
/// `off_after_millis` since the base went off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatchSpec {
    pub base: Box<ConditionDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_after_millis: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub off_after_millis: Option<u64>,
}

impl LatchSpec {
    #[must_use]
    pub fn reset_after(&self) -> Option<Duration> {
        self.reset_after_millis.map(Duration::from_millis)
    }

    #[must_use]
    pub fn off_after(&self) -> Option<Duration> {
        self.off_after_millis.map(Duration::from_millis)
    }
}

/// Named handle to a shared condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSpec {
    pub name: String,
}

/// Persisted condition definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionDef {
    Parameter(ParameterSpec),
    Range(RangeSpec),
    Always,
    DeviceEnabled(DeviceEnabledSpec),
    Calendar(CalendarSpec),
    Cron(CronSpec),
    CalendarEvent(CalendarEventSpec),
    And(LogicalSpec),
    Or(LogicalSpec),
    Duration(DurationSpec),
    Debounce(DebounceSpec),
    Latch(LatchSpec),
    Reference(ReferenceSpec),
}

impl ConditionDef {
    /// Short kind name, also used as the UID namespace.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parameter(_) => "parameter",
            Self::Range(_) => "range",
            Self::Always => "always",
            Self::DeviceEnabled(_) => "device_enabled",
            Self::Calendar(_) => "calendar",
            Self::Cron(_) => "cron",
            Self::CalendarEvent(_) => "calendar_event",
            Self::And(_) => "and",
            Self::Or(_) => "or",
            Self::Duration(_) => "duration",
            Self::Debounce(_) => "debounce",
            Self::Latch(_) => "latch",
            Self::Reference(_) => "reference",
        }
    }

    /// Direct operands, in order.
    #[must_use]
    pub fn operands(&self) -> Vec<&ConditionDef> {
        match self {
            Self::And(spec) | Self::Or(spec) => spec.operands.iter().collect(),
            Self::Duration(spec) => vec![spec.base.as_ref()],
            Self::Debounce(spec) => vec![spec.base.as_ref()],
            Self::Latch(spec) => vec![spec.base.as_ref()],
            _ => Vec::new(),
        }
    }

    /// The condition's own defining parameters, excluding operands.
    #[must_use]
    pub fn params(&self) -> Value {
        match self {
            Self::Parameter(s) => json!({
                "parameter": s.parameter,
                "value": s.value,
                "trigger": s.trigger,
            }),
            Self::Range(s) => json!({
                "parameter": s.parameter,
                "low": s.low,
                "high": s.high,
                "trigger": s.trigger,
            }),
            Self::Always | Self::And(_) | Self::Or(_) => Value::Null,
            Self::DeviceEnabled(s) => json!({ "device": s.device }),
            Self::Calendar(s) => json!({ "window": s.window }),
            Self::Cron(s) => json!({ "schedule": s.schedule }),
            Self::CalendarEvent(s) => json!({ "pattern": s.pattern }),
            Self::Duration(s) => json!({ "min": s.min_millis, "max": s.max_millis }),
            Self::Debounce(s) => json!({ "min_on": s.min_on_millis, "min_off": s.min_off_millis }),
            Self::Latch(s) => json!({
                "reset_time": s.reset_time,
                "reset_after": s.reset_after_millis,
                "off_after": s.off_after_millis,
            }),
            Self::Reference(s) => json!({ "name": s.name }),
        }
    }

    /// Stable identity of this definition.
    #[must_use]
    pub fn uid(&self) -> ConditionUid {
        let operands: Vec<ConditionUid> = self.operands().into_iter().map(Self::uid).collect();
        ConditionUid::derive(self.kind(), &self.params(), &operands)
    }

    /// Whether the condition is momentary rather than level-based.
    ///
    /// References are reported as level conditions here; the runtime graph
    /// re-checks composition against the resolved condition.
    #[must_use]
    pub fn is_trigger(&self) -> bool {
        match self {
            Self::Parameter(s) => s.trigger,
            Self::Range(s) => s.trigger,
            Self::Cron(_) => true,
            Self::And(s) => s.operands.iter().any(Self::is_trigger),
            Self::Or(s) => s.operands.first().is_some_and(Self::is_trigger),
            Self::Debounce(s) => s.base.is_trigger(),
            Self::Always
            | Self::DeviceEnabled(_)
            | Self::Calendar(_)
            | Self::CalendarEvent(_)
            | Self::Duration(_)
            | Self::Latch(_)
            | Self::Reference(_) => false,
        }
    }

    /// Check the whole definition tree for composition errors.
    ///
    /// # Errors
    ///
    /// Returns the first [`CompositionError`] found, depth first.
    pub fn validate(&self) -> Result<(), CompositionError> {
        for operand in self.operands() {
            operand.validate()?;
        }
        match self {
            Self::Parameter(s) if s.parameter.name.is_empty() => {
                Err(ValidationError::EmptyParameter.into())
            }
            Self::Range(s) if s.parameter.name.is_empty() => {
                Err(ValidationError::EmptyParameter.into())
            }
            Self::Range(RangeSpec {
                low: Some(low),
                high: Some(high),
                ..
            }) if low > high => Err(ValidationError::InvertedRange {
                low: *low,
                high: *high,
            }
            .into()),
            Self::Calendar(s) => Ok(s.window.validate()?),
            Self::Reference(s) if s.name.is_empty() => Err(ValidationError::EmptyName.into()),
            Self::And(s) => {
                check_and(&s.operands.iter().map(Self::is_trigger).collect::<Vec<_>>())
            }
            Self::Or(s) => check_or(&s.operands.iter().map(Self::is_trigger).collect::<Vec<_>>()),
            Self::Duration(s) => check_duration(s.base.is_trigger(), s.max_millis),
            _ => Ok(()),
        }
    }

    /// Heuristic: could `self` and `other` hold at the same time?
    ///
    /// `false` is only returned when the definitions provably exclude each
    /// other (different values of one parameter, disjoint ranges, disjoint
    /// calendar windows, or an AND containing such an operand). Everything
    /// else, including repeat intervals and excluded calendar dates, is
    /// answered `true`.
    #[must_use]
    pub fn may_overlap(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::And(s), _) => s.operands.iter().all(|op| op.may_overlap(other)),
            (_, Self::And(_)) => other.may_overlap(self),
            (Self::Or(s), _) => s.operands.iter().any(|op| op.may_overlap(other)),
            (_, Self::Or(_)) => other.may_overlap(self),
            (Self::Duration(s), _) => s.base.may_overlap(other),
            (_, Self::Duration(_)) => other.may_overlap(self),
            (Self::Debounce(s), _) => s.base.may_overlap(other),
            (_, Self::Debounce(_)) => other.may_overlap(self),
            (Self::Parameter(a), Self::Parameter(b)) if a.parameter == b.parameter => {
                a.trigger || b.trigger || a.value.matches(&b.value)
            }
            (Self::Range(a), Self::Range(b)) if a.parameter == b.parameter => {
                let low = max_bound(a.low, b.low);
                let high = min_bound(a.high, b.high);
                a.trigger || b.trigger || low.zip(high).is_none_or(|(l, h)| l <= h)
            }
            (Self::Parameter(p), Self::Range(r)) | (Self::Range(r), Self::Parameter(p))
                if p.parameter == r.parameter =>
            {
                p.trigger || r.trigger || p.value.as_f64().is_none_or(|v| r.contains(v))
            }
            (Self::Calendar(a), Self::Calendar(b)) => a.window.may_overlap(&b.window),
            _ => true,
        }
    }
}

/// AND accepts at most one trigger operand.
///
/// # Errors
///
/// Returns [`CompositionError::NoOperands`] or
/// [`CompositionError::MultipleTriggers`].
pub fn check_and(triggers: &[bool]) -> Result<(), CompositionError> {
    if triggers.is_empty() {
        return Err(CompositionError::NoOperands);
    }
    let count = triggers.iter().filter(|t| **t).count();
    if count > 1 {
        return Err(CompositionError::MultipleTriggers { count });
    }
    Ok(())
}

/// OR operands must be all triggers or all level conditions.
///
/// # Errors
///
/// Returns [`CompositionError::NoOperands`] or
/// [`CompositionError::MixedTriggers`].
pub fn check_or(triggers: &[bool]) -> Result<(), CompositionError> {
    let Some(first) = triggers.first() else {
        return Err(CompositionError::NoOperands);
    };
    if triggers.iter().any(|t| t != first) {
        return Err(CompositionError::MixedTriggers);
    }
    Ok(())
}

/// A duration over a trigger needs a finite hold time.
///
/// # Errors
///
/// Returns [`CompositionError::TriggerHoldUnbounded`].
pub fn check_duration(base_is_trigger: bool, max_millis: u64) -> Result<(), CompositionError> {
    if base_is_trigger && max_millis == 0 {
        return Err(CompositionError::TriggerHoldUnbounded);
    }
    Ok(())
}

fn max_bound(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn min_bound(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CalendarWindow;

    fn param(device: DeviceId, name: &str, value: impl Into<ParamValue>, trigger: bool) -> ConditionDef {
        ConditionDef::Parameter(ParameterSpec {
            parameter: ParameterRef::new(device, name).unwrap(),
            value: value.into(),
            trigger,
        })
    }

    fn range(device: DeviceId, low: Option<f64>, high: Option<f64>) -> ConditionDef {
        ConditionDef::Range(RangeSpec {
            parameter: ParameterRef::new(device, "temperature").unwrap(),
            low,
            high,
            trigger: false,
        })
    }

    fn and(operands: Vec<ConditionDef>) -> ConditionDef {
        ConditionDef::And(LogicalSpec { operands })
    }

    fn or(operands: Vec<ConditionDef>) -> ConditionDef {
        ConditionDef::Or(LogicalSpec { operands })
    }

    #[test]
    fn should_derive_equal_uids_for_equal_definitions() {
        let device = DeviceId::new();
        let a = and(vec![param(device, "power", "on", false), ConditionDef::Always]);
        let b = and(vec![param(device, "power", "on", false), ConditionDef::Always]);
        assert_eq!(a.uid(), b.uid());
    }

    #[test]
    fn should_derive_different_uids_for_edge_and_level_modes() {
        let device = DeviceId::new();
        assert_ne!(
            param(device, "power", "on", false).uid(),
            param(device, "power", "on", true).uid()
        );
    }

    #[test]
    fn should_derive_different_uids_for_different_wrapper_settings() {
        let base = Box::new(ConditionDef::Always);
        let short = ConditionDef::Duration(DurationSpec {
            base: base.clone(),
            min_millis: 1_000,
            max_millis: 0,
        });
        let long = ConditionDef::Duration(DurationSpec {
            base,
            min_millis: 2_000,
            max_millis: 0,
        });
        assert_ne!(short.uid(), long.uid());
    }

    #[test]
    fn should_reject_and_with_two_triggers() {
        let device = DeviceId::new();
        let def = and(vec![
            param(device, "motion", true, true),
            param(device, "power", "on", true),
        ]);
        assert_eq!(
            def.validate(),
            Err(CompositionError::MultipleTriggers { count: 2 })
        );
    }

    #[test]
    fn should_accept_and_with_one_trigger() {
        let device = DeviceId::new();
        let def = and(vec![
            param(device, "motion", true, true),
            param(device, "power", "off", false),
        ]);
        assert_eq!(def.validate(), Ok(()));
        assert!(def.is_trigger());
    }

    #[test]
    fn should_reject_or_mixing_triggers_and_levels() {
        let device = DeviceId::new();
        let def = or(vec![
            param(device, "motion", true, true),
            param(device, "power", "off", false),
        ]);
        assert_eq!(def.validate(), Err(CompositionError::MixedTriggers));
    }

    #[test]
    fn should_reject_empty_logical_conditions() {
        assert_eq!(and(vec![]).validate(), Err(CompositionError::NoOperands));
        assert_eq!(or(vec![]).validate(), Err(CompositionError::NoOperands));
    }

    #[test]
    fn should_reject_unbounded_duration_over_trigger() {
        let def = ConditionDef::Duration(DurationSpec {
            base: Box::new(ConditionDef::Cron(CronSpec {
                schedule: "0 * * * *".parse().unwrap(),
            })),
            min_millis: 0,
            max_millis: 0,
        });
        assert_eq!(def.validate(), Err(CompositionError::TriggerHoldUnbounded));
    }

    #[test]
    fn should_reject_inverted_range() {
        let def = range(DeviceId::new(), Some(30.0), Some(10.0));
        assert!(matches!(
            def.validate(),
            Err(CompositionError::Invalid(ValidationError::InvertedRange { .. }))
        ));
    }

    #[test]
    fn should_validate_nested_operands() {
        let nested = and(vec![or(vec![]), ConditionDef::Always]);
        assert_eq!(nested.validate(), Err(CompositionError::NoOperands));
    }

    #[test]
    fn should_roundtrip_tagged_json() {
        let device = DeviceId::new();
        let def = ConditionDef::Latch(LatchSpec {
            base: Box::new(or(vec![
                param(device, "motion", true, false),
                ConditionDef::Calendar(CalendarSpec {
                    window: CalendarWindow::default(),
                }),
            ])),
            reset_time: NaiveTime::from_hms_opt(6, 0, 0),
            reset_after_millis: None,
            off_after_millis: Some(60_000),
        });
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["type"], "latch");
        assert_eq!(json["base"]["type"], "or");
        let back: ConditionDef = serde_json::from_value(json).unwrap();
        assert_eq!(back, def);
        assert_eq!(back.uid(), def.uid());
    }

    #[test]
    fn should_parse_always_from_type_tag_only() {
        let def: ConditionDef = serde_json::from_str(r#"{"type":"always"}"#).unwrap();
        assert_eq!(def, ConditionDef::Always);
    }

    #[test]
    fn should_exclude_overlap_for_different_values_of_same_parameter() {
        let device = DeviceId::new();
        let on = param(device, "power", "on", false);
        let off = param(device, "power", "off", false);
        assert!(!on.may_overlap(&off));
        assert!(on.may_overlap(&on));
        assert!(on.may_overlap(&param(DeviceId::new(), "power", "off", false)));
    }

    #[test]
    fn should_exclude_overlap_for_disjoint_ranges() {
        let device = DeviceId::new();
        let cold = range(device, None, Some(15.0));
        let warm = range(device, Some(22.0), None);
        let mild = range(device, Some(10.0), Some(25.0));
        assert!(!cold.may_overlap(&warm));
        assert!(cold.may_overlap(&mild));
        assert!(!and(vec![cold.clone(), ConditionDef::Always]).may_overlap(&warm));
        assert!(or(vec![cold, mild]).may_overlap(&warm));
    }

    #[test]
    fn should_compare_parameter_value_against_range() {
        let device = DeviceId::new();
        let exact = ConditionDef::Parameter(ParameterSpec {
            parameter: ParameterRef::new(device, "temperature").unwrap(),
            value: 30_i64.into(),
            trigger: false,
        });
        assert!(!exact.may_overlap(&range(device, None, Some(20.0))));
        assert!(range(device, Some(25.0), None).may_overlap(&exact));
    }
}
