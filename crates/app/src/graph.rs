//! Condition graph: builds runtime conditions from their definitions.
//!
//! Identical definitions share one runtime instance: the graph keeps a weak
//! cache keyed by [`ConditionUid`], so two rules over the same condition
//! share its state and timers. Shared conditions are kept by name and
//! reached through [`ReferenceCondition`]s, which are rebound whenever the
//! name is (re)defined.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use domus_domain::condition::{ConditionDef, ReferenceSpec};
use domus_domain::error::CompositionError;
use domus_domain::id::ConditionUid;

use crate::condition::{
    AlwaysCondition, CalendarCondition, CalendarEventCondition, Condition, CronCondition,
    DebounceCondition, DeviceEnabledCondition, DurationCondition, LatchCondition,
    LogicalCondition, LogicalOp, ParameterCondition, ReferenceCondition,
};
use crate::ports::{CalendarProvider, DeviceProvider};
use crate::sync::lock;

struct Shared {
    def: ConditionDef,
    condition: Arc<dyn Condition>,
}

/// Factory and identity cache of the conditions of one universe.
pub struct ConditionGraph {
    devices: Arc<dyn DeviceProvider>,
    calendar: Arc<dyn CalendarProvider>,
    calendar_poll: Duration,
    cache: Mutex<HashMap<ConditionUid, Weak<dyn Condition>>>,
    shared: Mutex<BTreeMap<String, Shared>>,
    references: Mutex<HashMap<String, Weak<ReferenceCondition>>>,
}

impl ConditionGraph {
    #[must_use]
    pub fn new(
        devices: Arc<dyn DeviceProvider>,
        calendar: Arc<dyn CalendarProvider>,
        calendar_poll: Duration,
    ) -> Self {
        Self {
            devices,
            calendar,
            calendar_poll,
            cache: Mutex::new(HashMap::new()),
            shared: Mutex::new(BTreeMap::new()),
            references: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn devices(&self) -> &Arc<dyn DeviceProvider> {
        &self.devices
    }

    /// Runtime condition for `def`, reusing a live instance with the same
    /// UID.
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError`] when the definition is invalid or when
    /// a composite's operands break its trigger rules once references are
    /// resolved.
    pub fn build(&self, def: &ConditionDef) -> Result<Arc<dyn Condition>, CompositionError> {
        def.validate()?;
        self.build_node(def)
    }

    fn build_node(&self, def: &ConditionDef) -> Result<Arc<dyn Condition>, CompositionError> {
        let uid = def.uid();
        if let Some(existing) = self.cached(uid) {
            return Ok(existing);
        }
        let condition: Arc<dyn Condition> = match def {
            ConditionDef::Parameter(spec) => {
                ParameterCondition::equals(spec.clone(), Arc::clone(&self.devices))
            }
            ConditionDef::Range(spec) => {
                ParameterCondition::range(spec.clone(), Arc::clone(&self.devices))
            }
            ConditionDef::Always => AlwaysCondition::new(),
            ConditionDef::DeviceEnabled(spec) => {
                DeviceEnabledCondition::new(spec.clone(), Arc::clone(&self.devices))
            }
            ConditionDef::Calendar(spec) => CalendarCondition::new(spec.clone())?,
            ConditionDef::Cron(spec) => CronCondition::new(spec.clone()),
            ConditionDef::CalendarEvent(spec) => CalendarEventCondition::new(
                spec.clone(),
                Arc::clone(&self.calendar),
                self.calendar_poll,
            ),
            ConditionDef::And(spec) => {
                LogicalCondition::new(LogicalOp::And, self.build_all(&spec.operands)?)?
            }
            ConditionDef::Or(spec) => {
                LogicalCondition::new(LogicalOp::Or, self.build_all(&spec.operands)?)?
            }
            ConditionDef::Duration(spec) => {
                DurationCondition::new(spec, self.build_node(&spec.base)?)?
            }
            ConditionDef::Debounce(spec) => {
                DebounceCondition::new(spec, self.build_node(&spec.base)?)
            }
            ConditionDef::Latch(spec) => LatchCondition::new(spec, self.build_node(&spec.base)?),
            ConditionDef::Reference(spec) => self.reference(spec),
        };
        Ok(self.remember(condition))
    }

    fn build_all(&self, defs: &[ConditionDef]) -> Result<Vec<Arc<dyn Condition>>, CompositionError> {
        defs.iter().map(|def| self.build_node(def)).collect()
    }

    fn cached(&self, uid: ConditionUid) -> Option<Arc<dyn Condition>> {
        lock(&self.cache).get(&uid).and_then(Weak::upgrade)
    }

    /// Cache `condition`, or return the instance another caller cached first.
    fn remember(&self, condition: Arc<dyn Condition>) -> Arc<dyn Condition> {
        let mut cache = lock(&self.cache);
        cache.retain(|_, weak| weak.strong_count() > 0);
        if let Some(existing) = cache.get(&condition.uid()).and_then(Weak::upgrade) {
            return existing;
        }
        cache.insert(condition.uid(), Arc::downgrade(&condition));
        condition
    }

    fn reference(&self, spec: &ReferenceSpec) -> Arc<dyn Condition> {
        let reference = ReferenceCondition::new(spec.clone());
        if let Some(shared) = lock(&self.shared).get(&spec.name) {
            reference.bind(Arc::clone(&shared.condition));
        }
        lock(&self.references).insert(spec.name.clone(), Arc::downgrade(&reference));
        reference
    }

    /// Define (or redefine) the shared condition `name` and rebind the
    /// references to it.
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError::CyclicReference`] when `def` reaches
    /// `name` again through shared conditions, [`CompositionError::MixedTriggers`]
    /// when a redefinition in use changes between trigger and level, the
    /// error of any live composite whose trigger rules the binding breaks
    /// (the reference is then left as it was), and any error of
    /// [`build`](Self::build).
    #[tracing::instrument(skip(self, def))]
    pub fn define_shared(&self, name: &str, def: ConditionDef) -> Result<(), CompositionError> {
        if self.reaches(&def, name) {
            return Err(CompositionError::CyclicReference(name.to_string()));
        }
        let condition = self.build(&def)?;
        if let Some(reference) = self.live_reference(name) {
            let previous = reference.target();
            if let Some(previous) = &previous
                && previous.is_trigger() != condition.is_trigger()
            {
                return Err(CompositionError::MixedTriggers);
            }
            reference.bind(Arc::clone(&condition));
            if let Err(error) = self.check_live() {
                match previous {
                    Some(previous) => reference.bind(previous),
                    None => reference.unbind(),
                }
                tracing::debug!(name, %error, "binding breaks a composite");
                return Err(error);
            }
        }
        lock(&self.shared).insert(name.to_string(), Shared { def, condition });
        tracing::debug!(name, "shared condition defined");
        Ok(())
    }

    /// Re-check the trigger rules of every live condition.
    fn check_live(&self) -> Result<(), CompositionError> {
        let live: Vec<Arc<dyn Condition>> = lock(&self.cache)
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        live.iter().try_for_each(|condition| condition.check_composition())
    }

    /// Drop the shared condition `name`. References to it become unresolved.
    pub fn remove_shared(&self, name: &str) -> Option<ConditionDef> {
        let removed = lock(&self.shared).remove(name)?;
        if let Some(reference) = self.live_reference(name) {
            reference.unbind();
        }
        Some(removed.def)
    }

    #[must_use]
    pub fn shared(&self, name: &str) -> Option<Arc<dyn Condition>> {
        lock(&self.shared)
            .get(name)
            .map(|shared| Arc::clone(&shared.condition))
    }

    /// Definitions of every shared condition, by name.
    #[must_use]
    pub fn shared_defs(&self) -> BTreeMap<String, ConditionDef> {
        lock(&self.shared)
            .iter()
            .map(|(name, shared)| (name.clone(), shared.def.clone()))
            .collect()
    }

    fn live_reference(&self, name: &str) -> Option<Arc<ReferenceCondition>> {
        lock(&self.references).get(name).and_then(Weak::upgrade)
    }

    /// Whether `def` refers to `name`, directly or through shared
    /// definitions.
    fn reaches(&self, def: &ConditionDef, name: &str) -> bool {
        let shared = lock(&self.shared);
        let mut seen = HashSet::new();
        let mut stack = vec![def];
        while let Some(next) = stack.pop() {
            if let ConditionDef::Reference(spec) = next {
                if spec.name == name {
                    return true;
                }
                if seen.insert(spec.name.as_str())
                    && let Some(target) = shared.get(&spec.name)
                {
                    stack.push(&target.def);
                }
            }
            stack.extend(next.operands());
        }
        false
    }
}
