//! Namespace registry lifecycle (C6): atomic snapshot swap, bounded
//! rollback history, kill-switch, and linearizable coexistence with
//! concurrent readers.
//!
//! Holds a `std::sync::RwLock<Snapshot>` that a refresh call replaces
//! wholesale while readers take read locks, generalized here to bounded
//! history and rollback.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::context::Context;
use crate::erased::ErasedFlagDefinition;
use crate::flag::{DecisionKind, FlagDefinition, Trace};
use crate::hooks::{EvaluationEvent, EvaluationMode, Hooks, LogLevel};
use crate::id::FeatureId;
use crate::value::{FlagValue, TypeMismatch};

/// Optional metadata carried by a snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub version: Option<String>,
    pub generated_at_epoch_millis: Option<i64>,
    pub source: Option<String>,
}

/// An immutable, complete configuration of a namespace: every declared
/// flag's current definition, plus metadata.
#[derive(Clone, Default)]
pub struct ConfigurationSnapshot {
    pub meta: SnapshotMeta,
    flags: BTreeMap<FeatureId, Box<dyn ErasedFlagDefinition>>,
}

impl fmt::Debug for ConfigurationSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationSnapshot")
            .field("meta", &self.meta)
            .field("flag_count", &self.flags.len())
            .finish()
    }
}

impl ConfigurationSnapshot {
    pub fn builder() -> ConfigurationSnapshotBuilder {
        ConfigurationSnapshotBuilder::default()
    }

    pub fn find_flag(&self, feature: &FeatureId) -> Option<&dyn ErasedFlagDefinition> {
        self.flags.get(feature).map(|b| b.as_ref())
    }

    pub fn typed_flag<T: FlagValue>(&self, feature: &FeatureId) -> Result<Option<&FlagDefinition<T>>, TypeMismatch> {
        match self.flags.get(feature) {
            None => Ok(None),
            Some(erased) => erased.as_any().downcast_ref::<FlagDefinition<T>>().map(Some).ok_or_else(|| {
                TypeMismatch {
                    expected: std::any::type_name::<T>().to_string(),
                    found: "a different declared type".to_string(),
                }
            }),
        }
    }

    pub fn feature_ids(&self) -> impl Iterator<Item = &FeatureId> {
        self.flags.keys()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

#[derive(Default)]
pub struct ConfigurationSnapshotBuilder {
    meta: SnapshotMeta,
    flags: BTreeMap<FeatureId, Box<dyn ErasedFlagDefinition>>,
}

impl ConfigurationSnapshotBuilder {
    pub fn meta(mut self, meta: SnapshotMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn flag<T: FlagValue>(mut self, flag: FlagDefinition<T>) -> Self {
        self.flags.insert(flag.feature.clone(), Box::new(flag));
        self
    }

    /// Insert an already type-erased flag, as produced by schema-directed
    /// decode, which has no statically known `T` at the call site.
    pub fn insert_erased(mut self, flag: Box<dyn ErasedFlagDefinition>) -> Self {
        self.flags.insert(flag.feature().clone(), flag);
        self
    }

    pub fn build(self) -> ConfigurationSnapshot {
        ConfigurationSnapshot {
            meta: self.meta,
            flags: self.flags,
        }
    }
}

/// Evaluation-boundary errors: never thrown, always returned by
/// `evaluate_safely`/`explain`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    #[error("feature {0} is not registered")]
    FeatureNotFound(FeatureId),
    #[error("feature {feature} has a different declared type than requested: {detail}")]
    DeclaredTypeMismatch { feature: FeatureId, detail: String },
}

#[derive(Clone, Copy, Debug)]
pub struct RegistryConfig {
    pub history_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig { history_capacity: 32 }
    }
}

struct Inner {
    current: Arc<ConfigurationSnapshot>,
    history: VecDeque<Arc<ConfigurationSnapshot>>,
    history_capacity: usize,
    disabled: bool,
    generation: u64,
    hooks: Hooks,
}

/// Holds exactly one current snapshot, a bounded FIFO history of prior
/// snapshots, a kill-switch flag, and the hook references: the four
/// pieces of mutable state the core owns, all governed by a single
/// `RwLock` so installs/rollbacks/reads compose into one linearizable
/// sequence.
pub struct NamespaceRegistry {
    namespace_id: String,
    inner: RwLock<Inner>,
}

impl NamespaceRegistry {
    pub fn new(namespace_id: impl Into<String>, initial: ConfigurationSnapshot, config: RegistryConfig) -> Self {
        NamespaceRegistry {
            namespace_id: namespace_id.into(),
            inner: RwLock::new(Inner {
                current: Arc::new(initial),
                history: VecDeque::new(),
                history_capacity: config.history_capacity,
                disabled: false,
                generation: 0,
                hooks: Hooks::default(),
            }),
        }
    }

    pub fn with_hooks(self, hooks: Hooks) -> Self {
        self.inner.write().unwrap().hooks = hooks;
        self
    }

    /// Atomically install `snapshot` as current, pushing the previous
    /// current onto the history tail and dropping the oldest entry if the
    /// history now exceeds its cap.
    pub fn load(&self, snapshot: ConfigurationSnapshot) {
        let mut inner = self.inner.write().unwrap();
        let previous = std::mem::replace(&mut inner.current, Arc::new(snapshot));
        inner.history.push_back(previous);
        while inner.history.len() > inner.history_capacity {
            inner.history.pop_front();
        }
        inner.generation += 1;
        tracing::debug!(namespace = %self.namespace_id, generation = inner.generation, "snapshot installed");
    }

    /// Pop `steps` entries from the history tail and install the earliest
    /// popped entry as current. Returns `false` and makes no change if
    /// fewer than `steps` entries exist.
    pub fn rollback(&self, steps: usize) -> bool {
        if steps == 0 {
            return true;
        }
        let mut inner = self.inner.write().unwrap();
        if inner.history.len() < steps {
            return false;
        }
        let mut target = None;
        for _ in 0..steps {
            target = inner.history.pop_back();
        }
        let target = target.expect("steps > 0 implies at least one pop");
        inner.current = target;
        inner.generation += 1;
        tracing::debug!(namespace = %self.namespace_id, generation = inner.generation, steps, "rollback performed");
        true
    }

    pub fn current(&self) -> Arc<ConfigurationSnapshot> {
        self.inner.read().unwrap().current.clone()
    }

    /// A snapshot-consistent copy of the history, tail-most (most recently
    /// superseded) last.
    pub fn history(&self) -> Vec<Arc<ConfigurationSnapshot>> {
        self.inner.read().unwrap().history.iter().cloned().collect()
    }

    pub fn disable_all(&self) {
        self.inner.write().unwrap().disabled = true;
    }

    pub fn enable_all(&self) {
        self.inner.write().unwrap().disabled = false;
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.read().unwrap().disabled
    }

    pub fn find_flag(&self, feature: &FeatureId) -> Option<Box<dyn ErasedFlagDefinition>> {
        self.current().find_flag(feature).map(|f| f.clone_box())
    }

    /// Pin the current snapshot (and the live kill-switch/hooks state at
    /// the moment of the call) for a composite, multi-feature evaluation
    /// that must not observe a swap mid-composition.
    pub fn snapshot(&self) -> SnapshotHandle {
        let inner = self.inner.read().unwrap();
        SnapshotHandle {
            namespace_id: self.namespace_id.clone(),
            snapshot: inner.current.clone(),
            disabled: inner.disabled,
            hooks: inner.hooks.clone(),
            generation: inner.generation,
        }
    }

    /// Evaluate `feature`, panicking if it is not registered or was
    /// registered with a different declared type, both programmer errors
    /// not reachable via well-formed host code.
    pub fn evaluate<T: FlagValue>(&self, feature: &FeatureId, ctx: &Context) -> T {
        match self.evaluate_safely::<T>(feature, ctx) {
            Ok(value) => value,
            Err(EvaluationError::FeatureNotFound(f)) => {
                panic!("flagcore: feature {f} is not registered")
            }
            Err(EvaluationError::DeclaredTypeMismatch { feature, detail }) => {
                panic!("flagcore: feature {feature} declared type mismatch: {detail}")
            }
        }
    }

    pub fn evaluate_safely<T: FlagValue>(&self, feature: &FeatureId, ctx: &Context) -> Result<T, EvaluationError> {
        self.snapshot().evaluate::<T>(feature, ctx)
    }

    pub fn explain<T: FlagValue>(&self, feature: &FeatureId, ctx: &Context) -> Result<(T, Trace), EvaluationError> {
        self.snapshot().explain::<T>(feature, ctx)
    }
}

/// A handle pinning exactly one snapshot (and the kill-switch/hooks state
/// observed alongside it) across its lifetime.
#[derive(Clone)]
pub struct SnapshotHandle {
    namespace_id: String,
    snapshot: Arc<ConfigurationSnapshot>,
    disabled: bool,
    hooks: Hooks,
    generation: u64,
}

impl SnapshotHandle {
    pub fn snapshot(&self) -> &ConfigurationSnapshot {
        &self.snapshot
    }

    pub fn evaluate<T: FlagValue>(&self, feature: &FeatureId, ctx: &Context) -> Result<T, EvaluationError> {
        self.explain::<T>(feature, ctx).map(|(v, _)| v)
    }

    pub fn explain<T: FlagValue>(&self, feature: &FeatureId, ctx: &Context) -> Result<(T, Trace), EvaluationError> {
        self.evaluate_mode::<T>(feature, ctx, EvaluationMode::Explain)
    }

    fn evaluate_mode<T: FlagValue>(
        &self,
        feature: &FeatureId,
        ctx: &Context,
        mode: EvaluationMode,
    ) -> Result<(T, Trace), EvaluationError> {
        let started = Instant::now();

        let flag = self
            .snapshot
            .typed_flag::<T>(feature)
            .map_err(|mismatch| EvaluationError::DeclaredTypeMismatch {
                feature: feature.clone(),
                detail: mismatch.to_string(),
            })?
            .ok_or_else(|| EvaluationError::FeatureNotFound(feature.clone()))?;

        let (value, trace) = if self.disabled {
            if self.hooks.logger.enabled(LogLevel::Debug) {
                self.hooks
                    .logger
                    .log(LogLevel::Debug, &format_args!("registry disabled, returning default for {feature}"));
            }
            (flag.default.clone(), Trace {
                decision: Some(DecisionKind::RegistryDisabled),
                ..Default::default()
            })
        } else {
            let (value, trace) = flag.evaluate(ctx);
            if trace.decision == Some(DecisionKind::MissingStableId) && self.hooks.logger.enabled(LogLevel::Warn) {
                self.hooks.logger.log(
                    LogLevel::Warn,
                    &format_args!("feature {feature} requires a stable id but context had none; falling back to default"),
                );
            }
            (value, trace)
        };

        let duration_nanos = started.elapsed().as_nanos() as u64;
        self.hooks.metrics.record_evaluation(&EvaluationEvent {
            namespace_id: self.namespace_id.clone(),
            feature_key: feature.to_string(),
            mode,
            duration_nanos,
            decision: trace.decision.unwrap_or(DecisionKind::Default),
            config_version: self.snapshot.meta.version.clone().or_else(|| Some(self.generation.to_string())),
            bucket: trace.bucket,
            matched_rule_specificity: trace.matched.map(|idx| flag.values()[idx].rule.specificity()),
        });

        Ok((value, trace))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::HexId;
    use crate::rule::{ConditionalValue, Rule};

    fn darkmode_snapshot(version: &str, default: bool) -> ConfigurationSnapshot {
        let feature = FeatureId::new("acme", "darkMode");
        let flag = crate::flag::FlagDefinitionBuilder::new(feature, default).build();
        ConfigurationSnapshot::builder()
            .meta(SnapshotMeta {
                version: Some(version.to_string()),
                ..Default::default()
            })
            .flag(flag)
            .build()
    }

    #[test]
    fn evaluate_not_found_is_an_error() {
        let registry = NamespaceRegistry::new("acme", ConfigurationSnapshot::default(), RegistryConfig::default());
        let err = registry
            .evaluate_safely::<bool>(&FeatureId::new("acme", "darkMode"), &Context::default())
            .unwrap_err();
        assert!(matches!(err, EvaluationError::FeatureNotFound(_)));
    }

    #[test]
    fn s4_rollback_linearizability() {
        let registry = NamespaceRegistry::new("acme", darkmode_snapshot("v1", false), RegistryConfig::default());
        registry.load(darkmode_snapshot("v2", false));
        registry.load(darkmode_snapshot("v3", true));

        assert_eq!(registry.history().len(), 2);
        assert!(registry.rollback(2));
        assert_eq!(registry.current().meta.version.as_deref(), Some("v1"));
        assert!(registry.history().is_empty());
    }

    #[test]
    fn rollback_fails_without_enough_history() {
        let registry = NamespaceRegistry::new("acme", darkmode_snapshot("v1", false), RegistryConfig::default());
        assert!(!registry.rollback(1));
        assert_eq!(registry.current().meta.version.as_deref(), Some("v1"));
    }

    #[test]
    fn history_respects_capacity() {
        let registry = NamespaceRegistry::new(
            "acme",
            darkmode_snapshot("v0", false),
            RegistryConfig { history_capacity: 2 },
        );
        for i in 1..=5 {
            registry.load(darkmode_snapshot(&format!("v{i}"), false));
        }
        assert_eq!(registry.history().len(), 2);
    }

    #[test]
    fn kill_switch_forces_default_without_consulting_rules() {
        let mut rule = Rule::default();
        rule.platforms.insert("IOS".to_string());
        let feature = FeatureId::new("acme", "darkMode");
        let flag = crate::flag::FlagDefinitionBuilder::new(feature.clone(), false)
            .rule(ConditionalValue::fixed(rule, true))
            .build();
        let snapshot = ConfigurationSnapshot::builder().flag(flag).build();
        let registry = NamespaceRegistry::new("acme", snapshot, RegistryConfig::default());

        let ctx = Context::builder()
            .platform("IOS")
            .stable_id(HexId::from_hex("01").unwrap())
            .build();
        assert_eq!(registry.evaluate::<bool>(&feature, &ctx), true);

        registry.disable_all();
        let (value, trace) = registry.explain::<bool>(&feature, &ctx).unwrap();
        assert_eq!(value, false);
        assert_eq!(trace.decision, Some(DecisionKind::RegistryDisabled));

        registry.enable_all();
        assert_eq!(registry.evaluate::<bool>(&feature, &ctx), true);
    }

    #[test]
    #[should_panic(expected = "is not registered")]
    fn evaluate_panics_on_unregistered_feature() {
        let registry = NamespaceRegistry::new("acme", ConfigurationSnapshot::default(), RegistryConfig::default());
        registry.evaluate::<bool>(&FeatureId::new("acme", "missing"), &Context::default());
    }

    struct CapturingMetrics(std::sync::Mutex<Vec<EvaluationEvent>>);

    impl crate::hooks::MetricsSink for CapturingMetrics {
        fn record_evaluation(&self, event: &EvaluationEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn evaluation_event_carries_snapshot_version_as_config_version() {
        let metrics = Arc::new(CapturingMetrics(std::sync::Mutex::new(Vec::new())));
        let registry = NamespaceRegistry::new("acme", darkmode_snapshot("v1", false), RegistryConfig::default()).with_hooks(
            Hooks {
                logger: Arc::new(crate::hooks::NoopLogger),
                metrics: metrics.clone(),
            },
        );

        let _ = registry.explain::<bool>(&FeatureId::new("acme", "darkMode"), &Context::default()).unwrap();

        let events = metrics.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].config_version.as_deref(), Some("v1"));
    }

    #[test]
    fn evaluation_event_falls_back_to_generation_when_snapshot_has_no_version() {
        let metrics = Arc::new(CapturingMetrics(std::sync::Mutex::new(Vec::new())));
        let feature = FeatureId::new("acme", "darkMode");
        let flag = crate::flag::FlagDefinitionBuilder::new(feature.clone(), false).build();
        let snapshot = ConfigurationSnapshot::builder().flag(flag).build(); // no meta.version
        let registry = NamespaceRegistry::new("acme", snapshot, RegistryConfig::default()).with_hooks(Hooks {
            logger: Arc::new(crate::hooks::NoopLogger),
            metrics: metrics.clone(),
        });

        let _ = registry.explain::<bool>(&feature, &Context::default()).unwrap();

        let events = metrics.0.lock().unwrap();
        assert_eq!(events[0].config_version.as_deref(), Some("0"));
    }
}
