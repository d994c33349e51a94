//! Evaluation context: locale, platform, app version, stable id, and
//! arbitrary named axes, plus the per-namespace [`AxisCatalog`] that
//! registers the finite value-sets axes may take.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use crate::id::HexId;
use crate::version::Version;

/// The values attached to a [`Context`] for each named axis.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AxisValues(BTreeMap<String, BTreeSet<String>>);

impl AxisValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, axis_id: impl Into<String>, value_id: impl Into<String>) -> &mut Self {
        self.0.entry(axis_id.into()).or_default().insert(value_id.into());
        self
    }

    pub fn contains_any(&self, axis_id: &str, allowed: &BTreeSet<String>) -> bool {
        self.0
            .get(axis_id)
            .is_some_and(|values| values.iter().any(|v| allowed.contains(v)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// The evaluation context an application presents to `evaluate`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Context {
    pub locale: Option<String>,
    pub platform: Option<String>,
    pub app_version: Option<Version>,
    pub stable_id: Option<HexId>,
    pub axis_values: AxisValues,
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    ctx: Context,
}

impl ContextBuilder {
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.ctx.locale = Some(locale.into());
        self
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.ctx.platform = Some(platform.into());
        self
    }

    pub fn app_version(mut self, version: Version) -> Self {
        self.ctx.app_version = Some(version);
        self
    }

    pub fn stable_id(mut self, stable_id: HexId) -> Self {
        self.ctx.stable_id = Some(stable_id);
        self
    }

    pub fn axis(mut self, axis_id: impl Into<String>, value_id: impl Into<String>) -> Self {
        self.ctx.axis_values.insert(axis_id, value_id);
        self
    }

    pub fn build(self) -> Context {
        self.ctx
    }
}

/// Errors raised registering an axis with the catalog.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AxisRegistrationError {
    #[error("axis {axis_id:?} already registered with value class {existing:?}, cannot re-register as {attempted:?}")]
    ConflictingValueClass {
        axis_id: String,
        existing: String,
        attempted: String,
    },
}

/// Namespace-scoped registry of axis-id -> value-class. Registration is
/// idempotent for a matching value-class and rejects conflicting
/// re-registration. Lookups never block a concurrent registration for long:
/// a single `RwLock` guards the map and readers take only a read lock.
#[derive(Default)]
pub struct AxisCatalog {
    entries: RwLock<HashMap<String, String>>,
}

impl AxisCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `axis_id` with the given `value_class` (an opaque label
    /// identifying the finite enumerated set of allowed values, e.g. a type
    /// name). Lazily creates the entry on first reference; subsequent calls
    /// with the same value class are no-ops.
    pub fn register(&self, axis_id: &str, value_class: &str) -> Result<(), AxisRegistrationError> {
        let existing = self.entries.read().unwrap().get(axis_id).cloned();
        match existing {
            Some(ref v) if v == value_class => Ok(()),
            Some(existing) => Err(AxisRegistrationError::ConflictingValueClass {
                axis_id: axis_id.to_string(),
                existing,
                attempted: value_class.to_string(),
            }),
            None => {
                let mut guard = self.entries.write().unwrap();
                match guard.get(axis_id) {
                    Some(v) if v == value_class => Ok(()),
                    Some(existing) => Err(AxisRegistrationError::ConflictingValueClass {
                        axis_id: axis_id.to_string(),
                        existing: existing.clone(),
                        attempted: value_class.to_string(),
                    }),
                    None => {
                        guard.insert(axis_id.to_string(), value_class.to_string());
                        Ok(())
                    }
                }
            }
        }
    }

    pub fn value_class_of(&self, axis_id: &str) -> Option<String> {
        self.entries.read().unwrap().get(axis_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_assembles_context() {
        let ctx = Context::builder()
            .locale("US")
            .platform("IOS")
            .app_version(Version::new(1, 0, 0))
            .axis("plan", "enterprise")
            .build();
        assert_eq!(ctx.locale.as_deref(), Some("US"));
        assert!(ctx.axis_values.contains_any("plan", &BTreeSet::from(["enterprise".to_string()])));
    }

    #[test]
    fn axis_catalog_rejects_conflicting_reregistration() {
        let catalog = AxisCatalog::new();
        catalog.register("plan", "PlanTier").unwrap();
        catalog.register("plan", "PlanTier").unwrap();
        let err = catalog.register("plan", "OtherTier").unwrap_err();
        assert!(matches!(err, AxisRegistrationError::ConflictingValueClass { .. }));
    }

    #[test]
    fn axis_values_contains_any() {
        let mut values = AxisValues::new();
        values.insert("plan", "free");
        values.insert("plan", "enterprise");
        let allowed = BTreeSet::from(["enterprise".to_string(), "trial".to_string()]);
        assert!(values.contains_any("plan", &allowed));
        assert!(!values.contains_any("region", &allowed));
    }
}
