//! The compiled, trusted, in-memory [`Schema`] a namespace decodes against:
//! a frozen feature index built once at startup via [`SchemaBuilder`], via a
//! one-time builder invocation producing an immutable catalog rather than
//! reflection-driven registration.
//!
//! Per-feature decode works as a closure captured at registration: for each
//! feature, a decode function `(shape) -> T` produced at
//! `register::<T>(..)`. The function closes over the concrete `T` and
//! operates on the already-tag-resolved [`ValueKind`] rather than raw JSON
//! (tag resolution, which must ignore any payload-supplied class name,
//! happens once in [`crate::codec`] using [`SchemaEntry::kind`]).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::erased::ErasedFlagDefinition;
use crate::flag::FlagDefinitionBuilder;
use crate::id::{FeatureId, HexId};
use crate::rule::{ConditionalValue, Rule};
use crate::value::{FlagValue, TypeMismatch, ValueKind, ValueKindTag};

/// The feature-independent pieces of a decoded flag, plus every value
/// already resolved to a [`ValueKind`] against the feature's declared tag.
/// This is what a per-feature decode closure turns into a concrete
/// `FlagDefinition<T>`.
pub struct DecodedFlagShape {
    pub feature: FeatureId,
    pub default: ValueKind,
    pub rules: Vec<(Rule, ValueKind)>,
    pub salt: String,
    pub is_active: bool,
    pub ramp_up_allowlist: BTreeSet<HexId>,
}

type DecodeFn = dyn Fn(DecodedFlagShape) -> Result<Box<dyn ErasedFlagDefinition>, TypeMismatch> + Send + Sync;

/// One registered feature's identity, declared kind/default, and decode
/// function.
#[derive(Clone)]
pub struct SchemaEntry {
    pub feature: FeatureId,
    pub property_name: Box<str>,
    pub kind: ValueKindTag,
    pub default: ValueKind,
    decode: Arc<DecodeFn>,
}

impl std::fmt::Debug for SchemaEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaEntry")
            .field("feature", &self.feature)
            .field("kind", &self.kind)
            .finish()
    }
}

impl SchemaEntry {
    pub fn decode(&self, shape: DecodedFlagShape) -> Result<Box<dyn ErasedFlagDefinition>, TypeMismatch> {
        (self.decode)(shape)
    }
}

/// A namespace's frozen feature index. Only a `Schema` built via
/// [`SchemaBuilder`] may resolve a wire key to a [`FeatureId`]: the codec
/// never manufactures one from payload content alone (invariant 5).
#[derive(Clone, Debug, Default)]
pub struct Schema {
    namespace_seed: Box<str>,
    entries: HashMap<String, SchemaEntry>,
}

impl Schema {
    pub fn namespace_seed(&self) -> &str {
        &self.namespace_seed
    }

    /// Resolve a wire-format key (`feature::<seed>::<name>`) against the
    /// trusted index. Returns `None` for any key not registered at build
    /// time, regardless of whether it is otherwise well-formed.
    pub fn resolve(&self, key: &str) -> Option<&SchemaEntry> {
        self.entries.get(key)
    }

    pub fn declared_features(&self) -> impl Iterator<Item = &SchemaEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds a [`Schema`] by registering one feature at a time, then freezing
/// it with `.build()`. Registration is the only place a [`FeatureId`] is
/// minted.
pub struct SchemaBuilder {
    namespace_seed: String,
    entries: HashMap<String, SchemaEntry>,
}

impl SchemaBuilder {
    pub fn new(namespace_seed: impl Into<String>) -> Self {
        SchemaBuilder {
            namespace_seed: namespace_seed.into(),
            entries: HashMap::new(),
        }
    }

    /// Register a feature of Rust type `T` with its compile-time declared
    /// default, returning the `FeatureId` the caller should hold onto to
    /// evaluate it later.
    pub fn register<T: FlagValue>(&mut self, property_name: &str, default: T) -> FeatureId {
        let feature = FeatureId::new(&self.namespace_seed, property_name);
        let default_kind = default.to_value_kind();
        let decode: Arc<DecodeFn> = Arc::new(move |shape: DecodedFlagShape| {
            let default = T::from_value_kind(shape.default)?;
            let mut builder = FlagDefinitionBuilder::new(shape.feature, default)
                .salt(shape.salt)
                .is_active(shape.is_active)
                .ramp_up_allowlist(shape.ramp_up_allowlist);
            for (rule, value_kind) in shape.rules {
                let value = T::from_value_kind(value_kind)?;
                builder = builder.rule(ConditionalValue::fixed(rule, value));
            }
            Ok(Box::new(builder.build()) as Box<dyn ErasedFlagDefinition>)
        });
        self.entries.insert(
            feature.as_str().to_string(),
            SchemaEntry {
                feature: feature.clone(),
                property_name: property_name.into(),
                kind: T::declared_kind(),
                default: default_kind,
                decode,
            },
        );
        feature
    }

    pub fn build(self) -> Schema {
        Schema {
            namespace_seed: self.namespace_seed.into(),
            entries: self.entries,
        }
    }
}

/// Sugar over [`SchemaBuilder::register`], the equivalent of the source's
/// property-delegation registration: `register_feature!(builder, "darkMode": bool = false)`.
#[macro_export]
macro_rules! register_feature {
    ($builder:expr, $name:literal : $ty:ty = $default:expr) => {
        $builder.register::<$ty>($name, $default)
    };
}
