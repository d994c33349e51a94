//! A typed feature-flag evaluation engine: targeting-rule evaluation with
//! specificity ordering and deterministic percentage ramp-up, a namespace
//! registry with atomic snapshot swap and bounded rollback history, a
//! schema-aware JSON snapshot codec, and shadow evaluation for comparing a
//! candidate configuration against production without changing what callers
//! see.
//!
//! A minimal end-to-end flow:
//!
//! ```
//! use flagcore::prelude::*;
//!
//! let mut builder = SchemaBuilder::new("acme");
//! let dark_mode = register_feature!(builder, "darkMode": bool = false);
//! let schema = builder.build();
//!
//! let flag = FlagDefinitionBuilder::new(dark_mode.clone(), false)
//!     .rule(ConditionalValue::fixed(
//!         { let mut r = Rule::default(); r.platforms.insert("IOS".to_string()); r },
//!         true,
//!     ))
//!     .build();
//! let snapshot = ConfigurationSnapshot::builder().flag(flag).build();
//! let registry = NamespaceRegistry::new("acme", snapshot, RegistryConfig::default());
//!
//! let ctx = Context::builder()
//!     .platform("IOS")
//!     .stable_id(HexId::from_hex("01").unwrap())
//!     .build();
//! assert_eq!(registry.evaluate::<bool>(&dark_mode, &ctx), true);
//! let _ = schema; // kept alive for decoding future snapshot updates
//! ```

pub mod bucket;
pub mod codec;
pub mod context;
pub mod erased;
pub mod flag;
pub mod hooks;
pub mod id;
pub mod registry;
pub mod rule;
pub mod schema;
pub mod shadow;
pub mod value;
pub mod version;

/// Re-exports covering the common construction and evaluation path, for
/// `use flagcore::prelude::*;` in host code and in this crate's own
/// integration tests.
pub mod prelude {
    pub use crate::codec::{
        self, apply_patch_json, decode, encode, DecodeOptions, MaterializedSnapshot, MissingFeaturePolicy, ParseError,
        UnknownFeatureKeyStrategy,
    };
    pub use crate::context::{AxisCatalog, AxisValues, Context, ContextBuilder};
    pub use crate::erased::ErasedFlagDefinition;
    pub use crate::flag::{DecisionKind, FlagDefinition, FlagDefinitionBuilder, Trace};
    pub use crate::hooks::{EvaluationEvent, EvaluationMode, Hooks, LogLevel, Logger, MetricsSink, TracingLogger};
    pub use crate::id::{FeatureId, HexId};
    pub use crate::registry::{
        ConfigurationSnapshot, EvaluationError, NamespaceRegistry, RegistryConfig, SnapshotHandle, SnapshotMeta,
    };
    pub use crate::rule::{ConditionalValue, Rule, RulePredicate, ValueSource};
    pub use crate::schema::{Schema, SchemaBuilder, SchemaEntry};
    pub use crate::shadow::{evaluate_with_shadow, MismatchKind, ShadowMismatch, ShadowOptions};
    pub use crate::value::{EnumValue, FlagEnum, FlagStruct, FlagValue, StructValue, TypeMismatch, ValueKind, ValueKindTag};
    pub use crate::version::{Version, VersionRange};
    pub use crate::register_feature;
}
