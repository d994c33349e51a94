//! Type-erasure boundary letting a [`crate::registry::ConfigurationSnapshot`]
//! hold `FlagDefinition<T>` for heterogeneous `T` in one map, behind a
//! single object-safe trait.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;

use crate::context::Context;
use crate::flag::{FlagDefinition, Trace};
use crate::id::{FeatureId, HexId};
use crate::rule::Rule;
use crate::value::{FlagValue, ValueKind};

/// A rule and its value, fully materialized to a [`ValueKind`] for encoding.
#[derive(Clone, Debug)]
pub struct EncodedRule {
    pub rule: Rule,
    pub value: ValueKind,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("feature {0} carries a contextual rule value, which cannot be serialized")]
    ContextualValue(FeatureId),
}

/// Object-safe view of a `FlagDefinition<T>` for any `T`.
pub trait ErasedFlagDefinition: Send + Sync {
    fn feature(&self) -> &FeatureId;
    fn is_active(&self) -> bool;
    fn salt(&self) -> &str;
    fn ramp_up_allowlist(&self) -> &BTreeSet<HexId>;
    fn default_value_kind(&self) -> ValueKind;
    fn encode_rules(&self) -> Result<Vec<EncodedRule>, EncodeError>;
    fn evaluate_dyn(&self, ctx: &Context) -> (ValueKind, Trace);
    fn as_any(&self) -> &dyn Any;
    fn clone_box(&self) -> Box<dyn ErasedFlagDefinition>;
}

impl fmt::Debug for dyn ErasedFlagDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlagDefinition")
            .field("feature", &self.feature())
            .field("is_active", &self.is_active())
            .finish()
    }
}

impl Clone for Box<dyn ErasedFlagDefinition> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl<T: FlagValue> ErasedFlagDefinition for FlagDefinition<T> {
    fn feature(&self) -> &FeatureId {
        &self.feature
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn salt(&self) -> &str {
        &self.salt
    }

    fn ramp_up_allowlist(&self) -> &BTreeSet<HexId> {
        &self.ramp_up_allowlist
    }

    fn default_value_kind(&self) -> ValueKind {
        self.default.to_value_kind()
    }

    fn encode_rules(&self) -> Result<Vec<EncodedRule>, EncodeError> {
        self.values()
            .iter()
            .map(|cv| {
                let fixed = cv
                    .value
                    .fixed_value()
                    .ok_or_else(|| EncodeError::ContextualValue(self.feature.clone()))?;
                Ok(EncodedRule {
                    rule: cv.rule.clone(),
                    value: fixed.to_value_kind(),
                })
            })
            .collect()
    }

    fn evaluate_dyn(&self, ctx: &Context) -> (ValueKind, Trace) {
        let (value, trace) = self.evaluate(ctx);
        (value.to_value_kind(), trace)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn ErasedFlagDefinition> {
        Box::new(self.clone())
    }
}
