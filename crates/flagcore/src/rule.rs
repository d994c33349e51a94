//! Targeting rules (C3): predicate matching, specificity ordering, and the
//! fixed-or-contextual values a matched rule resolves to.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::id::HexId;
use crate::value::FlagValue;
use crate::version::VersionRange;

/// An extension predicate a rule may carry, self-reporting both whether it
/// matches a context and how much specificity it contributes.
pub trait RulePredicate: Send + Sync {
    fn matches(&self, ctx: &Context) -> bool;
    fn specificity(&self) -> u32;
}

/// A single targeting rule. `matches` is the logical AND of every non-empty
/// clause; `specificity` counts how many clauses are non-empty plus any
/// extension's self-reported contribution.
#[derive(Clone)]
pub struct Rule {
    pub ramp_up: f64,
    pub note: Option<String>,
    pub allowlist: BTreeSet<HexId>,
    pub locales: BTreeSet<String>,
    pub platforms: BTreeSet<String>,
    pub version_range: VersionRange,
    pub axis_constraints: std::collections::BTreeMap<String, BTreeSet<String>>,
    pub extension: Option<Arc<dyn RulePredicate>>,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("ramp_up", &self.ramp_up)
            .field("note", &self.note)
            .field("allowlist", &self.allowlist)
            .field("locales", &self.locales)
            .field("platforms", &self.platforms)
            .field("version_range", &self.version_range)
            .field("axis_constraints", &self.axis_constraints)
            .field("has_extension", &self.extension.is_some())
            .finish()
    }
}

impl Default for Rule {
    fn default() -> Self {
        Rule {
            ramp_up: 100.0,
            note: None,
            allowlist: BTreeSet::new(),
            locales: BTreeSet::new(),
            platforms: BTreeSet::new(),
            version_range: VersionRange::Unbounded,
            axis_constraints: Default::default(),
            extension: None,
        }
    }
}

impl Rule {
    /// Whether every non-empty clause is satisfied by `ctx`.
    pub fn matches(&self, ctx: &Context) -> bool {
        if !self.locales.is_empty() {
            let Some(locale) = ctx.locale.as_deref() else {
                return false;
            };
            if !self.locales.contains(locale) {
                return false;
            }
        }
        if !self.platforms.is_empty() {
            let Some(platform) = ctx.platform.as_deref() else {
                return false;
            };
            if !self.platforms.contains(platform) {
                return false;
            }
        }
        if self.version_range.is_bounded() {
            let Some(version) = ctx.app_version else {
                return false;
            };
            if !self.version_range.contains(version) {
                return false;
            }
        }
        for (axis_id, allowed) in &self.axis_constraints {
            if !ctx.axis_values.contains_any(axis_id, allowed) {
                return false;
            }
        }
        if let Some(ext) = &self.extension {
            if !ext.matches(ctx) {
                return false;
            }
        }
        true
    }

    /// Count of non-empty base clauses, plus the extension's self-reported
    /// contribution.
    pub fn specificity(&self) -> u32 {
        let mut n = 0;
        if !self.locales.is_empty() {
            n += 1;
        }
        if !self.platforms.is_empty() {
            n += 1;
        }
        if self.version_range.is_bounded() {
            n += 1;
        }
        n += self.axis_constraints.len() as u32;
        if let Some(ext) = &self.extension {
            n += ext.specificity();
        }
        n
    }

    /// Whether this rule can only be honored for a context that carries a
    /// stable id: either it has a non-trivial ramp-up, or its own allowlist
    /// is non-empty. The flag-level allowlist plays no part here — it only
    /// ever widens eligibility for a context that already has a stable id.
    pub fn requires_stable_id(&self) -> bool {
        self.ramp_up < 100.0 || !self.allowlist.is_empty()
    }
}

/// Where a matched rule's value comes from: a fixed literal, or a function
/// of the evaluation context. Contextual values cannot be serialized; the
/// codec rejects them on encode (edge case iii).
#[derive(Clone)]
pub enum ValueSource<T: FlagValue> {
    Fixed(T),
    Contextual(Arc<dyn Fn(&Context) -> T + Send + Sync>),
}

impl<T: FlagValue> ValueSource<T> {
    pub fn resolve(&self, ctx: &Context) -> T {
        match self {
            ValueSource::Fixed(v) => v.clone(),
            ValueSource::Contextual(f) => f(ctx),
        }
    }

    pub fn is_contextual(&self) -> bool {
        matches!(self, ValueSource::Contextual(_))
    }

    pub fn fixed_value(&self) -> Option<&T> {
        match self {
            ValueSource::Fixed(v) => Some(v),
            ValueSource::Contextual(_) => None,
        }
    }
}

impl<T: FlagValue> fmt::Debug for ValueSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSource::Fixed(v) => write!(f, "Fixed({v:?})"),
            ValueSource::Contextual(_) => write!(f, "Contextual(..)"),
        }
    }
}

/// A `(rule, value)` pair: the predicate that must match, and the value
/// produced when it wins.
#[derive(Clone, Debug)]
pub struct ConditionalValue<T: FlagValue> {
    pub rule: Rule,
    pub value: ValueSource<T>,
}

impl<T: FlagValue> ConditionalValue<T> {
    pub fn fixed(rule: Rule, value: T) -> Self {
        ConditionalValue {
            rule,
            value: ValueSource::Fixed(value),
        }
    }
}
