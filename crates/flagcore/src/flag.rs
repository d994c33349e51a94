//! Per-flag precedence list and per-context evaluation (C5).

use std::collections::BTreeSet;

use crate::bucket::{self, FALLBACK_BUCKET};
use crate::context::Context;
use crate::id::{FeatureId, HexId};
use crate::rule::ConditionalValue;
use crate::value::FlagValue;

/// The class of decision an evaluation reached, used by shadow evaluation
/// (C8) to classify `DECISION` mismatches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecisionKind {
    Inactive,
    RegistryDisabled,
    MissingStableId,
    MatchedRule,
    Default,
}

/// Diagnostic trace accompanying an evaluation result.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Trace {
    pub decision: Option<DecisionKind>,
    /// Index into the flag's `values` of the rule that won, if any.
    pub matched: Option<usize>,
    pub bucket: Option<u32>,
    /// Index of the first rule that matched its predicate clauses but lost
    /// to ramp-up/allowlist eligibility.
    pub skipped_by_ramp_up: Option<usize>,
}

impl Trace {
    fn with_decision(decision: DecisionKind) -> Self {
        Trace {
            decision: Some(decision),
            ..Default::default()
        }
    }
}

/// A declared feature: its default, precedence-ordered targeting rules,
/// bucketing salt, active flag, and flag-level ramp-up allowlist.
///
/// Invariant: `values` is always stored sorted by descending
/// [`crate::rule::Rule::specificity`], ties broken by definition order,
/// enforced by [`FlagDefinitionBuilder::build`] and never mutated afterwards.
#[derive(Clone, Debug)]
pub struct FlagDefinition<T: FlagValue> {
    pub feature: FeatureId,
    pub default: T,
    values: Vec<ConditionalValue<T>>,
    pub salt: String,
    pub is_active: bool,
    pub ramp_up_allowlist: BTreeSet<HexId>,
}

impl<T: FlagValue> FlagDefinition<T> {
    pub fn values(&self) -> &[ConditionalValue<T>] {
        &self.values
    }

    /// Evaluate this flag against `ctx`, per the C5 algorithm: inactive
    /// short-circuit, then precedence-ordered rule matching with lazily
    /// computed, memoized bucketing.
    pub fn evaluate(&self, ctx: &Context) -> (T, Trace) {
        if !self.is_active {
            return (self.default.clone(), Trace::with_decision(DecisionKind::Inactive));
        }

        let mut bucket: Option<u32> = None;
        let mut skipped_by_ramp_up: Option<usize> = None;

        for (idx, cv) in self.values.iter().enumerate() {
            if !cv.rule.matches(ctx) {
                continue;
            }

            if cv.rule.requires_stable_id() && ctx.stable_id.is_none() {
                return (
                    self.default.clone(),
                    Trace::with_decision(DecisionKind::MissingStableId),
                );
            }

            let b = *bucket.get_or_insert_with(|| match &ctx.stable_id {
                Some(stable_id) => bucket::bucket_of(&self.salt, self.feature.as_str(), stable_id.as_str()),
                None => FALLBACK_BUCKET,
            });

            let eligible = ctx
                .stable_id
                .as_ref()
                .is_some_and(|id| self.ramp_up_allowlist.contains(id) || cv.rule.allowlist.contains(id))
                || bucket::is_in_ramp_up(cv.rule.ramp_up, b);

            if eligible {
                return (
                    cv.value.resolve(ctx),
                    Trace {
                        decision: Some(DecisionKind::MatchedRule),
                        matched: Some(idx),
                        bucket: Some(b),
                        skipped_by_ramp_up,
                    },
                );
            } else if skipped_by_ramp_up.is_none() {
                skipped_by_ramp_up = Some(idx);
            }
        }

        (
            self.default.clone(),
            Trace {
                decision: Some(DecisionKind::Default),
                matched: None,
                bucket,
                skipped_by_ramp_up,
            },
        )
    }
}

/// Builds a [`FlagDefinition`], sorting `values` by descending specificity
/// (stable sort, so ties preserve insertion order) exactly once on `build`.
pub struct FlagDefinitionBuilder<T: FlagValue> {
    feature: FeatureId,
    default: T,
    values: Vec<ConditionalValue<T>>,
    salt: String,
    is_active: bool,
    ramp_up_allowlist: BTreeSet<HexId>,
}

impl<T: FlagValue> FlagDefinitionBuilder<T> {
    pub fn new(feature: FeatureId, default: T) -> Self {
        FlagDefinitionBuilder {
            feature,
            default,
            values: Vec::new(),
            salt: "v1".to_string(),
            is_active: true,
            ramp_up_allowlist: BTreeSet::new(),
        }
    }

    pub fn salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = salt.into();
        self
    }

    pub fn is_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    pub fn ramp_up_allowlist(mut self, allowlist: BTreeSet<HexId>) -> Self {
        self.ramp_up_allowlist = allowlist;
        self
    }

    pub fn rule(mut self, value: ConditionalValue<T>) -> Self {
        self.values.push(value);
        self
    }

    pub fn build(self) -> FlagDefinition<T> {
        let mut values = self.values;
        values.sort_by(|a, b| b.rule.specificity().cmp(&a.rule.specificity()));
        FlagDefinition {
            feature: self.feature,
            default: self.default,
            values,
            salt: self.salt,
            is_active: self.is_active,
            ramp_up_allowlist: self.ramp_up_allowlist,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::HexId;
    use crate::rule::Rule;

    fn stable_id(s: &str) -> HexId {
        HexId::from_hex(s).unwrap()
    }

    #[test]
    fn inactive_flag_returns_default() {
        let flag = FlagDefinitionBuilder::new(FeatureId::new("ns", "darkMode"), false)
            .is_active(false)
            .build();
        let (value, trace) = flag.evaluate(&Context::default());
        assert_eq!(value, false);
        assert_eq!(trace.decision, Some(DecisionKind::Inactive));
    }

    #[test]
    fn s1_matching_rule_wins() {
        let mut rule = Rule::default();
        rule.platforms.insert("IOS".to_string());
        let flag = FlagDefinitionBuilder::new(FeatureId::new("ns", "darkMode"), false)
            .rule(ConditionalValue::fixed(rule, true))
            .build();
        let ctx = Context::builder()
            .locale("US")
            .platform("IOS")
            .app_version(crate::version::Version::new(1, 0, 0))
            .stable_id(stable_id("01"))
            .build();
        let (value, trace) = flag.evaluate(&ctx);
        assert_eq!(value, true);
        assert_eq!(trace.decision, Some(DecisionKind::MatchedRule));
    }

    #[test]
    fn s2_specificity_tiebreak() {
        let mut narrow = Rule::default();
        narrow.platforms.insert("IOS".to_string());
        narrow.locales.insert("US".to_string());
        let mut broad = Rule::default();
        broad.platforms.insert("IOS".to_string());

        let flag = FlagDefinitionBuilder::new(FeatureId::new("ns", "variant"), "default".to_string())
            .rule(ConditionalValue::fixed(broad, "B".to_string()))
            .rule(ConditionalValue::fixed(narrow, "A".to_string()))
            .build();

        // Builder sorts by specificity regardless of insertion order.
        let ctx = Context::builder()
            .locale("US")
            .platform("IOS")
            .stable_id(stable_id("02"))
            .build();
        let (value, _) = flag.evaluate(&ctx);
        assert_eq!(value, "A");
    }

    #[test]
    fn ties_preserve_insertion_order() {
        let first = Rule::default();
        let second = Rule::default();
        let flag = FlagDefinitionBuilder::new(FeatureId::new("ns", "variant"), "default".to_string())
            .rule(ConditionalValue::fixed(first, "first".to_string()))
            .rule(ConditionalValue::fixed(second, "second".to_string()))
            .build();
        let ctx = Context::builder().stable_id(stable_id("03")).build();
        let (value, _) = flag.evaluate(&ctx);
        assert_eq!(value, "first");
    }

    #[test]
    fn missing_stable_id_falls_back_to_default_for_non_trivial_ramp_up() {
        let mut rule = Rule::default();
        rule.ramp_up = 50.0;
        let flag = FlagDefinitionBuilder::new(FeatureId::new("ns", "ramped"), false)
            .rule(ConditionalValue::fixed(rule, true))
            .build();
        let (value, trace) = flag.evaluate(&Context::default());
        assert_eq!(value, false);
        assert_eq!(trace.decision, Some(DecisionKind::MissingStableId));
    }

    #[test]
    fn missing_stable_id_with_full_ramp_up_still_matches() {
        let rule = Rule::default(); // ramp_up defaults to 100.0, no allowlist
        let flag = FlagDefinitionBuilder::new(FeatureId::new("ns", "fullRampUp"), false)
            .rule(ConditionalValue::fixed(rule, true))
            .build();
        let (value, trace) = flag.evaluate(&Context::default());
        assert_eq!(value, true);
        assert_eq!(trace.decision, Some(DecisionKind::MatchedRule));
    }

    #[test]
    fn flag_level_allowlist_alone_does_not_require_a_stable_id() {
        // A flag-level ramp-up allowlist only ever widens eligibility for a
        // context that already has a stable id; it must not force a
        // stable-id-less context away from a 100%-ramp-up, no-rule-allowlist
        // rule it would otherwise match.
        let rule = Rule::default();
        let flag = FlagDefinitionBuilder::new(FeatureId::new("ns", "fullRampUp"), false)
            .ramp_up_allowlist(BTreeSet::from([stable_id("ff")]))
            .rule(ConditionalValue::fixed(rule, true))
            .build();
        let (value, trace) = flag.evaluate(&Context::default());
        assert_eq!(value, true);
        assert_eq!(trace.decision, Some(DecisionKind::MatchedRule));
    }

    #[test]
    fn no_rule_wins_returns_default_with_trace() {
        let mut rule = Rule::default();
        rule.platforms.insert("ANDROID".to_string());
        let flag = FlagDefinitionBuilder::new(FeatureId::new("ns", "darkMode"), false)
            .rule(ConditionalValue::fixed(rule, true))
            .build();
        let ctx = Context::builder().platform("IOS").stable_id(stable_id("04")).build();
        let (value, trace) = flag.evaluate(&ctx);
        assert_eq!(value, false);
        assert_eq!(trace.decision, Some(DecisionKind::Default));
    }
}
