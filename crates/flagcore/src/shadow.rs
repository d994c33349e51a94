//! Shadow evaluation (C8): evaluate a candidate configuration alongside
//! the production baseline for comparison, without ever letting the
//! candidate's value escape to the caller.

use crate::context::Context;
use crate::flag::{DecisionKind, Trace};
use crate::id::FeatureId;
use crate::registry::{EvaluationError, SnapshotHandle};
use crate::value::FlagValue;

/// The ways a baseline/candidate pair of evaluations can disagree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MismatchKind {
    /// The returned values differ.
    Value,
    /// The decision class differs (e.g. a rule matched on one side, the
    /// default won on the other).
    Decision,
    /// Both sides matched a rule, but not the same one.
    MatchedRule,
    /// The computed bucket differs.
    Bucket,
}

/// Whether shadow evaluation should still run the candidate when the
/// baseline itself is registry-disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShadowOptions {
    pub evaluate_candidate_when_baseline_inactive: bool,
}

/// Reported to `on_mismatch` whenever baseline and candidate disagree in
/// at least one respect. Carries both traces so the caller can inspect
/// exactly how they diverged.
#[derive(Clone, Debug)]
pub struct ShadowMismatch<T> {
    pub feature: FeatureId,
    pub baseline_value: T,
    pub candidate_value: T,
    pub baseline_trace: Trace,
    pub candidate_trace: Trace,
    pub kinds: Vec<MismatchKind>,
}

fn classify<T: PartialEq>(
    baseline_value: &T,
    candidate_value: &T,
    baseline_trace: &Trace,
    candidate_trace: &Trace,
) -> Vec<MismatchKind> {
    let mut kinds = Vec::new();
    if baseline_value != candidate_value {
        kinds.push(MismatchKind::Value);
    }
    if baseline_trace.decision != candidate_trace.decision {
        kinds.push(MismatchKind::Decision);
    } else if baseline_trace.decision == Some(DecisionKind::MatchedRule)
        && baseline_trace.matched != candidate_trace.matched
    {
        kinds.push(MismatchKind::MatchedRule);
    }
    if baseline_trace.bucket != candidate_trace.bucket {
        kinds.push(MismatchKind::Bucket);
    }
    kinds
}

/// Evaluate `feature` against both `baseline` and `candidate`, reporting
/// any disagreement to `on_mismatch`. Always returns the baseline's
/// value; the candidate's value is never user-visible (edge case /
/// invariant of C8).
pub fn evaluate_with_shadow<T: FlagValue + PartialEq>(
    feature: &FeatureId,
    ctx: &Context,
    baseline: &SnapshotHandle,
    candidate: &SnapshotHandle,
    options: ShadowOptions,
    on_mismatch: &mut dyn FnMut(ShadowMismatch<T>),
) -> Result<T, EvaluationError> {
    let (baseline_value, baseline_trace) = baseline.explain::<T>(feature, ctx)?;

    if baseline_trace.decision == Some(DecisionKind::RegistryDisabled)
        && !options.evaluate_candidate_when_baseline_inactive
    {
        return Ok(baseline_value);
    }

    let (candidate_value, candidate_trace) = candidate.explain::<T>(feature, ctx)?;

    let kinds = classify(&baseline_value, &candidate_value, &baseline_trace, &candidate_trace);
    if !kinds.is_empty() {
        on_mismatch(ShadowMismatch {
            feature: feature.clone(),
            baseline_value: baseline_value.clone(),
            candidate_value,
            baseline_trace,
            candidate_trace,
            kinds,
        });
    }

    Ok(baseline_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::HexId;
    use crate::registry::{ConfigurationSnapshot, NamespaceRegistry, RegistryConfig};
    use crate::rule::{ConditionalValue, Rule};

    fn registry_with_rule(platform_match: bool, value: bool) -> NamespaceRegistry {
        let mut rule = Rule::default();
        if platform_match {
            rule.platforms.insert("IOS".to_string());
        } else {
            rule.platforms.insert("ANDROID".to_string());
        }
        let feature = FeatureId::new("acme", "darkMode");
        let flag = crate::flag::FlagDefinitionBuilder::new(feature, false)
            .rule(ConditionalValue::fixed(rule, value))
            .build();
        let snapshot = ConfigurationSnapshot::builder().flag(flag).build();
        NamespaceRegistry::new("acme", snapshot, RegistryConfig::default())
    }

    fn ctx() -> Context {
        Context::builder()
            .platform("IOS")
            .stable_id(HexId::from_hex("01").unwrap())
            .build()
    }

    #[test]
    fn agreeing_snapshots_report_no_mismatch() {
        let baseline_registry = registry_with_rule(true, true);
        let candidate_registry = registry_with_rule(true, true);
        let baseline = baseline_registry.snapshot();
        let candidate = candidate_registry.snapshot();

        let mut mismatches: Vec<ShadowMismatch<bool>> = Vec::new();
        let value = evaluate_with_shadow(
            &FeatureId::new("acme", "darkMode"),
            &ctx(),
            &baseline,
            &candidate,
            ShadowOptions::default(),
            &mut |m| mismatches.push(m),
        )
        .unwrap();

        assert_eq!(value, true);
        assert!(mismatches.is_empty());
    }

    #[test]
    fn value_mismatch_is_reported_but_baseline_value_wins() {
        let baseline_registry = registry_with_rule(true, true);
        let candidate_registry = registry_with_rule(true, false);
        let baseline = baseline_registry.snapshot();
        let candidate = candidate_registry.snapshot();

        let mut mismatches: Vec<ShadowMismatch<bool>> = Vec::new();
        let value = evaluate_with_shadow(
            &FeatureId::new("acme", "darkMode"),
            &ctx(),
            &baseline,
            &candidate,
            ShadowOptions::default(),
            &mut |m| mismatches.push(m),
        )
        .unwrap();

        assert_eq!(value, true, "the baseline's value must always win, never the candidate's");
        assert_eq!(mismatches.len(), 1);
        assert!(mismatches[0].kinds.contains(&MismatchKind::Value));
    }

    #[test]
    fn decision_mismatch_when_only_candidate_matches_a_rule() {
        let baseline_registry = registry_with_rule(false, true); // rule targets ANDROID, won't match IOS ctx
        let candidate_registry = registry_with_rule(true, true); // rule targets IOS, matches
        let baseline = baseline_registry.snapshot();
        let candidate = candidate_registry.snapshot();

        let mut mismatches: Vec<ShadowMismatch<bool>> = Vec::new();
        let value = evaluate_with_shadow(
            &FeatureId::new("acme", "darkMode"),
            &ctx(),
            &baseline,
            &candidate,
            ShadowOptions::default(),
            &mut |m| mismatches.push(m),
        )
        .unwrap();

        assert_eq!(value, false);
        assert_eq!(mismatches.len(), 1);
        assert!(mismatches[0].kinds.contains(&MismatchKind::Decision));
    }

    #[test]
    fn candidate_is_skipped_when_baseline_disabled_and_option_is_off() {
        let baseline_registry = registry_with_rule(true, true);
        baseline_registry.disable_all();
        let candidate_registry = registry_with_rule(true, true);
        let baseline = baseline_registry.snapshot();
        let candidate = candidate_registry.snapshot();

        let mut calls = 0;
        let value = evaluate_with_shadow(
            &FeatureId::new("acme", "darkMode"),
            &ctx(),
            &baseline,
            &candidate,
            ShadowOptions::default(),
            &mut |_: ShadowMismatch<bool>| calls += 1,
        )
        .unwrap();

        assert_eq!(value, false); // registry-disabled default
        assert_eq!(calls, 0, "candidate must not be evaluated, so no mismatch can be reported");
    }
}
