//! Pure flag evaluation.
//!
//! [`evaluate`] is a pure function: no side effects, no I/O, and it always
//! produces a result for well-formed input. It never consults the cache;
//! callers decide when to wrap it with one (see [`crate::evaluator`]).
use serde::{Deserialize, Serialize};

use crate::context::EvaluationContext;
use crate::flags::{FlagDefinition, MatchClause, Rule, Variant};
use crate::sharder::bucket;

/// Reason reported when the flag's kill switch is off.
pub const REASON_FLAG_DISABLED: &str = "flag_disabled";

/// Reason reported when no rule matched and a default variant was selected.
pub const REASON_FALLBACK_DEFAULT: &str = "fallback_default";

/// Outcome of evaluating a flag for one context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    /// Selected variant key. `None` only when the flag has no variants.
    pub variant: Option<String>,
    /// Why this variant was selected: `flag_disabled`, `matched_<attribute>`,
    /// `matched_<attribute>_rollout`, or `fallback_default`.
    pub reason: String,
    /// Rollout percentage of the matching rule; 0 outside the rule path.
    pub rollout: i64,
    /// Payload of the selected variant, if it carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Map<String, serde_json::Value>>,
    /// Bucket the context landed in, present only when partial-rollout
    /// bucketing actually ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<i64>,
}

/// Evaluate a flag for a context.
pub fn evaluate(flag: &FlagDefinition, context: &EvaluationContext) -> EvaluationResult {
    let result = evaluate_inner(flag, context);
    log::trace!(target: "flagcache",
        flag_key = context.flag_key(),
        variant = result.variant.as_deref().unwrap_or(""),
        reason = result.reason.as_str();
        "evaluated flag");
    result
}

fn evaluate_inner(flag: &FlagDefinition, context: &EvaluationContext) -> EvaluationResult {
    if !flag.enabled {
        let first = flag.variants.first();
        return EvaluationResult {
            variant: first.map(|v| v.key.clone()),
            reason: REASON_FLAG_DISABLED.to_owned(),
            rollout: 0,
            payload: first.and_then(|v| v.payload.clone()),
            bucket: None,
        };
    }

    for rule in &flag.rules {
        if let Some(result) = eval_rule(flag, rule, context) {
            return result;
        }
    }

    default_variant(flag, context)
}

/// Evaluate one rule. `None` means the rule contributes nothing and the next
/// rule should be tried: a failed match, a reference to a variant the flag
/// does not define, a zero rollout, or a bucket outside the rollout.
fn eval_rule(
    flag: &FlagDefinition,
    rule: &Rule,
    context: &EvaluationContext,
) -> Option<EvaluationResult> {
    let clauses: Vec<&MatchClause> = rule.normalized_clauses().collect();
    // A rule with no usable clauses never matches.
    if clauses.is_empty() {
        return None;
    }
    let matches = clauses.iter().all(|clause| {
        context
            .attribute_values(&clause.attribute)
            .is_some_and(|values| clause.values.iter().any(|v| values.contains(v)))
    });
    if !matches {
        return None;
    }

    // A rule pointing at a variant the flag does not define is skipped rather
    // than failing the whole evaluation.
    let variant = find_variant(flag, &rule.variant_key)?;

    // The reason names the first clause's attribute so it is reproducible.
    let matched_attribute = &clauses[0].attribute;
    let rollout = rule.effective_rollout();
    if rollout == 0 {
        return None;
    }
    if rollout >= 100 {
        return Some(EvaluationResult {
            variant: Some(variant.key.clone()),
            reason: format!("matched_{matched_attribute}"),
            rollout,
            payload: variant.payload.clone(),
            bucket: None,
        });
    }

    let bucket = bucket(context, &rule.variant_key, 100);
    if bucket <= rollout {
        Some(EvaluationResult {
            variant: Some(variant.key.clone()),
            reason: format!("matched_{matched_attribute}_rollout"),
            rollout,
            payload: variant.payload.clone(),
            bucket: Some(bucket),
        })
    } else {
        None
    }
}

/// Weighted default selection when no rule matched.
fn default_variant(flag: &FlagDefinition, context: &EvaluationContext) -> EvaluationResult {
    let total: i64 = flag.variants.iter().map(|v| v.weight.max(0)).sum();
    if total <= 0 {
        // No weighted variants; fall back to definition order.
        let first = flag.variants.first();
        return fallback_result(first);
    }

    let scaled = bucket(context, "default", total as u64);
    let mut cumulative = 0;
    for variant in &flag.variants {
        if variant.weight <= 0 {
            continue;
        }
        cumulative += variant.weight;
        if cumulative >= scaled {
            return fallback_result(Some(variant));
        }
    }

    // Rounding slack: the last variant takes the remainder.
    fallback_result(flag.variants.last())
}

fn fallback_result(variant: Option<&Variant>) -> EvaluationResult {
    EvaluationResult {
        variant: variant.map(|v| v.key.clone()),
        reason: REASON_FALLBACK_DEFAULT.to_owned(),
        rollout: 0,
        payload: variant.and_then(|v| v.payload.clone()),
        // Bucket is not reported for the default path.
        bucket: None,
    }
}

fn find_variant<'a>(flag: &'a FlagDefinition, key: &str) -> Option<&'a Variant> {
    flag.variants.iter().find(|v| v.key == key)
}
