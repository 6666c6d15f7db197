//! Cache-aside evaluation entry point.
//!
//! [`Evaluator`] simplifies calling into the pure evaluation function by
//! resolving the flag definition through the persistence seam and, when a
//! cache is attached, consulting it before evaluating and populating it
//! after. The cache is never authoritative: on any cache misbehavior the
//! caller still gets a freshly evaluated result.
use std::sync::Arc;

use crate::cache::{CacheRepository, EvaluationKey, Scope};
use crate::context::EvaluationContext;
use crate::eval::{evaluate, EvaluationResult};
use crate::flags::FlagSource;
use crate::signature::flag_signature;

/// Ties a [`FlagSource`] and an optional [`CacheRepository`] together.
pub struct Evaluator<S> {
    source: S,
    cache: Option<Arc<CacheRepository>>,
}

impl<S: FlagSource> Evaluator<S> {
    /// Evaluator without a cache; every call hits the source and evaluates.
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: None,
        }
    }

    /// Evaluator with a cache consulted before and populated after
    /// evaluation.
    pub fn with_cache(source: S, cache: Arc<CacheRepository>) -> Self {
        Self {
            source,
            cache: Some(cache),
        }
    }

    /// Evaluate the context's flag. `None` when the flag is unknown to the
    /// source.
    pub fn evaluate(&self, context: &EvaluationContext) -> Option<EvaluationResult> {
        let flag = self.source.flag_definition(
            context.project_key(),
            context.environment_key(),
            context.flag_key(),
        )?;

        let Some(cache) = &self.cache else {
            return Some(evaluate(&flag, context));
        };

        let key = EvaluationKey {
            scope: Scope::new(context.project_key(), context.environment_key()),
            flag_key: context.flag_key().to_owned(),
            signature: flag_signature(&flag),
            context_hash: context.context_hash(),
        };
        if let Some(cached) = cache.get_evaluation(&key) {
            return Some(cached);
        }

        let result = evaluate(&flag, context);
        cache.store_evaluation(&key, &result);
        Some(result)
    }
}
