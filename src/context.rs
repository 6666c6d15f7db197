//! Evaluation context: who and where a flag is being evaluated for.
use std::fmt::Write;

/// Immutable per-request input to flag evaluation.
///
/// Attributes are normalized on construction: keys sorted, value lists sorted
/// and de-duplicated, attributes with no values dropped. Normalization makes
/// both bucketing of anonymous contexts and the cache's context hash stable
/// regardless of the order the caller supplied attributes in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationContext {
    project_key: String,
    environment_key: String,
    flag_key: String,
    user_identifier: Option<String>,
    attributes: Vec<(String, Vec<String>)>,
}

impl EvaluationContext {
    /// Build a context. An empty user identifier is treated as absent.
    pub fn new(
        project_key: impl Into<String>,
        environment_key: impl Into<String>,
        flag_key: impl Into<String>,
        user_identifier: Option<String>,
        attributes: impl IntoIterator<Item = (String, Vec<String>)>,
    ) -> Self {
        let mut normalized: Vec<(String, Vec<String>)> = Vec::new();
        for (name, mut values) in attributes {
            values.sort();
            values.dedup();
            if values.is_empty() {
                continue;
            }
            match normalized.iter_mut().find(|(existing, _)| *existing == name) {
                Some((_, existing_values)) => {
                    existing_values.extend(values);
                    existing_values.sort();
                    existing_values.dedup();
                }
                None => normalized.push((name, values)),
            }
        }
        normalized.sort_by(|(a, _), (b, _)| a.cmp(b));

        Self {
            project_key: project_key.into(),
            environment_key: environment_key.into(),
            flag_key: flag_key.into(),
            user_identifier: user_identifier.filter(|id| !id.is_empty()),
            attributes: normalized,
        }
    }

    #[allow(missing_docs)]
    pub fn project_key(&self) -> &str {
        &self.project_key
    }

    #[allow(missing_docs)]
    pub fn environment_key(&self) -> &str {
        &self.environment_key
    }

    #[allow(missing_docs)]
    pub fn flag_key(&self) -> &str {
        &self.flag_key
    }

    #[allow(missing_docs)]
    pub fn user_identifier(&self) -> Option<&str> {
        self.user_identifier.as_deref()
    }

    /// Values for an attribute, if present.
    pub fn attribute_values(&self, name: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .find(|(attribute, _)| attribute == name)
            .map(|(_, values)| values.as_slice())
    }

    /// The stable identity bucketing runs on: the user identifier when one is
    /// present, otherwise the canonical attribute serialization.
    pub(crate) fn identity(&self) -> String {
        match &self.user_identifier {
            Some(id) => id.clone(),
            None => self.canonical_attributes(),
        }
    }

    /// Stable hash of the normalized `(user_identifier, attributes)` pair,
    /// used as the context component of evaluation cache keys.
    pub fn context_hash(&self) -> String {
        let canonical = format!(
            "{}|{}",
            self.user_identifier.as_deref().unwrap_or(""),
            self.canonical_attributes()
        );
        format!("{:x}", md5::compute(canonical))
    }

    fn canonical_attributes(&self) -> String {
        let mut out = String::new();
        for (name, values) in &self.attributes {
            if !out.is_empty() {
                out.push(';');
            }
            // Attributes are already sorted and de-duplicated.
            let _ = write!(out, "{}={}", name, values.join(","));
        }
        out
    }
}
