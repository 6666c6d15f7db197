//! Flag definition wire model.
//!
//! Definitions are owned by the external persistence layer; this crate only
//! reads them. The serde representation matches the JSON shape definitions are
//! stored and transported in (camelCase keys, rule matches as JSON objects).
use serde::{Deserialize, Serialize};

#[allow(missing_docs)]
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// A feature flag as provided by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagDefinition {
    /// Flag key, unique within its project.
    pub key: String,
    /// Kill switch. Disabled flags short-circuit to the first variant.
    pub enabled: bool,
    /// When the flag was last edited. Participates in the flag signature so
    /// edits orphan stale cache entries.
    pub last_modified: Timestamp,
    /// Variants in definition order. Keys are unique within the flag.
    #[serde(default)]
    pub variants: Vec<Variant>,
    /// Targeting rules, evaluated in order. First satisfied rule wins.
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// A named outcome a flag can produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    /// Variant key, unique within the flag.
    pub key: String,
    /// Weight (0..=100) used for default weighted selection.
    #[serde(default)]
    pub weight: i64,
    /// Optional structured payload delivered with the variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Map<String, serde_json::Value>>,
}

/// An ordered match condition plus a target variant and rollout percentage.
///
/// The match is kept as an ordered list of clauses rather than a map: the
/// `matched_<attribute>` reason reports the first clause's attribute, so clause
/// order must survive serialization round-trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Attribute clauses, all of which must match (values within a clause are
    /// alternatives). Serialized as a JSON object; document order is kept.
    #[serde(rename = "match", with = "ordered_match")]
    pub clauses: Vec<MatchClause>,
    /// Key of the variant this rule assigns.
    pub variant_key: String,
    /// Percentage of matching traffic the rule applies to. Missing means 100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout: Option<i64>,
}

impl Rule {
    /// Clauses with at least one accepted value. Clauses with empty value
    /// lists never match anything and are dropped from consideration.
    pub(crate) fn normalized_clauses(&self) -> impl Iterator<Item = &MatchClause> {
        self.clauses.iter().filter(|clause| !clause.values.is_empty())
    }

    /// Rollout with the default applied and clamped into 0..=100.
    pub(crate) fn effective_rollout(&self) -> i64 {
        self.rollout.unwrap_or(100).clamp(0, 100)
    }
}

/// One attribute condition of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchClause {
    /// Context attribute the clause tests.
    pub attribute: String,
    /// Accepted values; any overlap with the context's values satisfies the
    /// clause.
    pub values: Vec<String>,
}

/// Serialize/deserialize rule clauses as a JSON object while preserving the
/// document's key order.
mod ordered_match {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};

    use super::MatchClause;

    pub fn serialize<S>(clauses: &[MatchClause], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(clauses.len()))?;
        for clause in clauses {
            map.serialize_entry(&clause.attribute, &clause.values)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<MatchClause>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ClauseVisitor;

        impl<'de> Visitor<'de> for ClauseVisitor {
            type Value = Vec<MatchClause>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of attribute names to accepted value lists")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut clauses = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((attribute, values)) = access.next_entry::<String, Vec<String>>()? {
                    clauses.push(MatchClause { attribute, values });
                }
                Ok(clauses)
            }
        }

        deserializer.deserialize_map(ClauseVisitor)
    }
}

/// Persistence seam. Implementations resolve flag definitions by
/// `(project, environment, flag)` triple; this crate never writes them.
pub trait FlagSource {
    /// Look up a flag definition. `None` when the triple is unknown.
    fn flag_definition(
        &self,
        project_key: &str,
        environment_key: &str,
        flag_key: &str,
    ) -> Option<FlagDefinition>;
}
