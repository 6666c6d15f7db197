//! Flag signature: a content hash of a flag's mutable fields.
//!
//! The signature participates in evaluation cache keys, so editing a flag
//! moves its entries to a disjoint key space. Stale entries are never actively
//! rewritten; they age out via TTL.
use serde::Serialize;

use crate::flags::{FlagDefinition, Rule, Timestamp, Variant};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignatureFields<'a> {
    last_modified: &'a Timestamp,
    enabled: bool,
    variants: &'a [Variant],
    rules: &'a [Rule],
}

/// Stable content hash of `{lastModified, enabled, variants, rules}`.
///
/// Canonical form is the JSON serialization: struct field order is fixed and
/// payload maps serialize with sorted keys, so two flags with identical
/// mutable fields hash identically across process restarts.
pub fn flag_signature(flag: &FlagDefinition) -> String {
    let fields = SignatureFields {
        last_modified: &flag.last_modified,
        enabled: flag.enabled,
        variants: &flag.variants,
        rules: &flag.rules,
    };
    let bytes =
        serde_json::to_vec(&fields).expect("flag definition fields are always serializable");
    format!("{:x}", md5::compute(bytes))
}
