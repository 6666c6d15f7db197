//! Deterministic bucketing.
//!
//! Buckets are a pure function of their inputs: no hidden state, no I/O. The
//! same `(project, environment, flag, salt, identity)` tuple always lands in
//! the same bucket, across calls and across process restarts.
use crate::context::EvaluationContext;

/// Maps arbitrary bytes into `0..total_shards` deterministically.
pub trait Sharder {
    #[allow(missing_docs)]
    fn shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64;
}

/// The default (and only) sharder.
pub struct Md5Sharder;

impl Sharder for Md5Sharder {
    fn shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64 {
        let hash = md5::compute(input);
        let value = u32::from_be_bytes(hash[0..4].try_into().expect("md5 digest is 16 bytes"));
        (value as u64) % total_shards
    }
}

/// Bucket a context into `[1, range]` for the given salt.
///
/// The salt isolates distributions: bucketing for one rule's variant is
/// independent of bucketing for another rule or for default weighted
/// selection.
pub fn bucket(context: &EvaluationContext, salt: &str, range: u64) -> i64 {
    let identity = context.identity();
    let input = [
        context.project_key(),
        context.environment_key(),
        context.flag_key(),
        salt,
        &identity,
    ]
    .join("/");
    (Md5Sharder.shard(input, range) + 1) as i64
}
