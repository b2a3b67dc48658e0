//! Wire Contract
//!
//! Header names, the chunk URL format, and the verb rewriting shared by the
//! manager and the storage nodes.
//!
//! A committed chunk is addressed by a **chunk ref** of the form
//! `<node-base-url>/[STORED]/<sha256-hex>`. The `[STORED]` token is a
//! placeholder: the manager rewrites it to `download`, `commit` or
//! `rollback` depending on the verb it is about to dispatch, so one stored
//! string serves all three endpoints.

use axum::http::HeaderMap;

/// Placeholder token in chunk refs, rewritten per verb.
pub const STORED_MARK: &str = "[STORED]";

/// Digest of a chunk body, hex-encoded SHA-256.
pub const HEADER_HASH: &str = "x-hash";
/// Opaque tmp path returned by a node on segment upload, echoed back on
/// commit/rollback.
pub const HEADER_FILENAME: &str = "x-filename";

/// Registration headers sent by a storage node.
pub const HEADER_REGISTER: &str = "x-register";
pub const HEADER_ADDR: &str = "x-addr";
pub const HEADER_LIMIT: &str = "x-limit";
pub const HEADER_USED: &str = "x-used";

/// User agent both services identify as.
pub const USER_AGENT: &str = "shardstore";

/// A header's value as a string; empty when absent or not UTF-8.
pub fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Builds a chunk ref from a node base URL and a chunk digest.
pub fn chunk_ref(base_url: &str, hash: &str) -> String {
    format!("{}/{}/{}", base_url, STORED_MARK, hash)
}

/// Rewrites the `[STORED]` token to the given verb. Refs contain the token
/// exactly once; only the first occurrence is replaced.
pub fn rewrite_verb(chunk_ref: &str, verb: &str) -> String {
    chunk_ref.replacen(STORED_MARK, verb, 1)
}

/// The node base URL a chunk ref points at. Falls back to the whole string
/// for URLs that were never rewritten into refs (failed uploads).
pub fn chunk_base(chunk_ref: &str) -> &str {
    match chunk_ref.find(STORED_MARK) {
        Some(idx) => chunk_ref[..idx].trim_end_matches('/'),
        None => chunk_ref,
    }
}

/// The digest a chunk ref addresses: its last path segment.
pub fn chunk_hash(chunk_ref: &str) -> &str {
    chunk_ref.rsplit('/').next().unwrap_or(chunk_ref)
}

/// Normalizes a listen address. Both services accept the bare `:port` form
/// (the same form a node sends as `x-addr`); it binds on all interfaces.
pub fn listen_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}
