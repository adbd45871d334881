//! CID extraction and normalization helpers.
//!
//! Candidate tokens are cheap to find but expensive to trust; every helper
//! here validates candidates with a real CID decode before returning them.

use std::collections::HashSet;
use std::sync::LazyLock;

use cid::Cid;
use multihash::Multihash;
use regex::Regex;

/// Multihash code for sha2-256.
const SHA2_256: u64 = 0x12;
/// Multicodec for raw blocks.
const RAW_CODEC: u64 = 0x55;

/// Roughly matches CID-like tokens; base32/base36 CID strings are lowercase.
static CID_LIKE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b([a-z0-9]{10,})\b").unwrap());

/// Scan free text for CID strings, validating each candidate by decoding it.
///
/// Duplicates are dropped; order of first appearance is preserved.
pub fn extract_cid_strings(s: &str) -> Vec<String> {
    if s.is_empty() {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for m in CID_LIKE.find_iter(s) {
        let cand = m.as_str();
        if seen.contains(cand) {
            continue;
        }
        if Cid::try_from(cand).is_err() {
            continue;
        }
        seen.insert(cand.to_string());
        out.push(cand.to_string());
    }
    out
}

/// Split a datastore key segment on common separators and keep the pieces
/// that decode as CIDs.
pub fn extract_cids_from_segments(s: &str) -> Vec<String> {
    if s.is_empty() {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for piece in s.split(['/', ':', '_', '-', '.']) {
        let piece = piece.trim();
        if piece.is_empty() || seen.contains(piece) {
            continue;
        }
        if Cid::try_from(piece).is_err() {
            continue;
        }
        seen.insert(piece.to_string());
        out.push(piece.to_string());
    }
    out
}

/// Parse raw bytes as a CID and render the canonical string form.
pub fn cid_string_from_bytes(bytes: &[u8]) -> Option<String> {
    Cid::try_from(bytes).ok().map(|c| c.to_string())
}

/// Convert a provider-record key (a multihash) to a canonical CID string.
///
/// Prefers CIDv0 for sha2-256 hashes; anything else is wrapped as CIDv1-raw
/// for a stable CID-like representation.
pub fn multihash_to_cid_string(key: &[u8]) -> Option<String> {
    let mh = Multihash::<64>::from_bytes(key).ok()?;
    if mh.code() == SHA2_256 {
        Cid::new_v0(mh).ok().map(|c| c.to_string())
    } else {
        Some(Cid::new_v1(RAW_CODEC, mh).to_string().to_lowercase())
    }
}

/// Normalize a discovered identifier into a fetch target.
///
/// Accepts `/ipfs/<root>[/rest]` and bare CIDs (`bafy…`/`Qm…`); `/ipns/…`
/// and everything else is not a direct fetch target.
pub fn normalize_fetch_target(s: &str) -> Option<(String, String)> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(rest) = s.strip_prefix("/ipfs/") {
        let root = rest.split('/').next().unwrap_or_default();
        if root.is_empty() {
            return None;
        }
        return Some((root.to_string(), s.to_string()));
    }
    if s.starts_with("bafy") || s.starts_with("Qm") {
        return Some((s.to_string(), format!("/ipfs/{s}")));
    }
    None
}
