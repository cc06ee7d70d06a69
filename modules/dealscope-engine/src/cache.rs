//! Verification result cache, keyed by claim content hash.
//!
//! Explicitly constructed and injected into the pipeline at composition
//! time; its lifecycle is owned by the caller, not ambient module state.

use std::collections::HashMap;
use std::sync::Mutex;

use dealscope_common::Severity;

#[derive(Debug, Clone)]
pub struct CachedVerdict {
    pub is_grounded: bool,
    pub severity: Severity,
    pub reason: String,
    pub action: String,
}

#[derive(Debug, Default)]
pub struct VerificationCache {
    entries: Mutex<HashMap<u64, CachedVerdict>>,
}

impl VerificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, claim_content: &str) -> Option<CachedVerdict> {
        let key = content_hash(claim_content);
        self.entries
            .lock()
            .expect("verification cache lock poisoned")
            .get(&key)
            .cloned()
    }

    pub fn put(&self, claim_content: &str, verdict: CachedVerdict) {
        let key = content_hash(claim_content);
        self.entries
            .lock()
            .expect("verification cache lock poisoned")
            .insert(key, verdict);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("verification cache lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// FNV-1a content hash. Not cryptographic.
fn content_hash(content: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in content.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
