//! Stable id generation and the process-wide per-tool regex cache (C12).
//!
//! Both are shared resources with no observable semantics beyond
//! performance (§3, §5): cache fills are idempotent and the id counter is
//! an atomic, so concurrent sessions never need to coordinate.

use rand::Rng;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

static COUNTER: AtomicU64 = AtomicU64::new(1);

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a stable, opaque id: a monotonic counter plus a random suffix,
/// mirroring `g3_providers::mock`'s `AtomicU64` counter pattern. Tests treat
/// these as opaque but stable per emission.
pub fn next_stable_id(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut rng = rand::thread_rng();
    let suffix: String = (0..8)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{prefix}_{n}_{suffix}")
}

/// A process-wide cache of compiled regexes keyed by tool name, built
/// lazily. Reads are far more common than writes, so a `RwLock<HashMap>` is
/// a simpler fit than a lock-free map for this access pattern.
#[derive(Default)]
pub struct RegexCache {
    inner: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the cached regex for `key`, compiling and inserting it via
    /// `build` on a miss. `build` must be deterministic for a given key —
    /// concurrent misses race harmlessly to the same compiled pattern.
    pub fn get_or_compile(
        &self,
        key: &str,
        build: impl FnOnce() -> Regex,
    ) -> Regex {
        if let Some(re) = self.inner.read().unwrap().get(key) {
            return re.clone();
        }
        let re = build();
        self.inner
            .write()
            .unwrap()
            .insert(key.to_string(), re.clone());
        re
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
