// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Short, globally unique identifiers for clients and other short-lived objects.
//!
//! Mirrors the role of the original id-manager: a monotonic counter turned into a
//! short printable string, unique for the lifetime of the process, safe to call
//! from any thread.

use std::sync::atomic::{AtomicU64, Ordering};

const ALPHABET: &[u8; 16] = b"0123456789abcdef";

/// Issues short printable ids, unique within the process, under concurrent callers.
#[derive(Debug, Default)]
pub struct IdManager {
    next: AtomicU64,
}

impl IdManager {
    /// Creates a fresh manager starting from zero.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Generates the next id, prefixed with `prefix` (e.g. `"c"` for clients).
    ///
    /// Ids are hex-encoded (`[0-9a-f]`), matching the format invariant §8
    /// binds client ids to. Ids are lexicographically stable for a fixed
    /// width: two ids generated from the same prefix compare the same way
    /// under both numeric and string ordering as long as neither has rolled
    /// past the width of the other, which for a `u64` counter encoded in
    /// hex never happens in practice.
    pub fn generate(&self, prefix: &str) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let mut digits = [0u8; 16];
        let mut i = digits.len();
        let mut v = n;
        loop {
            i -= 1;
            digits[i] = ALPHABET[(v & 0xf) as usize];
            v >>= 4;
            if v == 0 {
                break;
            }
        }
        let mut id = String::with_capacity(prefix.len() + (digits.len() - i));
        id.push_str(prefix);
        id.push_str(std::str::from_utf8(&digits[i..]).expect("hex digits are ascii"));
        id
    }
}

#[cfg(test)]
mod test {
    use super::IdManager;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn generate_produces_distinct_ids() {
        let mgr = IdManager::new();
        let a = mgr.generate("c");
        let b = mgr.generate("c");
        assert_ne!(a, b);
        assert!(a.starts_with('c'));
        assert!(b.starts_with('c'));
    }

    #[test]
    fn generate_uses_hex_digits_only() {
        let mgr = IdManager::new();
        for _ in 0..20 {
            let id = mgr.generate("c");
            let digits = &id[1..];
            assert!(
                digits.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)),
                "id {id:?} contains a non-hex digit"
            );
        }
    }

    #[test]
    fn generate_is_unique_under_concurrent_callers() {
        let mgr = Arc::new(IdManager::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let mgr = mgr.clone();
            handles.push(thread::spawn(move || {
                (0..200).map(|_| mgr.generate("c")).collect::<Vec<_>>()
            }));
        }
        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "id generated twice");
            }
        }
        assert_eq!(seen.len(), 8 * 200);
    }
}
