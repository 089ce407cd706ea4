//! Rotating pool of canned persona replies.

use rand::Rng;

use crate::config::DEFAULT_FALLBACK_RESPONSES;

/// Pre-authored replies handed out when the provider can't be used.
///
/// Only the index of the last pick is remembered; the next pick is uniform
/// over every other entry, so the same line never appears twice in a row.
#[derive(Debug)]
pub struct FallbackPool {
    responses: Vec<String>,
    last: Option<usize>,
}

impl FallbackPool {
    /// Build a pool; blank entries are dropped and an empty list falls back
    /// to the built-in responses.
    pub fn new(responses: impl IntoIterator<Item = String>) -> Self {
        let mut responses: Vec<String> = responses
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if responses.is_empty() {
            responses = DEFAULT_FALLBACK_RESPONSES
                .iter()
                .map(|s| s.to_string())
                .collect();
        }
        Self {
            responses,
            last: None,
        }
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Pick the next reply.
    pub fn next(&mut self) -> String {
        self.next_with(&mut rand::thread_rng())
    }

    fn next_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> String {
        let n = self.responses.len();
        let idx = match self.last {
            Some(last) if n > 1 => {
                // Uniform over the n-1 other slots.
                let pick = rng.gen_range(0..n - 1);
                if pick >= last { pick + 1 } else { pick }
            }
            _ => rng.gen_range(0..n),
        };
        self.last = Some(idx);
        self.responses[idx].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(items: &[&str]) -> FallbackPool {
        FallbackPool::new(items.iter().map(|s| s.to_string()))
    }

    #[test]
    fn never_repeats_consecutively() {
        let mut p = pool(&["a", "b", "c"]);
        let mut prev = p.next();
        for _ in 0..500 {
            let next = p.next();
            assert_ne!(next, prev);
            prev = next;
        }
    }

    #[test]
    fn two_entries_alternate() {
        let mut p = pool(&["a", "b"]);
        let first = p.next();
        for i in 0..20 {
            let expected = if i % 2 == 0 { "a" } else { "b" };
            let got = p.next();
            if first == "a" {
                assert_eq!(got, if expected == "a" { "b" } else { "a" });
            } else {
                assert_eq!(got, expected);
            }
        }
    }

    #[test]
    fn single_entry_repeats() {
        let mut p = pool(&["only"]);
        assert_eq!(p.next(), "only");
        assert_eq!(p.next(), "only");
    }

    #[test]
    fn every_entry_is_reachable() {
        let mut p = pool(&["a", "b", "c", "d"]);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..400 {
            seen.insert(p.next());
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn empty_pool_uses_defaults() {
        let p = FallbackPool::new(vec!["  ".to_string()]);
        assert_eq!(p.len(), DEFAULT_FALLBACK_RESPONSES.len());
        assert!(!p.is_empty());
    }
}
