// THEORY:
// The `ids` module provides the two identity primitives every monitor relies on.
//
// 1.  **Event ids**: every published interval carries a fresh, globally unique id.
//     It is 128 random bits rendered as unpadded URL-safe base64, so it can be
//     used verbatim as an individual name by whatever writes the log.
// 2.  **Pair keys**: relationships between two entities (contact, support, grasp)
//     are matched and deduplicated through a single integer derived from both
//     object ids. The key must not depend on argument order, so the ids are
//     sorted before being fed through Szudzik's pairing function. For sorted
//     inputs `lo <= hi` the result `hi * hi + hi + lo` is unique per unordered
//     pair and always fits in a `u64` for `u32` inputs.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

/// Number of random bytes backing an event id (a GUID worth of entropy).
const EVENT_ID_BYTES: usize = 16;

/// Generates a fresh unique id for an event interval.
pub fn new_event_id() -> String {
    let mut bytes = [0u8; EVENT_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Symmetric pairing of two object ids.
///
/// `pair_key(a, b) == pair_key(b, a)` for every `a`, `b`, and two different
/// unordered pairs never share a key.
pub fn pair_key(a: u32, b: u32) -> u64 {
    let (lo, hi) = if a <= b { (a as u64, b as u64) } else { (b as u64, a as u64) };
    hi * hi + hi + lo
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn pair_key_is_order_independent() {
        let samples = [(0, 0), (0, 1), (1, 2), (7, 3), (42, 42), (u32::MAX, 5), (u32::MAX, u32::MAX)];
        for (a, b) in samples {
            assert_eq!(pair_key(a, b), pair_key(b, a), "pair ({a}, {b})");
        }
    }

    #[test]
    fn pair_key_is_unique_for_unordered_pairs() {
        let mut seen = HashSet::new();
        for a in 0..60u32 {
            for b in a..60u32 {
                assert!(seen.insert(pair_key(a, b)), "collision at ({a}, {b})");
            }
        }
    }

    #[test]
    fn pair_key_fits_at_the_top_of_the_range() {
        assert_eq!(pair_key(u32::MAX, u32::MAX), u64::MAX);
        assert_eq!(pair_key(u32::MAX, u32::MAX - 1), u64::MAX - 1);
        assert_eq!(pair_key(0, 0), 0);
    }

    #[test]
    fn event_ids_are_unique_and_url_safe() {
        let ids: HashSet<String> = (0..256).map(|_| new_event_id()).collect();
        assert_eq!(ids.len(), 256);
        for id in &ids {
            assert_eq!(id.len(), 22);
            assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        }
    }
}
