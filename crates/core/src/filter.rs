//! Per-thread deduplication and diversity filtering.

use std::collections::{BTreeMap, HashMap, HashSet};

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};

use crate::sample::Sample;

/// Stable RNG seed for a thread: the low 64 bits of SHA-256 over its identifier.
///
/// Seeding from the thread instead of entropy keeps the "random" diversity
/// selection identical across runs.
pub fn thread_seed(thread_id: &str) -> u64 {
    let digest = Sha256::digest(thread_id.as_bytes());
    let mut low = [0u8; 8];
    low.copy_from_slice(&digest[24..]);
    u64::from_be_bytes(low)
}

/// SHA-256 over the canonical JSON of a sample's messages (keys sorted).
fn fingerprint(sample: &Sample) -> [u8; 32] {
    let canonical: Vec<BTreeMap<&str, &str>> = sample
        .messages()
        .iter()
        .map(|m| BTreeMap::from([("content", m.content.as_str()), ("role", m.role.as_str())]))
        .collect();
    // Serializing string maps cannot fail
    let json = serde_json::to_string(&canonical).unwrap_or_default();
    Sha256::digest(json.as_bytes()).into()
}

/// Drop samples whose full message list repeats an earlier one.
///
/// Distinct posts often produce identical text-only chains (copypasta, bumps).
pub fn dedupe_samples(samples: Vec<Sample>) -> Vec<Sample> {
    let mut seen = HashSet::new();
    samples
        .into_iter()
        .filter(|sample| seen.insert(fingerprint(sample)))
        .collect()
}

/// Keep at most `cap` samples per distinct opening user message.
///
/// Over-full groups keep a random subset (in original order) drawn from an
/// RNG seeded by [`thread_seed`]. A `cap` of 0 drops everything.
pub fn diversity_filter(samples: Vec<Sample>, thread_id: &str, cap: usize) -> Vec<Sample> {
    if cap == 0 {
        return Vec::new();
    }

    let mut rng = ChaCha20Rng::seed_from_u64(thread_seed(thread_id));

    let mut groups: Vec<Vec<Sample>> = Vec::new();
    let mut group_of: HashMap<String, usize> = HashMap::new();
    for sample in samples {
        let key = sample.first_user_content().to_string();
        let slot = *group_of.entry(key).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(sample);
    }

    let mut filtered = Vec::new();
    for group in groups {
        if group.len() <= cap {
            filtered.extend(group);
            continue;
        }
        let keep: HashSet<usize> = rand::seq::index::sample(&mut rng, group.len(), cap)
            .into_iter()
            .collect();
        filtered.extend(
            group
                .into_iter()
                .enumerate()
                .filter(|(i, _)| keep.contains(i))
                .map(|(_, sample)| sample),
        );
    }
    filtered
}

/// Full per-thread filter: exact dedupe, diversity cap, then dedupe again.
///
/// Deduping first keeps identical samples from eating a group's budget.
pub fn filter_samples(samples: Vec<Sample>, thread_id: &str, cap: usize) -> Vec<Sample> {
    let samples = dedupe_samples(samples);
    let samples = diversity_filter(samples, thread_id, cap);
    dedupe_samples(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::ChatMessage;

    fn sample(first_user: &str, reply: &str) -> Sample {
        Sample::from_messages(vec![
            ChatMessage::system("sys"),
            ChatMessage::user(first_user),
            ChatMessage::assistant(reply),
        ])
        .unwrap()
    }

    fn fanout(first_user: &str, n: usize) -> Vec<Sample> {
        (0..n).map(|i| sample(first_user, &format!("reply {}", i))).collect()
    }

    #[test]
    fn test_thread_seed_is_stable() {
        assert_eq!(thread_seed("https://warosu.org/vt/thread/1"), thread_seed("https://warosu.org/vt/thread/1"));
        assert_ne!(thread_seed("https://warosu.org/vt/thread/1"), thread_seed("https://warosu.org/vt/thread/2"));
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let samples = vec![sample("a", "b"), sample("a", "c"), sample("a", "b")];
        let deduped = dedupe_samples(samples);
        assert_eq!(deduped, vec![sample("a", "b"), sample("a", "c")]);
    }

    #[test]
    fn test_dedupe_is_order_sensitive() {
        let forward = Sample::from_messages(vec![
            ChatMessage::system("s"),
            ChatMessage::user("x"),
            ChatMessage::assistant("y"),
            ChatMessage::user("z"),
            ChatMessage::assistant("w"),
        ])
        .unwrap();
        let swapped = Sample::from_messages(vec![
            ChatMessage::system("s"),
            ChatMessage::user("z"),
            ChatMessage::assistant("w"),
            ChatMessage::user("x"),
            ChatMessage::assistant("y"),
        ])
        .unwrap();
        assert_eq!(dedupe_samples(vec![forward, swapped]).len(), 2);
    }

    #[test]
    fn test_diversity_cap_enforced() {
        let mut samples = fanout("same opener", 7);
        samples.extend(fanout("other opener", 2));
        samples.push(sample("third", "only one"));

        let filtered = diversity_filter(samples, "thread-1", 2);
        let count = |opener: &str| filtered.iter().filter(|s| s.first_user_content() == opener).count();
        assert_eq!(count("same opener"), 2);
        assert_eq!(count("other opener"), 2);
        assert_eq!(count("third"), 1);
    }

    #[test]
    fn test_diversity_keeps_original_order_within_group() {
        let samples = fanout("op", 10);
        let filtered = diversity_filter(samples.clone(), "thread-order", 4);
        let positions: Vec<usize> = filtered
            .iter()
            .map(|kept| samples.iter().position(|s| s == kept).unwrap())
            .collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn test_diversity_is_deterministic() {
        let samples = fanout("op", 20);
        let first = diversity_filter(samples.clone(), "https://warosu.org/vt/thread/42", 3);
        let second = diversity_filter(samples, "https://warosu.org/vt/thread/42", 3);
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_cap_drops_everything() {
        assert!(diversity_filter(fanout("op", 3), "t", 0).is_empty());
    }

    #[test]
    fn test_filter_samples_dedupes_before_capping() {
        let mut samples = vec![sample("op", "dup"); 5];
        samples.push(sample("op", "unique"));
        let filtered = filter_samples(samples, "thread-dupes", 2);
        assert_eq!(filtered, vec![sample("op", "dup"), sample("op", "unique")]);
    }
}
