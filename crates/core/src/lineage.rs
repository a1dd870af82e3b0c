//! Lineage reconstruction: from a leaf post back through its quoted ancestors.
//!
//! Each post gets a single parent, its first quote reference that resolves
//! inside the thread. Posts quoting several ancestors really sit in a reply
//! forest; following only the first link is a known approximation that keeps
//! each sample a linear dialogue.

use std::collections::HashSet;

use crate::extract::PostMapping;

/// Post ids of one lineage, oldest first.
pub type Chain = Vec<String>;

/// Walk parent links from `leaf_id` and return the lineage oldest first.
///
/// Stops at a post without a resolvable parent, at a post already visited
/// (quote cycles happen on malformed pages), or once `max_len` posts are
/// collected. An id missing from the mapping yields an empty chain.
pub fn walk_from_leaf(leaf_id: &str, posts: &PostMapping, max_len: usize) -> Chain {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut current = posts.get(leaf_id);

    while let Some(post) = current {
        if chain.len() >= max_len || !seen.insert(post.id.as_str()) {
            break;
        }
        chain.push(post.id.clone());
        current = posts.parent_of(post).and_then(|parent| posts.get(parent));
    }

    chain.reverse();
    chain
}

/// Drop the oldest posts until the chain's text fits `max_total_chars`.
///
/// Never trims below two posts, the minimum for one exchange; the leaf and
/// its closest context always survive.
pub fn trim_to_budget(chain: Chain, posts: &PostMapping, max_total_chars: usize) -> Chain {
    let mut total: usize = chain.iter().map(|id| posts.text_chars(id)).sum();
    if total <= max_total_chars {
        return chain;
    }

    let mut oldest = 0;
    while chain.len() - oldest > 2 && total > max_total_chars {
        total -= posts.text_chars(&chain[oldest]);
        oldest += 1;
    }
    chain.into_iter().skip(oldest).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Post;

    fn post(id: &str, text: &str, refs: &[&str]) -> Post {
        Post::new(id, text, refs.iter().map(|r| r.to_string()).collect())
    }

    fn linear_thread(n: usize) -> PostMapping {
        (0..n)
            .map(|i| {
                let id = format!("{}", 10001 + i);
                let refs: Vec<String> = if i == 0 {
                    vec![]
                } else {
                    vec![format!("{}", 10000 + i)]
                };
                Post::new(id, "x".repeat(10), refs)
            })
            .collect()
    }

    #[test]
    fn test_walk_oldest_first() {
        let posts = linear_thread(3);
        assert_eq!(walk_from_leaf("10003", &posts, 7), vec!["10001", "10002", "10003"]);
    }

    #[test]
    fn test_walk_respects_max_len() {
        let posts = linear_thread(10);
        let chain = walk_from_leaf("10010", &posts, 4);
        assert_eq!(chain, vec!["10007", "10008", "10009", "10010"]);
    }

    #[test]
    fn test_walk_follows_first_resolvable_reference() {
        let posts: PostMapping = vec![
            post("10001", "a", &[]),
            post("10002", "b", &[]),
            post("10003", "c", &["88888", "10002", "10001"]),
        ]
        .into_iter()
        .collect();
        assert_eq!(walk_from_leaf("10003", &posts, 7), vec!["10002", "10003"]);
    }

    #[test]
    fn test_walk_breaks_cycles() {
        let posts: PostMapping = vec![
            post("10001", "a", &["10003"]),
            post("10002", "b", &["10001"]),
            post("10003", "c", &["10002"]),
            post("10004", "d", &["10003"]),
        ]
        .into_iter()
        .collect();
        let chain = walk_from_leaf("10004", &posts, 100);
        assert_eq!(chain, vec!["10001", "10002", "10003", "10004"]);

        let unique: HashSet<&String> = chain.iter().collect();
        assert_eq!(unique.len(), chain.len());
    }

    #[test]
    fn test_walk_unknown_leaf() {
        assert!(walk_from_leaf("12345", &linear_thread(2), 7).is_empty());
    }

    #[test]
    fn test_chain_links_match_first_reference() {
        let posts: PostMapping = vec![
            post("10001", "a", &[]),
            post("10002", "b", &["10001"]),
            post("10003", "c", &["10002", "10001"]),
            post("10004", "d", &["77777", "10003", "10002"]),
        ]
        .into_iter()
        .collect();
        let chain = walk_from_leaf("10004", &posts, 7);
        for pair in chain.windows(2) {
            let child = posts.get(&pair[1]).unwrap();
            assert_eq!(posts.parent_of(child), Some(pair[0].as_str()));
        }
    }

    #[test]
    fn test_trim_within_budget_is_untouched() {
        let posts = linear_thread(4);
        let chain = walk_from_leaf("10004", &posts, 7);
        assert_eq!(trim_to_budget(chain.clone(), &posts, 40), chain);
    }

    #[test]
    fn test_trim_drops_oldest_first() {
        let posts = linear_thread(5);
        let chain = walk_from_leaf("10005", &posts, 7);
        assert_eq!(trim_to_budget(chain, &posts, 30), vec!["10003", "10004", "10005"]);
    }

    #[test]
    fn test_trim_never_below_two() {
        let posts = linear_thread(5);
        let chain = walk_from_leaf("10005", &posts, 7);
        assert_eq!(trim_to_budget(chain, &posts, 1), vec!["10004", "10005"]);

        let single = vec!["10001".to_string()];
        assert_eq!(trim_to_budget(single.clone(), &posts, 1), single);
    }

    #[test]
    fn test_trim_counts_chars_not_bytes() {
        let posts: PostMapping = vec![
            post("10001", "日本語", &[]),
            post("10002", "テスト", &["10001"]),
            post("10003", "です", &["10002"]),
        ]
        .into_iter()
        .collect();
        let chain = walk_from_leaf("10003", &posts, 7);
        assert_eq!(trim_to_budget(chain, &posts, 8).len(), 3);
    }
}
