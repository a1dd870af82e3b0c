//! Reply graph derived from quote references.

use std::collections::{BTreeSet, HashMap};

use crate::extract::PostMapping;

/// For each quoted post, the set of in-thread posts that quote it.
#[derive(Debug, Clone, Default)]
pub struct ReplyIndex {
    replies: HashMap<String, BTreeSet<String>>,
}

impl ReplyIndex {
    /// Build the index. References to posts outside the mapping are dropped.
    pub fn build(posts: &PostMapping) -> Self {
        let mut replies: HashMap<String, BTreeSet<String>> = HashMap::new();
        for child in posts.iter() {
            for qid in &child.quote_ids {
                if posts.contains(qid) {
                    replies
                        .entry(qid.clone())
                        .or_default()
                        .insert(child.id.clone());
                }
            }
        }
        Self { replies }
    }

    /// A leaf is a post nobody in the thread quotes.
    pub fn is_leaf(&self, id: &str) -> bool {
        self.replies.get(id).map_or(true, BTreeSet::is_empty)
    }

    /// Ids of the posts quoting `id`, in sorted order.
    pub fn replies_to(&self, id: &str) -> impl Iterator<Item = &str> {
        self.replies
            .get(id)
            .into_iter()
            .flat_map(|children| children.iter().map(String::as_str))
    }

    /// Leaf ids in document order.
    pub fn leaf_ids<'a>(&self, posts: &'a PostMapping) -> Vec<&'a str> {
        posts
            .iter()
            .map(|post| post.id.as_str())
            .filter(|id| self.is_leaf(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Post;

    fn mapping(posts: &[(&str, &[&str])]) -> PostMapping {
        posts
            .iter()
            .map(|(id, refs)| {
                Post::new(*id, format!("post {}", id), refs.iter().map(|r| r.to_string()).collect())
            })
            .collect()
    }

    #[test]
    fn test_reply_index_ignores_dangling_refs() {
        let posts = mapping(&[
            ("10001", &[]),
            ("10002", &["10001", "99999"]),
            ("10003", &["10001"]),
        ]);
        let index = ReplyIndex::build(&posts);
        assert_eq!(index.replies_to("10001").collect::<Vec<_>>(), vec!["10002", "10003"]);
        assert_eq!(index.replies_to("99999").count(), 0);
        assert_eq!(index.leaf_ids(&posts), vec!["10002", "10003"]);
    }

    #[test]
    fn test_leaf_iff_unquoted() {
        let posts = mapping(&[
            ("10001", &["10004"]),
            ("10002", &["10001", "10001"]),
            ("10003", &["10002", "10001"]),
            ("10004", &["10003"]),
            ("10005", &["10005"]),
            ("10006", &["55555"]),
        ]);
        let index = ReplyIndex::build(&posts);
        for post in posts.iter() {
            let quoted = posts
                .iter()
                .any(|other| other.quote_ids.iter().any(|q| q == &post.id));
            assert_eq!(index.is_leaf(&post.id), !quoted, "post {}", post.id);
        }
        // Self-quotes count as being quoted
        assert!(!index.is_leaf("10005"));
        assert_eq!(index.leaf_ids(&posts), vec!["10006"]);
    }
}
