//! Post extraction from parsed thread pages.
//!
//! Thread pages render each post as an element whose `id` is a letter plus the
//! post number (`<div id="p108258576">`), with the body inside a `blockquote`.
//! Older markup uses `<table class="post">`, and some mirrors only leave the
//! `blockquote` with an id somewhere above it, so extraction runs in up to
//! three passes and stops at the first one that yields posts.

use std::collections::HashMap;
use std::sync::LazyLock;

use log::debug;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::normalize::normalize_text;

static POST_NODE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z](\d{5,})$").unwrap());
static QUOTE_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{5,})").unwrap());

static ID_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("[id]").unwrap());
static BLOCKQUOTE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("blockquote").unwrap());
static POST_TABLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table.post").unwrap());
static ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());
static NAMED_ANCHOR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[name]").unwrap());

/// How many ancestors the fallback pass climbs looking for a post id.
const FALLBACK_ANCESTOR_HOPS: usize = 8;

/// A single post as it appeared in one thread snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: String,
    pub text: String,
    /// Quoted post ids in order of appearance. May point outside the thread.
    pub quote_ids: Vec<String>,
}

impl Post {
    pub fn new(id: impl Into<String>, text: impl Into<String>, quote_ids: Vec<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            quote_ids,
        }
    }
}

/// Posts of one thread keyed by id.
///
/// Posts live in an arena in first-seen order; ids map to arena handles.
/// Iteration follows document order so everything downstream is reproducible.
#[derive(Debug, Clone, Default)]
pub struct PostMapping {
    posts: Vec<Post>,
    index: HashMap<String, usize>,
}

impl PostMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a post. An existing id is overwritten in place and keeps its position.
    pub fn insert(&mut self, post: Post) {
        match self.index.get(&post.id) {
            Some(&handle) => self.posts[handle] = post,
            None => {
                self.index.insert(post.id.clone(), self.posts.len());
                self.posts.push(post);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Post> {
        self.index.get(id).map(|&handle| &self.posts[handle])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Character length of a post's text, 0 for unknown ids.
    pub fn text_chars(&self, id: &str) -> usize {
        self.get(id)
            .map(|post| crate::normalize::char_len(&post.text))
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    /// Posts in document order.
    pub fn iter(&self) -> impl Iterator<Item = &Post> {
        self.posts.iter()
    }

    /// The first quoted id of `post` that exists in this mapping.
    ///
    /// This is the single parent used for lineage: when a post quotes several
    /// others, only the first resolvable one counts.
    pub fn parent_of<'a>(&self, post: &'a Post) -> Option<&'a str> {
        post.quote_ids
            .iter()
            .map(String::as_str)
            .find(|qid| self.contains(qid))
    }
}

impl FromIterator<Post> for PostMapping {
    fn from_iter<I: IntoIterator<Item = Post>>(iter: I) -> Self {
        let mut mapping = PostMapping::new();
        for post in iter {
            mapping.insert(post);
        }
        mapping
    }
}

/// Extract all posts from a parsed thread page.
///
/// Returns an empty mapping when neither the primary nor the fallback pass
/// recognizes any post; the caller decides whether that warrants a dump.
pub fn extract_posts(document: &Html) -> PostMapping {
    let posts = extract_posts_primary(document);
    if !posts.is_empty() {
        return posts;
    }
    debug!("primary post extraction found nothing, falling back to blockquote scan");
    extract_posts_fallback(document)
}

/// Primary pass: `id="p123..."` post nodes, then legacy `table.post` markup.
pub(crate) fn extract_posts_primary(document: &Html) -> PostMapping {
    let mut posts = PostMapping::new();

    for node in document.select(&ID_SEL) {
        let Some(caps) = node.value().id().and_then(|raw| POST_NODE_ID_RE.captures(raw)) else {
            continue;
        };
        let Some(block) = node.select(&BLOCKQUOTE_SEL).next() else {
            continue;
        };
        if let Some(post) = post_from_block(&caps[1], Some(block)) {
            posts.insert(post);
        }
    }

    if posts.is_empty() {
        for table in document.select(&POST_TABLE_SEL) {
            let Some(pid) = post_id_from_table(table) else {
                continue;
            };
            let block = table.select(&BLOCKQUOTE_SEL).next();
            if let Some(post) = post_from_block(&pid, block) {
                posts.insert(post);
            }
        }
    }

    posts
}

/// Fallback pass: every `blockquote`, with the id inferred from nearby ancestors.
pub(crate) fn extract_posts_fallback(document: &Html) -> PostMapping {
    let mut posts = PostMapping::new();

    for block in document.select(&BLOCKQUOTE_SEL) {
        let Some(pid) = post_id_from_ancestors(block) else {
            continue;
        };
        if let Some(post) = post_from_block(&pid, Some(block)) {
            posts.insert(post);
        }
    }

    posts
}

fn post_from_block(pid: &str, block: Option<ElementRef<'_>>) -> Option<Post> {
    let quote_ids = block.map(extract_references).unwrap_or_default();
    let text = block.map(clean_post_text).unwrap_or_default();
    if text.is_empty() {
        return None;
    }
    Some(Post::new(pid, text, quote_ids))
}

fn post_id_from_table(table: ElementRef<'_>) -> Option<String> {
    let raw = table.value().id().unwrap_or("");
    if let Some(m) = QUOTE_ID_RE.find(raw) {
        return Some(m.as_str().to_string());
    }
    table
        .select(&NAMED_ANCHOR_SEL)
        .next()
        .and_then(named_anchor_id)
}

fn post_id_from_ancestors(block: ElementRef<'_>) -> Option<String> {
    for ancestor in block.ancestors().take(FALLBACK_ANCESTOR_HOPS) {
        // Reaching the document root ends the climb
        let element = ElementRef::wrap(ancestor)?;
        if let Some(m) = element.value().id().and_then(|raw| QUOTE_ID_RE.find(raw)) {
            return Some(m.as_str().to_string());
        }
        if let Some(pid) = element
            .select(&NAMED_ANCHOR_SEL)
            .next()
            .and_then(named_anchor_id)
        {
            return Some(pid);
        }
    }
    None
}

fn named_anchor_id(anchor: ElementRef<'_>) -> Option<String> {
    let name = anchor.value().attr("name")?;
    QUOTE_ID_RE.find(name).map(|m| m.as_str().to_string())
}

/// Extract quoted post ids from a post body, in order of appearance.
///
/// Two encodings are recognized: `href="#p123..."` links and anchors whose
/// visible text starts with `>>`. Duplicates are kept.
pub fn extract_references(block: ElementRef<'_>) -> Vec<String> {
    let mut ids = Vec::new();
    for anchor in block.select(&ANCHOR_SEL) {
        let href = anchor.value().attr("href").unwrap_or("").trim();
        if href.starts_with("#p") {
            if let Some(m) = QUOTE_ID_RE.find(href) {
                ids.push(m.as_str().to_string());
                continue;
            }
        }

        let text: String = anchor.text().collect();
        let text = text.trim();
        if text.starts_with(">>") {
            if let Some(m) = QUOTE_ID_RE.find(text) {
                ids.push(m.as_str().to_string());
            }
        }
    }
    ids
}

/// True for anchors rendered as quote links or back-links.
fn is_quote_anchor(element: ElementRef<'_>) -> bool {
    let value = element.value();
    if value.name() != "a" {
        return false;
    }
    let href = value.attr("href").unwrap_or("").trim();
    href.starts_with("#p")
        || value
            .classes()
            .any(|class| class == "quotelink" || class == "backlink")
}

/// Readable body text with quote links left out.
///
/// Text nodes are joined with newlines, so inline markup splits lines the same
/// way `<br>` does; normalization then trims and drops the blanks.
fn clean_post_text(block: ElementRef<'_>) -> String {
    let mut pieces: Vec<&str> = Vec::new();
    for node in block.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let inside_quote_link = node
            .ancestors()
            .take_while(|ancestor| *ancestor != *block)
            .filter_map(ElementRef::wrap)
            .any(is_quote_anchor);
        if !inside_quote_link {
            pieces.push(text);
        }
    }
    normalize_text(&pieces.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn block(html: &str) -> Html {
        Html::parse_fragment(html)
    }

    #[test]
    fn test_extract_references_both_encodings() {
        let doc = block(
            r##"<blockquote>
                <a href="#p10001" class="backlink">&gt;&gt;10001</a>
                <a href="/vt/thread/555#p10002">&gt;&gt;10002</a>
                <a href="#p10001">&gt;&gt;10001</a>
                <a href="https://example.com">not a quote 99999</a>
                <a href="#p12">&gt;&gt;12</a>
            </blockquote>"##,
        );
        let bq = doc.select(&BLOCKQUOTE_SEL).next().unwrap();
        assert_eq!(extract_references(bq), vec!["10001", "10002", "10001"]);
    }

    #[test]
    fn test_clean_post_text_drops_quote_links() {
        let doc = block(
            r##"<blockquote><a href="#p10001" class="quotelink">&gt;&gt;10001</a><br>no u<br><span class="quote">&gt;be me</span><br>check https://example.com/x</blockquote>"##,
        );
        let bq = doc.select(&BLOCKQUOTE_SEL).next().unwrap();
        assert_eq!(clean_post_text(bq), "no u\n>be me\ncheck");
    }

    #[test]
    fn test_primary_extraction() {
        let doc = Html::parse_document(
            r##"<html><body>
            <div class="comment" id="p10001"><blockquote>hello there friend</blockquote></div>
            <div class="comment reply" id="p10002"><blockquote><a href="#p10001">&gt;&gt;10001</a> no u</blockquote></div>
            <div id="p10003"><blockquote><a class="quotelink">&gt;&gt;10001</a></blockquote></div>
            <div id="header12345"><blockquote>ignored, id is not letter+digits</blockquote></div>
            </body></html>"##,
        );
        let posts = extract_posts(&doc);
        let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
        // 10003 has no body once its quote link is removed
        assert_eq!(ids, vec!["10001", "10002"]);
        assert_eq!(posts.get("10002").unwrap().text, "no u");
        assert_eq!(posts.get("10002").unwrap().quote_ids, vec!["10001"]);
    }

    #[test]
    fn test_legacy_table_extraction() {
        let doc = Html::parse_document(
            r##"<html><body>
            <table class="post" id="post-20001"><tr><td><blockquote>legacy one</blockquote></td></tr></table>
            <table class="post"><tr><td><a name="20002"></a><blockquote><a href="#p20001">&gt;&gt;20001</a> legacy two</blockquote></td></tr></table>
            </body></html>"##,
        );
        let posts = extract_posts_primary(&doc);
        assert_eq!(posts.len(), 2);
        assert_eq!(posts.get("20001").unwrap().text, "legacy one");
        assert_eq!(posts.get("20002").unwrap().quote_ids, vec!["20001"]);
    }

    #[test]
    fn test_fallback_extraction_climbs_ancestors() {
        let doc = Html::parse_document(
            r##"<html><body>
            <section data-x="1"><div class="wrap post-30001"><span><blockquote>deep body</blockquote></span></div></section>
            <article id="reply_30002"><div><div><blockquote><a href="#p30001">&gt;&gt;30001</a> answer</blockquote></div></div></article>
            <div><blockquote>orphan without id</blockquote></div>
            </body></html>"##,
        );
        assert!(extract_posts_primary(&doc).is_empty());
        let posts = extract_posts(&doc);
        let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["30002"]);
        assert_eq!(posts.get("30002").unwrap().text, "answer");
    }

    #[test]
    fn test_fallback_uses_named_anchor() {
        let doc = Html::parse_document(
            r##"<html><body><div><a name="40001"></a><blockquote>anchored</blockquote></div></body></html>"##,
        );
        let posts = extract_posts(&doc);
        assert_eq!(posts.get("40001").unwrap().text, "anchored");
    }

    #[test]
    fn test_empty_document_yields_empty_mapping() {
        let doc = Html::parse_document("<html><head><title>Just a moment...</title></head></html>");
        assert!(extract_posts(&doc).is_empty());
    }

    #[test]
    fn test_mapping_reinsert_keeps_position() {
        let mut posts = PostMapping::new();
        posts.insert(Post::new("10001", "a", vec![]));
        posts.insert(Post::new("10002", "b", vec![]));
        posts.insert(Post::new("10001", "c", vec![]));
        let texts: Vec<&str> = posts.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["c", "b"]);
        assert_eq!(posts.text_chars("10001"), 1);
        assert_eq!(posts.text_chars("missing"), 0);
    }

    #[test]
    fn test_parent_of_skips_dangling_refs() {
        let posts: PostMapping = vec![
            Post::new("10001", "root", vec![]),
            Post::new("10002", "child", vec!["99999".into(), "10001".into()]),
        ]
        .into_iter()
        .collect();
        let child = posts.get("10002").unwrap();
        assert_eq!(posts.parent_of(child), Some("10001"));
        assert_eq!(posts.parent_of(posts.get("10001").unwrap()), None);
    }
}
