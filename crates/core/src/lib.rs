//! Core logic for turning quote-linked forum threads into chat training data.
//!
//! This crate provides the pieces that take a thread page's HTML, recover the
//! reply graph from `>>123`-style quote links, walk each leaf post back through
//! its ancestors, and emit `{"messages": [...]}` samples suitable for
//! fine-tuning chat models.

/// Why a page could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// The source asked us to slow down (403/429). Callers should pause before retrying.
    RateLimited,
    /// Any other non-success HTTP status.
    Status(u16),
    /// The request never produced a response.
    Transport(String),
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchFailure::RateLimited => write!(f, "rate limited"),
            FetchFailure::Status(code) => write!(f, "HTTP error {}", code),
            FetchFailure::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

/// Trait for fetching raw page bytes.
///
/// Implementors own all network policy (headers, timeouts, cooldowns).
/// The core only distinguishes "got a body" from the kinds of failure.
pub trait PageSource {
    /// Fetch the page at `url`, returning the raw response body.
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchFailure>;
}

// Blanket implementation for references to PageSources
impl<T: PageSource + ?Sized> PageSource for &T {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchFailure> {
        (*self).fetch(url)
    }
}

mod error;
mod extract;
mod filter;
mod graph;
mod lineage;
mod normalize;
pub mod pipeline;
mod sample;

pub use error::{ConfigError, SampleError, ScrapeError};
pub use extract::{extract_posts, extract_references, Post, PostMapping};
pub use filter::{dedupe_samples, diversity_filter, filter_samples, thread_seed};
pub use graph::ReplyIndex;
pub use lineage::{trim_to_budget, walk_from_leaf, Chain};
pub use normalize::{normalize_text, truncate_chars};
pub use pipeline::{
    build_leaf_chain_samples, crawl_index, discover_html_files, extract_thread_links, looks_like_challenge,
    parse_thread_document, process_all_dumps, scrape_thread, thread_id_from_url,
    write_debug_dump, write_dump_output, write_jsonl, CrawlPlan, CrawlSummary, DumpResult, PipelineResult,
    ThreadOutcome,
};
pub use sample::{assemble_sample, ChatMessage, Role, Sample, ScrapeConfig};

/// Default number of ancestors walked above a leaf.
pub const MAX_CONTEXT_DEPTH: usize = 6;

/// Default minimum characters across the context turns of a sample.
pub const MIN_CONTEXT_CHARS: usize = 40;

/// Default minimum characters for a leaf post to seed a sample.
pub const MIN_RESPONSE_CHARS: usize = 20;

/// Default hard cap on context characters.
pub const MAX_CONTEXT_CHARS: usize = 2400;

/// Default hard cap on the final response (long copypastas otherwise dominate).
pub const MAX_RESPONSE_CHARS: usize = 1200;

/// Default number of samples kept per distinct opening user message in a thread.
pub const MAX_CHAINS_PER_FIRST_USER: usize = 2;

/// System prompt placed at the start of every sample unless overridden.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a toxic /vt/ user.";
