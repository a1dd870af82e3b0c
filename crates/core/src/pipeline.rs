//! Pipeline for turning thread pages into filtered samples.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use rayon::prelude::*;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use walkdir::WalkDir;

use crate::error::{ConfigError, ScrapeError};
use crate::extract::{extract_posts, PostMapping};
use crate::filter::filter_samples;
use crate::graph::ReplyIndex;
use crate::lineage::{trim_to_budget, walk_from_leaf};
use crate::normalize::char_len;
use crate::sample::{assemble_sample, Sample, ScrapeConfig};
use crate::{FetchFailure, PageSource};

static THREAD_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/thread/(\d+)").unwrap());
static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static LINK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// Page titles served by anti-bot interstitials instead of the thread.
const CHALLENGE_TITLES: &[&str] = &["Just a moment", "Cloudflare", "Attention Required"];

/// What happened to one thread.
#[derive(Debug)]
pub enum ThreadOutcome {
    /// The page could not be fetched. Not an error: the thread may be gone.
    Unreachable(FetchFailure),
    /// The page parsed but no post matched any extraction strategy.
    NoPosts {
        title: Option<String>,
        /// Where the raw page was saved for inspection, if it was.
        dump: Option<PathBuf>,
    },
    /// Posts were found; `samples` may still be empty after filtering.
    Samples {
        post_count: usize,
        samples: Vec<Sample>,
    },
}

impl ThreadOutcome {
    pub fn samples(&self) -> &[Sample] {
        match self {
            ThreadOutcome::Samples { samples, .. } => samples,
            _ => &[],
        }
    }

    pub fn into_samples(self) -> Vec<Sample> {
        match self {
            ThreadOutcome::Samples { samples, .. } => samples,
            _ => Vec::new(),
        }
    }
}

/// Build filtered samples from every leaf post of one thread.
///
/// Leaves whose own text is shorter than `min_response_chars` are skipped, as
/// are lineages with fewer than two posts. `thread_id` seeds the diversity
/// filter, so the same thread always yields the same selection.
pub fn build_leaf_chain_samples(thread_id: &str, posts: &PostMapping, config: &ScrapeConfig) -> Vec<Sample> {
    if posts.is_empty() {
        return Vec::new();
    }

    let replies = ReplyIndex::build(posts);
    let leaves = replies.leaf_ids(posts);
    let mut samples = Vec::new();

    for leaf_id in &leaves {
        if posts.get(leaf_id).map_or(0, |p| char_len(p.text.trim())) < config.min_response_chars {
            continue;
        }

        let chain = walk_from_leaf(leaf_id, posts, config.max_chain_len());
        if chain.len() < 2 {
            continue;
        }
        let chain = trim_to_budget(chain, posts, config.chain_char_budget());
        if chain.len() < 2 {
            continue;
        }

        if let Some(sample) = assemble_sample(&chain, posts, config) {
            samples.push(sample);
        }
    }

    let candidates = samples.len();
    let samples = filter_samples(samples, thread_id, config.max_chains_per_first_user);
    debug!(
        "{}: {} posts, {} leaves, {} candidates, {} kept",
        thread_id,
        posts.len(),
        leaves.len(),
        candidates,
        samples.len()
    );
    samples
}

/// Run extraction and sample building over an already fetched page.
pub fn parse_thread_document(html: &str, thread_id: &str, config: &ScrapeConfig) -> ThreadOutcome {
    let document = Html::parse_document(html);
    let posts = extract_posts(&document);
    if posts.is_empty() {
        return ThreadOutcome::NoPosts {
            title: page_title(&document),
            dump: None,
        };
    }
    ThreadOutcome::Samples {
        post_count: posts.len(),
        samples: build_leaf_chain_samples(thread_id, &posts, config),
    }
}

/// Fetch and process one thread.
///
/// When no posts are found and `dump_dir` is set, the raw page is written to
/// `debug_dump_thread_<id>.html` there. Dump failures are logged, never fatal.
pub fn scrape_thread<S>(source: &S, url: &str, config: &ScrapeConfig, dump_dir: Option<&Path>) -> ThreadOutcome
where
    S: PageSource + ?Sized,
{
    let body = match source.fetch(url) {
        Ok(body) => body,
        Err(failure) => {
            warn!("Could not fetch {}: {}", url, failure);
            return ThreadOutcome::Unreachable(failure);
        }
    };

    let html = String::from_utf8_lossy(&body);
    match parse_thread_document(&html, url, config) {
        ThreadOutcome::NoPosts { title, .. } => {
            let shown_title = title.as_deref().unwrap_or("(no title)");
            if title.as_deref().is_some_and(looks_like_challenge) {
                warn!("{} served an anti-bot challenge page (title: {})", url, shown_title);
            } else {
                warn!("No posts parsed from {} (title: {})", url, shown_title);
            }
            let dump = dump_dir.and_then(|dir| write_debug_dump(dir, url, &body));
            ThreadOutcome::NoPosts { title, dump }
        }
        outcome => outcome,
    }
}

/// Save a raw page as `debug_dump_thread_<id>.html` under `dir`.
pub fn write_debug_dump(dir: &Path, url: &str, body: &[u8]) -> Option<PathBuf> {
    let tid = thread_id_from_url(url).unwrap_or("unknown");
    let path = dir.join(format!("debug_dump_thread_{}.html", tid));
    match std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, body)) {
        Ok(()) => {
            info!("Wrote debug HTML to {:?}", path);
            Some(path)
        }
        Err(e) => {
            warn!("Failed to write debug HTML to {:?}: {}", path, e);
            None
        }
    }
}

/// Numeric thread id from a `.../thread/<digits>` URL.
pub fn thread_id_from_url(url: &str) -> Option<&str> {
    THREAD_ID_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// True when a page title belongs to a bot-check interstitial.
pub fn looks_like_challenge(title: &str) -> bool {
    CHALLENGE_TITLES.iter().any(|marker| title.contains(marker))
}

fn page_title(document: &Html) -> Option<String> {
    document
        .select(&TITLE_SEL)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Thread links on an index/search page, absolute, sorted and deduplicated.
pub fn extract_thread_links(index_html: &str, base_url: &str, board: &str) -> Vec<String> {
    let document = Html::parse_document(index_html);
    let marker = format!("/{}/thread/", board);
    let base = base_url.trim_end_matches('/');

    let links: BTreeSet<String> = document
        .select(&LINK_SEL)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| href.contains(&marker))
        .map(|href| {
            if href.starts_with('/') {
                format!("{}{}", base, href)
            } else {
                href.to_string()
            }
        })
        .collect();
    links.into_iter().collect()
}

/// Write samples as JSON lines. Returns the number of lines written.
pub fn write_jsonl<W: Write>(writer: &mut W, samples: &[Sample]) -> Result<usize, ScrapeError> {
    for sample in samples {
        serde_json::to_writer(&mut *writer, sample)?;
        writer.write_all(b"\n")?;
    }
    Ok(samples.len())
}

/// How to page through a board's search index.
#[derive(Debug, Clone)]
pub struct CrawlPlan {
    /// Index URL without the offset parameter; `&offset=N` is appended.
    pub index_url: String,
    pub base_url: String,
    pub board: String,
    pub offset_step: u64,
    /// Stop after this many index pages were fetched.
    pub max_pages: Option<usize>,
    pub thread_delay: Duration,
    pub page_delay: Duration,
    pub dump_dir: Option<PathBuf>,
}

/// Totals over a crawl.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    pub pages: usize,
    pub threads_seen: usize,
    pub threads_with_samples: usize,
    pub samples_written: usize,
}

/// Walk the search index page by page, scraping every linked thread and
/// appending its samples to `writer`.
///
/// The crawl ends when an index page cannot be fetched, when a page lists no
/// threads, or after `max_pages` pages. The writer is flushed after every
/// thread so an interrupted crawl keeps what it already wrote.
pub fn crawl_index<S, W>(
    source: &S,
    plan: &CrawlPlan,
    config: &ScrapeConfig,
    writer: &mut W,
) -> Result<CrawlSummary, ScrapeError>
where
    S: PageSource + ?Sized,
    W: Write,
{
    config.validate()?;
    if plan.offset_step == 0 {
        return Err(ConfigError::ZeroOffsetStep.into());
    }

    let mut summary = CrawlSummary::default();
    let mut offset: u64 = 0;

    loop {
        if plan.max_pages.is_some_and(|max| summary.pages >= max) {
            info!("Reached max pages ({})", summary.pages);
            break;
        }

        info!("Index page offset: {}", offset);
        let page_url = format!("{}&offset={}", plan.index_url, offset);
        let index_html = match source.fetch(&page_url) {
            Ok(body) => String::from_utf8_lossy(&body).into_owned(),
            Err(failure) => {
                warn!("Stopping crawl, index page unavailable: {}", failure);
                break;
            }
        };
        summary.pages += 1;

        let thread_links = extract_thread_links(&index_html, &plan.base_url, &plan.board);
        if thread_links.is_empty() {
            info!("No more threads found on index.");
            break;
        }
        info!("Found {} threads. Scraping...", thread_links.len());

        for thread_url in &thread_links {
            let outcome = scrape_thread(source, thread_url, config, plan.dump_dir.as_deref());
            summary.threads_seen += 1;
            let samples = outcome.samples();
            if !samples.is_empty() {
                summary.samples_written += write_jsonl(writer, samples)?;
                summary.threads_with_samples += 1;
            }
            writer.flush()?;
            thread::sleep(plan.thread_delay);
        }

        offset += plan.offset_step;
        thread::sleep(plan.page_delay);
    }

    Ok(summary)
}

/// Result of processing a single saved page.
#[derive(Debug)]
pub struct DumpResult {
    pub source_path: String,
    pub post_count: usize,
    pub samples: Vec<Sample>,
}

/// Totals over an offline run.
#[derive(Debug, Default, Serialize)]
pub struct PipelineResult {
    pub total_files: usize,
    pub files_with_posts: usize,
    pub total_posts: usize,
    pub total_samples: usize,
    pub total_messages: usize,
    pub total_chars: usize,
}

/// Discover all saved HTML pages in a directory.
pub fn discover_html_files(root: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .is_some_and(|ext| ext == "html" || ext == "htm")
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    paths.sort();
    paths
}

/// Process all saved HTML pages in a directory in parallel.
///
/// Each page is handled on its own; the path relative to `html_root` is the
/// thread identifier for seeding. Results keep the sorted file order.
pub fn process_all_dumps(html_root: &Path, config: &ScrapeConfig) -> Result<Vec<DumpResult>, ScrapeError> {
    config.validate()?;
    let html_files = discover_html_files(html_root);

    if html_files.is_empty() {
        return Err(ScrapeError::NoInput(html_root.to_string_lossy().to_string()));
    }

    let total_files = html_files.len();
    let processed_count = AtomicUsize::new(0);
    let error_count = AtomicUsize::new(0);

    let results: Vec<DumpResult> = html_files
        .into_par_iter()
        .filter_map(|path| {
            let read = std::fs::read(&path);
            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 100 == 0 || count == total_files {
                info!("Processed {}/{} pages...", count, total_files);
            }

            let body = match read {
                Ok(body) => body,
                Err(e) => {
                    error_count.fetch_add(1, Ordering::Relaxed);
                    warn!("Error reading {:?}: {}", path, e);
                    return None;
                }
            };

            let thread_id = path
                .strip_prefix(html_root)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();
            let html = String::from_utf8_lossy(&body);
            let (post_count, samples) = match parse_thread_document(&html, &thread_id, config) {
                ThreadOutcome::Samples { post_count, samples } => (post_count, samples),
                _ => {
                    debug!("No posts parsed from {:?}", path);
                    (0, Vec::new())
                }
            };
            Some(DumpResult {
                source_path: path.to_string_lossy().to_string(),
                post_count,
                samples,
            })
        })
        .collect();

    let errors = error_count.load(Ordering::Relaxed);
    if errors > 0 {
        warn!("{} pages could not be read", errors);
    }

    Ok(results)
}

/// Write every sample from an offline run to `training.jsonl` in `output_dir`.
pub fn write_dump_output(results: &[DumpResult], output_dir: &Path) -> Result<PipelineResult, ScrapeError> {
    std::fs::create_dir_all(output_dir)?;
    let mut writer = BufWriter::new(File::create(output_dir.join("training.jsonl"))?);

    let mut summary = PipelineResult {
        total_files: results.len(),
        ..Default::default()
    };
    for result in results {
        if result.post_count > 0 {
            summary.files_with_posts += 1;
        }
        summary.total_posts += result.post_count;
        summary.total_samples += write_jsonl(&mut writer, &result.samples)?;
        for sample in &result.samples {
            summary.total_messages += sample.messages().len();
            summary.total_chars += sample.char_count();
        }
    }
    writer.flush()?;

    Ok(summary)
}
