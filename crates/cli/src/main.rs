//! CLI tool for scraping forum threads into chat-format training data.
//!
//! Threads are fetched from an archive mirror (or read from saved HTML),
//! each leaf post is walked back through its quote chain, and the resulting
//! conversations are written as `{"messages": [...]}` JSONL.

mod fetch;

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use env_logger::Env;

use threadscrape_core::{
    crawl_index, parse_thread_document, process_all_dumps, truncate_chars, write_debug_dump,
    write_dump_output, write_jsonl, CrawlPlan, PageSource, PipelineResult, Role, Sample, ScrapeConfig,
    ThreadOutcome, DEFAULT_SYSTEM_PROMPT,
};

use crate::fetch::HttpSource;

/// Scrape quote-linked forum threads into chat JSONL.
#[derive(Parser, Debug)]
#[command(name = "threadscrape")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scrape a single thread and preview the result
    Thread(ThreadArgs),
    /// Walk the board's search index and append every thread's samples
    Crawl(CrawlArgs),
    /// Re-process saved HTML pages without touching the network
    Offline(OfflineArgs),
}

#[derive(Args, Debug)]
struct ThreadArgs {
    /// Numeric thread id
    #[arg(long, default_value = "108315156")]
    thread: String,

    /// Output JSONL path (default: training_data_test_<THREAD>.jsonl)
    #[arg(long)]
    out: Option<PathBuf>,

    /// Directory for the raw HTML dump
    #[arg(long, default_value = ".")]
    dump_dir: PathBuf,

    #[command(flatten)]
    source: SourceArgs,

    #[command(flatten)]
    tuning: TuningArgs,
}

#[derive(Args, Debug)]
struct CrawlArgs {
    /// Output JSONL path (appended to)
    #[arg(long, default_value = "training_data.jsonl")]
    out: PathBuf,

    /// Search index URL without the offset parameter (default: newest OPs on the board)
    #[arg(long)]
    index_url: Option<String>,

    /// Threads listed per index page
    #[arg(long, default_value = "24", value_parser = clap::value_parser!(u64).range(1..))]
    offset_step: u64,

    /// Stop after this many index pages
    #[arg(long)]
    max_pages: Option<usize>,

    /// Pause between thread fetches (milliseconds)
    #[arg(long, default_value = "1500")]
    thread_delay_ms: u64,

    /// Pause between index pages (milliseconds)
    #[arg(long, default_value = "3000")]
    page_delay_ms: u64,

    /// Save pages with no recognizable posts here
    #[arg(long)]
    dump_dir: Option<PathBuf>,

    #[command(flatten)]
    source: SourceArgs,

    #[command(flatten)]
    tuning: TuningArgs,
}

#[derive(Args, Debug)]
struct OfflineArgs {
    /// Root directory containing saved thread HTML
    #[arg(long)]
    html_root: PathBuf,

    /// Output directory for training.jsonl and metadata.json
    #[arg(long)]
    output_dir: PathBuf,

    #[command(flatten)]
    tuning: TuningArgs,
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Archive base URL
    #[arg(long, default_value = "https://warosu.org")]
    base_url: String,

    /// Board name
    #[arg(long, default_value = "vt")]
    board: String,

    /// HTTP timeout (seconds)
    #[arg(long, default_value = "15")]
    timeout_secs: u64,

    /// Pause after a 403/429 before retrying (seconds)
    #[arg(long, default_value = "60")]
    cooldown_secs: u64,

    /// Retries after a rate-limit response
    #[arg(long, default_value = "1")]
    rate_limit_retries: usize,
}

impl SourceArgs {
    fn http_source(&self) -> Result<HttpSource, reqwest::Error> {
        HttpSource::new(
            Duration::from_secs(self.timeout_secs),
            Duration::from_secs(self.cooldown_secs),
            self.rate_limit_retries,
        )
    }

    fn thread_url(&self, thread_id: &str) -> String {
        format!("{}/{}/thread/{}", self.base_url.trim_end_matches('/'), self.board, thread_id)
    }

    fn default_index_url(&self) -> String {
        format!(
            "{}/{}/?task=search2&ghost=false&search_op=op&search_del=dontcare&search_int=dontcare&search_ord=new&search_capcode=all&search_res=post",
            self.base_url.trim_end_matches('/'),
            self.board
        )
    }
}

#[derive(Args, Debug)]
struct TuningArgs {
    /// Max ancestors to include above each leaf post
    #[arg(long, default_value = "6")]
    max_depth: usize,

    /// Minimum context length (chars)
    #[arg(long, default_value = "40")]
    min_context_chars: usize,

    /// Minimum response length (chars)
    #[arg(long, default_value = "20")]
    min_response_chars: usize,

    /// Context size cap (chars)
    #[arg(long, default_value = "2400")]
    max_context_chars: usize,

    /// Response size cap (chars)
    #[arg(long, default_value = "1200")]
    max_response_chars: usize,

    /// Samples kept per distinct first user message within a thread
    #[arg(long, default_value = "2")]
    max_chains_per_first_user: usize,

    /// Custom system prompt (optional)
    #[arg(long)]
    system_prompt: Option<String>,
}

impl TuningArgs {
    fn to_config(&self) -> ScrapeConfig {
        ScrapeConfig {
            max_depth: self.max_depth,
            min_context_chars: self.min_context_chars,
            min_response_chars: self.min_response_chars,
            max_context_chars: self.max_context_chars,
            max_response_chars: self.max_response_chars,
            max_chains_per_first_user: self.max_chains_per_first_user,
            system_prompt: self
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Thread(args) => run_thread(args),
        Command::Crawl(args) => run_crawl(args),
        Command::Offline(args) => run_offline(args),
    }
}

fn run_thread(args: ThreadArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.tuning.to_config();
    config.validate()?;

    let thread_url = args.source.thread_url(&args.thread);
    let out_path = args
        .out
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("training_data_test_{}.jsonl", args.thread)));

    println!("Targeting thread: {}", args.thread);
    println!("URL: {}", thread_url);
    println!("Writing output to: {:?}\n", out_path);

    let source = args.source.http_source()?;
    let body = match source.fetch(&thread_url) {
        Ok(body) => body,
        Err(failure) => {
            println!("Could not fetch thread: {}", failure);
            return Ok(());
        }
    };

    // Always keep the raw page around in this mode
    let dump = write_debug_dump(&args.dump_dir, &thread_url, &body);
    let html = String::from_utf8_lossy(&body);

    let samples = match parse_thread_document(&html, &thread_url, &config) {
        ThreadOutcome::Samples { post_count, samples } => {
            println!("Parsed {} posts. Built {} examples.", post_count, samples.len());
            samples
        }
        ThreadOutcome::NoPosts { title, .. } => {
            println!("No posts parsed. Page title: {}", title.as_deref().unwrap_or("(no title)"));
            if let Some(path) = &dump {
                println!("Wrote raw HTML to: {:?}", path);
            }
            return Ok(());
        }
        ThreadOutcome::Unreachable(failure) => {
            println!("Could not fetch thread: {}", failure);
            return Ok(());
        }
    };

    if samples.is_empty() {
        println!("Zero examples after filtering. Try lowering thresholds, e.g.:");
        println!(
            "  threadscrape thread --thread {} --min-context-chars 20 --min-response-chars 10",
            args.thread
        );
        if let Some(path) = &dump {
            println!("Wrote raw HTML to: {:?}", path);
        }
        return Ok(());
    }

    let mut writer = BufWriter::new(File::create(&out_path)?);
    write_jsonl(&mut writer, &samples)?;
    writer.flush()?;

    println!("SUCCESS: Wrote {} leaf-chain examples.", samples.len());
    println!("First 3 examples preview:\n");
    for (i, sample) in samples.iter().take(3).enumerate() {
        print_preview(i + 1, sample);
    }
    println!("Open the JSONL output and sanity-check the contexts/responses before crawling.");

    Ok(())
}

fn print_preview(number: usize, sample: &Sample) {
    const PREVIEW_CHARS: usize = 400;
    let clip = |text: &str| {
        let clipped = truncate_chars(text, PREVIEW_CHARS);
        if clipped.len() < text.len() {
            format!("{}...", clipped)
        } else {
            clipped
        }
    };

    let messages = sample.messages();
    println!("--- Example {} ---", number);
    println!("SYSTEM:\n{}\n", messages[0].content);
    if let Some(user) = messages.iter().find(|m| m.role == Role::User) {
        println!("USER:\n{}\n", clip(&user.content));
    }
    if let Some(assistant) = messages.iter().find(|m| m.role == Role::Assistant) {
        println!("ASSISTANT:\n{}\n", clip(&assistant.content));
    }
}

fn run_crawl(args: CrawlArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.tuning.to_config();
    let source = args.source.http_source()?;
    let plan = CrawlPlan {
        index_url: args
            .index_url
            .clone()
            .unwrap_or_else(|| args.source.default_index_url()),
        base_url: args.source.base_url.clone(),
        board: args.source.board.clone(),
        offset_step: args.offset_step,
        max_pages: args.max_pages,
        thread_delay: Duration::from_millis(args.thread_delay_ms),
        page_delay: Duration::from_millis(args.page_delay_ms),
        dump_dir: args.dump_dir.clone(),
    };

    let mut writer = open_append(&args.out)?;
    let summary = crawl_index(&source, &plan, &config, &mut writer)?;
    writer.flush()?;

    println!("\n[summary]");
    println!("  Index pages: {}", summary.pages);
    println!("  Threads scraped: {}", summary.threads_seen);
    println!("  Threads with samples: {}", summary.threads_with_samples);
    println!("  Samples appended: {}", summary.samples_written);
    println!("  Output: {:?}", args.out);

    Ok(())
}

/// Open a JSONL file for appending, creating it if needed.
fn open_append(path: &Path) -> std::io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

fn run_offline(args: OfflineArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.tuning.to_config();

    println!("Processing HTML files from {:?}...", args.html_root);
    let results = process_all_dumps(&args.html_root, &config)?;
    println!("Processed {} pages", results.len());

    println!("Writing output to {:?}...", args.output_dir);
    let result: PipelineResult = write_dump_output(&results, &args.output_dir)?;

    let metadata_path = write_metadata(&args.html_root, &args.output_dir, &config, &result)?;

    println!("\n[summary]");
    println!("  Pages processed: {}", result.total_files);
    println!("  Pages with posts: {}", result.files_with_posts);
    println!("  Posts parsed: {}", result.total_posts);
    println!("  Samples: {}", result.total_samples);
    println!("  Total messages: {}", result.total_messages);
    println!("  Output: {:?}", args.output_dir.join("training.jsonl"));
    println!("  Metadata: {:?}", metadata_path);

    Ok(())
}

fn write_metadata(
    html_root: &Path,
    output_dir: &Path,
    config: &ScrapeConfig,
    result: &PipelineResult,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let metadata_path = output_dir.join("metadata.json");
    let metadata = serde_json::json!({
        "input": {
            "html_root": html_root.to_string_lossy(),
        },
        "config": config,
        "counts": result,
        "stats": {
            "avg_messages_per_sample": if result.total_samples > 0 {
                result.total_messages as f64 / result.total_samples as f64
            } else {
                0.0
            },
            "avg_chars_per_sample": if result.total_samples > 0 {
                result.total_chars as f64 / result.total_samples as f64
            } else {
                0.0
            },
            "avg_posts_per_page": if result.files_with_posts > 0 {
                result.total_posts as f64 / result.files_with_posts as f64
            } else {
                0.0
            },
        },
        "files": {
            "train_path": output_dir.join("training.jsonl").to_string_lossy(),
        },
    });
    std::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;
    Ok(metadata_path)
}
