//! CLI parsing and orchestration. Parses args, resolves one chapter, prints the image list
//! as text or JSON. Maps errors to exit codes.

use crate::config::{self, Config, Settings};
use crate::model::ChapterRef;
use crate::resolver::decoder::OffsetMode;
use crate::resolver::error::{ResolveError, Stage};
use crate::resolver::headers::ImageHeaders;
use crate::resolver::pipeline::Resolution;
use clap::Parser;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Resolve(#[from] ResolveError),

    #[error("Cannot write output to {target}: {source}")]
    Output {
        target: String,
        #[source]
        source: std::io::Error,
    },
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Resolve(_) => 2,
            CliRunError::Output { .. } => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "qqcomic")]
#[command(about = "Resolve the ordered page image URLs of a Tencent Comic chapter")]
#[command(
    after_help = "Config file keys (user_agent, timeout_secs, retry_count, retry_base_delay_ms, offset_mode, strip_every, image_hosts, api_endpoints, use_api) are read from ./qqcomic.toml or <config dir>/qqcomic/config.toml. CLI flags override config. Set QQCOMIC_LOG to control log output."
)]
pub struct Args {
    /// Comic id, e.g. 505430.
    pub comic_id: String,

    /// Chapter id, or a full chapter page URL.
    pub chapter: String,

    /// Output format: text (one URL per line) or json.
    #[arg(long, default_value = "text", value_parser = parse_format)]
    pub format: OutputFormat,

    /// Write output to this file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Include the Referer and User-Agent each image request must send.
    #[arg(long)]
    pub headers: bool,

    /// Positional offset formula tried first: modulo or byte_mask (overrides config).
    #[arg(long, value_parser = parse_offset_mode)]
    pub offset_mode: Option<OffsetMode>,

    /// Skip the structured API endpoints and go straight to the chapter page.
    #[arg(long)]
    pub no_api: bool,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Request timeout in seconds (overrides config; default 30).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Attempts per request (overrides config; default 3).
    #[arg(long)]
    pub retries: Option<u32>,

    /// Suppress progress output (errors only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Debug logging and the full error chain.
    #[arg(long)]
    pub verbose: bool,
}

impl Args {
    /// Flags that override config file keys, as a config layer.
    fn overrides(&self) -> Config {
        Config {
            user_agent: self.user_agent.clone(),
            timeout_secs: self.timeout,
            retry_count: self.retries,
            offset_mode: self.offset_mode,
            use_api: if self.no_api { Some(false) } else { None },
            ..Config::default()
        }
    }
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    match s.to_lowercase().as_str() {
        "text" | "txt" => Ok(OutputFormat::Text),
        "json" => Ok(OutputFormat::Json),
        _ => Err(format!(
            "Invalid --format value: '{}'. Use text or json.",
            s
        )),
    }
}

fn parse_offset_mode(s: &str) -> Result<OffsetMode, String> {
    match s.to_lowercase().replace('-', "_").as_str() {
        "modulo" => Ok(OffsetMode::Modulo),
        "byte_mask" => Ok(OffsetMode::ByteMask),
        _ => Err(format!(
            "Invalid --offset-mode value: '{}'. Use modulo or byte_mask.",
            s
        )),
    }
}

/// Ensure output path parent exists.
fn validate_output_path(path: &Path) -> Result<(), CliRunError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(CliRunError::InvalidInput(format!(
                "Cannot write output: {}: parent directory does not exist.",
                path.display()
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ImageEntry {
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    headers: Option<ImageHeaders>,
}

/// Printed result of one resolution.
#[derive(Debug, Serialize)]
struct Report {
    comic_id: String,
    chapter_id: String,
    stage: &'static str,
    images: Vec<ImageEntry>,
}

fn build_report(
    chapter: &ChapterRef,
    resolution: Resolution,
    headers: Option<&dyn Fn(&str) -> ImageHeaders>,
) -> Report {
    let images = resolution
        .images
        .into_iter()
        .map(|url| ImageEntry {
            headers: headers.map(|h| h(&url)),
            url,
        })
        .collect();
    Report {
        comic_id: chapter.comic_id.clone(),
        chapter_id: chapter.chapter_id.clone(),
        stage: resolution.stage.as_str(),
        images,
    }
}

fn render_text(report: &Report) -> String {
    let mut out = String::new();
    for image in &report.images {
        out.push_str(&image.url);
        out.push('\n');
        if let Some(h) = &image.headers {
            out.push_str(&format!("  Referer: {}\n", h.referer));
            out.push_str(&format!("  User-Agent: {}\n", h.user_agent));
        }
    }
    out
}

fn render_json(report: &Report) -> Result<String, serde_json::Error> {
    let mut s = serde_json::to_string_pretty(report)?;
    s.push('\n');
    Ok(s)
}

fn stage_message(stage: Stage) -> &'static str {
    match stage {
        Stage::Init => "Starting",
        Stage::TryApi => "Trying API endpoints",
        Stage::TryFetch => "Fetching chapter page",
        Stage::TryDirectMatch => "Scanning page for image list",
        Stage::TryDecode => "Decoding obfuscated page data",
        Stage::TryLastResort => "Scanning page for any image URL",
        Stage::Done => "Done",
    }
}

fn spinner() -> indicatif::ProgressBar {
    let bar = indicatif::ProgressBar::new_spinner();
    if let Ok(style) = indicatif::ProgressStyle::default_spinner()
        .template("{spinner} {msg} ({elapsed})")
    {
        bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
    }
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let chapter = ChapterRef::new(args.comic_id.trim(), args.chapter.trim());
    if let Some(path) = &args.output {
        validate_output_path(path)?;
    }

    let file_config = config::load_config().map_err(CliRunError::InvalidInput)?;
    let merged = args.overrides().overlay(file_config.unwrap_or_default());
    let settings = Settings::from_config(&merged).map_err(CliRunError::InvalidInput)?;
    tracing::debug!(?settings, "effective settings");

    let fetcher = settings
        .fetcher(None)
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;
    let pipeline = settings.pipeline(fetcher);

    let progress = if args.quiet { None } else { Some(spinner()) };
    let on_stage = |stage: Stage| {
        if let Some(pb) = &progress {
            pb.set_message(stage_message(stage));
        }
    };
    let callback: Option<&dyn Fn(Stage)> = Some(&on_stage);
    let result = pipeline.resolve_with(&chapter, callback);
    if let Some(pb) = &progress {
        pb.disable_steady_tick();
        pb.finish_and_clear();
    }
    let resolution = result.map_err(|e| match e {
        ResolveError::InvalidUrl { input, reason } => CliRunError::InvalidInput(format!(
            "Expected a comic id and a chapter id or chapter URL. Invalid: '{}': {}",
            input, reason
        )),
        other => CliRunError::Resolve(other),
    })?;

    let stage = resolution.stage;
    let count = resolution.images.len();
    let headers_for = |url: &str| pipeline.headers_for(url, &chapter.comic_id, &chapter.chapter_id);
    let headers: Option<&dyn Fn(&str) -> ImageHeaders> = if args.headers {
        Some(&headers_for)
    } else {
        None
    };
    let report = build_report(&chapter, resolution, headers);
    let rendered = match args.format {
        OutputFormat::Text => render_text(&report),
        OutputFormat::Json => render_json(&report).map_err(|e| CliRunError::Output {
            target: "json".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?,
    };

    match &args.output {
        Some(path) => {
            std::fs::write(path, rendered).map_err(|e| CliRunError::Output {
                target: path.display().to_string(),
                source: e,
            })?;
            if !args.quiet {
                eprintln!(
                    "Wrote {} image URL(s) ({}) to {}",
                    count,
                    stage,
                    path.display()
                );
            }
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            lock.write_all(rendered.as_bytes())
                .and_then(|_| lock.flush())
                .map_err(|e| CliRunError::Output {
                    target: "stdout".to_string(),
                    source: e,
                })?;
        }
    }
    Ok(())
}
