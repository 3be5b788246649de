//! qqcomic: resolve a Tencent Comic chapter into its ordered page image URLs, reversing
//! the page payload obfuscation when the list is not served in plaintext.

pub mod cli;
pub mod config;
pub mod model;
pub mod resolver;

// Re-exports for CLI and consumers.
pub use config::{load_config, Config, Settings};
pub use model::{ChapterRef, ImageList, ResolutionOutcome};
pub use resolver::{
    headers_for, CancelFlag, ClientBuildError, Fetcher, FetcherBuilder, HttpTransport,
    ImageHeaders, OffsetMode, Pipeline, Resolution, ResolveError, Stage,
};
