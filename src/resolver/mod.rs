//! Chapter image resolution: fetch, direct match, de-obfuscation, and fallbacks.

pub mod api;
pub mod client;
pub mod decoder;
pub mod direct;
pub mod error;
pub mod fields;
pub mod headers;
pub mod hosts;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod stub;

pub use api::ApiResolver;
pub use client::{CancelFlag, Fetcher, FetcherBuilder, HttpTransport, ReqwestTransport};
pub use decoder::{Decoder, OffsetMode};
pub use direct::DirectMatcher;
pub use error::{ClientBuildError, ResolveError, Stage, StageFailure, TransportError};
pub use headers::{headers_for, ImageHeaders};
pub use hosts::HostAllowList;
pub use pipeline::{PageStrategy, Pipeline, Resolution};
