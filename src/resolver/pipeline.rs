//! Orchestrates one chapter resolution: API endpoints first, then a single page fetch
//! followed by the page strategies in order. The first non-empty, allow-listed image
//! list wins; every stage's failure is kept for the terminal error.

use crate::model::{ChapterRef, ImageList, ResolutionOutcome};
use crate::resolver::api::{ApiResolver, DEFAULT_API_ENDPOINTS};
use crate::resolver::client::Fetcher;
use crate::resolver::decoder::{default_hypotheses, Decoder, OffsetMode, DEFAULT_STRIP_EVERY};
use crate::resolver::direct::DirectMatcher;
use crate::resolver::error::{ResolveError, Stage, StageFailure};
use crate::resolver::headers::{self, ImageHeaders, DEFAULT_USER_AGENT};
use crate::resolver::hosts::HostAllowList;
use tracing::{debug, info, warn};

/// One attempt at an image list from the fetched chapter page.
pub trait PageStrategy: Send + Sync {
    fn stage(&self) -> Stage;
    fn attempt(&self, body: &str) -> Result<ImageList, ResolveError>;
}

/// Plaintext lists already present in the page.
pub struct DirectMatchStrategy(pub DirectMatcher);

impl PageStrategy for DirectMatchStrategy {
    fn stage(&self) -> Stage {
        Stage::TryDirectMatch
    }

    fn attempt(&self, body: &str) -> Result<ImageList, ResolveError> {
        Ok(self.0.extract(body))
    }
}

/// Obfuscated payload plus nonce.
pub struct DecodeStrategy(pub Decoder);

impl PageStrategy for DecodeStrategy {
    fn stage(&self) -> Stage {
        Stage::TryDecode
    }

    fn attempt(&self, body: &str) -> Result<ImageList, ResolveError> {
        self.0.decode_page(body)
    }
}

/// Any image URL in the page.
pub struct LastResortStrategy(pub DirectMatcher);

impl PageStrategy for LastResortStrategy {
    fn stage(&self) -> Stage {
        Stage::TryLastResort
    }

    fn attempt(&self, body: &str) -> Result<ImageList, ResolveError> {
        Ok(self.0.last_resort(body))
    }
}

/// Direct match, decode, last resort.
pub fn default_strategies(hosts: &HostAllowList, decoder: Decoder) -> Vec<Box<dyn PageStrategy>> {
    vec![
        Box::new(DirectMatchStrategy(DirectMatcher::new(hosts.clone()))),
        Box::new(DecodeStrategy(decoder)),
        Box::new(LastResortStrategy(DirectMatcher::new(hosts.clone()))),
    ]
}

/// A successful run and the stage that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub images: ImageList,
    pub stage: Stage,
}

impl From<Result<Resolution, ResolveError>> for ResolutionOutcome {
    fn from(result: Result<Resolution, ResolveError>) -> Self {
        match result {
            Ok(resolution) => ResolutionOutcome::Success(resolution.images),
            Err(e) => ResolutionOutcome::Failure(e.to_string()),
        }
    }
}

pub struct Pipeline {
    fetcher: Fetcher,
    api: Option<ApiResolver>,
    strategies: Vec<Box<dyn PageStrategy>>,
    hosts: HostAllowList,
    user_agent: String,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("fetcher", &self.fetcher)
            .field("api", &self.api)
            .field(
                "strategies",
                &self.strategies.iter().map(|s| s.stage()).collect::<Vec<_>>(),
            )
            .field("hosts", &self.hosts)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Pipeline with the default endpoints, hypotheses and strategy order for `hosts`.
    pub fn new(fetcher: Fetcher, hosts: HostAllowList) -> Self {
        let decoder = Decoder::new(
            default_hypotheses(OffsetMode::default(), &DEFAULT_STRIP_EVERY),
            hosts.clone(),
        );
        let api = ApiResolver::new(
            DEFAULT_API_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            hosts.clone(),
        );
        Self {
            fetcher,
            api: Some(api),
            strategies: default_strategies(&hosts, decoder),
            hosts,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    pub fn with_api(mut self, api: ApiResolver) -> Self {
        self.api = Some(api);
        self
    }

    pub fn without_api(mut self) -> Self {
        self.api = None;
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<Box<dyn PageStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// User-Agent reported by [Pipeline::headers_for]; should match the fetcher's.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.strategies.iter().map(|s| s.stage()).collect()
    }

    /// Request headers an image loader must send for `url`.
    pub fn headers_for(&self, url: &str, comic_id: &str, chapter_id: &str) -> ImageHeaders {
        headers::headers_for(url, comic_id, chapter_id, &self.user_agent)
    }

    pub fn resolve(&self, chapter: &ChapterRef) -> Result<Resolution, ResolveError> {
        self.resolve_with(chapter, None)
    }

    /// Resolve `chapter`, reporting each stage as it starts.
    ///
    /// Only `NoImageData`, `Cancelled` and, for malformed input, `InvalidUrl` are returned.
    pub fn resolve_with(
        &self,
        chapter: &ChapterRef,
        on_stage: Option<&dyn Fn(Stage)>,
    ) -> Result<Resolution, ResolveError> {
        let notify = |stage: Stage| {
            if let Some(cb) = on_stage {
                cb(stage);
            }
        };
        notify(Stage::Init);
        validate(chapter)?;
        let mut failures: Vec<StageFailure> = Vec::new();

        if let Some(api) = &self.api {
            notify(Stage::TryApi);
            let images = self.hosts.filter(api.try_apis(&self.fetcher, chapter));
            if !images.is_empty() {
                return Ok(self.done(Stage::TryApi, images, &notify));
            }
            failures.push(failure(Stage::TryApi, "no endpoint returned images"));
        }

        notify(Stage::TryFetch);
        let page_url = chapter.page_url();
        let body = match self.fetcher.get(&page_url) {
            Ok(result) if result.is_success() => result.body,
            Ok(result) => {
                failures.push(failure(Stage::TryFetch, format!("HTTP {}", result.status)));
                return Err(self.give_up(chapter, failures));
            }
            Err(ResolveError::Cancelled) => return Err(ResolveError::Cancelled),
            Err(e) => {
                failures.push(failure(Stage::TryFetch, e.to_string()));
                return Err(self.give_up(chapter, failures));
            }
        };
        debug!(url = %page_url, bytes = body.len(), "chapter page fetched");

        for strategy in &self.strategies {
            let stage = strategy.stage();
            notify(stage);
            match strategy.attempt(&body) {
                Ok(images) => {
                    let images = self.hosts.filter(images);
                    if !images.is_empty() {
                        return Ok(self.done(stage, images, &notify));
                    }
                    failures.push(failure(stage, "no images"));
                }
                Err(e) => failures.push(failure(stage, e.to_string())),
            }
        }
        Err(self.give_up(chapter, failures))
    }

    fn done(&self, stage: Stage, images: ImageList, notify: &dyn Fn(Stage)) -> Resolution {
        info!(stage = %stage, count = images.len(), "chapter resolved");
        notify(Stage::Done);
        Resolution { images, stage }
    }

    fn give_up(&self, chapter: &ChapterRef, failures: Vec<StageFailure>) -> ResolveError {
        let err = ResolveError::NoImageData {
            comic_id: chapter.comic_id.clone(),
            chapter_id: chapter.chapter_id.clone(),
            failures,
        };
        warn!(error = %err, "chapter not resolved");
        err
    }
}

fn failure(stage: Stage, reason: impl Into<String>) -> StageFailure {
    StageFailure {
        stage,
        reason: reason.into(),
    }
}

fn validate(chapter: &ChapterRef) -> Result<(), ResolveError> {
    let invalid = |input: &str, reason: &str| ResolveError::InvalidUrl {
        input: input.to_string(),
        reason: reason.to_string(),
    };
    if chapter.comic_id.trim().is_empty() {
        return Err(invalid(&chapter.comic_id, "comic id is empty"));
    }
    if chapter.chapter_id.trim().is_empty() {
        return Err(invalid(&chapter.chapter_id, "chapter id is empty"));
    }
    if chapter.is_url() {
        let url = reqwest::Url::parse(&chapter.chapter_id)
            .map_err(|e| invalid(&chapter.chapter_id, &e.to_string()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(invalid(&chapter.chapter_id, "not an http(s) URL"));
        }
    }
    Ok(())
}
