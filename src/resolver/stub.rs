//! Scripted [HttpTransport] for tests. Responses are queued per URL and consumed in order;
//! the last queued response for a URL repeats once the queue is drained.

use crate::model::FetchResult;
use crate::resolver::client::HttpTransport;
use crate::resolver::error::TransportError;
use reqwest::header::HeaderMap;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

type Scripted = Result<FetchResult, String>;

#[derive(Debug, Default)]
struct State {
    routes: HashMap<String, VecDeque<Scripted>>,
    calls: HashMap<String, usize>,
    last_headers: Option<HeaderMap>,
}

#[derive(Debug, Clone, Default)]
pub struct StubTransport {
    state: Arc<Mutex<State>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, url: &str, response: Scripted) -> Self {
        self.state
            .lock()
            .expect("stub lock")
            .routes
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn ok(self, url: &str, body: &str) -> Self {
        self.status(url, 200, body)
    }

    pub fn status(self, url: &str, status: u16, body: &str) -> Self {
        self.push(
            url,
            Ok(FetchResult {
                status,
                body: body.to_string(),
            }),
        )
    }

    pub fn fail(self, url: &str) -> Self {
        self.push(url, Err(format!("connection refused: {}", url)))
    }

    pub fn calls(&self, url: &str) -> usize {
        let state = self.state.lock().expect("stub lock");
        state.calls.get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        let state = self.state.lock().expect("stub lock");
        state.calls.values().sum()
    }

    pub fn last_headers(&self) -> Option<HeaderMap> {
        self.state.lock().expect("stub lock").last_headers.clone()
    }
}

impl HttpTransport for StubTransport {
    fn get(&self, url: &str, headers: &HeaderMap) -> Result<FetchResult, TransportError> {
        let mut state = self.state.lock().expect("stub lock");
        *state.calls.entry(url.to_string()).or_default() += 1;
        state.last_headers = Some(headers.clone());
        let queue = state
            .routes
            .get_mut(url)
            .ok_or_else(|| TransportError::Other(format!("no route for {}", url)))?;
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match next {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(TransportError::Other(message)),
            None => Err(TransportError::Other(format!("no response for {}", url))),
        }
    }
}
