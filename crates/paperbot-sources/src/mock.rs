//! In-process paper source and chat platform for deterministic testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use paperbot_sources::mock::{MockChatPlatform, MockPaperSource};
//!
//! let source = MockPaperSource::new()
//!     .with_fetch_error("arXiv returned 503")
//!     .with_papers(vec![PaperRecord::new("P1", "Transformers", "")]);
//! let chat = MockChatPlatform::new().with_failure_on("P2");
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use paperbot_core::{ChannelId, ChatPlatform, Error, KeywordSet, PaperRecord, PaperSource, Result};

#[derive(Debug, Clone)]
enum Scripted {
    Papers(Vec<PaperRecord>),
    Fail(String),
}

/// Scripted paper source.
///
/// Each fetch pops the next scripted response. Once the script is exhausted
/// the last successful paper list is repeated.
#[derive(Clone, Default)]
pub struct MockPaperSource {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    fallback: Arc<Mutex<Vec<PaperRecord>>>,
    latency: Duration,
    call_log: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockPaperSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful fetch.
    pub fn with_papers(self, papers: Vec<PaperRecord>) -> Self {
        self.push_papers(papers);
        self
    }

    /// Queue a recoverable fetch failure.
    pub fn with_fetch_error(self, message: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Fail(message.into()));
        self
    }

    /// Sleep this long inside every fetch.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue a successful fetch on a shared handle.
    pub fn push_papers(&self, papers: Vec<PaperRecord>) {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Papers(papers));
    }

    /// Number of fetches so far.
    pub fn fetch_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    /// Keyword terms passed to each fetch, in call order.
    pub fn get_calls(&self) -> Vec<Vec<String>> {
        self.call_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaperSource for MockPaperSource {
    async fn fetch_candidates(&self, keywords: &KeywordSet) -> Result<Vec<PaperRecord>> {
        self.call_log.lock().unwrap().push(keywords.terms());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Papers(papers)) => {
                *self.fallback.lock().unwrap() = papers.clone();
                Ok(papers)
            }
            Some(Scripted::Fail(message)) => Err(Error::Fetch(message)),
            None => Ok(self.fallback.lock().unwrap().clone()),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// A message accepted by [`MockChatPlatform`].
#[derive(Debug, Clone, PartialEq)]
pub struct PostedMessage {
    pub channel: ChannelId,
    pub text: String,
}

/// Recording chat platform.
#[derive(Clone, Default)]
pub struct MockChatPlatform {
    posted: Arc<Mutex<Vec<PostedMessage>>>,
    attempts: Arc<Mutex<usize>>,
    fail_on: Vec<String>,
}

impl MockChatPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any message containing `needle` with a dispatch error.
    pub fn with_failure_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_on.push(needle.into());
        self
    }

    /// Messages delivered so far.
    pub fn posted(&self) -> Vec<PostedMessage> {
        self.posted.lock().unwrap().clone()
    }

    /// Delivery attempts, including rejected ones.
    pub fn attempt_count(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl ChatPlatform for MockChatPlatform {
    async fn post_message(&self, channel: &ChannelId, text: &str) -> Result<()> {
        *self.attempts.lock().unwrap() += 1;

        if let Some(needle) = self.fail_on.iter().find(|n| text.contains(n.as_str())) {
            return Err(Error::Dispatch(format!("simulated failure on {}", needle)));
        }

        self.posted.lock().unwrap().push(PostedMessage {
            channel: channel.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
