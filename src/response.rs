use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::constants::MOCK_LATENCY_MS;

/// A query together with the answer a [`ResponseSource`] gave for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponsePair {
    pub query: String,
    pub response: String,
}

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("query is empty")]
    EmptyQuery,
    #[error("response source unavailable: {0}")]
    Unavailable(String),
}

/// Supplies answers to chat queries.
///
/// The reveal never looks inside a source; it only consumes the resulting
/// response text, so a network-backed source can replace the mock without
/// touching the chat surfaces.
pub trait ResponseSource: Send + Sync {
    fn submit_query(
        &self,
        query: &str,
    ) -> impl Future<Output = Result<QueryResponsePair, ResponseError>> + Send;
}

/// Answers every query with a canned string after a fixed delay.
#[derive(Debug, Clone)]
pub struct MockResponseSource {
    latency: Duration,
}

impl MockResponseSource {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }
}

impl Default for MockResponseSource {
    fn default() -> Self {
        Self::new(Duration::from_millis(MOCK_LATENCY_MS))
    }
}

pub fn mock_response_text(query: &str) -> String {
    format!(
        "This is a mock response to your query: \"{}\". It's designed to be a bit longer to showcase the typing animation effect. Feel free to ask more questions!",
        query
    )
}

impl ResponseSource for MockResponseSource {
    #[instrument(skip(self), fields(latency_ms = self.latency.as_millis() as u64))]
    async fn submit_query(&self, query: &str) -> Result<QueryResponsePair, ResponseError> {
        if query.trim().is_empty() {
            return Err(ResponseError::EmptyQuery);
        }
        tokio::time::sleep(self.latency).await;
        let response = mock_response_text(query);
        debug!(chars = response.chars().count(), "Mock response ready");
        Ok(QueryResponsePair {
            query: query.to_string(),
            response,
        })
    }
}
