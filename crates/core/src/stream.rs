//! Progressive answering for clients waiting on a single question.
//!
//! The three `processing` messages are fixed and paced by a delay; they do
//! not reflect real progress. Exactly one terminal event follows, after
//! which the stream ends.

use crate::query::{ErrorExposure, QueryEngine};
use futures::Stream;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

pub const PROGRESS_MESSAGES: [&str; 3] = [
    "Thinking about your question...",
    "Analyzing relevant information...",
    "Finalizing the best answer...",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum QueryEvent {
    Processing { partial: String },
    Success { response: String },
    Error { error: String },
}

impl QueryEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, QueryEvent::Processing { .. })
    }
}

impl QueryEngine {
    /// Emits the progress messages, then answers `question` and emits one
    /// `success` or `error` event.
    pub fn answer_stream(
        &self,
        question: String,
        exposure: ErrorExposure,
    ) -> impl Stream<Item = QueryEvent> + Send + 'static {
        let engine = self.clone();
        let delay = engine.options().stream_delay;

        async_stream::stream! {
            for (position, message) in PROGRESS_MESSAGES.iter().enumerate() {
                if position > 0 {
                    pause(delay).await;
                }
                yield QueryEvent::Processing { partial: message.to_string() };
            }

            match engine.answer(&question).await {
                Ok(answer) => yield QueryEvent::Success { response: answer.into_text() },
                Err(failure) => {
                    warn!(%failure, "streamed question failed");
                    yield QueryEvent::Error { error: exposure.describe(&failure) };
                }
            }
        }
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
