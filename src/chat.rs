// Page-level chat state shared by the web and terminal surfaces.
// One query/response pair at a time, revealed by the session's own Revealer.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, info};

use crate::constants::THINKING_LABEL;
use crate::response::{QueryResponsePair, ResponseError, ResponseSource};
use crate::reveal::{RevealUnit, Revealer};

/// What a surface draws for the response area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatView {
    /// The response card is shown once a query is in flight or answered.
    pub card_visible: bool,
    pub body: String,
    /// Blinking caret after the text while the reveal is still running.
    pub show_caret: bool,
    pub submit_enabled: bool,
}

#[derive(Debug)]
pub struct ChatSession {
    query: String,
    loading: bool,
    response: Option<QueryResponsePair>,
    revealer: Revealer,
    cadence: Duration,
}

impl ChatSession {
    pub fn new(cadence: Duration) -> Self {
        Self::with_unit(cadence, RevealUnit::Char)
    }

    pub fn with_unit(cadence: Duration, unit: RevealUnit) -> Self {
        Self {
            query: String::new(),
            loading: false,
            response: None,
            revealer: Revealer::with_unit(unit),
            cadence,
        }
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn response(&self) -> Option<&QueryResponsePair> {
        self.response.as_ref()
    }

    pub fn revealer(&self) -> &Revealer {
        &self.revealer
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    pub fn can_submit(&self) -> bool {
        !self.loading && !self.query.trim().is_empty()
    }

    /// Enters the loading state and hands back the query to send, or `None` when
    /// a submit is not allowed right now.
    pub fn begin_submit(&mut self) -> Option<String> {
        if !self.can_submit() {
            return None;
        }
        info!(query = %self.query, "Submitting query");
        self.loading = true;
        self.response = None;
        self.revealer.reset();
        Some(self.query.clone())
    }

    /// Leaves the loading state. A response starts revealing; a failure is logged
    /// and leaves nothing to show. Returns whether a response arrived.
    pub fn finish_submit(&mut self, result: Result<QueryResponsePair, ResponseError>) -> bool {
        self.loading = false;
        match result {
            Ok(pair) => {
                self.revealer.start(pair.response.clone(), self.cadence);
                self.response = Some(pair);
                true
            }
            Err(e) => {
                error!("Error fetching response: {}", e);
                false
            }
        }
    }

    /// Runs a whole submit against `source`. Returns `false` if nothing was sent.
    pub async fn submit<S: ResponseSource>(&mut self, source: &S) -> bool {
        let Some(query) = self.begin_submit() else {
            return false;
        };
        let result = source.submit_query(&query).await;
        self.finish_submit(result);
        true
    }

    pub fn view(&self) -> ChatView {
        let card_visible = self.loading || self.response.is_some();
        if self.loading {
            return ChatView {
                card_visible,
                body: THINKING_LABEL.to_string(),
                show_caret: false,
                submit_enabled: false,
            };
        }
        let frame = self.revealer.current();
        ChatView {
            card_visible,
            show_caret: self.response.is_some() && frame.emitted < frame.total,
            body: frame.prefix,
            submit_enabled: self.can_submit(),
        }
    }
}

/// Line-oriented chat: each line read from `input` is a query, and the answer is
/// typed out on `output` as the reveal progresses. Ends at EOF or `/quit`.
pub async fn run_terminal_chat<S, R, W>(
    source: &S,
    cadence: Duration,
    unit: RevealUnit,
    input: R,
    mut output: W,
) -> Result<()>
where
    S: ResponseSource,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!("Starting terminal chat...");
    let mut session = ChatSession::with_unit(cadence, unit);
    let mut lines = input.lines();

    write_flush(&mut output, "> ").await?;
    while let Some(line) = lines.next_line().await.context("Failed to read query")? {
        if line.trim() == "/quit" {
            break;
        }
        session.set_query(line);
        let Some(query) = session.begin_submit() else {
            write_flush(&mut output, "> ").await?;
            continue;
        };

        write_flush(&mut output, &format!("{}\n", THINKING_LABEL)).await?;
        let result = source.submit_query(&query).await;
        if !session.finish_submit(result) {
            write_flush(&mut output, "> ").await?;
            continue;
        }

        // Prefixes only grow within one reveal, so writing the new tail is enough.
        let mut frames = session.revealer().subscribe();
        let mut written = 0;
        loop {
            let frame = frames.borrow_and_update().clone();
            write_flush(&mut output, &frame.prefix[written..]).await?;
            written = frame.prefix.len();
            if frame.is_complete() {
                break;
            }
            frames.changed().await.context("Reveal channel closed")?;
        }
        write_flush(&mut output, "\n> ").await?;
    }
    info!("Terminal chat finished.");
    Ok(())
}

async fn write_flush<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> Result<()> {
    output
        .write_all(text.as_bytes())
        .await
        .context("Failed to write to terminal")?;
    output.flush().await.context("Failed to flush terminal")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::MockResponseSource;

    const CADENCE: Duration = Duration::from_millis(30);

    #[test]
    fn test_new_session_is_blank() {
        let session = ChatSession::new(CADENCE);
        let view = session.view();
        assert!(!view.card_visible);
        assert!(!view.submit_enabled);
        assert_eq!(view.body, "");
        assert!(!view.show_caret);
    }

    #[test]
    fn test_whitespace_query_cannot_submit() {
        let mut session = ChatSession::new(CADENCE);
        session.set_query("   \t");
        assert!(!session.can_submit());
        assert!(session.begin_submit().is_none());
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn test_loading_view_shows_thinking() {
        let mut session = ChatSession::new(CADENCE);
        session.set_query("hi");
        assert_eq!(session.begin_submit().as_deref(), Some("hi"));

        let view = session.view();
        assert!(view.card_visible);
        assert_eq!(view.body, THINKING_LABEL);
        assert!(!view.submit_enabled);
        assert!(session.begin_submit().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_submit_clears_loading() {
        let mut session = ChatSession::new(CADENCE);
        session.set_query("hi");
        session.begin_submit();
        let delivered = session.finish_submit(Err(ResponseError::Unavailable("down".into())));
        assert!(!delivered);
        assert!(!session.is_loading());
        assert!(session.response().is_none());
        assert!(!session.view().card_visible);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_keeps_query_untrimmed() {
        let source = MockResponseSource::new(Duration::from_millis(10));
        let mut session = ChatSession::new(CADENCE);
        session.set_query(" padded ");
        assert!(session.submit(&source).await);
        assert_eq!(session.response().unwrap().query, " padded ");
        assert_eq!(session.query(), " padded ");
    }
}
