use std::{convert::Infallible, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    serve, Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, info, instrument, warn};

use crate::chat::ChatSession;
use crate::constants::{PAGE_TITLE, STATIC_DIR, TEMPLATE_DIR, THINKING_LABEL};
use crate::response::{QueryResponsePair, ResponseError, ResponseSource};
use crate::reveal::{RevealFrame, RevealPhase, RevealUnit};

const CHANNEL_CAPACITY: usize = 64;

/// Messages the page sends over the WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Submit { query: String },
}

/// Envelope for everything sent to the page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub message_type: String,
    pub payload: serde_json::Value,
}

impl ServerMessage {
    pub fn info(message: &str) -> Self {
        Self::new("Info", serde_json::json!({ "message": message }))
    }

    pub fn loading(query: &str) -> Self {
        Self::new(
            "Loading",
            serde_json::json!({ "query": query, "label": THINKING_LABEL }),
        )
    }

    pub fn reveal(frame: &RevealFrame) -> Self {
        let done = frame.is_complete();
        Self::new(
            "Reveal",
            serde_json::json!({
                "generation": frame.generation,
                "text": frame.prefix,
                "done": done,
                "show_caret": !done,
            }),
        )
    }

    /// Loading finished without a response to show.
    pub fn idle() -> Self {
        Self::new("Idle", serde_json::json!({}))
    }

    pub fn rejected(reason: &str) -> Self {
        Self::new("Rejected", serde_json::json!({ "reason": reason }))
    }

    pub fn error(message: &str) -> Self {
        Self::new("Error", serde_json::json!({ "message": message }))
    }

    fn new(message_type: &str, payload: serde_json::Value) -> Self {
        Self {
            message_type: message_type.to_string(),
            payload,
        }
    }
}

/// One page's chat, independent of the socket it arrived on.
///
/// Inbound text frames go in through an mpsc receiver and outbound messages
/// leave through an mpsc sender, so the whole exchange runs without a real
/// WebSocket. The source call runs on its own task so further frames are still
/// read while a query is in flight.
pub struct ChatConnection<S> {
    session: ChatSession,
    source: Arc<S>,
    outbound: mpsc::Sender<ServerMessage>,
    results_tx: mpsc::Sender<Result<QueryResponsePair, ResponseError>>,
    results_rx: mpsc::Receiver<Result<QueryResponsePair, ResponseError>>,
    frames: watch::Receiver<RevealFrame>,
    in_flight: Option<JoinHandle<()>>,
}

impl<S: ResponseSource + 'static> ChatConnection<S> {
    pub fn new(
        source: Arc<S>,
        cadence: Duration,
        unit: RevealUnit,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Self {
        let session = ChatSession::with_unit(cadence, unit);
        let frames = session.revealer().subscribe();
        let (results_tx, results_rx) = mpsc::channel(1);
        Self {
            session,
            source,
            outbound,
            results_tx,
            results_rx,
            frames,
            in_flight: None,
        }
    }

    /// Serves the page until `inbound` closes. The session, its revealer timer and
    /// any pending source call are released on return.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<String>) {
        self.send(ServerMessage::info("Connected to typist")).await;
        loop {
            tokio::select! {
                text = inbound.recv() => match text {
                    Some(text) => self.handle_text(&text).await,
                    None => break,
                },
                Some(result) = self.results_rx.recv() => self.handle_response(result).await,
                Ok(()) = self.frames.changed() => self.forward_frame().await,
            }
        }
        debug!("Chat connection finished");
    }

    async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Submit { query }) => self.submit(query).await,
            Err(e) => {
                warn!("Ignoring malformed client message: {}", e);
                self.send(ServerMessage::error(&format!("Invalid message: {}", e)))
                    .await;
            }
        }
    }

    async fn submit(&mut self, query: String) {
        if self.session.is_loading() {
            self.send(ServerMessage::rejected("A query is already in flight"))
                .await;
            return;
        }
        self.session.set_query(query);
        let Some(query) = self.session.begin_submit() else {
            self.send(ServerMessage::rejected("Query is empty")).await;
            return;
        };

        self.send(ServerMessage::loading(&query)).await;
        let source = Arc::clone(&self.source);
        let results = self.results_tx.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let result = source.submit_query(&query).await;
            if results.send(result).await.is_err() {
                debug!("Connection closed before the response arrived");
            }
        }));
    }

    async fn handle_response(&mut self, result: Result<QueryResponsePair, ResponseError>) {
        self.in_flight = None;
        if !self.session.finish_submit(result) {
            self.send(ServerMessage::idle()).await;
        }
    }

    async fn forward_frame(&mut self) {
        let frame = self.frames.borrow_and_update().clone();
        // Resets are covered by the Loading message.
        if frame.phase == RevealPhase::Idle {
            return;
        }
        self.send(ServerMessage::reveal(&frame)).await;
    }

    async fn send(&self, message: ServerMessage) {
        if self.outbound.send(message).await.is_err() {
            warn!("Outbound channel closed, dropping message");
        }
    }
}

impl<S> Drop for ChatConnection<S> {
    fn drop(&mut self) {
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
    }
}

/// Settings for the web surface.
#[derive(Debug, Clone)]
pub struct WebConfig {
    pub port: u16,
    pub template_dir: PathBuf,
    pub static_dir: PathBuf,
    pub cadence: Duration,
    pub unit: RevealUnit,
}

impl WebConfig {
    /// Template and static directories come from `TYPIST_TEMPLATE_DIR` and `TYPIST_STATIC_DIR`.
    pub fn new(port: u16, cadence: Duration, unit: RevealUnit) -> Self {
        Self {
            port,
            template_dir: PathBuf::from(TEMPLATE_DIR.as_str()),
            static_dir: PathBuf::from(STATIC_DIR.as_str()),
            cadence,
            unit,
        }
    }
}

// Shared application state
struct AppState<S> {
    templates: Arc<AutoReloader>,
    source: Arc<S>,
    cadence: Duration,
    unit: RevealUnit,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            templates: Arc::clone(&self.templates),
            source: Arc::clone(&self.source),
            cadence: self.cadence,
            unit: self.unit,
        }
    }
}

// Minijinja Environment setup
fn create_minijinja_env(template_dir: PathBuf) -> Result<AutoReloader> {
    if !template_dir.is_dir() {
        bail!("Template directory {} does not exist", template_dir.display());
    }
    // Use AutoReloader for development convenience
    let reloader = AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(&template_dir));
        notifier.watch_path(&template_dir, true);
        Ok(env)
    });
    Ok(reloader)
}

async fn index_handler<S: ResponseSource + 'static>(
    State(state): State<AppState<S>>,
) -> Result<Html<String>, (StatusCode, Html<String>)> {
    state
        .templates
        .acquire_env()
        .and_then(|env| {
            env.get_template("index.html").and_then(|tmpl| {
                let context = minijinja::context! {
                    title => PAGE_TITLE,
                    cadence_ms => state.cadence.as_millis() as u64,
                    thinking_label => THINKING_LABEL,
                };
                tmpl.render(context)
            })
        })
        .map(Html)
        .map_err(|e| {
            error!("Failed to get or render template: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!("Internal Server Error: {}", e)),
            )
        })
}

async fn ws_handler<S: ResponseSource + 'static>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<S>>,
) -> impl IntoResponse {
    info!("WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// Pumps frames between the socket and this connection's ChatConnection.
async fn handle_socket<S: ResponseSource + 'static>(socket: WebSocket, state: AppState<S>) {
    info!("New WebSocket connection established");
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(CHANNEL_CAPACITY);
    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);

    let connection = ChatConnection::new(state.source, state.cadence, state.unit, outbound_tx);
    let chat = tokio::spawn(connection.run(inbound_rx));

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if sink.send(Message::Text(json)).await.is_err() {
                        warn!("WebSocket client disconnected or send error. Closing connection.");
                        break;
                    }
                }
                Err(e) => error!("Failed to serialize server message: {}", e),
            }
        }
    });

    while let Some(incoming) = stream.next().await {
        match incoming {
            Ok(Message::Text(text)) => {
                if inbound_tx.send(text).await.is_err() {
                    break;
                }
            }
            Ok(Message::Binary(_)) => warn!("Received unexpected binary message from client"),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!("Client requested WebSocket close");
                break;
            }
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    drop(inbound_tx);
    if let Err(e) = chat.await {
        error!("Chat connection task failed: {:?}", e);
    }
    writer.abort();
    info!("WebSocket connection closed");
}

/// Builds the application router: the page, its static assets and the chat socket.
pub fn build_router<S: ResponseSource + 'static>(config: &WebConfig, source: S) -> Result<Router> {
    let templates = create_minijinja_env(config.template_dir.clone())
        .context("Failed to initialize template engine")?;

    let state = AppState {
        templates: Arc::new(templates),
        source: Arc::new(source),
        cadence: config.cadence,
        unit: config.unit,
    };

    let static_files_service = ServeDir::new(&config.static_dir).not_found_service(
        tower::service_fn(|_: Request| async {
            Ok::<_, Infallible>((StatusCode::NOT_FOUND, "Not Found").into_response())
        }),
    );

    let app = Router::new()
        .route("/", get(index_handler::<S>))
        .route("/ws", get(ws_handler::<S>))
        // Static files live under /static so they never shadow the page routes.
        .nest_service("/static", static_files_service)
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    Ok(app)
}

#[instrument(skip(source))]
pub async fn start_web_server<S: ResponseSource + 'static>(config: WebConfig, source: S) -> Result<()> {
    let app = build_router(&config, source)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parses_submit() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"submit","query":"hello"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Submit {
                query: "hello".to_string()
            }
        );
    }

    #[test]
    fn test_reveal_message_marks_completion() {
        let frame = RevealFrame {
            generation: 3,
            prefix: "hi".to_string(),
            emitted: 2,
            total: 2,
            phase: RevealPhase::Complete,
        };
        let msg = ServerMessage::reveal(&frame);
        assert_eq!(msg.message_type, "Reveal");
        assert_eq!(msg.payload["text"], "hi");
        assert_eq!(msg.payload["done"], true);
        assert_eq!(msg.payload["show_caret"], false);
        assert_eq!(msg.payload["generation"], 3);
    }

    #[test]
    fn test_missing_template_dir_is_an_error() {
        let result = create_minijinja_env(PathBuf::from("/definitely/not/here"));
        assert!(result.is_err());
    }
}
