//! In-process RPC server for tests.
//!
//! Accepts any number of WebSocket clients on a random localhost port,
//! records every request and client close frame, and answers requests
//! through a [`Responder`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

// ============================================================================
// Types
// ============================================================================

/// How the server answers one request.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// `{id, result}` immediately.
    Result(Value),
    /// `{id, error}` immediately.
    Error(Value),
    /// `{id, result}` after a delay.
    Delayed(Duration, Value),
    /// No answer at all.
    Silent,
}

/// Maps a request envelope to a reply.
pub(crate) type Responder = Arc<dyn Fn(&Value) -> Reply + Send + Sync>;

// ============================================================================
// MockServer
// ============================================================================

/// Loopback WebSocket server speaking the RPC envelope format.
pub(crate) struct MockServer {
    port: u16,
    requests: Arc<Mutex<Vec<Value>>>,
    client_closes: Arc<Mutex<Vec<(u16, String)>>>,
    push_tx: broadcast::Sender<Message>,
}

impl MockServer {
    /// Starts a server that accepts every request.
    ///
    /// `signin`/`signup`/`authenticate` return a token, everything else
    /// echoes its params back as the result.
    pub(crate) async fn start() -> Self {
        Self::with_responder(Arc::new(|request: &Value| {
            match request["method"].as_str().unwrap_or_default() {
                "signin" | "signup" | "authenticate" => Reply::Result(json!("token")),
                "use" | "ping" => Reply::Result(Value::Null),
                _ => Reply::Result(request["params"].clone()),
            }
        }))
        .await
    }

    /// Starts a server with a custom responder.
    pub(crate) async fn with_responder(responder: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let client_closes = Arc::new(Mutex::new(Vec::new()));
        let (push_tx, _) = broadcast::channel(16);

        let accept_requests = Arc::clone(&requests);
        let accept_closes = Arc::clone(&client_closes);
        let accept_push = push_tx.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(
                    stream,
                    Arc::clone(&responder),
                    Arc::clone(&accept_requests),
                    Arc::clone(&accept_closes),
                    accept_push.subscribe(),
                ));
            }
        });

        Self {
            port,
            requests,
            client_closes,
            push_tx,
        }
    }

    /// Returns a URL nobody listens on.
    pub(crate) async fn unused_url() -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        drop(listener);
        Url::parse(&format!("ws://127.0.0.1:{port}/rpc")).expect("url")
    }

    /// WebSocket URL of the RPC endpoint.
    pub(crate) fn url(&self) -> Url {
        Url::parse(&self.endpoint()).expect("url")
    }

    /// Endpoint as a settings collaborator would store it.
    pub(crate) fn endpoint(&self) -> String {
        format!("ws://127.0.0.1:{}/rpc", self.port)
    }

    /// Requests received so far, in arrival order.
    pub(crate) fn requests(&self) -> Vec<Value> {
        self.requests.lock().clone()
    }

    /// Methods received so far, in arrival order.
    pub(crate) fn methods(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .filter_map(|r| r["method"].as_str().map(str::to_owned))
            .collect()
    }

    /// Close frames initiated by clients.
    pub(crate) fn client_closes(&self) -> Vec<(u16, String)> {
        self.client_closes.lock().clone()
    }

    /// Sends a raw text frame to every connected client.
    pub(crate) fn push(&self, text: impl Into<String>) {
        let _ = self.push_tx.send(Message::Text(text.into().into()));
    }

    /// Closes every connected client with the given code.
    pub(crate) fn close_all(&self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        let _ = self.push_tx.send(Message::Close(Some(frame)));
    }
}

// ============================================================================
// Connection Handler
// ============================================================================

async fn serve(
    stream: TcpStream,
    responder: Responder,
    requests: Arc<Mutex<Vec<Value>>>,
    client_closes: Arc<Mutex<Vec<(u16, String)>>>,
    mut push_rx: broadcast::Receiver<Message>,
) {
    let Ok(socket) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = socket.split();
    let (delayed_tx, mut delayed_rx) = mpsc::unbounded_channel::<Message>();
    let mut server_closing = false;

    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    requests.lock().push(request.clone());

                    let id = request["id"].clone();
                    let frame = match responder(&request) {
                        Reply::Result(result) => json!({"id": id, "result": result}),
                        Reply::Error(error) => json!({"id": id, "error": error}),
                        Reply::Delayed(delay, result) => {
                            let tx = delayed_tx.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                let frame = json!({"id": id, "result": result});
                                let _ = tx.send(Message::Text(frame.to_string().into()));
                            });
                            continue;
                        }
                        Reply::Silent => continue,
                    };
                    if write.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    if !server_closing {
                        let entry = frame
                            .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                            .unwrap_or((1005, String::new()));
                        client_closes.lock().push(entry);
                    }
                    let _ = write.close().await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },

            Some(message) = delayed_rx.recv() => {
                if write.send(message).await.is_err() {
                    break;
                }
            }

            pushed = push_rx.recv() => match pushed {
                Ok(message) => {
                    server_closing |= message.is_close();
                    if write.send(message).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Installs a test subscriber honouring `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
