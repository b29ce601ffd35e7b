//! Minimal LSP client over a framed transport
//!
//! The editor side owns the protocol; this client only carries JSON-RPC
//! messages to and from the server and performs the shutdown handshake when a
//! session is stopped.

use crate::io::transport::Transport;
use crate::lsp::framing::LspFraming;
use lsp_types::notification::{Exit, Notification};
use lsp_types::request::{Request, Shutdown};
use serde_json::{Value, json};
use tracing::{debug, trace};

/// LSP client errors
#[derive(Debug, thiserror::Error)]
pub enum LspClientError {
    #[error("Framing error: {0}")]
    Framing(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server returned an error for {method}: {message}")]
    Server { method: String, message: String },
}

/// Prefix of the string ids of requests this client originates
///
/// Editor requests passed through `send_message` use their own ids, usually
/// numbers, so the two never collide.
pub const REQUEST_ID_PREFIX: &str = "r-lsp-launcher/";

/// JSON-RPC message pump for one server connection
pub struct LanguageClient<T: Transport> {
    framing: LspFraming<T>,
    next_id: i64,
}

impl<T: Transport + 'static> LanguageClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            framing: LspFraming::new(transport),
            next_id: 1,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.framing.is_connected()
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        self.framing.transport()
    }

    /// Send a message produced elsewhere (usually the editor) unchanged
    pub async fn send_message(&mut self, message: &Value) -> Result<(), LspClientError> {
        let body = serde_json::to_string(message)?;
        self.framing
            .send(&body)
            .await
            .map_err(|e| LspClientError::Framing(e.to_string()))
    }

    /// Send a request and return the id it was sent with
    pub async fn send_request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<String, LspClientError> {
        let id = format!("{REQUEST_ID_PREFIX}{}", self.next_id);
        self.next_id += 1;

        let mut message = json!({ "jsonrpc": "2.0", "id": id, "method": method });
        if let Some(params) = params {
            message["params"] = params;
        }

        trace!("LanguageClient: request {} ({})", method, id);
        self.send_message(&message).await?;
        Ok(id)
    }

    pub async fn send_notification(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), LspClientError> {
        let mut message = json!({ "jsonrpc": "2.0", "method": method });
        if let Some(params) = params {
            message["params"] = params;
        }

        trace!("LanguageClient: notification {}", method);
        self.send_message(&message).await
    }

    /// Receive the next message from the server
    pub async fn receive(&mut self) -> Result<Value, LspClientError> {
        let body = self
            .framing
            .receive()
            .await
            .map_err(|e| LspClientError::Framing(e.to_string()))?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Perform the `shutdown` request followed by the `exit` notification
    ///
    /// Messages arriving before the shutdown response are discarded.
    pub async fn shutdown(&mut self) -> Result<(), LspClientError> {
        let id = self.send_request(Shutdown::METHOD, None).await?;

        loop {
            let message = self.receive().await?;
            if message.get("id").and_then(Value::as_str) != Some(id.as_str()) {
                trace!("LanguageClient: discarding message during shutdown");
                continue;
            }
            if let Some(error) = message.get("error") {
                return Err(LspClientError::Server {
                    method: Shutdown::METHOD.to_string(),
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string(),
                });
            }
            break;
        }

        debug!("LanguageClient: shutdown acknowledged, sending exit");
        self.send_notification(Exit::METHOD, None).await
    }

    /// Close the connection (does not stop the server process)
    pub async fn close(&mut self) -> Result<(), LspClientError> {
        self.framing
            .close()
            .await
            .map_err(|e| LspClientError::Framing(e.to_string()))
    }
}
