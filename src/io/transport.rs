//! Transport layer - Pure I/O abstraction for message exchange
//!
//! This module provides the duplex channel to a language server process
//! without knowledge of message format or process management. The same
//! transport serves both the piped stdin/stdout strategy and the loopback
//! socket strategy.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

// ============================================================================
// Constants
// ============================================================================

/// Size of the read buffer for reading operations
const READ_BUFFER_SIZE: usize = 4096;

/// Default capacity for UTF-8 accumulation buffer
const UTF8_ACCUMULATION_BUFFER_CAPACITY: usize = 8192;

/// Core transport trait for bidirectional message exchange
#[async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send a message (raw string)
    async fn send(&mut self, message: &str) -> Result<(), Self::Error>;

    /// Receive the next chunk of data (raw string)
    async fn receive(&mut self) -> Result<String, Self::Error>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), Self::Error>;

    /// Check if transport is still active
    fn is_connected(&self) -> bool;
}

// ============================================================================
// Stream Transport Implementation
// ============================================================================

/// Error types for stream transports
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport is disconnected")]
    Disconnected,

    #[error("Channel error: {0}")]
    Channel(String),
}

/// Transport over any async byte stream pair
///
/// Reading and writing happen on background tasks; the transport itself only
/// holds channel endpoints. Cancelling the shutdown token (see
/// [`StreamTransport::shutdown_token`]) tears both tasks down, which closes the
/// underlying pipes or socket.
#[derive(Debug)]
pub struct StreamTransport {
    /// Channel for sending messages to the writer task
    outgoing: Option<mpsc::UnboundedSender<String>>,

    /// Channel for receiving data from the reader task
    incoming: Option<mpsc::UnboundedReceiver<String>>,

    /// Cancels both background tasks
    shutdown: CancellationToken,

    /// Connection status
    connected: bool,
}

/// Reader task state that handles byte accumulation
struct Utf8Accumulator {
    /// Buffer for accumulating raw bytes before UTF-8 conversion
    byte_buffer: Vec<u8>,

    /// Buffer capacity to avoid frequent reallocations
    buffer_capacity: usize,
}

impl Utf8Accumulator {
    fn new() -> Self {
        Self {
            byte_buffer: Vec::with_capacity(UTF8_ACCUMULATION_BUFFER_CAPACITY),
            buffer_capacity: UTF8_ACCUMULATION_BUFFER_CAPACITY,
        }
    }

    fn add_bytes(&mut self, bytes: &[u8]) {
        self.byte_buffer.extend_from_slice(bytes);
    }

    /// Take the longest valid UTF-8 prefix out of the buffer
    fn extract_valid_utf8(&mut self) -> Option<String> {
        if self.byte_buffer.is_empty() {
            return None;
        }

        let valid_end = match std::str::from_utf8(&self.byte_buffer) {
            Ok(_) => self.byte_buffer.len(),
            Err(e) if e.valid_up_to() > 0 => e.valid_up_to(),
            Err(e) => match e.error_len() {
                // Bytes that can never become valid are replaced
                Some(invalid_len) => {
                    self.byte_buffer.drain(..invalid_len);
                    return Some(char::REPLACEMENT_CHARACTER.to_string());
                }
                // Wait for more data to complete the sequence
                None => return None,
            },
        };

        let bytes: Vec<u8> = self.byte_buffer.drain(..valid_end).collect();
        String::from_utf8(bytes).ok()
    }

    fn compact(&mut self) {
        if self.byte_buffer.capacity() > self.buffer_capacity * 2 {
            self.byte_buffer.shrink_to(self.buffer_capacity);
        }
    }
}

impl StreamTransport {
    /// Create a transport from a reader/writer pair
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(Self::writer_task(writer, outgoing_rx, shutdown.clone()));
        tokio::spawn(Self::reader_task(reader, incoming_tx, shutdown.clone()));

        Self {
            outgoing: Some(outgoing_tx),
            incoming: Some(incoming_rx),
            shutdown,
            connected: true,
        }
    }

    /// Create a transport from an accepted socket connection
    pub fn from_tcp(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }

    /// Token that closes this transport when cancelled
    ///
    /// Handed to process exit handlers so a dead server also drops its channel.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    async fn writer_task<W>(
        mut writer: W,
        mut receiver: mpsc::UnboundedReceiver<String>,
        shutdown: CancellationToken,
    ) where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                message = receiver.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            trace!(
                "StreamTransport: Writing message (length: {})",
                message.len()
            );

            if let Err(e) = writer.write_all(message.as_bytes()).await {
                error!("Failed to write to server: {}", e);
                break;
            }
            if let Err(e) = writer.flush().await {
                error!("Failed to flush server stream: {}", e);
                break;
            }
        }

        let _ = writer.shutdown().await;
        trace!("StreamTransport: writer task finished");
    }

    async fn reader_task<R>(
        reader: R,
        sender: mpsc::UnboundedSender<String>,
        shutdown: CancellationToken,
    ) where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut reader = BufReader::new(reader);
        let mut state = Utf8Accumulator::new();
        let mut read_buffer = Box::new([0u8; READ_BUFFER_SIZE]);

        loop {
            let read = tokio::select! {
                _ = shutdown.cancelled() => break,
                read = reader.read(read_buffer.as_mut()) => read,
            };

            match read {
                Ok(0) => {
                    Self::handle_eof(&mut state, &sender);
                    break;
                }
                Ok(n) => {
                    state.add_bytes(&read_buffer[..n]);
                    while let Some(data) = state.extract_valid_utf8() {
                        if sender.send(data).is_err() {
                            trace!("StreamTransport: receiver dropped, stopping reader");
                            return;
                        }
                    }
                    state.compact();
                }
                Err(e) => {
                    error!("Failed to read from server: {}", e);
                    break;
                }
            }
        }

        trace!("StreamTransport: reader task finished");
    }

    fn handle_eof(state: &mut Utf8Accumulator, sender: &mpsc::UnboundedSender<String>) {
        trace!("StreamTransport: reader reached EOF");

        if let Some(final_string) = state.extract_valid_utf8() {
            if !final_string.is_empty() && sender.send(final_string).is_err() {
                trace!("StreamTransport: receiver dropped during EOF processing");
            }
        }

        if !state.byte_buffer.is_empty() {
            error!(
                "StreamTransport: {} incomplete bytes remaining at EOF: {:?}",
                state.byte_buffer.len(),
                state.byte_buffer
            );
        }
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Transport for StreamTransport {
    type Error = TransportError;

    async fn send(&mut self, message: &str) -> Result<(), Self::Error> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }

        let sender = self
            .outgoing
            .as_ref()
            .ok_or(TransportError::Disconnected)?;

        sender
            .send(message.to_string())
            .map_err(|e| TransportError::Channel(e.to_string()))
    }

    async fn receive(&mut self) -> Result<String, Self::Error> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }

        let receiver = self
            .incoming
            .as_mut()
            .ok_or(TransportError::Disconnected)?;

        tokio::select! {
            _ = self.shutdown.cancelled() => Err(TransportError::Disconnected),
            data = receiver.recv() => data.ok_or(TransportError::Disconnected),
        }
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        self.outgoing.take();
        self.incoming.take();
        self.shutdown.cancel();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected && !self.shutdown.is_cancelled()
    }
}

// ============================================================================
// Mock Transport Implementation
// ============================================================================

#[cfg(test)]
pub use mock::MockTransport;

#[cfg(test)]
mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Mock transport for testing - allows controlling sent/received messages
    pub struct MockTransport {
        sent_messages: Arc<Mutex<Vec<String>>>,
        responses: Arc<Mutex<VecDeque<String>>>,
        connected: bool,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                sent_messages: Arc::new(Mutex::new(Vec::new())),
                responses: Arc::new(Mutex::new(VecDeque::new())),
                connected: true,
            }
        }

        /// Create a mock transport with predefined responses
        pub fn with_responses(responses: Vec<String>) -> Self {
            let transport = Self::new();
            transport.responses.lock().unwrap().extend(responses);
            transport
        }

        /// Get all messages that were sent via this transport
        pub fn sent_messages(&self) -> Vec<String> {
            self.sent_messages.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        type Error = TransportError;

        async fn send(&mut self, message: &str) -> Result<(), Self::Error> {
            if !self.connected {
                return Err(TransportError::Disconnected);
            }
            self.sent_messages.lock().unwrap().push(message.to_string());
            Ok(())
        }

        async fn receive(&mut self) -> Result<String, Self::Error> {
            if !self.connected {
                return Err(TransportError::Disconnected);
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(TransportError::Disconnected)
        }

        async fn close(&mut self) -> Result<(), Self::Error> {
            self.connected = false;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
