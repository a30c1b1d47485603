//! Contracts for the collaborators the session consumes: the transport
//! connection, the factory that produces it, and the clock used to arm
//! handshake timeouts.

use std::sync::Arc;

/// Called by the transport whenever data arrives from the server.
pub type MessageReceivedCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Called by the transport when the server closes its end of the connection.
pub type DisconnectedCallback = Arc<dyn Fn() + Send + Sync>;

/// A network connection to the chat server.
///
/// The session registers both callbacks before calling [`Connection::connect`]
/// and owns the handle for the lifetime of the connection. Callbacks may run
/// on transport-chosen threads; they only enqueue work for the session worker
/// and never touch session state.
pub trait Connection: Send {
    fn set_message_received_callback(&mut self, callback: MessageReceivedCallback);

    fn set_disconnected_callback(&mut self, callback: DisconnectedCallback);

    /// Establishes the connection synchronously; `false` on failure.
    fn connect(&mut self) -> bool;

    /// Queues `data` (already CRLF-terminated) for delivery to the server.
    fn send(&mut self, data: &str);

    /// Closes the connection synchronously.
    fn disconnect(&mut self);
}

/// Produces a fresh [`Connection`] for each log-in attempt.
pub type ConnectionFactory = Box<dyn Fn() -> Box<dyn Connection> + Send>;

/// Source of the current time, in seconds. Without one configured, the
/// session arms no handshake timeouts.
pub trait Clock: Send + Sync {
    fn current_time(&self) -> f64;
}
