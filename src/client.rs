//! Public entry point: configuration builder and the thread-safe handle
//! used to drive a chat session.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::action::Action;
use crate::connection::{Clock, ConnectionFactory};
use crate::error::{MessagingError, Result};
use crate::event::{EventSink, NullEventSink};
use crate::session::{run_session, Session};

/// Source of the digits appended to an anonymous `justinfan` nickname.
pub type AnonymousNicknameSource = Arc<dyn Fn() -> u32 + Send + Sync>;

/// Collects the injected collaborators before spawning a session.
pub struct MessagingBuilder {
    connection_factory: Option<ConnectionFactory>,
    clock: Option<Arc<dyn Clock>>,
    sink: Arc<dyn EventSink>,
    anonymous_nickname_source: AnonymousNicknameSource,
}

impl Default for MessagingBuilder {
    fn default() -> Self {
        Self {
            connection_factory: None,
            clock: None,
            sink: Arc::new(NullEventSink),
            anonymous_nickname_source: Arc::new(|| rand::random::<u32>() % 80_000 + 1_000),
        }
    }
}

impl MessagingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The factory called on every log-in to obtain a fresh connection.
    /// Required.
    pub fn connection_factory(mut self, connection_factory: ConnectionFactory) -> Self {
        self.connection_factory = Some(connection_factory);
        self
    }

    /// The clock used to arm handshake timeouts. Without one, log-in phases
    /// wait indefinitely.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Where session events are delivered. Defaults to a no-op sink.
    pub fn event_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Overrides the randomness behind anonymous nicknames, for
    /// deterministic tests.
    pub fn anonymous_nickname_source(mut self, source: AnonymousNicknameSource) -> Self {
        self.anonymous_nickname_source = source;
        self
    }

    /// Spawns the session worker on the current tokio runtime and returns
    /// the handle used to drive it.
    pub fn spawn(self) -> Result<Messaging> {
        let connection_factory = self
            .connection_factory
            .ok_or(MessagingError::MissingConnectionFactory)?;
        let session_id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();
        let session = Session::new(
            session_id,
            receiver,
            sender.clone(),
            connection_factory,
            self.clock,
            self.sink,
        );
        let worker = tokio::spawn(run_session(session));
        Ok(Messaging {
            sender,
            worker: Some(worker),
            session_id,
            anonymous_nickname_source: self.anonymous_nickname_source,
        })
    }
}

/// Handle to a running chat session.
///
/// Methods enqueue work for the session worker and return immediately; they
/// are safe to call from any thread. Submissions from a single caller are
/// processed in order. Every method fails with
/// [`MessagingError::WorkerGone`] once the worker has stopped.
pub struct Messaging {
    sender: mpsc::UnboundedSender<Action>,
    worker: Option<JoinHandle<()>>,
    session_id: Uuid,
    anonymous_nickname_source: AnonymousNicknameSource,
}

impl Messaging {
    pub fn builder() -> MessagingBuilder {
        MessagingBuilder::new()
    }

    /// Connects and logs in as a registered user with an OAuth token.
    pub fn log_in(&self, nickname: &str, token: &str) -> Result<()> {
        self.submit(Action::LogIn {
            nickname: nickname.to_string(),
            token: token.to_string(),
            anonymous: false,
        })
    }

    /// Connects and logs in read-only, without credentials, under a random
    /// `justinfan` nickname.
    pub fn log_in_anonymously(&self) -> Result<()> {
        let nickname = format!("justinfan{}", (self.anonymous_nickname_source)());
        self.submit(Action::LogIn {
            nickname,
            token: String::new(),
            anonymous: true,
        })
    }

    /// Logs out, sending a QUIT with `farewell` first when it is non-empty.
    pub fn log_out(&self, farewell: &str) -> Result<()> {
        self.submit(Action::LogOut {
            farewell: farewell.to_string(),
        })
    }

    pub fn join(&self, channel: &str) -> Result<()> {
        self.submit(Action::Join {
            channel: channel.to_string(),
        })
    }

    pub fn leave(&self, channel: &str) -> Result<()> {
        self.submit(Action::Leave {
            channel: channel.to_string(),
        })
    }

    /// Sends a message to a channel. Dropped silently when disconnected or
    /// logged in anonymously.
    pub fn send_message(&self, channel: &str, message: &str) -> Result<()> {
        self.submit(Action::SendMessage {
            channel: channel.to_string(),
            message: message.to_string(),
            parent: None,
        })
    }

    /// Sends a message replying to the message identified by `parent`.
    pub fn send_response(&self, channel: &str, message: &str, parent: &str) -> Result<()> {
        self.submit(Action::SendMessage {
            channel: channel.to_string(),
            message: message.to_string(),
            parent: Some(parent.to_string()),
        })
    }

    /// Whispers another user. Dropped silently when disconnected or logged
    /// in anonymously.
    pub fn send_whisper(&self, nickname: &str, message: &str) -> Result<()> {
        self.submit(Action::SendWhisper {
            nickname: nickname.to_string(),
            message: message.to_string(),
        })
    }

    /// Stops the session worker and waits for it to finish. Any open
    /// connection is closed without a farewell and the sink receives a
    /// final `LoggedOut`.
    pub async fn shutdown(mut self) {
        let _ = self.sender.send(Action::Stop);
        if let Some(worker) = self.worker.take() {
            if let Err(error) = worker.await {
                tracing::warn!(
                    session.id = %self.session_id,
                    error = ?error,
                    "session worker panicked or was cancelled"
                );
            }
        }
    }

    fn submit(&self, action: Action) -> Result<()> {
        self.sender
            .send(action)
            .map_err(|_| MessagingError::WorkerGone)
    }
}

impl Drop for Messaging {
    fn drop(&mut self) {
        // Best-effort stop when the handle is dropped without an explicit
        // shutdown; the worker tears the connection down on its own.
        if self.worker.is_some() {
            let _ = self.sender.send(Action::Stop);
        }
    }
}
