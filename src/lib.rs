//! Session engine for Twitch chat (TMI).
//!
//! Drives a long-lived connection to a Twitch chat server over an injected
//! transport: capability negotiation, authentication, the wait for the MOTD,
//! steady-state traffic, and teardown. Caller commands (join, leave, send,
//! whisper, log out) and server events are serialized through a single
//! worker task; decoded events fan out to a consumer-provided sink.
//!
//! The TCP/TLS transport, the clock, and the event sink are collaborators
//! supplied through [`MessagingBuilder`]; the library performs no I/O of
//! its own and never arms timeouts without a clock.

mod action;
pub mod client;
pub mod connection;
pub mod error;
pub mod event;
pub mod irc_parser;
mod session;

pub use client::{AnonymousNicknameSource, Messaging, MessagingBuilder};
pub use connection::{
    Clock, Connection, ConnectionFactory, DisconnectedCallback, MessageReceivedCallback,
};
pub use error::{MessagingError, Result};
pub use event::{
    ChatMessage, Clear, ClearKind, Event, EventSink, Host, Membership, ModChange, NameList,
    Notice, NullEventSink, Raid, Ritual, RoomModeChange, Sub, SubKind, UserState, Whisper,
};
pub use irc_parser::{unescape_tag_value, Message, Tags};
