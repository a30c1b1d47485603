//! Events emitted by the session worker for the consumer to handle.

use serde::Serialize;

use crate::irc_parser::Tags;

/// A user joining or leaving a channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Membership {
    pub channel: String,
    pub user: String,
}

/// The names reported for a channel (numeric 353).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NameList {
    pub channel: String,
    pub names: Vec<String>,
}

/// A chat message received in a channel, or privately when delivered as
/// [`Event::PrivateMessage`] (in which case `channel` is empty).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub channel: String,
    pub user: String,
    pub content: String,
    /// Set when the message was sent as a `/me` action.
    pub is_action: bool,
    pub message_id: String,
    /// Number of bits cheered with the message, 0 if none.
    pub bits: u64,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Whisper {
    pub user: String,
    pub message: String,
    pub tags: Tags,
}

/// A server notice, global when `channel` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub id: String,
    pub message: String,
    pub channel: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Host {
    /// Whether hosting mode was turned on (off when the target is `-`).
    pub on: bool,
    pub hosting: String,
    pub being_hosted: Option<String>,
    pub viewers: u64,
}

/// One room mode changing, e.g. slow mode or followers-only chat.
///
/// The meaning of `parameter` depends on the mode: seconds for `slow`,
/// minutes (or -1 for off) for `followers-only`, 1/0 for the boolean modes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomModeChange {
    pub channel: String,
    pub channel_id: u64,
    pub mode: String,
    pub parameter: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClearKind {
    /// All chat messages cleared.
    All,
    /// A single message deleted.
    Message,
    /// A user timed out for `duration` seconds.
    Timeout,
    /// A user permanently banned.
    Ban,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Clear {
    pub kind: ClearKind,
    pub channel: String,
    /// The user timed out or banned (kinds `Timeout` and `Ban`).
    pub user: String,
    pub reason: String,
    /// Id and content of the deleted message (kind `Message`).
    pub offending_message_id: String,
    pub offending_message_content: String,
    /// Timeout length in seconds (kind `Timeout`).
    pub duration: u64,
    pub tags: Tags,
}

/// A user gaining or losing moderator status in a channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModChange {
    pub channel: String,
    pub user: String,
    pub moderator: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserState {
    /// Whether the state applies globally rather than to one channel.
    pub global: bool,
    pub channel: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubKind {
    /// Unrecognized subscription notice; check the raw `msg-id` tag.
    Unknown,
    New,
    Resub,
    Gifted,
    MysteryGift,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sub {
    pub kind: SubKind,
    pub channel: String,
    pub user: String,
    pub recipient_display_name: String,
    pub recipient_user_name: String,
    pub recipient_id: u64,
    /// Number of community subs announced by a mystery gift.
    pub mass_gift_count: u64,
    /// Gifted subs the sender has given in this channel so far.
    pub sender_count: u64,
    /// Consecutive months subscribed, for resubs.
    pub months: u64,
    pub user_message: String,
    pub system_message: String,
    pub plan_name: String,
    pub plan_id: u64,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ritual {
    pub channel: String,
    pub user: String,
    pub ritual: String,
    pub system_message: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Raid {
    pub channel: String,
    pub raider: String,
    pub viewers: u64,
    pub system_message: String,
    pub tags: Tags,
}

/// Everything the session reports to its consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Event {
    /// Logged in successfully (end of MOTD received).
    LoggedIn,
    /// Logged out, disconnected, or the connection could not be established.
    LoggedOut,
    /// The server asked the client to reconnect soon.
    Doom,
    NameList(NameList),
    Join(Membership),
    Leave(Membership),
    Message(ChatMessage),
    PrivateMessage(ChatMessage),
    Whisper(Whisper),
    Notice(Notice),
    Host(Host),
    RoomMode(RoomModeChange),
    Clear(Clear),
    Mod(ModChange),
    UserState(UserState),
    Sub(Sub),
    Ritual(Ritual),
    Raid(Raid),
}

/// Receiver for session events. Events are delivered serially from the
/// session worker; implementations should not block for long.
pub trait EventSink: Send + Sync {
    fn event(&self, event: Event);
}

/// Sink that discards every event; the default when none is configured.
#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn event(&self, _event: Event) {}
}

impl EventSink for tokio::sync::mpsc::UnboundedSender<Event> {
    fn event(&self, event: Event) {
        let _ = self.send(event);
    }
}
