use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::action::{Action, LoginPhase, PendingAction};
use crate::connection::{Clock, Connection, ConnectionFactory};
use crate::event::{
    ChatMessage, Clear, ClearKind, Event, EventSink, Host, Membership, ModChange, NameList, Notice,
    Raid, Ritual, RoomModeChange, Sub, SubKind, UserState, Whisper,
};
use crate::irc_parser::{unescape_tag_value, Message, CRLF};

/// Maximum time to wait for each phase of the log-in handshake before
/// closing the connection.
const LOG_IN_TIMEOUT_SECONDS: f64 = 5.0;

/// Cadence of the timeout sweep while handshake phases are pending.
const TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_millis(50);

const REQUIRED_CAPS: [&str; 3] = [
    "twitch.tv/commands",
    "twitch.tv/membership",
    "twitch.tv/tags",
];

const ROOM_MODES: [&str; 5] = ["slow", "followers-only", "r9k", "emote-only", "subs-only"];

/// Matches the nickname of an anonymous user: `justinfan` followed by
/// one or more digits.
fn is_anonymous_nickname(nickname: &str) -> bool {
    nickname
        .strip_prefix("justinfan")
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|byte| byte.is_ascii_digit()))
}

/// Returns the content of a `\x01ACTION …\x01` trailer, without the wrapper
/// or the space separating it from the content.
fn action_content(trailer: &str) -> Option<&str> {
    let inner = trailer.strip_prefix('\u{1}')?.strip_suffix('\u{1}')?;
    let content = inner.strip_prefix("ACTION")?;
    Some(content.strip_prefix(' ').unwrap_or(content))
}

pub(crate) struct Session {
    session_id: Uuid,
    receiver: mpsc::UnboundedReceiver<Action>,
    /// Cloned into the transport callbacks so they can enqueue
    /// `ProcessReceivedData` / `ServerDisconnected` actions.
    self_sender: mpsc::UnboundedSender<Action>,
    connection_factory: ConnectionFactory,
    clock: Option<Arc<dyn Clock>>,
    sink: Arc<dyn EventSink>,
    connection: Option<Box<dyn Connection>>,
    receive_buffer: String,
    anonymous: bool,
    logged_in: bool,
    caps_supported: HashSet<String>,
    pending: Vec<PendingAction>,
}

impl Session {
    pub(crate) fn new(
        session_id: Uuid,
        receiver: mpsc::UnboundedReceiver<Action>,
        self_sender: mpsc::UnboundedSender<Action>,
        connection_factory: ConnectionFactory,
        clock: Option<Arc<dyn Clock>>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            session_id,
            receiver,
            self_sender,
            connection_factory,
            clock,
            sink,
            connection: None,
            receive_buffer: String::new(),
            anonymous: false,
            logged_in: false,
            caps_supported: HashSet::new(),
            pending: Vec::new(),
        }
    }

    /// Performs one action; returns `false` when the worker should stop.
    fn perform(&mut self, action: Action) -> bool {
        match action {
            Action::LogIn {
                nickname,
                token,
                anonymous,
            } => self.perform_log_in(nickname, token, anonymous),
            Action::LogOut { farewell } => {
                let farewell = (!farewell.is_empty()).then_some(farewell);
                self.disconnect(farewell.as_deref());
            }
            Action::ProcessReceivedData { data } => self.process_received_data(data),
            Action::ServerDisconnected => {
                tracing::debug!(session.id = %self.session_id, "server closed the connection");
                self.disconnect(None);
            }
            Action::Join { channel } => self.send_line(&format!("JOIN #{channel}")),
            Action::Leave { channel } => self.send_line(&format!("PART #{channel}")),
            Action::SendMessage {
                channel,
                message,
                parent,
            } => self.perform_send_message(channel, message, parent),
            Action::SendWhisper { nickname, message } => {
                self.perform_send_whisper(nickname, message)
            }
            Action::Stop => return false,
        }
        true
    }

    fn perform_log_in(&mut self, nickname: String, token: String, anonymous: bool) {
        if self.connection.is_some() {
            return;
        }
        let mut connection = (self.connection_factory)();
        let message_sender = self.self_sender.clone();
        connection.set_message_received_callback(Arc::new(move |data| {
            let _ = message_sender.send(Action::ProcessReceivedData { data });
        }));
        let disconnect_sender = self.self_sender.clone();
        connection.set_disconnected_callback(Arc::new(move || {
            let _ = disconnect_sender.send(Action::ServerDisconnected);
        }));
        if !connection.connect() {
            tracing::warn!(session.id = %self.session_id, "connection attempt failed");
            self.sink.event(Event::LoggedOut);
            return;
        }
        self.caps_supported.clear();
        self.anonymous = anonymous;
        self.connection = Some(connection);
        self.send_line("CAP LS 302");
        let expiration = self.login_expiration();
        self.pending.push(PendingAction {
            phase: LoginPhase::LogIn,
            nickname,
            token,
            expiration,
        });
    }

    fn perform_send_message(&mut self, channel: String, message: String, parent: Option<String>) {
        if self.anonymous {
            return;
        }
        match parent {
            Some(parent) => self.send_line(&format!(
                "@reply-parent-msg-id={parent} PRIVMSG #{channel} :{message}"
            )),
            None => self.send_line(&format!("PRIVMSG #{channel} :{message}")),
        }
    }

    fn perform_send_whisper(&mut self, nickname: String, message: String) {
        if self.anonymous {
            return;
        }
        self.send_line(&format!("PRIVMSG #jtv :.w {nickname} {message}"));
    }

    /// Sends one line to the server, adding the CRLF terminator. Dropped
    /// silently when no connection is held.
    fn send_line(&mut self, raw_line: &str) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        if raw_line.starts_with("PASS oauth:") {
            tracing::trace!(session.id = %self.session_id, "< PASS oauth:**********************");
        } else {
            tracing::trace!(session.id = %self.session_id, "< {raw_line}");
        }
        connection.send(&format!("{raw_line}{CRLF}"));
    }

    /// Closes any open connection, optionally after a QUIT farewell, and
    /// resets the session to its logged-out state.
    fn disconnect(&mut self, farewell: Option<&str>) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        if let Some(farewell) = farewell {
            connection.send(&format!("QUIT :{farewell}{CRLF}"));
        }
        connection.disconnect();
        self.sink.event(Event::LoggedOut);
        self.logged_in = false;
        self.pending.clear();
        self.caps_supported.clear();
    }

    fn login_expiration(&self) -> Option<f64> {
        self.clock
            .as_ref()
            .map(|clock| clock.current_time() + LOG_IN_TIMEOUT_SECONDS)
    }

    fn sweep_enabled(&self) -> bool {
        self.clock.is_some() && !self.pending.is_empty()
    }

    fn process_timeouts(&mut self) {
        let Some(clock) = self.clock.as_ref() else {
            return;
        };
        if self.pending.is_empty() {
            return;
        }
        let now = clock.current_time();
        let mut expired = Vec::new();
        let mut index = 0;
        while index < self.pending.len() {
            let timed_out = self.pending[index]
                .expiration
                .is_some_and(|expiration| now >= expiration);
            if timed_out {
                expired.push(self.pending.remove(index));
            } else {
                index += 1;
            }
        }
        for action in expired {
            self.timeout_action(action);
        }
    }

    fn timeout_action(&mut self, action: PendingAction) {
        let farewell = match action.phase {
            LoginPhase::LogIn => "Timeout waiting for capability list",
            LoginPhase::RequestCaps => "Timeout waiting for response to capability request",
            LoginPhase::AwaitMotd => "Timeout waiting for MOTD",
        };
        tracing::warn!(
            session.id = %self.session_id,
            phase = ?action.phase,
            "log-in handshake timed out"
        );
        self.disconnect(Some(farewell));
    }

    /// Runs every pending action through `processor` in insertion order.
    /// Returning `None` consumes the action; actions the processor pushes
    /// while running end up after the kept ones.
    fn process_pending<F>(&mut self, mut processor: F)
    where
        F: FnMut(&mut Session, PendingAction) -> Option<PendingAction>,
    {
        let drained = std::mem::take(&mut self.pending);
        let mut kept = Vec::with_capacity(drained.len());
        for action in drained {
            if let Some(action) = processor(self, action) {
                kept.push(action);
            }
        }
        kept.append(&mut self.pending);
        self.pending = kept;
    }

    fn process_received_data(&mut self, data: String) {
        self.receive_buffer.push_str(&data);
        while let Some(line) = Message::next_line(&mut self.receive_buffer) {
            tracing::trace!(session.id = %self.session_id, "> {line}");
            let message = Message::parse(&line);
            if message.command.is_empty() {
                tracing::debug!(session.id = %self.session_id, line = %line, "dropping malformed line");
                continue;
            }
            self.dispatch(message);
        }
    }

    fn dispatch(&mut self, message: Message) {
        match message.command.as_str() {
            "353" => self.handle_name_list(message),
            "376" => self.handle_motd(message),
            "PING" => self.handle_ping(message),
            "JOIN" => self.handle_join(message),
            "PART" => self.handle_part(message),
            "PRIVMSG" => self.handle_privmsg(message),
            "CAP" => self.handle_cap(message),
            "WHISPER" => self.handle_whisper(message),
            "NOTICE" => self.handle_notice(message),
            "HOSTTARGET" => self.handle_host_target(message),
            "ROOMSTATE" => self.handle_room_state(message),
            "CLEARCHAT" => self.handle_clear_chat(message),
            "CLEARMSG" => self.handle_clear_message(message),
            "MODE" => self.handle_mode(message),
            "GLOBALUSERSTATE" => self.handle_global_user_state(message),
            "USERSTATE" => self.handle_user_state(message),
            "RECONNECT" => self.handle_reconnect(message),
            "USERNOTICE" => self.handle_user_notice(message),
            _ => {}
        }
    }

    fn handle_cap(&mut self, message: Message) {
        self.process_pending(|session, action| match action.phase {
            LoginPhase::LogIn => session.process_log_in_cap(action, &message),
            LoginPhase::RequestCaps => session.process_request_caps_cap(action, &message),
            LoginPhase::AwaitMotd => Some(action),
        });
    }

    fn process_log_in_cap(
        &mut self,
        action: PendingAction,
        message: &Message,
    ) -> Option<PendingAction> {
        if message.parameters.len() < 3 || message.parameters[1] != "LS" {
            return Some(action);
        }
        if message.parameters[2] == "*" {
            // Multi-line capability list; more LS lines follow.
            if let Some(caps) = message.parameters.get(3) {
                self.caps_supported
                    .extend(caps.split(' ').map(str::to_string));
            }
            return Some(action);
        }
        self.caps_supported
            .extend(message.parameters[2].split(' ').map(str::to_string));
        if REQUIRED_CAPS
            .iter()
            .all(|cap| self.caps_supported.contains(*cap))
        {
            self.end_capabilities_handshake_and_authenticate(action);
        } else {
            self.request_capabilities(action);
        }
        None
    }

    fn process_request_caps_cap(
        &mut self,
        action: PendingAction,
        message: &Message,
    ) -> Option<PendingAction> {
        let verdict = message.parameters.get(1).map(String::as_str);
        if verdict != Some("ACK") && verdict != Some("NAK") {
            return Some(action);
        }
        self.end_capabilities_handshake_and_authenticate(action);
        None
    }

    fn request_capabilities(&mut self, mut action: PendingAction) {
        self.send_line("CAP REQ :twitch.tv/commands twitch.tv/membership twitch.tv/tags");
        action.phase = LoginPhase::RequestCaps;
        action.expiration = self.login_expiration();
        self.pending.push(action);
    }

    fn end_capabilities_handshake_and_authenticate(&mut self, mut action: PendingAction) {
        self.send_line("CAP END");
        if !self.anonymous {
            let pass = format!("PASS oauth:{}", action.token);
            self.send_line(&pass);
        }
        self.send_line(&format!("NICK {}", action.nickname));
        action.phase = LoginPhase::AwaitMotd;
        action.expiration = self.login_expiration();
        self.pending.push(action);
    }

    fn handle_motd(&mut self, _message: Message) {
        self.process_pending(|session, action| match action.phase {
            LoginPhase::AwaitMotd => {
                if !session.logged_in {
                    session.logged_in = true;
                    session.sink.event(Event::LoggedIn);
                }
                None
            }
            _ => Some(action),
        });
    }

    fn handle_name_list(&mut self, message: Message) {
        if message.parameters.len() != 4 {
            return;
        }
        let channel = message.parameters[2]
            .get(1..)
            .unwrap_or_default()
            .to_string();
        let names = message.parameters[3]
            .split(' ')
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        self.sink.event(Event::NameList(NameList { channel, names }));
    }

    fn handle_ping(&mut self, message: Message) {
        let Some(server) = message.parameters.first() else {
            return;
        };
        let pong = format!("PONG :{server}");
        self.send_line(&pong);
    }

    fn membership_from(&self, message: &Message) -> Option<Membership> {
        let channel = message.parameters.first()?;
        if channel.len() < 2 {
            return None;
        }
        let nickname = message.nickname()?;
        if is_anonymous_nickname(nickname) {
            return None;
        }
        Some(Membership {
            channel: channel[1..].to_string(),
            user: nickname.to_string(),
        })
    }

    fn handle_join(&mut self, message: Message) {
        let Some(membership) = self.membership_from(&message) else {
            return;
        };
        self.sink.event(Event::Join(membership));
    }

    fn handle_part(&mut self, message: Message) {
        let Some(membership) = self.membership_from(&message) else {
            return;
        };
        self.sink.event(Event::Leave(membership));
    }

    fn handle_privmsg(&mut self, message: Message) {
        if message.parameters.len() < 2 {
            return;
        }
        let user = message.nickname().unwrap_or_default().to_string();
        let trailer = &message.parameters[1];
        let (content, is_action) = match action_content(trailer) {
            Some(content) => (content.to_string(), true),
            None => (trailer.clone(), false),
        };
        let bits = message
            .tags
            .get("bits")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        let info = ChatMessage {
            channel: String::new(),
            user,
            content,
            is_action,
            message_id: message.tags.id.clone(),
            bits,
            tags: message.tags.clone(),
        };
        // A target without the '#' sigil is a private message to us rather
        // than channel chat.
        match message.parameters[0].strip_prefix('#') {
            Some(channel) => self.sink.event(Event::Message(ChatMessage {
                channel: channel.to_string(),
                ..info
            })),
            None => self.sink.event(Event::PrivateMessage(info)),
        }
    }

    fn handle_whisper(&mut self, message: Message) {
        if message.parameters.len() < 2 {
            return;
        }
        let user = message.nickname().unwrap_or_default().to_string();
        self.sink.event(Event::Whisper(Whisper {
            user,
            message: message.parameters[1].clone(),
            tags: message.tags,
        }));
    }

    fn handle_notice(&mut self, message: Message) {
        if message.parameters.len() < 2 {
            return;
        }
        let notice_text = message.parameters[1].clone();
        let channel = (message.parameters[0] != "*").then(|| {
            message.parameters[0]
                .get(1..)
                .unwrap_or_default()
                .to_string()
        });
        let id = message.tags.get("msg-id").unwrap_or_default().to_string();
        self.sink.event(Event::Notice(Notice {
            id,
            message: notice_text.clone(),
            channel,
        }));
        if !self.logged_in
            && (notice_text == "Login unsuccessful" || notice_text == "Login authentication failed")
        {
            tracing::warn!(session.id = %self.session_id, "authentication rejected by server");
            // The server closes the connection after a failed log-in; we
            // only discard the wait for the MOTD.
            self.sink.event(Event::LoggedOut);
            self.process_pending(|_, action| match action.phase {
                LoginPhase::AwaitMotd => None,
                _ => Some(action),
            });
        }
    }

    fn handle_host_target(&mut self, message: Message) {
        if message.parameters.len() < 2 || message.parameters[0].len() < 2 {
            return;
        }
        let hosting = message.parameters[0][1..].to_string();
        let mut parts = message.parameters[1].split(' ');
        let target = parts.next().unwrap_or("-");
        let (on, being_hosted) = if target == "-" {
            (false, None)
        } else {
            (true, Some(target.to_string()))
        };
        let viewers = parts
            .next()
            .and_then(|viewers| viewers.parse().ok())
            .unwrap_or(0);
        self.sink.event(Event::Host(Host {
            on,
            hosting,
            being_hosted,
            viewers,
        }));
    }

    fn handle_room_state(&mut self, message: Message) {
        if message.parameters.is_empty() || message.parameters[0].len() < 2 {
            return;
        }
        let channel = message.parameters[0][1..].to_string();
        for mode in ROOM_MODES {
            if let Some(value) = message.tags.get(mode) {
                self.sink.event(Event::RoomMode(RoomModeChange {
                    channel: channel.clone(),
                    channel_id: message.tags.channel_id,
                    mode: mode.to_string(),
                    parameter: value.parse().unwrap_or(0),
                }));
            }
        }
    }

    fn handle_clear_chat(&mut self, message: Message) {
        if message.parameters.is_empty() || message.parameters[0].len() < 2 {
            return;
        }
        let mut clear = Clear {
            kind: ClearKind::All,
            channel: message.parameters[0][1..].to_string(),
            user: String::new(),
            reason: String::new(),
            offending_message_id: String::new(),
            offending_message_content: String::new(),
            duration: 0,
            tags: message.tags.clone(),
        };
        if let Some(user) = message.parameters.get(1) {
            clear.user = user.clone();
            if let Some(reason) = message.tags.get("ban-reason") {
                clear.reason = unescape_tag_value(reason);
            }
            // A ban duration makes it a timeout; without one the user was
            // permanently banned.
            match message.tags.get("ban-duration") {
                Some(duration) => {
                    clear.kind = ClearKind::Timeout;
                    clear.duration = duration.parse().unwrap_or(0);
                }
                None => clear.kind = ClearKind::Ban,
            }
        }
        self.sink.event(Event::Clear(clear));
    }

    fn handle_clear_message(&mut self, message: Message) {
        if message.parameters.len() < 2 || message.parameters[0].len() < 2 {
            return;
        }
        let clear = Clear {
            kind: ClearKind::Message,
            channel: message.parameters[0][1..].to_string(),
            user: message.tags.get("login").unwrap_or_default().to_string(),
            reason: String::new(),
            offending_message_id: message
                .tags
                .get("target-msg-id")
                .unwrap_or_default()
                .to_string(),
            offending_message_content: message.parameters[1].clone(),
            duration: 0,
            tags: message.tags.clone(),
        };
        self.sink.event(Event::Clear(clear));
    }

    fn handle_mode(&mut self, message: Message) {
        if message.parameters.len() < 3
            || message.parameters[0].len() < 2
            || message.parameters[1].len() < 2
        {
            return;
        }
        let moderator = match message.parameters[1].as_str() {
            "+o" => true,
            "-o" => false,
            _ => return,
        };
        self.sink.event(Event::Mod(ModChange {
            channel: message.parameters[0][1..].to_string(),
            user: message.parameters[2].clone(),
            moderator,
        }));
    }

    fn handle_global_user_state(&mut self, message: Message) {
        self.sink.event(Event::UserState(UserState {
            global: true,
            channel: String::new(),
            tags: message.tags,
        }));
    }

    fn handle_user_state(&mut self, message: Message) {
        if message.parameters.is_empty() || message.parameters[0].len() < 2 {
            return;
        }
        self.sink.event(Event::UserState(UserState {
            global: false,
            channel: message.parameters[0][1..].to_string(),
            tags: message.tags,
        }));
    }

    fn handle_reconnect(&mut self, _message: Message) {
        tracing::info!(session.id = %self.session_id, "server requested a reconnect");
        self.sink.event(Event::Doom);
    }

    fn handle_user_notice(&mut self, message: Message) {
        if message.parameters.is_empty() || message.parameters[0].len() < 2 {
            return;
        }
        let Some(message_id) = message.tags.get("msg-id") else {
            return;
        };
        let channel = message.parameters[0][1..].to_string();
        let user = message.tags.get("login").unwrap_or_default().to_string();
        let system_message = message
            .tags
            .get("system-msg")
            .map(unescape_tag_value)
            .unwrap_or_default();
        match message_id {
            "ritual" => {
                let ritual = Ritual {
                    channel,
                    user,
                    ritual: message
                        .tags
                        .get("msg-param-ritual-name")
                        .unwrap_or_default()
                        .to_string(),
                    system_message,
                    tags: message.tags.clone(),
                };
                self.sink.event(Event::Ritual(ritual));
            }
            "raid" => {
                let raid = Raid {
                    channel,
                    raider: user,
                    viewers: message
                        .tags
                        .get("msg-param-viewerCount")
                        .and_then(|viewers| viewers.parse().ok())
                        .unwrap_or(0),
                    system_message,
                    tags: message.tags.clone(),
                };
                self.sink.event(Event::Raid(raid));
            }
            _ => self.handle_sub_notice(message, channel, user, system_message),
        }
    }

    fn handle_sub_notice(
        &mut self,
        message: Message,
        channel: String,
        user: String,
        system_message: String,
    ) {
        let tag_number = |name: &str| -> u64 {
            message
                .tags
                .get(name)
                .and_then(|value| value.parse().ok())
                .unwrap_or(0)
        };
        let mut sub = Sub {
            kind: SubKind::Unknown,
            channel,
            user,
            recipient_display_name: String::new(),
            recipient_user_name: String::new(),
            recipient_id: 0,
            mass_gift_count: 0,
            sender_count: 0,
            months: 0,
            user_message: message.parameters.get(1).cloned().unwrap_or_default(),
            system_message,
            plan_name: message
                .tags
                .get("msg-param-sub-plan-name")
                .map(unescape_tag_value)
                .unwrap_or_default(),
            plan_id: tag_number("msg-param-sub-plan"),
            tags: message.tags.clone(),
        };
        match message.tags.get("msg-id").unwrap_or_default() {
            "sub" => sub.kind = SubKind::New,
            "resub" => {
                sub.kind = SubKind::Resub;
                sub.months = tag_number("msg-param-months");
            }
            "subgift" => {
                sub.kind = SubKind::Gifted;
                sub.recipient_display_name = message
                    .tags
                    .get("msg-param-recipient-display-name")
                    .unwrap_or_default()
                    .to_string();
                sub.recipient_user_name = message
                    .tags
                    .get("msg-param-recipient-user-name")
                    .unwrap_or_default()
                    .to_string();
                sub.recipient_id = tag_number("msg-param-recipient-id");
                sub.sender_count = tag_number("msg-param-sender-count");
            }
            "submysterygift" => {
                sub.kind = SubKind::MysteryGift;
                sub.mass_gift_count = tag_number("msg-param-mass-gift-count");
                sub.sender_count = tag_number("msg-param-sender-count");
            }
            _ => {}
        }
        self.sink.event(Event::Sub(sub));
    }
}

/// The worker loop. Owns the session state exclusively; callers and
/// transport callbacks reach it only through the action channel. While
/// handshake phases are pending and a clock is configured, the receive is
/// bounded so the timeout sweep runs at a steady cadence.
pub(crate) async fn run_session(mut session: Session) {
    tracing::debug!(session.id = %session.session_id, "session worker started");
    loop {
        session.process_timeouts();
        let next = if session.sweep_enabled() {
            match tokio::time::timeout(TIMEOUT_SWEEP_INTERVAL, session.receiver.recv()).await {
                Ok(action) => action,
                Err(_) => continue,
            }
        } else {
            session.receiver.recv().await
        };
        let Some(action) = next else {
            break;
        };
        if !session.perform(action) {
            break;
        }
        // A response can only arrive while a connection is held.
        if session.connection.is_none() {
            session.pending.clear();
        }
    }
    session.disconnect(None);
    tracing::debug!(session.id = %session.session_id, "session worker stopped");
}
