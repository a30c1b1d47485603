/// One unit of work for the session worker: a caller command, a transport
/// notification, or the teardown signal.
#[derive(Debug)]
pub(crate) enum Action {
    LogIn {
        nickname: String,
        token: String,
        anonymous: bool,
    },
    LogOut {
        farewell: String,
    },
    ProcessReceivedData {
        data: String,
    },
    ServerDisconnected,
    Join {
        channel: String,
    },
    Leave {
        channel: String,
    },
    SendMessage {
        channel: String,
        message: String,
        parent: Option<String>,
    },
    SendWhisper {
        nickname: String,
        message: String,
    },
    Stop,
}

/// The log-in handshake phase a pending action is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoginPhase {
    /// Waiting for the server's capability list (`CAP LS`).
    LogIn,
    /// Waiting for the answer to our capability request (`CAP ACK`/`NAK`).
    RequestCaps,
    /// Waiting for the end of the MOTD (numeric 376).
    AwaitMotd,
}

/// A log-in phase awaiting a server response, kept in submission order.
#[derive(Debug)]
pub(crate) struct PendingAction {
    pub phase: LoginPhase,
    pub nickname: String,
    pub token: String,
    /// Absolute expiration per the configured clock; `None` when no clock
    /// is configured, in which case the action never times out.
    pub expiration: Option<f64>,
}
