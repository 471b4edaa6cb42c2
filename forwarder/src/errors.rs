use std::error::Error as _;
use std::io;

/// Result type alias for forwarding operations
pub type Result<T, E = ForwardError> = std::result::Result<T, E>;

/// Why an attempt never produced an HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection refused or DNS failure
    Connect,
    Timeout,
    /// Connection reset or aborted mid-request
    Reset,
    Unknown,
}

impl TransportErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Reset => "reset",
            TransportErrorKind::Unknown => "unknown",
        }
    }
}

impl From<&reqwest::Error> for TransportErrorKind {
    fn from(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return TransportErrorKind::Timeout;
        }
        if err.is_connect() {
            return TransportErrorKind::Connect;
        }

        let mut source = err.source();
        while let Some(inner) = source {
            if let Some(io_err) = inner.downcast_ref::<io::Error>() {
                return match io_err.kind() {
                    io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof => TransportErrorKind::Reset,
                    io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
                    io::ErrorKind::ConnectionRefused => TransportErrorKind::Connect,
                    _ => TransportErrorKind::Unknown,
                };
            }
            source = inner.source();
        }

        TransportErrorKind::Unknown
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("could not build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Classified failure of a forwarded request. The display strings are what the
/// caller sees under `error` in the response envelope.
#[derive(thiserror::Error, Debug)]
pub enum ForwardError {
    #[error("Invalid JSON response from server")]
    InvalidJson,

    #[error("Request failed - reason: HTTP_{status} {body}")]
    Status { status: u16, body: String },

    #[error("Request failed: {detail}")]
    Transport {
        kind: TransportErrorKind,
        detail: String,
    },

    #[error("Request failed: {0}")]
    Session(#[from] SessionError),
}

impl ForwardError {
    pub fn transport(err: reqwest::Error) -> Self {
        ForwardError::Transport {
            kind: TransportErrorKind::from(&err),
            detail: err.to_string(),
        }
    }
}

/// Errors from the job and admin listeners
#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("session error: {0}")]
    Session(#[from] SessionError),
}
