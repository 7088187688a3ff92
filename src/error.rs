//! Error types for the comment thread client.
//!
//! Every failure, whether it happens while fetching a key, on the network, or
//! inside the comment protocol, surfaces as one [`Error`] envelope. Callers
//! match on [`Error::kind`] instead of probing ad-hoc fields.

use std::fmt;

use serde_json::Value;

/// Result type used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required key (thread, post or reaction token) could not be obtained.
    KeyFetchFailed,
    /// No usable response from the remote service.
    TransportFailure,
    /// A response arrived but its protocol status signals failure.
    ProtocolFailure,
    /// The reaction already exists server-side. Not fatal.
    AlreadyDone,
    /// The operation's single retry was spent and it still failed.
    Terminal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::KeyFetchFailed => "key fetch failed",
            ErrorKind::TransportFailure => "transport failure",
            ErrorKind::ProtocolFailure => "protocol failure",
            ErrorKind::AlreadyDone => "already done",
            ErrorKind::Terminal => "terminal failure",
        };
        f.write_str(name)
    }
}

/// Server-assigned failure code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Numeric status (legacy `status` / `resultcode`, or a `meta.status`).
    Status(i64),
    /// Symbolic code from the unified protocol (`meta.errorCode`).
    Named(String),
}

impl ErrorCode {
    /// Numeric value, if this is a [`ErrorCode::Status`].
    pub fn as_status(&self) -> Option<i64> {
        match self {
            ErrorCode::Status(status) => Some(*status),
            ErrorCode::Named(_) => None,
        }
    }

    /// Symbolic value, if this is a [`ErrorCode::Named`].
    pub fn as_name(&self) -> Option<&str> {
        match self {
            ErrorCode::Named(name) => Some(name),
            ErrorCode::Status(_) => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Status(status) => write!(f, "{status}"),
            ErrorCode::Named(name) => f.write_str(name),
        }
    }
}

/// Whatever produced an [`Error`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Cause {
    /// The raw (decoded) response the server sent.
    #[error("server response: {0}")]
    Response(Value),

    /// A lower-level error reported as text (network, XML, charset).
    #[error("{0}")]
    Io(String),

    /// An earlier failure this error wraps.
    #[error(transparent)]
    Inner(Box<Error>),
}

/// The operation an error is reported for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Loading a thread.
    Load,
    /// Posting a comment.
    Post,
    /// Submitting a reaction.
    React,
}

impl Operation {
    fn failure_message(self) -> &'static str {
        match self {
            Operation::Load => "comment server communication failed",
            Operation::Post => "comment post failed",
            Operation::React => "reaction failed",
        }
    }
}

/// The single error envelope of this crate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    code: Option<ErrorCode>,
    message: String,
    #[source]
    cause: Option<Cause>,
}

impl Error {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
            cause: None,
        }
    }

    /// Network-level failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportFailure, message)
    }

    /// Protocol-level failure.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolFailure, message)
    }

    /// Key acquisition failure.
    pub fn key_fetch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::KeyFetchFailed, message)
    }

    /// Attach a server code.
    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a cause.
    pub fn with_cause(mut self, cause: Cause) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Attach the raw server response as cause.
    pub fn with_response(self, response: Value) -> Self {
        self.with_cause(Cause::Response(response))
    }

    /// Terminal failure of `operation` after its retry budget ran out.
    ///
    /// The last attempt's code is carried over so callers can still see what
    /// the server said.
    pub fn exhausted(operation: Operation, last: Error) -> Self {
        Self::terminal(operation, last)
    }

    /// Terminal failure of `operation` the server refused outright, with no
    /// retry attempted. Code and cause are kept as in [`Error::exhausted`].
    pub fn rejected(operation: Operation, last: Error) -> Self {
        Self::terminal(operation, last)
    }

    fn terminal(operation: Operation, last: Error) -> Self {
        Self {
            kind: ErrorKind::Terminal,
            code: last.code.clone(),
            message: operation.failure_message().to_string(),
            cause: Some(Cause::Inner(Box::new(last))),
        }
    }

    /// Report `self` under the message of `operation`, keeping kind and code.
    pub fn in_context(self, operation: Operation) -> Self {
        let message = format!("{}: {}", operation.failure_message(), self.message);
        Self { message, ..self }
    }

    /// Failure category.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Server code, when one was reported.
    pub fn code(&self) -> Option<&ErrorCode> {
        self.code.as_ref()
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Underlying cause, if any.
    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    /// True for the non-fatal "reaction already exists" outcome.
    pub fn is_already_done(&self) -> bool {
        self.kind == ErrorKind::AlreadyDone
    }

    /// True once an operation has given up.
    pub fn is_terminal(&self) -> bool {
        self.kind == ErrorKind::Terminal
    }
}
