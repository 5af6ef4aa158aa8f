use std::fmt;
use std::io;

/// The point of the SMTP session at which the server refused to continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Greeting,
    Hello,
    StartTls,
    Auth,
    Mail,
    Rcpt(String),
    Data,
    Quit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Greeting => f.write_str("greeting"),
            Stage::Hello => f.write_str("EHLO/HELO"),
            Stage::StartTls => f.write_str("STARTTLS"),
            Stage::Auth => f.write_str("AUTH"),
            Stage::Mail => f.write_str("MAIL FROM"),
            Stage::Rcpt(addr) => write!(f, "RCPT TO <{}>", addr),
            Stage::Data => f.write_str("DATA"),
            Stage::Quit => f.write_str("QUIT"),
        }
    }
}

/// Errors produced while composing or delivering a message.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Neither a `Sender` nor a `From` header is present.
    #[error(r#"invalid message, "From" field is absent"#)]
    MissingFrom,
    /// No `To`, `Cc` or `Bcc` header is present.
    #[error("no recipients specified")]
    NoRecipients,
    /// The message has headers but no body part.
    #[error("invalid message, body is absent")]
    EmptyBody,
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The template collaborator could not produce the message blocks.
    #[error("template error: {0}")]
    Template(#[source] anyhow::Error),

    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("connection to {0} timed out")]
    Timeout(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("TLS error: {0}")]
    Tls(String),
    /// The server hung up, typically because an idle connection expired.
    #[error("connection closed unexpectedly")]
    ConnectionClosed,

    /// The server answered with a 4xx/5xx reply.
    #[error("{stage} rejected: {code} {message}")]
    Rejected {
        stage: Stage,
        code: u16,
        message: String,
    },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("malformed SMTP reply: {0}")]
    Protocol(String),

    #[error("could not write message: {0}")]
    Message(#[source] io::Error),

    #[error("could not send email {index}: {source}")]
    Batch {
        index: usize,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Returns `true` for failures caused by the network rather than by the
    /// message or the server's policy, which are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Connect { .. }
            | Error::Timeout(_)
            | Error::Io(_)
            | Error::Tls(_)
            | Error::ConnectionClosed => true,
            Error::Batch { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Returns `true` if the peer closed the stream.
    pub fn is_eof(&self) -> bool {
        match self {
            Error::ConnectionClosed => true,
            Error::Io(err) => err.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
