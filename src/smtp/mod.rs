//! Delivery of messages over SMTP.

pub mod auth;
pub mod client;
mod dialer;
pub mod response;

pub use self::auth::{Authenticator, CramMd5Auth, LoginAuth, Mechanism, PlainAuth, ServerInfo};
pub use self::client::{Client, SmtpClient};
pub use self::dialer::{Connect, Dialer, SmtpSender, TcpConnector, DEFAULT_TIMEOUT, SSL_PORT};
pub use self::response::Reply;
