//! Compose MIME email messages and deliver them over SMTP.

#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unstable_features,
    unused_import_braces
)]

mod address;
mod config;
mod encoder;
mod envelope;
mod error;
mod header;
mod mailer;
mod message;
mod mimeheader;
mod sender;
mod writer;

pub mod rfc5322;
pub mod smtp;
pub mod template;

pub use self::address::*;
pub use self::config::MailerConfig;
pub use self::encoder::WordEncoder;
pub use self::envelope::*;
pub use self::error::{Error, Result, Stage};
pub use self::header::*;
pub use self::mailer::{Mailer, Transport, MAX_ATTEMPTS, RETRY_DELAY};
pub use self::message::*;
pub use self::mimeheader::*;
pub use self::sender::{send, SendCloser, Sender};
pub use self::smtp::Dialer;
pub use self::template::{HandlebarsRenderer, RenderedEmail, TemplateRenderer};
