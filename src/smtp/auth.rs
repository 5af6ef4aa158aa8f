//! SMTP authentication mechanisms (RFC 4954).
//!
//! A mechanism is driven by the client: [`Authenticator::start`] names the
//! mechanism and an optional initial response, then every server challenge
//! is passed to [`Authenticator::next`] until it returns `None`.

use std::fmt;

use hmac::{Hmac, Mac};

use crate::error::{Error, Result};

type HmacMd5 = Hmac<md5::Md5>;

/// What the client knows about the server when authentication starts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerInfo {
    /// Host name the client connected to.
    pub name: String,
    /// Whether the connection is encrypted.
    pub tls: bool,
    /// Mechanisms advertised in the `AUTH` extension.
    pub auth: Vec<String>,
}

impl ServerInfo {
    fn advertises(&self, mechanism: &str) -> bool {
        self.auth.iter().any(|m| m.eq_ignore_ascii_case(mechanism))
    }
}

/// A SASL mechanism usable with the `AUTH` command.
pub trait Authenticator: fmt::Debug + Send + Sync {
    /// Returns the mechanism name and the initial response, if any.
    fn start(&self, server: &ServerInfo) -> Result<(String, Option<Vec<u8>>)>;

    /// Answers a decoded server challenge. `more` is false once the server
    /// accepted the exchange. Returning `None` ends the exchange.
    fn next(&self, challenge: &[u8], more: bool) -> Result<Option<Vec<u8>>>;
}

/// Mechanisms implemented by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    Plain,
    Login,
    CramMd5,
}

impl Mechanism {
    /// Picks a mechanism from the parameters of the `AUTH` extension.
    ///
    /// CRAM-MD5 is preferred, then LOGIN when PLAIN is not offered, then
    /// PLAIN.
    pub fn select(advertised: &str) -> Mechanism {
        let offers = |name: &str| {
            advertised
                .split_whitespace()
                .any(|m| m.eq_ignore_ascii_case(name))
        };

        if offers("CRAM-MD5") {
            Mechanism::CramMd5
        } else if offers("LOGIN") && !offers("PLAIN") {
            Mechanism::Login
        } else {
            Mechanism::Plain
        }
    }

    /// Builds the authenticator for this mechanism.
    pub fn authenticator(self, username: &str, password: &str, host: &str) -> Box<dyn Authenticator> {
        match self {
            Mechanism::Plain => Box::new(PlainAuth::new("", username, password, host)),
            Mechanism::Login => Box::new(LoginAuth::new(username, password, host)),
            Mechanism::CramMd5 => Box::new(CramMd5Auth::new(username, password)),
        }
    }
}

fn is_localhost(name: &str) -> bool {
    name == "localhost" || name == "127.0.0.1" || name == "::1"
}

/// `PLAIN` (RFC 4616). Credentials are only sent over TLS, or to localhost.
#[derive(Clone)]
pub struct PlainAuth {
    identity: String,
    username: String,
    password: String,
    host: String,
}

impl PlainAuth {
    pub fn new(identity: &str, username: &str, password: &str, host: &str) -> PlainAuth {
        PlainAuth {
            identity: identity.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            host: host.to_string(),
        }
    }
}

impl fmt::Debug for PlainAuth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PlainAuth")
            .field("identity", &self.identity)
            .field("username", &self.username)
            .field("host", &self.host)
            .finish()
    }
}

impl Authenticator for PlainAuth {
    fn start(&self, server: &ServerInfo) -> Result<(String, Option<Vec<u8>>)> {
        if !server.tls && !is_localhost(&server.name) {
            return Err(Error::Auth("unencrypted connection".to_string()));
        }
        if server.name != self.host {
            return Err(Error::Auth("wrong host name".to_string()));
        }
        let response = format!("{}\x00{}\x00{}", self.identity, self.username, self.password);
        Ok(("PLAIN".to_string(), Some(response.into_bytes())))
    }

    fn next(&self, challenge: &[u8], more: bool) -> Result<Option<Vec<u8>>> {
        if more {
            return Err(unexpected_challenge(challenge));
        }
        Ok(None)
    }
}

/// `LOGIN`, answering the `Username:` and `Password:` prompts in turn.
#[derive(Clone)]
pub struct LoginAuth {
    username: String,
    password: String,
    host: String,
}

impl LoginAuth {
    pub fn new(username: &str, password: &str, host: &str) -> LoginAuth {
        LoginAuth {
            username: username.to_string(),
            password: password.to_string(),
            host: host.to_string(),
        }
    }
}

impl fmt::Debug for LoginAuth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LoginAuth")
            .field("username", &self.username)
            .field("host", &self.host)
            .finish()
    }
}

impl Authenticator for LoginAuth {
    fn start(&self, server: &ServerInfo) -> Result<(String, Option<Vec<u8>>)> {
        if !server.tls && !server.advertises("LOGIN") {
            return Err(Error::Auth("unencrypted connection".to_string()));
        }
        if server.name != self.host {
            return Err(Error::Auth("wrong host name".to_string()));
        }
        Ok(("LOGIN".to_string(), None))
    }

    fn next(&self, challenge: &[u8], more: bool) -> Result<Option<Vec<u8>>> {
        if !more {
            return Ok(None);
        }
        match challenge {
            b"Username:" => Ok(Some(self.username.clone().into_bytes())),
            b"Password:" => Ok(Some(self.password.clone().into_bytes())),
            _ => Err(unexpected_challenge(challenge)),
        }
    }
}

/// `CRAM-MD5` (RFC 2195). The password never crosses the wire.
#[derive(Clone)]
pub struct CramMd5Auth {
    username: String,
    secret: String,
}

impl CramMd5Auth {
    pub fn new(username: &str, secret: &str) -> CramMd5Auth {
        CramMd5Auth {
            username: username.to_string(),
            secret: secret.to_string(),
        }
    }
}

impl fmt::Debug for CramMd5Auth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CramMd5Auth")
            .field("username", &self.username)
            .finish()
    }
}

impl Authenticator for CramMd5Auth {
    fn start(&self, _server: &ServerInfo) -> Result<(String, Option<Vec<u8>>)> {
        Ok(("CRAM-MD5".to_string(), None))
    }

    fn next(&self, challenge: &[u8], more: bool) -> Result<Option<Vec<u8>>> {
        if !more {
            return Ok(None);
        }
        let mut mac = HmacMd5::new_from_slice(self.secret.as_bytes())
            .map_err(|err| Error::Auth(format!("HMAC error: {}", err)))?;
        mac.update(challenge);
        let digest = hex::encode(mac.finalize().into_bytes());
        Ok(Some(format!("{} {}", self.username, digest).into_bytes()))
    }
}

fn unexpected_challenge(challenge: &[u8]) -> Error {
    Error::Auth(format!(
        "unexpected server challenge: {}",
        String::from_utf8_lossy(challenge)
    ))
}
