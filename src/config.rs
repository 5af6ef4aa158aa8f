use std::fmt;
use std::time::Duration;

use crate::smtp::Dialer;

/// Settings of the outgoing mail server and of the messages sent through it.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde_crate::Deserialize, serde_crate::Serialize),
    serde(crate = "serde_crate", default)
)]
pub struct MailerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Value of the `From` header, e.g. `Greenlight <no-reply@example.com>`.
    pub sender: String,
    /// Name to greet the server with instead of `localhost`.
    pub local_name: Option<String>,
    /// Connect with implicit TLS on port 465 instead of using `STARTTLS`.
    pub ssl: bool,
    /// Time allowed to establish the connection.
    pub timeout: Duration,
}

impl Default for MailerConfig {
    fn default() -> Self {
        MailerConfig {
            host: "localhost".to_string(),
            port: 25,
            username: String::new(),
            password: String::new(),
            sender: String::new(),
            local_name: None,
            ssl: false,
            timeout: Duration::from_secs(5),
        }
    }
}

impl fmt::Debug for MailerConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MailerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"****")
            .field("sender", &self.sender)
            .field("local_name", &self.local_name)
            .field("ssl", &self.ssl)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl MailerConfig {
    /// Builds a [`Dialer`] for the configured server.
    pub fn dialer(&self) -> Dialer {
        let mut dialer = Dialer::new(
            self.host.as_str(),
            self.port,
            self.username.as_str(),
            self.password.as_str(),
        )
        .timeout(self.timeout);
        if self.ssl {
            dialer = dialer.ssl(true);
        }
        if let Some(local_name) = &self.local_name {
            dialer = dialer.local_name(local_name.as_str());
        }
        dialer
    }
}
