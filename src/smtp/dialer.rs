use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_rustls::rustls::ClientConfig;
use tracing::{info, warn};

use super::auth::{Authenticator, Mechanism};
use super::client::{default_tls_config, tls_handshake, Client, SmtpClient};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::sender::{send, SendCloser, Sender};

/// Port of SMTP over implicit TLS (RFC 8314).
pub const SSL_PORT: u16 = 465;

/// Default time allowed to establish the TCP connection.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens a connection to the server of a [`Dialer`] and returns a client
/// that has read the server greeting.
#[async_trait]
pub trait Connect: Send + Sync {
    async fn connect(&self, dialer: &Dialer) -> Result<Box<dyn Client>>;
}

/// Connects over TCP, with implicit TLS when the dialer uses SSL.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connect for TcpConnector {
    async fn connect(&self, dialer: &Dialer) -> Result<Box<dyn Client>> {
        let addr = dialer.addr();
        let tcp = tokio::time::timeout(dialer.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Timeout(addr.clone()))?
            .map_err(|source| Error::Connect {
                addr: addr.clone(),
                source,
            })?;

        let client = if dialer.ssl {
            let tls = tls_handshake(tcp, &dialer.host, dialer.effective_tls_config()).await?;
            SmtpClient::new_tls(tls, &dialer.host).await?
        } else {
            SmtpClient::new(tcp, &dialer.host).await?
        };
        Ok(Box::new(client))
    }
}

/// Connection settings for an SMTP server.
///
/// Dialing connects, greets the server, upgrades to TLS with `STARTTLS` when
/// offered and authenticates when credentials are set. Without an explicit
/// [`Dialer::auth`], the mechanism is chosen from what the server advertises.
#[derive(Clone)]
pub struct Dialer {
    host: String,
    port: u16,
    username: String,
    password: String,
    local_name: Option<String>,
    ssl: bool,
    tls_config: Option<Arc<ClientConfig>>,
    auth: Option<Arc<dyn Authenticator>>,
    timeout: Duration,
    connector: Arc<dyn Connect>,
}

impl fmt::Debug for Dialer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Dialer")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("local_name", &self.local_name)
            .field("ssl", &self.ssl)
            .field("auth", &self.auth)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Dialer {
    /// Creates a dialer. Port 465 implies implicit TLS.
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, password: impl Into<String>) -> Dialer {
        Dialer {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            local_name: None,
            ssl: port == SSL_PORT,
            tls_config: None,
            auth: None,
            timeout: DEFAULT_TIMEOUT,
            connector: Arc::new(TcpConnector),
        }
    }

    /// Host name used in `EHLO`/`HELO` instead of `localhost`.
    pub fn local_name(mut self, local_name: impl Into<String>) -> Dialer {
        self.local_name = Some(local_name.into());
        self
    }

    /// Uses implicit TLS, which also selects port 465. `STARTTLS` is only
    /// attempted without it.
    pub fn ssl(mut self, ssl: bool) -> Dialer {
        self.ssl = ssl;
        if ssl {
            self.port = SSL_PORT;
        }
        self
    }

    pub fn tls_config(mut self, config: Arc<ClientConfig>) -> Dialer {
        self.tls_config = Some(config);
        self
    }

    /// Authenticates with `auth` instead of a mechanism picked from the
    /// server's `AUTH` extension.
    pub fn auth(mut self, auth: impl Authenticator + 'static) -> Dialer {
        self.auth = Some(Arc::new(auth));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Dialer {
        self.timeout = timeout;
        self
    }

    /// Replaces the way connections are opened.
    pub fn connector(mut self, connector: impl Connect + 'static) -> Dialer {
        self.connector = Arc::new(connector);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_ssl(&self) -> bool {
        self.ssl
    }

    pub fn get_timeout(&self) -> Duration {
        self.timeout
    }

    /// `host:port` of the server.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn effective_tls_config(&self) -> Arc<ClientConfig> {
        self.tls_config.clone().unwrap_or_else(default_tls_config)
    }

    fn select_auth(&self, advertised: Option<String>) -> Option<Arc<dyn Authenticator>> {
        if let Some(auth) = &self.auth {
            return Some(auth.clone());
        }
        if self.username.is_empty() {
            return None;
        }
        advertised.map(|mechanisms| {
            let mechanism = Mechanism::select(&mechanisms);
            Arc::from(mechanism.authenticator(&self.username, &self.password, &self.host))
        })
    }

    /// Connects and authenticates to the server.
    pub async fn dial(&self) -> Result<SmtpSender> {
        let mut client = self.connector.connect(self).await?;
        match self.negotiate(client.as_mut()).await {
            Ok(()) => Ok(SmtpSender {
                client,
                dialer: self.clone(),
            }),
            Err(err) => {
                if let Err(close_err) = client.close().await {
                    warn!(addr = %self.addr(), error = %close_err, "could not close SMTP connection");
                }
                Err(err)
            }
        }
    }

    async fn negotiate(&self, client: &mut dyn Client) -> Result<()> {
        if let Some(local_name) = &self.local_name {
            client.hello(local_name).await?;
        }

        if !self.ssl && client.extension("STARTTLS").await?.is_some() {
            client.starttls(self.effective_tls_config()).await?;
        }

        let advertised = if self.auth.is_none() && !self.username.is_empty() {
            client.extension("AUTH").await?
        } else {
            None
        };
        if let Some(auth) = self.select_auth(advertised) {
            client.auth(auth.as_ref()).await?;
        }
        Ok(())
    }

    /// Dials, sends every message and closes the connection.
    ///
    /// A failure to close after the messages were accepted is only logged.
    pub async fn dial_and_send(&self, messages: &[Message]) -> Result<()> {
        let mut sender = self.dial().await?;
        let result = send(&mut sender, messages).await;
        if let Err(err) = sender.close().await {
            warn!(addr = %self.addr(), error = %err, "could not close SMTP connection");
        }
        result
    }
}

/// An authenticated SMTP session obtained from [`Dialer::dial`].
pub struct SmtpSender {
    client: Box<dyn Client>,
    dialer: Dialer,
}

impl fmt::Debug for SmtpSender {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SmtpSender")
            .field("dialer", &self.dialer)
            .finish()
    }
}

impl SmtpSender {
    /// Issues `MAIL FROM`. If the server dropped the connection, dials again
    /// once and retries on the fresh connection.
    async fn mail(&mut self, from: &str) -> Result<()> {
        let mut reconnected = false;
        loop {
            let err = match self.client.mail(from).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            if reconnected || !err.is_eof() {
                return Err(err);
            }

            warn!(addr = %self.dialer.addr(), "connection lost before MAIL FROM, reconnecting");
            reconnected = true;
            match self.dialer.dial().await {
                Ok(fresh) => {
                    if let Err(close_err) = self.client.close().await {
                        warn!(addr = %self.dialer.addr(), error = %close_err, "could not close stale connection");
                    }
                    self.client = fresh.client;
                }
                Err(dial_err) => {
                    warn!(addr = %self.dialer.addr(), error = %dial_err, "reconnect failed");
                    return Err(err);
                }
            }
        }
    }
}

#[async_trait]
impl Sender for SmtpSender {
    async fn send(&mut self, from: &str, to: &[String], msg: &Message) -> Result<()> {
        let data = msg.formatted().map_err(Error::Message)?;

        self.mail(from).await?;
        for addr in to {
            self.client.rcpt(addr).await?;
        }
        self.client.data(&data).await?;

        info!(from, recipients = to.len(), bytes = data.len(), "message accepted");
        Ok(())
    }
}

#[async_trait]
impl SendCloser for SmtpSender {
    /// Says `QUIT`, then closes the connection even if that failed.
    async fn close(&mut self) -> Result<()> {
        let quit = self.client.quit().await;
        let closed = self.client.close().await;
        quit.and(closed)
    }
}
