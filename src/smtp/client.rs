//! SMTP protocol client over plain TCP or TLS.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use super::auth::{Authenticator, ServerInfo};
use super::response::Reply;
use crate::error::{Error, Result, Stage};

/// Initial size of the reply buffer.
const BUFFER_SIZE: usize = 8192;

/// Replies larger than this are rejected.
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// The protocol operations a [`Dialer`](super::Dialer) drives.
///
/// `hello` may only be called before any other command; every other method
/// greets the server with `EHLO` first if that has not happened yet.
#[async_trait]
pub trait Client: Send {
    /// Greets the server as `local_name` instead of `localhost`.
    async fn hello(&mut self, local_name: &str) -> Result<()>;
    /// Returns the parameters of an extension the server advertised.
    async fn extension(&mut self, name: &str) -> Result<Option<String>>;
    /// Upgrades the connection to TLS.
    async fn starttls(&mut self, config: Arc<ClientConfig>) -> Result<()>;
    async fn auth(&mut self, auth: &dyn Authenticator) -> Result<()>;
    async fn mail(&mut self, from: &str) -> Result<()>;
    async fn rcpt(&mut self, to: &str) -> Result<()>;
    /// Transmits a complete message, dot-stuffed, and waits for acceptance.
    async fn data(&mut self, message: &[u8]) -> Result<()>;
    async fn quit(&mut self) -> Result<()>;
    /// Closes the connection without a `QUIT`.
    async fn close(&mut self) -> Result<()>;
}

/// Root store of well-known CAs, used when no TLS configuration is given.
pub fn default_tls_config() -> Arc<ClientConfig> {
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    )
}

/// Performs a TLS handshake with `host` over an established TCP stream.
pub async fn tls_handshake(
    tcp: TcpStream,
    host: &str,
    config: Arc<ClientConfig>,
) -> Result<TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| Error::Tls(format!("invalid server name {:?}: {}", host, e)))?;
    TlsConnector::from(config)
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::Tls(format!("handshake with {} failed: {}", host, e)))
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Stream::Plain(s) => s.write_all(data).await?,
            Stream::Tls(s) => s.write_all(data).await?,
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        match self {
            Stream::Plain(s) => s.flush().await?,
            Stream::Tls(s) => s.flush().await?,
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Stream::Plain(s) => s.read(buf).await?,
            Stream::Tls(s) => s.read(buf).await?,
        };
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        Ok(n)
    }

    async fn shutdown(&mut self) -> Result<()> {
        match self {
            Stream::Plain(s) => s.shutdown().await?,
            Stream::Tls(s) => s.shutdown().await?,
        }
        Ok(())
    }
}

/// A client session with an SMTP server.
pub struct SmtpClient {
    stream: Option<Stream>,
    server_name: String,
    local_name: String,
    tls: bool,
    did_hello: bool,
    /// Extensions from the last `EHLO`, keyed by upper-case name. `None`
    /// after a `HELO` fallback.
    extensions: Option<HashMap<String, String>>,
    auth: Vec<String>,
    buffer: Vec<u8>,
    buffer_pos: usize,
}

impl std::fmt::Debug for SmtpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SmtpClient")
            .field("server_name", &self.server_name)
            .field("local_name", &self.local_name)
            .field("tls", &self.tls)
            .field("connected", &self.stream.is_some())
            .field("extensions", &self.extensions)
            .finish()
    }
}

impl SmtpClient {
    /// Starts a session over a plain connection and reads the greeting.
    pub async fn new(stream: TcpStream, host: &str) -> Result<SmtpClient> {
        SmtpClient::start(Stream::Plain(stream), host, false).await
    }

    /// Starts a session over an implicit TLS connection and reads the
    /// greeting.
    pub async fn new_tls(stream: TlsStream<TcpStream>, host: &str) -> Result<SmtpClient> {
        SmtpClient::start(Stream::Tls(Box::new(stream)), host, true).await
    }

    async fn start(stream: Stream, host: &str, tls: bool) -> Result<SmtpClient> {
        let mut client = SmtpClient {
            stream: Some(stream),
            server_name: host.to_string(),
            local_name: "localhost".to_string(),
            tls,
            did_hello: false,
            extensions: None,
            auth: Vec::new(),
            buffer: vec![0; BUFFER_SIZE],
            buffer_pos: 0,
        };

        let greeting = match client.read_reply().await {
            Ok(reply) => reply.expect(&[220], Stage::Greeting),
            Err(err) => Err(err),
        };
        match greeting {
            Ok(reply) => {
                info!(host, greeting = %reply.message(), "connected to SMTP server");
                Ok(client)
            }
            Err(err) => {
                if let Err(close_err) = client.close().await {
                    warn!(host, error = %close_err, "could not close SMTP connection");
                }
                Err(err)
            }
        }
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    async fn ensure_hello(&mut self) -> Result<()> {
        if self.did_hello {
            return Ok(());
        }
        match self.ehlo().await {
            Ok(()) => {}
            Err(Error::Rejected { .. }) => self.helo().await?,
            Err(err) => return Err(err),
        }
        self.did_hello = true;
        Ok(())
    }

    async fn ehlo(&mut self) -> Result<()> {
        let line = format!("EHLO {}", self.local_name);
        let reply = self.command(&line).await?.expect(&[250], Stage::Hello)?;

        let mut extensions = HashMap::new();
        self.auth.clear();
        for line in reply.lines.iter().skip(1) {
            let mut words = line.splitn(2, ' ');
            let name = words.next().unwrap_or("").to_ascii_uppercase();
            let params = words.next().unwrap_or("").to_string();
            if name == "AUTH" {
                self.auth = params.split_whitespace().map(str::to_string).collect();
            }
            extensions.insert(name, params);
        }
        self.extensions = Some(extensions);
        Ok(())
    }

    async fn helo(&mut self) -> Result<()> {
        self.extensions = None;
        let line = format!("HELO {}", self.local_name);
        self.command(&line).await?.expect(&[250], Stage::Hello)?;
        Ok(())
    }

    fn has_extension(&self, name: &str) -> bool {
        self.extensions
            .as_ref()
            .map_or(false, |ext| ext.contains_key(name))
    }

    async fn command(&mut self, line: &str) -> Result<Reply> {
        debug!("C: {}", line);
        self.send_line(line).await?;
        self.read_reply().await
    }

    /// Like [`SmtpClient::command`], without logging the line itself.
    async fn secret_command(&mut self, line: &str, shown: &str) -> Result<Reply> {
        debug!("C: {}", shown);
        self.send_line(line).await?;
        self.read_reply().await
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::ConnectionClosed)?;
        stream.write_all(format!("{}\r\n", line).as_bytes()).await?;
        stream.flush().await
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        loop {
            if let Some((reply, consumed)) = Reply::parse_reply(&self.buffer[..self.buffer_pos])? {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;
                for line in &reply.lines {
                    debug!("S: {} {}", reply.code, line);
                }
                return Ok(reply);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(Error::Protocol(format!(
                        "reply exceeds {} bytes",
                        MAX_BUFFER_SIZE
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let stream = self.stream.as_mut().ok_or(Error::ConnectionClosed)?;
            let n = stream.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }

    async fn auth_exchange(&mut self, auth: &dyn Authenticator) -> Result<()> {
        let server = ServerInfo {
            name: self.server_name.clone(),
            tls: self.tls,
            auth: self.auth.clone(),
        };
        let (mechanism, initial) = auth.start(&server)?;

        let mut line = format!("AUTH {}", mechanism);
        if let Some(initial) = initial {
            line.push(' ');
            line.push_str(&STANDARD.encode(initial));
        }
        let mut reply = self
            .secret_command(line.trim_end(), &format!("AUTH {} ****", mechanism))
            .await?;

        loop {
            let (challenge, more) = match reply.code {
                334 => {
                    let decoded = STANDARD
                        .decode(reply.message().trim())
                        .map_err(|e| Error::Auth(format!("malformed challenge: {}", e)));
                    match decoded {
                        Ok(challenge) => (challenge, true),
                        Err(err) => return self.abort_auth(err).await,
                    }
                }
                235 => (reply.message().into_bytes(), false),
                code => {
                    return Err(Error::Rejected {
                        stage: Stage::Auth,
                        code,
                        message: reply.message(),
                    })
                }
            };

            let response = match auth.next(&challenge, more) {
                Ok(Some(response)) => response,
                Ok(None) if more => Vec::new(),
                Ok(None) => return Ok(()),
                Err(err) => return self.abort_auth(err).await,
            };
            reply = self
                .secret_command(&STANDARD.encode(response), "****")
                .await?;
        }
    }

    /// Cancels an exchange the client cannot continue.
    async fn abort_auth(&mut self, err: Error) -> Result<()> {
        if let Err(cancel_err) = self.command("*").await {
            warn!(error = %cancel_err, "could not cancel AUTH exchange");
        }
        Err(err)
    }
}

#[async_trait]
impl Client for SmtpClient {
    async fn hello(&mut self, local_name: &str) -> Result<()> {
        if local_name.contains(['\r', '\n']) {
            return Err(Error::Protocol(
                "local name must not contain line breaks".to_string(),
            ));
        }
        if self.did_hello {
            return Err(Error::Protocol(
                "hello called after other methods".to_string(),
            ));
        }
        self.local_name = local_name.to_string();
        self.ensure_hello().await
    }

    async fn extension(&mut self, name: &str) -> Result<Option<String>> {
        self.ensure_hello().await?;
        Ok(self
            .extensions
            .as_ref()
            .and_then(|ext| ext.get(&name.to_ascii_uppercase()))
            .cloned())
    }

    async fn starttls(&mut self, config: Arc<ClientConfig>) -> Result<()> {
        self.ensure_hello().await?;
        self.command("STARTTLS")
            .await?
            .expect(&[220], Stage::StartTls)?;

        let tcp = match self.stream.take() {
            Some(Stream::Plain(tcp)) => tcp,
            Some(tls @ Stream::Tls(_)) => {
                self.stream = Some(tls);
                return Err(Error::Tls("connection is already encrypted".to_string()));
            }
            None => return Err(Error::ConnectionClosed),
        };
        let tls = tls_handshake(tcp, &self.server_name, config).await?;
        self.stream = Some(Stream::Tls(Box::new(tls)));
        self.tls = true;
        info!(host = %self.server_name, "STARTTLS upgrade successful");

        self.ehlo().await
    }

    async fn auth(&mut self, auth: &dyn Authenticator) -> Result<()> {
        self.ensure_hello().await?;
        self.auth_exchange(auth).await
    }

    async fn mail(&mut self, from: &str) -> Result<()> {
        self.ensure_hello().await?;
        let mut line = format!("MAIL FROM:<{}>", from);
        if self.has_extension("8BITMIME") {
            line.push_str(" BODY=8BITMIME");
        }
        self.command(&line).await?.expect(&[250], Stage::Mail)?;
        Ok(())
    }

    async fn rcpt(&mut self, to: &str) -> Result<()> {
        let line = format!("RCPT TO:<{}>", to);
        self.command(&line)
            .await?
            .expect(&[250, 251], Stage::Rcpt(to.to_string()))?;
        Ok(())
    }

    async fn data(&mut self, message: &[u8]) -> Result<()> {
        self.command("DATA").await?.expect(&[354], Stage::Data)?;

        let payload = dot_stuff(message);
        debug!("C: <{} bytes of message data>", payload.len());
        let stream = self.stream.as_mut().ok_or(Error::ConnectionClosed)?;
        stream.write_all(&payload).await?;
        stream.write_all(b".\r\n").await?;
        stream.flush().await?;

        self.read_reply().await?.expect(&[250], Stage::Data)?;
        Ok(())
    }

    async fn quit(&mut self) -> Result<()> {
        self.command("QUIT").await?.expect(&[221], Stage::Quit)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.take() {
            Some(mut stream) => stream.shutdown().await,
            None => Ok(()),
        }
    }
}

/// Doubles the leading dot of every line and makes sure the payload ends
/// with CRLF, so it can be followed by the `.` terminator.
pub(crate) fn dot_stuff(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 16);
    let mut at_line_start = true;
    for &b in message {
        if at_line_start && b == b'.' {
            out.push(b'.');
        }
        out.push(b);
        at_line_start = b == b'\n';
    }
    if !out.ends_with(b"\r\n") {
        if out.ends_with(b"\r") {
            out.push(b'\n');
        } else {
            out.extend_from_slice(b"\r\n");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_stuff() {
        struct DotTest<'s> {
            input: &'s [u8],
            expected: &'s [u8],
        }

        let tests = vec![
            DotTest {
                input: b"Hello",
                expected: b"Hello\r\n",
            },
            DotTest {
                input: b"Hello\r\n",
                expected: b"Hello\r\n",
            },
            DotTest {
                input: b".hidden\r\nnormal\r\n..double\r\n",
                expected: b"..hidden\r\nnormal\r\n...double\r\n",
            },
            DotTest {
                input: b"a\r\n.",
                expected: b"a\r\n..\r\n",
            },
            DotTest {
                input: b"",
                expected: b"\r\n",
            },
        ];

        for test in tests.into_iter() {
            assert_eq!(dot_stuff(test.input), test.expected);
        }
    }
}
