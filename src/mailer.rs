//! Templated email delivery with a fixed retry policy.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::config::MailerConfig;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::smtp::Dialer;
use crate::template::{HandlebarsRenderer, RenderedEmail, TemplateRenderer};

/// Number of dial and send cycles tried before giving up.
pub const MAX_ATTEMPTS: u32 = 3;

/// Pause between two attempts.
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Delivers messages over a fresh connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, messages: &[Message]) -> Result<()>;
}

#[async_trait]
impl Transport for Dialer {
    async fn deliver(&self, messages: &[Message]) -> Result<()> {
        self.dial_and_send(messages).await
    }
}

/// Sends emails rendered from templates.
///
/// Each call to [`Mailer::send`] renders the template, then tries up to
/// [`MAX_ATTEMPTS`] times to dial and deliver, waiting [`RETRY_DELAY`]
/// between attempts. Only transient transport errors are retried.
#[derive(Debug)]
pub struct Mailer<T = Dialer, R = HandlebarsRenderer> {
    transport: T,
    renderer: R,
    sender: String,
}

impl Mailer {
    /// Creates a mailer for the given server using the embedded templates.
    pub fn new(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        sender: &str,
    ) -> Result<Mailer> {
        Mailer::from_config(&MailerConfig {
            host: host.to_string(),
            port,
            username: username.to_string(),
            password: password.to_string(),
            sender: sender.to_string(),
            ..Default::default()
        })
    }

    pub fn from_config(config: &MailerConfig) -> Result<Mailer> {
        let renderer = HandlebarsRenderer::embedded().map_err(Error::Template)?;
        Ok(Mailer::with_parts(
            config.dialer(),
            renderer,
            config.sender.clone(),
        ))
    }
}

impl<T: Transport, R: TemplateRenderer> Mailer<T, R> {
    pub fn with_parts(transport: T, renderer: R, sender: impl Into<String>) -> Mailer<T, R> {
        Mailer {
            transport,
            renderer,
            sender: sender.into(),
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Builds the message for `recipient`: a plain text body with an HTML
    /// alternative.
    pub fn build_message(&self, recipient: &str, rendered: &RenderedEmail) -> Message {
        let mut msg = Message::new();
        msg.set_header("To", [recipient]);
        msg.set_header("From", [self.sender.as_str()]);
        msg.set_header("Subject", [rendered.subject.as_str()]);
        msg.set_body(mime::TEXT_PLAIN.essence_str(), rendered.plain_body.as_str());
        msg.add_alternative(mime::TEXT_HTML.essence_str(), rendered.html_body.as_str());
        msg
    }

    /// Renders `template_id` with `data` and sends it to `recipient`.
    pub async fn send(
        &self,
        recipient: &str,
        template_id: &str,
        data: &serde_json::Value,
    ) -> Result<()> {
        let rendered = self
            .renderer
            .render(template_id, data)
            .map_err(Error::Template)?;
        let msg = self.build_message(recipient, &rendered);

        let mut attempt = 1;
        loop {
            match self.transport.deliver(std::slice::from_ref(&msg)).await {
                Ok(()) => {
                    info!(recipient, template = template_id, attempt, "email sent");
                    return Ok(());
                }
                Err(err) if attempt < MAX_ATTEMPTS && err.is_transient() => {
                    warn!(
                        recipient,
                        template = template_id,
                        attempt,
                        error = %err,
                        "email delivery failed, retrying"
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(
                        recipient,
                        template = template_id,
                        attempt,
                        error = %err,
                        "email delivery failed"
                    );
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Fails the first `failures` deliveries with `make_err`.
    struct StubTransport {
        failures: u32,
        make_err: fn() -> Error,
        attempts: AtomicU32,
        delivered: Mutex<Vec<String>>,
    }

    impl StubTransport {
        fn new(failures: u32, make_err: fn() -> Error) -> StubTransport {
            StubTransport {
                failures,
                make_err,
                attempts: AtomicU32::new(0),
                delivered: Mutex::new(Vec::new()),
            }
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn deliver(&self, messages: &[Message]) -> Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                return Err((self.make_err)());
            }
            for msg in messages {
                let data = msg.formatted().map_err(Error::Message)?;
                self.delivered
                    .lock()
                    .unwrap()
                    .push(String::from_utf8(data).unwrap());
            }
            Ok(())
        }
    }

    fn connection_closed() -> Error {
        Error::ConnectionClosed
    }

    fn rejected() -> Error {
        Error::Rejected {
            stage: Stage::Rcpt("user@example.com".to_string()),
            code: 550,
            message: "no such user".to_string(),
        }
    }

    fn renderer() -> HandlebarsRenderer {
        let mut r = HandlebarsRenderer::new();
        r.register_template(
            "test.tmpl",
            r#"{{define "subject"}}Test Subject{{end}}
{{define "plainBody"}}Hello, {{name}}!{{end}}
{{define "htmlBody"}}<h1>Hello, {{name}}!</h1>{{end}}"#,
        )
        .unwrap();
        r
    }

    fn mailer(transport: StubTransport) -> Mailer<StubTransport> {
        Mailer::with_parts(transport, renderer(), "sender@example.com")
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let m = mailer(StubTransport::new(2, connection_closed));
        let start = Instant::now();
        m.send("user@example.com", "test.tmpl", &json!({ "name": "John" }))
            .await
            .unwrap();

        assert_eq!(m.transport.attempts(), 3);
        assert!(start.elapsed() >= RETRY_DELAY * 2);

        let delivered = m.transport.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        let parsed = mailparse::parse_mail(delivered[0].as_bytes()).unwrap();
        assert_eq!(parsed.ctype.mimetype, "multipart/alternative");
        assert_eq!(parsed.subparts.len(), 2);
        assert!(delivered[0].contains("To: user@example.com\r\n"));
        assert!(delivered[0].contains("From: sender@example.com\r\n"));
        assert!(delivered[0].contains("Subject: Test Subject\r\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_three_attempts() {
        let m = mailer(StubTransport::new(u32::MAX, connection_closed));
        let start = Instant::now();
        let err = m
            .send("user@example.com", "test.tmpl", &json!({ "name": "John" }))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ConnectionClosed));
        assert_eq!(m.transport.attempts(), MAX_ATTEMPTS);
        assert!(start.elapsed() >= RETRY_DELAY * 2);
        assert!(start.elapsed() < RETRY_DELAY * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried() {
        let m = mailer(StubTransport::new(u32::MAX, rejected));
        let err = m
            .send("user@example.com", "test.tmpl", &json!({ "name": "John" }))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Rejected { code: 550, .. }));
        assert_eq!(m.transport.attempts(), 1);
    }

    #[tokio::test]
    async fn test_template_error_skips_delivery() {
        let m = mailer(StubTransport::new(0, connection_closed));
        let err = m
            .send("user@example.com", "nonexistent.tmpl", &json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Template(_)));
        assert_eq!(m.transport.attempts(), 0);
    }

    #[test]
    fn test_build_message() {
        let m = mailer(StubTransport::new(0, connection_closed));
        let rendered = RenderedEmail {
            subject: "¡Hola!".to_string(),
            plain_body: "plain".to_string(),
            html_body: "<p>html</p>".to_string(),
        };
        let msg = m.build_message("user@example.com", &rendered);

        assert_eq!(msg.get_header("Subject").unwrap(), &["=?UTF-8?q?=C2=A1Hola!?=".to_string()]);
        let types: Vec<&str> = msg.parts().iter().map(|p| p.content_type()).collect();
        assert_eq!(types, ["text/plain", "text/html"]);
        let envelope = msg.envelope().unwrap();
        assert_eq!(envelope.from().as_ref(), "sender@example.com");
        assert_eq!(envelope.to()[0].as_ref(), "user@example.com");
    }

    #[test]
    fn test_new_uses_five_second_timeout() {
        let m = Mailer::new("smtp.example.com", 587, "user", "pwd", "sender@example.com").unwrap();
        assert_eq!(m.sender(), "sender@example.com");
        assert_eq!(m.transport.get_timeout(), Duration::from_secs(5));
        assert_eq!(m.transport.addr(), "smtp.example.com:587");
    }
}
