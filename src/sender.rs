//! Capabilities for handing messages to a mail transport.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::message::Message;

/// Something that can deliver a message to a set of envelope recipients.
#[async_trait]
pub trait Sender: Send {
    async fn send(&mut self, from: &str, to: &[String], msg: &Message) -> Result<()>;
}

/// A [`Sender`] holding a connection that must be released when done.
#[async_trait]
pub trait SendCloser: Sender {
    async fn close(&mut self) -> Result<()>;
}

/// Sends each message through `sender`, stopping at the first failure.
///
/// The envelope of every message is resolved from its headers before it is
/// handed to the sender, so a message without a `From`, without any
/// recipient or without a body never reaches the network.
pub async fn send<S>(sender: &mut S, messages: &[Message]) -> Result<()>
where
    S: Sender + ?Sized,
{
    for (index, msg) in messages.iter().enumerate() {
        send_one(sender, msg)
            .await
            .map_err(|err| Error::Batch {
                index: index + 1,
                source: Box::new(err),
            })?;
    }
    Ok(())
}

async fn send_one<S>(sender: &mut S, msg: &Message) -> Result<()>
where
    S: Sender + ?Sized,
{
    let envelope = msg.envelope()?;
    if msg.parts().is_empty() {
        return Err(Error::EmptyBody);
    }
    let to: Vec<String> = envelope.to().iter().map(|addr| addr.to_string()).collect();
    sender.send(envelope.from().as_ref(), &to, msg).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;

    #[derive(Default)]
    struct RecordingSender {
        sent: Vec<(String, Vec<String>, Vec<u8>)>,
        reject_after: Option<usize>,
    }

    #[async_trait]
    impl Sender for RecordingSender {
        async fn send(&mut self, from: &str, to: &[String], msg: &Message) -> Result<()> {
            if Some(self.sent.len()) == self.reject_after {
                return Err(Error::Rejected {
                    stage: Stage::Mail,
                    code: 550,
                    message: "not today".into(),
                });
            }
            let data = msg.formatted().map_err(Error::Message)?;
            self.sent.push((from.to_string(), to.to_vec(), data));
            Ok(())
        }
    }

    fn message(to: &str) -> Message {
        let mut m = Message::new();
        m.set_header("From", ["from@example.com"]);
        m.set_header("To", [to]);
        m.set_header("Bcc", ["bcc@example.com"]);
        m.set_body("text/plain", "Hello");
        m
    }

    #[tokio::test]
    async fn test_send_resolves_envelopes() {
        let mut sender = RecordingSender::default();
        send(&mut sender, &[message("a@example.com"), message("b@example.com")])
            .await
            .unwrap();

        assert_eq!(sender.sent.len(), 2);
        let (from, to, data) = &sender.sent[1];
        assert_eq!(from, "from@example.com");
        assert_eq!(to, &["b@example.com", "bcc@example.com"]);
        assert!(!String::from_utf8_lossy(data).contains("bcc@example.com"));
    }

    #[tokio::test]
    async fn test_send_reports_failing_message() {
        let mut sender = RecordingSender {
            reject_after: Some(1),
            ..Default::default()
        };
        let err = send(&mut sender, &[message("a@example.com"), message("b@example.com")])
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "could not send email 2: MAIL FROM rejected: 550 not today"
        );
        assert_eq!(sender.sent.len(), 1);
    }

    #[tokio::test]
    async fn test_send_rejects_message_without_from() {
        let mut sender = RecordingSender::default();
        let mut m = Message::new();
        m.set_header("To", ["to@example.com"]);

        let err = send(&mut sender, &[m]).await.unwrap_err();
        match err {
            Error::Batch { index, source } => {
                assert_eq!(index, 1);
                assert!(matches!(*source, Error::MissingFrom));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(sender.sent.is_empty());
    }

    #[tokio::test]
    async fn test_send_rejects_message_without_body() {
        let mut sender = RecordingSender::default();
        let mut m = Message::new();
        m.set_header("From", ["from@example.com"]);
        m.set_header("To", ["to@example.com"]);

        let err = send(&mut sender, &[m]).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not send email 1: invalid message, body is absent"
        );
        assert!(sender.sent.is_empty());
    }
}
