//! SMTP envelope derived from a message's address headers.

use std::fmt;
use std::str::FromStr;

use fast_chemail::is_valid_email;

use crate::address::Mailbox;
use crate::error::{Error, Result};
use crate::header::HeaderMap;

/// Headers whose addresses receive the message, in envelope order.
const RECIPIENT_HEADERS: [&str; 3] = ["To", "Cc", "Bcc"];

/// Email address
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Constructs a new `EmailAddress`, validating the incoming string.
    pub fn new(address: String) -> Result<EmailAddress> {
        if !is_valid_email(&address) && !address.ends_with("localhost") {
            return Err(Error::InvalidAddress {
                reason: "not a valid email address".to_string(),
                address,
            });
        }

        Ok(EmailAddress(address))
    }

    /// Extracts the address from a header value such as
    /// `"John Doe" <john@example.com>`.
    pub fn from_header_value(field: &str) -> Result<EmailAddress> {
        let mailbox = field
            .parse::<Mailbox>()
            .map_err(|err| Error::InvalidAddress {
                address: field.to_string(),
                reason: err.to_string(),
            })?;
        EmailAddress::new(mailbox.address)
    }
}

impl FromStr for EmailAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EmailAddress::new(s.to_string())
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EmailAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Simple email envelope representation
///
/// We only accept mailboxes, and do not support source routes (as per RFC).
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Envelope {
    /// The envelope recipients' addresses, without duplicates.
    ///
    /// This can not be empty.
    forward_path: Vec<EmailAddress>,
    /// The envelope sender address
    reverse_path: EmailAddress,
}

impl Envelope {
    /// Creates a new envelope, which may fail if `to` is empty.
    pub fn new(from: EmailAddress, to: Vec<EmailAddress>) -> Result<Envelope> {
        if to.is_empty() {
            return Err(Error::NoRecipients);
        }
        Ok(Envelope {
            forward_path: to,
            reverse_path: from,
        })
    }

    /// Builds the envelope of a message from its headers.
    ///
    /// The sender is taken from `Sender`, falling back to `From`. Recipients
    /// are gathered from `To`, `Cc` and `Bcc` in that order, keeping the
    /// first occurrence of each address.
    pub fn from_headers(headers: &HeaderMap) -> Result<Envelope> {
        let from = headers
            .get("Sender")
            .and_then(|h| h.get_value())
            .or_else(|| headers.get("From").and_then(|h| h.get_value()))
            .ok_or(Error::MissingFrom)?;
        let from = EmailAddress::from_header_value(from)?;

        let mut to: Vec<EmailAddress> = Vec::new();
        for name in RECIPIENT_HEADERS.iter() {
            let header = match headers.get(name) {
                Some(header) => header,
                None => continue,
            };
            for value in header.values() {
                let addr = EmailAddress::from_header_value(value)?;
                if !to.contains(&addr) {
                    to.push(addr);
                }
            }
        }

        Envelope::new(from, to)
    }

    /// Destination addresses of the envelope
    pub fn to(&self) -> &[EmailAddress] {
        self.forward_path.as_slice()
    }

    /// Source address of the envelope
    pub fn from(&self) -> &EmailAddress {
        &self.reverse_path
    }
}
