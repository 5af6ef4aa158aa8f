use std::fmt;
use std::str::FromStr;

use crate::encoder::WordEncoder;
use crate::rfc5322::has_specials;

/// A mailbox of an address header: an address with an optional display name.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Mailbox {
    pub name: Option<String>,
    pub address: String,
}

impl Mailbox {
    pub fn new(address: impl Into<String>) -> Mailbox {
        Mailbox {
            name: None,
            address: address.into(),
        }
    }

    pub fn with_name(address: impl Into<String>, name: impl Into<String>) -> Mailbox {
        Mailbox {
            name: Some(name.into()),
            address: address.into(),
        }
    }

    /// Renders the mailbox for a header using `encoder` for the display name.
    ///
    /// A name the encoder leaves untouched is quoted, escaping `\` and `"`.
    /// A name that needs encoding and contains specials is always B-encoded,
    /// since Q-encoded words cannot carry them inside a phrase.
    pub fn format(&self, charset: &str, encoder: WordEncoder) -> String {
        let name = match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => return self.address.clone(),
        };

        let mut out = String::with_capacity(name.len() + self.address.len() + 5);
        let encoded = encoder.encode(charset, name);
        if encoded == name {
            out.push('"');
            for c in name.chars() {
                if c == '\\' || c == '"' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
        } else if has_specials(name) {
            out.push_str(&WordEncoder::B.encode(charset, name));
        } else {
            out.push_str(&encoded);
        }
        out.push_str(" <");
        out.push_str(&self.address);
        out.push('>');
        out
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&self.format("UTF-8", WordEncoder::Q))
    }
}

impl FromStr for Mailbox {
    type Err = mailparse::MailParseError;

    /// Parses a single mailbox, decoding an encoded display name.
    fn from_str(s: &str) -> Result<Mailbox, mailparse::MailParseError> {
        let info = mailparse::addrparse(s)?
            .extract_single_info()
            .ok_or(mailparse::MailParseError::Generic("expected a single mailbox"))?;
        Ok(Mailbox {
            name: info.display_name,
            address: info.addr,
        })
    }
}
