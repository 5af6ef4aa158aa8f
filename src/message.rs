use std::fmt;
use std::io::{self, Write};

use time::macros::format_description;
use time::OffsetDateTime;

use crate::address::Mailbox;
use crate::encoder::WordEncoder;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::header::HeaderMap;
use crate::mimeheader::MimeContentTransferEncoding;
use crate::writer::MessageWriter;

/// Writes the raw, unencoded body of a part.
pub type Copier = Box<dyn Fn(&mut dyn Write) -> io::Result<()> + Send + Sync>;

/// A body part of a message.
pub struct Part {
    content_type: String,
    copier: Copier,
    encoding: MimeContentTransferEncoding,
}

impl Part {
    fn new(content_type: String, copier: Copier, encoding: MimeContentTransferEncoding) -> Part {
        Part {
            content_type,
            copier,
            encoding,
        }
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn encoding(&self) -> MimeContentTransferEncoding {
        self.encoding
    }

    /// Overrides the transfer-encoding inherited from the message.
    pub fn set_encoding(&mut self, encoding: MimeContentTransferEncoding) -> &mut Part {
        self.encoding = encoding;
        self
    }

    /// Writes the raw body of this part to `w`.
    pub fn write_body(&self, w: &mut dyn Write) -> io::Result<()> {
        (self.copier)(w)
    }
}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Part")
            .field("content_type", &self.content_type)
            .field("encoding", &self.encoding)
            .finish()
    }
}

/// An email message made of headers and one or more body parts.
///
/// Header values are RFC 2047 encoded as they are set. A message with more
/// than one part is written as `multipart/alternative`.
pub struct Message {
    headers: HeaderMap,
    parts: Vec<Part>,
    encoding: MimeContentTransferEncoding,
    charset: String,
    clock: fn() -> OffsetDateTime,
}

impl Default for Message {
    fn default() -> Self {
        Message::new()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Message")
            .field("headers", &self.headers)
            .field("parts", &self.parts)
            .field("encoding", &self.encoding)
            .field("charset", &self.charset)
            .finish()
    }
}

impl Message {
    /// Creates an empty UTF-8, quoted-printable message.
    pub fn new() -> Message {
        Message {
            headers: HeaderMap::new(),
            parts: Vec::new(),
            encoding: MimeContentTransferEncoding::QuotedPrintable,
            charset: "UTF-8".to_string(),
            clock: OffsetDateTime::now_utc,
        }
    }

    /// Sets the charset of the headers and text parts.
    pub fn with_charset(mut self, charset: impl Into<String>) -> Message {
        self.charset = charset.into();
        self
    }

    /// Sets the default transfer-encoding of the parts.
    ///
    /// Headers of a base64 message are B-encoded, Q-encoded otherwise.
    pub fn with_encoding(mut self, encoding: MimeContentTransferEncoding) -> Message {
        self.encoding = encoding;
        self
    }

    /// Sets the source of the `Date` header written when none is set.
    pub fn with_clock(mut self, clock: fn() -> OffsetDateTime) -> Message {
        self.clock = clock;
        self
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn encoding(&self) -> MimeContentTransferEncoding {
        self.encoding
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Get the stored, already encoded, values of a header.
    pub fn get_header(&self, name: &str) -> Option<&[String]> {
        self.headers.get(name).map(|h| h.values())
    }

    fn header_encoder(&self) -> WordEncoder {
        match self.encoding {
            MimeContentTransferEncoding::Base64 => WordEncoder::B,
            _ => WordEncoder::Q,
        }
    }

    fn encode_string(&self, value: &str) -> String {
        self.header_encoder().encode(&self.charset, value)
    }

    /// Sets a header, encoding each value.
    pub fn set_header<I, S>(&mut self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values = values
            .into_iter()
            .map(|v| self.encode_string(v.as_ref()))
            .collect();
        self.headers.set(name, values);
    }

    /// Sets several headers at once, see [`Message::set_header`].
    pub fn set_headers<F, K, I, S>(&mut self, fields: F)
    where
        F: IntoIterator<Item = (K, I)>,
        K: Into<String>,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for (name, values) in fields {
            self.set_header(name, values);
        }
    }

    /// Sets a header holding a single address with a display name.
    pub fn set_address_header(&mut self, name: impl Into<String>, address: &str, display_name: &str) {
        let value = self.format_address(address, display_name);
        self.headers.set(name, vec![value]);
    }

    /// Formats an address and display name for use in a header value.
    pub fn format_address(&self, address: &str, display_name: &str) -> String {
        Mailbox::with_name(address, display_name)
            .format(&self.charset, self.header_encoder())
    }

    /// Sets a header holding a date.
    pub fn set_date_header(&mut self, name: impl Into<String>, date: OffsetDateTime) {
        let value = self.format_date(date);
        self.headers.set(name, vec![value]);
    }

    /// Formats a date as in RFC 1123 with a numeric zone, e.g.
    /// `Mon, 02 Jan 2006 15:04:05 -0700`.
    pub fn format_date(&self, date: OffsetDateTime) -> String {
        let rfc1123z = format_description!(
            "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
        );
        date.format(rfc1123z).unwrap_or_else(|_| date.to_string())
    }

    /// The time used for an automatic `Date` header.
    pub(crate) fn now(&self) -> OffsetDateTime {
        (self.clock)()
    }

    /// Replaces all parts with a single text part.
    pub fn set_body(&mut self, content_type: impl Into<String>, body: impl Into<String>) -> &mut Part {
        self.set_body_writer(content_type, copier(body.into()))
    }

    /// Replaces all parts with a single part produced by `f`.
    pub fn set_body_writer<F>(&mut self, content_type: impl Into<String>, f: F) -> &mut Part
    where
        F: Fn(&mut dyn Write) -> io::Result<()> + Send + Sync + 'static,
    {
        self.parts.clear();
        self.add_alternative_writer(content_type, f)
    }

    /// Adds an alternative text part, e.g. an HTML rendering of the body.
    pub fn add_alternative(&mut self, content_type: impl Into<String>, body: impl Into<String>) -> &mut Part {
        self.add_alternative_writer(content_type, copier(body.into()))
    }

    /// Adds an alternative part produced by `f`.
    pub fn add_alternative_writer<F>(&mut self, content_type: impl Into<String>, f: F) -> &mut Part
    where
        F: Fn(&mut dyn Write) -> io::Result<()> + Send + Sync + 'static,
    {
        let part = Part::new(content_type.into(), Box::new(f), self.encoding);
        self.parts.push(part);
        let last = self.parts.len() - 1;
        &mut self.parts[last]
    }

    /// Returns true if the parts must be wrapped in `multipart/alternative`.
    pub(crate) fn has_alternative_part(&self) -> bool {
        self.parts.len() > 1
    }

    /// Resolves the SMTP envelope from the address headers.
    pub fn envelope(&self) -> Result<Envelope> {
        Envelope::from_headers(&self.headers)
    }

    /// Writes the message in wire format, returning the number of bytes written.
    pub fn write_to<W: Write>(&self, w: W) -> io::Result<u64> {
        let mut mw = MessageWriter::new(w);
        mw.write_message(self);
        mw.finish()
    }

    /// Returns the message in wire format.
    pub fn formatted(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }
}

fn copier(body: String) -> impl Fn(&mut dyn Write) -> io::Result<()> + Send + Sync + 'static {
    move |w: &mut dyn Write| w.write_all(body.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn fixed_now() -> OffsetDateTime {
        datetime!(2014-06-25 17:46:00 UTC)
    }

    #[test]
    fn test_set_header_encodes_values() {
        let mut m = Message::new();
        m.set_header("Subject", ["¡Hola, señor!"]);
        m.set_headers([("X-Headers", vec!["Test", "Café"])]);

        assert_eq!(
            m.get_header("Subject").unwrap(),
            &["=?UTF-8?q?=C2=A1Hola,_se=C3=B1or!?=".to_string()]
        );
        assert_eq!(
            m.get_header("X-Headers").unwrap(),
            &["Test".to_string(), "=?UTF-8?q?Caf=C3=A9?=".to_string()]
        );
    }

    #[test]
    fn test_base64_message_uses_b_encoding() {
        let mut m = Message::new().with_encoding(MimeContentTransferEncoding::Base64);
        m.set_header("Subject", ["Café"]);
        assert_eq!(m.get_header("Subject").unwrap(), &["=?UTF-8?b?Q2Fmw6k=?=".to_string()]);
    }

    #[test]
    fn test_format_date() {
        let m = Message::new();
        assert_eq!(m.format_date(fixed_now()), "Wed, 25 Jun 2014 17:46:00 +0000");

        let offset = datetime!(2014-06-05 07:06:00 -07:00);
        assert_eq!(m.format_date(offset), "Thu, 05 Jun 2014 07:06:00 -0700");
    }

    #[test]
    fn test_set_body_replaces_parts() {
        let mut m = Message::new();
        m.set_body("text/plain", "first");
        m.add_alternative("text/html", "<p>first</p>");
        assert_eq!(m.parts().len(), 2);
        assert!(m.has_alternative_part());

        m.set_body("text/plain", "second")
            .set_encoding(MimeContentTransferEncoding::Base64);
        assert_eq!(m.parts().len(), 1);
        assert_eq!(m.parts()[0].encoding(), MimeContentTransferEncoding::Base64);

        let mut body = Vec::new();
        m.parts()[0].write_body(&mut body).unwrap();
        assert_eq!(body, b"second");
    }

    #[test]
    fn test_parts_inherit_message_encoding() {
        let mut m = Message::new().with_encoding(MimeContentTransferEncoding::Unencoded);
        m.set_body("text/plain", "body");
        assert_eq!(m.parts()[0].encoding(), MimeContentTransferEncoding::Unencoded);
    }
}
