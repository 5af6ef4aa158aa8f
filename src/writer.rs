//! Serialization of a [`Message`] to RFC 5322 / RFC 2045 wire format.

use std::collections::HashSet;
use std::io::{self, Write};

use base64::engine::general_purpose::STANDARD;
use base64::write::EncoderWriter;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::message::{Message, Part};
use crate::mimeheader::{part_content_type, MimeContentTransferEncoding, MimeMultipartType};
use crate::rfc5322::{Rfc5322Builder, MIME_LINE_LENGTH};

const BOUNDARY_LENGTH: usize = 30;

/// Deepest nesting of multipart containers within one message.
const MAX_DEPTH: usize = 3;

/// An open multipart container.
#[derive(Debug)]
struct Multipart {
    boundary: String,
    has_parts: bool,
}

/// Writes a message to `w`, counting bytes and remembering the first error.
///
/// Once a write fails every later write is skipped and the original error
/// is what [`MessageWriter::finish`] returns.
#[derive(Debug)]
pub(crate) struct MessageWriter<W> {
    w: W,
    n: u64,
    err: Option<io::Error>,
    open: Vec<Multipart>,
    boundaries: HashSet<String>,
}

impl<W: Write> MessageWriter<W> {
    pub(crate) fn new(w: W) -> MessageWriter<W> {
        MessageWriter {
            w,
            n: 0,
            err: None,
            open: Vec::with_capacity(MAX_DEPTH),
            boundaries: HashSet::new(),
        }
    }

    /// Returns the number of bytes written, or the first error encountered.
    pub(crate) fn finish(mut self) -> io::Result<u64> {
        match self.err.take() {
            Some(err) => Err(err),
            None => Ok(self.n),
        }
    }

    fn fail(&mut self, err: io::Error) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    pub(crate) fn write_message(&mut self, m: &Message) {
        if !m.headers().contains("Mime-Version") {
            self.write_str("Mime-Version: 1.0\r\n");
        }
        if !m.headers().contains("Date") {
            self.write_header("Date", &[m.format_date(m.now())]);
        }

        for header in m.headers().iter() {
            if header.name != "Bcc" {
                self.write_header(&header.name, header.values());
            }
        }

        if m.has_alternative_part() {
            self.open_multipart(MimeMultipartType::Alternative);
        }
        for part in m.parts() {
            self.write_part(part, m.charset());
        }
        if m.has_alternative_part() {
            self.close_multipart();
        }

        if m.parts().is_empty() {
            self.write_str("\r\n");
        }
    }

    fn write_part(&mut self, part: &Part, charset: &str) {
        let headers = [
            (
                "Content-Type",
                part_content_type(part.content_type(), charset),
            ),
            (
                "Content-Transfer-Encoding",
                part.encoding().as_str().to_string(),
            ),
        ];
        self.write_part_headers(&headers);
        self.write_body(part);
    }

    /// Writes headers at the top level, or opens a new part of the innermost
    /// container with them.
    fn write_part_headers(&mut self, headers: &[(&str, String)]) {
        if self.open.is_empty() {
            for (name, value) in headers {
                self.write_header(name, &[value.clone()]);
            }
            self.write_str("\r\n");
        } else {
            self.create_part(headers);
        }
    }

    fn write_body(&mut self, part: &Part) {
        if self.err.is_some() {
            return;
        }
        if let Err(err) = self.encode_body(part) {
            self.fail(err);
        }
    }

    fn encode_body(&mut self, part: &Part) -> io::Result<()> {
        match part.encoding() {
            MimeContentTransferEncoding::Base64 => {
                let mut enc = EncoderWriter::new(Base64LineWriter::new(&mut *self), &STANDARD);
                part.write_body(&mut enc)?;
                enc.finish()?;
            }
            MimeContentTransferEncoding::Unencoded => part.write_body(self)?,
            MimeContentTransferEncoding::QuotedPrintable => {
                let mut body = Vec::new();
                part.write_body(&mut body)?;
                self.write_all(encode_quoted_printable(&body).as_bytes())?;
            }
        }
        Ok(())
    }

    fn write_header(&mut self, name: &str, values: &[String]) {
        let mut builder = Rfc5322Builder::new();
        builder.emit_header(name, values);
        self.write_str(builder.result());
    }

    fn write_str(&mut self, s: &str) {
        if let Err(err) = self.write_all(s.as_bytes()) {
            self.fail(err);
        }
    }

    fn new_boundary(&mut self) -> String {
        let mut rng = thread_rng();
        loop {
            let boundary: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(BOUNDARY_LENGTH)
                .map(char::from)
                .collect();
            if self.boundaries.insert(boundary.clone()) {
                return boundary;
            }
        }
    }

    /// Opens a multipart container within the current one.
    pub(crate) fn open_multipart(&mut self, kind: MimeMultipartType) {
        if self.open.len() >= MAX_DEPTH {
            self.fail(io::Error::new(
                io::ErrorKind::InvalidInput,
                "multipart containers nested too deeply",
            ));
            return;
        }

        let boundary = self.new_boundary();
        let content_type = kind.to_content_type(&boundary);

        if self.open.is_empty() {
            self.write_header("Content-Type", &[content_type]);
            self.write_str("\r\n");
        } else {
            self.create_part(&[("Content-Type", content_type)]);
        }

        self.open.push(Multipart {
            boundary,
            has_parts: false,
        });
    }

    /// Closes the innermost open container.
    pub(crate) fn close_multipart(&mut self) {
        if let Some(multipart) = self.open.pop() {
            self.write_str(&format!("\r\n--{}--\r\n", multipart.boundary));
        }
    }

    /// Writes the delimiter and headers of a new part in the innermost
    /// container.
    fn create_part(&mut self, headers: &[(&str, String)]) {
        let delimiter = match self.open.last_mut() {
            Some(multipart) => {
                let delimiter = if multipart.has_parts {
                    format!("\r\n--{}\r\n", multipart.boundary)
                } else {
                    format!("--{}\r\n", multipart.boundary)
                };
                multipart.has_parts = true;
                delimiter
            }
            None => return,
        };
        self.write_str(&delimiter);
        for (name, value) in headers {
            self.write_str(&format!("{}: {}\r\n", name, value));
        }
        self.write_str("\r\n");
    }
}

impl<W: Write> Write for MessageWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(err) = &self.err {
            return Err(io::Error::new(
                err.kind(),
                "cannot write as writer has errors",
            ));
        }

        match self.w.write(buf) {
            Ok(n) => {
                self.n += n as u64;
                Ok(n)
            }
            Err(err) => {
                let kind = err.kind();
                self.fail(err);
                Err(kind.into())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.w.flush()
    }
}

/// Splits base64 output into lines of [`MIME_LINE_LENGTH`] characters.
#[derive(Debug)]
pub(crate) struct Base64LineWriter<W> {
    w: W,
    line_len: usize,
}

impl<W: Write> Base64LineWriter<W> {
    pub(crate) fn new(w: W) -> Base64LineWriter<W> {
        Base64LineWriter { w, line_len: 0 }
    }
}

impl<W: Write> Write for Base64LineWriter<W> {
    fn write(&mut self, mut p: &[u8]) -> io::Result<usize> {
        let total = p.len();
        while p.len() + self.line_len > MIME_LINE_LENGTH {
            let room = MIME_LINE_LENGTH - self.line_len;
            self.w.write_all(&p[..room])?;
            self.w.write_all(b"\r\n")?;
            p = &p[room..];
            self.line_len = 0;
        }

        self.w.write_all(p)?;
        self.line_len += p.len();

        Ok(total)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.w.flush()
    }
}

/// Quoted-printable encoding (RFC 2045 Section 6.7) of a text body.
///
/// Bare `\r` and `\n` count as line breaks and are written as CRLF.
/// Encoded lines are wrapped at [`MIME_LINE_LENGTH`] characters.
fn encode_quoted_printable(text: &[u8]) -> String {
    quoted_printable::encode_to_str(normalize_line_endings(text))
}

fn normalize_line_endings(text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + text.len() / 32);
    let mut bytes = text.iter().peekable();
    while let Some(&b) = bytes.next() {
        match b {
            b'\r' => {
                if bytes.peek() == Some(&&b'\n') {
                    bytes.next();
                }
                out.extend_from_slice(b"\r\n");
            }
            b'\n' => out.extend_from_slice(b"\r\n"),
            _ => out.push(b),
        }
    }
    out
}
