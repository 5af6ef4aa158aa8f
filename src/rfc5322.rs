//! Module with helpers for dealing with RFC 5322.

/// Maximum number of characters on a header or body line, leaving room for
/// the CRLF within the 78 recommended by RFC 5322 Section 2.1.1.
pub const MIME_LINE_LENGTH: usize = 76;

/// Room left on a continuation line once its leading space is written.
const CONTINUATION_LENGTH: isize = MIME_LINE_LENGTH as isize - 1;

/// Is considered a special character (`tspecials`) by RFC 2045 Section 5.1.
fn is_special(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b':' | b';' | b'@' | b'\\' | b',' | b'.' | b'"'
    )
}

/// Returns true if any byte of `text` is a special character.
pub fn has_specials(text: &str) -> bool {
    text.bytes().any(is_special)
}

/// Type for constructing RFC 5322 header blocks
#[derive(Debug, Default)]
pub struct Rfc5322Builder {
    result: String,
}

impl Rfc5322Builder {
    /// Make a new builder, with an empty string
    pub fn new() -> Rfc5322Builder {
        Rfc5322Builder {
            result: String::new(),
        }
    }

    pub fn result(&self) -> &str {
        &self.result
    }

    pub fn into_result(self) -> String {
        self.result
    }

    pub fn emit_raw(&mut self, s: &str) {
        self.result.push_str(s);
    }

    /// Emit a complete `name: value, value` header line terminated by CRLF.
    ///
    /// Values are joined with `", "`. Lines are kept within
    /// [`MIME_LINE_LENGTH`] characters where a space or newline allows it;
    /// continuation lines start with a single space.
    pub fn emit_header(&mut self, name: &str, values: &[String]) {
        self.emit_raw(name);
        if values.is_empty() {
            self.emit_raw(":\r\n");
            return;
        }
        self.emit_raw(": ");

        let mut chars_left = MIME_LINE_LENGTH as isize - name.len() as isize - 2;

        for (i, value) in values.iter().enumerate() {
            let mut s = value.as_str();

            if i != 0 {
                // The separator and the first word of the next value must fit,
                // otherwise the value starts on a continuation line.
                let first_word = s.find([' ', '\n']).unwrap_or(s.len()) as isize;
                if chars_left - 2 < first_word {
                    self.emit_raw(",\r\n ");
                    chars_left = CONTINUATION_LENGTH;
                } else {
                    self.emit_raw(", ");
                    chars_left -= 2;
                }
            } else if chars_left < 1 {
                self.emit_raw("\r\n ");
                chars_left = CONTINUATION_LENGTH;
            }

            // A value followed by another one keeps room for the comma.
            let comma = if i + 1 < values.len() { 1 } else { 0 };
            while !s.is_empty() && (s.len() as isize > chars_left - comma || s.contains('\n')) {
                (s, chars_left) = self.emit_folded(s, chars_left - comma);
            }
            self.emit_raw(s);
            chars_left -= s.len() as isize;
        }

        self.emit_raw("\r\n");
    }

    /// Emit the head of `s` up to a fold point. Returns the remainder and the
    /// room left on the line it continues on.
    fn emit_folded<'s>(&mut self, s: &'s str, chars_left: isize) -> (&'s str, isize) {
        let bytes = s.as_bytes();
        let budget = chars_left.max(0) as usize;

        // An existing line break within the budget.
        if let Some(i) = s.find('\n') {
            if i < budget {
                return self.emit_break(s, i);
            }
        }

        // The last space within the budget.
        for i in (0..budget.min(bytes.len())).rev() {
            if bytes[i] == b' ' {
                return self.emit_space_break(s, i);
            }
        }

        // Nothing fits, so break at the first opportunity past the budget.
        for i in budget..bytes.len() {
            match bytes[i] {
                b' ' => return self.emit_space_break(s, i),
                b'\n' => return self.emit_break(s, i),
                _ => {}
            }
        }

        // A single atomic token, written unbroken.
        self.emit_raw(s);
        ("", chars_left - s.len() as isize)
    }

    fn emit_space_break<'s>(&mut self, s: &'s str, i: usize) -> (&'s str, isize) {
        self.emit_raw(&s[..i]);
        self.emit_raw("\r\n ");
        (&s[i + 1..], CONTINUATION_LENGTH)
    }

    fn emit_break<'s>(&mut self, s: &'s str, i: usize) -> (&'s str, isize) {
        self.emit_raw(s[..i].trim_end_matches('\r'));
        self.emit_raw("\r\n");
        let rest = &s[i + 1..];
        if rest.starts_with([' ', '\t']) {
            // The existing whitespace is the continuation indent.
            (rest, MIME_LINE_LENGTH as isize)
        } else {
            self.emit_raw(" ");
            (rest, CONTINUATION_LENGTH)
        }
    }
}
