//! RFC 2047 encoded-word generation for header values.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const UPPER_HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Longest encoded word allowed by RFC 2047 Section 2.
const MAX_ENCODED_WORD_LEN: usize = 75;

/// Encoding applied inside an encoded word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordEncoder {
    /// The "Q" encoding, a header-safe variant of quoted-printable.
    Q,
    /// The "B" encoding, base64.
    B,
}

impl WordEncoder {
    /// Encodes `value` as one or more encoded words for `charset`.
    ///
    /// Printable ASCII is returned unchanged.
    pub fn encode(self, charset: &str, value: &str) -> String {
        if !needs_encoding(value) {
            return value.to_string();
        }
        self.encode_word(charset, value)
    }

    fn encode_word(self, charset: &str, value: &str) -> String {
        let mut buf = String::with_capacity(value.len() * 3);
        self.open_word(&mut buf, charset);
        match self {
            WordEncoder::B => self.b_encode(&mut buf, charset, value),
            WordEncoder::Q => self.q_encode(&mut buf, charset, value),
        }
        buf.push_str("?=");
        buf
    }

    fn open_word(self, buf: &mut String, charset: &str) {
        buf.push_str("=?");
        buf.push_str(charset);
        buf.push_str(match self {
            WordEncoder::B => "?b?",
            WordEncoder::Q => "?q?",
        });
    }

    fn split_word(self, buf: &mut String, charset: &str) {
        buf.push_str("?= ");
        self.open_word(buf, charset);
    }

    fn q_encode(self, buf: &mut String, charset: &str, value: &str) {
        // Only UTF-8 is known well enough to split between characters.
        if !is_utf8(charset) {
            write_q_string(buf, value.as_bytes());
            return;
        }

        let max_len = max_content_len(charset);
        let mut current_len = 0;
        let mut utf8 = [0; 4];
        for c in value.chars() {
            let bytes = c.encode_utf8(&mut utf8).as_bytes();
            let enc_len = if c == ' ' || (bytes.len() == 1 && is_q_literal(bytes[0])) {
                1
            } else {
                3 * bytes.len()
            };
            if current_len + enc_len > max_len {
                self.split_word(buf, charset);
                current_len = 0;
            }
            write_q_string(buf, bytes);
            current_len += enc_len;
        }
    }

    fn b_encode(self, buf: &mut String, charset: &str, value: &str) {
        let max_len = max_content_len(charset);
        if !is_utf8(charset) || encoded_len(value.len()) <= max_len {
            STANDARD.encode_string(value, buf);
            return;
        }

        let max_chunk = max_len / 4 * 3;
        let mut current_len = 0;
        let mut last = 0;
        for (i, c) in value.char_indices() {
            let rune_len = c.len_utf8();
            if current_len + rune_len <= max_chunk {
                current_len += rune_len;
            } else {
                STANDARD.encode_string(&value[last..i], buf);
                self.split_word(buf, charset);
                last = i;
                current_len = rune_len;
            }
        }
        STANDARD.encode_string(&value[last..], buf);
    }
}

fn needs_encoding(value: &str) -> bool {
    value
        .bytes()
        .any(|b| (b < b' ' || b > b'~') && b != b'\t')
}

fn is_utf8(charset: &str) -> bool {
    charset.eq_ignore_ascii_case("utf-8")
}

fn is_q_literal(b: u8) -> bool {
    (b'!'..=b'~').contains(&b) && b != b'=' && b != b'?' && b != b'_'
}

fn max_content_len(charset: &str) -> usize {
    MAX_ENCODED_WORD_LEN - "=?".len() - "?q?".len() - "?=".len() - charset.len()
}

fn encoded_len(n: usize) -> usize {
    (n + 2) / 3 * 4
}

fn write_q_string(buf: &mut String, bytes: &[u8]) {
    for &b in bytes {
        if b == b' ' {
            buf.push('_');
        } else if is_q_literal(b) {
            buf.push(b as char);
        } else {
            buf.push('=');
            buf.push(UPPER_HEX[(b >> 4) as usize] as char);
            buf.push(UPPER_HEX[(b & 0x0f) as usize] as char);
        }
    }
}
