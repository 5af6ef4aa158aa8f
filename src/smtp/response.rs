//! SMTP reply parsing.

use crate::error::{Error, Result, Stage};

/// A single line of an SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    pub code: u16,
    /// `false` when the code is followed by `-`, i.e. more lines follow.
    pub is_last: bool,
    pub text: String,
}

/// A complete, possibly multi-line, SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, lines: Vec<String>) -> Reply {
        Reply { code, lines }
    }

    /// The reply text with lines joined by newlines.
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    pub fn is_positive(&self) -> bool {
        (200..400).contains(&self.code)
    }

    /// Turns the reply into an error for `stage` unless its code is one of
    /// `expected`.
    pub fn expect(self, expected: &[u16], stage: Stage) -> Result<Reply> {
        if expected.contains(&self.code) {
            Ok(self)
        } else {
            Err(Error::Rejected {
                stage,
                code: self.code,
                message: self.message(),
            })
        }
    }

    /// Parses a single reply line, without its line ending.
    pub fn parse_line(line: &str) -> Result<ReplyLine> {
        let code = line
            .get(..3)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| Error::Protocol(format!("invalid reply line {:?}", line)))?;

        let is_last = match line.as_bytes().get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(_) => {
                return Err(Error::Protocol(format!(
                    "invalid separator in reply line {:?}",
                    line
                )))
            }
        };

        Ok(ReplyLine {
            code,
            is_last,
            text: line.get(4..).unwrap_or("").to_string(),
        })
    }

    /// Parses a complete reply from the start of `buffer`.
    ///
    /// Returns the reply and the number of bytes it spans, or `None` if more
    /// data is needed.
    pub fn parse_reply(buffer: &[u8]) -> Result<Option<(Reply, usize)>> {
        let mut lines = Vec::new();
        let mut code = None;
        let mut consumed = 0;

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }
            let text = std::str::from_utf8(raw)
                .map_err(|err| Error::Protocol(format!("reply is not UTF-8: {}", err)))?;
            let line = Reply::parse_line(text)?;

            match code {
                Some(code) if code != line.code => {
                    return Err(Error::Protocol(format!(
                        "mismatched codes in multi-line reply: {} then {}",
                        code, line.code
                    )))
                }
                Some(_) => {}
                None => code = Some(line.code),
            }
            lines.push(line.text);

            if line.is_last {
                return Ok(code.map(|code| (Reply::new(code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        struct LineTest<'s> {
            input: &'s str,
            expected: ReplyLine,
        }

        let tests = vec![
            LineTest {
                input: "220 mail.example.com ESMTP",
                expected: ReplyLine {
                    code: 220,
                    is_last: true,
                    text: "mail.example.com ESMTP".to_string(),
                },
            },
            LineTest {
                input: "250-mail.example.com",
                expected: ReplyLine {
                    code: 250,
                    is_last: false,
                    text: "mail.example.com".to_string(),
                },
            },
            LineTest {
                input: "354",
                expected: ReplyLine {
                    code: 354,
                    is_last: true,
                    text: String::new(),
                },
            },
        ];

        for test in tests.into_iter() {
            assert_eq!(Reply::parse_line(test.input).unwrap(), test.expected);
        }

        assert!(Reply::parse_line("25").is_err());
        assert!(Reply::parse_line("abc hello").is_err());
        assert!(Reply::parse_line("250+OK").is_err());
    }

    #[test]
    fn test_parse_multi_line_reply() {
        let data = b"250-mail.example.com\r\n250-AUTH PLAIN LOGIN\r\n250 STARTTLS\r\n334 next";
        let (reply, consumed) = Reply::parse_reply(data).unwrap().unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(
            reply.lines,
            vec!["mail.example.com", "AUTH PLAIN LOGIN", "STARTTLS"]
        );
        assert_eq!(consumed, 58);
    }

    #[test]
    fn test_parse_incomplete_reply() {
        assert!(Reply::parse_reply(b"250-mail.example.com\r\n250-SIZE")
            .unwrap()
            .is_none());
        assert!(Reply::parse_reply(b"").unwrap().is_none());
    }

    #[test]
    fn test_parse_mismatched_codes() {
        assert!(Reply::parse_reply(b"250-first\r\n251 second\r\n").is_err());
    }

    #[test]
    fn test_expect() {
        let reply = Reply::new(250, vec!["OK".to_string()]);
        assert!(reply.expect(&[250, 251], Stage::Mail).is_ok());

        let reply = Reply::new(550, vec!["No such user".to_string()]);
        match reply.expect(&[250, 251], Stage::Rcpt("to@example.com".into())) {
            Err(Error::Rejected {
                stage,
                code,
                message,
            }) => {
                assert_eq!(stage, Stage::Rcpt("to@example.com".into()));
                assert_eq!(code, 550);
                assert_eq!(message, "No such user");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
