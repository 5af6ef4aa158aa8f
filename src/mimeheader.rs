use std::fmt;

use mime::Mime;

/// Special header type for the Content-Transfer-Encoding header.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde_crate::Deserialize, serde_crate::Serialize),
    serde(crate = "serde_crate", rename_all = "kebab-case")
)]
pub enum MimeContentTransferEncoding {
    /// Content transfered using the quoted-printable encoding.
    ///
    /// This encoding is defined in RFC 2045 Section 6.7
    #[default]
    QuotedPrintable,
    /// Content transfered as BASE64
    ///
    /// This encoding is defined in RFC 2045 Section 6.8
    Base64,
    /// Message content is not encoded in any way. Headers are still encoded.
    Unencoded,
}

impl MimeContentTransferEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            MimeContentTransferEncoding::QuotedPrintable => "quoted-printable",
            MimeContentTransferEncoding::Base64 => "base64",
            MimeContentTransferEncoding::Unencoded => "8bit",
        }
    }
}

impl fmt::Display for MimeContentTransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marks the type of a multipart container
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum MimeMultipartType {
    /// Entries which are independent.
    ///
    /// As defined by Section 5.1.3 of RFC 2046
    Mixed,
    /// Entries which are interchangeable, such that the system can choose
    /// whichever is "best" for its use.
    ///
    /// As defined by Section 5.1.4 of RFC 2046
    Alternative,
}

impl MimeMultipartType {
    /// Returns the `multipart/*` Content-Type value for this type, with the
    /// boundary parameter on a continuation line.
    pub fn to_content_type(self, boundary: &str) -> String {
        let subtype = match self {
            MimeMultipartType::Mixed => "mixed",
            MimeMultipartType::Alternative => "alternative",
        };
        format!("multipart/{};\r\n boundary={}", subtype, boundary)
    }
}

/// Returns the Content-Type value of a body part, adding the message charset
/// unless the content type already names one.
pub fn part_content_type(content_type: &str, charset: &str) -> String {
    let has_charset = content_type
        .parse::<Mime>()
        .map(|m| m.get_param(mime::CHARSET).is_some())
        .unwrap_or(false);

    if has_charset {
        content_type.to_string()
    } else {
        format!("{}; charset={}", content_type, charset)
    }
}
