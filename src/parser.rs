//! Header decoding and sender-address extraction.
//!
//! Everything here is best effort: a header that cannot be decoded is used
//! raw, and a `From` value without anything address-shaped yields `None`
//! rather than an error.
//!
//! ```
//! use report_bot::parser::extract_email_address;
//!
//! assert_eq!(
//!     extract_email_address("Jane Doe <Jane.Doe@Example.com>").as_deref(),
//!     Some("jane.doe@example.com")
//! );
//! assert_eq!(extract_email_address("undisclosed-recipients"), None);
//! ```

use crate::gateway::{InboundMessage, MessageHeaders};
use mailparse::parse_header;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

static ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w.-]+@[\w.-]+").expect("valid regex"));

/// Extracts the first address-shaped substring, trimmed and lower-cased.
///
/// This is a pattern match, not RFC 5322 parsing: `"a@b"` is accepted and
/// quoted local parts are not.
#[must_use]
pub fn extract_email_address(value: &str) -> Option<String> {
    ADDRESS
        .find(value)
        .map(|m| m.as_str().trim().to_lowercase())
}

/// Decodes RFC 2047 encoded words in a header value.
///
/// Values without encoded words, or that fail to decode, are returned as-is.
#[must_use]
pub fn decode_header_value(name: &str, raw: &str) -> String {
    if !raw.contains("=?") || !raw.is_ascii() {
        return raw.to_string();
    }

    let line = format!("{name}: {raw}");
    match parse_header(line.as_bytes()) {
        Ok((header, _)) => header.get_value(),
        Err(e) => {
            warn!(header = name, error = %e, "Failed to decode header, using raw value");
            raw.to_string()
        }
    }
}

/// Builds the evaluator's view of a message from its headers.
///
/// Header names are matched case-insensitively. If a header repeats, the
/// last occurrence wins.
#[must_use]
pub fn message_from_headers(headers: MessageHeaders) -> InboundMessage {
    let mut message = InboundMessage::new(headers.id);

    for header in headers.headers {
        if header.name.eq_ignore_ascii_case("Subject") {
            message.subject = Some(decode_header_value(&header.name, &header.value));
        } else if header.name.eq_ignore_ascii_case("From") {
            message.sender = Some(decode_header_value(&header.name, &header.value));
        }
    }

    debug!(
        message_id = %message.id,
        has_subject = message.subject.is_some(),
        has_sender = message.sender.is_some(),
        "Parsed message headers"
    );
    message
}
