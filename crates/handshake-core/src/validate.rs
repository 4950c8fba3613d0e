//! Request field validation
//!
//! Ids and tags are trimmed, HTML-escaped, then length-checked in bytes, so
//! the stored value is safe to render and the limit applies to what is stored.

use crate::error::ValidationError;

/// Escape the five HTML-significant characters
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

/// Validate a required text field and return its sanitized value
pub fn sanitize_field(
    field: &'static str,
    value: Option<&str>,
    max_len: usize,
) -> Result<String, ValidationError> {
    let trimmed = value.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Err(ValidationError::Missing { field });
    }

    let sanitized = escape_html(trimmed);
    if sanitized.len() > max_len {
        return Err(ValidationError::TooLong { field, max: max_len });
    }

    Ok(sanitized)
}

/// Check that `raw` is well-formed JSON within `max_bytes`
pub fn validate_json_payload(
    field: &'static str,
    raw: Option<&str>,
    max_bytes: usize,
) -> Result<serde_json::Value, ValidationError> {
    let raw = raw.ok_or(ValidationError::InvalidJson { field })?;
    let value = serde_json::from_str(raw).map_err(|_| ValidationError::InvalidJson { field })?;
    if raw.len() > max_bytes {
        return Err(ValidationError::PayloadTooLarge { max: max_bytes });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<script>alert("x" & 'y')</script>"#),
            "&lt;script&gt;alert(&quot;x&quot; &amp; &#039;y&#039;)&lt;/script&gt;"
        );
        assert_eq!(escape_html("alice"), "alice");
    }

    #[test]
    fn test_sanitize_trims() {
        assert_eq!(sanitize_field("from", Some("  alice \n"), 255).unwrap(), "alice");
    }

    #[test]
    fn test_sanitize_missing_or_blank() {
        assert_eq!(
            sanitize_field("to", None, 255),
            Err(ValidationError::Missing { field: "to" })
        );
        assert_eq!(
            sanitize_field("to", Some("   "), 255),
            Err(ValidationError::Missing { field: "to" })
        );
    }

    #[test]
    fn test_sanitize_length_counts_escaped_bytes() {
        // 10 ampersands become 50 bytes once escaped
        let value = "&".repeat(10);
        assert!(sanitize_field("type", Some(&value), 50).is_ok());
        assert_eq!(
            sanitize_field("type", Some(&value), 49),
            Err(ValidationError::TooLong { field: "type", max: 49 })
        );
    }

    #[test]
    fn test_json_payload() {
        assert_eq!(
            validate_json_payload("data", Some(r#"{"sdp":"x"}"#), 100).unwrap(),
            json!({"sdp": "x"})
        );
        assert_eq!(validate_json_payload("data", Some("null"), 100).unwrap(), json!(null));
        assert_eq!(
            validate_json_payload("data", Some("{not json"), 100),
            Err(ValidationError::InvalidJson { field: "data" })
        );
        assert_eq!(
            validate_json_payload("data", Some(""), 100),
            Err(ValidationError::InvalidJson { field: "data" })
        );
        assert_eq!(
            validate_json_payload("data", None, 100),
            Err(ValidationError::InvalidJson { field: "data" })
        );
    }

    #[test]
    fn test_json_payload_too_large() {
        let big = format!("\"{}\"", "a".repeat(60));
        assert_eq!(
            validate_json_payload("data", Some(&big), 50),
            Err(ValidationError::PayloadTooLarge { max: 50 })
        );
    }
}
