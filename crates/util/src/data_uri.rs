//! Self-describing `data:` URIs for binary provider payloads.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Encodes raw bytes as a `data:<mime>;base64,...` URI.
pub fn encode_data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

/// Wraps an already base64-encoded payload into a data URI.
///
/// Payloads that are already data URIs are returned unchanged.
pub fn wrap_base64_payload(mime_type: &str, payload: &str) -> String {
    if payload.starts_with("data:") {
        return payload.to_string();
    }
    format!("data:{mime_type};base64,{payload}")
}

/// Extracts the bare MIME type from a `Content-Type` header value.
pub fn mime_essence(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or_default().trim()
}

/// True for content types that carry raw media rather than JSON.
pub fn is_binary_media(content_type: &str) -> bool {
    let essence = mime_essence(content_type).to_ascii_lowercase();
    essence.starts_with("audio/") || essence == "application/octet-stream"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_bytes() {
        assert_eq!(encode_data_uri("audio/mpeg", b"ID3"), "data:audio/mpeg;base64,SUQz");
    }

    #[test]
    fn wraps_payload_once() {
        let wrapped = wrap_base64_payload("image/png", "iVBORw0KGgo=");
        assert_eq!(wrapped, "data:image/png;base64,iVBORw0KGgo=");
        assert_eq!(wrap_base64_payload("image/png", &wrapped), wrapped);
    }

    #[test]
    fn classifies_content_types() {
        assert_eq!(mime_essence("audio/wav; codecs=1"), "audio/wav");
        assert!(is_binary_media("Audio/MPEG"));
        assert!(is_binary_media("application/octet-stream"));
        assert!(!is_binary_media("application/json; charset=utf-8"));
    }
}
