//! Decoding of base64 secret fields.
//!
//! Some secret stores hold the base64 text of an already base64-encoded
//! value. [`decode_secret`] peels one or two layers and tags the result as
//! text or raw bytes:
//!
//! 1. Decode once. Non-UTF-8 output is binary.
//! 2. UTF-8 output that starts with a PEM header is the final text.
//! 3. Otherwise decode that text again. UTF-8 output is the final text.
//! 4. Anything else falls back to the bytes from step 1.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

const PEM_HEADER: &str = "-----BEGIN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Pem(String),
    Binary(Vec<u8>),
}

impl Decoded {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Decoded::Pem(text) => text.as_bytes(),
            Decoded::Binary(bytes) => bytes,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Decoded::Pem(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("secret field is empty")]
    Empty,

    #[error("invalid base64: {0}")]
    Base64(String),

    #[error("decoded value is not UTF-8 text")]
    NotText,
}

fn strip_whitespace(input: &str) -> String {
    input.chars().filter(|c| !c.is_ascii_whitespace()).collect()
}

fn decode_layer(input: &str) -> Result<Vec<u8>, DecodeError> {
    let compact = strip_whitespace(input);
    if compact.is_empty() {
        return Err(DecodeError::Empty);
    }
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| DecodeError::Base64(e.to_string()))
}

/// Decodes a certificate or key field that may carry one or two layers of
/// base64.
pub fn decode_secret(encoded: &str) -> Result<Decoded, DecodeError> {
    let first = decode_layer(encoded)?;

    let text = match std::str::from_utf8(&first) {
        Ok(text) => text,
        Err(_) => return Ok(Decoded::Binary(first)),
    };

    if text.starts_with(PEM_HEADER) {
        return Ok(Decoded::Pem(text.to_string()));
    }

    match decode_layer(text).map(String::from_utf8) {
        Ok(Ok(second)) => Ok(Decoded::Pem(second)),
        _ => Ok(Decoded::Binary(first)),
    }
}

/// Exactly one layer, no interpretation. Used for keystores.
pub fn decode_binary(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    decode_layer(encoded)
}

/// Exactly one layer, which must be UTF-8. Used for passwords.
pub fn decode_text(encoded: &str) -> Result<String, DecodeError> {
    String::from_utf8(decode_layer(encoded)?).map_err(|_| DecodeError::NotText)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CERT: &str = "-----BEGIN CERTIFICATE-----\nMIIBszCCAVmgAwIBAgIU\n-----END CERTIFICATE-----\n";

    fn encode(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    #[test]
    fn test_single_encoded_pem() {
        let encoded = encode(CERT.as_bytes());
        assert_eq!(decode_secret(&encoded), Ok(Decoded::Pem(CERT.to_string())));
    }

    #[test]
    fn test_double_encoded_pem() {
        let encoded = encode(encode(CERT.as_bytes()).as_bytes());
        assert_eq!(decode_secret(&encoded), Ok(Decoded::Pem(CERT.to_string())));
    }

    #[test]
    fn test_binary_is_returned_unchanged() {
        let keystore: Vec<u8> = vec![0xfe, 0xed, 0xfe, 0xed, 0x00, 0x00, 0x00, 0x02, 0xff, 0x80];
        let encoded = encode(&keystore);
        assert_eq!(decode_secret(&encoded), Ok(Decoded::Binary(keystore)));
    }

    #[test]
    fn test_text_that_is_not_base64_falls_back_to_first_layer() {
        // "not base64!" decodes once to UTF-8 but cannot be decoded again
        let encoded = encode(b"not base64!");
        assert_eq!(
            decode_secret(&encoded),
            Ok(Decoded::Binary(b"not base64!".to_vec()))
        );
    }

    #[test]
    fn test_wrapped_input_is_accepted() {
        let encoded = encode(CERT.as_bytes());
        let wrapped: String = encoded
            .as_bytes()
            .chunks(16)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join("\n");

        assert_eq!(decode_secret(&wrapped), Ok(Decoded::Pem(CERT.to_string())));
    }

    #[test]
    fn test_empty_and_invalid_input() {
        assert_eq!(decode_secret(""), Err(DecodeError::Empty));
        assert_eq!(decode_secret("  \n"), Err(DecodeError::Empty));
        assert!(matches!(decode_secret("%%%"), Err(DecodeError::Base64(_))));
    }

    #[test]
    fn test_single_layer_helpers() {
        assert_eq!(decode_text(&encode(b"changeit")), Ok("changeit".to_string()));
        assert_eq!(decode_text(&encode(&[0xff, 0xfe])), Err(DecodeError::NotText));
        assert_eq!(decode_binary(&encode(&[1, 2, 3])), Ok(vec![1, 2, 3]));
    }
}
