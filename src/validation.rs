use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::LazyLock;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::ProxyError;

/// Largest decoded image accepted for analysis.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

static BASE64_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/=]+$").expect("valid base64 pattern"));

/// Body of an analyze request.
#[derive(Debug, Deserialize, Validate)]
pub struct AnalyzeRequest {
    #[serde(rename = "imageData", default, deserialize_with = "string_or_empty")]
    #[validate(
        length(min = 1, message = "No image data provided"),
        custom(function = "within_size_limit"),
        regex(path = *BASE64_PATTERN, message = "Invalid base64 format")
    )]
    pub image_data: String,
}

/// `null` and non-string values count as no image at all.
fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(data) => data,
        _ => String::new(),
    })
}

fn within_size_limit(data: &str) -> Result<(), ValidationError> {
    if decoded_len(data) > MAX_IMAGE_BYTES {
        let mut err = ValidationError::new("size");
        err.message = Some(Cow::from("Image too large (max 10MB)"));
        return Err(err);
    }
    Ok(())
}

/// Number of bytes a base64 string decodes to.
pub fn decoded_len(data: &str) -> usize {
    let padding = data.bytes().rev().take_while(|b| *b == b'=').take(2).count();
    (data.len() / 4 * 3 + (data.len() % 4) * 3 / 4).saturating_sub(padding)
}

/// Request validation utilities
pub struct RequestValidator;

impl RequestValidator {
    /// Parse and validate a raw analyze request body.
    pub fn parse_analyze_request(body: &[u8]) -> Result<AnalyzeRequest, ProxyError> {
        let request: AnalyzeRequest = serde_json::from_slice(body)
            .map_err(|_| ProxyError::InvalidPayload("Invalid JSON body".to_string()))?;

        request
            .validate()
            .map_err(|errors| ProxyError::InvalidPayload(first_message(&errors)))?;

        Ok(request)
    }
}

/// Report the most fundamental problem first: missing, then oversized, then
/// malformed.
fn first_message(errors: &ValidationErrors) -> String {
    const PRIORITY: [&str; 3] = ["length", "size", "regex"];

    let field_errors = errors.field_errors();
    let found: Vec<&ValidationError> = field_errors
        .values()
        .flat_map(|errs| errs.iter())
        .collect();

    PRIORITY
        .iter()
        .find_map(|code| found.iter().find(|e| e.code == *code))
        .or_else(|| found.first())
        .and_then(|e| e.message.as_ref())
        .map(|m| m.to_string())
        .unwrap_or_else(|| "Invalid request".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(body: &str) -> String {
        match RequestValidator::parse_analyze_request(body.as_bytes()) {
            Err(ProxyError::InvalidPayload(msg)) => msg,
            other => panic!("expected invalid payload, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_request() {
        let request =
            RequestValidator::parse_analyze_request(br#"{"imageData":"iVBORw0KGgo="}"#).unwrap();
        assert_eq!(request.image_data, "iVBORw0KGgo=");
    }

    #[test]
    fn test_missing_image_data() {
        assert_eq!(message("{}"), "No image data provided");
        assert_eq!(message(r#"{"imageData":""}"#), "No image data provided");
        assert_eq!(message(r#"{"imageData":null}"#), "No image data provided");
        assert_eq!(message(r#"{"imageData":42}"#), "No image data provided");
    }

    #[test]
    fn test_invalid_base64() {
        assert_eq!(message(r#"{"imageData":"not base64!"}"#), "Invalid base64 format");
        assert_eq!(message(r#"{"imageData":"data:image/png;base64,AAAA"}"#), "Invalid base64 format");
    }

    #[test]
    fn test_invalid_json() {
        assert_eq!(message("imageData=AAAA"), "Invalid JSON body");
    }

    #[test]
    fn test_oversized_image() {
        let data = "A".repeat(MAX_IMAGE_BYTES / 3 * 4 + 8);
        let body = format!(r#"{{"imageData":"{}"}}"#, data);
        assert_eq!(message(&body), "Image too large (max 10MB)");
    }

    #[test]
    fn test_decoded_len() {
        assert_eq!(decoded_len("TWFu"), 3);
        assert_eq!(decoded_len("TWE="), 2);
        assert_eq!(decoded_len("TQ=="), 1);
        assert_eq!(decoded_len(""), 0);
    }
}
