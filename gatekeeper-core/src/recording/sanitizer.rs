use serde_json::Value;
use std::collections::HashMap;

/// Headers that contain security-sensitive values and must be redacted.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-signature-ed25519",
];

/// Path segments that are followed by an id and then a secret token,
/// e.g. `/interactions/{id}/{token}/callback` and `/webhooks/{app}/{token}`.
const TOKEN_BEARING_SEGMENTS: &[&str] = &["interactions", "webhooks"];

const REDACTED: &str = "[REDACTED]";

pub struct Sanitizer;

impl Sanitizer {
    /// Check if a header name is sensitive and should be redacted.
    pub fn is_sensitive_header(header_name: &str) -> bool {
        let lower = header_name.to_lowercase();
        SENSITIVE_HEADERS.contains(&lower.as_str())
    }

    /// Remove sensitive data from headers
    pub fn sanitize_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
        let mut sanitized = HashMap::new();

        for (key, value) in headers {
            let sanitized_value = if Self::is_sensitive_header(key) {
                REDACTED.to_string()
            } else {
                value.clone()
            };
            sanitized.insert(key.clone(), sanitized_value);
        }

        sanitized
    }

    /// Remove sensitive data from JSON payloads
    pub fn sanitize_json(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut sanitized = serde_json::Map::new();
                for (key, val) in map {
                    let sanitized_val = match key.as_str() {
                        "token" | "secret" | "password" => Value::String(REDACTED.to_string()),
                        _ => Self::sanitize_json(val),
                    };
                    sanitized.insert(key.clone(), sanitized_val);
                }
                Value::Object(sanitized)
            }
            Value::Array(arr) => Value::Array(arr.iter().map(Self::sanitize_json).collect()),
            _ => value.clone(),
        }
    }

    /// Redact interaction and webhook tokens embedded in a URL path.
    pub fn sanitize_path(path: &str) -> String {
        let mut segments: Vec<&str> = path.split('/').collect();
        let mut i = 0;
        while i < segments.len() {
            if TOKEN_BEARING_SEGMENTS.contains(&segments[i]) && i + 2 < segments.len() {
                segments[i + 2] = REDACTED;
                i += 3;
            } else {
                i += 1;
            }
        }
        segments.join("/")
    }
}
