// Input validation and coercion for the {value, value_type} field wrapper
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::OpError;

const MAX_STRING_LEN: usize = 255;

/// A named input field as it arrives on the wire: an untyped value plus the
/// type tag the client claims for it. Nothing downstream touches the raw
/// value; handlers coerce through the typed accessors below.
#[derive(Debug, Clone, Deserialize)]
pub struct Field {
    pub value: Value,
    pub value_type: String,
}

impl Field {
    /// Coerce to a UUID. Accepts a JSON string carrying a canonical or
    /// hyphen-less UUID representation.
    pub fn as_uuid(&self, name: &str) -> Result<Uuid, OpError> {
        self.expect_type(name, "uuid")?;
        let raw = self
            .value
            .as_str()
            .ok_or_else(|| invalid(name, "must be a string-encoded uuid"))?;
        Uuid::parse_str(raw.trim()).map_err(|_| invalid(name, "is not a valid uuid"))
    }

    /// Coerce to a trimmed, length-bounded string with no control characters.
    pub fn as_string(&self, name: &str) -> Result<String, OpError> {
        self.expect_type(name, "string")?;
        let raw = self
            .value
            .as_str()
            .ok_or_else(|| invalid(name, "must be a string"))?;
        let cleaned = raw.trim();
        if cleaned.is_empty() {
            return Err(invalid(name, "must not be empty"));
        }
        // Character count, not bytes: multibyte names get the full limit.
        if cleaned.chars().count() > MAX_STRING_LEN {
            return Err(invalid(name, "exceeds the maximum length"));
        }
        if cleaned.chars().any(char::is_control) {
            return Err(invalid(name, "contains control characters"));
        }
        Ok(cleaned.to_string())
    }

    /// Coerce to an integer. Accepts a JSON number or a numeric string.
    pub fn as_int(&self, name: &str) -> Result<i64, OpError> {
        self.expect_type(name, "int")?;
        match &self.value {
            Value::Number(n) => n.as_i64().ok_or_else(|| invalid(name, "must be an integer")),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| invalid(name, "must be an integer")),
            _ => Err(invalid(name, "must be an integer")),
        }
    }

    /// Coerce to a lowercased email address. The check is intentionally
    /// shallow; delivery failures are the real validator.
    pub fn as_email(&self, name: &str) -> Result<String, OpError> {
        self.expect_type(name, "email")?;
        let raw = self
            .value
            .as_str()
            .ok_or_else(|| invalid(name, "must be a string"))?;
        let cleaned = raw.trim().to_lowercase();
        let Some((local, domain)) = cleaned.split_once('@') else {
            return Err(invalid(name, "is not a valid email address"));
        };
        if local.is_empty() || domain.is_empty() || !domain.contains('.') || cleaned.chars().count() > MAX_STRING_LEN {
            return Err(invalid(name, "is not a valid email address"));
        }
        Ok(cleaned)
    }

    fn expect_type(&self, name: &str, expected: &str) -> Result<(), OpError> {
        if self.value_type == expected {
            Ok(())
        } else {
            Err(invalid(name, &format!("must be declared as {}", expected)))
        }
    }
}

fn invalid(name: &str, reason: &str) -> OpError {
    OpError::validation(format!("{} {}", name, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(value: Value, value_type: &str) -> Field {
        Field {
            value,
            value_type: value_type.to_string(),
        }
    }

    #[test]
    fn accepts_valid_uuid() {
        let id = Uuid::new_v4();
        let f = field(json!(id.to_string()), "uuid");
        assert_eq!(f.as_uuid("pool_id").unwrap(), id);
    }

    #[test]
    fn rejects_uuid_with_wrong_type_tag() {
        let f = field(json!(Uuid::new_v4().to_string()), "string");
        let err = f.as_uuid("pool_id").unwrap_err();
        assert!(err.to_string().contains("pool_id"));
    }

    #[test]
    fn rejects_malformed_uuid() {
        let f = field(json!("not-a-uuid"), "uuid");
        assert!(f.as_uuid("device_id").is_err());
    }

    #[test]
    fn trims_and_bounds_strings() {
        let f = field(json!("  Factory Floor  "), "string");
        assert_eq!(f.as_string("pool_name").unwrap(), "Factory Floor");

        let long = "x".repeat(300);
        let f = field(json!(long), "string");
        assert!(f.as_string("pool_name").is_err());

        let f = field(json!("   "), "string");
        assert!(f.as_string("pool_name").is_err());
    }

    #[test]
    fn length_limit_counts_characters_not_bytes() {
        // 200 two-byte characters fit the 255-character bound
        let f = field(json!("ü".repeat(200)), "string");
        assert!(f.as_string("pool_name").is_ok());

        let f = field(json!("ü".repeat(256)), "string");
        assert!(f.as_string("pool_name").is_err());
    }

    #[test]
    fn rejects_control_characters() {
        let f = field(json!("name\u{0007}"), "string");
        assert!(f.as_string("pool_name").is_err());
    }

    #[test]
    fn parses_ints_from_numbers_and_strings() {
        assert_eq!(field(json!(42), "int").as_int("count").unwrap(), 42);
        assert_eq!(field(json!("42"), "int").as_int("count").unwrap(), 42);
        assert!(field(json!(4.2), "int").as_int("count").is_err());
        assert!(field(json!([1]), "int").as_int("count").is_err());
    }

    #[test]
    fn normalises_emails() {
        let f = field(json!(" Ops@Example.COM "), "email");
        assert_eq!(f.as_email("target_email").unwrap(), "ops@example.com");
        assert!(field(json!("nope"), "email").as_email("target_email").is_err());
        assert!(field(json!("a@b"), "email").as_email("target_email").is_err());
    }
}
