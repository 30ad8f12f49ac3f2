//! Project name to database identifier encoding
//!
//! A project's visible name is free text; the backing PostgreSQL database
//! needs a safe lower-case identifier. The conversion is deterministic and
//! idempotent, so an already-encoded name passes through unchanged.

use crate::MAX_SQL_NAME_LENGTH;

/// Convert a project's visible name into its database identifier.
///
/// Lower-cases the name, escapes a leading digit with an underscore,
/// replaces every character outside `[a-z0-9_]` with an underscore, and
/// truncates to fit the PostgreSQL identifier length limit.
pub fn project_to_database(name: &str) -> String {
    let lowered = name.to_lowercase();

    let mut encoded = String::with_capacity(lowered.len() + 1);
    if lowered.starts_with(|c: char| c.is_ascii_digit()) {
        encoded.push('_');
    }

    for c in lowered.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
            encoded.push(c);
        } else {
            encoded.push('_');
        }
    }

    if encoded.len() >= MAX_SQL_NAME_LENGTH {
        encoded.truncate(MAX_SQL_NAME_LENGTH - 1);
    }

    encoded
}

/// Quote an identifier if it collides with a reserved word.
///
/// The reserved-word set comes from the server each time a new server is
/// contacted; different server versions reserve different words.
pub fn quote_if_reserved(identifier: &str, reserved_words: &[String]) -> String {
    let lowered = identifier.to_lowercase();

    if reserved_words
        .iter()
        .any(|word| word.eq_ignore_ascii_case(&lowered))
    {
        format!("\"{lowered}\"")
    } else {
        lowered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_basic() {
        assert_eq!(project_to_database("Flight Software"), "flight_software");
        assert_eq!(project_to_database("3Sensor Pkt!"), "_3sensor_pkt_");
    }

    #[test]
    fn test_encode_idempotent() {
        for name in ["3Sensor Pkt!", "Already_encoded", "a b c", "_x9"] {
            let once = project_to_database(name);
            assert_eq!(project_to_database(&once), once);
        }
    }

    #[test]
    fn test_encode_truncates_to_identifier_limit() {
        let long = "x".repeat(200);
        let encoded = project_to_database(&long);
        assert_eq!(encoded.len(), MAX_SQL_NAME_LENGTH - 1);
    }

    #[test]
    fn test_encode_leading_digit() {
        assert_eq!(project_to_database("9lives"), "_9lives");
        // The escape is not re-applied to an already escaped name
        assert_eq!(project_to_database("_9lives"), "_9lives");
    }

    #[test]
    fn test_quote_if_reserved() {
        let reserved = vec!["select".to_string(), "table".to_string()];
        assert_eq!(quote_if_reserved("select", &reserved), "\"select\"");
        assert_eq!(quote_if_reserved("SELECT", &reserved), "\"select\"");
        assert_eq!(quote_if_reserved("payload", &reserved), "payload");
    }
}
