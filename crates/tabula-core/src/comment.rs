//! Project metadata stored in the database comment
//!
//! Each project database describes itself through its PostgreSQL comment:
//! a fixed marker, a one-digit lock flag, and semicolon-separated fields
//! for the visible project name, the administrator list, and the
//! description. The comment is the authoritative copy; an internal table
//! mirrors it as a fallback.
//!
//! Three historical generations of the format exist and must all parse.
//! Detection is order-dependent and ambiguous on purpose: a description
//! that happens to look like an admin list is read as the current format.
//! That matches how historical data has always been interpreted, so the
//! ambiguity is kept rather than repaired.

use std::sync::OnceLock;

use regex::Regex;

use crate::naming;

/// Marker identifying a database comment as a Tabula project record.
pub const PROJECT_MARKER: &str = "tabula";

/// Separator between the comment's metadata fields.
pub const COMMENT_SEPARATOR: char = ';';

/// Separator between names within the administrator field.
pub const ADMIN_SEPARATOR: char = ',';

/// One-or-more comma/semicolon-joined identifier-like names.
fn admin_list_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(?:[a-zA-Z0-9_]+[;,]?)+$").expect("valid regex"))
}

/// The lock/name/admins/description tuple describing a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMetadata {
    /// Cooperative single-writer lock flag.
    pub locked: bool,
    /// Project name with capitalization intact.
    pub visible_name: String,
    /// Project administrator user names.
    pub admins: Vec<String>,
    /// Free-text project description.
    pub description: String,
}

impl ProjectMetadata {
    pub fn new(
        locked: bool,
        visible_name: impl Into<String>,
        admins: Vec<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            locked,
            visible_name: visible_name.into(),
            admins,
            description: description.into(),
        }
    }

    /// Serialize the whole record into the comment wire format.
    ///
    /// Partial field updates are not supported; callers read the current
    /// record, modify it, and re-serialize everything.
    pub fn serialize(&self) -> String {
        format!(
            "{}{}{sep}{}{sep}{}{sep}{}",
            PROJECT_MARKER,
            if self.locked { '1' } else { '0' },
            self.visible_name,
            self.admins.join(&ADMIN_SEPARATOR.to_string()),
            self.description,
            sep = COMMENT_SEPARATOR,
        )
    }

    /// Parse a raw database comment, trying each format generation in order.
    ///
    /// Returns `None` when the comment does not carry the project marker at
    /// all, meaning the database is not a Tabula project.
    pub fn parse(database_name: &str, raw_comment: &str) -> Option<Self> {
        let body = raw_comment.strip_prefix(PROJECT_MARKER)?;
        if body.is_empty() {
            return None;
        }

        // Current generation: lock;visibleName;admins;description
        let fields: Vec<&str> = body.splitn(4, COMMENT_SEPARATOR).collect();
        if fields.len() == 4
            && is_lock_digit(fields[0])
            && naming::project_to_database(fields[1]) == database_name
            && admin_list_pattern().is_match(fields[2])
        {
            return Some(Self {
                locked: fields[0] == "1",
                visible_name: fields[1].to_string(),
                admins: split_admins(fields[2]),
                description: fields[3].to_string(),
            });
        }

        // Legacy generation: lock;visibleName;description (no admin field)
        let fields: Vec<&str> = body.splitn(3, COMMENT_SEPARATOR).collect();
        if fields.len() == 3
            && is_lock_digit(fields[0])
            && naming::project_to_database(fields[1]) == database_name
        {
            return Some(Self {
                locked: fields[0] == "1",
                visible_name: fields[1].to_string(),
                admins: Vec::new(),
                description: fields[2].to_string(),
            });
        }

        // Oldest generation: a lock digit immediately followed by the
        // description. Reached unconditionally when the structural checks
        // above fail; it only needs a first character.
        let mut chars = body.chars();
        let locked = chars.next() == Some('1');
        Some(Self {
            locked,
            visible_name: database_name.to_string(),
            admins: Vec::new(),
            description: chars.as_str().to_string(),
        })
    }

    /// Build the `COMMENT ON DATABASE` statement storing this record.
    ///
    /// Single quotes in the text are doubled so descriptions may contain
    /// them.
    pub fn comment_command(&self, database_name: &str) -> String {
        format!(
            "COMMENT ON DATABASE {} IS '{}'; ",
            database_name.to_lowercase(),
            self.serialize().replace('\'', "''"),
        )
    }
}

fn is_lock_digit(field: &str) -> bool {
    field == "0" || field == "1"
}

fn split_admins(field: &str) -> Vec<String> {
    field
        .split([ADMIN_SEPARATOR, COMMENT_SEPARATOR])
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_wire_format() {
        let meta = ProjectMetadata::new(
            true,
            "Flight Software",
            vec!["alice".into(), "bob".into()],
            "CFS flight tables",
        );
        assert_eq!(
            meta.serialize(),
            "tabula1;Flight Software;alice,bob;CFS flight tables"
        );
    }

    #[test]
    fn test_round_trip() {
        let meta = ProjectMetadata::new(
            false,
            "3Sensor Pkt!",
            vec!["carol".into()],
            "sensor packet definitions",
        );
        let db = naming::project_to_database(&meta.visible_name);
        let parsed = ProjectMetadata::parse(&db, &meta.serialize()).expect("parse");
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_parse_legacy_without_admins() {
        let parsed = ProjectMetadata::parse("demo", "tabula0;Demo;older format comment")
            .expect("parse");
        assert_eq!(parsed.visible_name, "Demo");
        assert!(parsed.admins.is_empty());
        assert_eq!(parsed.description, "older format comment");
        assert!(!parsed.locked);
    }

    #[test]
    fn test_parse_oldest_lock_and_description() {
        let parsed = ProjectMetadata::parse("demo", "tabula1first generation text")
            .expect("parse");
        assert!(parsed.locked);
        assert_eq!(parsed.visible_name, "demo");
        assert!(parsed.admins.is_empty());
        assert_eq!(parsed.description, "first generation text");
    }

    #[test]
    fn test_parse_ambiguous_description_reads_as_current() {
        // A legacy comment whose description looks like an admin list is
        // detected as the current generation. Accepted ambiguity.
        let parsed = ProjectMetadata::parse("demo", "tabula0;Demo;word;trailing").expect("parse");
        assert_eq!(parsed.admins, vec!["word".to_string()]);
        assert_eq!(parsed.description, "trailing");
    }

    #[test]
    fn test_parse_rejects_foreign_comment() {
        assert!(ProjectMetadata::parse("demo", "just a plain comment").is_none());
        assert!(ProjectMetadata::parse("demo", "tabula").is_none());
    }

    #[test]
    fn test_parse_name_mismatch_falls_back() {
        // Field two does not encode to the database name, so the structural
        // checks fail and the oldest generation applies.
        let parsed = ProjectMetadata::parse("demo", "tabula0;Other Project;desc").expect("parse");
        assert_eq!(parsed.visible_name, "demo");
        assert_eq!(parsed.description, ";Other Project;desc");
    }

    #[test]
    fn test_comment_command_doubles_quotes() {
        let meta = ProjectMetadata::new(false, "Demo", vec![], "it's quoted");
        let command = meta.comment_command("demo");
        assert!(command.contains("''"));
        assert!(command.starts_with("COMMENT ON DATABASE demo IS "));
    }
}
