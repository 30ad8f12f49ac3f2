//! Internal bookkeeping tables
//!
//! Tables prefixed with `__` belong to Tabula itself rather than to user
//! data. They are created on first open of a project when absent, with
//! ownership granted to the project's owner role.

use tabula_core::INTERNAL_TABLE_PREFIX;

use crate::ddl::{owner_command, DatabaseObject};

/// The fixed set of internal tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalTable {
    /// Per-user access levels; feeds access-level derivation on connect.
    Users,
    /// Custom cell values overriding prototype table columns.
    Values,
    /// Variable links and their sample rates.
    Links,
    /// Macro name/value pairs referenced by array sizes and values.
    Macros,
    /// Stored scripts; created on demand rather than at open.
    Scripts,
    /// Mirror of the project metadata comment, used as a read fallback.
    Project,
}

impl InternalTable {
    pub const ALL: [InternalTable; 6] = [
        InternalTable::Users,
        InternalTable::Values,
        InternalTable::Links,
        InternalTable::Macros,
        InternalTable::Scripts,
        InternalTable::Project,
    ];

    /// Table name including the internal prefix.
    pub fn table_name(&self) -> String {
        let base = match self {
            InternalTable::Users => "users",
            InternalTable::Values => "values",
            InternalTable::Links => "links",
            InternalTable::Macros => "macros",
            InternalTable::Scripts => "scripts",
            InternalTable::Project => "project",
        };
        format!("{INTERNAL_TABLE_PREFIX}{base}")
    }

    /// Column definition list for the table's CREATE statement.
    fn column_command(&self) -> &'static str {
        match self {
            InternalTable::Users => "(user_name text NOT NULL, access_level text NOT NULL)",
            InternalTable::Values => "(table_path text, column_name text, value text)",
            InternalTable::Links => "(rate_name text, link_name text, member text)",
            InternalTable::Macros => "(macro_name text NOT NULL, value text)",
            InternalTable::Scripts => "(script_name text NOT NULL, line_text text)",
            InternalTable::Project => {
                "(locked boolean NOT NULL, visible_name text NOT NULL, \
                 admins text NOT NULL, description text NOT NULL)"
            }
        }
    }

    /// Whether the table is created during project open. The scripts table
    /// is special; it is created per stored script on demand.
    pub fn created_at_open(&self) -> bool {
        !matches!(self, InternalTable::Scripts)
    }

    /// Build the command creating this table and assigning ownership.
    pub fn build_command(&self, owner: &str) -> String {
        let name = self.table_name();
        format!(
            "CREATE TABLE {} {}; {}",
            name,
            self.column_command(),
            owner_command(owner, DatabaseObject::Table, &name),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names_carry_internal_prefix() {
        for table in InternalTable::ALL {
            assert!(table.table_name().starts_with(INTERNAL_TABLE_PREFIX));
        }
    }

    #[test]
    fn test_build_command_creates_and_grants() {
        let command = InternalTable::Users.build_command("flight_group");
        assert!(command.starts_with("CREATE TABLE __users (user_name text NOT NULL"));
        assert!(command.contains("ALTER TABLE __users OWNER TO flight_group"));
    }

    #[test]
    fn test_scripts_table_not_created_at_open() {
        assert!(!InternalTable::Scripts.created_at_open());
        assert!(InternalTable::Users.created_at_open());
    }
}
