//! Ownership and privilege commands shared by schema and lifecycle code

/// Kind of database object an ownership command applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseObject {
    Database,
    Table,
    Function,
}

impl DatabaseObject {
    fn keyword(&self) -> &'static str {
        match self {
            DatabaseObject::Database => "DATABASE",
            DatabaseObject::Table => "TABLE",
            DatabaseObject::Function => "FUNCTION",
        }
    }
}

/// Build the command changing an object's owner and granting the owner
/// role full privileges on it.
pub fn owner_command(owner: &str, object: DatabaseObject, object_name: &str) -> String {
    format!(
        "ALTER {kind} {name} OWNER TO {owner}; \
         GRANT ALL PRIVILEGES ON {kind} {name} TO GROUP {owner}; ",
        kind = object.keyword(),
        name = object_name,
        owner = owner,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_command_shape() {
        let command = owner_command("flight_group", DatabaseObject::Function, "reset_link_rate()");
        assert!(command.starts_with("ALTER FUNCTION reset_link_rate() OWNER TO flight_group;"));
        assert!(command.contains("GRANT ALL PRIVILEGES ON FUNCTION reset_link_rate()"));
    }
}
