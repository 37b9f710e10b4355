//! Table definitions for domain entities.
//!
//! Statements are written in the subset of SQL shared by SQLite and
//! PostgreSQL so one migration applies to every supported dialect.

/// Todo table name
pub const TODO_TABLE: &str = "todo";

/// Todo table columns, in select order
pub const TODO_COLUMNS: [&str; 3] = ["id", "name", "description"];

pub const CREATE_TODO_TABLE: &str = "CREATE TABLE IF NOT EXISTS todo (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    description TEXT
)";

/// Todo names are unique
pub const CREATE_TODO_NAME_INDEX: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS todo_name_key ON todo (name)";

/// Comma-separated column list for `SELECT` statements.
#[must_use]
pub fn todo_select_list() -> String {
    TODO_COLUMNS.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_list_matches_columns() {
        assert_eq!(todo_select_list(), "id, name, description");
        for column in TODO_COLUMNS {
            assert!(CREATE_TODO_TABLE.contains(column));
        }
    }
}
