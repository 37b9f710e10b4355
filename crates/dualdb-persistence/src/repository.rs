//! # Repository
//!
//! Todo persistence over any [`Driver`](crate::driver::Driver). Reads go
//! through the client's read cache unless the repository is built with
//! bypassing options; writes are replicated by whatever chain the driver
//! belongs to.

use async_trait::async_trait;

use dualdb_domain::Todo;
use dualdb_domain::schema::{TODO_TABLE, todo_select_list};

use crate::config::Dialect;
use crate::driver::SharedDriver;
use crate::error::{PersistenceError, Result};
use crate::types::{QueryOptions, ResultSet, Value};

// =============================================================================
// TODO REPOSITORY
// =============================================================================

/// Repository for Todo entity operations
#[async_trait]
pub trait TodoRepository: Send + Sync {
    /// Get todo by ID
    async fn get_by_id(&self, id: &str) -> Result<Option<Todo>>;

    /// Get all todos ordered by name
    async fn list(&self) -> Result<Vec<Todo>>;

    /// Create a new todo
    async fn create(&self, todo: &Todo) -> Result<()>;

    /// Update name and description; the id is immutable
    async fn update(&self, todo: &Todo) -> Result<()>;

    /// Delete todo, returning whether it existed
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// [`TodoRepository`] issuing SQL through a driver chain.
pub struct SqlTodoRepository {
    driver: SharedDriver,
    opts: QueryOptions,
}

impl SqlTodoRepository {
    pub fn new(driver: SharedDriver) -> Self {
        Self {
            driver,
            opts: QueryOptions::new(),
        }
    }

    /// Options applied to every call, e.g. to bypass the cache or bound latency.
    #[must_use]
    pub fn with_options(mut self, opts: QueryOptions) -> Self {
        self.opts = opts;
        self
    }

    fn dialect(&self) -> Dialect {
        self.driver.dialect()
    }
}

fn text(rows: &ResultSet, row: usize, column: &str) -> Result<Option<String>> {
    match rows.value(row, column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Text(s)) => Ok(Some(s.clone())),
        Some(other) => Err(PersistenceError::Serialization(format!(
            "column {column} is not text: {other:?}"
        ))),
    }
}

fn to_todos(rows: &ResultSet) -> Result<Vec<Todo>> {
    (0..rows.len())
        .map(|row| {
            let id = text(rows, row, "id")?.unwrap_or_default();
            let name = text(rows, row, "name")?.unwrap_or_default();
            let mut todo = Todo::with_id(id, name)?;
            todo.description = text(rows, row, "description")?;
            Ok(todo)
        })
        .collect()
}

#[async_trait]
impl TodoRepository for SqlTodoRepository {
    async fn get_by_id(&self, id: &str) -> Result<Option<Todo>> {
        let statement = format!(
            "SELECT {} FROM {TODO_TABLE} WHERE id = {}",
            todo_select_list(),
            self.dialect().placeholder(1)
        );
        let rows = self
            .driver
            .query(&statement, &[id.into()], &self.opts)
            .await?;
        Ok(to_todos(&rows)?.into_iter().next())
    }

    async fn list(&self) -> Result<Vec<Todo>> {
        let statement = format!(
            "SELECT {} FROM {TODO_TABLE} ORDER BY name",
            todo_select_list()
        );
        let rows = self.driver.query(&statement, &[], &self.opts).await?;
        to_todos(&rows)
    }

    async fn create(&self, todo: &Todo) -> Result<()> {
        todo.validate()?;
        let d = self.dialect();
        let statement = format!(
            "INSERT INTO {TODO_TABLE} ({}) VALUES ({}, {}, {})",
            todo_select_list(),
            d.placeholder(1),
            d.placeholder(2),
            d.placeholder(3)
        );
        let args: [Value; 3] = [
            todo.id.as_str().into(),
            todo.name.as_str().into(),
            todo.description.clone().into(),
        ];
        self.driver.execute(&statement, &args, &self.opts).await?;
        Ok(())
    }

    async fn update(&self, todo: &Todo) -> Result<()> {
        todo.validate()?;
        let d = self.dialect();
        let statement = format!(
            "UPDATE {TODO_TABLE} SET name = {}, description = {} WHERE id = {}",
            d.placeholder(1),
            d.placeholder(2),
            d.placeholder(3)
        );
        let args: [Value; 3] = [
            todo.name.as_str().into(),
            todo.description.clone().into(),
            todo.id.as_str().into(),
        ];
        let result = self.driver.execute(&statement, &args, &self.opts).await?;
        if result.rows_affected == 0 {
            return Err(PersistenceError::NotFound {
                entity_type: "Todo".to_string(),
                key: todo.id.clone(),
            });
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let statement = format!(
            "DELETE FROM {TODO_TABLE} WHERE id = {}",
            self.dialect().placeholder(1)
        );
        let result = self
            .driver
            .execute(&statement, &[id.into()], &self.opts)
            .await?;
        Ok(result.rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubDriver;
    use std::sync::Arc;

    const SELECT_BY_ID: &str = "SELECT id, name, description FROM todo WHERE id = ?";
    const UPDATE: &str = "UPDATE todo SET name = ?, description = ? WHERE id = ?";

    #[tokio::test]
    async fn test_get_by_id_maps_rows() {
        let rows = ResultSet::new(["id", "name", "description"]).with_row(vec![
            "1".into(),
            "buy milk".into(),
            Value::Null,
        ]);
        let stub = StubDriver::new().with_result(SELECT_BY_ID, rows);
        let repo = SqlTodoRepository::new(Arc::new(stub));

        let todo = repo.get_by_id("1").await.unwrap().unwrap();
        assert_eq!(todo.name, "buy milk");
        assert!(todo.description.is_none());
    }

    #[tokio::test]
    async fn test_create_binds_null_description() {
        let stub = StubDriver::new();
        let repo = SqlTodoRepository::new(Arc::new(stub.clone()));

        repo.create(&Todo::with_id("1", "buy milk").unwrap())
            .await
            .unwrap();

        let call = &stub.executed()[0];
        assert_eq!(
            call.statement,
            "INSERT INTO todo (id, name, description) VALUES (?, ?, ?)"
        );
        assert_eq!(call.args[2], Value::Null);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let stub = StubDriver::new().with_rows_affected(UPDATE, 0);
        let repo = SqlTodoRepository::new(Arc::new(stub));

        let err = repo
            .update(&Todo::with_id("404", "ghost").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound { key, .. } if key == "404"));
    }

    #[tokio::test]
    async fn test_postgres_placeholders() {
        let stub = StubDriver::new().with_dialect(Dialect::Postgres);
        let repo = SqlTodoRepository::new(Arc::new(stub.clone()));

        repo.delete("1").await.unwrap();
        assert_eq!(stub.executed()[0].statement, "DELETE FROM todo WHERE id = $1");
    }

    #[tokio::test]
    async fn test_invalid_todo_never_reaches_driver() {
        let stub = StubDriver::new();
        let repo = SqlTodoRepository::new(Arc::new(stub.clone()));
        let mut todo = Todo::with_id("1", "x").unwrap();
        todo.name = "  ".to_string();

        let err = repo.create(&todo).await.unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidQuery(_)));
        assert_eq!(stub.execute_count(), 0);
    }
}
