// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Transactional CRUD primitives shared by every record type.
//!
//! Statements are written with `?` placeholders and rebound for the target
//! dialect just before execution. All primitives run on a caller-supplied
//! connection, which is either a pooled connection or an open transaction.

use sqlx::any::{AnyArguments, AnyRow};
use sqlx::query::{Query, QueryAs};
use sqlx::{Any, AnyConnection, FromRow};

use super::Dialect;
use crate::error::Result;

/// A bindable column value. Every column is either BIGINT or text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    /// BIGINT column.
    Int(i64),
    /// Text column.
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&String> for SqlValue {
    fn from(v: &String) -> Self {
        SqlValue::Text(v.clone())
    }
}

/// Conjunction of predicates rendered as a `WHERE` clause.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    clauses: Vec<String>,
    args: Vec<SqlValue>,
}

impl Filter {
    /// Matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// `column = value`
    pub fn eq(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.cmp(column, "=", value)
    }

    /// `column < value`
    pub fn lt(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.cmp(column, "<", value)
    }

    /// `column > value`
    pub fn gt(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.cmp(column, ">", value)
    }

    /// `column <= value`
    pub fn le(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.cmp(column, "<=", value)
    }

    /// `column = value` only when `value` is set.
    pub fn eq_opt<V: Into<SqlValue>>(self, column: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.eq(column, value),
            None => self,
        }
    }

    /// `column IN (...)`. An empty list matches nothing.
    pub fn in_list<V: Into<SqlValue>>(
        mut self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values: Vec<SqlValue> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            self.clauses.push("1 = 0".to_string());
            return self;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        self.clauses.push(format!("{} IN ({})", column, placeholders));
        self.args.extend(values);
        self
    }

    fn cmp(mut self, column: &str, op: &str, value: impl Into<SqlValue>) -> Self {
        self.clauses.push(format!("{} {} ?", column, op));
        self.args.push(value.into());
        self
    }

    fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

fn bind<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    args: &[SqlValue],
) -> Query<'q, Any, AnyArguments<'q>> {
    for arg in args {
        query = match arg {
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

fn bind_as<'q, O>(
    mut query: QueryAs<'q, Any, O, AnyArguments<'q>>,
    args: &[SqlValue],
) -> QueryAs<'q, Any, O, AnyArguments<'q>> {
    for arg in args {
        query = match arg {
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

/// `INSERT INTO table (columns) VALUES (...)`
pub(crate) async fn insert(
    conn: &mut AnyConnection,
    dialect: Dialect,
    table: &str,
    values: &[(&str, SqlValue)],
) -> Result<()> {
    let columns: Vec<&str> = values.iter().map(|(c, _)| *c).collect();
    let placeholders = vec!["?"; values.len()].join(", ");
    let sql = dialect.rebind(&format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders
    ));
    let args: Vec<SqlValue> = values.iter().map(|(_, v)| v.clone()).collect();
    bind(sqlx::query(&sql), &args).execute(&mut *conn).await?;
    Ok(())
}

/// `UPDATE table SET ... WHERE ...`, returning the number of rows affected.
pub(crate) async fn update(
    conn: &mut AnyConnection,
    dialect: Dialect,
    table: &str,
    values: &[(&str, SqlValue)],
    filter: &Filter,
) -> Result<u64> {
    let assignments: Vec<String> = values.iter().map(|(c, _)| format!("{} = ?", c)).collect();
    let sql = dialect.rebind(&format!(
        "UPDATE {} SET {}{}",
        table,
        assignments.join(", "),
        filter.where_clause()
    ));
    let mut args: Vec<SqlValue> = values.iter().map(|(_, v)| v.clone()).collect();
    args.extend(filter.args.iter().cloned());
    let result = bind(sqlx::query(&sql), &args).execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

/// `DELETE FROM table WHERE ...`, returning the number of rows affected.
pub(crate) async fn delete(
    conn: &mut AnyConnection,
    dialect: Dialect,
    table: &str,
    filter: &Filter,
) -> Result<u64> {
    let sql = dialect.rebind(&format!("DELETE FROM {}{}", table, filter.where_clause()));
    let result = bind(sqlx::query(&sql), &filter.args)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Row selection. With `for_update` the rows stay locked until the
/// enclosing transaction ends.
pub(crate) struct Select<'a> {
    pub table: &'a str,
    pub columns: &'a str,
    pub filter: Filter,
    pub order_by: Option<&'a str>,
    pub for_update: bool,
}

impl<'a> Select<'a> {
    pub(crate) fn new(table: &'a str, columns: &'a str, filter: Filter) -> Self {
        Self {
            table,
            columns,
            filter,
            order_by: None,
            for_update: false,
        }
    }

    pub(crate) fn order_by(mut self, order_by: &'a str) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub(crate) fn for_update(mut self) -> Self {
        self.for_update = true;
        self
    }

    fn sql(&self, dialect: Dialect) -> String {
        let mut sql = format!(
            "SELECT {} FROM {}{}",
            self.columns,
            self.table,
            self.filter.where_clause()
        );
        if let Some(order_by) = self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order_by);
        }
        if self.for_update {
            sql.push_str(dialect.lock_clause());
        }
        dialect.rebind(&sql)
    }

    pub(crate) async fn fetch_all<R>(
        self,
        conn: &mut AnyConnection,
        dialect: Dialect,
    ) -> Result<Vec<R>>
    where
        R: for<'r> FromRow<'r, AnyRow> + Send + Unpin,
    {
        let sql = self.sql(dialect);
        let rows = bind_as(sqlx::query_as::<_, R>(&sql), &self.filter.args)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows)
    }

    pub(crate) async fn fetch_optional<R>(
        self,
        conn: &mut AnyConnection,
        dialect: Dialect,
    ) -> Result<Option<R>>
    where
        R: for<'r> FromRow<'r, AnyRow> + Send + Unpin,
    {
        let sql = self.sql(dialect);
        let row = bind_as(sqlx::query_as::<_, R>(&sql), &self.filter.args)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }
}
