//! Typed table requests.
//!
//! A [`Query`] selects every column of a record's table, optionally filtered,
//! ordered and limited. It is plain data (`Clone + Send`) so it can be moved
//! into reader threads and re-run by observations.

use std::fmt;
use std::marker::PhantomData;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

use crate::record::{FetchableRecord, TableRecord};

/// Quote an SQL identifier, doubling embedded quotes.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// One `ORDER BY` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderingTerm {
    column: String,
    direction: Direction,
}

impl OrderingTerm {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Desc,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

impl fmt::Display for OrderingTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        };
        write!(f, "{} {dir}", quote_identifier(&self.column))
    }
}

/// A request for rows of `T`'s table.
pub struct Query<T> {
    filter: Option<String>,
    params: Vec<Value>,
    order: Vec<OrderingTerm>,
    limit: Option<u64>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            params: self.params.clone(),
            order: self.order.clone(),
            limit: self.limit,
            _record: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("filter", &self.filter)
            .field("params", &self.params)
            .field("order", &self.order)
            .field("limit", &self.limit)
            .finish()
    }
}

impl<T> Query<T> {
    /// Every row of the table.
    pub fn all() -> Self {
        Self {
            filter: None,
            params: Vec::new(),
            order: Vec::new(),
            limit: None,
            _record: PhantomData,
        }
    }

    /// Restrict rows with an SQL predicate using positional `?` parameters.
    ///
    /// Calling `filter` again combines predicates with `AND`.
    #[must_use]
    pub fn filter<I>(mut self, predicate: &str, params: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.filter = Some(match self.filter.take() {
            Some(existing) => format!("({existing}) AND ({predicate})"),
            None => predicate.to_string(),
        });
        self.params.extend(params.into_iter().map(Into::into));
        self
    }

    /// Append an ordering term. Terms apply in the order they are added.
    #[must_use]
    pub fn order(mut self, term: OrderingTerm) -> Self {
        self.order.push(term);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl<T: TableRecord> Query<T> {
    /// Name of the table this query reads.
    pub fn table(&self) -> &'static str {
        T::TABLE_NAME
    }

    /// The generated `SELECT` statement.
    pub fn sql(&self) -> String {
        let mut sql = format!("SELECT * FROM {}", quote_identifier(T::TABLE_NAME));
        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }
        if !self.order.is_empty() {
            let terms = self
                .order
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms);
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql
    }

    /// Number of rows matching the filter. Ordering and limit are ignored.
    pub fn fetch_count(&self, conn: &Connection) -> rusqlite::Result<i64> {
        let mut sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(T::TABLE_NAME));
        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }
        let mut stmt = conn.prepare_cached(&sql)?;
        stmt.query_row(params_from_iter(self.params.iter()), |row| row.get(0))
    }
}

impl<T: TableRecord + FetchableRecord> Query<T> {
    pub fn fetch_all(&self, conn: &Connection) -> rusqlite::Result<Vec<T>> {
        let mut stmt = conn.prepare_cached(&self.sql())?;
        let rows = stmt
            .query_map(params_from_iter(self.params.iter()), T::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// First matching row, if any.
    pub fn fetch_one(&self, conn: &Connection) -> rusqlite::Result<Option<T>> {
        let query = self.clone().limit(1);
        let mut stmt = conn.prepare_cached(&query.sql())?;
        stmt.query_row(params_from_iter(query.params.iter()), T::from_row)
            .optional()
    }
}
