//! Record traits and single-row persistence.
//!
//! A row type opts into fetching with [`FetchableRecord`] and into writes with
//! [`TableRecord`] + [`PersistableRecord`]. The persistence methods are
//! provided: implementors only describe their table, their primary key and
//! their column values.
//!
//! The primary key column must be an `INTEGER PRIMARY KEY` (a rowid alias):
//! inserts without an explicit key read the assigned identity back from
//! `last_insert_rowid()`.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::query::{quote_identifier, Query};

/// A type that can be decoded from a result row.
pub trait FetchableRecord: Sized {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// A type backed by a database table.
pub trait TableRecord {
    /// Name of the backing table.
    const TABLE_NAME: &'static str;

    /// Name of the `INTEGER PRIMARY KEY` column.
    const PRIMARY_KEY: &'static str = "id";

    /// Full-table request for this record type.
    fn all() -> Query<Self>
    where
        Self: Sized,
    {
        Query::all()
    }
}

/// Outcome of [`PersistableRecord::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveAction {
    Inserted,
    Updated,
}

/// A record that can be inserted, updated, saved and deleted.
pub trait PersistableRecord: TableRecord {
    /// The persisted identity, `None` until the record has been inserted.
    fn primary_key(&self) -> Option<i64>;

    /// Assign the persisted identity.
    fn set_primary_key(&mut self, id: i64);

    /// Column/value pairs to write, excluding the primary key.
    fn persistence_values(&self) -> Vec<(&'static str, Value)>;

    /// Insert the record, assigning its primary key when it has none.
    fn insert(&mut self, conn: &Connection) -> Result<()> {
        let mut values = self.persistence_values();
        let explicit_key = self.primary_key();
        if let Some(id) = explicit_key {
            values.insert(0, (Self::PRIMARY_KEY, Value::Integer(id)));
        }

        let table = quote_identifier(Self::TABLE_NAME);
        let sql = if values.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES")
        } else {
            let columns = values
                .iter()
                .map(|(column, _)| quote_identifier(column))
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = (1..=values.len())
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("INSERT INTO {table} ({columns}) VALUES ({placeholders})")
        };

        let mut stmt = conn.prepare_cached(&sql)?;
        stmt.execute(params_from_iter(values.iter().map(|(_, value)| value)))?;

        if explicit_key.is_none() {
            self.set_primary_key(conn.last_insert_rowid());
        }
        Ok(())
    }

    /// Update the row identified by the record's primary key.
    ///
    /// # Errors
    ///
    /// [`Error::MissingPrimaryKey`] if the record was never persisted,
    /// [`Error::RecordNotFound`] if no row has that key.
    fn update(&self, conn: &Connection) -> Result<()> {
        let key = self.primary_key().ok_or(Error::MissingPrimaryKey {
            table: Self::TABLE_NAME,
        })?;
        let values = self.persistence_values();
        if values.is_empty() {
            return if self.exists(conn)? {
                Ok(())
            } else {
                Err(Error::RecordNotFound {
                    table: Self::TABLE_NAME,
                    key,
                })
            };
        }

        let assignments = values
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{} = ?{}", quote_identifier(column), i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {assignments} WHERE {} = ?{}",
            quote_identifier(Self::TABLE_NAME),
            quote_identifier(Self::PRIMARY_KEY),
            values.len() + 1
        );

        let key_value = Value::Integer(key);
        let mut stmt = conn.prepare_cached(&sql)?;
        let changed = stmt.execute(params_from_iter(
            values
                .iter()
                .map(|(_, value)| value)
                .chain(std::iter::once(&key_value)),
        ))?;

        if changed == 0 {
            return Err(Error::RecordNotFound {
                table: Self::TABLE_NAME,
                key,
            });
        }
        Ok(())
    }

    /// Update the record if its row exists, insert it otherwise.
    fn save(&mut self, conn: &Connection) -> Result<SaveAction> {
        if self.primary_key().is_some() {
            match self.update(conn) {
                Ok(()) => return Ok(SaveAction::Updated),
                Err(Error::RecordNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        self.insert(conn)?;
        Ok(SaveAction::Inserted)
    }

    /// Delete the row identified by the record's primary key.
    ///
    /// Returns whether a row was deleted. A record without a primary key
    /// deletes nothing.
    fn delete(&self, conn: &Connection) -> Result<bool> {
        let Some(key) = self.primary_key() else {
            return Ok(false);
        };
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote_identifier(Self::TABLE_NAME),
            quote_identifier(Self::PRIMARY_KEY)
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        Ok(stmt.execute([key])? > 0)
    }

    /// Whether a row with the record's primary key exists.
    fn exists(&self, conn: &Connection) -> Result<bool> {
        let Some(key) = self.primary_key() else {
            return Ok(false);
        };
        let sql = format!(
            "SELECT 1 FROM {} WHERE {} = ?1",
            quote_identifier(Self::TABLE_NAME),
            quote_identifier(Self::PRIMARY_KEY)
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let found = stmt.query_row([key], |_| Ok(())).optional()?;
        Ok(found.is_some())
    }
}

/// Identity transfer that copies the persisted primary key of `from` into
/// `into`. Leaves `into` untouched when `from` has no key.
pub fn copy_primary_key<T: PersistableRecord>(from: &T, into: &mut T) {
    if let Some(id) = from.primary_key() {
        into.set_primary_key(id);
    }
}
