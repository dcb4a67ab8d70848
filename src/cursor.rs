//! Cursors for ordered traversal of a database.
//!
//! A cursor borrows its [`Database`], so it can never outlive it. It
//! remembers the key it is positioned on and re-searches the index on every
//! move, so inserts and deletes made after it was created (through any
//! handle) are visible to it. Reading the current record re-reads it too: an
//! overwrite shows the new value, and a record deleted underneath the cursor
//! leaves it detached. A detached cursor has no current record, but `next`
//! and `prev` still continue from where the record was.

use crate::engine::{Entry, SeekMode};
use crate::error::{Error, Result};
use crate::Database;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Position {
    Uninitialized,
    At(Entry),
    /// The record under the cursor was deleted by someone else.
    Detached(Vec<u8>),
    Eof,
}

/// A stateful iterator over the records of a database.
///
/// # Example
///
/// ```rust,no_run
/// use unqdb::{Database, Options};
///
/// # fn main() -> Result<(), unqdb::Error> {
/// let db = Database::open("./data.db", Options::default())?;
/// db.store(b"a", b"1")?;
/// db.store(b"b", b"2")?;
///
/// let mut cursor = db.cursor();
/// cursor.first()?;
/// while cursor.is_valid() {
///     let (key, value) = cursor.entry()?;
///     println!("{:?} => {:?}", key, value);
///     if cursor.next().is_err() {
///         break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Cursor<'db> {
    db: &'db Database,
    position: Position,
    closed: bool,
}

impl<'db> Cursor<'db> {
    pub(crate) fn new(db: &'db Database) -> Self {
        Self { db, position: Position::Uninitialized, closed: false }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::invalid_state("cursor is closed"));
        }
        Ok(())
    }

    fn land(&mut self, found: Option<Entry>, miss: Error) -> Result<()> {
        match found {
            Some(entry) => {
                self.position = Position::At(entry);
                Ok(())
            }
            None => {
                self.position = Position::Eof;
                Err(miss)
            }
        }
    }

    fn seek_with(&mut self, key: &[u8], mode: SeekMode) -> Result<()> {
        self.ensure_open()?;
        let found = self.db.with_engine(|engine| engine.seek(key, mode))?;
        let miss = format!("{:?} seek for {:?}", mode, String::from_utf8_lossy(key));
        self.land(found, Error::not_found(miss))
    }

    /// Positions on exactly `key`.
    ///
    /// On a miss the cursor is left at end-of-input and `NotFound` is
    /// returned.
    pub fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.seek_with(key, SeekMode::Exact)
    }

    /// Positions on the largest key less than or equal to `key`.
    ///
    /// Engines without range search only find `key` itself.
    pub fn seek_le(&mut self, key: &[u8]) -> Result<()> {
        self.seek_with(key, SeekMode::Le)
    }

    /// Positions on the smallest key greater than or equal to `key`.
    ///
    /// Engines without range search only find `key` itself.
    pub fn seek_ge(&mut self, key: &[u8]) -> Result<()> {
        self.seek_with(key, SeekMode::Ge)
    }

    /// Positions on the first record; `Eof` when the database is empty.
    pub fn first(&mut self) -> Result<()> {
        self.ensure_open()?;
        let found = self.db.with_engine(|engine| engine.first())?;
        self.land(found, Error::Eof)
    }

    /// Positions on the last record; `Eof` when the database is empty.
    pub fn last(&mut self) -> Result<()> {
        self.ensure_open()?;
        let found = self.db.with_engine(|engine| engine.last())?;
        self.land(found, Error::Eof)
    }

    /// Moves to the following record.
    pub fn next(&mut self) -> Result<()> {
        self.step(true)
    }

    /// Moves to the preceding record.
    pub fn prev(&mut self) -> Result<()> {
        self.step(false)
    }

    fn step(&mut self, forward: bool) -> Result<()> {
        self.ensure_open()?;
        let key = match &self.position {
            Position::Uninitialized => {
                return Err(Error::invalid_state("cursor is not positioned"));
            }
            Position::Eof => return Err(Error::Eof),
            Position::At((key, _)) | Position::Detached(key) => key.clone(),
        };
        let found = self.db.with_engine(|engine| {
            if forward {
                engine.next(&key)
            } else {
                engine.prev(&key)
            }
        })?;
        self.land(found, Error::Eof)
    }

    /// Whether the cursor sits on a record that still exists.
    pub fn is_valid(&self) -> bool {
        match &self.position {
            Position::At((key, _)) if !self.closed => self.db.contains(key).unwrap_or(false),
            _ => false,
        }
    }

    /// Whether the cursor ran off either end of the index.
    pub fn is_eof(&self) -> bool {
        self.position == Position::Eof
    }

    /// Re-reads the current record, detaching the cursor if it is gone.
    fn refresh(&mut self) -> Result<()> {
        let Position::At((key, value)) = &mut self.position else {
            return Ok(());
        };
        match self.db.fetch_optional(key)? {
            Some(current) => *value = current,
            None => {
                let key = std::mem::take(key);
                log::trace!("record {:?} under cursor is gone", String::from_utf8_lossy(&key));
                self.position = Position::Detached(key);
            }
        }
        Ok(())
    }

    /// Why there is no current record.
    fn no_record(&self) -> Error {
        match self.position {
            Position::Detached(_) => Error::invalid_state("record under cursor was deleted"),
            Position::Eof => Error::invalid_state("cursor is at end of input"),
            _ => Error::invalid_state("cursor is not positioned"),
        }
    }

    /// The current record, as it is stored now.
    ///
    /// # Errors
    ///
    /// `InvalidState` when the cursor is unpositioned, at end-of-input, or
    /// its record has been deleted since it landed there.
    pub fn entry(&mut self) -> Result<(&[u8], &[u8])> {
        self.ensure_open()?;
        self.refresh()?;
        match &self.position {
            Position::At((key, value)) => Ok((key.as_slice(), value.as_slice())),
            _ => Err(self.no_record()),
        }
    }

    /// Key of the current record.
    pub fn key(&mut self) -> Result<&[u8]> {
        self.entry().map(|(key, _)| key)
    }

    /// Value of the current record.
    pub fn value(&mut self) -> Result<&[u8]> {
        self.entry().map(|(_, value)| value)
    }

    /// Deletes the current record and moves to the one after it, or to
    /// end-of-input if it was the last.
    ///
    /// # Errors
    ///
    /// `InvalidState` when there is no current record, including when it
    /// was deleted by someone else; the cursor is then detached.
    pub fn delete(&mut self) -> Result<()> {
        self.ensure_open()?;
        let key = match &self.position {
            Position::At((key, _)) => key.clone(),
            _ => return Err(self.no_record()),
        };
        let removed = self.db.mutate(|engine| {
            let next = engine.next(&key)?;
            if !engine.delete(&key)? {
                return Ok(None);
            }
            Ok(Some(next))
        })?;
        match removed {
            Some(next) => {
                self.position = next.map_or(Position::Eof, Position::At);
                Ok(())
            }
            None => {
                self.position = Position::Detached(key);
                Err(Error::invalid_state("record under cursor was deleted"))
            }
        }
    }

    /// Returns to the unpositioned state.
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.position = Position::Uninitialized;
        Ok(())
    }

    /// Releases the cursor. Calling it again is a no-op.
    pub fn close(&mut self) {
        self.closed = true;
        self.position = Position::Uninitialized;
    }
}
