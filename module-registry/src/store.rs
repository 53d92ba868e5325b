//! Access to the gateway's embedded config store.
//!
//! Only the three tables the registrar touches are part of the contract:
//!
//! ```text
//! CERTIFICATES(CERTIFICATES_ID, THUMBPRINT, SUBJECTNAME)
//! EULAS(EULAS_ID, MODULEID, CRC)
//! SEQUENCES(NAME, VAL)    -- CERTIFICATES_SEQ, EULAS_SEQ
//! ```
//!
//! Each insert reads the sequence, writes the row and advances the sequence
//! inside one IMMEDIATE transaction, so a row never lands with a stale
//! counter. New ids are one past the larger of the counter and the highest
//! existing id, so a counter that lags its table never collides.

use std::path::Path;

use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior, params};

use crate::archive::{ModuleCertificate, ModuleLicense};
use crate::error::{RegistryError, Result};

pub const CERTIFICATES_SEQ: &str = "CERTIFICATES_SEQ";
pub const EULAS_SEQ: &str = "EULAS_SEQ";

#[cfg_attr(not(any(test, feature = "test-support")), allow(dead_code))]
pub(crate) const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS CERTIFICATES (
    CERTIFICATES_ID INTEGER PRIMARY KEY,
    THUMBPRINT BLOB NOT NULL,
    SUBJECTNAME TEXT
);
CREATE TABLE IF NOT EXISTS EULAS (
    EULAS_ID INTEGER PRIMARY KEY,
    MODULEID TEXT NOT NULL,
    CRC INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS SEQUENCES (
    NAME TEXT PRIMARY KEY,
    VAL INTEGER NOT NULL
);
"#;

/// Result of an insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted { id: i64 },
    /// Row already present; sequence untouched.
    Duplicate,
}

pub struct ConfigStore {
    conn: Connection,
}

impl ConfigStore {
    /// Open an existing store. The registrar never creates one; the gateway
    /// owns the file.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(RegistryError::StoreMissing {
                path: path.to_path_buf(),
            });
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        tracing::debug!(path = %path.display(), "Opened config store");
        Ok(Self { conn })
    }

    /// Trust a module certificate unless its thumbprint is already present.
    pub fn insert_certificate(&mut self, cert: &ModuleCertificate) -> Result<InsertOutcome> {
        execute_in_transaction(&mut self.conn, TransactionBehavior::Immediate, |tx| {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM CERTIFICATES WHERE THUMBPRINT = ?1)",
                params![cert.thumbprint.as_bytes()],
                |row| row.get(0),
            )?;
            if exists {
                return Ok(InsertOutcome::Duplicate);
            }

            let id = next_sequence_value(tx, CERTIFICATES_SEQ, "CERTIFICATES", "CERTIFICATES_ID")?;
            tx.execute(
                "INSERT INTO CERTIFICATES (CERTIFICATES_ID, THUMBPRINT, SUBJECTNAME) VALUES (?1, ?2, ?3)",
                params![id, cert.thumbprint.as_bytes(), cert.subject_name],
            )?;
            advance_sequence(tx, CERTIFICATES_SEQ, id)?;
            Ok(InsertOutcome::Inserted { id })
        })
    }

    /// Record a license acceptance unless the (module id, checksum) pair is
    /// already present.
    pub fn insert_license(&mut self, license: &ModuleLicense) -> Result<InsertOutcome> {
        execute_in_transaction(&mut self.conn, TransactionBehavior::Immediate, |tx| {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM EULAS WHERE MODULEID = ?1 AND CRC = ?2)",
                params![license.module_id, i64::from(license.checksum)],
                |row| row.get(0),
            )?;
            if exists {
                return Ok(InsertOutcome::Duplicate);
            }

            let id = next_sequence_value(tx, EULAS_SEQ, "EULAS", "EULAS_ID")?;
            tx.execute(
                "INSERT INTO EULAS (EULAS_ID, MODULEID, CRC) VALUES (?1, ?2, ?3)",
                params![id, license.module_id, i64::from(license.checksum)],
            )?;
            advance_sequence(tx, EULAS_SEQ, id)?;
            Ok(InsertOutcome::Inserted { id })
        })
    }

    /// Current value of a named sequence, `None` if the counter row is absent.
    pub fn sequence_value(&self, name: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT VAL FROM SEQUENCES WHERE NAME = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn certificate_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM CERTIFICATES", [], |row| row.get(0))?)
    }

    pub fn license_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM EULAS", [], |row| row.get(0))?)
    }
}

/// Run `operation` inside a transaction; commit on `Ok`, roll back (via
/// `Drop`) on `Err`.
fn execute_in_transaction<F, T>(
    conn: &mut Connection,
    behavior: TransactionBehavior,
    operation: F,
) -> Result<T>
where
    F: FnOnce(&Transaction<'_>) -> Result<T>,
{
    let tx = conn.transaction_with_behavior(behavior)?;
    let result = operation(&tx)?;
    tx.commit()?;
    Ok(result)
}

/// `table` and `id_column` are fixed identifiers, never caller input.
fn next_sequence_value(
    tx: &Transaction<'_>,
    name: &str,
    table: &str,
    id_column: &str,
) -> Result<i64> {
    let counter: Option<i64> = tx
        .query_row(
            "SELECT VAL FROM SEQUENCES WHERE NAME = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    let highest: i64 = tx.query_row(
        &format!("SELECT COALESCE(MAX({id_column}), 0) FROM {table}"),
        [],
        |row| row.get(0),
    )?;
    let current = counter.unwrap_or(0);
    if highest > current {
        tracing::warn!(sequence = name, counter = current, highest, "Sequence behind its table");
    }
    Ok(current.max(highest) + 1)
}

fn advance_sequence(tx: &Transaction<'_>, name: &str, value: i64) -> Result<()> {
    let updated = tx.execute(
        "UPDATE SEQUENCES SET VAL = ?2 WHERE NAME = ?1",
        params![name, value],
    )?;
    if updated == 0 {
        tx.execute(
            "INSERT INTO SEQUENCES (NAME, VAL) VALUES (?1, ?2)",
            params![name, value],
        )?;
    }
    Ok(())
}
