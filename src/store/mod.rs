//! Store adapter: a typed interface over the SQLite asset store.
//!
//! Single-writer, many-readers. The one writer connection is held behind a
//! mutex and all mutations go through [`Store::transaction`], which retries
//! transient lock contention with exponential backoff. Readers open their
//! own connections; WAL journal mode keeps them from blocking the writer,
//! and the busy timeout hands the writer priority after a bounded wait.

pub mod models;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rusqlite::{params, Connection, OpenFlags};

use crate::error::StoreError;
use crate::fingerprint::{ComponentRecord, DeviceRecord, ExtractionSummary, StackMemberRecord};
use models::*;

/// How long any connection waits on a lock before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// Transient-busy retry ceiling.
const RETRY_MAX: u32 = 5;

/// Base backoff doubled per attempt.
const RETRY_BASE: Duration = Duration::from_millis(50);

/// The asset store handle.
#[derive(Clone)]
pub struct Store {
    writer: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Store {
    /// Open (creating if needed) the store at `path` and apply the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        configure(&conn)?;
        conn.execute_batch(include_str!("schema.sql"))
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(Self {
            writer: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open an additional read-only connection.
    pub fn reader(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Run `f` inside a write transaction, retrying transient lock
    /// contention with exponential backoff. Rolls back on error.
    pub fn transaction<T>(
        &self,
        f: impl Fn(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut attempt = 0u32;
        loop {
            let result = {
                let conn = self.writer.lock().expect("writer lock poisoned");
                let tx = conn.unchecked_transaction()?;
                match f(&tx) {
                    Ok(value) => tx.commit().map(|_| value).map_err(StoreError::from),
                    Err(e) => {
                        drop(tx); // rollback
                        Err(e)
                    }
                }
            };

            match result {
                Err(e) if is_busy(&e) && attempt < RETRY_MAX => {
                    attempt += 1;
                    let backoff = RETRY_BASE * 2u32.pow(attempt - 1);
                    warn!("store busy (attempt {}/{}), backing off {:?}", attempt, RETRY_MAX, backoff);
                    std::thread::sleep(backoff);
                }
                Err(e) if is_busy(&e) => return Err(StoreError::Busy { attempts: attempt }),
                other => return other,
            }
        }
    }

    // --- Read projections (materialized as views) ---

    pub fn device_status(&self) -> Result<Vec<DeviceStatusRow>, StoreError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, normalized_name, site_code, vendor_name, model, os_version,
                    is_stack, stack_count, have_sn, current_captures, capture_types, last_fingerprint
             FROM v_device_status ORDER BY normalized_name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(DeviceStatusRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    normalized_name: row.get(2)?,
                    site_code: row.get(3)?,
                    vendor_name: row.get(4)?,
                    model: row.get(5)?,
                    os_version: row.get(6)?,
                    is_stack: row.get(7)?,
                    stack_count: row.get(8)?,
                    have_sn: row.get(9)?,
                    current_captures: row.get(10)?,
                    capture_types: row.get(11)?,
                    last_fingerprint: row.get(12)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn capture_coverage(&self) -> Result<Vec<CaptureCoverageRow>, StoreError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT capture_type, vendor_name, device_count, success_count, failed_count, latest_capture
             FROM v_capture_coverage",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CaptureCoverageRow {
                    capture_type: row.get(0)?,
                    vendor_name: row.get(1)?,
                    device_count: row.get(2)?,
                    success_count: row.get(3)?,
                    failed_count: row.get(4)?,
                    latest_capture: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn site_inventory(&self) -> Result<Vec<SiteInventoryRow>, StoreError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT code, site_name, total_devices, stacked_devices, devices_with_serials,
                    vendor_count, vendors, role_count
             FROM v_site_inventory",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SiteInventoryRow {
                    code: row.get(0)?,
                    site_name: row.get(1)?,
                    total_devices: row.get(2)?,
                    stacked_devices: row.get(3)?,
                    devices_with_serials: row.get(4)?,
                    vendor_count: row.get(5)?,
                    vendors: row.get(6)?,
                    role_count: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn configure(conn: &Connection) -> Result<(), StoreError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}

fn is_busy(err: &StoreError) -> bool {
    matches!(
        err,
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

// --- Typed operations, usable inside Store::transaction ---

pub fn get_or_create_site(conn: &Connection, code: &str) -> Result<String, StoreError> {
    let existing: Option<String> = conn
        .query_row("SELECT code FROM sites WHERE code = ?1", params![code], |r| r.get(0))
        .ok();
    if existing.is_none() {
        conn.execute(
            "INSERT INTO sites (code, name) VALUES (?1, ?2)",
            params![code, format!("{} Site", code)],
        )?;
        debug!("created site {}", code);
    }
    Ok(code.to_string())
}

pub fn get_or_create_vendor(
    conn: &Connection,
    name: &str,
    short_name: &str,
) -> Result<i64, StoreError> {
    if let Ok(id) = conn.query_row("SELECT id FROM vendors WHERE name = ?1", params![name], |r| {
        r.get(0)
    }) {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO vendors (name, short_name) VALUES (?1, ?2)",
        params![name, short_name.to_uppercase()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_or_create_device_type(
    conn: &Connection,
    name: &str,
    driver: &str,
) -> Result<i64, StoreError> {
    if let Ok(id) = conn.query_row(
        "SELECT id FROM device_types WHERE name = ?1",
        params![name],
        |r| r.get(0),
    ) {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO device_types (name, driver, transport, default_port) VALUES (?1, ?2, 'ssh', 22)",
        params![name, driver],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_or_create_role(conn: &Connection, name: &str) -> Result<i64, StoreError> {
    if let Ok(id) = conn.query_row(
        "SELECT id FROM device_roles WHERE name = ?1",
        params![name],
        |r| r.get(0),
    ) {
        return Ok(id);
    }
    conn.execute("INSERT INTO device_roles (name) VALUES (?1)", params![name])?;
    Ok(conn.last_insert_rowid())
}

pub fn device_id_by_normalized_name(
    conn: &Connection,
    normalized_name: &str,
) -> Result<Option<i64>, StoreError> {
    match conn.query_row(
        "SELECT id FROM devices WHERE normalized_name = ?1",
        params![normalized_name],
        |r| r.get(0),
    ) {
        Ok(id) => Ok(Some(id)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Insert or update the device row for a fingerprint ingest. Serial, stack,
/// and invariant columns are refreshed separately within the same
/// transaction.
pub fn upsert_device(
    conn: &Connection,
    rec: &DeviceRecord,
    vendor_id: i64,
    device_type_id: i64,
    role_id: i64,
    now: &DateTime<Utc>,
) -> Result<i64, StoreError> {
    let existing = device_id_by_normalized_name(conn, &rec.normalized_name)?;
    let timestamp = now.to_rfc3339();

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE devices SET
                    name = ?1, site_code = ?2, vendor_id = ?3, device_type_id = ?4,
                    role_id = ?5, model = ?6, os_version = ?7, uptime = ?8,
                    uptime_minutes = ?9, management_ip = ?10, last_fingerprint = ?11,
                    source_file = ?12
                 WHERE id = ?13",
                params![
                    rec.hostname,
                    rec.site_code,
                    vendor_id,
                    device_type_id,
                    role_id,
                    rec.model,
                    rec.os_version,
                    rec.uptime,
                    rec.uptime_minutes,
                    rec.management_ip,
                    timestamp,
                    rec.source_file,
                    id,
                ],
            )?;
            Ok(id)
        }
        None => {
            conn.execute(
                "INSERT INTO devices (
                    name, normalized_name, site_code, vendor_id, device_type_id,
                    role_id, model, os_version, uptime, uptime_minutes,
                    management_ip, last_fingerprint, source_file
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    rec.hostname,
                    rec.normalized_name,
                    rec.site_code,
                    vendor_id,
                    device_type_id,
                    role_id,
                    rec.model,
                    rec.os_version,
                    rec.uptime,
                    rec.uptime_minutes,
                    rec.management_ip,
                    timestamp,
                    rec.source_file,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        }
    }
}

/// Replace semantics: delete then insert, first serial primary.
pub fn replace_serials(
    conn: &Connection,
    device_id: i64,
    serials: &[String],
) -> Result<(), StoreError> {
    conn.execute("DELETE FROM device_serials WHERE device_id = ?1", params![device_id])?;
    for (i, serial) in serials.iter().filter(|s| !s.is_empty()).enumerate() {
        conn.execute(
            "INSERT INTO device_serials (device_id, serial, is_primary) VALUES (?1, ?2, ?3)",
            params![device_id, serial, i == 0],
        )?;
    }
    Ok(())
}

pub fn replace_stack_members(
    conn: &Connection,
    device_id: i64,
    members: &[StackMemberRecord],
) -> Result<(), StoreError> {
    conn.execute("DELETE FROM stack_members WHERE device_id = ?1", params![device_id])?;
    for member in members {
        conn.execute(
            "INSERT INTO stack_members (device_id, serial, position, model, is_master)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                device_id,
                member.serial,
                member.position,
                member.model,
                member.is_master
            ],
        )?;
    }
    Ok(())
}

pub fn replace_components(
    conn: &Connection,
    device_id: i64,
    components: &[ComponentRecord],
) -> Result<(), StoreError> {
    conn.execute("DELETE FROM components WHERE device_id = ?1", params![device_id])?;
    for c in components {
        conn.execute(
            "INSERT INTO components
                (device_id, kind, name, description, serial, position,
                 extraction_source, extraction_confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                device_id,
                c.kind.as_str(),
                c.name,
                c.description,
                c.serial,
                c.position,
                c.extraction_source,
                c.extraction_confidence,
            ],
        )?;
    }
    Ok(())
}

/// Recompute `have_sn`, `stack_count`, and `is_stack` from the attached
/// rows. Runs inside every fingerprint ingest transaction.
pub fn refresh_device_invariants(conn: &Connection, device_id: i64) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE devices SET
            have_sn = (SELECT COUNT(*) FROM device_serials WHERE device_id = ?1) > 0,
            stack_count = (SELECT COUNT(*) FROM stack_members WHERE device_id = ?1),
            is_stack = (SELECT COUNT(*) FROM stack_members WHERE device_id = ?1) >= 2
         WHERE id = ?1",
        params![device_id],
    )?;
    Ok(())
}

pub fn insert_extraction(
    conn: &Connection,
    device_id: i64,
    summary: &ExtractionSummary,
    file_path: Option<&str>,
    timestamp: &str,
    metadata: Option<&str>,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO fingerprint_extractions (
            device_id, extraction_timestamp, fingerprint_file_path, template_used,
            template_score, extraction_success, fields_extracted,
            total_fields_available, command_count, metadata
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            device_id,
            timestamp,
            file_path,
            summary.template_id,
            summary.score as f64,
            summary.success,
            summary.fields_extracted,
            summary.total_fields,
            summary.command_count,
            metadata,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn current_capture(
    conn: &Connection,
    device_id: i64,
    capture_type: &str,
) -> Result<Option<CaptureCurrentRow>, StoreError> {
    let result = conn.query_row(
        "SELECT id, device_id, capture_type, captured_at, file_path, byte_count,
                line_count, content_hash, success, command_used, content, content_snippet
         FROM capture_current WHERE device_id = ?1 AND capture_type = ?2",
        params![device_id, capture_type],
        |row| {
            let captured_at: String = row.get(3)?;
            Ok(CaptureCurrentRow {
                id: row.get(0)?,
                device_id: row.get(1)?,
                capture_type: row.get(2)?,
                captured_at: parse_time(&captured_at),
                file_path: row.get(4)?,
                byte_count: row.get(5)?,
                line_count: row.get(6)?,
                content_hash: row.get(7)?,
                success: row.get(8)?,
                command_used: row.get(9)?,
                content: row.get(10)?,
                content_snippet: row.get(11)?,
            })
        },
    );
    match result {
        Ok(row) => Ok(Some(row)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Refresh only the captured-at timestamp of an unchanged current row.
pub fn touch_current_capture(
    conn: &Connection,
    id: i64,
    captured_at: &DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE capture_current SET captured_at = ?1 WHERE id = ?2",
        params![captured_at.to_rfc3339(), id],
    )?;
    Ok(())
}

/// Copy a current row into the archive.
pub fn archive_capture(
    conn: &Connection,
    row: &CaptureCurrentRow,
    archived_at: &DateTime<Utc>,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO capture_archive (
            device_id, capture_type, captured_at, archived_at, file_path,
            byte_count, line_count, content_hash, success, command_used,
            content, content_snippet
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            row.device_id,
            row.capture_type,
            row.captured_at.to_rfc3339(),
            archived_at.to_rfc3339(),
            row.file_path,
            row.byte_count,
            row.line_count,
            row.content_hash,
            row.success,
            row.command_used,
            row.content,
            row.content_snippet,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Insert or replace the current capture for `(device, capture_type)`.
pub fn upsert_current_capture(conn: &Connection, row: &CaptureUpsert) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO capture_current (
            device_id, capture_type, captured_at, file_path, byte_count,
            line_count, content_hash, success, command_used, content, content_snippet
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(device_id, capture_type) DO UPDATE SET
            captured_at = excluded.captured_at,
            file_path = excluded.file_path,
            byte_count = excluded.byte_count,
            line_count = excluded.line_count,
            content_hash = excluded.content_hash,
            success = excluded.success,
            command_used = excluded.command_used,
            content = excluded.content,
            content_snippet = excluded.content_snippet",
        params![
            row.device_id,
            row.capture_type,
            row.captured_at.to_rfc3339(),
            row.file_path,
            row.byte_count,
            row.line_count,
            row.content_hash,
            row.success,
            row.command_used,
            row.content,
            row.content_snippet,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

#[allow(clippy::too_many_arguments)]
pub fn insert_change(
    conn: &Connection,
    device_id: i64,
    capture_type: &str,
    detected_at: &DateTime<Utc>,
    previous_hash: &str,
    new_hash: &str,
    lines_added: i64,
    lines_removed: i64,
    severity: &str,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO capture_changes (
            device_id, capture_type, detected_at, previous_hash, new_hash,
            lines_added, lines_removed, severity
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            device_id,
            capture_type,
            detected_at.to_rfc3339(),
            previous_hash,
            new_hash,
            lines_added,
            lines_removed,
            severity,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn set_change_diff_path(
    conn: &Connection,
    change_id: i64,
    diff_path: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE capture_changes SET diff_path = ?1 WHERE id = ?2",
        params![diff_path, change_id],
    )?;
    Ok(())
}

/// Bounded retention sweep: delete up to `limit` archive rows older than
/// `cutoff`. Returns the number deleted.
pub fn sweep_archive(
    conn: &Connection,
    cutoff: &DateTime<Utc>,
    limit: usize,
) -> Result<usize, StoreError> {
    let deleted = conn.execute(
        "DELETE FROM capture_archive WHERE id IN (
            SELECT id FROM capture_archive WHERE archived_at < ?1
            ORDER BY archived_at LIMIT ?2
         )",
        params![cutoff.to_rfc3339(), limit as i64],
    )?;
    Ok(deleted)
}

// --- Row readers shared by tests and reporting ---

pub fn device_by_id(conn: &Connection, id: i64) -> Result<DeviceRow, StoreError> {
    conn.query_row(
        "SELECT id, name, normalized_name, site_code, vendor_id, device_type_id, role_id,
                model, os_version, uptime, uptime_minutes, have_sn, management_ip,
                is_stack, stack_count, last_fingerprint, source_file
         FROM devices WHERE id = ?1",
        params![id],
        |row| {
            Ok(DeviceRow {
                id: row.get(0)?,
                name: row.get(1)?,
                normalized_name: row.get(2)?,
                site_code: row.get(3)?,
                vendor_id: row.get(4)?,
                device_type_id: row.get(5)?,
                role_id: row.get(6)?,
                model: row.get(7)?,
                os_version: row.get(8)?,
                uptime: row.get(9)?,
                uptime_minutes: row.get(10)?,
                have_sn: row.get(11)?,
                management_ip: row.get(12)?,
                is_stack: row.get(13)?,
                stack_count: row.get(14)?,
                last_fingerprint: row.get(15)?,
                source_file: row.get(16)?,
            })
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        e => e.into(),
    })
}

pub fn serials_of(conn: &Connection, device_id: i64) -> Result<Vec<DeviceSerialRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, device_id, serial, is_primary FROM device_serials
         WHERE device_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![device_id], |row| {
            Ok(DeviceSerialRow {
                id: row.get(0)?,
                device_id: row.get(1)?,
                serial: row.get(2)?,
                is_primary: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn stack_members_of(
    conn: &Connection,
    device_id: i64,
) -> Result<Vec<StackMemberRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, device_id, serial, position, model, is_master FROM stack_members
         WHERE device_id = ?1 ORDER BY position",
    )?;
    let rows = stmt
        .query_map(params![device_id], |row| {
            Ok(StackMemberRow {
                id: row.get(0)?,
                device_id: row.get(1)?,
                serial: row.get(2)?,
                position: row.get(3)?,
                model: row.get(4)?,
                is_master: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn components_of(conn: &Connection, device_id: i64) -> Result<Vec<ComponentRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, device_id, kind, name, description, serial, position,
                extraction_source, extraction_confidence
         FROM components WHERE device_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![device_id], |row| {
            Ok(ComponentRow {
                id: row.get(0)?,
                device_id: row.get(1)?,
                kind: row.get(2)?,
                name: row.get(3)?,
                description: row.get(4)?,
                serial: row.get(5)?,
                position: row.get(6)?,
                extraction_source: row.get(7)?,
                extraction_confidence: row.get(8)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64, StoreError> {
    // Table names come from code, never user input.
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?;
    Ok(count)
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("assets.db")).unwrap();
        (dir, store)
    }

    fn sample_device(name: &str) -> DeviceRecord {
        DeviceRecord {
            hostname: name.to_string(),
            normalized_name: name.to_lowercase(),
            site_code: "ABC".to_string(),
            vendor_name: "Cisco Systems".to_string(),
            device_type: "cisco_ios_ssh".to_string(),
            role: "access".to_string(),
            model: "C9300-48UXM".to_string(),
            os_version: "17.3.4".to_string(),
            uptime: None,
            uptime_minutes: None,
            management_ip: "10.0.0.1".to_string(),
            serials: vec!["AAA".to_string(), "BBB".to_string()],
            stack_members: vec![],
            components: vec![],
            source_file: None,
        }
    }

    #[test]
    fn test_open_applies_schema_and_reopen_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("assets.db");
        {
            let store = Store::open(&path).unwrap();
            assert_eq!(store.device_status().unwrap().len(), 0);
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.device_status().unwrap().len(), 0);
    }

    #[test]
    fn test_device_upsert_and_invariants() {
        let (_dir, store) = open_store();
        let now = Utc::now();
        let rec = sample_device("ABC-SW-01");

        let id = store
            .transaction(|conn| {
                get_or_create_site(conn, &rec.site_code)?;
                let vendor = get_or_create_vendor(conn, &rec.vendor_name, "cisco")?;
                let dtype = get_or_create_device_type(conn, &rec.device_type, "cisco_ios")?;
                let role = get_or_create_role(conn, &rec.role)?;
                let id = upsert_device(conn, &rec, vendor, dtype, role, &now)?;
                replace_serials(conn, id, &rec.serials)?;
                refresh_device_invariants(conn, id)?;
                Ok(id)
            })
            .unwrap();

        let conn = store.reader().unwrap();
        let device = device_by_id(&conn, id).unwrap();
        assert!(device.have_sn);
        assert!(!device.is_stack);
        assert_eq!(device.stack_count, 0);

        let serials = serials_of(&conn, id).unwrap();
        assert_eq!(serials.len(), 2);
        assert!(serials[0].is_primary);
        assert!(!serials[1].is_primary);
    }

    #[test]
    fn test_capture_current_unique_per_type() {
        let (_dir, store) = open_store();
        let now = Utc::now();
        let rec = sample_device("ABC-SW-01");

        store
            .transaction(|conn| {
                get_or_create_site(conn, "ABC")?;
                let vendor = get_or_create_vendor(conn, &rec.vendor_name, "cisco")?;
                let dtype = get_or_create_device_type(conn, &rec.device_type, "cisco_ios")?;
                let role = get_or_create_role(conn, &rec.role)?;
                let id = upsert_device(conn, &rec, vendor, dtype, role, &now)?;

                let upsert = CaptureUpsert {
                    device_id: id,
                    capture_type: "configs".to_string(),
                    captured_at: now,
                    file_path: "/cap/configs/abc-sw-01.txt".to_string(),
                    byte_count: 100,
                    line_count: 10,
                    content_hash: "h1".to_string(),
                    success: true,
                    command_used: Some("show running-config".to_string()),
                    content: "body v1".to_string(),
                    content_snippet: None,
                };
                upsert_current_capture(conn, &upsert)?;
                let mut second = upsert.clone();
                second.content_hash = "h2".to_string();
                upsert_current_capture(conn, &second)?;

                assert_eq!(count_rows(conn, "capture_current")?, 1);
                let current = current_capture(conn, id, "configs")?.unwrap();
                assert_eq!(current.content_hash, "h2");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_cascade_delete() {
        let (_dir, store) = open_store();
        let now = Utc::now();
        let rec = sample_device("ABC-SW-01");

        store
            .transaction(|conn| {
                get_or_create_site(conn, "ABC")?;
                let vendor = get_or_create_vendor(conn, &rec.vendor_name, "cisco")?;
                let dtype = get_or_create_device_type(conn, &rec.device_type, "cisco_ios")?;
                let role = get_or_create_role(conn, &rec.role)?;
                let id = upsert_device(conn, &rec, vendor, dtype, role, &now)?;
                replace_serials(conn, id, &rec.serials)?;
                insert_change(conn, id, "configs", &now, "a", "b", 1, 1, "minor")?;
                conn.execute("DELETE FROM devices WHERE id = ?1", params![id])?;
                assert_eq!(count_rows(conn, "device_serials")?, 0);
                assert_eq!(count_rows(conn, "capture_changes")?, 0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_sweep_archive_bounded() {
        let (_dir, store) = open_store();
        let now = Utc::now();
        let old = now - chrono::Duration::days(90);
        let rec = sample_device("ABC-SW-01");

        store
            .transaction(|conn| {
                get_or_create_site(conn, "ABC")?;
                let vendor = get_or_create_vendor(conn, &rec.vendor_name, "cisco")?;
                let dtype = get_or_create_device_type(conn, &rec.device_type, "cisco_ios")?;
                let role = get_or_create_role(conn, &rec.role)?;
                let id = upsert_device(conn, &rec, vendor, dtype, role, &now)?;

                for i in 0..5 {
                    let row = CaptureCurrentRow {
                        id: 0,
                        device_id: id,
                        capture_type: "configs".to_string(),
                        captured_at: old,
                        file_path: format!("/cap/{}.txt", i),
                        byte_count: 1,
                        line_count: 1,
                        content_hash: format!("h{}", i),
                        success: true,
                        command_used: None,
                        content: String::new(),
                        content_snippet: None,
                    };
                    archive_capture(conn, &row, &old)?;
                }

                let cutoff = now - chrono::Duration::days(30);
                assert_eq!(sweep_archive(conn, &cutoff, 3)?, 3);
                assert_eq!(sweep_archive(conn, &cutoff, 10)?, 2);
                assert_eq!(count_rows(conn, "capture_archive")?, 0);
                Ok(())
            })
            .unwrap();
    }
}
