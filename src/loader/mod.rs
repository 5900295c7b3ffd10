//! Loader: move capture artifacts and fingerprint records into the store.
//!
//! Capture ingest follows the current/archive pattern: an unchanged hash
//! only refreshes the captured-at timestamp; a changed hash archives the
//! prior current row, upserts the new one, and emits a change row whose
//! severity comes from the change detector. Fingerprint ingest upserts the
//! reference entities and the device, then replaces serials, stack members,
//! and components, recomputing the device invariants in the same
//! transaction. Every ingest is a single transaction.

mod change;

pub use change::{ChangeDetector, ChangeSummary, Severity, SeverityConfig};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::capture::CaptureCatalog;
use crate::error::{LoaderError, StoreError};
use crate::fingerprint::{derive_device, ExtractionSummary, FingerprintRecord, TextFsmOutput};
use crate::platform::VendorRegistry;
use crate::store::{self, models::*, Store};

/// Loader tunables.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Archive rows older than this many days are swept.
    pub archive_days: i64,

    /// Ceiling on rows deleted per sweep invocation.
    pub sweep_batch: usize,

    /// Captures below this many bytes are unsuccessful.
    pub min_success_bytes: i64,

    /// Where change diffs are written.
    pub diff_root: PathBuf,

    /// Stored head of the capture content.
    pub snippet_len: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            archive_days: 30,
            sweep_batch: 10_000,
            min_success_bytes: 64,
            diff_root: PathBuf::from("diffs"),
            snippet_len: 512,
        }
    }
}

/// Per-file capture ingest outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// First capture of this type for the device.
    Inserted,
    /// Content changed: prior row archived, change emitted.
    Updated { change_id: i64, severity: Severity },
    /// Identical hash; only the timestamp moved.
    Unchanged,
    /// No device row for the name in the path. Fingerprints load first by
    /// convention, so this is a warning and a skip, not an error.
    DeviceUnknown,
}

/// Directory-level ingest counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestStats {
    pub total: usize,
    pub loaded: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub changes: usize,
}

/// Ingest orchestrator over one store.
pub struct Loader {
    store: Store,
    catalog: CaptureCatalog,
    registry: Arc<VendorRegistry>,
    detector: ChangeDetector,
    config: LoaderConfig,
}

impl Loader {
    pub fn new(
        store: Store,
        catalog: CaptureCatalog,
        registry: Arc<VendorRegistry>,
        config: LoaderConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            registry,
            detector: ChangeDetector::default(),
            config,
        }
    }

    pub fn with_detector(mut self, detector: ChangeDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // --- Capture ingest ---

    /// Ingest one capture artifact at `<root>/<capture_type>/<name>.txt`.
    pub fn ingest_capture_file(&self, path: &Path) -> Result<CaptureOutcome, LoaderError> {
        let (device_name, capture_type) = parse_capture_path(path)?;
        if !self.catalog.contains(&capture_type) {
            return Err(LoaderError::UnknownCaptureType {
                capture_type,
                path: path.display().to_string(),
            });
        }

        let bytes = std::fs::read(path).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => LoaderError::CaptureMissing {
                path: path.display().to_string(),
            },
            _ => LoaderError::Io {
                path: path.display().to_string(),
                source,
            },
        })?;
        let content = String::from_utf8_lossy(&bytes).into_owned();
        let captured_at = file_mtime(path).unwrap_or_else(Utc::now);

        let content_hash = hash_content(&bytes);
        let byte_count = bytes.len() as i64;
        let line_count = content.lines().count() as i64;
        let success = self.capture_success(&content, byte_count, &capture_type);
        let command_used = self.catalog.command_for(&capture_type).map(str::to_string);
        let snippet: String = content.chars().take(self.config.snippet_len).collect();
        let file_path = path.display().to_string();
        let now = Utc::now();

        let outcome = self.store.transaction(|conn| {
            let Some(device_id) = store::device_id_by_normalized_name(conn, &device_name)? else {
                return Ok(CaptureOutcome::DeviceUnknown);
            };

            let prior = store::current_capture(conn, device_id, &capture_type)?;

            if let Some(prior) = &prior {
                if prior.content_hash == content_hash {
                    store::touch_current_capture(conn, prior.id, &captured_at)?;
                    return Ok(CaptureOutcome::Unchanged);
                }
            }

            let upsert = CaptureUpsert {
                device_id,
                capture_type: capture_type.clone(),
                captured_at,
                file_path: file_path.clone(),
                byte_count,
                line_count,
                content_hash: content_hash.clone(),
                success,
                command_used: command_used.clone(),
                content: content.clone(),
                content_snippet: Some(snippet.clone()),
            };

            match prior {
                None => {
                    store::upsert_current_capture(conn, &upsert)?;
                    Ok(CaptureOutcome::Inserted)
                }
                Some(prior) => {
                    store::archive_capture(conn, &prior, &now)?;
                    store::upsert_current_capture(conn, &upsert)?;

                    // The artifact on disk was overwritten by the new
                    // capture; the prior text lives on the archived row.
                    let summary = self.detector.diff(&prior.content, &content);

                    let change_id = store::insert_change(
                        conn,
                        device_id,
                        &capture_type,
                        &now,
                        &prior.content_hash,
                        &content_hash,
                        summary.lines_added,
                        summary.lines_removed,
                        summary.severity.as_str(),
                    )?;

                    if !summary.overflow && !summary.diff_text.is_empty() {
                        if let Ok(diff_path) = self.write_diff(change_id, &summary.diff_text) {
                            store::set_change_diff_path(conn, change_id, &diff_path)?;
                        }
                    }

                    info!(
                        "change: {} {} (+{}/-{} lines, {})",
                        device_name,
                        capture_type,
                        summary.lines_added,
                        summary.lines_removed,
                        summary.severity.as_str()
                    );
                    Ok(CaptureOutcome::Updated {
                        change_id,
                        severity: summary.severity,
                    })
                }
            }
        })?;

        Ok(outcome)
    }

    /// Ingest a capture directory laid out `<dir>/<capture_type>/<name>.txt`.
    pub fn ingest_capture_dir(
        &self,
        dir: &Path,
        only_types: Option<&[String]>,
    ) -> Result<IngestStats, LoaderError> {
        let mut stats = IngestStats::default();

        let types: Vec<String> = match only_types {
            Some(list) => list.to_vec(),
            None => self.catalog.types().map(str::to_string).collect(),
        };

        for capture_type in &types {
            if !self.catalog.contains(capture_type) {
                return Err(LoaderError::UnknownCaptureType {
                    capture_type: capture_type.clone(),
                    path: dir.display().to_string(),
                });
            }
            let type_dir = dir.join(capture_type);
            if !type_dir.is_dir() {
                continue;
            }
            let mut entries: Vec<PathBuf> = std::fs::read_dir(&type_dir)
                .map_err(|source| LoaderError::Io {
                    path: type_dir.display().to_string(),
                    source,
                })?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| has_capture_extension(p))
                .collect();
            entries.sort();

            for path in entries {
                stats.total += 1;
                match self.ingest_capture_file(&path) {
                    Ok(CaptureOutcome::Inserted) => stats.loaded += 1,
                    Ok(CaptureOutcome::Updated { .. }) => {
                        stats.loaded += 1;
                        stats.changes += 1;
                    }
                    Ok(CaptureOutcome::Unchanged) => stats.unchanged += 1,
                    Ok(CaptureOutcome::DeviceUnknown) => {
                        warn!("unknown device for {}", path.display());
                        stats.skipped += 1;
                    }
                    Err(e) => {
                        warn!("failed to ingest {}: {}", path.display(), e);
                        stats.failed += 1;
                    }
                }
            }
        }

        // Each invocation performs one bounded retention sweep.
        let swept = self.sweep_retention()?;
        if swept > 0 {
            info!("retention sweep removed {} archive rows", swept);
        }

        Ok(stats)
    }

    /// Delete archive rows past the retention window, bounded per call.
    pub fn sweep_retention(&self) -> Result<usize, LoaderError> {
        let cutoff = Utc::now() - ChronoDuration::days(self.config.archive_days);
        let batch = self.config.sweep_batch;
        let swept = self
            .store
            .transaction(|conn| store::sweep_archive(conn, &cutoff, batch))?;
        Ok(swept)
    }

    /// Read the artifact behind a capture row, tolerating deletion.
    pub fn read_capture_content(&self, row: &CaptureCurrentRow) -> Result<String, LoaderError> {
        match std::fs::read(&row.file_path) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LoaderError::CaptureMissing {
                    path: row.file_path.clone(),
                })
            }
            Err(source) => Err(LoaderError::Io {
                path: row.file_path.clone(),
                source,
            }),
        }
    }

    // --- Fingerprint ingest ---

    /// Ingest one fingerprint JSON artifact. Returns the device id, or
    /// `None` when the record is marked unsuccessful.
    pub fn ingest_fingerprint_file(&self, path: &Path) -> Result<Option<i64>, LoaderError> {
        let text = std::fs::read_to_string(path).map_err(|source| LoaderError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let record: FingerprintRecord = serde_json::from_str(&text).map_err(|e| {
            LoaderError::Fingerprint(crate::error::FingerprintError::MalformedRecord {
                path: path.display().to_string(),
                message: e.to_string(),
            })
        })?;

        if !record.success {
            warn!("fingerprint marked failed, skipping: {}", path.display());
            return Ok(None);
        }

        let id = self.ingest_fingerprint_record(&record, Some(path))?;
        Ok(Some(id))
    }

    /// Ingest an in-memory fingerprint record (batch pipeline path).
    pub fn ingest_fingerprint_record(
        &self,
        record: &FingerprintRecord,
        source_path: Option<&Path>,
    ) -> Result<i64, LoaderError> {
        let mut device = derive_device(record, &self.registry);
        device.source_file = source_path.map(|p| p.display().to_string());

        let short_name = self
            .registry
            .resolve(&record.additional_info.vendor)
            .map(|p| p.short_name.clone())
            .unwrap_or_else(|| {
                device
                    .vendor_name
                    .split_whitespace()
                    .next()
                    .unwrap_or("unknown")
                    .to_string()
            });
        let driver = record.additional_info.driver.clone();

        let summary = summarize_record(record);
        let metadata = extraction_metadata(record);
        let extraction_time = if record.fingerprint_time.is_empty() {
            Utc::now().to_rfc3339()
        } else {
            record.fingerprint_time.clone()
        };
        let file_path = device.source_file.clone();
        let now = Utc::now();

        let device_id = self.store.transaction(|conn| {
            store::get_or_create_site(conn, &device.site_code)?;
            let vendor_id = store::get_or_create_vendor(conn, &device.vendor_name, &short_name)?;
            let device_type_id =
                store::get_or_create_device_type(conn, &device.device_type, &driver)?;
            let role_id = store::get_or_create_role(conn, &device.role)?;
            let device_id =
                store::upsert_device(conn, &device, vendor_id, device_type_id, role_id, &now)?;

            store::replace_serials(conn, device_id, &device.serials)?;
            store::replace_stack_members(conn, device_id, &device.stack_members)?;
            store::replace_components(conn, device_id, &device.components)?;
            store::refresh_device_invariants(conn, device_id)?;

            // One audit row per extraction; re-ingesting the same artifact
            // must not append another.
            let exists: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM fingerprint_extractions
                     WHERE device_id = ?1 AND extraction_timestamp = ?2",
                    rusqlite::params![device_id, extraction_time],
                    |r| r.get(0),
                )
                .map_err(StoreError::from)?;
            if exists == 0 {
                store::insert_extraction(
                    conn,
                    device_id,
                    &summary,
                    file_path.as_deref(),
                    &extraction_time,
                    Some(&metadata),
                )?;
            }

            Ok(device_id)
        })?;

        debug!(
            "fingerprint ingested: {} (device {})",
            device.normalized_name, device_id
        );
        Ok(device_id)
    }

    /// Ingest every `*.json` artifact in a fingerprint directory.
    pub fn ingest_fingerprint_dir(&self, dir: &Path) -> Result<IngestStats, LoaderError> {
        let mut stats = IngestStats::default();
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|source| LoaderError::Io {
                path: dir.display().to_string(),
                source,
            })?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .collect();
        entries.sort();

        for path in entries {
            stats.total += 1;
            match self.ingest_fingerprint_file(&path) {
                Ok(Some(_)) => stats.loaded += 1,
                Ok(None) => stats.skipped += 1,
                Err(e) => {
                    warn!("failed to ingest {}: {}", path.display(), e);
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }

    fn capture_success(&self, content: &str, byte_count: i64, capture_type: &str) -> bool {
        if byte_count < self.config.min_success_bytes {
            return false;
        }
        // Configs shorter than a kilobyte are paging accidents, not configs.
        if capture_type == "configs" && byte_count <= 1024 {
            return false;
        }
        const FAILURE_MARKERS: [&str; 6] = [
            "% Invalid input",
            "Invalid command",
            "% Error",
            "Unknown command",
            "Connection refused",
            "Connection timed out",
        ];
        !FAILURE_MARKERS.iter().any(|m| content.contains(m))
    }

    /// Diff files live under a path derived from the change row id.
    fn write_diff(&self, change_id: i64, diff_text: &str) -> Result<String, std::io::Error> {
        std::fs::create_dir_all(&self.config.diff_root)?;
        let path = self.config.diff_root.join(format!("change-{}.diff", change_id));
        std::fs::write(&path, diff_text)?;
        Ok(path.display().to_string())
    }
}

/// Device name and capture type from `<root>/<capture_type>/<name>.<ext>`.
fn parse_capture_path(path: &Path) -> Result<(String, String), LoaderError> {
    let capture_type = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let device_name = path
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_lowercase();
    if capture_type.is_empty() || device_name.is_empty() {
        return Err(LoaderError::UnknownCaptureType {
            capture_type,
            path: path.display().to_string(),
        });
    }
    Ok((device_name, capture_type))
}

fn has_capture_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e.to_lowercase().as_str(), "txt" | "log" | "cfg" | "conf"))
}

fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Stable content hash over the committed bytes.
pub fn hash_content(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Audit summary computed from a fingerprint artifact's parse payloads.
fn summarize_record(record: &FingerprintRecord) -> ExtractionSummary {
    let mut template_id = String::new();
    let mut score = 0i64;
    let mut fields_extracted = 0i64;
    let mut total_fields = 0i64;
    let mut command_count = 0i64;

    for (key, value) in &record.command_outputs {
        if !key.ends_with("_textfsm") {
            command_count += 1;
            continue;
        }
        let Ok(payload) = serde_json::from_value::<TextFsmOutput>(value.clone()) else {
            continue;
        };
        if template_id.is_empty() {
            template_id = payload.template_used.clone();
            score = payload.template_score;
        }
        for rec in &payload.records {
            for v in rec.values() {
                total_fields += 1;
                if !v.trim().is_empty() {
                    fields_extracted += 1;
                }
            }
        }
    }

    ExtractionSummary {
        success: !template_id.is_empty(),
        template_id,
        score,
        fields_extracted,
        total_fields,
        command_count,
    }
}

/// Template-matching metadata blob stored on the audit row.
fn extraction_metadata(record: &FingerprintRecord) -> String {
    let mut map: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    for (key, value) in &record.command_outputs {
        if !key.ends_with("_textfsm") {
            continue;
        }
        if let Ok(payload) = serde_json::from_value::<TextFsmOutput>(value.clone()) {
            map.insert(
                key.clone(),
                serde_json::json!({
                    "template_used": payload.template_used,
                    "template_score": payload.template_score,
                    "record_count": payload.records.len(),
                }),
            );
        }
    }
    serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::AdditionalInfo;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        loader: Loader,
        captures: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("assets.db")).unwrap();
        let captures = dir.path().join("capture");
        let config = LoaderConfig {
            diff_root: dir.path().join("diffs"),
            ..Default::default()
        };
        let loader = Loader::new(
            store,
            CaptureCatalog::builtin(),
            Arc::new(VendorRegistry::builtin()),
            config,
        );
        Fixture {
            _dir: dir,
            loader,
            captures,
        }
    }

    fn s1_record() -> FingerprintRecord {
        FingerprintRecord {
            hostname: "ABC-SW-01".to_string(),
            host: "10.0.0.1".to_string(),
            port: "22".to_string(),
            model: "WS-C2960X-48TS-L".to_string(),
            serial_number: "FOC1234ABCD".to_string(),
            version: "15.2(7)E".to_string(),
            success: true,
            fingerprint_time: "2026-08-01T10:00:00+00:00".to_string(),
            additional_info: AdditionalInfo {
                vendor: "cisco".to_string(),
                driver: "cisco_ios".to_string(),
                display_name: "ABC-SW-01".to_string(),
            },
            ..Default::default()
        }
    }

    fn write_capture(fx: &Fixture, capture_type: &str, name: &str, content: &str) -> PathBuf {
        let dir = fx.captures.join(capture_type);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.txt", name));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_fingerprint_ingest_new_device() {
        let fx = fixture();
        let id = fx
            .loader
            .ingest_fingerprint_record(&s1_record(), None)
            .unwrap();

        let conn = fx.loader.store().reader().unwrap();
        let device = store::device_by_id(&conn, id).unwrap();
        assert_eq!(device.normalized_name, "abc-sw-01");
        assert_eq!(device.site_code.as_deref(), Some("ABC"));
        assert_eq!(device.os_version.as_deref(), Some("15.2(7)E"));
        assert!(device.have_sn);
        assert!(!device.is_stack);
        assert_eq!(device.stack_count, 0);

        let serials = store::serials_of(&conn, id).unwrap();
        assert_eq!(serials.len(), 1);
        assert_eq!(serials[0].serial, "FOC1234ABCD");
        assert!(serials[0].is_primary);

        let vendor: String = conn
            .query_row(
                "SELECT v.name FROM devices d JOIN vendors v ON d.vendor_id = v.id WHERE d.id = ?1",
                rusqlite::params![id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(vendor, "Cisco Systems");

        let role: String = conn
            .query_row(
                "SELECT dr.name FROM devices d JOIN device_roles dr ON d.role_id = dr.id WHERE d.id = ?1",
                rusqlite::params![id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(role, "access");

        let sites = fx.loader.store().site_inventory().unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].role_count, 1);

        assert_eq!(store::count_rows(&conn, "fingerprint_extractions").unwrap(), 1);
    }

    #[test]
    fn test_fingerprint_ingest_stack() {
        let fx = fixture();
        let mut record = s1_record();
        record.hostname = "ABC-CORE-01".to_string();
        record.serial_number = "FCW2425G0BB, FJC2422E0NW, FJC2422E0NB".to_string();
        record.model = "C9300-48UXM, C9300-48UXM, C9300-48UXM".to_string();

        let id = fx.loader.ingest_fingerprint_record(&record, None).unwrap();
        let conn = fx.loader.store().reader().unwrap();

        let serials = store::serials_of(&conn, id).unwrap();
        assert_eq!(serials.len(), 3);
        assert!(serials[0].is_primary);
        assert!(serials.iter().skip(1).all(|s| !s.is_primary));

        let members = store::stack_members_of(&conn, id).unwrap();
        assert_eq!(members.len(), 3);
        assert_eq!(
            members.iter().map(|m| m.position).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(members[0].is_master);

        let device = store::device_by_id(&conn, id).unwrap();
        assert_eq!(device.stack_count, 3);
        assert!(device.is_stack);
    }

    #[test]
    fn test_fingerprint_reingest_is_idempotent() {
        let fx = fixture();
        let record = {
            let mut r = s1_record();
            r.serial_number = "AAA, BBB".to_string();
            r.model = "M1, M2".to_string();
            r
        };

        let id1 = fx.loader.ingest_fingerprint_record(&record, None).unwrap();
        let id2 = fx.loader.ingest_fingerprint_record(&record, None).unwrap();
        assert_eq!(id1, id2);

        let conn = fx.loader.store().reader().unwrap();
        assert_eq!(store::count_rows(&conn, "devices").unwrap(), 1);
        assert_eq!(store::serials_of(&conn, id1).unwrap().len(), 2);
        assert_eq!(store::stack_members_of(&conn, id1).unwrap().len(), 2);
        assert_eq!(store::count_rows(&conn, "fingerprint_extractions").unwrap(), 1);

        let device = store::device_by_id(&conn, id1).unwrap();
        assert!(device.have_sn);
        assert_eq!(device.stack_count, 2);
        assert!(device.is_stack);
    }

    #[test]
    fn test_capture_ingest_unknown_device_is_skip() {
        let fx = fixture();
        let path = write_capture(&fx, "version", "nobody-knows-me", &"x".repeat(100));
        assert_eq!(
            fx.loader.ingest_capture_file(&path).unwrap(),
            CaptureOutcome::DeviceUnknown
        );
    }

    #[test]
    fn test_capture_ingest_unknown_type_is_error() {
        let fx = fixture();
        let path = write_capture(&fx, "not-a-capture-type", "abc-sw-01", "body");
        let err = fx.loader.ingest_capture_file(&path).unwrap_err();
        assert!(matches!(err, LoaderError::UnknownCaptureType { .. }));
    }

    #[test]
    fn test_capture_current_archive_history() {
        let fx = fixture();
        fx.loader
            .ingest_fingerprint_record(&s1_record(), None)
            .unwrap();

        let content_v1 = format!("Cisco IOS output\n{}\n", "line\n".repeat(20));
        let path = write_capture(&fx, "version", "abc-sw-01", &content_v1);

        // First ingest inserts.
        assert_eq!(
            fx.loader.ingest_capture_file(&path).unwrap(),
            CaptureOutcome::Inserted
        );

        // Re-ingesting identical content changes nothing.
        assert_eq!(
            fx.loader.ingest_capture_file(&path).unwrap(),
            CaptureOutcome::Unchanged
        );
        let conn = fx.loader.store().reader().unwrap();
        assert_eq!(store::count_rows(&conn, "capture_current").unwrap(), 1);
        assert_eq!(store::count_rows(&conn, "capture_archive").unwrap(), 0);
        let hash_v1 = {
            let device_id: i64 = conn
                .query_row("SELECT id FROM devices", [], |r| r.get(0))
                .unwrap();
            store::current_capture(&conn, device_id, "version")
                .unwrap()
                .unwrap()
                .content_hash
        };
        drop(conn);

        // Changed content: archive the prior row, emit a change.
        let content_v2 = content_v1.replace("Cisco IOS output", "Cisco IOS output, new image");
        std::fs::write(&path, &content_v2).unwrap();
        let outcome = fx.loader.ingest_capture_file(&path).unwrap();
        let CaptureOutcome::Updated { change_id, .. } = outcome else {
            panic!("expected update, got {:?}", outcome);
        };
        assert!(change_id > 0);

        let conn = fx.loader.store().reader().unwrap();
        assert_eq!(store::count_rows(&conn, "capture_current").unwrap(), 1);
        assert_eq!(store::count_rows(&conn, "capture_archive").unwrap(), 1);

        // The archive row's hash equals the current row's hash
        // immediately before the ingest.
        let archived_hash: String = conn
            .query_row("SELECT content_hash FROM capture_archive", [], |r| r.get(0))
            .unwrap();
        assert_eq!(archived_hash, hash_v1);

        let change_hashes: (String, String) = conn
            .query_row(
                "SELECT previous_hash, new_hash FROM capture_changes WHERE id = ?1",
                rusqlite::params![change_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(change_hashes.0, hash_v1);
        assert_ne!(change_hashes.0, change_hashes.1);

        let diff_path: Option<String> = conn
            .query_row(
                "SELECT diff_path FROM capture_changes WHERE id = ?1",
                rusqlite::params![change_id],
                |r| r.get(0),
            )
            .unwrap();
        assert!(diff_path.is_some());
        assert!(std::path::Path::new(&diff_path.unwrap()).exists());
    }

    #[test]
    fn test_capture_change_severity_mixed_counters() {
        let fx = fixture();
        fx.loader
            .ingest_fingerprint_record(&s1_record(), None)
            .unwrap();

        // A 200-line config with counter lines and a banner.
        let mut base: Vec<String> = (0..195).map(|i| format!("interface detail {}", i)).collect();
        base.push("uptime is 10 minutes".to_string());
        base.push("uptime is 20 minutes".to_string());
        base.push("uptime is 30 minutes".to_string());
        base.push("banner line alpha".to_string());
        base.push("banner line beta".to_string());
        // Pad past the configs success threshold.
        let content_v1 = base.join("\n") + "\n";

        let path = write_capture(&fx, "configs", "abc-sw-01", &content_v1);
        fx.loader.ingest_capture_file(&path).unwrap();

        let content_v2 = content_v1
            .replace("uptime is 10", "uptime is 11")
            .replace("uptime is 20", "uptime is 21")
            .replace("uptime is 30", "uptime is 31")
            .replace("banner line alpha", "banner line gamma")
            .replace("banner line beta", "banner line delta");
        std::fs::write(&path, &content_v2).unwrap();

        let outcome = fx.loader.ingest_capture_file(&path).unwrap();
        let CaptureOutcome::Updated { change_id, severity } = outcome else {
            panic!("expected update");
        };
        assert_eq!(severity, Severity::Moderate);

        let conn = fx.loader.store().reader().unwrap();
        let (added, removed): (i64, i64) = conn
            .query_row(
                "SELECT lines_added, lines_removed FROM capture_changes WHERE id = ?1",
                rusqlite::params![change_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(added + removed, 10);
    }

    #[test]
    fn test_capture_success_heuristic() {
        let fx = fixture();
        assert!(!fx.loader.capture_success("tiny", 4, "version"));
        assert!(!fx
            .loader
            .capture_success(&"x".repeat(100), 100, "configs"));
        assert!(fx.loader.capture_success(&"x".repeat(2000), 2000, "configs"));
        assert!(!fx.loader.capture_success(
            &format!("{}\n% Invalid input detected", "x".repeat(100)),
            120,
            "version"
        ));
    }

    #[test]
    fn test_read_capture_content_missing_artifact() {
        let fx = fixture();
        let row = CaptureCurrentRow {
            id: 1,
            device_id: 1,
            capture_type: "version".to_string(),
            captured_at: Utc::now(),
            file_path: "/nonexistent/version/ghost.txt".to_string(),
            byte_count: 0,
            line_count: 0,
            content_hash: String::new(),
            success: false,
            command_used: None,
            content: String::new(),
            content_snippet: None,
        };
        let err = fx.loader.read_capture_content(&row).unwrap_err();
        assert!(matches!(err, LoaderError::CaptureMissing { .. }));
    }

    #[test]
    fn test_ingest_capture_dir_stats() {
        let fx = fixture();
        fx.loader
            .ingest_fingerprint_record(&s1_record(), None)
            .unwrap();

        write_capture(&fx, "version", "abc-sw-01", &"v".repeat(100));
        write_capture(&fx, "arp", "abc-sw-01", &"a".repeat(100));
        write_capture(&fx, "arp", "unknown-dev", &"a".repeat(100));

        let stats = fx.loader.ingest_capture_dir(&fx.captures, None).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.loaded, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.failed, 0);
    }
}
