//! Typed row shapes for the asset store.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A device row as stored.
#[derive(Debug, Clone, Default)]
pub struct DeviceRow {
    pub id: i64,
    pub name: String,
    pub normalized_name: String,
    pub site_code: Option<String>,
    pub vendor_id: Option<i64>,
    pub device_type_id: Option<i64>,
    pub role_id: Option<i64>,
    pub model: Option<String>,
    pub os_version: Option<String>,
    pub uptime: Option<String>,
    pub uptime_minutes: Option<i64>,
    pub have_sn: bool,
    pub management_ip: Option<String>,
    pub is_stack: bool,
    pub stack_count: i64,
    pub last_fingerprint: Option<String>,
    pub source_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeviceSerialRow {
    pub id: i64,
    pub device_id: i64,
    pub serial: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone)]
pub struct StackMemberRow {
    pub id: i64,
    pub device_id: i64,
    pub serial: String,
    pub position: i64,
    pub model: Option<String>,
    pub is_master: bool,
}

#[derive(Debug, Clone)]
pub struct ComponentRow {
    pub id: i64,
    pub device_id: i64,
    pub kind: String,
    pub name: String,
    pub description: Option<String>,
    pub serial: Option<String>,
    pub position: Option<String>,
    pub extraction_source: Option<String>,
    pub extraction_confidence: Option<f64>,
}

/// The latest capture of one type for one device.
///
/// `content` is the full captured text; the on-disk artifact is overwritten
/// by subsequent batches, so diffing uses this copy.
#[derive(Debug, Clone)]
pub struct CaptureCurrentRow {
    pub id: i64,
    pub device_id: i64,
    pub capture_type: String,
    pub captured_at: DateTime<Utc>,
    pub file_path: String,
    pub byte_count: i64,
    pub line_count: i64,
    pub content_hash: String,
    pub success: bool,
    pub command_used: Option<String>,
    pub content: String,
    pub content_snippet: Option<String>,
}

/// Ingest-side payload for a capture row.
#[derive(Debug, Clone)]
pub struct CaptureUpsert {
    pub device_id: i64,
    pub capture_type: String,
    pub captured_at: DateTime<Utc>,
    pub file_path: String,
    pub byte_count: i64,
    pub line_count: i64,
    pub content_hash: String,
    pub success: bool,
    pub command_used: Option<String>,
    pub content: String,
    pub content_snippet: Option<String>,
}

/// An emitted change row.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureChangeRow {
    pub id: i64,
    pub device_id: i64,
    pub capture_type: String,
    pub detected_at: String,
    pub previous_hash: String,
    pub new_hash: String,
    pub lines_added: i64,
    pub lines_removed: i64,
    pub diff_path: Option<String>,
    pub severity: String,
}

/// Pre-joined per-device status projection (`v_device_status`).
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatusRow {
    pub id: i64,
    pub name: String,
    pub normalized_name: String,
    pub site_code: Option<String>,
    pub vendor_name: Option<String>,
    pub model: Option<String>,
    pub os_version: Option<String>,
    pub is_stack: bool,
    pub stack_count: i64,
    pub have_sn: bool,
    pub current_captures: i64,
    pub capture_types: i64,
    pub last_fingerprint: Option<String>,
}

/// Capture coverage projection (`v_capture_coverage`).
#[derive(Debug, Clone, Serialize)]
pub struct CaptureCoverageRow {
    pub capture_type: String,
    pub vendor_name: Option<String>,
    pub device_count: i64,
    pub success_count: i64,
    pub failed_count: i64,
    pub latest_capture: Option<String>,
}

/// Site inventory projection (`v_site_inventory`).
#[derive(Debug, Clone, Serialize)]
pub struct SiteInventoryRow {
    pub code: String,
    pub site_name: String,
    pub total_devices: i64,
    pub stacked_devices: i64,
    pub devices_with_serials: i64,
    pub vendor_count: i64,
    pub vendors: Option<String>,
    pub role_count: i64,
}
