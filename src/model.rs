//! Core metadata entities (§3 of the design spec).
//!
//! These are plain data carriers; all invariants (I1-I7) are enforced by the
//! transactions in [`crate::db`], not by these types themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status shared by logical/physical buckets and objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    PendingDeletion,
    Ready,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::PendingDeletion => "pending_deletion",
            Status::Ready => "ready",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Status::Pending),
            "pending_deletion" => Some(Status::PendingDeletion),
            "ready" => Some(Status::Ready),
            _ => None,
        }
    }
}

/// Versioning configuration of a logical bucket. `None` means "unset".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum VersioningState {
    Enabled,
    Suspended,
}

impl VersioningState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersioningState::Enabled => "Enabled",
            VersioningState::Suspended => "Suspended",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Enabled" => Some(VersioningState::Enabled),
            "Suspended" => Some(VersioningState::Suspended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalBucket {
    pub bucket: String,
    pub prefix: String,
    pub status: Status,
    pub creation_date: DateTime<Utc>,
    pub version_enabled: Option<VersioningState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalBucketLocator {
    pub id: i64,
    pub bucket_name: String,
    pub location_tag: String,
    pub cloud: String,
    pub region: String,
    pub bucket: String,
    pub prefix: String,
    pub status: Status,
    pub lock_acquired_ts: Option<DateTime<Utc>>,
    pub is_primary: bool,
    pub need_warmup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalObject {
    pub id: i64,
    pub bucket: String,
    pub key: String,
    pub size: Option<i64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub status: Status,
    pub version_suspended: bool,
    pub delete_marker: bool,
    pub multipart_upload_id: Option<String>,
    pub base_region: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalObjectLocator {
    pub id: i64,
    pub logical_object_id: i64,
    pub location_tag: String,
    pub cloud: String,
    pub region: String,
    pub bucket: String,
    pub key: String,
    pub status: Status,
    pub lock_acquired_ts: Option<DateTime<Utc>>,
    pub is_primary: bool,
    pub version_id: Option<String>,
    pub multipart_upload_id: Option<String>,
    /// seconds; -1 == keep forever, 0 == evict on next sweep
    pub ttl: i64,
    pub storage_start_time: Option<DateTime<Utc>>,
}

impl PhysicalObjectLocator {
    /// I6: a locator with a finite ttl is live only inside its storage window.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        if self.ttl == -1 {
            return true;
        }
        match self.storage_start_time {
            Some(start) => now < start + chrono::Duration::seconds(self.ttl),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator(ttl: i64, storage_start_time: Option<DateTime<Utc>>) -> PhysicalObjectLocator {
        PhysicalObjectLocator {
            id: 1,
            logical_object_id: 1,
            location_tag: "aws:us-east-1".to_string(),
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
            bucket: "b".to_string(),
            key: "k".to_string(),
            status: Status::Ready,
            lock_acquired_ts: None,
            is_primary: true,
            version_id: None,
            multipart_upload_id: None,
            ttl,
            storage_start_time,
        }
    }

    #[test]
    fn ttl_of_minus_one_never_expires() {
        let l = locator(-1, Some(Utc::now() - chrono::Duration::days(365)));
        assert!(l.is_live(Utc::now()));
    }

    #[test]
    fn locator_dies_exactly_at_storage_start_plus_ttl() {
        let start = Utc::now() - chrono::Duration::seconds(100);
        let l = locator(100, Some(start));
        assert!(!l.is_live(start + chrono::Duration::seconds(101)));
        assert!(l.is_live(start + chrono::Duration::seconds(50)));
    }

    #[test]
    fn missing_storage_start_time_is_treated_as_live() {
        let l = locator(0, None);
        assert!(l.is_live(Utc::now()));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalMultipartPart {
    pub logical_object_id: i64,
    pub part_number: i32,
    pub etag: String,
    pub size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalMultipartPart {
    pub physical_object_locator_id: i64,
    pub part_number: i32,
    pub etag: String,
    pub size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub timestamp: DateTime<Utc>,
    pub issue_region: String,
    pub answer_region: String,
    pub latency: f64,
    pub key: String,
    pub size: i64,
    pub op: String,
}
