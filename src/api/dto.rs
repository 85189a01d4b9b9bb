//! Request/response bodies for the endpoint table in §6. Field names track
//! the original prototype's pydantic schemas (`operations/schemas/*.py`)
//! so the wire shape is unchanged even though the service underneath it
//! isn't.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{LogicalMultipartPart, LogicalObject, PhysicalBucketLocator, PhysicalObjectLocator, Status};

#[derive(Debug, Deserialize)]
pub struct RegisterBucketsRequest {
    pub bucket: String,
    #[serde(default)]
    pub version_enable: Option<String>,
    #[serde(default)]
    pub physical_locations: Vec<PhysicalLocationDto>,
}

#[derive(Debug, Deserialize)]
pub struct PhysicalLocationDto {
    pub name: String,
    pub cloud: String,
    pub region: String,
    pub bucket: String,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub need_warmup: bool,
}

#[derive(Debug, Deserialize)]
pub struct StartCreateBucketRequest {
    pub bucket: String,
    pub client_from_region: String,
    #[serde(default)]
    pub warmup_regions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteCreateBucketRequest {
    pub id: i64,
    pub creation_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct BucketOnlyRequest {
    pub bucket: String,
}

#[derive(Debug, Deserialize)]
pub struct LocateBucketRequest {
    pub bucket: String,
    pub client_from_region: String,
}

#[derive(Debug, Deserialize)]
pub struct PutBucketVersioningRequest {
    pub bucket: String,
    pub versioning: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteDeleteBucketRequest {
    pub id: i64,
}

#[derive(Debug, Serialize)]
pub struct BucketResponse {
    pub bucket: String,
    pub creation_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct StartUploadRequestBody {
    pub bucket: String,
    pub key: String,
    pub client_from_region: String,
    #[serde(default)]
    pub version_id: Option<i64>,
    #[serde(default)]
    pub ttl: Option<i64>,
    #[serde(default)]
    pub copy_src_bucket: Option<String>,
    #[serde(default)]
    pub copy_src_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartUploadResponseBody {
    pub locators: Vec<PhysicalObjectLocator>,
    pub multipart_upload_id: Option<String>,
    pub copy_src_buckets: Vec<String>,
    pub copy_src_keys: Vec<String>,
    pub version_enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct CompleteUploadRequestBody {
    pub id: i64,
    pub size: i64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub version_id: Option<String>,
    #[serde(default)]
    pub ttl: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LocateObjectRequestBody {
    pub bucket: String,
    pub key: String,
    pub client_from_region: String,
    #[serde(default)]
    pub version_id: Option<i64>,
    #[serde(default)]
    pub manual_tag: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LocateObjectResponseBody {
    pub locator: PhysicalObjectLocator,
    pub object: LogicalObject,
    pub ttl_for_dst: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ObjectKeyRequest {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct ListObjectsRequest {
    pub bucket: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub start_after: Option<String>,
    #[serde(default = "default_max_keys")]
    pub max_keys: i64,
}

fn default_max_keys() -> i64 {
    1000
}

#[derive(Debug, Deserialize)]
pub struct DeleteObjectEntry {
    pub key: String,
    #[serde(default)]
    pub version_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StartDeleteObjectsRequest {
    pub bucket: String,
    pub objects: Vec<DeleteObjectEntry>,
}

#[derive(Debug, Serialize)]
pub struct DeleteObjectPlanDto {
    pub key: String,
    pub op_type: &'static str,
    pub logical_object_id: i64,
    pub delete_marker: bool,
    pub locators: Vec<PhysicalObjectLocator>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteDeleteObjectsRequest {
    pub plans: Vec<CompleteDeleteObjectPlanDto>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteDeleteObjectPlanDto {
    pub key: String,
    pub op_type: String,
    pub logical_object_id: i64,
    pub delete_marker: bool,
    #[serde(default)]
    pub locators: Vec<PhysicalObjectLocator>,
}

#[derive(Debug, Deserialize)]
pub struct SetMultipartIdRequest {
    pub logical_object_id: i64,
    pub multipart_upload_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AppendPartRequest {
    pub physical_object_locator_id: i64,
    pub part_number: i32,
    pub etag: String,
    pub size: i64,
}

#[derive(Debug, Deserialize)]
pub struct ContinueUploadRequest {
    pub bucket: String,
    pub key: String,
    pub multipart_upload_id: String,
    #[serde(default)]
    pub version_id: Option<i64>,
    #[serde(default)]
    pub copy_src_bucket: Option<String>,
    #[serde(default)]
    pub copy_src_key: Option<String>,
    #[serde(default)]
    pub do_list_parts: bool,
}

#[derive(Debug, Serialize)]
pub struct ContinueUploadPhysicalPart {
    pub part_number: i32,
    pub etag: String,
}

#[derive(Debug, Serialize)]
pub struct ContinueUploadResponse {
    pub id: i64,
    pub tag: String,
    pub cloud: String,
    pub bucket: String,
    pub region: String,
    pub key: String,
    pub multipart_upload_id: Option<String>,
    pub version_id: Option<String>,
    pub parts: Option<Vec<ContinueUploadPhysicalPart>>,
    pub copy_src_bucket: Option<String>,
    pub copy_src_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListPartsRequest {
    pub logical_object_id: i64,
}

#[derive(Debug, Serialize)]
pub struct ListPartsResponse {
    pub parts: Vec<LogicalMultipartPart>,
}

#[derive(Debug, Deserialize)]
pub struct ListMultipartUploadsRequest {
    pub bucket: String,
}

#[derive(Debug, Serialize)]
pub struct MultipartUploadDto {
    pub key: String,
    pub multipart_upload_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StartWarmupRequest {
    pub bucket: String,
    pub key: String,
    #[serde(default)]
    pub version_id: Option<i64>,
    pub warmup_regions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StartWarmupResponse {
    pub primary: PhysicalObjectLocator,
    pub secondary: Vec<PhysicalObjectLocator>,
}

#[derive(Debug, Deserialize)]
pub struct CleanRequest {
    #[serde(default)]
    pub cutoff: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CleanResponse {
    pub deleted: Vec<PhysicalObjectLocator>,
}

#[derive(Debug, Serialize)]
pub struct CleanOutRemainingResponse {
    pub deleted: Vec<PhysicalObjectLocator>,
    pub storage_cost: f64,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePolicyRequest {
    #[serde(default)]
    pub put_policy: Option<String>,
    #[serde(default)]
    pub get_policy: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMetricsRequest {
    pub issue_region: String,
    pub answer_region: String,
    pub latency: f64,
    pub key: String,
    pub size: i64,
    pub op: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: Status,
}

#[derive(Debug, Serialize)]
pub struct BoolResponse {
    pub value: bool,
}

#[derive(Debug, Serialize)]
pub struct EmptyResponse {}
