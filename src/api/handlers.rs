//! One function per endpoint in §6. Each takes the shared [`Core`] plus a
//! parsed request DTO and returns a serializable response, with `ApiError`
//! doing double duty as both the failure type and the HTTP-status mapping
//! (`crate::error::ApiError::status_code`/`body`).

use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};

use crate::api::dto::*;
use crate::core::Core;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::policy::PolicySnapshot;

fn snapshot(core: &Core) -> PolicySnapshot {
    core.policies.snapshot()
}

// ---------- buckets ----------

pub async fn register_buckets(core: &Core, req: RegisterBucketsRequest) -> ApiResult<EmptyResponse> {
    let locations: Vec<db::buckets::PhysicalLocation> = req
        .physical_locations
        .into_iter()
        .map(|p| db::buckets::PhysicalLocation {
            name: p.name,
            cloud: p.cloud,
            region: p.region,
            bucket: p.bucket,
            is_primary: p.is_primary,
            need_warmup: p.need_warmup,
        })
        .collect();
    db::buckets::register_buckets(
        &core.db,
        &req.bucket,
        req.version_enable.as_deref(),
        &locations,
        &core.settings.init_regions,
        &core.settings.skystore_bucket_prefix,
    )
    .await?;
    Ok(EmptyResponse {})
}

pub async fn start_create_bucket(core: &Core, req: StartCreateBucketRequest) -> ApiResult<Vec<crate::model::PhysicalBucketLocator>> {
    db::buckets::start_create_bucket(
        &core.db,
        &req.bucket,
        &req.client_from_region,
        &req.warmup_regions,
        &core.settings.init_regions,
        &core.settings.skystore_bucket_prefix,
    )
    .await
}

pub async fn complete_create_bucket(core: &Core, req: CompleteCreateBucketRequest) -> ApiResult<EmptyResponse> {
    db::buckets::complete_create_bucket(&core.db, req.id, req.creation_date).await?;
    Ok(EmptyResponse {})
}

pub async fn start_delete_bucket(core: &Core, req: BucketOnlyRequest) -> ApiResult<Vec<crate::model::PhysicalBucketLocator>> {
    db::buckets::start_delete_bucket(&core.db, &req.bucket).await
}

pub async fn complete_delete_bucket(core: &Core, req: CompleteDeleteBucketRequest) -> ApiResult<EmptyResponse> {
    db::buckets::complete_delete_bucket(&core.db, req.id).await?;
    Ok(EmptyResponse {})
}

pub async fn locate_bucket(core: &Core, req: LocateBucketRequest) -> ApiResult<crate::model::PhysicalBucketLocator> {
    db::buckets::locate_bucket(&core.db, &req.bucket, &req.client_from_region).await
}

pub async fn locate_bucket_status(core: &Core, req: LocateBucketRequest) -> ApiResult<StatusResponse> {
    let status = db::buckets::locate_bucket_status(&core.db, &req.bucket, &req.client_from_region).await?;
    Ok(StatusResponse { status })
}

pub async fn head_bucket(core: &Core, req: BucketOnlyRequest) -> ApiResult<EmptyResponse> {
    db::buckets::head_bucket(&core.db, &req.bucket).await?;
    Ok(EmptyResponse {})
}

pub async fn list_buckets(core: &Core) -> ApiResult<Vec<BucketResponse>> {
    let rows = db::buckets::list_buckets(&core.db).await?;
    Ok(rows.into_iter().map(|b| BucketResponse { bucket: b.bucket, creation_date: b.creation_date }).collect())
}

pub async fn put_bucket_versioning(core: &Core, req: PutBucketVersioningRequest) -> ApiResult<Vec<crate::model::PhysicalBucketLocator>> {
    db::buckets::put_bucket_versioning(&core.db, &req.bucket, &req.versioning).await
}

pub async fn check_version_setting(core: &Core, req: BucketOnlyRequest) -> ApiResult<BoolResponse> {
    let value = db::buckets::check_version_setting(&core.db, &req.bucket).await?;
    Ok(BoolResponse { value })
}

// ---------- objects ----------

pub async fn start_upload(core: &Core, req: StartUploadRequestBody) -> ApiResult<StartUploadResponseBody> {
    let now = core.clock.now(core.trace_idx.current());
    let db_req = db::objects::StartUploadRequest {
        bucket: &req.bucket,
        key: &req.key,
        client_from_region: &req.client_from_region,
        version_id: req.version_id,
        ttl: req.ttl,
        copy_src_bucket: req.copy_src_bucket.as_deref(),
        copy_src_key: req.copy_src_key.as_deref(),
    };

    let mut policy = core.policies.with_put_policy_mut(|p| p.clone());
    let result = db::objects::start_upload(&core.db, &db_req, &mut policy, &core.cost_graph, now).await;
    core.policies.with_put_policy_mut(|p| *p = policy);
    let result = result?;

    Ok(StartUploadResponseBody {
        locators: result.locators,
        multipart_upload_id: result.multipart_upload_id,
        copy_src_buckets: result.copy_src_buckets,
        copy_src_keys: result.copy_src_keys,
        version_enabled: result.version_enabled,
    })
}

pub async fn complete_upload(core: &Core, req: CompleteUploadRequestBody) -> ApiResult<EmptyResponse> {
    let put_policy_name = core.policies.put_policy_name();
    let db_req = db::objects::CompleteUploadRequest {
        id: req.id,
        size: req.size,
        etag: req.etag,
        last_modified: req.last_modified,
        version_id: req.version_id,
        ttl: req.ttl,
    };
    db::objects::complete_upload(&core.db, &db_req, &put_policy_name).await?;
    Ok(EmptyResponse {})
}

fn round_down_to_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = dt.date_naive().and_hms_opt(dt.hour(), 0, 0).unwrap();
    DateTime::<Utc>::from_naive_utc_and_offset(truncated, Utc)
}

/// §4.1 "Locate object (read path)" / §4.4: on a skystore hour boundary,
/// fire off a background `clean_object` sweep rounded to the hour.
pub async fn locate_object(core: &Arc<Core>, req: LocateObjectRequestBody) -> ApiResult<LocateObjectResponseBody> {
    let snap = snapshot(core);
    let idx = if matches!(snap.put_policy_name, "always_store" | "skystore") { core.trace_idx.next() } else { core.trace_idx.current() };
    let now = core.clock.now(idx);

    let mut policy = core.policies.with_put_policy_mut(|p| p.clone());

    if let Some(state) = policy.as_skystore_mut() {
        if state.crossed_into_new_hour(now) {
            let core_bg = core.clone();
            let cutoff = round_down_to_hour(now);
            tokio::spawn(async move {
                let mut bg_policy = core_bg.policies.with_put_policy_mut(|p| p.clone());
                let result =
                    db::objects::clean_object(&core_bg.db, cutoff, core_bg.store.as_ref(), &mut bg_policy, &core_bg.cost_graph).await;
                core_bg.policies.with_put_policy_mut(|p| *p = bg_policy);
                if let Err(e) = result {
                    tracing::warn!(error = %e, "background clean_object failed");
                }
            });
        }
    }

    let result = db::objects::locate_object(
        &core.db,
        &req.bucket,
        &req.key,
        &req.client_from_region,
        req.version_id,
        &mut policy,
        snap.get_policy,
        req.manual_tag.as_deref(),
        &core.cost_graph,
        now,
    )
    .await;
    core.policies.with_put_policy_mut(|p| *p = policy);
    let result = result?;

    Ok(LocateObjectResponseBody { locator: result.locator, object: result.logical, ttl_for_dst: result.ttl_for_dst })
}

pub async fn locate_object_status(core: &Core, req: LocateObjectRequestBody) -> ApiResult<StatusResponse> {
    let status = db::objects::locate_object_status(&core.db, &req.bucket, &req.key, &req.client_from_region).await?;
    Ok(StatusResponse { status })
}

pub async fn head_object(core: &Core, req: ObjectKeyRequest) -> ApiResult<crate::model::LogicalObject> {
    db::objects::head_object(&core.db, &req.bucket, &req.key).await
}

pub async fn list_objects(core: &Core, req: ListObjectsRequest) -> ApiResult<Vec<crate::model::LogicalObject>> {
    db::objects::list_objects(&core.db, &req.bucket, req.prefix.as_deref(), req.start_after.as_deref(), req.max_keys).await
}

pub async fn list_objects_versioning(core: &Core, req: ListObjectsRequest) -> ApiResult<Vec<crate::model::LogicalObject>> {
    db::objects::list_objects_versioning(&core.db, &req.bucket, req.prefix.as_deref(), req.start_after.as_deref(), req.max_keys).await
}

fn op_type_name(op: db::objects::DeleteOpType) -> &'static str {
    match op {
        db::objects::DeleteOpType::Add => "add",
        db::objects::DeleteOpType::Replace => "replace",
        db::objects::DeleteOpType::Delete => "delete",
    }
}

pub async fn start_delete_objects(core: &Core, req: StartDeleteObjectsRequest) -> ApiResult<Vec<DeleteObjectPlanDto>> {
    let entries: Vec<db::objects::DeleteObjectRequest> =
        req.objects.iter().map(|o| db::objects::DeleteObjectRequest { key: &o.key, version_id: o.version_id }).collect();
    let plans = db::objects::start_delete_objects(&core.db, &req.bucket, &entries).await?;
    Ok(plans
        .into_iter()
        .map(|p| DeleteObjectPlanDto {
            key: p.key,
            op_type: op_type_name(p.op_type),
            logical_object_id: p.logical_object_id,
            delete_marker: p.delete_marker,
            locators: p.locators,
        })
        .collect())
}

pub async fn complete_delete_objects(core: &Core, req: CompleteDeleteObjectsRequest) -> ApiResult<EmptyResponse> {
    let plans: Vec<db::objects::DeleteObjectPlan> = req
        .plans
        .into_iter()
        .map(|p| db::objects::DeleteObjectPlan {
            key: p.key,
            op_type: match p.op_type.as_str() {
                "add" => db::objects::DeleteOpType::Add,
                "delete" => db::objects::DeleteOpType::Delete,
                _ => db::objects::DeleteOpType::Replace,
            },
            logical_object_id: p.logical_object_id,
            delete_marker: p.delete_marker,
            locators: p.locators,
        })
        .collect();
    db::objects::complete_delete_objects(&core.db, &plans, core.store.as_ref()).await?;
    Ok(EmptyResponse {})
}

pub async fn start_warmup(core: &Core, req: StartWarmupRequest) -> ApiResult<StartWarmupResponse> {
    let (primary, secondary) = db::objects::start_warmup(&core.db, &req.bucket, &req.key, req.version_id, &req.warmup_regions).await?;
    Ok(StartWarmupResponse { primary, secondary })
}

pub async fn clean_object(core: &Core, req: CleanRequest) -> ApiResult<CleanResponse> {
    let cutoff = req.cutoff.unwrap_or_else(Utc::now);
    let mut policy = core.policies.with_put_policy_mut(|p| p.clone());
    let deleted = db::objects::clean_object(&core.db, cutoff, core.store.as_ref(), &mut policy, &core.cost_graph).await;
    core.policies.with_put_policy_mut(|p| *p = policy);
    Ok(CleanResponse { deleted: deleted? })
}

pub async fn clean_out_remaining(core: &Core, req: CleanRequest) -> ApiResult<CleanOutRemainingResponse> {
    let cutoff = req.cutoff.unwrap_or_else(Utc::now);
    let (deleted, storage_cost) = db::objects::clean_out_remaining(&core.db, cutoff, core.store.as_ref(), &core.cost_graph).await?;
    Ok(CleanOutRemainingResponse { deleted, storage_cost })
}

// ---------- multipart ----------

pub async fn set_multipart_id(core: &Core, req: SetMultipartIdRequest) -> ApiResult<EmptyResponse> {
    db::multipart::set_multipart_id(&core.db, req.logical_object_id, &req.multipart_upload_id).await?;
    Ok(EmptyResponse {})
}

pub async fn append_part(core: &Core, req: AppendPartRequest) -> ApiResult<EmptyResponse> {
    db::multipart::append_part(&core.db, req.physical_object_locator_id, req.part_number, &req.etag, req.size).await?;
    Ok(EmptyResponse {})
}

pub async fn continue_upload(core: &Core, req: ContinueUploadRequest) -> ApiResult<Vec<ContinueUploadResponse>> {
    let locators = db::multipart::continue_upload(
        &core.db,
        &req.bucket,
        &req.key,
        &req.multipart_upload_id,
        req.version_id,
        req.copy_src_bucket.as_deref(),
        req.copy_src_key.as_deref(),
        req.do_list_parts,
    )
    .await?;

    Ok(locators
        .into_iter()
        .map(|l| ContinueUploadResponse {
            id: l.locator.id,
            tag: l.locator.location_tag,
            cloud: l.locator.cloud,
            bucket: l.locator.bucket,
            region: l.locator.region,
            key: l.locator.key,
            multipart_upload_id: l.locator.multipart_upload_id,
            version_id: l.locator.version_id,
            parts: l.parts.map(|parts| {
                parts.into_iter().map(|p| ContinueUploadPhysicalPart { part_number: p.part_number, etag: p.etag }).collect()
            }),
            copy_src_bucket: l.copy_src_bucket,
            copy_src_key: l.copy_src_key,
        })
        .collect())
}

pub async fn list_parts(core: &Core, req: ListPartsRequest) -> ApiResult<ListPartsResponse> {
    let parts = db::multipart::list_parts(&core.db, req.logical_object_id).await?;
    Ok(ListPartsResponse { parts })
}

pub async fn list_multipart_uploads(core: &Core, req: ListMultipartUploadsRequest) -> ApiResult<Vec<MultipartUploadDto>> {
    let rows = db::multipart::list_multipart_uploads(&core.db, &req.bucket).await?;
    Ok(rows.into_iter().map(|u| MultipartUploadDto { key: u.key, multipart_upload_id: u.multipart_upload_id }).collect())
}

// ---------- policy & metrics ----------

pub async fn update_policy(core: &Core, req: UpdatePolicyRequest) -> ApiResult<EmptyResponse> {
    core.policies.update(req.put_policy.as_deref(), req.get_policy.as_deref())?;
    Ok(EmptyResponse {})
}

pub async fn update_metrics(core: &Core, req: UpdateMetricsRequest) -> ApiResult<EmptyResponse> {
    sqlx::query(
        "INSERT INTO metrics (timestamp, issue_region, answer_region, latency, key, size, op) VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(Utc::now())
    .bind(&req.issue_region)
    .bind(&req.answer_region)
    .bind(req.latency)
    .bind(&req.key)
    .bind(req.size)
    .bind(&req.op)
    .execute(&core.db)
    .await
    .map_err(ApiError::from)?;
    Ok(EmptyResponse {})
}

pub fn healthz() -> &'static str {
    "ok"
}
