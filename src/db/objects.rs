//! Object-scoped metadata operations (§4.1): start/complete upload, the
//! read path, delete-object S3 semantics, warmup, and the TTL GC sweep.
//! Grounded in `original_source/.../operations/object_operations/{put,get,delete,clean,warmup}.py`.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::cost_graph::CostGraph;
use crate::error::{try_db, ApiError, ApiResult};
use crate::model::{LogicalObject, PhysicalObjectLocator, Status};
use crate::policy::{PlacementPolicyKind, PlaceRequest, TransferPolicyKind};
use crate::store::ObjectStore;

fn row_to_logical_object(row: &sqlx::postgres::PgRow) -> ApiResult<LogicalObject> {
    Ok(LogicalObject {
        id: row.try_get("id")?,
        bucket: row.try_get("bucket")?,
        key: row.try_get("key")?,
        size: row.try_get("size")?,
        last_modified: row.try_get("last_modified")?,
        etag: row.try_get("etag")?,
        status: row.try_get("status")?,
        version_suspended: row.try_get("version_suspended")?,
        delete_marker: row.try_get("delete_marker")?,
        multipart_upload_id: row.try_get("multipart_upload_id")?,
        base_region: row.try_get("base_region")?,
    })
}

fn row_to_physical_object_locator(row: &sqlx::postgres::PgRow) -> ApiResult<PhysicalObjectLocator> {
    Ok(PhysicalObjectLocator {
        id: row.try_get("id")?,
        logical_object_id: row.try_get("logical_object_id")?,
        location_tag: row.try_get("location_tag")?,
        cloud: row.try_get("cloud")?,
        region: row.try_get("region")?,
        bucket: row.try_get("bucket")?,
        key: row.try_get("key")?,
        status: row.try_get("status")?,
        lock_acquired_ts: row.try_get("lock_acquired_ts")?,
        is_primary: row.try_get("is_primary")?,
        version_id: row.try_get("version_id")?,
        multipart_upload_id: row.try_get("multipart_upload_id")?,
        ttl: row.try_get("ttl")?,
        storage_start_time: row.try_get("storage_start_time")?,
    })
}

async fn fetch_physical_locators_for_logical<'e, E>(executor: E, logical_object_id: i64) -> ApiResult<Vec<PhysicalObjectLocator>>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let rows = try_db!(
        sqlx::query("SELECT * FROM physical_object_locators WHERE logical_object_id = $1")
            .bind(logical_object_id)
            .fetch_all(executor)
            .await
    );
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(row_to_physical_object_locator(row)?);
    }
    Ok(out)
}

/// Latest (or, if `version_id` given, that exact) logical row for
/// `(bucket, key)` in `ready`/`pending` status.
async fn latest_logical_object<'e, E>(executor: E, bucket: &str, key: &str, version_id: Option<i64>) -> ApiResult<Option<LogicalObject>>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let row = if let Some(vid) = version_id {
        try_db!(
            sqlx::query(
                "SELECT * FROM logical_objects WHERE bucket = $1 AND key = $2 AND id = $3 \
                 AND status IN ('ready', 'pending')"
            )
            .bind(bucket)
            .bind(key)
            .bind(vid)
            .fetch_optional(executor)
            .await
        )
    } else {
        try_db!(
            sqlx::query(
                "SELECT * FROM logical_objects WHERE bucket = $1 AND key = $2 \
                 AND status IN ('ready', 'pending') ORDER BY id DESC LIMIT 1"
            )
            .bind(bucket)
            .bind(key)
            .fetch_optional(executor)
            .await
        )
    };
    row.as_ref().map(row_to_logical_object).transpose()
}

pub struct StartUploadRequest<'a> {
    pub bucket: &'a str,
    pub key: &'a str,
    pub client_from_region: &'a str,
    pub version_id: Option<i64>,
    pub ttl: Option<i64>,
    pub copy_src_bucket: Option<&'a str>,
    pub copy_src_key: Option<&'a str>,
}

pub struct StartUploadResult {
    pub locators: Vec<PhysicalObjectLocator>,
    pub multipart_upload_id: Option<String>,
    pub copy_src_buckets: Vec<String>,
    pub copy_src_keys: Vec<String>,
    pub version_enabled: bool,
}

/// §4.1 "Start upload" — the single most complex operation.
pub async fn start_upload(
    pool: &PgPool,
    req: &StartUploadRequest<'_>,
    put_policy: &mut PlacementPolicyKind,
    graph: &CostGraph,
    now: DateTime<Utc>,
) -> ApiResult<StartUploadResult> {
    let mut tx = try_db!(pool.begin().await);

    let bucket_row: Option<(Option<String>,)> =
        try_db!(sqlx::query_as("SELECT version_enabled FROM logical_buckets WHERE bucket = $1").bind(req.bucket).fetch_optional(&mut *tx).await);
    let Some((version_enabled_raw,)) = bucket_row else {
        return Err(ApiError::NotFound("bucket not found".into()));
    };
    let version_enabled: Option<bool> = version_enabled_raw.as_deref().map(|s| s == "Enabled");

    if version_enabled.is_none() || version_enabled == Some(false) {
        try_db!(sqlx::query("LOCK TABLE logical_objects IN EXCLUSIVE MODE").execute(&mut *tx).await);
        if version_enabled.is_none() && req.version_id.is_some() {
            return Err(ApiError::BadRequest("versioning is NULL; enable versioning first".into()));
        }
    }

    let existing = latest_logical_object(&mut *tx, req.bucket, req.key, req.version_id).await?;

    if req.version_id.is_some()
        && existing.is_none()
        && (req.copy_src_bucket.is_some() || put_policy.name() == "always_store" || put_policy.name() == "skystore")
    {
        return Err(ApiError::NotFound(format!("object of version {:?} not found", req.version_id)));
    }

    let mut existing_tags: Vec<(String, i64)> = Vec::new();
    let mut primary_exists = false;
    let mut primary_region: Option<String> = None;

    let existing_locators = match &existing {
        Some(obj) => fetch_physical_locators_for_logical(&mut *tx, obj.id).await?,
        None => Vec::new(),
    };

    let mut object_already_exists = false;
    for locator in &existing_locators {
        let live = locator.ttl == -1
            || locator.storage_start_time.map(|start| now <= start + chrono::Duration::seconds(locator.ttl)).unwrap_or(false);
        if locator.location_tag == req.client_from_region && live {
            object_already_exists = true;
        }
        if live {
            existing_tags.push((locator.location_tag.clone(), locator.id));
        }
        if locator.is_primary {
            primary_exists = true;
            primary_region = Some(locator.location_tag.clone());
        }
    }

    if object_already_exists && !version_enabled.unwrap_or(false) {
        return Err(ApiError::Conflict("object already exists".into()));
    }

    let reuse_existing = put_policy.name() == "always_store"
        || put_policy.name() == "skystore"
        || version_enabled.is_none()
        || version_enabled == Some(false)
        || existing.as_ref().map(|o| o.version_suspended).unwrap_or(false);

    let logical_object = match existing {
        Some(obj) if reuse_existing => {
            try_db!(
                sqlx::query("UPDATE logical_objects SET delete_marker = FALSE WHERE id = $1").bind(obj.id).execute(&mut *tx).await
            );
            obj
        }
        Some(obj) => {
            let row = try_db!(
                sqlx::query(
                    "INSERT INTO logical_objects (bucket, key, status, version_suspended, delete_marker, base_region) \
                     VALUES ($1, $2, $3, $4, FALSE, $5) RETURNING *"
                )
                .bind(req.bucket)
                .bind(req.key)
                .bind(Status::Pending)
                .bind(!version_enabled.unwrap_or(false))
                .bind(&obj.base_region)
                .fetch_one(&mut *tx)
                .await
            );
            row_to_logical_object(&row)?
        }
        None => {
            let row = try_db!(
                sqlx::query(
                    "INSERT INTO logical_objects (bucket, key, status, version_suspended, delete_marker, base_region) \
                     VALUES ($1, $2, $3, $4, FALSE, $5) RETURNING *"
                )
                .bind(req.bucket)
                .bind(req.key)
                .bind(Status::Pending)
                .bind(!version_enabled.unwrap_or(false))
                .bind(req.client_from_region)
                .fetch_one(&mut *tx)
                .await
            );
            row_to_logical_object(&row)?
        }
    };

    let physical_bucket_rows =
        try_db!(sqlx::query("SELECT * FROM physical_bucket_locators WHERE bucket_name = $1").bind(req.bucket).fetch_all(&mut *tx).await);

    let place_req = PlaceRequest {
        client_region: req.client_from_region,
        init_regions: &[],
        bucket_primary_region: primary_region.as_deref(),
        need_warmup_regions: &[],
        single_region: primary_region.as_deref().unwrap_or(req.client_from_region),
    };
    let mut upload_to_region_tags = put_policy.place(&place_req);

    let primary_write_region: String = if primary_exists && (put_policy.name() == "always_store" || put_policy.name() == "skystore") {
        primary_region.clone().unwrap_or_else(|| req.client_from_region.to_string())
    } else if put_policy.name() == "push" || put_policy.name() == "replicate_all" {
        let mut tags: Vec<String> = Vec::new();
        for row in &physical_bucket_rows {
            let is_primary: bool = row.try_get("is_primary")?;
            if is_primary {
                tags.push(row.try_get("location_tag")?);
            }
        }
        tags.into_iter().next().ok_or_else(|| ApiError::Internal("no primary write region for bucket".into()))?
    } else if put_policy.name() == "single_region" {
        upload_to_region_tags.first().cloned().unwrap_or_else(|| req.client_from_region.to_string())
    } else {
        req.client_from_region.to_string()
    };

    // copy-source region intersection (§4.1 point 6).
    let mut copy_src_buckets = Vec::new();
    let mut copy_src_keys = Vec::new();
    if let (Some(src_bucket), Some(src_key)) = (req.copy_src_bucket, req.copy_src_key) {
        let src_row = try_db!(
            sqlx::query(
                "SELECT * FROM logical_objects WHERE bucket = $1 AND key = $2 AND status = $3 \
                 ORDER BY id DESC LIMIT 1"
            )
            .bind(src_bucket)
            .bind(src_key)
            .bind(Status::Ready)
            .fetch_optional(&mut *tx)
            .await
        );
        let Some(src_row) = src_row else {
            return Err(ApiError::NotFound("copy source object not found".into()));
        };
        let src_obj = row_to_logical_object(&src_row)?;
        if src_obj.delete_marker && req.version_id.is_none() {
            return Err(ApiError::NotFound("copy source object not found".into()));
        }
        if src_obj.delete_marker && req.version_id.is_some() {
            return Err(ApiError::BadRequest("not allowed to copy from a delete marker".into()));
        }
        let src_locators = fetch_physical_locators_for_logical(&mut *tx, src_obj.id).await?;
        let src_tags: Vec<String> = src_locators.iter().map(|l| l.location_tag.clone()).collect();

        let filtered: Vec<String> = upload_to_region_tags.iter().filter(|t| src_tags.contains(t)).cloned().collect();
        upload_to_region_tags = if filtered.is_empty() { src_tags.clone() } else { filtered };

        for tag in &upload_to_region_tags {
            if let Some(l) = src_locators.iter().find(|l| &l.location_tag == tag) {
                copy_src_buckets.push(l.bucket.clone());
                copy_src_keys.push(l.key.clone());
            }
        }
    }

    let mut locators = Vec::new();
    for tag in &upload_to_region_tags {
        let already_live = existing_tags.iter().any(|(t, _)| t == tag);
        if already_live && !version_enabled.unwrap_or(false) {
            continue;
        }

        let pbl = physical_bucket_rows.iter().find(|r| r.try_get::<String, _>("location_tag").ok().as_deref() == Some(tag.as_str()));
        let Some(pbl) = pbl else {
            return Err(ApiError::Internal(format!("no physical bucket locator found for upload region tag {tag}")));
        };
        let cloud: String = pbl.try_get("cloud")?;
        let region: String = pbl.try_get("region")?;
        let bucket_name: String = pbl.try_get("bucket")?;
        let prefix: String = pbl.try_get("prefix")?;
        let is_primary = tag == &primary_write_region;
        let set_ttl = match req.ttl {
            Some(t) => t,
            None => put_policy.get_ttl(now, &primary_write_region, tag, is_primary, graph),
        };

        let row = try_db!(
            sqlx::query(
                "INSERT INTO physical_object_locators \
                 (logical_object_id, location_tag, cloud, region, bucket, key, lock_acquired_ts, status, is_primary, ttl) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING *"
            )
            .bind(logical_object.id)
            .bind(tag)
            .bind(cloud)
            .bind(region)
            .bind(bucket_name)
            .bind(format!("{prefix}{}", req.key))
            .bind(now)
            .bind(Status::Pending)
            .bind(is_primary)
            .bind(set_ttl)
            .fetch_one(&mut *tx)
            .await
        );
        locators.push(row_to_physical_object_locator(&row)?);
    }

    try_db!(tx.commit().await);

    Ok(StartUploadResult {
        locators,
        multipart_upload_id: logical_object.multipart_upload_id,
        copy_src_buckets,
        copy_src_keys,
        version_enabled: version_enabled.is_some(),
    })
}

pub struct CompleteUploadRequest {
    pub id: i64,
    pub size: i64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub version_id: Option<String>,
    pub ttl: Option<i64>,
}

/// §4.1 "Complete upload".
pub async fn complete_upload(pool: &PgPool, req: &CompleteUploadRequest, put_policy_name: &str) -> ApiResult<()> {
    let mut tx = try_db!(pool.begin().await);

    let row = try_db!(sqlx::query("SELECT * FROM physical_object_locators WHERE id = $1").bind(req.id).fetch_optional(&mut *tx).await);
    let Some(row) = row else {
        return Err(ApiError::NotFound("physical locator not found".into()));
    };
    let locator = row_to_physical_object_locator(&row)?;

    try_db!(
        sqlx::query("UPDATE physical_object_locators SET status = $1, lock_acquired_ts = NULL, version_id = $2 WHERE id = $3")
            .bind(Status::Ready)
            .bind(&req.version_id)
            .bind(req.id)
            .execute(&mut *tx)
            .await
    );

    if locator.storage_start_time.is_none() {
        try_db!(
            sqlx::query("UPDATE physical_object_locators SET storage_start_time = $1 WHERE id = $2")
                .bind(req.last_modified)
                .bind(req.id)
                .execute(&mut *tx)
                .await
        );
    }
    if let Some(ttl) = req.ttl {
        try_db!(sqlx::query("UPDATE physical_object_locators SET ttl = $1 WHERE id = $2").bind(ttl).bind(req.id).execute(&mut *tx).await);
    }

    let promotes_logical = ((put_policy_name == "push" || put_policy_name == "replicate_all") && locator.is_primary)
        || matches!(put_policy_name, "always_store" | "always_evict" | "single_region" | "fixed_ttl" | "t_even" | "skystore");

    if promotes_logical {
        try_db!(
            sqlx::query("UPDATE logical_objects SET status = $1, size = $2, etag = $3, last_modified = $4 WHERE id = $5")
                .bind(Status::Ready)
                .bind(req.size)
                .bind(&req.etag)
                .bind(req.last_modified)
                .bind(locator.logical_object_id)
                .execute(&mut *tx)
                .await
        );
    }

    try_db!(tx.commit().await);
    Ok(())
}

pub struct LocateObjectResult {
    pub locator: PhysicalObjectLocator,
    pub logical: LogicalObject,
    pub ttl_for_dst: Option<i64>,
}

/// §4.1 "Locate object (read path)".
#[allow(clippy::too_many_arguments)]
pub async fn locate_object(
    pool: &PgPool,
    bucket: &str,
    key: &str,
    client_from_region: &str,
    version_id: Option<i64>,
    put_policy: &mut PlacementPolicyKind,
    get_policy: TransferPolicyKind,
    manual_tag: Option<&str>,
    graph: &CostGraph,
    now: DateTime<Utc>,
) -> ApiResult<LocateObjectResult> {
    let (has_versioning, _) = crate::db::buckets::version_state(pool, bucket).await?;
    if !has_versioning && version_id.is_some() {
        return Err(ApiError::BadRequest("versioning is not enabled".into()));
    }

    let logical = latest_logical_object(pool, bucket, key, version_id).await?;
    let Some(logical) = logical else {
        return Err(ApiError::NotFound("object not found".into()));
    };
    if logical.status != Status::Ready {
        return Err(ApiError::NotFound("object not found".into()));
    }

    if logical.delete_marker && version_id.is_none() {
        return Err(ApiError::NotFound("object not found".into()));
    }
    if logical.delete_marker && version_id.is_some() {
        return Err(ApiError::MethodNotAllowed("not allowed to get a delete marker".into()));
    }

    let all_locators = fetch_physical_locators_for_logical(pool, logical.id).await?;
    let ready_locators: Vec<PhysicalObjectLocator> =
        all_locators.into_iter().filter(|l| l.status == Status::Ready && l.is_live(now)).collect();
    if ready_locators.is_empty() {
        return Err(ApiError::NotFound("object locator not ready".into()));
    }

    let chosen = get_policy
        .get(&ready_locators, Some(client_from_region), manual_tag, graph)
        .ok_or_else(|| ApiError::NotFound("object locator not ready".into()))?
        .clone();

    let base_region = logical.base_region.clone();
    let mut ttl_for_dst: Option<i64> = None;

    if let PlacementPolicyKind::Skystore(_) = put_policy {
        if Some(client_from_region.to_string()) == base_region {
            ttl_for_dst = Some(-1);
        } else {
            let mut best: Option<(String, i64)> = None;
            for loc in &ready_locators {
                if loc.location_tag == client_from_region {
                    continue;
                }
                let ttl = put_policy.get_ttl(now, &loc.location_tag, client_from_region, client_from_region == loc.location_tag, graph);
                let within_window = loc.ttl == -1
                    || loc.storage_start_time.map(|s| now + chrono::Duration::seconds(ttl) <= s + chrono::Duration::seconds(loc.ttl)).unwrap_or(false);
                if within_window && (best.is_none() || ttl < best.as_ref().unwrap().1) {
                    best = Some((loc.location_tag.clone(), ttl));
                }
            }
            ttl_for_dst = best.map(|(_, ttl)| ttl);
        }
    }

    if ttl_for_dst.is_none() {
        ttl_for_dst = match put_policy {
            PlacementPolicyKind::AlwaysStore | PlacementPolicyKind::Skystore(_) => Some(-1),
            PlacementPolicyKind::AlwaysEvict => Some(0),
            _ => None,
        };
    }

    if let PlacementPolicyKind::Skystore(state) = put_policy {
        state.update_past_requests(now, client_from_region, key, logical.size.unwrap_or(0));
    }

    if chosen.location_tag == client_from_region {
        if Some(client_from_region.to_string()) != base_region {
            if let PlacementPolicyKind::Skystore(state) = put_policy {
                if let (Some(start), Some(dst_ttl)) = (chosen.storage_start_time, ttl_for_dst) {
                    let refreshed_ttl = (now - start).num_seconds() + dst_ttl;
                    sqlx::query("UPDATE physical_object_locators SET ttl = $1 WHERE id = $2")
                        .bind(refreshed_ttl)
                        .bind(chosen.id)
                        .execute(pool)
                        .await
                        .ok();
                }
            }
        }
        if let PlacementPolicyKind::Skystore(state) = put_policy {
            state.record_hit();
        }
    } else if let PlacementPolicyKind::Skystore(state) = put_policy {
        state.record_miss();
    }

    Ok(LocateObjectResult { locator: chosen, logical, ttl_for_dst })
}

pub async fn locate_object_status(pool: &PgPool, bucket: &str, key: &str, client_from_region: &str) -> ApiResult<Status> {
    let logical = latest_logical_object(pool, bucket, key, None).await?;
    let Some(logical) = logical else {
        return Err(ApiError::NotFound("object not found".into()));
    };
    let locators = fetch_physical_locators_for_logical(pool, logical.id).await?;
    let chosen = locators
        .iter()
        .find(|l| l.location_tag == client_from_region)
        .or_else(|| locators.iter().find(|l| l.is_primary))
        .ok_or_else(|| ApiError::NotFound("locator not found".into()))?;
    Ok(chosen.status)
}

/// §4.4 `clean_object`: TTL-expired highest-id physical locators per
/// `(bucket, key, location_tag)`, deleted through the `ObjectStore`
/// adapter then removed from metadata.
pub async fn clean_object(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    store: &dyn ObjectStore,
    put_policy: &mut PlacementPolicyKind,
    graph: &CostGraph,
) -> ApiResult<Vec<PhysicalObjectLocator>> {
    let rows = try_db!(
        sqlx::query(
            "SELECT pol.* FROM physical_object_locators pol \
             JOIN (SELECT bucket, key, location_tag, MAX(id) AS max_id FROM physical_object_locators \
                   GROUP BY bucket, key, location_tag) latest \
             ON pol.id = latest.max_id"
        )
        .fetch_all(pool)
        .await
    );

    let mut candidates = Vec::new();
    for row in &rows {
        let locator = row_to_physical_object_locator(row)?;
        if locator.status == Status::Ready && locator.ttl != -1 {
            if let Some(start) = locator.storage_start_time {
                if start + chrono::Duration::seconds(locator.ttl) < cutoff {
                    candidates.push(locator);
                }
            }
        }
    }

    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    if let PlacementPolicyKind::Skystore(state) = put_policy {
        for obj in &candidates {
            let size = logical_object_size(pool, obj.logical_object_id).await?.unwrap_or(0);
            state.add_to_cost(obj.ttl, &obj.location_tag, size, graph);
        }
    }

    let mut tx = try_db!(pool.begin().await);
    for obj in &candidates {
        try_db!(
            sqlx::query("UPDATE physical_object_locators SET status = $1 WHERE id = $2")
                .bind(Status::Pending)
                .bind(obj.id)
                .execute(&mut *tx)
                .await
        );
    }
    try_db!(tx.commit().await);

    let mut by_tag: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
    for obj in &candidates {
        by_tag.entry(obj.location_tag.clone()).or_default().push(obj.key.clone());
    }
    for (tag, keys) in &by_tag {
        if let Err(e) = store.delete_objects(tag, keys).await {
            tracing::warn!(tag, error = %e, "clean_object: remote delete failed for location tag, rolling back");
            let mut tx = try_db!(pool.begin().await);
            for obj in &candidates {
                if &obj.location_tag == tag {
                    try_db!(
                        sqlx::query("UPDATE physical_object_locators SET status = $1 WHERE id = $2")
                            .bind(Status::Ready)
                            .bind(obj.id)
                            .execute(&mut *tx)
                            .await
                    );
                }
            }
            try_db!(tx.commit().await);
            return Ok(Vec::new());
        }
    }

    let mut tx = try_db!(pool.begin().await);
    for obj in &candidates {
        try_db!(sqlx::query("DELETE FROM physical_object_locators WHERE id = $1").bind(obj.id).execute(&mut *tx).await);
    }
    try_db!(tx.commit().await);

    Ok(candidates)
}

async fn logical_object_size(pool: &PgPool, logical_object_id: i64) -> ApiResult<Option<i64>> {
    let row: Option<(Option<i64>,)> =
        try_db!(sqlx::query_as("SELECT size FROM logical_objects WHERE id = $1").bind(logical_object_id).fetch_optional(pool).await);
    Ok(row.and_then(|(s,)| s))
}

/// `/clean_out_remaining`: an unconditional drain used at simulation/trace
/// teardown — deletes every physical locator regardless of ttl, still
/// billing cost-graph-aware storage cost for policies that track it.
pub async fn clean_out_remaining(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    store: &dyn ObjectStore,
    graph: &CostGraph,
) -> ApiResult<(Vec<PhysicalObjectLocator>, f64)> {
    let rows = try_db!(sqlx::query("SELECT * FROM physical_object_locators").fetch_all(pool).await);
    let mut all = Vec::with_capacity(rows.len());
    for row in &rows {
        all.push(row_to_physical_object_locator(row)?);
    }

    let mut storage_cost = 0.0;
    for obj in &all {
        let base_region = {
            let row: Option<(Option<String>,)> =
                try_db!(sqlx::query_as("SELECT base_region FROM logical_objects WHERE id = $1").bind(obj.logical_object_id).fetch_optional(pool).await);
            row.and_then(|(b,)| b)
        };
        if Some(obj.location_tag.clone()) == base_region {
            continue;
        }
        let size = logical_object_size(pool, obj.logical_object_id).await?.unwrap_or(0) as f64;
        let gb = size / (1024.0 * 1024.0 * 1024.0);
        let seconds = if obj.ttl != -1 {
            obj.ttl as f64
        } else if let Some(start) = obj.storage_start_time {
            (cutoff - start).num_seconds() as f64
        } else {
            0.0
        };
        storage_cost += seconds / 3600.0 / 24.0 * graph.storage_price(&obj.location_tag) * 3.0 * gb;
    }

    if !all.is_empty() {
        let mut by_tag: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
        for obj in &all {
            by_tag.entry(obj.location_tag.clone()).or_default().push(obj.key.clone());
        }
        for (tag, keys) in &by_tag {
            let _ = store.delete_objects(tag, keys).await;
        }
        let mut tx = try_db!(pool.begin().await);
        for obj in &all {
            try_db!(sqlx::query("DELETE FROM physical_object_locators WHERE id = $1").bind(obj.id).execute(&mut *tx).await);
        }
        try_db!(tx.commit().await);
    }

    Ok((all, storage_cost))
}

/// §4.1 "Warmup": replicate the current primary into additional regions.
pub async fn start_warmup(
    pool: &PgPool,
    bucket: &str,
    key: &str,
    version_id: Option<i64>,
    warmup_regions: &[String],
) -> ApiResult<(PhysicalObjectLocator, Vec<PhysicalObjectLocator>)> {
    let mut tx = try_db!(pool.begin().await);

    let logical = latest_logical_object(&mut *tx, bucket, key, version_id).await?;
    let Some(logical) = logical else {
        return Err(ApiError::NotFound("object not found".into()));
    };
    let locators = fetch_physical_locators_for_logical(&mut *tx, logical.id).await?;
    let primary = locators.iter().find(|l| l.is_primary).cloned().ok_or_else(|| ApiError::Internal("no primary locator found".into()))?;

    let physical_bucket_rows = try_db!(sqlx::query("SELECT * FROM physical_bucket_locators WHERE bucket_name = $1").bind(bucket).fetch_all(&mut *tx).await);

    let mut secondary = Vec::new();
    for region_tag in warmup_regions.iter().filter(|r| r.as_str() != primary.region) {
        let pbl = physical_bucket_rows.iter().find(|r| r.try_get::<String, _>("location_tag").ok().as_deref() == Some(region_tag.as_str()));
        let Some(pbl) = pbl else {
            return Err(ApiError::Internal(format!("no physical bucket locator found for warmup {region_tag}")));
        };
        let cloud: String = pbl.try_get("cloud")?;
        let region: String = pbl.try_get("region")?;
        let bucket_name: String = pbl.try_get("bucket")?;
        let prefix: String = pbl.try_get("prefix")?;

        let row = try_db!(
            sqlx::query(
                "INSERT INTO physical_object_locators \
                 (logical_object_id, location_tag, cloud, region, bucket, key, status, is_primary, version_id) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, $8) RETURNING *"
            )
            .bind(logical.id)
            .bind(region_tag)
            .bind(cloud)
            .bind(region)
            .bind(bucket_name)
            .bind(format!("{prefix}{key}"))
            .bind(Status::Pending)
            .bind(&primary.version_id)
            .fetch_one(&mut *tx)
            .await
        );
        secondary.push(row_to_physical_object_locator(&row)?);
    }

    try_db!(tx.commit().await);
    Ok((primary, secondary))
}

pub async fn head_object(pool: &PgPool, bucket: &str, key: &str) -> ApiResult<LogicalObject> {
    let logical = latest_logical_object(pool, bucket, key, None).await?;
    let Some(logical) = logical else {
        return Err(ApiError::NotFound("object not found".into()));
    };
    if logical.status != Status::Ready || logical.delete_marker {
        return Err(ApiError::NotFound("object not found".into()));
    }
    Ok(logical)
}

/// `ListObjectsV2`-style listing: one row per key (its latest non-delete-marker
/// version), alphabetically ordered, optionally prefix- and start-after-filtered.
pub async fn list_objects(
    pool: &PgPool,
    bucket: &str,
    prefix: Option<&str>,
    start_after: Option<&str>,
    max_keys: i64,
) -> ApiResult<Vec<LogicalObject>> {
    let rows = try_db!(
        sqlx::query(
            "SELECT DISTINCT ON (key) * FROM logical_objects \
             WHERE bucket = $1 AND status = $2 \
             AND ($3::text IS NULL OR key LIKE $3 || '%') \
             AND ($4::text IS NULL OR key > $4) \
             ORDER BY key, id DESC \
             LIMIT $5"
        )
        .bind(bucket)
        .bind(Status::Ready)
        .bind(prefix)
        .bind(start_after)
        .bind(max_keys)
        .fetch_all(pool)
        .await
    );
    let mut out = Vec::new();
    for row in &rows {
        let obj = row_to_logical_object(row)?;
        if !obj.delete_marker {
            out.push(obj);
        }
    }
    Ok(out)
}

/// `ListObjectVersions`: every logical row (including delete markers),
/// newest version first within each key.
pub async fn list_objects_versioning(
    pool: &PgPool,
    bucket: &str,
    prefix: Option<&str>,
    key_marker: Option<&str>,
    max_keys: i64,
) -> ApiResult<Vec<LogicalObject>> {
    let rows = try_db!(
        sqlx::query(
            "SELECT * FROM logical_objects \
             WHERE bucket = $1 AND status = $2 \
             AND ($3::text IS NULL OR key LIKE $3 || '%') \
             AND ($4::text IS NULL OR key > $4) \
             ORDER BY key, id DESC \
             LIMIT $5"
        )
        .bind(bucket)
        .bind(Status::Ready)
        .bind(prefix)
        .bind(key_marker)
        .bind(max_keys)
        .fetch_all(pool)
        .await
    );
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(row_to_logical_object(row)?);
    }
    Ok(out)
}

/// The three ways a delete can manifest, mirroring S3's versioned-delete
/// state machine: an unversioned/suspended bucket physically removes the
/// current object; a versioned bucket without an explicit version id adds
/// a new delete-marker version; an explicit version id always physically
/// removes that exact version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOpType {
    /// inserted a new delete-marker logical row.
    Add,
    /// flipped the existing "null" version into a delete marker in place.
    Replace,
    /// physically removed a logical row and its physical locators.
    Delete,
}

pub struct DeleteObjectRequest<'a> {
    pub key: &'a str,
    pub version_id: Option<i64>,
}

pub struct DeleteObjectPlan {
    pub key: String,
    pub op_type: DeleteOpType,
    pub logical_object_id: i64,
    pub delete_marker: bool,
    /// `Delete`/`Replace`: the previous version's locators, transitioned to
    /// `pending_deletion`. `Add`: the previous version's locators copied as
    /// new `pending` rows owned by the marker, for the proxy to populate
    /// before `complete_delete_objects` flips them to `ready`.
    pub locators: Vec<PhysicalObjectLocator>,
}

/// §4.1 "Start delete objects": one transaction, one plan per requested key.
pub async fn start_delete_objects(pool: &PgPool, bucket: &str, requests: &[DeleteObjectRequest<'_>]) -> ApiResult<Vec<DeleteObjectPlan>> {
    let mut tx = try_db!(pool.begin().await);

    let (has_versioning, version_state) = {
        let row: Option<(Option<String>,)> =
            try_db!(sqlx::query_as("SELECT version_enabled FROM logical_buckets WHERE bucket = $1").bind(bucket).fetch_optional(&mut *tx).await);
        let Some((raw,)) = row else {
            return Err(ApiError::NotFound("bucket not found".into()));
        };
        match raw {
            None => (false, None),
            Some(s) => (true, crate::model::VersioningState::from_str(&s)),
        }
    };

    try_db!(sqlx::query("LOCK TABLE logical_objects IN EXCLUSIVE MODE").execute(&mut *tx).await);

    let mut plans = Vec::with_capacity(requests.len());

    for req in requests {
        if req.version_id.is_some() && !has_versioning {
            return Err(ApiError::BadRequest("versioning is not enabled".into()));
        }

        let logical = latest_logical_object(&mut *tx, bucket, req.key, req.version_id).await?;
        let Some(logical) = logical else {
            return Err(ApiError::NotFound(format!("object {} not found", req.key)));
        };

        let physically_delete = req.version_id.is_some() || !has_versioning || version_state == Some(crate::model::VersioningState::Suspended);

        if physically_delete {
            let locators = fetch_physical_locators_for_logical(&mut *tx, logical.id).await?;
            for loc in &locators {
                try_db!(
                    sqlx::query("UPDATE physical_object_locators SET status = $1, lock_acquired_ts = $2 WHERE id = $3")
                        .bind(Status::PendingDeletion)
                        .bind(Utc::now())
                        .bind(loc.id)
                        .execute(&mut *tx)
                        .await
                );
            }
            try_db!(
                sqlx::query("UPDATE logical_objects SET status = $1 WHERE id = $2")
                    .bind(Status::PendingDeletion)
                    .bind(logical.id)
                    .execute(&mut *tx)
                    .await
            );

            let op_type = if req.version_id.is_some() { DeleteOpType::Delete } else { DeleteOpType::Replace };
            plans.push(DeleteObjectPlan {
                key: req.key.to_string(),
                op_type,
                logical_object_id: logical.id,
                delete_marker: logical.delete_marker,
                locators,
            });
        } else {
            let row = try_db!(
                sqlx::query(
                    "INSERT INTO logical_objects (bucket, key, status, version_suspended, delete_marker, base_region) \
                     VALUES ($1, $2, $3, FALSE, TRUE, $4) RETURNING *"
                )
                .bind(bucket)
                .bind(req.key)
                .bind(Status::Pending)
                .bind(&logical.base_region)
                .fetch_one(&mut *tx)
                .await
            );
            let marker = row_to_logical_object(&row)?;

            let prev_locators = fetch_physical_locators_for_logical(&mut *tx, logical.id).await?;
            let mut new_locators = Vec::with_capacity(prev_locators.len());
            for prev in &prev_locators {
                let new_row = try_db!(
                    sqlx::query(
                        "INSERT INTO physical_object_locators \
                         (logical_object_id, location_tag, cloud, region, bucket, key, lock_acquired_ts, status, is_primary, ttl) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING *"
                    )
                    .bind(marker.id)
                    .bind(&prev.location_tag)
                    .bind(&prev.cloud)
                    .bind(&prev.region)
                    .bind(&prev.bucket)
                    .bind(&prev.key)
                    .bind(Utc::now())
                    .bind(Status::Pending)
                    .bind(prev.is_primary)
                    .bind(prev.ttl)
                    .fetch_one(&mut *tx)
                    .await
                );
                new_locators.push(row_to_physical_object_locator(&new_row)?);
            }

            plans.push(DeleteObjectPlan {
                key: req.key.to_string(),
                op_type: DeleteOpType::Add,
                logical_object_id: marker.id,
                delete_marker: true,
                locators: new_locators,
            });
        }
    }

    try_db!(tx.commit().await);
    Ok(plans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::buckets::{register_buckets, PhysicalLocation};
    use crate::db::test_support::{pool, unique_suffix};
    use crate::policy::TransferPolicyKind;
    use crate::store::LocalObjectStore;

    async fn setup_bucket(pool: &PgPool, bucket: &str, regions: &[&str]) {
        let locations: Vec<PhysicalLocation> = regions
            .iter()
            .enumerate()
            .map(|(i, r)| PhysicalLocation {
                name: r.to_string(),
                cloud: r.split(':').next().unwrap().to_string(),
                region: r.split(':').nth(1).unwrap().to_string(),
                bucket: bucket.to_string(),
                is_primary: i == 0,
                need_warmup: false,
            })
            .collect();
        register_buckets(pool, bucket, None, &locations, &[], "skystore").await.expect("register_buckets");
    }

    /// S1: write-then-read-local under `always_store` — the locator the
    /// writer created is the one any reader, local or remote, gets back.
    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
    async fn write_then_read_local_under_always_store() {
        let pool = pool().await;
        let bucket = format!("bucket-{}", unique_suffix());
        setup_bucket(&pool, &bucket, &["aws:us-east-1", "aws:us-west-1"]).await;

        let graph = CostGraph::empty(&["aws:us-east-1".to_string(), "aws:us-west-1".to_string()]);
        let mut put_policy = PlacementPolicyKind::AlwaysStore;
        let now = Utc::now();

        let req = StartUploadRequest {
            bucket: &bucket,
            key: "k",
            client_from_region: "aws:us-east-1",
            version_id: None,
            ttl: None,
            copy_src_bucket: None,
            copy_src_key: None,
        };
        let started = start_upload(&pool, &req, &mut put_policy, &graph, now).await.expect("start_upload");
        assert_eq!(started.locators.len(), 1);
        assert!(started.locators[0].is_primary);
        assert_eq!(started.locators[0].ttl, -1);

        complete_upload(
            &pool,
            &CompleteUploadRequest {
                id: started.locators[0].id,
                size: 1_048_576,
                etag: "e1".to_string(),
                last_modified: now,
                version_id: None,
                ttl: None,
            },
            "always_store",
        )
        .await
        .expect("complete_upload");

        let local = locate_object(
            &pool,
            &bucket,
            "k",
            "aws:us-east-1",
            None,
            &mut put_policy,
            TransferPolicyKind::Direct,
            None,
            &graph,
            now,
        )
        .await
        .expect("locate_object from writer region");
        assert_eq!(local.locator.location_tag, "aws:us-east-1");

        let remote = locate_object(
            &pool,
            &bucket,
            "k",
            "aws:us-west-1",
            None,
            &mut put_policy,
            TransferPolicyKind::Direct,
            None,
            &graph,
            now,
        )
        .await
        .expect("locate_object from a region with nothing to pull");
        assert_eq!(remote.locator.location_tag, "aws:us-east-1", "always_store never places a second copy");
    }

    /// S3: a versioned delete inserts a delete-marker row rather than
    /// removing anything, and older versions stay reachable by id.
    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
    async fn versioned_delete_inserts_marker_and_preserves_history() {
        let pool = pool().await;
        let bucket = format!("bucket-{}", unique_suffix());
        setup_bucket(&pool, &bucket, &["aws:us-east-1"]).await;
        crate::db::buckets::put_bucket_versioning(&pool, &bucket, "Enabled").await.expect("enable versioning");

        let graph = CostGraph::empty(&["aws:us-east-1".to_string()]);
        let mut put_policy = PlacementPolicyKind::AlwaysStore;
        let now = Utc::now();

        let req_v1 = StartUploadRequest {
            bucket: &bucket,
            key: "k",
            client_from_region: "aws:us-east-1",
            version_id: None,
            ttl: None,
            copy_src_bucket: None,
            copy_src_key: None,
        };
        let v1 = start_upload(&pool, &req_v1, &mut put_policy, &graph, now).await.expect("start_upload v1");
        complete_upload(
            &pool,
            &CompleteUploadRequest { id: v1.locators[0].id, size: 1, etag: "e1".into(), last_modified: now, version_id: None, ttl: None },
            "always_store",
        )
        .await
        .expect("complete_upload v1");
        let v1_id = v1.locators[0].logical_object_id;

        let req_v2 = StartUploadRequest {
            bucket: &bucket,
            key: "k",
            client_from_region: "aws:us-east-1",
            version_id: None,
            ttl: None,
            copy_src_bucket: None,
            copy_src_key: None,
        };
        let v2 = start_upload(&pool, &req_v2, &mut put_policy, &graph, now).await.expect("start_upload v2");
        complete_upload(
            &pool,
            &CompleteUploadRequest { id: v2.locators[0].id, size: 1, etag: "e2".into(), last_modified: now, version_id: None, ttl: None },
            "always_store",
        )
        .await
        .expect("complete_upload v2");

        let plans = start_delete_objects(&pool, &bucket, &[DeleteObjectRequest { key: "k", version_id: None }])
            .await
            .expect("start_delete_objects");
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].op_type, DeleteOpType::Add);
        assert_eq!(plans[0].locators.len(), 1, "the marker should carry v2's locator copied forward as a pending row");
        assert_eq!(plans[0].locators[0].location_tag, "aws:us-east-1");
        assert_eq!(plans[0].locators[0].status, Status::Pending);
        complete_delete_objects(&pool, &plans, &LocalObjectStore).await.expect("complete_delete_objects");

        let versions = list_objects_versioning(&pool, &bucket, None, None, 100).await.expect("list_objects_versioning");
        assert_eq!(versions.len(), 3, "v1, v2 and the delete marker should all still exist");
        assert!(list_objects(&pool, &bucket, None, None, 100).await.expect("list_objects").is_empty());

        assert!(locate_object(
            &pool,
            &bucket,
            "k",
            "aws:us-east-1",
            None,
            &mut put_policy,
            TransferPolicyKind::Direct,
            None,
            &graph,
            now
        )
        .await
        .is_err());

        let old = locate_object(
            &pool,
            &bucket,
            "k",
            "aws:us-east-1",
            Some(v1_id),
            &mut put_policy,
            TransferPolicyKind::Direct,
            None,
            &graph,
            now,
        )
        .await
        .expect("locate_object by explicit old version_id should still work");
        assert_eq!(old.logical.id, v1_id);
    }

    /// P6: a locator with a finite ttl never comes back from `locate_object`
    /// once `clean_object` has crossed its storage_start_time + ttl cutoff.
    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
    async fn ttl_expired_locator_is_evicted_by_clean_object() {
        let pool = pool().await;
        let bucket = format!("bucket-{}", unique_suffix());
        setup_bucket(&pool, &bucket, &["aws:us-east-1"]).await;

        let graph = CostGraph::empty(&["aws:us-east-1".to_string()]);
        let mut put_policy = PlacementPolicyKind::FixedTtl { ttl_seconds: 60 };
        let start = Utc::now() - chrono::Duration::seconds(120);

        let req = StartUploadRequest {
            bucket: &bucket,
            key: "k",
            client_from_region: "aws:us-east-1",
            version_id: None,
            ttl: None,
            copy_src_bucket: None,
            copy_src_key: None,
        };
        let started = start_upload(&pool, &req, &mut put_policy, &graph, start).await.expect("start_upload");
        complete_upload(
            &pool,
            &CompleteUploadRequest {
                id: started.locators[0].id,
                size: 1,
                etag: "e1".into(),
                last_modified: start,
                version_id: None,
                ttl: None,
            },
            "fixed_ttl",
        )
        .await
        .expect("complete_upload");

        let cutoff = start + chrono::Duration::seconds(61);
        let evicted = clean_object(&pool, cutoff, &LocalObjectStore, &mut put_policy, &graph).await.expect("clean_object");
        assert_eq!(evicted.len(), 1);

        // idempotent: running it again at the same cutoff finds nothing left (P8).
        let evicted_again = clean_object(&pool, cutoff, &LocalObjectStore, &mut put_policy, &graph).await.expect("clean_object again");
        assert!(evicted_again.is_empty());
    }

    /// S4: two concurrent `start_upload`s for the same unversioned key never
    /// leave two distinct logical rows behind.
    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
    async fn concurrent_writers_without_versioning_converge_on_one_logical_row() {
        let pool = pool().await;
        let bucket = format!("bucket-{}", unique_suffix());
        setup_bucket(&pool, &bucket, &["aws:us-east-1"]).await;

        let graph = CostGraph::empty(&["aws:us-east-1".to_string()]);
        let mut put_policy = PlacementPolicyKind::AlwaysStore;
        let now = Utc::now();

        let req = StartUploadRequest {
            bucket: &bucket,
            key: "k",
            client_from_region: "aws:us-east-1",
            version_id: None,
            ttl: None,
            copy_src_bucket: None,
            copy_src_key: None,
        };
        let first = start_upload(&pool, &req, &mut put_policy, &graph, now).await.expect("first start_upload");
        complete_upload(
            &pool,
            &CompleteUploadRequest {
                id: first.locators[0].id,
                size: 1,
                etag: "e1".into(),
                last_modified: now,
                version_id: None,
                ttl: None,
            },
            "always_store",
        )
        .await
        .expect("complete_upload");

        // A second start_upload to the same (bucket, key) from the same
        // region, while the object is already live, is a conflict.
        let second = start_upload(&pool, &req, &mut put_policy, &graph, now).await;
        assert!(second.is_err(), "a live duplicate write should conflict on an unversioned bucket");

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM logical_objects WHERE bucket = $1 AND key = $2")
            .bind(&bucket)
            .bind("k")
            .fetch_one(&pool)
            .await
            .expect("count logical rows");
        assert_eq!(count, 1);
    }
}

/// §4.1 "Complete delete objects": `Add` plans populate the new marker's
/// `pending` physical locators (copied from the previous version) and flip
/// them to `ready`, promoting the logical row to `ready` on the first one
/// (mirroring the usual I1 last-pending-completes rule); `Delete`/`Replace`
/// plans remove bytes through the [`ObjectStore`] adapter, then drop the
/// `pending_deletion` rows.
pub async fn complete_delete_objects(pool: &PgPool, plans: &[DeleteObjectPlan], store: &dyn ObjectStore) -> ApiResult<()> {
    for plan in plans {
        if plan.op_type == DeleteOpType::Add {
            let mut tx = try_db!(pool.begin().await);
            for (idx, loc) in plan.locators.iter().enumerate() {
                try_db!(
                    sqlx::query("UPDATE physical_object_locators SET status = $1, lock_acquired_ts = NULL WHERE id = $2")
                        .bind(Status::Ready)
                        .bind(loc.id)
                        .execute(&mut *tx)
                        .await
                );
                if idx == 0 {
                    try_db!(
                        sqlx::query("UPDATE logical_objects SET status = $1 WHERE id = $2")
                            .bind(Status::Ready)
                            .bind(plan.logical_object_id)
                            .execute(&mut *tx)
                            .await
                    );
                }
            }
            if plan.locators.is_empty() {
                try_db!(
                    sqlx::query("UPDATE logical_objects SET status = $1 WHERE id = $2")
                        .bind(Status::Ready)
                        .bind(plan.logical_object_id)
                        .execute(&mut *tx)
                        .await
                );
            }
            try_db!(tx.commit().await);
            continue;
        }

        if plan.locators.is_empty() {
            continue;
        }
        let mut by_tag: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
        for loc in &plan.locators {
            by_tag.entry(loc.location_tag.clone()).or_default().push(loc.key.clone());
        }
        for (tag, keys) in &by_tag {
            if let Err(e) = store.delete_objects(tag, keys).await {
                tracing::warn!(tag, error = %e, "complete_delete_objects: remote delete failed, leaving pending_deletion rows for retry");
                continue;
            }
        }

        let mut tx = try_db!(pool.begin().await);
        for loc in &plan.locators {
            try_db!(sqlx::query("DELETE FROM physical_object_locators WHERE id = $1").bind(loc.id).execute(&mut *tx).await);
        }
        if plan.op_type == DeleteOpType::Delete {
            try_db!(sqlx::query("DELETE FROM logical_objects WHERE id = $1").bind(plan.logical_object_id).execute(&mut *tx).await);
        } else {
            try_db!(
                sqlx::query("UPDATE logical_objects SET status = $1, delete_marker = TRUE WHERE id = $2")
                    .bind(Status::Ready)
                    .bind(plan.logical_object_id)
                    .execute(&mut *tx)
                    .await
            );
        }
        try_db!(tx.commit().await);
    }
    Ok(())
}
