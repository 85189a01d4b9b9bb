//! Multipart-upload metadata (§4.1): tracking part uploads at both the
//! logical and physical layers, and the upload-part-copy region match used
//! by `continue_upload`.
//! Grounded in `original_source/.../operations/object_operations/multipart.py`.

use sqlx::{PgPool, Row};

use crate::error::{try_db, ApiError, ApiResult};
use crate::model::{LogicalMultipartPart, PhysicalMultipartPart, PhysicalObjectLocator, Status};

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

/// Stamps the logical object with the multipart upload id the store
/// assigned, so later `append_part`/`continue_upload` calls can find it.
pub async fn set_multipart_id(pool: &PgPool, logical_object_id: i64, multipart_upload_id: &str) -> ApiResult<()> {
    try_db!(
        sqlx::query("UPDATE logical_objects SET multipart_upload_id = $1 WHERE id = $2")
            .bind(multipart_upload_id)
            .bind(logical_object_id)
            .execute(pool)
            .await
    );
    Ok(())
}

/// §4.1 "Append part": upsert-by-part-number at the physical layer, and
/// mirror onto the logical row only for the primary locator (the part
/// listing an S3 client sees is the primary copy's).
pub async fn append_part(
    pool: &PgPool,
    physical_object_locator_id: i64,
    part_number: i32,
    etag: &str,
    size: i64,
) -> ApiResult<()> {
    let mut tx = try_db!(pool.begin().await);

    let row = try_db!(
        sqlx::query("SELECT * FROM physical_object_locators WHERE id = $1")
            .bind(physical_object_locator_id)
            .fetch_optional(&mut *tx)
            .await
    );
    let Some(row) = row else {
        return Err(ApiError::NotFound("physical object locator not found".into()));
    };
    let locator = row_to_physical_object_locator(&row)?;

    try_db!(
        sqlx::query(
            "INSERT INTO physical_multipart_parts (physical_object_locator_id, part_number, etag, size) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (physical_object_locator_id, part_number) DO UPDATE SET etag = EXCLUDED.etag, size = EXCLUDED.size"
        )
        .bind(physical_object_locator_id)
        .bind(part_number)
        .bind(etag)
        .bind(size)
        .execute(&mut *tx)
        .await
    );

    if locator.is_primary {
        try_db!(
            sqlx::query(
                "INSERT INTO logical_multipart_parts (logical_object_id, part_number, etag, size) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (logical_object_id, part_number) DO UPDATE SET etag = EXCLUDED.etag, size = EXCLUDED.size"
            )
            .bind(locator.logical_object_id)
            .bind(part_number)
            .bind(etag)
            .bind(size)
            .execute(&mut *tx)
            .await
        );
    }

    try_db!(tx.commit().await);
    Ok(())
}

pub async fn list_parts(pool: &PgPool, logical_object_id: i64) -> ApiResult<Vec<LogicalMultipartPart>> {
    let rows = try_db!(
        sqlx::query("SELECT * FROM logical_multipart_parts WHERE logical_object_id = $1 ORDER BY part_number")
            .bind(logical_object_id)
            .fetch_all(pool)
            .await
    );
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(LogicalMultipartPart {
            logical_object_id: row.try_get("logical_object_id")?,
            part_number: row.try_get("part_number")?,
            etag: row.try_get("etag")?,
            size: row.try_get("size")?,
        });
    }
    Ok(out)
}

pub async fn list_physical_parts(pool: &PgPool, physical_object_locator_id: i64) -> ApiResult<Vec<PhysicalMultipartPart>> {
    let rows = try_db!(
        sqlx::query("SELECT * FROM physical_multipart_parts WHERE physical_object_locator_id = $1 ORDER BY part_number")
            .bind(physical_object_locator_id)
            .fetch_all(pool)
            .await
    );
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(PhysicalMultipartPart {
            physical_object_locator_id: row.try_get("physical_object_locator_id")?,
            part_number: row.try_get("part_number")?,
            etag: row.try_get("etag")?,
            size: row.try_get("size")?,
        });
    }
    Ok(out)
}

/// One destination locator of a `continue_upload` call, carrying whatever
/// the caller asked for alongside it: the copy-source to stream from (for
/// upload-part-copy) and/or the parts uploaded so far.
pub struct ContinueUploadLocator {
    pub locator: PhysicalObjectLocator,
    pub parts: Option<Vec<PhysicalMultipartPart>>,
    pub copy_src_bucket: Option<String>,
    pub copy_src_key: Option<String>,
}

/// §4.1 "Continue upload": returns every destination locator still pending
/// for `(bucket, key, multipart_upload_id)`. When the caller is driving an
/// upload-part-copy, each destination is additionally paired with the
/// source locator living in the same region, since the data plane copies
/// bytes region-locally rather than proxying cross-region.
#[allow(clippy::too_many_arguments)]
pub async fn continue_upload(
    pool: &PgPool,
    bucket: &str,
    key: &str,
    multipart_upload_id: &str,
    version_id: Option<i64>,
    copy_src_bucket: Option<&str>,
    copy_src_key: Option<&str>,
    do_list_parts: bool,
) -> ApiResult<Vec<ContinueUploadLocator>> {
    let version_enabled: Option<Option<String>> =
        try_db!(sqlx::query_scalar("SELECT version_enabled FROM logical_buckets WHERE bucket = $1").bind(bucket).fetch_optional(pool).await);
    let Some(version_enabled) = version_enabled else {
        return Err(ApiError::NotFound("bucket not found".into()));
    };
    if version_enabled.is_none() && version_id.is_some() {
        return Err(ApiError::BadRequest("versioning is not enabled".into()));
    }

    let dst_logical_id: Option<i64> = try_db!(
        sqlx::query_scalar(
            "SELECT id FROM logical_objects WHERE bucket = $1 AND key = $2 AND status = $3 AND multipart_upload_id = $4 \
             ORDER BY id DESC LIMIT 1"
        )
        .bind(bucket)
        .bind(key)
        .bind(Status::Pending)
        .bind(multipart_upload_id)
        .fetch_optional(pool)
        .await
    );
    let Some(dst_logical_id) = dst_logical_id else {
        return Err(ApiError::NotFound("no pending multipart upload found".into()));
    };

    let dst_rows = try_db!(
        sqlx::query("SELECT * FROM physical_object_locators WHERE logical_object_id = $1").bind(dst_logical_id).fetch_all(pool).await
    );
    let mut dst_locators = Vec::with_capacity(dst_rows.len());
    for row in &dst_rows {
        dst_locators.push(row_to_physical_object_locator(row)?);
    }

    let mut src_map: std::collections::HashMap<String, (String, String)> = std::collections::HashMap::new();
    if let (Some(src_bucket), Some(src_key)) = (copy_src_bucket, copy_src_key) {
        let src_logical_id: Option<i64> = if let Some(vid) = version_id {
            try_db!(
                sqlx::query_scalar("SELECT id FROM logical_objects WHERE bucket = $1 AND key = $2 AND status = $3 AND id = $4")
                    .bind(src_bucket)
                    .bind(src_key)
                    .bind(Status::Ready)
                    .bind(vid)
                    .fetch_optional(pool)
                    .await
            )
        } else {
            try_db!(
                sqlx::query_scalar(
                    "SELECT id FROM logical_objects WHERE bucket = $1 AND key = $2 AND status = $3 ORDER BY id DESC LIMIT 1"
                )
                .bind(src_bucket)
                .bind(src_key)
                .bind(Status::Ready)
                .fetch_optional(pool)
                .await
            )
        };
        let Some(src_logical_id) = src_logical_id else {
            return Err(ApiError::NotFound("source object not found".into()));
        };

        let src_rows = try_db!(
            sqlx::query("SELECT * FROM physical_object_locators WHERE logical_object_id = $1 AND status = $2")
                .bind(src_logical_id)
                .bind(Status::Ready)
                .fetch_all(pool)
                .await
        );
        let mut src_locators = Vec::with_capacity(src_rows.len());
        for row in &src_rows {
            src_locators.push(row_to_physical_object_locator(row)?);
        }

        let src_tags: std::collections::HashSet<_> = src_locators.iter().map(|l| l.location_tag.clone()).collect();
        let dst_tags: std::collections::HashSet<_> = dst_locators.iter().map(|l| l.location_tag.clone()).collect();
        if src_tags != dst_tags {
            return Err(ApiError::NotFound(format!(
                "source object was not found in the same regions as the multipart upload: src={src_tags:?} dst={dst_tags:?}"
            )));
        }

        for locator in &src_locators {
            src_map.insert(locator.location_tag.clone(), (locator.bucket.clone(), locator.key.clone()));
        }
    }

    let mut out = Vec::with_capacity(dst_locators.len());
    for locator in dst_locators {
        let parts = if do_list_parts { Some(list_physical_parts(pool, locator.id).await?) } else { None };
        let (copy_src_bucket, copy_src_key) = match src_map.get(&locator.location_tag) {
            Some((b, k)) => (Some(b.clone()), Some(k.clone())),
            None => (None, None),
        };
        out.push(ContinueUploadLocator { locator, parts, copy_src_bucket, copy_src_key });
    }

    Ok(out)
}

/// Pending multipart uploads for `list_multipart_uploads`: logical objects
/// still `pending` with a non-null `multipart_upload_id`.
pub struct PendingMultipartUpload {
    pub logical_object_id: i64,
    pub key: String,
    pub multipart_upload_id: String,
}

pub async fn list_multipart_uploads(pool: &PgPool, bucket: &str) -> ApiResult<Vec<PendingMultipartUpload>> {
    let rows = try_db!(
        sqlx::query(
            "SELECT id, key, multipart_upload_id FROM logical_objects \
             WHERE bucket = $1 AND status = $2 AND multipart_upload_id IS NOT NULL"
        )
        .bind(bucket)
        .bind(Status::Pending)
        .fetch_all(pool)
        .await
    );
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(PendingMultipartUpload {
            logical_object_id: row.try_get("id")?,
            key: row.try_get("key")?,
            multipart_upload_id: row.try_get("multipart_upload_id")?,
        });
    }
    Ok(out)
}
