//! Bucket-scoped metadata operations (§4.1: create/delete/register bucket,
//! plus the read-only bucket metadata endpoints of §6).

use chrono::Utc;
use sqlx::{PgPool, Row};

use crate::error::{try_db, ApiError, ApiResult};
use crate::model::{PhysicalBucketLocator, Status, VersioningState};

fn row_to_physical_bucket_locator(row: &sqlx::postgres::PgRow) -> ApiResult<PhysicalBucketLocator> {
    Ok(PhysicalBucketLocator {
        id: row.try_get("id")?,
        bucket_name: row.try_get("bucket_name")?,
        location_tag: row.try_get("location_tag")?,
        cloud: row.try_get("cloud")?,
        region: row.try_get("region")?,
        bucket: row.try_get("bucket")?,
        prefix: row.try_get("prefix")?,
        status: row.try_get("status")?,
        lock_acquired_ts: row.try_get("lock_acquired_ts")?,
        is_primary: row.try_get("is_primary")?,
        need_warmup: row.try_get("need_warmup")?,
    })
}

pub struct PhysicalLocation {
    pub name: String,
    pub cloud: String,
    pub region: String,
    pub bucket: String,
    pub is_primary: bool,
    pub need_warmup: bool,
}

/// `POST /register_buckets`: synchronous registration of a pre-existing
/// multi-region bucket — everything lands in `ready` directly.
pub async fn register_buckets(
    pool: &PgPool,
    bucket: &str,
    versioning: Option<&str>,
    physical_locations: &[PhysicalLocation],
    init_regions: &[String],
    skystore_bucket_prefix: &str,
) -> ApiResult<()> {
    let mut tx = try_db!(pool.begin().await);

    let existing: Option<i64> = try_db!(
        sqlx::query_scalar("SELECT 1::bigint FROM logical_buckets WHERE bucket = $1")
            .bind(bucket)
            .fetch_optional(&mut *tx)
            .await
    );
    if existing.is_some() {
        return Err(ApiError::Conflict("bucket already exists".into()));
    }

    try_db!(
        sqlx::query(
            "INSERT INTO logical_buckets (bucket, prefix, status, creation_date, version_enabled) \
             VALUES ($1, '', $2, $3, $4)"
        )
        .bind(bucket)
        .bind(Status::Ready)
        .bind(Utc::now())
        .bind(versioning)
        .execute(&mut *tx)
        .await
    );

    let mut added_tags: Vec<String> = Vec::new();
    for loc in physical_locations {
        try_db!(
            sqlx::query(
                "INSERT INTO physical_bucket_locators \
                 (bucket_name, location_tag, cloud, region, bucket, prefix, status, is_primary, need_warmup) \
                 VALUES ($1, $2, $3, $4, $5, '', $6, $7, $8)"
            )
            .bind(bucket)
            .bind(&loc.name)
            .bind(&loc.cloud)
            .bind(&loc.region)
            .bind(&loc.bucket)
            .bind(Status::Ready)
            .bind(loc.is_primary)
            .bind(loc.need_warmup)
            .execute(&mut *tx)
            .await
        );
        added_tags.push(loc.name.clone());
    }

    for tag in init_regions {
        if added_tags.contains(tag) {
            continue;
        }
        let Some((cloud, region)) = tag.split_once(':') else { continue };
        try_db!(
            sqlx::query(
                "INSERT INTO physical_bucket_locators \
                 (bucket_name, location_tag, cloud, region, bucket, prefix, status, is_primary, need_warmup) \
                 VALUES ($1, $2, $3, $4, $5, '', $6, FALSE, FALSE)"
            )
            .bind(bucket)
            .bind(tag)
            .bind(cloud)
            .bind(region)
            .bind(format!("{skystore_bucket_prefix}-{region}"))
            .bind(Status::Ready)
            .execute(&mut *tx)
            .await
        );
    }

    try_db!(tx.commit().await);
    Ok(())
}

/// `POST /start_create_bucket`: phase 1. init regions ∪ client region ∪
/// warmup regions each get a `pending` physical locator.
pub async fn start_create_bucket(
    pool: &PgPool,
    bucket: &str,
    client_from_region: &str,
    warmup_regions: &[String],
    init_regions: &[String],
    skystore_bucket_prefix: &str,
) -> ApiResult<Vec<PhysicalBucketLocator>> {
    let mut tx = try_db!(pool.begin().await);

    let existing: Option<i64> = try_db!(
        sqlx::query_scalar("SELECT 1::bigint FROM logical_buckets WHERE bucket = $1")
            .bind(bucket)
            .fetch_optional(&mut *tx)
            .await
    );
    if existing.is_some() {
        return Err(ApiError::Conflict("bucket already exists".into()));
    }

    try_db!(
        sqlx::query(
            "INSERT INTO logical_buckets (bucket, prefix, status, creation_date) VALUES ($1, '', $2, $3)"
        )
        .bind(bucket)
        .bind(Status::Pending)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
    );

    let mut region_tags: Vec<String> = init_regions.to_vec();
    if !region_tags.contains(&client_from_region.to_string()) {
        region_tags.push(client_from_region.to_string());
    }
    for r in warmup_regions {
        if !region_tags.contains(r) {
            region_tags.push(r.clone());
        }
    }

    let mut locators = Vec::with_capacity(region_tags.len());
    for tag in &region_tags {
        let Some((cloud, region)) = tag.split_once(':') else {
            return Err(ApiError::BadRequest(format!("malformed region tag: {tag}")));
        };
        let physical_bucket_name = format!("{skystore_bucket_prefix}-{region}");
        let is_primary = tag == client_from_region;
        let row = try_db!(
            sqlx::query(
                "INSERT INTO physical_bucket_locators \
                 (bucket_name, location_tag, cloud, region, bucket, prefix, status, lock_acquired_ts, is_primary) \
                 VALUES ($1, $2, $3, $4, $5, '', $6, $7, $8) RETURNING *"
            )
            .bind(bucket)
            .bind(tag)
            .bind(cloud)
            .bind(region)
            .bind(&physical_bucket_name)
            .bind(Status::Pending)
            .bind(Utc::now())
            .bind(is_primary)
            .fetch_one(&mut *tx)
            .await
        );
        locators.push(row_to_physical_bucket_locator(&row)?);
    }

    try_db!(tx.commit().await);
    Ok(locators)
}

/// `PATCH /complete_create_bucket`: phase 2 per physical locator; the
/// logical bucket flips to `ready` exactly when its primary completes.
pub async fn complete_create_bucket(pool: &PgPool, id: i64, creation_date: chrono::DateTime<Utc>) -> ApiResult<()> {
    let mut tx = try_db!(pool.begin().await);

    let row = try_db!(sqlx::query("SELECT * FROM physical_bucket_locators WHERE id = $1").bind(id).fetch_optional(&mut *tx).await);
    let Some(row) = row else {
        return Err(ApiError::NotFound("physical bucket locator not found".into()));
    };
    let locator = row_to_physical_bucket_locator(&row)?;

    try_db!(
        sqlx::query("UPDATE physical_bucket_locators SET status = $1, lock_acquired_ts = NULL WHERE id = $2")
            .bind(Status::Ready)
            .bind(id)
            .execute(&mut *tx)
            .await
    );

    if locator.is_primary {
        try_db!(
            sqlx::query("UPDATE logical_buckets SET status = $1, creation_date = $2 WHERE bucket = $3")
                .bind(Status::Ready)
                .bind(creation_date)
                .bind(&locator.bucket_name)
                .execute(&mut *tx)
                .await
        );
    }

    try_db!(tx.commit().await);
    Ok(())
}

/// `POST /start_delete_bucket`: requires `ready` and empty (I-lifecycle).
pub async fn start_delete_bucket(pool: &PgPool, bucket: &str) -> ApiResult<Vec<PhysicalBucketLocator>> {
    let mut tx = try_db!(pool.begin().await);

    let status_row: Option<Status> = try_db!(
        sqlx::query_scalar("SELECT status FROM logical_buckets WHERE bucket = $1").bind(bucket).fetch_optional(&mut *tx).await
    );
    let Some(status) = status_row else {
        return Err(ApiError::NotFound("bucket not found".into()));
    };
    if status != Status::Ready {
        return Err(ApiError::Conflict("bucket is not ready for deletion".into()));
    }

    let object_count: i64 = try_db!(
        sqlx::query_scalar("SELECT COUNT(*) FROM logical_objects WHERE bucket = $1").bind(bucket).fetch_one(&mut *tx).await
    );
    if object_count > 0 {
        return Err(ApiError::Conflict("bucket has objects in it".into()));
    }

    let rows = try_db!(
        sqlx::query("SELECT * FROM physical_bucket_locators WHERE bucket_name = $1").bind(bucket).fetch_all(&mut *tx).await
    );
    let mut locators = Vec::with_capacity(rows.len());
    for row in &rows {
        let locator = row_to_physical_bucket_locator(row)?;
        if locator.status != Status::Ready {
            return Err(ApiError::Conflict("cannot delete physical bucket in current state".into()));
        }
        locators.push(locator);
    }

    try_db!(
        sqlx::query("UPDATE physical_bucket_locators SET status = $1, lock_acquired_ts = $2 WHERE bucket_name = $3")
            .bind(Status::PendingDeletion)
            .bind(Utc::now())
            .bind(bucket)
            .execute(&mut *tx)
            .await
    );
    try_db!(
        sqlx::query("UPDATE logical_buckets SET status = $1 WHERE bucket = $2")
            .bind(Status::PendingDeletion)
            .bind(bucket)
            .execute(&mut *tx)
            .await
    );

    try_db!(tx.commit().await);
    Ok(locators)
}

/// `PATCH /complete_delete_bucket`: removes one physical row at a time;
/// the logical row disappears with the last physical row (I1).
pub async fn complete_delete_bucket(pool: &PgPool, id: i64) -> ApiResult<()> {
    let mut tx = try_db!(pool.begin().await);

    let row = try_db!(sqlx::query("SELECT * FROM physical_bucket_locators WHERE id = $1").bind(id).fetch_optional(&mut *tx).await);
    let Some(row) = row else {
        return Err(ApiError::NotFound("physical bucket locator not found".into()));
    };
    let locator = row_to_physical_bucket_locator(&row)?;
    if locator.status != Status::PendingDeletion {
        return Err(ApiError::Conflict("physical bucket is not marked for deletion".into()));
    }

    try_db!(sqlx::query("DELETE FROM physical_bucket_locators WHERE id = $1").bind(id).execute(&mut *tx).await);

    let remaining: i64 = try_db!(
        sqlx::query_scalar("SELECT COUNT(*) FROM physical_bucket_locators WHERE bucket_name = $1")
            .bind(&locator.bucket_name)
            .fetch_one(&mut *tx)
            .await
    );
    if remaining == 0 {
        try_db!(sqlx::query("DELETE FROM logical_buckets WHERE bucket = $1").bind(&locator.bucket_name).execute(&mut *tx).await);
    }

    try_db!(tx.commit().await);
    Ok(())
}

/// `POST /locate_bucket`: exact-match-then-primary strategy.
pub async fn locate_bucket(pool: &PgPool, bucket: &str, client_from_region: &str) -> ApiResult<PhysicalBucketLocator> {
    let rows = try_db!(
        sqlx::query(
            "SELECT pbl.* FROM physical_bucket_locators pbl \
             JOIN logical_buckets lb ON lb.bucket = pbl.bucket_name \
             WHERE lb.bucket = $1 AND lb.status = $2"
        )
        .bind(bucket)
        .bind(Status::Ready)
        .fetch_all(pool)
        .await
    );
    if rows.is_empty() {
        return Err(ApiError::NotFound("bucket not found".into()));
    }
    let mut locators = Vec::with_capacity(rows.len());
    for row in &rows {
        locators.push(row_to_physical_bucket_locator(row)?);
    }
    let chosen = locators
        .iter()
        .find(|l| l.location_tag == client_from_region)
        .or_else(|| locators.iter().find(|l| l.is_primary))
        .cloned();
    chosen.ok_or_else(|| ApiError::Internal("no primary locator for bucket".into()))
}

/// `POST /locate_bucket_status`: same selection, raw status (no `ready` filter).
pub async fn locate_bucket_status(pool: &PgPool, bucket: &str, client_from_region: &str) -> ApiResult<Status> {
    let rows = try_db!(
        sqlx::query(
            "SELECT pbl.* FROM physical_bucket_locators pbl \
             JOIN logical_buckets lb ON lb.bucket = pbl.bucket_name \
             WHERE lb.bucket = $1"
        )
        .bind(bucket)
        .fetch_all(pool)
        .await
    );
    if rows.is_empty() {
        return Err(ApiError::NotFound("bucket not found".into()));
    }
    let mut locators = Vec::with_capacity(rows.len());
    for row in &rows {
        locators.push(row_to_physical_bucket_locator(row)?);
    }
    let chosen = locators
        .iter()
        .find(|l| l.location_tag == client_from_region)
        .or_else(|| locators.iter().find(|l| l.is_primary))
        .ok_or_else(|| ApiError::Internal("no primary locator for bucket".into()))?;
    Ok(chosen.status)
}

pub async fn head_bucket(pool: &PgPool, bucket: &str) -> ApiResult<()> {
    let exists: Option<i64> = try_db!(
        sqlx::query_scalar("SELECT 1::bigint FROM logical_buckets WHERE bucket = $1 AND status = $2")
            .bind(bucket)
            .bind(Status::Ready)
            .fetch_optional(pool)
            .await
    );
    if exists.is_none() {
        return Err(ApiError::NotFound("bucket not found".into()));
    }
    Ok(())
}

pub struct BucketSummary {
    pub bucket: String,
    pub creation_date: chrono::DateTime<Utc>,
}

pub async fn list_buckets(pool: &PgPool) -> ApiResult<Vec<BucketSummary>> {
    let rows = try_db!(
        sqlx::query("SELECT bucket, creation_date FROM logical_buckets WHERE status = $1")
            .bind(Status::Ready)
            .fetch_all(pool)
            .await
    );
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(BucketSummary { bucket: row.try_get("bucket")?, creation_date: row.try_get("creation_date")? });
    }
    Ok(out)
}

pub async fn put_bucket_versioning(pool: &PgPool, bucket: &str, versioning: &str) -> ApiResult<Vec<PhysicalBucketLocator>> {
    let mut tx = try_db!(pool.begin().await);

    let exists: Option<i64> = try_db!(
        sqlx::query_scalar("SELECT 1::bigint FROM logical_buckets WHERE bucket = $1 AND status = $2")
            .bind(bucket)
            .bind(Status::Ready)
            .fetch_optional(&mut *tx)
            .await
    );
    if exists.is_none() {
        return Err(ApiError::NotFound("bucket not found".into()));
    }

    try_db!(
        sqlx::query("UPDATE logical_buckets SET version_enabled = $1 WHERE bucket = $2")
            .bind(versioning)
            .bind(bucket)
            .execute(&mut *tx)
            .await
    );

    let rows = try_db!(sqlx::query("SELECT * FROM physical_bucket_locators WHERE bucket_name = $1").bind(bucket).fetch_all(&mut *tx).await);
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(row_to_physical_bucket_locator(row)?);
    }

    try_db!(tx.commit().await);
    Ok(out)
}

pub async fn check_version_setting(pool: &PgPool, bucket: &str) -> ApiResult<bool> {
    let row: Option<(Option<String>,)> = try_db!(
        sqlx::query_as("SELECT version_enabled FROM logical_buckets WHERE bucket = $1 AND status = $2")
            .bind(bucket)
            .bind(Status::Ready)
            .fetch_optional(pool)
            .await
    );
    let Some((version_enabled,)) = row else {
        return Err(ApiError::NotFound("bucket not found".into()));
    };
    Ok(version_enabled.is_some())
}

/// Reads a bucket's `version_enabled` tri-state, interpreted per I-lifecycle:
/// `None` == unset, otherwise `Enabled`/`Suspended`.
pub async fn version_state(pool: &PgPool, bucket: &str) -> ApiResult<(bool, Option<VersioningState>)> {
    let row: Option<(Option<String>,)> =
        try_db!(sqlx::query_as("SELECT version_enabled FROM logical_buckets WHERE bucket = $1").bind(bucket).fetch_optional(pool).await);
    let Some((raw,)) = row else {
        return Err(ApiError::NotFound("bucket not found".into()));
    };
    match raw {
        None => Ok((false, None)),
        Some(s) => Ok((true, VersioningState::from_str(&s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{pool, unique_suffix};

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
    async fn two_phase_create_then_delete_bucket_round_trips() {
        let pool = pool().await;
        let bucket = format!("bucket-{}", unique_suffix());
        let init_regions = vec!["aws:us-east-1".to_string()];

        let locators = start_create_bucket(&pool, &bucket, "aws:us-east-1", &[], &init_regions, "skystore")
            .await
            .expect("start_create_bucket");
        assert_eq!(locators.len(), 1);
        assert!(locators[0].is_primary);
        assert_eq!(locate_bucket_status(&pool, &bucket, "aws:us-east-1").await.expect("status"), Status::Pending);

        for locator in &locators {
            complete_create_bucket(&pool, locator.id, Utc::now()).await.expect("complete_create_bucket");
        }
        assert_eq!(locate_bucket_status(&pool, &bucket, "aws:us-east-1").await.expect("status"), Status::Ready);
        head_bucket(&pool, &bucket).await.expect("head_bucket should see a ready bucket");

        let to_delete = start_delete_bucket(&pool, &bucket).await.expect("start_delete_bucket");
        for locator in &to_delete {
            complete_delete_bucket(&pool, locator.id).await.expect("complete_delete_bucket");
        }
        assert!(head_bucket(&pool, &bucket).await.is_err(), "bucket should be gone after the last physical row is removed");
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
    async fn register_buckets_lands_directly_in_ready() {
        let pool = pool().await;
        let bucket = format!("bucket-{}", unique_suffix());
        let locations = vec![PhysicalLocation {
            name: "aws:us-east-1".to_string(),
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
            bucket: bucket.clone(),
            is_primary: true,
            need_warmup: false,
        }];

        register_buckets(&pool, &bucket, None, &locations, &["aws:us-east-1".to_string(), "aws:us-west-1".to_string()], "skystore")
            .await
            .expect("register_buckets");

        head_bucket(&pool, &bucket).await.expect("registered bucket should be ready immediately");
        let locator = locate_bucket(&pool, &bucket, "aws:us-west-1").await.expect("locate_bucket");
        assert_eq!(locator.bucket, "skystore-us-west-1", "uncovered init_regions synthesize a bucket name");

        assert!(register_buckets(&pool, &bucket, None, &locations, &[], "skystore").await.is_err(), "duplicate register should conflict");
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
    async fn put_bucket_versioning_round_trips() {
        let pool = pool().await;
        let bucket = format!("bucket-{}", unique_suffix());
        let locations = vec![PhysicalLocation {
            name: "aws:us-east-1".to_string(),
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
            bucket: bucket.clone(),
            is_primary: true,
            need_warmup: false,
        }];
        register_buckets(&pool, &bucket, None, &locations, &[], "skystore").await.expect("register_buckets");

        assert!(!check_version_setting(&pool, &bucket).await.expect("check_version_setting"));
        put_bucket_versioning(&pool, &bucket, "Enabled").await.expect("put_bucket_versioning");
        assert!(check_version_setting(&pool, &bucket).await.expect("check_version_setting"));

        let (has_versioning, state) = version_state(&pool, &bucket).await.expect("version_state");
        assert!(has_versioning);
        assert_eq!(state, Some(VersioningState::Enabled));
    }
}
