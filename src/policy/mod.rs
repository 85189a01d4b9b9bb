//! Placement and transfer policies (§4.2, §4.3).
//!
//! `PolicyRegistry` is the "small record in shared memory" spec.md §5 asks
//! for: the active placement/transfer policy names, updatable at any time
//! via `/update_policy`, with request handlers snapshotting it once at the
//! start of each request rather than holding the lock across a database
//! round-trip.

pub mod placement;
pub mod skystore;
pub mod transfer;

pub use placement::{PlacementPolicyKind, PlaceRequest};
pub use transfer::TransferPolicyKind;

use std::sync::Mutex;

use crate::config::Settings;
use crate::error::{ApiError, ApiResult};

pub struct PolicyRegistry {
    inner: Mutex<PolicyState>,
}

struct PolicyState {
    put_policy: PlacementPolicyKind,
    get_policy: TransferPolicyKind,
    single_region: String,
    fixed_ttl_seconds: i64,
    init_regions: Vec<String>,
}

/// A request-local snapshot: cloning the enum payload is cheap except for
/// `skystore`, whose histogram state we intentionally do *not* clone —
/// mutating operations on it go back through [`PolicyRegistry::with_put_policy_mut`].
pub struct PolicySnapshot {
    pub put_policy_name: &'static str,
    pub get_policy: TransferPolicyKind,
}

impl PolicyRegistry {
    pub fn new(settings: &Settings) -> ApiResult<Self> {
        let single_region = settings.init_regions.first().cloned().unwrap_or_default();
        let put_policy = PlacementPolicyKind::from_name(
            &settings.put_policy,
            &single_region,
            settings.fixed_ttl_seconds,
            &settings.init_regions,
        )
        .ok_or_else(|| ApiError::BadRequest(format!("unknown put_policy: {}", settings.put_policy)))?;
        let get_policy = TransferPolicyKind::from_name(&settings.get_policy)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown get_policy: {}", settings.get_policy)))?;

        Ok(Self {
            inner: Mutex::new(PolicyState {
                put_policy,
                get_policy,
                single_region,
                fixed_ttl_seconds: settings.fixed_ttl_seconds,
                init_regions: settings.init_regions.clone(),
            }),
        })
    }

    pub fn snapshot(&self) -> PolicySnapshot {
        let state = self.inner.lock().expect("policy registry mutex poisoned");
        PolicySnapshot {
            put_policy_name: state.put_policy.name(),
            get_policy: state.get_policy,
        }
    }

    /// `/update_policy`: swap either or both active policies by name.
    pub fn update(&self, put_policy: Option<&str>, get_policy: Option<&str>) -> ApiResult<()> {
        let mut state = self.inner.lock().expect("policy registry mutex poisoned");

        if let Some(name) = put_policy {
            let new_policy = PlacementPolicyKind::from_name(name, &state.single_region, state.fixed_ttl_seconds, &state.init_regions)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown put_policy: {name}")))?;
            state.put_policy = new_policy;
        }
        if let Some(name) = get_policy {
            let new_policy = TransferPolicyKind::from_name(name)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown get_policy: {name}")))?;
            state.get_policy = new_policy;
        }
        Ok(())
    }

    /// Runs `f` with exclusive access to the active placement policy —
    /// needed for `get_ttl` on `skystore`, which mutates its histograms.
    pub fn with_put_policy_mut<R>(&self, f: impl FnOnce(&mut PlacementPolicyKind) -> R) -> R {
        let mut state = self.inner.lock().expect("policy registry mutex poisoned");
        f(&mut state.put_policy)
    }

    pub fn put_policy_name(&self) -> String {
        self.inner.lock().expect("policy registry mutex poisoned").put_policy.name().to_string()
    }
}
