//! Placement policies (§4.2): the closed set of names a bucket's
//! `put_policy`/`get_policy` can be set to, each exposing `place`, `get_ttl`
//! and `name`.
//!
//! Grounded in `original_source/.../policy_skystore.py` and its sibling
//! policy classes (`always_store`, `always_evict`, `push`, `t_even`, ...).
//! The Design Notes in spec.md call for "a sum type over the closed set of
//! placement/transfer policy names, with a small trait/interface
//! (`place`, `get_ttl`, `name`) implemented per variant" in place of the
//! original's duck-typed Python classes; `PlacementPolicyKind` is that sum
//! type, with `skystore`'s mutable histogram state carried in its own
//! variant payload.

use chrono::{DateTime, Utc};

use crate::cost_graph::CostGraph;
use crate::policy::skystore::SkystoreState;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// `policy_teven.py`'s fallback when the cost graph has no storage price
/// for `dst`: a fixed 12h TTL rather than an unbounded retention.
const TEVEN_FALLBACK_SECONDS: i64 = 12 * 60 * 60;

/// What a `start_upload` call needs from the request to ask a policy where
/// to place copies and how long they should live.
pub struct PlaceRequest<'a> {
    pub client_region: &'a str,
    pub init_regions: &'a [String],
    pub bucket_primary_region: Option<&'a str>,
    pub need_warmup_regions: &'a [String],
    /// the configured `single_region` store target.
    pub single_region: &'a str,
}

#[derive(Debug, Clone)]
pub enum PlacementPolicyKind {
    SingleRegion { region: String },
    ReplicateAll,
    Push,
    AlwaysStore,
    AlwaysEvict,
    FixedTtl { ttl_seconds: i64 },
    TEven,
    Skystore(SkystoreState),
}

impl PlacementPolicyKind {
    pub fn name(&self) -> &'static str {
        match self {
            PlacementPolicyKind::SingleRegion { .. } => "single_region",
            PlacementPolicyKind::ReplicateAll => "replicate_all",
            PlacementPolicyKind::Push => "push",
            PlacementPolicyKind::AlwaysStore => "always_store",
            PlacementPolicyKind::AlwaysEvict => "always_evict",
            PlacementPolicyKind::FixedTtl { .. } => "fixed_ttl",
            PlacementPolicyKind::TEven => "t_even",
            PlacementPolicyKind::Skystore(_) => "skystore",
        }
    }

    /// §4.2's `place(request) -> list of region tags`.
    pub fn place(&self, req: &PlaceRequest) -> Vec<String> {
        match self {
            PlacementPolicyKind::SingleRegion { region } => vec![region.clone()],
            PlacementPolicyKind::ReplicateAll => req.init_regions.to_vec(),
            PlacementPolicyKind::Push => {
                let mut regions: Vec<String> = Vec::new();
                if let Some(primary) = req.bucket_primary_region {
                    regions.push(primary.to_string());
                }
                for r in req.need_warmup_regions {
                    if !regions.contains(r) {
                        regions.push(r.clone());
                    }
                }
                regions
            }
            PlacementPolicyKind::AlwaysStore
            | PlacementPolicyKind::AlwaysEvict
            | PlacementPolicyKind::FixedTtl { .. }
            | PlacementPolicyKind::TEven
            | PlacementPolicyKind::Skystore(_) => vec![req.client_region.to_string()],
        }
    }

    /// §4.2's `get_ttl(now_idx, src, dst, fixed_base_region) -> seconds`.
    #[allow(clippy::too_many_arguments)]
    pub fn get_ttl(
        &mut self,
        now: DateTime<Utc>,
        src: &str,
        dst: &str,
        fixed_base_region: bool,
        graph: &CostGraph,
    ) -> i64 {
        if fixed_base_region {
            return -1;
        }

        match self {
            PlacementPolicyKind::SingleRegion { .. }
            | PlacementPolicyKind::ReplicateAll
            | PlacementPolicyKind::Push
            | PlacementPolicyKind::AlwaysStore => -1,

            PlacementPolicyKind::AlwaysEvict => 0,

            PlacementPolicyKind::FixedTtl { ttl_seconds } => *ttl_seconds,

            PlacementPolicyKind::TEven => {
                let egress = graph.egress_cost(src, dst);
                let storage_per_day = graph.storage_price(dst);
                if storage_per_day <= 0.0 {
                    return TEVEN_FALLBACK_SECONDS;
                }
                (egress / storage_per_day * SECONDS_PER_DAY) as i64
            }

            PlacementPolicyKind::Skystore(state) => state.get_ttl(now, src, dst, false, graph),
        }
    }

    /// Break-even time used as skystore's thin-histogram fallback and as
    /// the tie-break input on `locate_object` (§4.2, last paragraph).
    pub fn t_even_seconds(src: &str, dst: &str, graph: &CostGraph) -> i64 {
        let egress = graph.egress_cost(src, dst);
        let storage_per_day = graph.storage_price(dst);
        if storage_per_day <= 0.0 {
            return TEVEN_FALLBACK_SECONDS;
        }
        (egress / storage_per_day * SECONDS_PER_DAY) as i64
    }

    pub fn from_name(name: &str, single_region: &str, fixed_ttl_seconds: i64, init_regions: &[String]) -> Option<Self> {
        match name {
            "single_region" => Some(PlacementPolicyKind::SingleRegion { region: single_region.to_string() }),
            "replicate_all" => Some(PlacementPolicyKind::ReplicateAll),
            "push" => Some(PlacementPolicyKind::Push),
            "always_store" => Some(PlacementPolicyKind::AlwaysStore),
            "always_evict" => Some(PlacementPolicyKind::AlwaysEvict),
            "fixed_ttl" => Some(PlacementPolicyKind::FixedTtl { ttl_seconds: fixed_ttl_seconds }),
            "t_even" => Some(PlacementPolicyKind::TEven),
            "skystore" => Some(PlacementPolicyKind::Skystore(SkystoreState::new(init_regions.to_vec()))),
            _ => None,
        }
    }

    /// Whether `locate_object`/`start_upload` should advance the shared
    /// `TraceIdx` counter for this policy (§4.1, §5).
    pub fn uses_trace_idx(&self) -> bool {
        matches!(self, PlacementPolicyKind::AlwaysStore | PlacementPolicyKind::Skystore(_))
    }

    pub fn as_skystore_mut(&mut self) -> Option<&mut SkystoreState> {
        match self {
            PlacementPolicyKind::Skystore(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> CostGraph {
        let mut g = CostGraph::default();
        g.test_set_edge("aws:us-east-1", "aws:us-west-1", 0.02, 1.0, 60.0);
        g.test_set_storage_price("aws:us-west-1", 0.023);
        g
    }

    #[test]
    fn fixed_base_region_always_wins() {
        let g = graph();
        let mut policy = PlacementPolicyKind::TEven;
        assert_eq!(policy.get_ttl(Utc::now(), "aws:us-east-1", "aws:us-west-1", true, &g), -1);
    }

    #[test]
    fn always_store_never_evicts() {
        let g = graph();
        let mut policy = PlacementPolicyKind::AlwaysStore;
        assert_eq!(policy.get_ttl(Utc::now(), "aws:us-east-1", "aws:us-west-1", false, &g), -1);
    }

    #[test]
    fn always_evict_ttl_is_zero() {
        let g = graph();
        let mut policy = PlacementPolicyKind::AlwaysEvict;
        assert_eq!(policy.get_ttl(Utc::now(), "aws:us-east-1", "aws:us-west-1", false, &g), 0);
    }

    #[test]
    fn t_even_matches_break_even_formula() {
        let g = graph();
        let mut policy = PlacementPolicyKind::TEven;
        let ttl = policy.get_ttl(Utc::now(), "aws:us-east-1", "aws:us-west-1", false, &g);
        assert_eq!(ttl, PlacementPolicyKind::t_even_seconds("aws:us-east-1", "aws:us-west-1", &g));
        assert!(ttl > 0);
    }

    #[test]
    fn push_places_primary_then_warmup_regions_deduped() {
        let req = PlaceRequest {
            client_region: "aws:us-east-1",
            init_regions: &["aws:us-east-1".to_string(), "aws:us-west-1".to_string()],
            bucket_primary_region: Some("aws:us-east-1"),
            need_warmup_regions: &["aws:us-east-1".to_string(), "aws:us-west-1".to_string()],
            single_region: "aws:us-east-1",
        };
        let placed = PlacementPolicyKind::Push.place(&req);
        assert_eq!(placed, vec!["aws:us-east-1".to_string(), "aws:us-west-1".to_string()]);
    }

    #[test]
    fn replicate_all_places_every_init_region() {
        let req = PlaceRequest {
            client_region: "aws:us-east-1",
            init_regions: &["aws:us-east-1".to_string(), "aws:us-west-1".to_string(), "aws:eu-west-1".to_string()],
            bucket_primary_region: None,
            need_warmup_regions: &[],
            single_region: "aws:us-east-1",
        };
        assert_eq!(PlacementPolicyKind::ReplicateAll.place(&req), req.init_regions.to_vec());
    }

    #[test]
    fn from_name_round_trips_every_closed_variant() {
        let names = ["single_region", "replicate_all", "push", "always_store", "always_evict", "fixed_ttl", "t_even", "skystore"];
        for name in names {
            let policy = PlacementPolicyKind::from_name(name, "aws:us-east-1", 3600, &["aws:us-east-1".to_string()])
                .unwrap_or_else(|| panic!("{name} should be a recognized placement policy"));
            assert_eq!(policy.name(), name);
        }
        assert!(PlacementPolicyKind::from_name("not_a_policy", "aws:us-east-1", 3600, &[]).is_none());
    }

    #[test]
    fn only_always_store_and_skystore_advance_the_trace_idx() {
        assert!(!PlacementPolicyKind::AlwaysEvict.uses_trace_idx());
        assert!(PlacementPolicyKind::AlwaysStore.uses_trace_idx());
        assert!(PlacementPolicyKind::Skystore(SkystoreState::new(vec![])).uses_trace_idx());
    }
}
