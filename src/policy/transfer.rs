//! Transfer policies (§4.3): given a logical object's live physical
//! locators and the region the request is issued from, pick which physical
//! copy actually serves a `locate_object`/warmup read.
//!
//! Grounded in `original_source/.../policy_direct.py`, `policy_closest.py`,
//! `policy_cheapest.py` and `policy_manual.py` - four tiny classes sharing
//! one `get(tag, object_locators)` method. Carried here as a closed enum
//! per the Design Notes rather than as trait objects, since the set of
//! transfer policies is fixed at compile time.

use crate::cost_graph::CostGraph;
use crate::model::PhysicalObjectLocator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPolicyKind {
    /// always pick the primary copy, regardless of requester location.
    Direct,
    /// pick the live copy with the lowest network latency to the requester.
    Closest,
    /// pick the live copy with the lowest egress cost to the requester.
    Cheapest,
    /// requester supplies the exact `cloud:region` tag to use.
    Manual,
}

impl TransferPolicyKind {
    pub fn name(&self) -> &'static str {
        match self {
            TransferPolicyKind::Direct => "direct",
            TransferPolicyKind::Closest => "closest",
            TransferPolicyKind::Cheapest => "cheapest",
            TransferPolicyKind::Manual => "manual",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "direct" => Some(TransferPolicyKind::Direct),
            "closest" => Some(TransferPolicyKind::Closest),
            "cheapest" => Some(TransferPolicyKind::Cheapest),
            "manual" => Some(TransferPolicyKind::Manual),
            _ => None,
        }
    }

    /// `client_from_region` is the requester's `cloud:region` tag; absent
    /// for clients that don't report one (direct/manual don't need it).
    /// `manual_tag`, when present, pins the exact locator to use.
    ///
    /// Every variant short-circuits to the client region's own locator when
    /// one is live (§4.3: "All policies short-circuit to the client region's
    /// locator if present").
    pub fn get<'a>(
        &self,
        candidates: &'a [PhysicalObjectLocator],
        client_from_region: Option<&str>,
        manual_tag: Option<&str>,
        graph: &CostGraph,
    ) -> Option<&'a PhysicalObjectLocator> {
        if candidates.is_empty() {
            return None;
        }

        if let Some(from) = client_from_region {
            if let Some(exact) = candidates.iter().find(|l| l.location_tag == from) {
                return Some(exact);
            }
        }

        match self {
            TransferPolicyKind::Direct => candidates.iter().find(|l| l.is_primary).or_else(|| candidates.first()),

            TransferPolicyKind::Manual => {
                let tag = manual_tag?;
                candidates.iter().find(|l| l.location_tag == tag)
            }

            // maximize throughput(src -> client).
            TransferPolicyKind::Closest => {
                let from = client_from_region.unwrap_or_else(|| {
                    candidates.iter().find(|l| l.is_primary).map(|l| l.location_tag.as_str()).unwrap_or("")
                });
                candidates
                    .iter()
                    .max_by(|a, b| {
                        graph
                            .throughput(&a.location_tag, from)
                            .partial_cmp(&graph.throughput(&b.location_tag, from))
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
            }

            // minimize (egress_cost, latency) lexicographically.
            TransferPolicyKind::Cheapest => {
                let from = client_from_region.unwrap_or_else(|| {
                    candidates.iter().find(|l| l.is_primary).map(|l| l.location_tag.as_str()).unwrap_or("")
                });
                candidates.iter().min_by(|a, b| {
                    let a_key = (graph.egress_cost(&a.location_tag, from), graph.latency(&a.location_tag, from));
                    let b_key = (graph.egress_cost(&b.location_tag, from), graph.latency(&b.location_tag, from));
                    a_key.partial_cmp(&b_key).unwrap_or(std::cmp::Ordering::Equal)
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::Status;

    fn locator(tag: &str, is_primary: bool) -> PhysicalObjectLocator {
        PhysicalObjectLocator {
            id: 1,
            logical_object_id: 1,
            location_tag: tag.to_string(),
            cloud: tag.split(':').next().unwrap_or("aws").to_string(),
            region: tag.split(':').nth(1).unwrap_or("").to_string(),
            bucket: "b".to_string(),
            key: "k".to_string(),
            status: Status::Ready,
            lock_acquired_ts: None,
            is_primary,
            version_id: None,
            multipart_upload_id: None,
            ttl: -1,
            storage_start_time: Some(Utc::now()),
        }
    }

    #[test]
    fn every_policy_short_circuits_to_client_region() {
        let candidates = vec![locator("aws:us-east-1", true), locator("aws:us-west-1", false)];
        let graph = CostGraph::empty(&["aws:us-east-1".to_string(), "aws:us-west-1".to_string()]);

        for policy in [TransferPolicyKind::Direct, TransferPolicyKind::Closest, TransferPolicyKind::Cheapest] {
            let chosen = policy.get(&candidates, Some("aws:us-west-1"), None, &graph).expect("a locator");
            assert_eq!(chosen.location_tag, "aws:us-west-1", "{policy:?} should short-circuit to the client region");
        }
    }

    #[test]
    fn direct_falls_back_to_primary_without_a_client_region_match() {
        let candidates = vec![locator("aws:us-east-1", true), locator("aws:us-west-1", false)];
        let graph = CostGraph::empty(&["aws:us-east-1".to_string(), "aws:us-west-1".to_string()]);

        let chosen = TransferPolicyKind::Direct.get(&candidates, Some("aws:eu-west-1"), None, &graph).expect("a locator");
        assert!(chosen.is_primary);
    }

    #[test]
    fn closest_maximizes_throughput() {
        let candidates = vec![locator("aws:us-east-1", true), locator("aws:us-west-1", false)];
        let mut graph = CostGraph::default();
        graph.test_set_edge("aws:us-east-1", "aws:eu-west-1", 0.02, 0.5, 100.0);
        graph.test_set_edge("aws:us-west-1", "aws:eu-west-1", 0.02, 2.0, 50.0);

        let chosen = TransferPolicyKind::Closest.get(&candidates, Some("aws:eu-west-1"), None, &graph).expect("a locator");
        assert_eq!(chosen.location_tag, "aws:us-west-1");
    }

    #[test]
    fn cheapest_breaks_ties_on_latency() {
        let candidates = vec![locator("aws:us-east-1", true), locator("aws:us-west-1", false)];
        let mut graph = CostGraph::default();
        graph.test_set_edge("aws:us-east-1", "aws:eu-west-1", 0.02, 1.0, 100.0);
        graph.test_set_edge("aws:us-west-1", "aws:eu-west-1", 0.02, 1.0, 30.0);

        let chosen = TransferPolicyKind::Cheapest.get(&candidates, Some("aws:eu-west-1"), None, &graph).expect("a locator");
        assert_eq!(chosen.location_tag, "aws:us-west-1");
    }

    #[test]
    fn manual_requires_the_requested_tag_to_exist() {
        let candidates = vec![locator("aws:us-east-1", true)];
        let graph = CostGraph::default();

        assert!(TransferPolicyKind::Manual.get(&candidates, None, Some("aws:eu-west-1"), &graph).is_none());
        assert!(TransferPolicyKind::Manual.get(&candidates, None, Some("aws:us-east-1"), &graph).is_some());
    }

    #[test]
    fn empty_candidates_never_match() {
        let graph = CostGraph::default();
        assert!(TransferPolicyKind::Direct.get(&[], None, None, &graph).is_none());
    }
}
