//! Cost Graph (§2 item 1): a read-only directed graph over region tags.
//!
//! Grounded in `original_source/.../operations/policy/utils/helpers.py::make_nx_graph`:
//! nodes carry storage/request pricing, edges carry egress cost, throughput
//! and latency. The original loads these from `cost.csv`, `throughput.csv`,
//! `complete_latency.csv` and `storage.csv` via pandas; here we parse the
//! same four files with the `csv` crate into plain hash maps - no graph
//! library dependency is warranted for a structure this small.

use std::collections::HashMap;

use crate::config::CostGraphFiles;

#[derive(Debug, Clone, Default)]
pub struct NodeCost {
    /// $ per GB-month of storage.
    pub price_storage: f64,
    /// $ per PUT request, if known.
    pub price_put: f64,
    /// $ per GET request, if known.
    pub price_get: f64,
}

#[derive(Debug, Clone, Default)]
pub struct EdgeCost {
    /// $ per GB egress from src to dst.
    pub cost: f64,
    /// measured throughput, GB/s.
    pub throughput: f64,
    /// round-trip latency, ms.
    pub latency: f64,
}

#[derive(Debug, Clone, Default)]
pub struct CostGraph {
    nodes: HashMap<String, NodeCost>,
    edges: HashMap<(String, String), EdgeCost>,
}

impl CostGraph {
    /// Build an empty graph seeded with zero-cost self-edges for every
    /// region tag; useful for tests that don't want to ship CSV fixtures.
    pub fn empty(regions: &[String]) -> Self {
        let mut g = CostGraph::default();
        for r in regions {
            g.nodes.entry(r.clone()).or_default();
            g.edges.insert(
                (r.clone(), r.clone()),
                EdgeCost {
                    cost: 0.0,
                    throughput: f64::MAX,
                    latency: 0.1,
                },
            );
        }
        g
    }

    pub fn load(files: &CostGraphFiles) -> anyhow::Result<Self> {
        let mut g = CostGraph::default();

        let mut throughput_rdr = csv::Reader::from_path(&files.throughput_csv)?;
        for result in throughput_rdr.records() {
            let record = result?;
            let src = record.get(0).unwrap_or_default().to_string();
            let dst = record.get(1).unwrap_or_default().to_string();
            if src == dst {
                continue;
            }
            let throughput: f64 = record.get(2).unwrap_or("0").parse().unwrap_or(0.0);
            g.nodes.entry(src.clone()).or_default();
            g.nodes.entry(dst.clone()).or_default();
            g.edges.insert(
                (src, dst),
                EdgeCost {
                    cost: 0.0,
                    throughput,
                    latency: 1.0,
                },
            );
        }

        let mut cost_rdr = csv::Reader::from_path(&files.cost_csv)?;
        for result in cost_rdr.records() {
            let record = result?;
            let src = record.get(0).unwrap_or_default().to_string();
            let dst = record.get(1).unwrap_or_default().to_string();
            let cost: f64 = record.get(2).unwrap_or("0").parse().unwrap_or(0.0);
            g.edges
                .entry((src, dst))
                .or_insert_with(|| EdgeCost {
                    cost: 0.0,
                    throughput: 0.0,
                    latency: 1.0,
                })
                .cost = cost;
        }

        let mut latency_rdr = csv::Reader::from_path(&files.complete_latency_csv)?;
        for result in latency_rdr.records() {
            let record = result?;
            let src = record.get(0).unwrap_or_default().to_string();
            let dst = record.get(1).unwrap_or_default().to_string();
            let rtt: f64 = record.get(2).unwrap_or("0").parse().unwrap_or(0.0);
            if let Some(edge) = g.edges.get_mut(&(src, dst)) {
                edge.latency = rtt;
            }
        }

        let mut storage_rdr = csv::Reader::from_path(&files.storage_csv)?;
        for result in storage_rdr.records() {
            let record = result?;
            let region = record.get(0).unwrap_or_default().to_string();
            let price: f64 = record.get(1).unwrap_or("0").parse().unwrap_or(0.0);
            g.nodes.entry(region).or_default().price_storage = price;
        }

        // Self-edges with zero cost, matching the original's ingress-limit loop.
        let region_tags: Vec<String> = g.nodes.keys().cloned().collect();
        for r in &region_tags {
            g.edges.entry((r.clone(), r.clone())).or_insert(EdgeCost {
                cost: 0.0,
                throughput: f64::MAX,
                latency: 0.1,
            });
        }

        Ok(g)
    }

    pub fn storage_price(&self, region: &str) -> f64 {
        self.nodes.get(region).map(|n| n.price_storage).unwrap_or(0.0)
    }

    pub fn egress_cost(&self, src: &str, dst: &str) -> f64 {
        if src == dst {
            return 0.0;
        }
        self.edges.get(&(src.to_string(), dst.to_string())).map(|e| e.cost).unwrap_or(0.0)
    }

    pub fn throughput(&self, src: &str, dst: &str) -> f64 {
        self.edges
            .get(&(src.to_string(), dst.to_string()))
            .map(|e| e.throughput)
            .unwrap_or(0.0)
    }

    pub fn latency(&self, src: &str, dst: &str) -> f64 {
        self.edges
            .get(&(src.to_string(), dst.to_string()))
            .map(|e| e.latency)
            .unwrap_or(0.7)
    }

    pub fn has_edge(&self, src: &str, dst: &str) -> bool {
        self.edges.contains_key(&(src.to_string(), dst.to_string()))
    }

    pub fn regions(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    pub fn avg_network_cost(&self) -> f64 {
        let costs: Vec<f64> = self.edges.values().map(|e| e.cost).filter(|c| *c > 0.0).collect();
        if costs.is_empty() {
            0.0
        } else {
            costs.iter().sum::<f64>() / costs.len() as f64
        }
    }

    /// Test-only seam for building fixture graphs without shipping CSVs.
    #[cfg(test)]
    pub(crate) fn test_set_edge(&mut self, src: &str, dst: &str, cost: f64, throughput: f64, latency: f64) {
        self.nodes.entry(src.to_string()).or_default();
        self.nodes.entry(dst.to_string()).or_default();
        self.edges.insert((src.to_string(), dst.to_string()), EdgeCost { cost, throughput, latency });
    }

    #[cfg(test)]
    pub(crate) fn test_set_storage_price(&mut self, region: &str, price: f64) {
        self.nodes.entry(region.to_string()).or_default().price_storage = price;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_graph_gives_free_self_edges() {
        let regions = vec!["aws:us-east-1".to_string(), "aws:us-west-1".to_string()];
        let g = CostGraph::empty(&regions);

        assert_eq!(g.egress_cost("aws:us-east-1", "aws:us-east-1"), 0.0);
        assert_eq!(g.throughput("aws:us-east-1", "aws:us-east-1"), f64::MAX);
        assert!(g.has_edge("aws:us-east-1", "aws:us-east-1"));
        assert!(!g.has_edge("aws:us-east-1", "aws:us-west-1"));
    }

    #[test]
    fn missing_edge_costs_are_conservative_defaults() {
        let g = CostGraph::default();
        assert_eq!(g.egress_cost("a", "b"), 0.0);
        assert_eq!(g.throughput("a", "b"), 0.0);
        assert_eq!(g.latency("a", "b"), 0.7);
        assert_eq!(g.storage_price("a"), 0.0);
    }

    #[test]
    fn same_region_egress_is_always_free() {
        let mut g = CostGraph::default();
        g.test_set_edge("a", "a", 5.0, 1.0, 1.0);
        assert_eq!(g.egress_cost("a", "a"), 0.0);
    }

    #[test]
    fn avg_network_cost_ignores_zero_edges() {
        let mut g = CostGraph::default();
        g.test_set_edge("a", "b", 0.02, 1.0, 1.0);
        g.test_set_edge("a", "c", 0.0, 1.0, 1.0);
        g.test_set_edge("b", "c", 0.08, 1.0, 1.0);
        assert!((g.avg_network_cost() - 0.05).abs() < 1e-9);
    }
}
