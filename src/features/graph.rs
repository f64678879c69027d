//! Account graph centrality: PageRank and normalized degree per account.

use std::collections::HashMap;

use petgraph::graphmap::DiGraphMap;
use petgraph::Direction::{Incoming, Outgoing};
use tracing::{debug, warn};

use crate::config::PipelineConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CentralityParams {
    pub damping: f64,
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for CentralityParams {
    fn default() -> Self {
        Self {
            damping: 0.85,
            tolerance: 1e-6,
            max_iterations: 100,
        }
    }
}

impl From<&PipelineConfig> for CentralityParams {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            damping: config.pagerank_damping,
            tolerance: config.pagerank_tolerance,
            max_iterations: config.pagerank_max_iterations,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphScores {
    pagerank: HashMap<String, f64>,
    degree: HashMap<String, f64>,
}

impl GraphScores {
    /// Builds a directed graph from sender -> receiver edges; repeated pairs collapse
    /// into one edge.
    pub fn from_edges<'a, I>(edges: I, params: &CentralityParams) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for (sender, receiver) in edges {
            graph.add_edge(sender, receiver, ());
        }
        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "built transaction graph"
        );

        let nodes: Vec<&str> = graph.nodes().collect();
        let ranks = page_rank(&graph, &nodes, params);
        let degrees = degree_centrality(&graph, &nodes);

        Self {
            pagerank: nodes.iter().map(|n| n.to_string()).zip(ranks).collect(),
            degree: nodes.iter().map(|n| n.to_string()).zip(degrees).collect(),
        }
    }

    /// PageRank of an account; 0 for accounts not in the graph.
    pub fn pagerank(&self, account: &str) -> f64 {
        self.pagerank.get(account).copied().unwrap_or(0.0)
    }

    /// Normalized degree of an account; 0 for accounts not in the graph.
    pub fn degree(&self, account: &str) -> f64 {
        self.degree.get(account).copied().unwrap_or(0.0)
    }

    pub fn node_count(&self) -> usize {
        self.pagerank.len()
    }
}

// Power iteration with a uniform teleport vector. Mass sitting on nodes without
// out-edges is spread uniformly over all nodes every step.
fn page_rank(graph: &DiGraphMap<&str, ()>, nodes: &[&str], params: &CentralityParams) -> Vec<f64> {
    let n = nodes.len();
    if n == 0 {
        return Vec::new();
    }
    let index: HashMap<&str, usize> = nodes.iter().enumerate().map(|(i, node)| (*node, i)).collect();
    let successors: Vec<Vec<usize>> = nodes
        .iter()
        .map(|&node| {
            graph
                .neighbors_directed(node, Outgoing)
                .map(|succ| index[succ])
                .collect()
        })
        .collect();

    let uniform = 1.0 / n as f64;
    let alpha = params.damping;
    let mut ranks = vec![uniform; n];

    for iteration in 0..params.max_iterations {
        let dangling: f64 = successors
            .iter()
            .zip(&ranks)
            .filter(|(succ, _)| succ.is_empty())
            .map(|(_, rank)| rank)
            .sum();
        let base = alpha * dangling * uniform + (1.0 - alpha) * uniform;

        let mut next = vec![base; n];
        for (node, succ) in successors.iter().enumerate() {
            if succ.is_empty() {
                continue;
            }
            let share = alpha * ranks[node] / succ.len() as f64;
            for &target in succ {
                next[target] += share;
            }
        }

        let change: f64 = next.iter().zip(&ranks).map(|(a, b)| (a - b).abs()).sum();
        ranks = next;
        if change < n as f64 * params.tolerance {
            debug!(iterations = iteration + 1, "pagerank converged");
            return ranks;
        }
    }

    warn!(
        max_iterations = params.max_iterations,
        "pagerank did not converge; keeping the last iterate"
    );
    ranks
}

fn degree_centrality(graph: &DiGraphMap<&str, ()>, nodes: &[&str]) -> Vec<f64> {
    if nodes.len() <= 1 {
        return vec![1.0; nodes.len()];
    }
    let scale = 1.0 / (nodes.len() - 1) as f64;
    nodes
        .iter()
        .map(|&node| {
            let degree = graph.neighbors_directed(node, Outgoing).count()
                + graph.neighbors_directed(node, Incoming).count();
            degree as f64 * scale
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(edges: &[(&str, &str)]) -> GraphScores {
        GraphScores::from_edges(edges.iter().copied(), &CentralityParams::default())
    }

    #[test]
    fn ranks_sum_to_one() {
        let g = scores(&[("S1", "R1"), ("S2", "R1"), ("S3", "R2"), ("R1", "S3")]);
        let total: f64 = ["S1", "S2", "S3", "R1", "R2"].iter().map(|n| g.pagerank(n)).sum();
        assert!((total - 1.0).abs() < 1e-6, "total {}", total);
    }

    #[test]
    fn two_node_chain_matches_closed_form() {
        // A -> B with B dangling: stationary ranks are 1/2.85 and 1.85/2.85.
        let g = scores(&[("A", "B")]);
        assert!((g.pagerank("A") - 1.0 / 2.85).abs() < 1e-4);
        assert!((g.pagerank("B") - 1.85 / 2.85).abs() < 1e-4);
    }

    #[test]
    fn iteration_cap_keeps_last_iterate() {
        let params = CentralityParams {
            max_iterations: 1,
            ..CentralityParams::default()
        };
        let g = GraphScores::from_edges([("A", "B")], &params);
        // one step from [0.5, 0.5]: A gets only teleport and dangling mass
        assert!((g.pagerank("A") - 0.2875).abs() < 1e-12);
        assert!((g.pagerank("B") - 0.7125).abs() < 1e-12);
    }

    #[test]
    fn loose_tolerance_stops_after_first_step() {
        let params = CentralityParams {
            tolerance: 1.0,
            ..CentralityParams::default()
        };
        let g = GraphScores::from_edges([("A", "B")], &params);
        assert!((g.pagerank("A") - 0.2875).abs() < 1e-12);
        assert!((g.pagerank("B") - 0.7125).abs() < 1e-12);
    }

    #[test]
    fn hub_receiver_outranks_its_senders() {
        let g = scores(&[("S1", "HUB"), ("S2", "HUB"), ("S3", "HUB"), ("S4", "HUB")]);
        assert!(g.pagerank("HUB") > g.pagerank("S1"));
        assert_eq!(g.pagerank("S1"), g.pagerank("S4"));
    }

    #[test]
    fn degree_is_normalized_by_other_nodes() {
        let g = scores(&[("S1", "R1"), ("S1", "R2"), ("S1", "R1"), ("S2", "R1")]);
        // 4 nodes; S1 has out-degree 2 after collapsing the repeated edge
        assert!((g.degree("S1") - 2.0 / 3.0).abs() < 1e-12);
        assert!((g.degree("R1") - 2.0 / 3.0).abs() < 1e-12);
        assert!((g.degree("S2") - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn unknown_accounts_score_zero() {
        let g = scores(&[("S1", "R1")]);
        assert_eq!(g.pagerank("S404"), 0.0);
        assert_eq!(g.degree("S404"), 0.0);
        assert_eq!(scores(&[]).node_count(), 0);
    }

    #[test]
    fn self_loop_counts_both_directions() {
        let g = scores(&[("S1", "S1")]);
        assert_eq!(g.node_count(), 1);
        assert_eq!(g.degree("S1"), 1.0);
        assert!((g.pagerank("S1") - 1.0).abs() < 1e-9);
    }
}
