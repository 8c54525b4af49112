//! The spread loop
//!
//! Synapse-style iterative activation over the trace graph: each iteration
//! distributes `S * w * a / fan` to neighbors, retains `(1-delta) * a`
//! locally, floors the seeds, applies lateral inhibition from the top-M
//! winners and passes survivors through the firing sigmoid.
//!
//! Every iteration writes into a fresh map, and all maps are ordered
//! (BTreeMap), so the result is deterministic for a given seed set and
//! graph regardless of scheduling.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::store::Store;

use super::ActivationParams;

/// Lazily loaded view of the trace graph: direct trace relations merged
/// with entity-bridged edges, capped per node.
pub struct TraceGraph<'a> {
    store: &'a Store,
    params: &'a ActivationParams,
    edges: BTreeMap<String, Vec<(String, f64)>>,
}

impl<'a> TraceGraph<'a> {
    /// Create an empty graph view over the store.
    pub fn new(store: &'a Store, params: &'a ActivationParams) -> Self {
        Self {
            store,
            params,
            edges: BTreeMap::new(),
        }
    }

    /// Batch-load neighbor lists for any node not yet present.
    pub fn ensure_loaded(&mut self, nodes: &BTreeSet<String>) -> Result<()> {
        for node in nodes {
            if self.edges.contains_key(node) {
                continue;
            }
            let loaded = self.load_neighbors(node)?;
            self.edges.insert(node.clone(), loaded);
        }
        Ok(())
    }

    /// Neighbors of a loaded node (empty for unknown nodes).
    pub fn neighbors(&self, node: &str) -> &[(String, f64)] {
        self.edges.get(node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn load_neighbors(&self, node: &str) -> Result<Vec<(String, f64)>> {
        let cap = self.params.max_edges_per_node;

        // Direct relations, both directions
        let mut merged: BTreeMap<String, f64> = BTreeMap::new();
        for (neighbor, weight) in self.store.trace_neighbors(node, cap)? {
            let entry = merged.entry(neighbor).or_insert(0.0);
            *entry = entry.max(weight);
        }

        // Entity bridges: min(1, shared * weight-per-entity)
        for (neighbor, shared) in self.store.trace_entity_neighbors(node)? {
            let weight = (shared as f64 * self.params.entity_edge_weight).min(1.0);
            let entry = merged.entry(neighbor).or_insert(0.0);
            *entry = entry.max(weight);
        }

        let mut neighbors: Vec<(String, f64)> = merged.into_iter().collect();
        neighbors.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        neighbors.truncate(cap);
        Ok(neighbors)
    }
}

/// Run the spread loop from a seed set. Returns the final activation map;
/// an empty seed set yields an empty map.
pub fn spread_activation(
    graph: &mut TraceGraph<'_>,
    seeds: &[String],
    params: &ActivationParams,
) -> Result<BTreeMap<String, f64>> {
    if seeds.is_empty() {
        return Ok(BTreeMap::new());
    }

    let seed_set: BTreeSet<String> = seeds.iter().cloned().collect();
    let mut activation: BTreeMap<String, f64> = seed_set
        .iter()
        .map(|s| (s.clone(), params.seed_boost))
        .collect();

    for _ in 0..params.iterations {
        // Pre-load neighbors of every currently active node
        let active: BTreeSet<String> = activation.keys().cloned().collect();
        graph.ensure_loaded(&active)?;

        // Distribute and retain into a fresh map
        let mut next: BTreeMap<String, f64> = BTreeMap::new();
        for (node, a) in &activation {
            let neighbors = graph.neighbors(node);
            let fan = neighbors.len().max(1) as f64;
            for (neighbor, weight) in neighbors {
                *next.entry(neighbor.clone()).or_insert(0.0) +=
                    params.spread_factor * weight * a / fan;
            }
            *next.entry(node.clone()).or_insert(0.0) += params.retention * a;
        }

        // Seed floor
        for seed in &seed_set {
            let entry = next.entry(seed.clone()).or_insert(0.0);
            *entry = entry.max(params.seed_floor);
        }

        apply_inhibition(&mut next, params);

        // Firing sigmoid on all survivors
        for value in next.values_mut() {
            *value = params.sigmoid(*value);
        }

        // Node cap: keep the strongest
        if next.len() > params.max_active_nodes {
            let mut ranked: Vec<(String, f64)> = next.into_iter().collect();
            ranked.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            ranked.truncate(params.max_active_nodes);
            next = ranked.into_iter().collect();
        }

        activation = next;
    }

    Ok(activation)
}

/// Lateral inhibition: the top-M winners suppress everyone below them by
/// `beta * sum(winner - a)` over the winners stronger than the node.
/// Non-positive survivors drop out.
fn apply_inhibition(activation: &mut BTreeMap<String, f64>, params: &ActivationParams) {
    if activation.len() <= params.inhibition_winners {
        return;
    }
    let mut ranked: Vec<(String, f64)> = activation
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    let winners: Vec<(String, f64)> = ranked
        .iter()
        .take(params.inhibition_winners)
        .cloned()
        .collect();
    let winner_names: BTreeSet<&str> = winners.iter().map(|(k, _)| k.as_str()).collect();

    let mut dropped = Vec::new();
    for (node, a) in activation.iter_mut() {
        if winner_names.contains(node.as_str()) {
            continue;
        }
        let suppression: f64 = winners
            .iter()
            .filter(|(_, w)| *w > *a)
            .map(|(_, w)| *w - *a)
            .sum();
        *a -= params.inhibition_beta * suppression;
        if *a <= 0.0 {
            dropped.push(node.clone());
        }
    }
    for node in dropped {
        activation.remove(&node);
    }
}
