//! Deterministic partition assignment.
//!
//! Every peer that observes the same `(entity_count, sorted active
//! clients, frame, reliability scores, reliability version)` computes the
//! identical assignment, because the RNG seed is a pure function of
//! `(frame, partition_id)` and the sampling walks the client list in
//! sorted order.

use std::collections::HashMap;

use convergence_math::{seed_from_frame_partition, Fixed, Rng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradationTier {
    Normal,
    Stressed,
    Overloaded,
}

pub fn partition_count(entity_count: usize, k: usize) -> u32 {
    let k = k.max(1);
    (((entity_count + k - 1) / k).max(1)) as u32
}

/// Reliability-weighted sample of one client from `sorted_active_clients`,
/// using `reliability` scores in `[0,1]` (missing entries default to 1.0).
fn weighted_pick(
    rng: &mut Rng,
    sorted_active_clients: &[String],
    reliability: &HashMap<String, f64>,
) -> Option<String> {
    if sorted_active_clients.is_empty() {
        return None;
    }
    let weights: Vec<Fixed> = sorted_active_clients
        .iter()
        .map(|c| Fixed::to_fixed(reliability.get(c).copied().unwrap_or(1.0).max(0.0001)))
        .collect();
    let total = weights.iter().fold(Fixed::ZERO, |acc, &w| acc + w);
    let draw = rng.next_fixed_range(Fixed::ZERO, total);
    let mut running = Fixed::ZERO;
    for (client, weight) in sorted_active_clients.iter().zip(weights.iter()) {
        running = running + *weight;
        if draw < running {
            return Some(client.clone());
        }
    }
    sorted_active_clients.last().cloned()
}

/// Computes the partition-id -> owning-client assignment for `frame`.
pub fn assign(
    frame: u32,
    partition_count: u32,
    sorted_active_clients: &[String],
    reliability: &HashMap<String, f64>,
) -> Vec<Option<String>> {
    (0..partition_count)
        .map(|p| {
            let mut rng = Rng::new(seed_from_frame_partition(frame, p));
            weighted_pick(&mut rng, sorted_active_clients, reliability)
        })
        .collect()
}

/// Aggregate degradation tier derived from mean reliability across
/// `active_clients`; may reduce continuous-sync cadence.
pub fn degradation_tier(active_clients: &[String], reliability: &HashMap<String, f64>) -> DegradationTier {
    if active_clients.is_empty() {
        return DegradationTier::Normal;
    }
    let mean: f64 = active_clients
        .iter()
        .map(|c| reliability.get(c).copied().unwrap_or(1.0))
        .sum::<f64>()
        / active_clients.len() as f64;
    if mean >= 0.8 {
        DegradationTier::Normal
    } else if mean >= 0.4 {
        DegradationTier::Stressed
    } else {
        DegradationTier::Overloaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_count_is_one_when_entities_fit_in_k() {
        assert_eq!(partition_count(50, 100), 1);
        assert_eq!(partition_count(0, 100), 1);
    }

    #[test]
    fn partition_count_scales_with_entity_count() {
        assert_eq!(partition_count(250, 100), 3);
    }

    #[test]
    fn identical_inputs_produce_identical_assignment() {
        let clients = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let reliability = HashMap::new();
        let a = assign(10, 2, &clients, &reliability);
        let b = assign(10, 2, &clients, &reliability);
        assert_eq!(a, b);
    }

    #[test]
    fn different_frames_can_yield_different_assignments() {
        let clients = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];
        let reliability = HashMap::new();
        let assignments: Vec<_> = (0..20).map(|f| assign(f, 1, &clients, &reliability)).collect();
        assert!(assignments.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn empty_client_list_yields_none_assignments() {
        let clients: Vec<String> = Vec::new();
        let reliability = HashMap::new();
        let assignment = assign(1, 2, &clients, &reliability);
        assert_eq!(assignment, vec![None, None]);
    }

    #[test]
    fn degradation_tier_reflects_mean_reliability() {
        let clients = vec!["a".to_string(), "b".to_string()];
        let mut reliability = HashMap::new();
        reliability.insert("a".to_string(), 1.0);
        reliability.insert("b".to_string(), 1.0);
        assert_eq!(degradation_tier(&clients, &reliability), DegradationTier::Normal);
        reliability.insert("b".to_string(), 0.1);
        assert_eq!(degradation_tier(&clients, &reliability), DegradationTier::Stressed);
    }
}
