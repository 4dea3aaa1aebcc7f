//! Score fusion for combining independent dense and sparse search results
//! into a single ranking (§4.3).
//!
//! The min-max contract here is deliberately simpler than a general-purpose
//! normalizer: empty input stays empty, a single score always normalizes to
//! 1.0, and a tied set normalizes to 0.5 rather than 0.0 — callers fuse
//! dense and sparse hits that frequently agree exactly, and collapsing
//! agreement to zero would bury it under any disagreeing modality.

/// Normalize a list of (id, score) pairs to [0, 1].
///
/// - empty input -> empty output
/// - all scores equal -> every output is 0.5
/// - a single score -> 1.0
/// - otherwise, standard min-max scaling
pub fn min_max_normalize(scores: &[(String, f32)]) -> Vec<(String, f32)> {
    if scores.is_empty() {
        return Vec::new();
    }
    if scores.len() == 1 {
        return vec![(scores[0].0.clone(), 1.0)];
    }

    let mut min_v = f32::INFINITY;
    let mut max_v = f32::NEG_INFINITY;
    for (_, s) in scores {
        if s.is_finite() {
            min_v = min_v.min(*s);
            max_v = max_v.max(*s);
        }
    }

    if !min_v.is_finite() || !max_v.is_finite() || (max_v - min_v).abs() < f32::EPSILON {
        return scores.iter().map(|(id, _)| (id.clone(), 0.5)).collect();
    }

    let denom = max_v - min_v;
    scores
        .iter()
        .map(|(id, s)| {
            let v = if s.is_finite() { (s - min_v) / denom } else { 0.0 };
            (id.clone(), v.clamp(0.0, 1.0))
        })
        .collect()
}

/// Combine normalized dense and sparse scores into one ranked list,
/// weighted 0.7/0.3 by default (§4.3). IDs present in only one modality are
/// scored against 0.0 for the other.
pub fn weighted_combine(
    dense: &[(String, f32)],
    sparse: &[(String, f32)],
    dense_weight: f32,
    sparse_weight: f32,
) -> Vec<(String, f32)> {
    use std::collections::HashMap;

    let dense_norm: HashMap<String, f32> = min_max_normalize(dense).into_iter().collect();
    let sparse_norm: HashMap<String, f32> = min_max_normalize(sparse).into_iter().collect();

    let mut ids: Vec<String> = dense_norm.keys().chain(sparse_norm.keys()).cloned().collect();
    ids.sort();
    ids.dedup();

    let mut combined: Vec<(String, f32)> = ids
        .into_iter()
        .map(|id| {
            let d = dense_norm.get(&id).copied().unwrap_or(0.0);
            let s = sparse_norm.get(&id).copied().unwrap_or(0.0);
            (id, d * dense_weight + s * sparse_weight)
        })
        .collect();

    combined.sort_by(|(ida, sa), (idb, sb)| {
        sb.partial_cmp(sa).unwrap_or(std::cmp::Ordering::Equal).then_with(|| ida.cmp(idb))
    });
    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_normalizes_to_empty() {
        assert!(min_max_normalize(&[]).is_empty());
    }

    #[test]
    fn single_score_normalizes_to_one() {
        let out = min_max_normalize(&[("a".into(), 7.3)]);
        assert_eq!(out, vec![("a".to_string(), 1.0)]);
    }

    #[test]
    fn all_equal_normalizes_to_half() {
        let out = min_max_normalize(&[("a".into(), 3.0), ("b".into(), 3.0), ("c".into(), 3.0)]);
        for (_, v) in &out {
            assert!((v - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn standard_range_normalizes_zero_to_one() {
        let out = min_max_normalize(&[("a".into(), 10.0), ("b".into(), 20.0), ("c".into(), 15.0)]);
        let get = |id: &str| out.iter().find(|(i, _)| i == id).unwrap().1;
        assert!((get("a") - 0.0).abs() < 1e-6);
        assert!((get("b") - 1.0).abs() < 1e-6);
        assert!((get("c") - 0.5).abs() < 1e-6);
    }

    #[test]
    fn weighted_combine_defaults_favor_dense() {
        let dense = vec![("a".to_string(), 1.0), ("b".to_string(), 0.0)];
        let sparse = vec![("b".to_string(), 1.0), ("a".to_string(), 0.0)];
        let out = weighted_combine(&dense, &sparse, 0.7, 0.3);
        assert_eq!(out[0].0, "a");
    }

    #[test]
    fn weighted_combine_includes_ids_present_in_only_one_modality() {
        let dense = vec![("a".to_string(), 1.0)];
        let sparse = vec![("b".to_string(), 1.0)];
        let out = weighted_combine(&dense, &sparse, 0.7, 0.3);
        assert_eq!(out.len(), 2);
    }
}
