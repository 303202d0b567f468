use rand::distributions::{Distribution, WeightedError, WeightedIndex};
use rand::Rng;
use std::collections::HashSet;

use crate::config::{IntraBias, SampleError};

/// Draw weight of a member with membership probability `p`.
pub(crate) fn weight(bias: IntraBias, p: f64) -> f64 {
    match bias {
        IntraBias::Uniform => 1.0,
        IntraBias::InverseProb => 1.0 / (p + 1e-6),
        IntraBias::MildInverseProb => (1.0 - p) + 1e-5,
        IntraBias::ConfidenceProb => p,
    }
}

/// Pick `take` distinct positions out of `weights.len()`, each draw
/// proportional to the remaining weights.
///
/// Once every positively weighted position is used, the rest are filled
/// uniformly from the zero-weight ones.
pub(crate) fn without_replacement<R: Rng + ?Sized>(
    rng: &mut R,
    weights: &[f64],
    take: usize,
) -> Result<Vec<usize>, SampleError> {
    let take = take.min(weights.len());
    let positive: Vec<usize> = (0..weights.len()).filter(|&i| weights[i] > 0.0).collect();
    let mut chosen = Vec::with_capacity(take);

    if !positive.is_empty() {
        let mut remaining: Vec<f64> = weights.iter().map(|&w| w.max(0.0)).collect();
        let mut dist = WeightedIndex::new(remaining.iter().copied())
            .map_err(|e| SampleError::Weights(e.to_string()))?;
        let weighted = take.min(positive.len());
        for drawn in 0..weighted {
            let i = dist.sample(rng);
            chosen.push(i);
            remaining[i] = 0.0;
            if drawn + 1 < weighted {
                match dist.update_weights(&[(i, &0.0)]) {
                    Ok(()) => {}
                    // The running total cancelled to zero while small weights remain.
                    Err(WeightedError::AllWeightsZero) => {
                        dist = WeightedIndex::new(remaining.iter().copied())
                            .map_err(|e| SampleError::Weights(e.to_string()))?;
                    }
                    Err(e) => return Err(SampleError::Weights(e.to_string())),
                }
            }
        }
    }

    if chosen.len() < take {
        let zeros: Vec<usize> = (0..weights.len()).filter(|&i| weights[i] <= 0.0).collect();
        let rest = rand::seq::index::sample(rng, zeros.len(), take - chosen.len());
        chosen.extend(rest.iter().map(|j| zeros[j]));
    }
    debug_assert!(
        chosen.iter().collect::<HashSet<_>>().len() == chosen.len(),
        "draw repeated a position"
    );
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn weights_per_bias() {
        assert_eq!(weight(IntraBias::Uniform, 0.3), 1.0);
        assert!((weight(IntraBias::InverseProb, 0.5) - 1.0 / 0.500001).abs() < 1e-12);
        assert!((weight(IntraBias::MildInverseProb, 1.0) - 1e-5).abs() < 1e-15);
        assert_eq!(weight(IntraBias::ConfidenceProb, 0.25), 0.25);
    }

    #[test]
    fn draws_are_distinct() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let weights = vec![1.0, 5.0, 0.5, 2.0, 3.0, 0.1];
        let picked = without_replacement(&mut rng, &weights, 6).unwrap();
        assert_eq!(picked.len(), 6);
        assert_eq!(picked.iter().collect::<HashSet<_>>().len(), 6);
    }

    #[test]
    fn heavy_weights_dominate() {
        let mut weights = vec![1e-4; 50];
        weights[7] = 1e4;
        weights[19] = 1e4;
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut picked = without_replacement(&mut rng, &weights, 2).unwrap();
        picked.sort_unstable();
        assert_eq!(picked, vec![7, 19]);
    }

    #[test]
    fn zero_weights_fill_last() {
        let weights = vec![0.0, 0.7, 0.0, 0.2, 0.0];
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let picked = without_replacement(&mut rng, &weights, 4).unwrap();
        let mut head = picked[..2].to_vec();
        head.sort_unstable();
        assert_eq!(head, vec![1, 3]);
        assert!(picked[2..].iter().all(|i| weights[*i] == 0.0));

        let all_zero = without_replacement(&mut rng, &[0.0; 4], 2).unwrap();
        assert_eq!(all_zero.len(), 2);
        assert_ne!(all_zero[0], all_zero[1]);
    }

    #[test]
    fn skewed_weights_never_repeat_a_position() {
        // One dominant weight and many tiny ones: after the dominant
        // position is zeroed, every later draw must land elsewhere.
        let mut weights = vec![1e-9; 40];
        weights[3] = 1e9;
        weights[11] = 0.0;
        for seed in 0..20 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let picked = without_replacement(&mut rng, &weights, 40).unwrap();
            assert_eq!(picked.len(), 40);
            assert_eq!(picked[0], 3);
            assert_eq!(picked.iter().collect::<HashSet<_>>().len(), 40);
            assert_eq!(picked[39], 11);
        }
    }

    #[test]
    fn same_seed_same_draw() {
        let weights: Vec<f64> = (1..=30).map(f64::from).collect();
        let a = without_replacement(&mut ChaCha8Rng::seed_from_u64(9), &weights, 10).unwrap();
        let b = without_replacement(&mut ChaCha8Rng::seed_from_u64(9), &weights, 10).unwrap();
        assert_eq!(a, b);
    }
}
