//! Integer search boxes.

use rand::Rng;

use crate::config::IntRange;

/// Cartesian product of inclusive integer intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSpace {
    dims: Vec<IntRange>,
}

impl SearchSpace {
    pub fn new(dims: Vec<IntRange>) -> Self {
        Self { dims }
    }

    pub fn dims(&self) -> &[IntRange] {
        &self.dims
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Number of distinct points, saturating at `u64::MAX`.
    pub fn cardinality(&self) -> u64 {
        self.dims
            .iter()
            .fold(1u64, |acc, d| acc.saturating_mul(d.len()))
    }

    /// Map a point onto `[0, 1]^d`. Degenerate intervals map to 0.5.
    pub fn to_unit(&self, point: &[i64]) -> Vec<f64> {
        self.dims
            .iter()
            .zip(point)
            .map(|(d, &v)| {
                if d.max == d.min {
                    0.5
                } else {
                    (v - d.min) as f64 / (d.max - d.min) as f64
                }
            })
            .collect()
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<i64> {
        self.dims
            .iter()
            .map(|d| rng.gen_range(d.min..=d.max))
            .collect()
    }

    /// Every point in lexicographic order.
    pub fn enumerate(&self) -> Vec<Vec<i64>> {
        let mut out: Vec<Vec<i64>> = vec![Vec::new()];
        for d in &self.dims {
            out = out
                .into_iter()
                .flat_map(|prefix| {
                    (d.min..=d.max).map(move |v| {
                        let mut p = prefix.clone();
                        p.push(v);
                        p
                    })
                })
                .collect();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn cardinality_and_enumeration() {
        let space = SearchSpace::new(vec![IntRange::new(2, 4), IntRange::new(5, 6)]);
        assert_eq!(space.cardinality(), 6);
        let all = space.enumerate();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0], vec![2, 5]);
        assert_eq!(all[5], vec![4, 6]);
    }

    #[test]
    fn unit_scaling() {
        let space = SearchSpace::new(vec![IntRange::new(5, 105), IntRange::new(7, 7)]);
        assert_eq!(space.to_unit(&[5, 7]), vec![0.0, 0.5]);
        assert_eq!(space.to_unit(&[55, 7]), vec![0.5, 0.5]);
        assert_eq!(space.to_unit(&[105, 7]), vec![1.0, 0.5]);
    }

    #[test]
    fn samples_stay_inside() {
        let space = SearchSpace::new(vec![IntRange::new(5, 500), IntRange::new(5, 500)]);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        for _ in 0..1000 {
            let p = space.sample(&mut rng);
            assert!(space.dims().iter().zip(&p).all(|(d, &v)| d.contains(v)));
        }
    }

    #[test]
    fn huge_boxes_saturate() {
        let space = SearchSpace::new(vec![IntRange::new(0, i64::MAX - 1); 3]);
        assert_eq!(space.cardinality(), u64::MAX);
    }
}
