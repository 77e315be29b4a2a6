//! Dataset (C6): oracle-generated training samples and minibatch
//! construction, grounded on `Util.h`'s `get_minibatch`.

use rand::seq::SliceRandom;
use rand::Rng;

/// One training sample: a fixed-length feature vector and a per-action
/// mask (`+1` gold, `0` other applicable, `-1` inapplicable/excluded).
#[derive(Debug, Clone)]
pub struct Sample {
    pub features: Vec<u32>,
    pub mask: Vec<i8>,
    pub gold_action: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub samples: Vec<Sample>,
}

impl Dataset {
    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Draws a random minibatch of `size` sample indices without
    /// replacement when the dataset is at least that large, with
    /// replacement otherwise. Seeded explicitly so identical seed + data
    /// reproduces identical minibatches (reproducibility law (b)).
    pub fn sample_minibatch(&self, size: usize, rng: &mut impl Rng) -> Vec<usize> {
        if self.samples.is_empty() {
            return Vec::new();
        }
        if size >= self.samples.len() {
            let mut all: Vec<usize> = (0..self.samples.len()).collect();
            all.shuffle(rng);
            return all;
        }
        let mut idx: Vec<usize> = (0..self.samples.len()).collect();
        idx.shuffle(rng);
        idx.truncate(size);
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn minibatch_sampling_is_seed_deterministic() {
        let mut ds = Dataset::default();
        for i in 0..10 {
            ds.push(Sample {
                features: vec![i as u32],
                mask: vec![1],
                gold_action: 0,
            });
        }
        let mut rng1 = ChaCha8Rng::seed_from_u64(42);
        let mut rng2 = ChaCha8Rng::seed_from_u64(42);
        let a = ds.sample_minibatch(5, &mut rng1);
        let b = ds.sample_minibatch(5, &mut rng2);
        assert_eq!(a, b);
    }
}
