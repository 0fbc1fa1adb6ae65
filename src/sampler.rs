//! Sampler
//!
//! Seeded row sampling: random subsampling before fitting a new tree, and
//! exact-size splits of a calibration set into a fitting part and a
//! conformalizing part.
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

// A sampler can be used to subset the data prior to fitting a new tree,
// or to split a calibration set in two.
pub trait Sampler {
    /// Sample the data, returning a tuple, where the first item is the samples
    /// chosen, and the second are the samples excluded.
    fn sample(&mut self, rng: &mut StdRng, index: &[usize]) -> (Vec<usize>, Vec<usize>);
}

/// Keeps each row independently with probability `subsample`.
pub struct RandomSampler {
    subsample: f32,
}

impl RandomSampler {
    pub fn new(subsample: f32) -> Self {
        RandomSampler { subsample }
    }
}

impl Sampler for RandomSampler {
    fn sample(&mut self, rng: &mut StdRng, index: &[usize]) -> (Vec<usize>, Vec<usize>) {
        let subsample = self.subsample;
        let mut chosen = Vec::new();
        let mut excluded = Vec::new();
        for i in index {
            if rng.gen::<f32>() < subsample {
                chosen.push(*i);
            } else {
                excluded.push(*i)
            }
        }
        (chosen, excluded)
    }
}

/// Shuffles the rows and keeps exactly `floor(n * frac)` of them.
pub struct FractionSampler {
    frac: f64,
}

impl FractionSampler {
    pub fn new(frac: f64) -> Self {
        FractionSampler { frac }
    }

    /// Number of rows chosen out of `n`.
    pub fn n_chosen(&self, n: usize) -> usize {
        ((n as f64) * self.frac).floor() as usize
    }
}

impl Sampler for FractionSampler {
    fn sample(&mut self, rng: &mut StdRng, index: &[usize]) -> (Vec<usize>, Vec<usize>) {
        let mut shuffled = index.to_vec();
        shuffled.shuffle(rng);
        let excluded = shuffled.split_off(self.n_chosen(index.len()));
        (shuffled, excluded)
    }
}
