//! Plan de batches: orden de posiciones por época, shuffle y truncado.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::RunOptions;

/// Batch planificado: posiciones a pedir al `DataSource`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBatch {
    /// Índice global dentro del run.
    pub index: usize,
    pub epoch: usize,
    pub positions: Vec<usize>,
}

/// Iterador de batches para un run.
///
/// Con `drop_last` cada época produce `len / batch_size` batches completos;
/// sin él, `ceil(len / batch_size)` con el último posiblemente parcial. El
/// iterador termina al agotar las épocas o al alcanzar `n_iters`.
#[derive(Debug)]
pub struct BatchPlan {
    len: usize,
    batch_size: usize,
    drop_last: bool,
    n_epochs: Option<usize>,
    n_iters: Option<usize>,
    rng: Option<StdRng>,
    order: Vec<usize>,
    epoch: usize,
    cursor: usize,
    emitted: usize,
    done: bool,
}

impl BatchPlan {
    pub fn new(len: usize, options: &RunOptions) -> Self {
        let rng = options.shuffle.then(|| match options.seed {
                                         Some(seed) => StdRng::seed_from_u64(seed),
                                         None => StdRng::from_entropy(),
                                     });
        let mut plan = Self { len,
                              batch_size: options.batch_size.max(1),
                              drop_last: options.drop_last,
                              n_epochs: options.n_epochs,
                              n_iters: options.n_iters,
                              rng,
                              order: (0..len).collect(),
                              epoch: 0,
                              cursor: 0,
                              emitted: 0,
                              done: false };
        plan.reshuffle();
        plan
    }

    pub fn batches_per_epoch(&self) -> usize {
        if self.drop_last {
            self.len / self.batch_size
        } else {
            self.len.div_ceil(self.batch_size)
        }
    }

    /// Total de batches si el plan está acotado.
    pub fn total_batches(&self) -> Option<usize> {
        let per_epoch = self.batches_per_epoch();
        if per_epoch == 0 {
            return Some(0);
        }
        // Un producto que desborda se trata como plan ilimitado.
        match (self.n_epochs.and_then(|e| e.checked_mul(per_epoch)), self.n_iters) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        }
    }

    fn reshuffle(&mut self) {
        if let Some(rng) = self.rng.as_mut() {
            self.order.shuffle(rng);
        }
    }

    fn epoch_exhausted(&self) -> bool {
        let remaining = self.len - self.cursor;
        remaining == 0 || (self.drop_last && remaining < self.batch_size)
    }
}

impl Iterator for BatchPlan {
    type Item = PlannedBatch;

    fn next(&mut self) -> Option<PlannedBatch> {
        if self.done || self.n_iters.is_some_and(|n| self.emitted >= n) || self.batches_per_epoch() == 0 {
            self.done = true;
            return None;
        }
        if self.epoch_exhausted() {
            self.epoch += 1;
            if self.n_epochs.is_some_and(|n| self.epoch >= n) {
                self.done = true;
                return None;
            }
            self.cursor = 0;
            self.reshuffle();
        }
        let end = (self.cursor + self.batch_size).min(self.len);
        let batch = PlannedBatch { index: self.emitted,
                                   epoch: self.epoch,
                                   positions: self.order[self.cursor..end].to_vec() };
        self.cursor = end;
        self.emitted += 1;
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(plan: BatchPlan) -> Vec<usize> {
        plan.map(|b| b.positions.len()).collect()
    }

    #[test]
    fn drop_last_yields_only_full_batches() {
        let plan = BatchPlan::new(1000, &RunOptions::new(64).drop_last(true));
        assert_eq!(plan.total_batches(), Some(15));
        let s = sizes(plan);
        assert_eq!(s.len(), 15);
        assert_eq!(s.iter().sum::<usize>(), 960);
    }

    #[test]
    fn keeps_partial_batch_without_drop_last() {
        let s = sizes(BatchPlan::new(10, &RunOptions::new(4).n_epochs(2)));
        assert_eq!(s, vec![4, 4, 2, 4, 4, 2]);
    }

    #[test]
    fn n_iters_caps_unbounded_epochs() {
        let plan = BatchPlan::new(5, &RunOptions::new(2).unbounded_epochs().n_iters(7));
        let batches: Vec<_> = plan.collect();
        assert_eq!(batches.len(), 7);
        assert_eq!(batches[6].epoch, 2);
        assert_eq!(batches[6].index, 6);
    }

    #[test]
    fn seeded_shuffle_is_a_permutation_and_reproducible() {
        let opts = RunOptions::new(3).shuffle(true).seed(11);
        let a: Vec<usize> = BatchPlan::new(9, &opts).flat_map(|b| b.positions).collect();
        let b: Vec<usize> = BatchPlan::new(9, &opts).flat_map(|b| b.positions).collect();
        assert_eq!(a, b);
        let mut sorted = a.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn huge_epoch_count_does_not_overflow_total() {
        let capped = BatchPlan::new(10, &RunOptions::new(3).n_epochs(usize::MAX).n_iters(2));
        assert_eq!(capped.total_batches(), Some(2));
        assert_eq!(capped.count(), 2);
        let uncapped = BatchPlan::new(10, &RunOptions::new(3).n_epochs(usize::MAX));
        assert_eq!(uncapped.total_batches(), None);
    }

    #[test]
    fn empty_source_and_oversized_drop_last_end_immediately() {
        assert_eq!(BatchPlan::new(0, &RunOptions::new(4).unbounded_epochs()).count(), 0);
        assert_eq!(BatchPlan::new(3, &RunOptions::new(4).drop_last(true)).count(), 0);
    }
}
