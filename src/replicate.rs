use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Largest engine seed handed to a replicate.
pub const MAX_ENGINE_SEED: u64 = 6000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replicate {
    pub run_id: u32,
    pub seed: u64,
}

/// Engine seeds for every replicate, drawn up front from the base seed so all
/// workers derive the same plan.
#[derive(Debug, Clone)]
pub struct ReplicatePlan {
    replicates: Vec<Replicate>,
}

impl ReplicatePlan {
    pub fn new(base_seed: u64, replicates: u32) -> Self {
        let mut rng = StdRng::seed_from_u64(base_seed);
        let replicates = (0..replicates)
            .map(|run_id| Replicate {
                run_id,
                seed: rng.random_range(1..=MAX_ENGINE_SEED),
            })
            .collect();
        ReplicatePlan { replicates }
    }

    pub fn len(&self) -> usize {
        self.replicates.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Replicate> {
        self.replicates.iter()
    }

    /// Replicates assigned to `rank` when runs are dealt round-robin over
    /// `workers` processes.
    pub fn for_rank(&self, rank: usize, workers: usize) -> impl Iterator<Item = &Replicate> {
        let workers = workers.max(1);
        self.iter()
            .enumerate()
            .filter(move |(i, _)| i % workers == rank)
            .map(|(_, r)| r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_base_seed_gives_same_plan() {
        let a = ReplicatePlan::new(2903, 20);
        let b = ReplicatePlan::new(2903, 20);
        assert_eq!(a.iter().collect::<Vec<_>>(), b.iter().collect::<Vec<_>>());
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn seeds_stay_in_engine_range() {
        let plan = ReplicatePlan::new(7, 500);
        assert!(plan.iter().all(|r| (1..=MAX_ENGINE_SEED).contains(&r.seed)));
        let ids: Vec<u32> = plan.iter().map(|r| r.run_id).collect();
        assert_eq!(ids, (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn ranks_cover_every_replicate_once() {
        let plan = ReplicatePlan::new(1, 10);
        let mut seen: Vec<u32> = (0..3).flat_map(|rank| plan.for_rank(rank, 3).map(|r| r.run_id)).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert_eq!(plan.for_rank(0, 3).count(), 4);
    }
}
