//! Property-Based Tests for the Tiered Cache
//!
//! Drives the engine with random operation sequences and checks the
//! cross-tier invariants after every step.
//!
//! # Test Properties
//!
//! 1. **Recency Bound**: at most K entries hold a recent handle, and the
//!    recency index tracks exactly those entries
//! 2. **Accounting**: accesses == hard + soft + weak + misses
//! 3. **Pinning**: a strongly held table is never reclaimed
//! 4. **Invalidation**: an invalidated key stays absent until the next put

#![cfg(test)]

use proptest::prelude::*;

use super::engine::{CacheConfig, CacheEngine};
use super::entry::{CacheKey, CachedBuffer, RetentionTier};
use super::reclaim::Pressure;

// =============================================================================
// Model
// =============================================================================

const KEY_SPACE: usize = 12;

struct Persisted(CacheKey);

impl CachedBuffer for Persisted {
    fn cache_key(&self) -> &CacheKey {
        &self.0
    }

    fn is_durably_persisted(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
enum Op {
    Put(usize),
    Get(usize),
    GetSilent(usize),
    Clear(usize),
    Invalidate(usize),
    Reclaim(Option<usize>),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..KEY_SPACE).prop_map(Op::Put),
        4 => (0..KEY_SPACE).prop_map(Op::Get),
        1 => (0..KEY_SPACE).prop_map(Op::GetSilent),
        2 => (0..KEY_SPACE).prop_map(Op::Clear),
        1 => (0..KEY_SPACE).prop_map(Op::Invalidate),
        1 => prop::option::of(0usize..4).prop_map(Op::Reclaim),
    ]
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(), 1..200)
}

// =============================================================================
// Invariant Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: recency membership, accounting and pinning hold after every step.
    #[test]
    fn prop_invariants_hold(capacity in 1usize..6, ops in ops_strategy()) {
        let engine = CacheEngine::with_config(CacheConfig {
            recency_capacity: capacity,
            ..Default::default()
        })?;
        let reclaimer = engine.reclaimer();
        let buffers: Vec<_> = (0..KEY_SPACE)
            .map(|i| Persisted(CacheKey::new(format!("k{i}"))))
            .collect();
        let mut invalidated = [false; KEY_SPACE];
        let mut ever_put = [false; KEY_SPACE];

        for op in ops {
            match op {
                Op::Put(i) => {
                    engine.put(&buffers[i].0, vec![i]);
                    invalidated[i] = false;
                    ever_put[i] = true;
                }
                Op::Get(i) => {
                    let lookup = engine.lookup(&buffers[i].0);
                    if let Some(payload) = &lookup.payload {
                        prop_assert_eq!(payload.rows(), &[i][..]);
                    }
                    prop_assert_eq!(lookup.payload.is_some(), lookup.outcome.is_hit());
                }
                Op::GetSilent(i) => {
                    let before = engine.statistics();
                    let payload = engine.get_silent(&buffers[i].0);
                    prop_assert_eq!(payload.is_some(), engine.contains(&buffers[i].0));
                    let after = engine.statistics();
                    prop_assert_eq!(before.accesses, after.accesses);
                }
                Op::Clear(i) => engine.clear_for_reclaim(&buffers[i]),
                Op::Invalidate(i) => {
                    engine.invalidate(&buffers[i].0);
                    invalidated[i] = true;
                }
                Op::Reclaim(bound) => {
                    let pressure = bound.map_or(Pressure::Full, Pressure::Bounded);
                    reclaimer.reclaim(pressure);
                }
            }

            let occupancy = engine.occupancy();
            prop_assert!(occupancy.recent <= capacity);
            prop_assert!(engine.recency_in_step());

            let stats = engine.statistics();
            prop_assert!(stats.is_consistent());

            for (i, buffer) in buffers.iter().enumerate() {
                let tier = engine.tier(&buffer.0);
                if invalidated[i] || !ever_put[i] {
                    prop_assert_eq!(tier, RetentionTier::Absent);
                    prop_assert!(!engine.contains(&buffer.0));
                }
                if tier == RetentionTier::Strong {
                    prop_assert!(engine.contains(&buffer.0));
                }
            }
        }
    }

    /// Property: a table that was never cleared for reclaim always hard-hits.
    #[test]
    fn prop_pinned_tables_survive_pressure(
        keys in 1usize..20,
        passes in 1usize..5,
    ) {
        let engine = CacheEngine::with_config(CacheConfig {
            recency_capacity: 2,
            ..Default::default()
        })?;
        let reclaimer = engine.reclaimer();
        let keys: Vec<_> = (0..keys).map(|i| CacheKey::new(format!("pinned-{i}"))).collect();
        for (i, key) in keys.iter().enumerate() {
            engine.put(key, vec![i]);
        }

        for _ in 0..passes {
            prop_assert_eq!(reclaimer.reclaim(Pressure::Full).total(), 0);
        }
        for key in &keys {
            prop_assert!(engine.get(key).is_some());
        }
        let stats = engine.statistics();
        prop_assert_eq!(stats.hard_hits, keys.len() as u64);
        prop_assert_eq!(stats.tables_reclaimed, 0);
    }
}
