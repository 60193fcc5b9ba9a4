use rand::Rng as _;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::storage::{ApiKey, LoadBalanceStrategy};

/// Picks one key out of a pre-filtered active set. Round-robin cursors are
/// process-local and per-channel; they survive key-list edits by being
/// reinterpreted modulo the new length, and are lost on restart.
#[derive(Default)]
pub struct Balancer {
    cursors: Mutex<HashMap<String, u64>>,
}

impl Balancer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pick<'a>(
        &self,
        keys: &'a [ApiKey],
        strategy: LoadBalanceStrategy,
        channel_id: &str,
    ) -> Option<&'a ApiKey> {
        if keys.is_empty() {
            return None;
        }
        match strategy {
            LoadBalanceStrategy::RoundRobin => self.pick_round_robin(keys, channel_id),
            LoadBalanceStrategy::Weighted => Some(pick_weighted(keys)),
            LoadBalanceStrategy::Priority => Some(pick_priority(keys)),
            LoadBalanceStrategy::LeastUsed => Some(pick_least_used(keys)),
        }
    }

    fn pick_round_robin<'a>(&self, keys: &'a [ApiKey], channel_id: &str) -> Option<&'a ApiKey> {
        let mut cursors = self.cursors.lock().ok()?;
        let cursor = cursors.entry(channel_id.to_string()).or_insert(0);
        let idx = (*cursor % keys.len() as u64) as usize;
        *cursor = cursor.wrapping_add(1);
        Some(&keys[idx])
    }
}

fn pick_weighted(keys: &[ApiKey]) -> &ApiKey {
    let total: i64 = keys.iter().map(|k| k.weight.max(0)).sum();
    let mut rng = rand::thread_rng();
    if total <= 0 {
        return &keys[rng.gen_range(0..keys.len())];
    }
    let mut r = rng.gen_range(0..total);
    for key in keys {
        let w = key.weight.max(0);
        if r < w {
            return key;
        }
        r -= w;
    }
    // unreachable for total > 0, but keep the last key as a safe answer
    &keys[keys.len() - 1]
}

fn pick_priority(keys: &[ApiKey]) -> &ApiKey {
    let mut best = &keys[0];
    for key in &keys[1..] {
        if key.priority > best.priority
            || (key.priority == best.priority && key.error_count < best.error_count)
        {
            best = key;
        }
    }
    best
}

fn pick_least_used(keys: &[ApiKey]) -> &ApiKey {
    let mut best = &keys[0];
    for key in &keys[1..] {
        if key.total_requests < best.total_requests {
            best = key;
        }
    }
    best
}
