use keyhub::balancer::Balancer;
use keyhub::storage::{ApiKey, KeyStatus, LoadBalanceStrategy};

fn key(id: &str, priority: i64, weight: i64, error_count: i64, total_requests: i64) -> ApiKey {
    ApiKey {
        id: id.to_string(),
        channel_id: "ch".to_string(),
        key: format!("sk-{id}-0123456789"),
        key_masked: "sk-x****xxxx".to_string(),
        alias: None,
        status: KeyStatus::Active,
        priority,
        weight,
        balance: None,
        last_checked_ms: None,
        last_used_ms: None,
        error_count,
        total_requests,
        created_at_ms: 0,
        updated_at_ms: 0,
    }
}

#[test]
fn empty_input_yields_none() {
    let balancer = Balancer::new();
    for strategy in [
        LoadBalanceStrategy::RoundRobin,
        LoadBalanceStrategy::Weighted,
        LoadBalanceStrategy::Priority,
        LoadBalanceStrategy::LeastUsed,
    ] {
        assert!(balancer.pick(&[], strategy, "ch").is_none());
    }
}

#[test]
fn round_robin_rotates_in_order() {
    let balancer = Balancer::new();
    let keys = vec![
        key("a", 50, 50, 0, 0),
        key("b", 50, 50, 0, 0),
        key("c", 50, 50, 0, 0),
    ];

    let picked: Vec<String> = (0..6)
        .map(|_| {
            balancer
                .pick(&keys, LoadBalanceStrategy::RoundRobin, "ch")
                .expect("pick")
                .id
                .clone()
        })
        .collect();
    assert_eq!(picked, ["a", "b", "c", "a", "b", "c"]);
}

#[test]
fn round_robin_cursor_is_per_channel() {
    let balancer = Balancer::new();
    let keys = vec![key("a", 50, 50, 0, 0), key("b", 50, 50, 0, 0)];

    let first = balancer
        .pick(&keys, LoadBalanceStrategy::RoundRobin, "ch-1")
        .expect("pick");
    assert_eq!(first.id, "a");
    let other = balancer
        .pick(&keys, LoadBalanceStrategy::RoundRobin, "ch-2")
        .expect("pick");
    assert_eq!(other.id, "a");
    let second = balancer
        .pick(&keys, LoadBalanceStrategy::RoundRobin, "ch-1")
        .expect("pick");
    assert_eq!(second.id, "b");
}

#[test]
fn round_robin_survives_key_list_shrink() {
    let balancer = Balancer::new();
    let keys = vec![
        key("a", 50, 50, 0, 0),
        key("b", 50, 50, 0, 0),
        key("c", 50, 50, 0, 0),
    ];
    for _ in 0..4 {
        balancer.pick(&keys, LoadBalanceStrategy::RoundRobin, "ch");
    }
    // cursor is reinterpreted modulo the new length
    let shrunk = vec![key("a", 50, 50, 0, 0), key("b", 50, 50, 0, 0)];
    assert!(
        balancer
            .pick(&shrunk, LoadBalanceStrategy::RoundRobin, "ch")
            .is_some()
    );
}

#[test]
fn priority_highest_wins_then_fewest_errors_then_order() {
    let balancer = Balancer::new();

    let keys = vec![
        key("k1", 80, 50, 3, 0),
        key("k2", 80, 50, 0, 0),
        key("k3", 60, 50, 0, 0),
    ];
    let picked = balancer
        .pick(&keys, LoadBalanceStrategy::Priority, "ch")
        .expect("pick");
    assert_eq!(picked.id, "k2");

    // full tie falls back to original order
    let tied = vec![key("k1", 80, 50, 1, 0), key("k2", 80, 50, 1, 0)];
    let picked = balancer
        .pick(&tied, LoadBalanceStrategy::Priority, "ch")
        .expect("pick");
    assert_eq!(picked.id, "k1");
}

#[test]
fn least_used_picks_lowest_total_requests() {
    let balancer = Balancer::new();
    let keys = vec![
        key("k1", 50, 50, 0, 10),
        key("k2", 50, 50, 0, 3),
        key("k3", 50, 50, 0, 3),
    ];
    let picked = balancer
        .pick(&keys, LoadBalanceStrategy::LeastUsed, "ch")
        .expect("pick");
    assert_eq!(picked.id, "k2");
}

#[test]
fn weighted_follows_weights_roughly() {
    let balancer = Balancer::new();
    let keys = vec![
        key("k1", 50, 1, 0, 0),
        key("k2", 50, 1, 0, 0),
        key("k3", 50, 2, 0, 0),
    ];

    let n = 4000;
    let mut counts = std::collections::HashMap::<String, usize>::new();
    for _ in 0..n {
        let picked = balancer
            .pick(&keys, LoadBalanceStrategy::Weighted, "ch")
            .expect("pick");
        *counts.entry(picked.id.clone()).or_default() += 1;
    }

    let share = |id: &str| counts.get(id).copied().unwrap_or(0) as f64 / n as f64;
    assert!((share("k1") - 0.25).abs() < 0.05, "k1 share {}", share("k1"));
    assert!((share("k2") - 0.25).abs() < 0.05, "k2 share {}", share("k2"));
    assert!((share("k3") - 0.50).abs() < 0.05, "k3 share {}", share("k3"));
}

#[test]
fn weighted_zero_total_degenerates_to_uniform() {
    let balancer = Balancer::new();
    let keys = vec![key("k1", 50, 0, 0, 0), key("k2", 50, 0, 0, 0)];
    let mut seen = std::collections::HashSet::new();
    for _ in 0..200 {
        let picked = balancer
            .pick(&keys, LoadBalanceStrategy::Weighted, "ch")
            .expect("pick");
        seen.insert(picked.id.clone());
    }
    assert_eq!(seen.len(), 2);
}
