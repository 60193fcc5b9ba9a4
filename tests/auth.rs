use keyhub::server::RateLimiter;

#[test]
fn rate_limit_window_rejects_excess_and_resets() {
    let limiter = RateLimiter::new();
    let t0 = 1_000_000i64;

    // limit 2: the third request inside the window is rejected
    assert!(limiter.check("tok", 2, t0));
    assert!(limiter.check("tok", 2, t0 + 1_000));
    assert!(!limiter.check("tok", 2, t0 + 5_000));

    // still inside the same window
    assert!(!limiter.check("tok", 2, t0 + 59_000));

    // first request after reset_at is accepted again
    assert!(limiter.check("tok", 2, t0 + 60_000));
    assert!(limiter.check("tok", 2, t0 + 60_001));
    assert!(!limiter.check("tok", 2, t0 + 60_002));
}

#[test]
fn rate_limit_windows_are_per_token() {
    let limiter = RateLimiter::new();
    let t0 = 5_000_000i64;

    assert!(limiter.check("a", 1, t0));
    assert!(!limiter.check("a", 1, t0 + 1));
    // a different token has its own window
    assert!(limiter.check("b", 1, t0 + 2));
}
