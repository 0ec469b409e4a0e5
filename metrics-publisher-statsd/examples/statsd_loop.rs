use std::time::{Duration, Instant};

use metrics_publisher_statsd::{LegacyPublisher, Publisher, StatsDBuilder, Tag};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

fn main() {
    tracing_subscriber::fmt::init();

    let publisher = StatsDBuilder::default()
        .with_host("localhost")
        .with_port(9125)
        .with_prefix("example")
        .with_tag("system", "foo")
        .with_dns_lookup_interval(Duration::from_secs(30))
        .with_error_predicate(|e| {
            tracing::warn!(error = %e, "Failed to publish metric.");
            true
        })
        .build()
        .expect("failed to build StatsD publisher");
    let legacy = LegacyPublisher::new(&publisher);

    legacy.mark_event("started").expect("failed to publish metric");

    let mut rng = Xoshiro256StarStar::from_rng(&mut rand::rng());

    // Loop over and over, pretending to do some work.
    loop {
        let start = Instant::now();
        std::thread::sleep(Duration::from_millis(rng.random_range(5..50)));

        let _ = publisher.increment(1, 1.0, "server_loops", &[]);
        let _ = publisher.gauge(rng.random_range(0.0..1.0), "load", &[Tag::new("core", "0")]);
        let _ = legacy.timing_since(start, "server_loop_delta");
        let _ = publisher.timing(rng.random_range(0..250), 0.5, "sampled_latency", &[]);
    }
}
