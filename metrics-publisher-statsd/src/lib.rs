//! A low-overhead publisher for sending metrics to a [StatsD][statsd]-compatible server over UDP.
//!
//! [statsd]: https://github.com/statsd/statsd/blob/master/docs/metric_types.md
//!
//! # Usage
//!
//! ```no_run
//! # use metrics_publisher_statsd::{Publisher, StatsDBuilder, Tag};
//! // First, create a builder.
//! //
//! // The builder can configure the remote server, a prefix for every bucket name, tags added to every metric, and what
//! // happens when publishing fails.
//! let publisher = StatsDBuilder::default()
//!     .with_host("statsd.internal")
//!     .with_prefix("checkout")
//!     .with_tag("env", "production")
//!     .build()
//!     .expect("failed to build publisher");
//!
//! // Each call encodes one metric and sends it as a single datagram.
//! publisher.increment(1, 1.0, "orders.placed", &[Tag::new("region", "eu")])?;
//! publisher.gauge(12.5, "basket.average_items", &[])?;
//! publisher.timing(42, 0.1, "payment.latency", &[])?;
//! # Ok::<(), metrics_publisher_statsd::PublishError>(())
//! ```
//!
//! # Wire format
//!
//! Each metric is written as a single line, with no trailing newline:
//!
//! ```text
//! <prefix.><bucket>:<value>|<kind>[|@<sample rate>][|#<key>:<value>,<key>:<value>,...]
//! ```
//!
//! Counters are written with a kind of `c`, timings with `ms`, and gauges with `g`. Gauges are written as integers when
//! they hold an integral value, and as the shortest decimal that reads back as the same value otherwise. The sample
//! rate is only written when it's between zero and one, exclusive. Tags given to a call are written first, followed by
//! the publisher's default tags.
//!
//! Tags are always introduced by `|#`, as DogStatsD and most StatsD servers with tag support expect. Some older
//! clients write the tag segment as a bare `#key:value` without the leading pipe; that form is never produced here, so
//! servers that only accept it will not parse the tags.
//!
//! # Features
//!
//! ## No locks on the publishing path
//!
//! Metrics are encoded into a buffer owned by the calling thread, and sampling decisions are drawn from a random number
//! generator owned by the calling thread. Buffers start at 512 bytes and grow, once, to fit a larger metric when
//! needed. Sends go through a single UDP socket shared by every thread.
//!
//! ## DNS refresh
//!
//! When the server is addressed by hostname, the publisher can re-resolve it periodically in a background thread, so
//! that a server moving to a new address is picked up without restarting. A failed lookup keeps the last address that
//! resolved.
//!
//! ## Error policy
//!
//! Instrumentation should never take down the program it instruments, so by default every error raised while
//! publishing is swallowed. An [`ErrorPolicy`] can instead propagate errors to the caller, or abort on them.
//!
//! ## Telemetry
//!
//! The publisher tracks how many payloads and bytes were sent or dropped, and how many metrics were skipped by
//! sampling. See [`StatsDPublisher::telemetry`].

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{BuildError, StatsDBuilder, DEFAULT_PORT};

mod encoder;
pub use self::encoder::WireEncoder;

mod endpoint;
pub use self::endpoint::{EndpointError, EndpointResolver, HostResolver, SystemResolver};

mod legacy;
pub use self::legacy::LegacyPublisher;

mod message;
pub use self::message::{EffectiveTags, MetricKind, MetricMessage, Tag};

mod policy;
pub use self::policy::{ErrorAction, ErrorPolicy, PropagateErrors, PublishError, SwallowErrors};

mod publisher;
pub use self::publisher::{Publisher, StatsDPublisher};

mod telemetry;
pub use self::telemetry::TelemetrySnapshot;

mod transport;
pub use self::transport::{Transport, UdpTransport};
