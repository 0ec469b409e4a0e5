use std::{
    cell::{Cell, UnsafeCell},
    fmt,
};

use rand::{Rng as _, SeedableRng as _};
use rand_xoshiro::Xoshiro256StarStar;
use tracing::{error, trace};

use crate::{
    encoder::WireEncoder,
    message::{EffectiveTags, MetricMessage, Tag},
    policy::{ErrorAction, ErrorPolicy, PublishError},
    telemetry::{Telemetry, TelemetrySnapshot},
    transport::{Transport, UdpTransport},
};

/// Initial size of each thread's scratch buffer: the conventional safe payload size for a single UDP packet.
pub(crate) const SAFE_UDP_PACKET_SIZE: usize = 512;

const DEFAULT_SAMPLE_RATE: f64 = 1.0;

thread_local! {
    static SCRATCH: Cell<Vec<u8>> = const { Cell::new(Vec::new()) };

    static FAST_RNG: UnsafeCell<Xoshiro256StarStar> = {
        UnsafeCell::new(Xoshiro256StarStar::from_rng(&mut rand::rng()))
    };
}

/// Draws a value from `[0, 1)` using this thread's generator.
fn fast_random() -> f64 {
    FAST_RNG.with(|rng| {
        // SAFETY: We know it's safe to take a mutable reference since we're getting a pointer to a thread-local value,
        // and the reference never outlives the closure executing on this thread.
        let rng = unsafe { &mut *rng.get() };
        rng.random::<f64>()
    })
}

/// Runs `f` with this thread's scratch buffer, keeping whatever buffer `f` leaves behind for the next call.
///
/// The buffer is moved out of thread-local storage for the duration of `f`, so a transport that publishes from
/// within `send` gets a fresh buffer instead of aliasing the one in use.
fn with_scratch<R>(f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
    let mut buf = SCRATCH.try_with(Cell::take).unwrap_or_default();
    if buf.is_empty() {
        buf = vec![0; SAFE_UDP_PACKET_SIZE];
    }

    let result = f(&mut buf);

    // Thread-local storage can already be gone if we're called during thread teardown, and then there's nothing
    // worth caching the buffer for.
    let _ = SCRATCH.try_with(move |scratch| scratch.set(buf));

    result
}

/// Returns `true` if a metric should be sent given its sample rate.
fn should_send(sample_rate: f64) -> bool {
    sample_rate >= DEFAULT_SAMPLE_RATE || fast_random() < sample_rate
}

/// Publishes counters, gauges and timers.
///
/// Calls return `Ok(())` unless the publisher's error policy chooses to propagate an error.
pub trait Publisher {
    /// Publishes a counter increment of `value` for `bucket`.
    ///
    /// # Errors
    ///
    /// If publishing fails and the error policy propagates it, the error is returned.
    fn increment(&self, value: i64, sample_rate: f64, bucket: &str, tags: &[Tag]) -> Result<(), PublishError>;

    /// Publishes a gauge of `value` for `bucket`.
    ///
    /// # Errors
    ///
    /// If publishing fails and the error policy propagates it, the error is returned.
    fn gauge(&self, value: f64, bucket: &str, tags: &[Tag]) -> Result<(), PublishError>;

    /// Publishes a timing of `duration_ms` milliseconds for `bucket`.
    ///
    /// # Errors
    ///
    /// If publishing fails and the error policy propagates it, the error is returned.
    fn timing(&self, duration_ms: i64, sample_rate: f64, bucket: &str, tags: &[Tag]) -> Result<(), PublishError>;
}

// Blanket implementations.
macro_rules! impl_publisher {
    ($inner_ty:ident, $ptr_ty:ty) => {
        impl<$inner_ty> Publisher for $ptr_ty
        where
            $inner_ty: Publisher + ?Sized,
        {
            fn increment(&self, value: i64, sample_rate: f64, bucket: &str, tags: &[Tag]) -> Result<(), PublishError> {
                std::ops::Deref::deref(self).increment(value, sample_rate, bucket, tags)
            }

            fn gauge(&self, value: f64, bucket: &str, tags: &[Tag]) -> Result<(), PublishError> {
                std::ops::Deref::deref(self).gauge(value, bucket, tags)
            }

            fn timing(
                &self,
                duration_ms: i64,
                sample_rate: f64,
                bucket: &str,
                tags: &[Tag],
            ) -> Result<(), PublishError> {
                std::ops::Deref::deref(self).timing(duration_ms, sample_rate, bucket, tags)
            }
        }
    };
}

impl_publisher!(P, &P);
impl_publisher!(P, Box<P>);
impl_publisher!(P, std::sync::Arc<P>);

/// A publisher that encodes metrics into per-thread buffers and sends them over a [`Transport`].
///
/// Each calling thread keeps its own scratch buffer and random number generator, so the publishing path takes no
/// locks. Metrics that don't fit in the scratch buffer trigger a single resize to a size guaranteed to fit, and the
/// larger buffer is kept for that thread's later calls.
///
/// Every failure is handed to the configured [`ErrorPolicy`], which by default swallows it.
pub struct StatsDPublisher<T = UdpTransport> {
    encoder: WireEncoder,
    transport: T,
    default_tags: Vec<Tag>,
    error_policy: Box<dyn ErrorPolicy>,
    telemetry: Telemetry,
}

impl<T> StatsDPublisher<T>
where
    T: Transport,
{
    pub(crate) fn new(
        encoder: WireEncoder,
        transport: T,
        default_tags: Vec<Tag>,
        error_policy: Box<dyn ErrorPolicy>,
    ) -> Self {
        Self { encoder, transport, default_tags, error_policy, telemetry: Telemetry::default() }
    }

    /// Returns the transport payloads are sent through.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the tags added to every metric.
    pub fn default_tags(&self) -> &[Tag] {
        &self.default_tags
    }

    /// Returns a snapshot of the publisher's telemetry.
    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    fn publish(&self, message: &MetricMessage<'_>, sample_rate: f64, call_tags: &[Tag]) -> Result<(), PublishError> {
        let tags = EffectiveTags::new(call_tags, &self.default_tags);

        if message.bucket().is_empty() {
            return Ok(());
        }

        if !should_send(sample_rate) {
            self.telemetry.track_sampled_out();
            return Ok(());
        }

        match self.encode_and_send(message, sample_rate, &tags) {
            Ok(()) => Ok(()),
            Err(e) => self.handle_error(e),
        }
    }

    fn encode_and_send(
        &self,
        message: &MetricMessage<'_>,
        sample_rate: f64,
        tags: &EffectiveTags<'_>,
    ) -> Result<(), PublishError> {
        with_scratch(|buf| {
            let written = match self.encoder.try_format(message, sample_rate, tags, buf) {
                Some(written) => written,
                None => {
                    let required = self.encoder.max_required_size(message, tags);
                    trace!(bucket = message.bucket(), current = buf.len(), required, "Growing scratch buffer.");

                    *buf = vec![0; required];
                    self.encoder.try_format(message, sample_rate, tags, buf).ok_or_else(|| {
                        PublishError::EncodingInvariant { bucket: message.bucket().to_string(), required }
                    })?
                }
            };

            match self.transport.send(&buf[..written]) {
                Ok(()) => {
                    self.telemetry.track_packet_send_succeeded(written);
                    Ok(())
                }
                Err(e) => {
                    self.telemetry.track_packet_send_failed(written);
                    Err(PublishError::Transport(e))
                }
            }
        })
    }

    fn handle_error(&self, error: PublishError) -> Result<(), PublishError> {
        if error.is_fatal() {
            error!(error = %error, "Metric encoding exceeded its own size bound.");
        }

        match self.error_policy.handle(&error) {
            ErrorAction::Swallow => {
                trace!(error = %error, "Swallowed publish error.");
                Ok(())
            }
            ErrorAction::Propagate => Err(error),
            ErrorAction::Abort => panic!("unrecoverable error while publishing metric: {error}"),
        }
    }
}

impl<T> Publisher for StatsDPublisher<T>
where
    T: Transport,
{
    fn increment(&self, value: i64, sample_rate: f64, bucket: &str, tags: &[Tag]) -> Result<(), PublishError> {
        self.publish(&MetricMessage::counter(value, bucket), sample_rate, tags)
    }

    fn gauge(&self, value: f64, bucket: &str, tags: &[Tag]) -> Result<(), PublishError> {
        self.publish(&MetricMessage::gauge(value, bucket), DEFAULT_SAMPLE_RATE, tags)
    }

    fn timing(&self, duration_ms: i64, sample_rate: f64, bucket: &str, tags: &[Tag]) -> Result<(), PublishError> {
        self.publish(&MetricMessage::timing(duration_ms, bucket), sample_rate, tags)
    }
}

impl<T> fmt::Debug for StatsDPublisher<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsDPublisher")
            .field("encoder", &self.encoder)
            .field("transport", &self.transport)
            .field("default_tags", &self.default_tags)
            .finish_non_exhaustive()
    }
}
