use std::time::{Duration, Instant};

use crate::{policy::PublishError, publisher::Publisher};

const NANOS_PER_MILLI: u128 = 1_000_000;
const HALF_MILLI_NANOS: u128 = NANOS_PER_MILLI / 2;

/// Converts a duration to whole milliseconds, rounding half to even and saturating at `i64::MAX`.
fn duration_to_millis(duration: Duration) -> i64 {
    let nanos = duration.as_nanos();
    let mut millis = nanos / NANOS_PER_MILLI;
    let remainder = nanos % NANOS_PER_MILLI;
    if remainder > HALF_MILLI_NANOS || (remainder == HALF_MILLI_NANOS && millis % 2 == 1) {
        millis += 1;
    }

    i64::try_from(millis).unwrap_or(i64::MAX)
}

/// Convenience methods over a [`Publisher`].
///
/// `LegacyPublisher` covers the familiar shorthand of StatsD clients: default values and sample rates, decrements,
/// fanning a counter out to several buckets, and timings taken from [`Duration`] or [`Instant`]. No tags are attached
/// beyond the wrapped publisher's defaults.
///
/// Every method funnels into the wrapped publisher, so encoding, sampling and error handling behave exactly as they do
/// there.
#[derive(Clone, Debug)]
pub struct LegacyPublisher<P> {
    inner: P,
}

impl<P> LegacyPublisher<P>
where
    P: Publisher,
{
    /// Creates a new `LegacyPublisher` wrapping the given publisher.
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    /// Returns a reference to the wrapped publisher.
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Consumes the wrapper, returning the wrapped publisher.
    pub fn into_inner(self) -> P {
        self.inner
    }

    /// Increments a counter by one.
    ///
    /// # Errors
    ///
    /// If the wrapped publisher returns an error, it is returned.
    pub fn increment_one(&self, bucket: &str) -> Result<(), PublishError> {
        self.increment_by(1, bucket)
    }

    /// Increments a counter by `value`.
    ///
    /// # Errors
    ///
    /// If the wrapped publisher returns an error, it is returned.
    pub fn increment_by(&self, value: i64, bucket: &str) -> Result<(), PublishError> {
        self.increment_sampled(value, 1.0, bucket)
    }

    /// Increments a counter by `value`, sampled at `sample_rate`.
    ///
    /// # Errors
    ///
    /// If the wrapped publisher returns an error, it is returned.
    pub fn increment_sampled(&self, value: i64, sample_rate: f64, bucket: &str) -> Result<(), PublishError> {
        self.inner.increment(value, sample_rate, bucket, &[])
    }

    /// Increments each of the given counters by `value`, sampled at `sample_rate`.
    ///
    /// Empty bucket names are skipped. Each bucket is sampled independently.
    ///
    /// # Errors
    ///
    /// If the wrapped publisher returns an error, it is returned and the remaining buckets are not published.
    pub fn increment_many<I, S>(&self, value: i64, sample_rate: f64, buckets: I) -> Result<(), PublishError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for bucket in buckets {
            let bucket = bucket.as_ref();
            if !bucket.is_empty() {
                self.increment_sampled(value, sample_rate, bucket)?;
            }
        }

        Ok(())
    }

    /// Decrements a counter by one.
    ///
    /// # Errors
    ///
    /// If the wrapped publisher returns an error, it is returned.
    pub fn decrement_one(&self, bucket: &str) -> Result<(), PublishError> {
        self.decrement_by(1, bucket)
    }

    /// Decrements a counter by `value`.
    ///
    /// # Errors
    ///
    /// If the wrapped publisher returns an error, it is returned.
    pub fn decrement_by(&self, value: i64, bucket: &str) -> Result<(), PublishError> {
        self.decrement_sampled(value, 1.0, bucket)
    }

    /// Decrements a counter by `value`, sampled at `sample_rate`.
    ///
    /// # Errors
    ///
    /// If the wrapped publisher returns an error, it is returned.
    pub fn decrement_sampled(&self, value: i64, sample_rate: f64, bucket: &str) -> Result<(), PublishError> {
        self.increment_sampled(value.saturating_neg(), sample_rate, bucket)
    }

    /// Decrements each of the given counters by `value`, sampled at `sample_rate`.
    ///
    /// Empty bucket names are skipped. Each bucket is sampled independently.
    ///
    /// # Errors
    ///
    /// If the wrapped publisher returns an error, it is returned and the remaining buckets are not published.
    pub fn decrement_many<I, S>(&self, value: i64, sample_rate: f64, buckets: I) -> Result<(), PublishError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.increment_many(value.saturating_neg(), sample_rate, buckets)
    }

    /// Sets a gauge.
    ///
    /// # Errors
    ///
    /// If the wrapped publisher returns an error, it is returned.
    pub fn gauge(&self, value: f64, bucket: &str) -> Result<(), PublishError> {
        self.inner.gauge(value, bucket, &[])
    }

    /// Sets a gauge from an integer value.
    ///
    /// Values beyond 2^53 in magnitude are rounded to the nearest representable `f64` before they are written.
    ///
    /// # Errors
    ///
    /// If the wrapped publisher returns an error, it is returned.
    pub fn gauge_integer(&self, value: i64, bucket: &str) -> Result<(), PublishError> {
        self.gauge(value as f64, bucket)
    }

    /// Records a timing of `duration_ms` milliseconds.
    ///
    /// # Errors
    ///
    /// If the wrapped publisher returns an error, it is returned.
    pub fn timing(&self, duration_ms: i64, bucket: &str) -> Result<(), PublishError> {
        self.timing_sampled(duration_ms, 1.0, bucket)
    }

    /// Records a timing of `duration_ms` milliseconds, sampled at `sample_rate`.
    ///
    /// # Errors
    ///
    /// If the wrapped publisher returns an error, it is returned.
    pub fn timing_sampled(&self, duration_ms: i64, sample_rate: f64, bucket: &str) -> Result<(), PublishError> {
        self.inner.timing(duration_ms, sample_rate, bucket, &[])
    }

    /// Records a timing from a [`Duration`], rounded to the nearest millisecond.
    ///
    /// Exact halves round to the even millisecond, so 2.5ms is recorded as 2ms and 3.5ms as 4ms.
    ///
    /// # Errors
    ///
    /// If the wrapped publisher returns an error, it is returned.
    pub fn timing_duration(&self, duration: Duration, bucket: &str) -> Result<(), PublishError> {
        self.timing_duration_sampled(duration, 1.0, bucket)
    }

    /// Records a timing from a [`Duration`], sampled at `sample_rate`.
    ///
    /// # Errors
    ///
    /// If the wrapped publisher returns an error, it is returned.
    pub fn timing_duration_sampled(
        &self,
        duration: Duration,
        sample_rate: f64,
        bucket: &str,
    ) -> Result<(), PublishError> {
        self.timing_sampled(duration_to_millis(duration), sample_rate, bucket)
    }

    /// Records the time elapsed since `start`.
    ///
    /// A `start` in the future records zero.
    ///
    /// # Errors
    ///
    /// If the wrapped publisher returns an error, it is returned.
    pub fn timing_since(&self, start: Instant, bucket: &str) -> Result<(), PublishError> {
        self.timing_duration(Instant::now().saturating_duration_since(start), bucket)
    }

    /// Marks that an event happened, by incrementing a counter named after it.
    ///
    /// # Errors
    ///
    /// If the wrapped publisher returns an error, it is returned.
    pub fn mark_event(&self, name: &str) -> Result<(), PublishError> {
        self.increment_one(name)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::Mutex,
        time::{Duration, Instant},
    };

    use super::{duration_to_millis, LegacyPublisher};
    use crate::{message::Tag, policy::PublishError, publisher::Publisher};

    #[derive(Debug, PartialEq)]
    enum Call {
        Increment(i64, f64, String),
        Gauge(f64, String),
        Timing(i64, f64, String),
    }

    #[derive(Default)]
    struct RecordingPublisher {
        calls: Mutex<Vec<Call>>,
        fail_on: Option<&'static str>,
    }

    impl RecordingPublisher {
        fn record(&self, bucket: &str, call: Call) -> Result<(), PublishError> {
            if self.fail_on == Some(bucket) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "nobody is listening").into());
            }

            self.calls.lock().unwrap().push(call);
            Ok(())
        }

        fn take(&self) -> Vec<Call> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }
    }

    impl Publisher for RecordingPublisher {
        fn increment(&self, value: i64, sample_rate: f64, bucket: &str, tags: &[Tag]) -> Result<(), PublishError> {
            assert!(tags.is_empty());
            self.record(bucket, Call::Increment(value, sample_rate, bucket.to_string()))
        }

        fn gauge(&self, value: f64, bucket: &str, tags: &[Tag]) -> Result<(), PublishError> {
            assert!(tags.is_empty());
            self.record(bucket, Call::Gauge(value, bucket.to_string()))
        }

        fn timing(&self, duration_ms: i64, sample_rate: f64, bucket: &str, tags: &[Tag]) -> Result<(), PublishError> {
            assert!(tags.is_empty());
            self.record(bucket, Call::Timing(duration_ms, sample_rate, bucket.to_string()))
        }
    }

    fn legacy() -> LegacyPublisher<RecordingPublisher> {
        LegacyPublisher::new(RecordingPublisher::default())
    }

    #[test]
    fn duration_rounding() {
        let cases = [
            (Duration::ZERO, 0),
            (Duration::from_micros(400), 0),
            (Duration::from_micros(500), 0),
            (Duration::from_micros(501), 1),
            (Duration::from_micros(1_500), 2),
            (Duration::from_micros(2_500), 2),
            (Duration::from_micros(3_500), 4),
            (Duration::from_millis(120), 120),
            (Duration::from_secs(2), 2_000),
            (Duration::MAX, i64::MAX),
        ];

        for (duration, expected) in cases {
            assert_eq!(duration_to_millis(duration), expected, "duration {duration:?}");
        }
    }

    #[test]
    fn counters() {
        let publisher = legacy();
        publisher.increment_one("a").unwrap();
        publisher.increment_by(5, "b").unwrap();
        publisher.increment_sampled(7, 0.25, "c").unwrap();
        publisher.mark_event("deployed").unwrap();

        assert_eq!(
            publisher.inner().take(),
            [
                Call::Increment(1, 1.0, "a".into()),
                Call::Increment(5, 1.0, "b".into()),
                Call::Increment(7, 0.25, "c".into()),
                Call::Increment(1, 1.0, "deployed".into()),
            ]
        );
    }

    #[test]
    fn decrements_negate() {
        let publisher = legacy();
        publisher.decrement_one("a").unwrap();
        publisher.decrement_by(5, "b").unwrap();
        publisher.decrement_sampled(7, 0.5, "c").unwrap();
        publisher.decrement_by(i64::MIN, "d").unwrap();

        assert_eq!(
            publisher.inner().take(),
            [
                Call::Increment(-1, 1.0, "a".into()),
                Call::Increment(-5, 1.0, "b".into()),
                Call::Increment(-7, 0.5, "c".into()),
                Call::Increment(i64::MAX, 1.0, "d".into()),
            ]
        );
    }

    #[test]
    fn fan_out_skips_empty_buckets() {
        let publisher = legacy();
        publisher.increment_many(2, 1.0, ["a", "", "b"]).unwrap();
        publisher.decrement_many(3, 0.5, vec![String::new(), "c".to_string()]).unwrap();
        publisher.increment_many(1, 1.0, Vec::<&str>::new()).unwrap();

        assert_eq!(
            publisher.inner().take(),
            [
                Call::Increment(2, 1.0, "a".into()),
                Call::Increment(2, 1.0, "b".into()),
                Call::Increment(-3, 0.5, "c".into()),
            ]
        );
    }

    #[test]
    fn fan_out_stops_at_first_error() {
        let publisher =
            LegacyPublisher::new(RecordingPublisher { fail_on: Some("b"), ..RecordingPublisher::default() });

        let result = publisher.increment_many(1, 1.0, ["a", "b", "c"]);
        assert!(matches!(result, Err(PublishError::Transport(_))));
        assert_eq!(publisher.inner().take(), [Call::Increment(1, 1.0, "a".into())]);
    }

    #[test]
    fn gauges_and_timings() {
        let publisher = legacy();
        publisher.gauge(3.5, "load").unwrap();
        publisher.timing(120, "db").unwrap();
        publisher.timing_sampled(80, 0.1, "db").unwrap();
        publisher.timing_duration(Duration::from_micros(2_500), "cache").unwrap();
        publisher.timing_duration_sampled(Duration::from_millis(9), 0.5, "cache").unwrap();

        assert_eq!(
            publisher.inner().take(),
            [
                Call::Gauge(3.5, "load".into()),
                Call::Timing(120, 1.0, "db".into()),
                Call::Timing(80, 0.1, "db".into()),
                Call::Timing(2, 1.0, "cache".into()),
                Call::Timing(9, 0.5, "cache".into()),
            ]
        );
    }

    #[test]
    fn integer_gauges() {
        let publisher = legacy();
        publisher.gauge_integer(42, "workers").unwrap();
        publisher.gauge_integer(-7, "balance").unwrap();

        assert_eq!(
            publisher.inner().take(),
            [Call::Gauge(42.0, "workers".into()), Call::Gauge(-7.0, "balance".into())]
        );
    }

    #[test]
    fn timing_since_measures_elapsed_time() {
        let publisher = legacy();
        let start = Instant::now() - Duration::from_millis(50);
        publisher.timing_since(start, "request").unwrap();

        match publisher.inner().take().as_slice() {
            [Call::Timing(ms, rate, bucket)] => {
                assert!(*ms >= 50, "elapsed was {ms}ms");
                assert!((rate - 1.0).abs() < f64::EPSILON);
                assert_eq!(bucket, "request");
            }
            calls => panic!("unexpected calls: {calls:?}"),
        }
    }

    #[test]
    fn works_through_shared_references() {
        let inner = RecordingPublisher::default();
        let publisher = LegacyPublisher::new(&inner);
        publisher.mark_event("shared").unwrap();

        assert_eq!(inner.take(), [Call::Increment(1, 1.0, "shared".into())]);
    }
}
