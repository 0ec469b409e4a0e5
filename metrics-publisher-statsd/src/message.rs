use std::{borrow::Cow, iter::Chain, slice::Iter};

/// Kind of a published metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// A monotonic increment (`|c`).
    Counter,

    /// An instantaneous value (`|g`).
    Gauge,

    /// A duration sample, in milliseconds (`|ms`).
    Timing,
}

impl MetricKind {
    /// Returns the wire suffix for this kind, including the leading pipe.
    pub(crate) const fn as_bytes(self) -> &'static [u8] {
        match self {
            MetricKind::Counter => b"|c",
            MetricKind::Gauge => b"|g",
            MetricKind::Timing => b"|ms",
        }
    }
}

/// A single metric occurrence.
///
/// Messages are created per call, borrow their bucket name from the caller, and are discarded once encoded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MetricMessage<'a> {
    kind: MetricKind,
    bucket: &'a str,
    magnitude: f64,
}

impl<'a> MetricMessage<'a> {
    /// Creates a counter message.
    pub fn counter(value: i64, bucket: &'a str) -> Self {
        Self { kind: MetricKind::Counter, bucket, magnitude: value as f64 }
    }

    /// Creates a gauge message.
    pub const fn gauge(value: f64, bucket: &'a str) -> Self {
        Self { kind: MetricKind::Gauge, bucket, magnitude: value }
    }

    /// Creates a timing message from a duration in milliseconds.
    pub fn timing(duration_ms: i64, bucket: &'a str) -> Self {
        Self { kind: MetricKind::Timing, bucket, magnitude: duration_ms as f64 }
    }

    /// Returns the kind of the metric.
    pub const fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Returns the bucket name, without any configured prefix.
    pub const fn bucket(&self) -> &'a str {
        self.bucket
    }

    /// Returns the raw magnitude.
    pub const fn magnitude(&self) -> f64 {
        self.magnitude
    }
}

/// A key/value pair attached to a metric line.
///
/// Tags are not required to be unique: duplicates are written out as given.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Tag {
    key: Cow<'static, str>,
    value: Cow<'static, str>,
}

impl Tag {
    /// Creates a new `Tag`.
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<Cow<'static, str>>,
        V: Into<Cow<'static, str>>,
    {
        Self { key: key.into(), value: value.into() }
    }

    /// Creates a new `Tag` from static parts, usable in `const` contexts.
    pub const fn from_static_parts(key: &'static str, value: &'static str) -> Self {
        Self { key: Cow::Borrowed(key), value: Cow::Borrowed(value) }
    }

    /// Returns the tag key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the tag value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Length of the tag when written as `key:value`.
    pub(crate) fn encoded_len(&self) -> usize {
        self.key.len() + 1 + self.value.len()
    }
}

impl<K, V> From<(K, V)> for Tag
where
    K: Into<Cow<'static, str>>,
    V: Into<Cow<'static, str>>,
{
    fn from((key, value): (K, V)) -> Self {
        Self::new(key, value)
    }
}

/// The tags written for a single call: the call's own tags, in order, followed by the publisher defaults.
///
/// This is a borrowed view over both lists, so building it never allocates.
#[derive(Clone, Copy, Debug)]
pub struct EffectiveTags<'a> {
    call: &'a [Tag],
    defaults: &'a [Tag],
}

impl<'a> EffectiveTags<'a> {
    /// Creates the effective tag sequence from call-supplied and default tags.
    pub const fn new(call: &'a [Tag], defaults: &'a [Tag]) -> Self {
        Self { call, defaults }
    }

    /// An empty tag sequence.
    pub const fn empty() -> Self {
        Self { call: &[], defaults: &[] }
    }

    /// Returns `true` if there are no tags to write.
    pub fn is_empty(&self) -> bool {
        self.call.is_empty() && self.defaults.is_empty()
    }

    /// Returns the number of tags in the sequence.
    pub fn len(&self) -> usize {
        self.call.len() + self.defaults.len()
    }

    /// Iterates over the tags in write order.
    pub fn iter(&self) -> Chain<Iter<'a, Tag>, Iter<'a, Tag>> {
        self.call.iter().chain(self.defaults.iter())
    }

    /// Length of the tag segment (`|#k:v,...`) on the wire, or zero when there are no tags.
    pub(crate) fn encoded_len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }

        let separators = self.len() - 1;
        2 + separators + self.iter().map(Tag::encoded_len).sum::<usize>()
    }
}
