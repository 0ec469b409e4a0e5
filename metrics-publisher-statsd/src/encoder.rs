use crate::message::{EffectiveTags, MetricKind, MetricMessage};

// Worst-case rendered length of a 64-bit magnitude or sample rate, with headroom.
const MAX_SERIALIZED_NUMBER_LEN: usize = 32;
const COLON_LEN: usize = 1;
const MAX_KIND_SUFFIX_LEN: usize = 3;
const SAMPLE_RATE_MARKER_LEN: usize = 2;

/// Cursor over a fixed-capacity destination buffer.
///
/// A write either lands in full or leaves the cursor where it was and reports `false`.
struct SliceWriter<'a> {
    buf: &'a mut [u8],
    written: usize,
}

impl<'a> SliceWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, written: 0 }
    }

    fn try_write_bytes(&mut self, bytes: &[u8]) -> bool {
        let end = self.written + bytes.len();
        match self.buf.get_mut(self.written..end) {
            Some(dst) => {
                dst.copy_from_slice(bytes);
                self.written = end;
                true
            }
            None => false,
        }
    }

    fn try_write_byte(&mut self, byte: u8) -> bool {
        self.try_write_bytes(&[byte])
    }

    fn try_write_integer(&mut self, value: i64) -> bool {
        let mut int_writer = itoa::Buffer::new();
        self.try_write_bytes(int_writer.format(value).as_bytes())
    }

    fn try_write_float(&mut self, value: f64) -> bool {
        let mut float_writer = ryu::Buffer::new();
        self.try_write_bytes(float_writer.format(value).as_bytes())
    }
}

/// Returns the value as an `i64` if it is integral and fits without saturating.
fn as_exact_integer(value: f64) -> Option<i64> {
    // `i64::MAX as f64` rounds up to 2^63, which is already out of range.
    if value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

/// Renders metric messages into the StatsD wire format.
///
/// The encoder writes into caller-owned buffers and never allocates. When the destination is too small, formatting
/// fails as a whole: no partial payload is ever reported as written. Callers can size a buffer that is guaranteed to
/// be large enough with [`max_required_size`][WireEncoder::max_required_size].
///
/// Payloads have the form `<prefix.><bucket>:<magnitude>|<kind>[|@<rate>][|#<k>:<v>,...]`.
#[derive(Clone, Debug, Default)]
pub struct WireEncoder {
    prefix: Box<[u8]>,
}

impl WireEncoder {
    /// Creates a new `WireEncoder` with the given bucket prefix.
    ///
    /// A blank prefix is ignored. Otherwise, a `.` separator is appended to it once, here, and the result is written
    /// in front of every bucket name.
    pub fn new<P>(prefix: P) -> Self
    where
        P: AsRef<str>,
    {
        let prefix = prefix.as_ref();
        if prefix.trim().is_empty() {
            return Self::default();
        }

        let mut buf = Vec::with_capacity(prefix.len() + 1);
        buf.extend_from_slice(prefix.as_bytes());
        buf.push(b'.');
        Self { prefix: buf.into_boxed_slice() }
    }

    /// Returns the prefix bytes written before every bucket, including the trailing separator.
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Returns a buffer size that is always large enough to format the given message with the given tags.
    pub fn max_required_size(&self, message: &MetricMessage<'_>, tags: &EffectiveTags<'_>) -> usize {
        self.prefix.len()
            + message.bucket().len()
            + COLON_LEN
            + MAX_SERIALIZED_NUMBER_LEN
            + MAX_KIND_SUFFIX_LEN
            + SAMPLE_RATE_MARKER_LEN
            + MAX_SERIALIZED_NUMBER_LEN
            + tags.encoded_len()
    }

    /// Formats the message into `destination`, starting at offset zero.
    ///
    /// Returns the number of bytes written, or `None` if `destination` ran out of capacity.
    pub fn try_format(
        &self,
        message: &MetricMessage<'_>,
        sample_rate: f64,
        tags: &EffectiveTags<'_>,
        destination: &mut [u8],
    ) -> Option<usize> {
        let mut writer = SliceWriter::new(destination);

        let formatted = self.try_write_bucket_with_colon(&mut writer, message.bucket())
            && try_write_value_with_kind(&mut writer, message)
            && try_write_sample_rate(&mut writer, sample_rate)
            && try_write_tags(&mut writer, tags);

        formatted.then_some(writer.written)
    }

    fn try_write_bucket_with_colon(&self, writer: &mut SliceWriter<'_>, bucket: &str) -> bool {
        writer.try_write_bytes(&self.prefix) && writer.try_write_bytes(bucket.as_bytes()) && writer.try_write_byte(b':')
    }
}

fn try_write_value_with_kind(writer: &mut SliceWriter<'_>, message: &MetricMessage<'_>) -> bool {
    let kind = message.kind();
    let magnitude = message.magnitude();

    let wrote_value = match kind {
        // Counters and timings drop any fractional part rather than rounding it.
        MetricKind::Counter | MetricKind::Timing => writer.try_write_integer(magnitude as i64),
        MetricKind::Gauge => match as_exact_integer(magnitude) {
            Some(integral) => writer.try_write_integer(integral),
            None => writer.try_write_float(magnitude),
        },
    };

    wrote_value && writer.try_write_bytes(kind.as_bytes())
}

fn try_write_sample_rate(writer: &mut SliceWriter<'_>, sample_rate: f64) -> bool {
    // A rate of 1.0 is implied, and anything outside of (0, 1) is never sampled to begin with.
    if sample_rate > 0.0 && sample_rate < 1.0 {
        writer.try_write_bytes(b"|@") && writer.try_write_float(sample_rate)
    } else {
        true
    }
}

fn try_write_tags(writer: &mut SliceWriter<'_>, tags: &EffectiveTags<'_>) -> bool {
    let mut wrote_tag = false;
    for tag in tags.iter() {
        let wrote_separator = if wrote_tag {
            writer.try_write_byte(b',')
        } else {
            wrote_tag = true;
            writer.try_write_bytes(b"|#")
        };

        if !(wrote_separator
            && writer.try_write_bytes(tag.key().as_bytes())
            && writer.try_write_byte(b':')
            && writer.try_write_bytes(tag.value().as_bytes()))
        {
            return false;
        }
    }

    true
}
