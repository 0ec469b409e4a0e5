use std::{borrow::Cow, io, time::Duration};

use thiserror::Error;

use crate::{
    encoder::WireEncoder,
    endpoint::{EndpointError, EndpointResolver},
    message::Tag,
    policy::{ErrorPolicy, HandledPredicate, PublishError, SwallowErrors},
    publisher::StatsDPublisher,
    transport::{Transport, UdpTransport},
};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default port of a StatsD server.
pub const DEFAULT_PORT: u16 = 8125;

/// Errors that could occur while building a StatsD publisher.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The configured host was empty.
    #[error("invalid host: must not be empty")]
    InvalidHost,

    /// Failed to set up the endpoint resolver.
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// Failed to bind or configure the local UDP socket.
    #[error("failed to set up UDP socket: {0}")]
    Socket(#[source] io::Error),
}

/// Builder for a StatsD publisher.
pub struct StatsDBuilder {
    host: String,
    port: u16,
    prefix: Option<String>,
    default_tags: Vec<Tag>,
    dns_lookup_interval: Option<Duration>,
    write_timeout: Duration,
    error_policy: Box<dyn ErrorPolicy>,
}

impl StatsDBuilder {
    /// Set the host of the StatsD server.
    ///
    /// This can be either a literal IP address or a hostname. Hostnames are resolved when the publisher is built, and
    /// can be re-resolved periodically with [`with_dns_lookup_interval`][Self::with_dns_lookup_interval].
    ///
    /// Defaults to `127.0.0.1`.
    #[must_use]
    pub fn with_host<H>(mut self, host: H) -> Self
    where
        H: Into<String>,
    {
        self.host = host.into();
        self
    }

    /// Set the port of the StatsD server.
    ///
    /// Defaults to 8125.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the prefix prepended to every bucket name.
    ///
    /// A `.` separator is added between the prefix and the bucket. A prefix that is empty or only whitespace is
    /// ignored.
    ///
    /// Defaults to no prefix.
    #[must_use]
    pub fn with_prefix<P>(mut self, prefix: P) -> Self
    where
        P: Into<String>,
    {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set the tags added to every metric, replacing any previously configured default tags.
    ///
    /// Default tags are written after the tags given to each call, in the order given here.
    #[must_use]
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        self.default_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Add a single tag to the tags added to every metric.
    #[must_use]
    pub fn with_tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<Cow<'static, str>>,
        V: Into<Cow<'static, str>>,
    {
        self.default_tags.push(Tag::new(key, value));
        self
    }

    /// Set how often a hostname is resolved again.
    ///
    /// When set to a non-zero interval and the host is not a literal IP address, a background thread re-resolves the
    /// host on every interval and later sends go to the new address. If a lookup fails, the last address that
    /// resolved is kept.
    ///
    /// Defaults to resolving the host once, when the publisher is built.
    #[must_use]
    pub fn with_dns_lookup_interval(mut self, interval: Duration) -> Self {
        self.dns_lookup_interval = Some(interval);
        self
    }

    /// Set the write timeout for sending metrics.
    ///
    /// When the write timeout is reached, the send is aborted and the metric is dropped without retrying. A timeout of
    /// zero blocks until the operating system accepts the datagram.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the policy deciding what happens to errors raised while publishing.
    ///
    /// Defaults to [`SwallowErrors`].
    #[must_use]
    pub fn with_error_policy<P>(mut self, policy: P) -> Self
    where
        P: ErrorPolicy + 'static,
    {
        self.error_policy = Box::new(policy);
        self
    }

    /// Set a predicate deciding whether errors raised while publishing are handled.
    ///
    /// Errors for which the predicate returns `true` are swallowed, and all others are returned to the caller.
    #[must_use]
    pub fn with_error_predicate<F>(self, predicate: F) -> Self
    where
        F: Fn(&PublishError) -> bool + Send + Sync + 'static,
    {
        self.with_error_policy(HandledPredicate(predicate))
    }

    /// Builds the publisher, sending over UDP.
    ///
    /// # Errors
    ///
    /// If the host is empty or cannot be resolved, the refresh thread cannot be spawned, or the local socket cannot be
    /// set up, an error is returned.
    pub fn build(self) -> Result<StatsDPublisher<UdpTransport>, BuildError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(BuildError::InvalidHost);
        }

        let endpoint = EndpointResolver::new(host, self.port, self.dns_lookup_interval)?;
        let transport =
            UdpTransport::with_write_timeout(endpoint, Some(self.write_timeout)).map_err(BuildError::Socket)?;

        Ok(self.build_with_transport(transport))
    }

    /// Builds the publisher around the given transport.
    ///
    /// The host, port, DNS lookup interval and write timeout only configure the UDP transport created by
    /// [`build`][Self::build], and are ignored here.
    pub fn build_with_transport<T>(self, transport: T) -> StatsDPublisher<T>
    where
        T: Transport,
    {
        let encoder = WireEncoder::new(self.prefix.as_deref().unwrap_or_default());
        StatsDPublisher::new(encoder, transport, self.default_tags, self.error_policy)
    }
}

impl Default for StatsDBuilder {
    fn default() -> Self {
        StatsDBuilder {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            prefix: None,
            default_tags: Vec::new(),
            dns_lookup_interval: None,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            error_policy: Box::new(SwallowErrors),
        }
    }
}
