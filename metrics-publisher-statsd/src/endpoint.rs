use std::{
    fmt, io,
    net::{IpAddr, SocketAddr, ToSocketAddrs as _},
    sync::{
        atomic::{AtomicU64, Ordering::Relaxed},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Errors that could occur while resolving the remote endpoint.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The host could not be resolved to a socket address.
    #[error("failed to resolve '{host}:{port}': {source}")]
    Resolution {
        /// Host that failed to resolve.
        host: String,

        /// Port that was being resolved.
        port: u16,

        /// Underlying lookup failure.
        #[source]
        source: io::Error,
    },

    /// The host resolved to an address of a different family than the one in use.
    ///
    /// The socket sending metrics is bound to a single address family, so the new address is rejected and the current
    /// one kept.
    #[error("'{host}' resolved to {resolved}, which is not in the same address family as {current}")]
    AddressFamilyChanged {
        /// Host that was resolved.
        host: String,

        /// Address currently in use.
        current: SocketAddr,

        /// Address the host resolved to.
        resolved: SocketAddr,
    },

    /// Failed to spawn the background refresh thread.
    #[error("failed to spawn endpoint refresh thread")]
    Backend(#[source] io::Error),
}

/// Resolves a host name and port into a socket address.
///
/// Any closure of the form `Fn(&str, u16) -> io::Result<SocketAddr>` is a resolver.
pub trait HostResolver: Send + Sync + 'static {
    /// Resolves `host` and `port` into a single socket address.
    ///
    /// # Errors
    ///
    /// If the lookup fails, or returns no addresses, an error is returned.
    fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr>;
}

impl<F> HostResolver for F
where
    F: Fn(&str, u16) -> io::Result<SocketAddr> + Send + Sync + 'static,
{
    fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr> {
        self(host, port)
    }
}

/// Resolves hosts with the operating system's resolver, taking the first address returned.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr> {
        (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no addresses found for '{host}'"))
        })
    }
}

struct Shared {
    host: String,
    port: u16,
    resolver: Box<dyn HostResolver>,
    current: ArcSwap<SocketAddr>,
    resolution_failures: AtomicU64,
}

impl Shared {
    fn refresh(&self) -> Result<SocketAddr, EndpointError> {
        match self.resolver.resolve(&self.host, self.port) {
            Ok(addr) => {
                let current = **self.current.load();
                if current.is_ipv4() != addr.is_ipv4() {
                    self.resolution_failures.fetch_add(1, Relaxed);
                    return Err(EndpointError::AddressFamilyChanged {
                        host: self.host.clone(),
                        current,
                        resolved: addr,
                    });
                }

                let previous = self.current.swap(Arc::new(addr));
                if *previous != addr {
                    debug!(host = %self.host, %previous, current = %addr, "Endpoint address changed.");
                }
                Ok(addr)
            }
            Err(source) => {
                // The last known address stays in place.
                self.resolution_failures.fetch_add(1, Relaxed);
                Err(EndpointError::Resolution { host: self.host.clone(), port: self.port, source })
            }
        }
    }
}

/// Handle to the background refresh thread.
///
/// Dropping the handle signals the thread to stop and waits for it to exit.
struct Refresher {
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Refresher {
    fn spawn(shared: Arc<Shared>, interval: Duration) -> Result<Self, EndpointError> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("metrics-publisher-statsd-endpoint-refresh".to_string())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(e) = shared.refresh() {
                            warn!(error = %e, "Failed to refresh endpoint, keeping last known address.");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(EndpointError::Backend)?;

        Ok(Self { shutdown_tx: Some(shutdown_tx), handle: Some(handle) })
    }
}

impl Drop for Refresher {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the thread immediately, even mid-interval.
        drop(self.shutdown_tx.take());

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Endpoint refresh thread panicked.");
            }
        }
    }
}

/// Resolves and periodically refreshes the address metrics are sent to.
///
/// Literal IP addresses are used as-is and never refreshed. Host names are resolved once up front, and then, if a
/// refresh interval is given, re-resolved in the background on that interval. A failed refresh keeps the last
/// successfully resolved address.
///
/// The address family is fixed by the first resolution. A refresh that resolves to an address in the other family is
/// counted as a failure, since the socket sending to it can only reach one family.
///
/// Reading the current address never blocks: refreshes replace the whole address at once, so readers always see
/// either the old address or the new one.
pub struct EndpointResolver {
    shared: Arc<Shared>,
    refresher: Option<Refresher>,
}

impl EndpointResolver {
    /// Creates a new `EndpointResolver` using the system resolver.
    ///
    /// # Errors
    ///
    /// If the host cannot be resolved, or the refresh thread cannot be spawned, an error is returned.
    pub fn new(host: &str, port: u16, refresh_interval: Option<Duration>) -> Result<Self, EndpointError> {
        Self::with_resolver(host, port, refresh_interval, SystemResolver)
    }

    /// Creates a new `EndpointResolver` using the given host resolver.
    ///
    /// A refresh interval of zero is treated the same as no interval: the host is resolved once.
    ///
    /// # Errors
    ///
    /// If the host cannot be resolved, or the refresh thread cannot be spawned, an error is returned.
    pub fn with_resolver<R>(
        host: &str,
        port: u16,
        refresh_interval: Option<Duration>,
        resolver: R,
    ) -> Result<Self, EndpointError>
    where
        R: HostResolver,
    {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(Self::fixed(SocketAddr::new(ip, port)));
        }

        let initial = resolver.resolve(host, port).map_err(|source| EndpointError::Resolution {
            host: host.to_string(),
            port,
            source,
        })?;
        debug!(host, port, address = %initial, "Resolved endpoint.");

        let shared = Arc::new(Shared {
            host: host.to_string(),
            port,
            resolver: Box::new(resolver),
            current: ArcSwap::from_pointee(initial),
            resolution_failures: AtomicU64::new(0),
        });

        let refresher = match refresh_interval.filter(|interval| !interval.is_zero()) {
            Some(interval) => Some(Refresher::spawn(Arc::clone(&shared), interval)?),
            None => None,
        };

        Ok(Self { shared, refresher })
    }

    /// Creates an `EndpointResolver` that always returns the given address.
    pub fn fixed(addr: SocketAddr) -> Self {
        let shared = Arc::new(Shared {
            host: addr.ip().to_string(),
            port: addr.port(),
            resolver: Box::new(move |_: &str, _: u16| -> io::Result<SocketAddr> { Ok(addr) }),
            current: ArcSwap::from_pointee(addr),
            resolution_failures: AtomicU64::new(0),
        });

        Self { shared, refresher: None }
    }

    /// Returns the most recently resolved address.
    pub fn current(&self) -> SocketAddr {
        **self.shared.current.load()
    }

    /// Resolves the host again, replacing the current address on success.
    ///
    /// # Errors
    ///
    /// If the lookup fails, or resolves to an address in a different family than the current one, the current address
    /// is left untouched and an error is returned.
    pub fn refresh(&self) -> Result<SocketAddr, EndpointError> {
        self.shared.refresh()
    }

    /// Returns `true` if a background thread is periodically refreshing the address.
    pub fn is_refreshing(&self) -> bool {
        self.refresher.is_some()
    }

    /// Returns the number of refreshes that failed to resolve the host.
    pub fn resolution_failures(&self) -> u64 {
        self.shared.resolution_failures.load(Relaxed)
    }
}

impl fmt::Debug for EndpointResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointResolver")
            .field("host", &self.shared.host)
            .field("port", &self.shared.port)
            .field("current", &self.current())
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        net::SocketAddr,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst},
            Arc, Mutex,
        },
        thread::sleep,
        time::{Duration, Instant},
    };

    use super::{EndpointError, EndpointResolver};

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn literal_address_never_refreshes() {
        let resolver = EndpointResolver::new("127.0.0.1", 8125, Some(Duration::from_millis(10))).unwrap();
        assert!(!resolver.is_refreshing());
        assert_eq!(resolver.current(), addr("127.0.0.1:8125"));

        let resolver = EndpointResolver::new("::1", 9125, None).unwrap();
        assert_eq!(resolver.current(), addr("[::1]:9125"));
    }

    #[test]
    fn failed_refresh_keeps_last_known_address() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver_calls = Arc::clone(&calls);
        let lookup = move |_: &str, port: u16| -> io::Result<_> {
            if resolver_calls.fetch_add(1, SeqCst) == 0 {
                Ok(SocketAddr::from(([10, 0, 0, 1], port)))
            } else {
                Err(io::Error::new(io::ErrorKind::Other, "lookup failed"))
            }
        };
        let resolver = EndpointResolver::with_resolver("statsd.internal", 8125, None, lookup).unwrap();

        assert!(!resolver.is_refreshing());
        assert_eq!(resolver.current(), addr("10.0.0.1:8125"));

        let result = resolver.refresh();
        assert!(matches!(result, Err(EndpointError::Resolution { port: 8125, .. })));
        assert_eq!(resolver.current(), addr("10.0.0.1:8125"));
        assert_eq!(resolver.resolution_failures(), 1);
    }

    #[test]
    fn initial_resolution_failure_is_an_error() {
        let lookup = |_: &str, _: u16| -> io::Result<SocketAddr> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such host"))
        };
        let result = EndpointResolver::with_resolver("statsd.internal", 8125, None, lookup);

        assert!(matches!(result, Err(EndpointError::Resolution { .. })));
    }

    #[test]
    fn background_refresh_picks_up_new_address() {
        let target = Arc::new(Mutex::new(addr("10.0.0.1:8125")));
        let resolver_target = Arc::clone(&target);
        let resolver = EndpointResolver::with_resolver(
            "statsd.internal",
            8125,
            Some(Duration::from_millis(5)),
            move |_: &str, _: u16| -> io::Result<_> { Ok(*resolver_target.lock().unwrap()) },
        )
        .unwrap();
        assert!(resolver.is_refreshing());
        assert_eq!(resolver.current(), addr("10.0.0.1:8125"));

        *target.lock().unwrap() = addr("10.0.0.2:8125");

        let deadline = Instant::now() + Duration::from_secs(5);
        while resolver.current() != addr("10.0.0.2:8125") {
            assert!(Instant::now() < deadline, "refresh never observed the new address");
            sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn dropping_resolver_stops_refreshing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver_calls = Arc::clone(&calls);
        let resolver = EndpointResolver::with_resolver(
            "statsd.internal",
            8125,
            Some(Duration::from_millis(1)),
            move |_: &str, port: u16| -> io::Result<_> {
                resolver_calls.fetch_add(1, SeqCst);
                Ok(SocketAddr::from(([10, 0, 0, 1], port)))
            },
        )
        .unwrap();

        sleep(Duration::from_millis(20));
        drop(resolver);

        // The refresh thread has been joined, so nothing can call the resolver anymore.
        let calls_after_drop = calls.load(SeqCst);
        sleep(Duration::from_millis(20));
        assert_eq!(calls.load(SeqCst), calls_after_drop);
        assert_eq!(Arc::strong_count(&calls), 1);
    }

    #[test]
    fn refresh_rejects_address_family_change() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver_calls = Arc::clone(&calls);
        let lookup = move |_: &str, port: u16| -> io::Result<_> {
            if resolver_calls.fetch_add(1, SeqCst) == 0 {
                Ok(SocketAddr::from(([127, 0, 0, 1], port)))
            } else {
                Ok(SocketAddr::from(([0, 0, 0, 0, 0, 0, 0, 1], port)))
            }
        };
        let resolver = EndpointResolver::with_resolver("statsd.internal", 8125, None, lookup).unwrap();

        let result = resolver.refresh();
        match result {
            Err(EndpointError::AddressFamilyChanged { current, resolved, .. }) => {
                assert_eq!(current, addr("127.0.0.1:8125"));
                assert_eq!(resolved, addr("[::1]:8125"));
            }
            other => panic!("expected address family change, got {other:?}"),
        }
        assert_eq!(resolver.current(), addr("127.0.0.1:8125"));
        assert_eq!(resolver.resolution_failures(), 1);
    }

    #[test]
    fn background_refresh_failures_keep_last_known_address() {
        let failing = Arc::new(AtomicBool::new(false));
        let resolver_failing = Arc::clone(&failing);
        let lookup = move |_: &str, port: u16| -> io::Result<_> {
            if resolver_failing.load(SeqCst) {
                Err(io::Error::new(io::ErrorKind::Other, "lookup failed"))
            } else {
                Ok(SocketAddr::from(([10, 0, 0, 1], port)))
            }
        };
        let resolver =
            EndpointResolver::with_resolver("statsd.internal", 8125, Some(Duration::from_millis(5)), lookup).unwrap();
        assert!(resolver.is_refreshing());

        failing.store(true, SeqCst);

        let deadline = Instant::now() + Duration::from_secs(5);
        while resolver.resolution_failures() == 0 {
            assert!(Instant::now() < deadline, "background refresh never failed");
            sleep(Duration::from_millis(5));
        }
        assert_eq!(resolver.current(), addr("10.0.0.1:8125"));
    }

    #[test]
    fn zero_interval_resolves_once() {
        let resolver =
            EndpointResolver::with_resolver("statsd.internal", 8125, Some(Duration::ZERO), |_: &str, port: u16| {
                io::Result::Ok(SocketAddr::from(([10, 0, 0, 1], port)))
            })
            .unwrap();

        assert!(!resolver.is_refreshing());
    }
}
