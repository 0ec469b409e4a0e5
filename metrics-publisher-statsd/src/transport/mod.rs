use std::io;

mod udp;
pub use self::udp::UdpTransport;

/// Sends encoded metric payloads to a remote server.
///
/// Transports are shared by every thread that publishes metrics, so `send` must be safe to call concurrently without
/// any external locking. Payloads are sent at most once and never retried.
pub trait Transport: Send + Sync {
    /// Sends a single payload.
    ///
    /// # Errors
    ///
    /// If the payload could not be handed to the network, an error is returned.
    fn send(&self, payload: &[u8]) -> io::Result<()>;
}

// Blanket implementations.
macro_rules! impl_transport {
    ($inner_ty:ident, $ptr_ty:ty) => {
        impl<$inner_ty> Transport for $ptr_ty
        where
            $inner_ty: Transport + ?Sized,
        {
            fn send(&self, payload: &[u8]) -> io::Result<()> {
                std::ops::Deref::deref(self).send(payload)
            }
        }
    };
}

impl_transport!(T, &T);
impl_transport!(T, Box<T>);
impl_transport!(T, std::sync::Arc<T>);
