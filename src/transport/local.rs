//! In-process transport with fault injection.
//!
//! Roles register under a socket address and requests are delivered by direct
//! calls. Individual routes can lose a fraction of inbound requests or be
//! disconnected, and a random delivery latency can be applied, which models an
//! unreliable network without opening sockets.
use super::{Receiver, Transport};
use crate::error::TransportError;
use crate::messages::{Request, Response};
use futures_util::future::BoxFuture;
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct Route {
    receiver: Arc<dyn Receiver>,
    drop_rate: f64,
    connected: bool,
}

#[derive(Default)]
struct Inner {
    routes: HashMap<SocketAddr, Route>,
    latency: Option<(Duration, Duration)>,
}

/// Shared routing table for roles living in one process.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<Mutex<Inner>>,
}

impl LocalNetwork {
    pub fn new() -> LocalNetwork {
        LocalNetwork::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Routes requests for `address` to `receiver`, replacing any previous route.
    pub fn register(&self, address: SocketAddr, receiver: Arc<dyn Receiver>) {
        self.lock().routes.insert(
            address,
            Route {
                receiver,
                drop_rate: 0.0,
                connected: true,
            },
        );
    }

    /// Drops roughly `rate` (0.0 to 1.0) of the requests sent to `address`
    /// before they reach the receiver.
    pub fn set_drop_rate(&self, address: SocketAddr, rate: f64) {
        if let Some(route) = self.lock().routes.get_mut(&address) {
            route.drop_rate = rate.max(0.0).min(1.0);
        }
    }

    /// Makes `address` unreachable until `reconnect` is called.
    pub fn disconnect(&self, address: SocketAddr) {
        if let Some(route) = self.lock().routes.get_mut(&address) {
            route.connected = false;
        }
    }

    pub fn reconnect(&self, address: SocketAddr) {
        if let Some(route) = self.lock().routes.get_mut(&address) {
            route.connected = true;
        }
    }

    /// Delays every request by a random duration in `[min, max]`.
    pub fn set_latency(&self, min: Duration, max: Duration) {
        self.lock().latency = if max > Duration::from_millis(0) {
            Some((min.min(max), max))
        } else {
            None
        };
    }
}

impl Transport for LocalNetwork {
    fn invoke(
        &self,
        target: SocketAddr,
        request: Request,
    ) -> BoxFuture<'static, Result<Response, TransportError>> {
        let (receiver, dropped, delay) = {
            let inner = self.lock();
            let route = match inner.routes.get(&target) {
                Some(route) if route.connected => route,
                _ => return Box::pin(async move { Err(TransportError::Unreachable(target)) }),
            };

            let mut rng = rand::rng();
            let dropped = route.drop_rate > 0.0 && rng.random_bool(route.drop_rate);
            let delay = inner.latency.map(|(min, max)| {
                let nanos = rng.random_range(min.as_nanos() as u64..=max.as_nanos() as u64);
                Duration::from_nanos(nanos)
            });
            (route.receiver.clone(), dropped, delay)
        };

        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if dropped {
                trace!("Dropping {} to {}", request.method(), target);
                return Err(TransportError::Dropped(target));
            }
            let method = request.method();
            receiver
                .receive(request)
                .await
                .ok_or(TransportError::Unroutable(target, method))
        })
    }
}
