use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::error::TransportError;
use crate::logging::{log, log_datagram, obj, v_str, Domain, Level};
use serde_json::json;

/// Receive buffer used when nothing else is configured.
pub const DEFAULT_MAX_DATAGRAM: usize = 1024;

#[derive(Debug, Clone)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub from: SocketAddr,
    /// The sender's datagram did not fit the receive buffer.
    pub truncated: bool,
}

impl Datagram {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

#[derive(Debug)]
struct Inner {
    socket: UdpSocket,
    local: SocketAddr,
    closed: watch::Sender<bool>,
    last_peer: Mutex<Option<SocketAddr>>,
}

/// UDP endpoint bound to one local address.
///
/// Clones share the socket; `close` on any clone wakes every pending receive.
#[derive(Debug, Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local = socket
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;
        let (closed, _) = watch::channel(false);
        log(
            Level::Info,
            Domain::Wire,
            "bound",
            obj(&[("local", v_str(&local.to_string()))]),
        );
        Ok(Self {
            inner: Arc::new(Inner {
                socket,
                local,
                closed,
                last_peer: Mutex::new(None),
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Fire-and-forget; delivery is whatever UDP gives us.
    pub async fn send(&self, payload: &[u8], dest: SocketAddr) -> Result<usize, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let n = self
            .inner
            .socket
            .send_to(payload, dest)
            .await
            .map_err(|source| TransportError::Send { dest, source })?;
        log_datagram("send", &dest.to_string(), n, &String::from_utf8_lossy(payload));
        Ok(n)
    }

    pub async fn send_text(&self, text: &str, dest: SocketAddr) -> Result<usize, TransportError> {
        self.send(text.as_bytes(), dest).await
    }

    /// Block until a datagram arrives or the transport is closed.
    ///
    /// Payloads longer than `max_bytes` are cut to `max_bytes` and flagged.
    pub async fn receive(&self, max_bytes: usize) -> Result<Datagram, TransportError> {
        let mut closed = self.inner.closed.subscribe();
        if *closed.borrow() {
            return Err(TransportError::Closed);
        }
        let mut buf = vec![0u8; max_bytes + 1];
        tokio::select! {
            res = self.inner.socket.recv_from(&mut buf) => {
                let (n, from) = res.map_err(TransportError::Receive)?;
                let truncated = n > max_bytes;
                buf.truncate(n.min(max_bytes));
                if let Ok(mut peer) = self.inner.last_peer.lock() {
                    *peer = Some(from);
                }
                if truncated {
                    log(
                        Level::Warn,
                        Domain::Wire,
                        "datagram_truncated",
                        obj(&[
                            ("peer", v_str(&from.to_string())),
                            ("max_bytes", json!(max_bytes)),
                        ]),
                    );
                }
                log_datagram("recv", &from.to_string(), buf.len(), &String::from_utf8_lossy(&buf));
                Ok(Datagram { payload: buf, from, truncated })
            }
            _ = closed.wait_for(|c| *c) => Err(TransportError::Closed),
        }
    }

    /// Sender of the most recent datagram, if any.
    pub fn last_peer(&self) -> Option<SocketAddr> {
        self.inner.last_peer.lock().ok().and_then(|p| *p)
    }

    pub fn close(&self) {
        let was_closed = self.inner.closed.send_replace(true);
        if !was_closed {
            log(
                Level::Info,
                Domain::Wire,
                "closed",
                obj(&[("local", v_str(&self.inner.local.to_string()))]),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn send_and_receive() {
        let a = Transport::bind(loopback()).await.unwrap();
        let b = Transport::bind(loopback()).await.unwrap();
        a.send_text("^up", b.local_addr()).await.unwrap();
        let dg = b.receive(DEFAULT_MAX_DATAGRAM).await.unwrap();
        assert_eq!(dg.text(), "^up");
        assert_eq!(dg.from, a.local_addr());
        assert!(!dg.truncated);
        assert_eq!(b.last_peer(), Some(a.local_addr()));
    }

    #[tokio::test]
    async fn oversize_datagram_is_truncated() {
        let a = Transport::bind(loopback()).await.unwrap();
        let b = Transport::bind(loopback()).await.unwrap();
        let payload = vec![b'x'; 64];
        a.send(&payload, b.local_addr()).await.unwrap();
        let dg = b.receive(16).await.unwrap();
        assert!(dg.truncated);
        assert_eq!(dg.payload.len(), 16);
    }

    #[tokio::test]
    async fn close_unblocks_pending_receive() {
        let t = Transport::bind(loopback()).await.unwrap();
        let waiter = t.clone();
        let handle = tokio::spawn(async move { waiter.receive(DEFAULT_MAX_DATAGRAM).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        t.close();
        let res = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(res, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let t = Transport::bind(loopback()).await.unwrap();
        t.close();
        t.close();
        let res = t.send_text("^up", t.local_addr()).await;
        assert!(matches!(res, Err(TransportError::Closed)));
        assert!(matches!(t.receive(8).await, Err(TransportError::Closed)));
    }
}
