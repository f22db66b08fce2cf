//! Shared WebSocket connection registry.
//!
//! A [`ConnectionRegistry`] maps an endpoint URL to at most one live
//! (CONNECTING or OPEN) connection. Every [`acquire`](ConnectionRegistry::acquire)
//! for a URL that already has a live connection attaches to it instead of
//! opening a second socket; the connection is torn down when the last
//! [`ConnectionHandle`] is released.
//!
//! Each connection runs as one tokio task that:
//! 1. Opens the transport through the registry's [`Connector`], bounded by
//!    the connect timeout.
//! 2. Writes queued outbound frames (subscribe requests).
//! 3. Reads inbound frames and fans each one out, in arrival order, to every
//!    registered listener.
//! 4. On close or error, removes its registry entry and then tells every
//!    listener why it closed.
//!
//! ```text
//! acquire(url) ──► entry? ──yes──► refs += 1, new listener
//!                    │
//!                    no ──► insert CONNECTING entry, spawn connection task
//! release()    ──► refs -= 1 ──► 0? remove entry, signal shutdown
//! ```
//!
//! The entry map is guarded by one `std::sync::Mutex` that is never held
//! across an `.await`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use ahash::{AHashMap, AHashSet};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::client::Connector;
use crate::error::FeedError;

/// Lifecycle state of one shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Open,
    Closed,
}

/// What a listener receives from its connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnEvent {
    /// One inbound text frame. Shared between all listeners.
    Frame(Arc<str>),
    /// The connection is gone; no further events follow.
    Closed(FeedError),
}

// ---------------------------------------------------------------------------
// Shared connection
// ---------------------------------------------------------------------------

struct SharedConn {
    id: u64,
    url: String,
    state_tx: watch::Sender<ConnState>,
    outbound_tx: mpsc::UnboundedSender<String>,
    shutdown_tx: watch::Sender<bool>,
    inner: Mutex<ConnInner>,
}

#[derive(Default)]
struct ConnInner {
    listeners: Vec<(u64, mpsc::UnboundedSender<ConnEvent>)>,
    next_listener: u64,
    products: AHashSet<String>,
    close_reason: Option<FeedError>,
}

impl SharedConn {
    fn lock(&self) -> MutexGuard<'_, ConnInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ConnState {
        *self.state_tx.borrow()
    }

    fn add_listener(&self) -> (u64, mpsc::UnboundedReceiver<ConnEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let id = inner.next_listener;
        inner.next_listener += 1;
        match &inner.close_reason {
            Some(reason) => {
                let _ = tx.send(ConnEvent::Closed(reason.clone()));
            }
            None => inner.listeners.push((id, tx)),
        }
        (id, rx)
    }

    fn remove_listener(&self, listener_id: u64) {
        self.lock().listeners.retain(|(id, _)| *id != listener_id);
    }

    fn fan_out(&self, text: String) {
        let frame: Arc<str> = Arc::from(text);
        self.lock()
            .listeners
            .retain(|(_, tx)| tx.send(ConnEvent::Frame(Arc::clone(&frame))).is_ok());
    }

    fn mark_closed(&self, reason: FeedError) {
        let listeners = {
            let mut inner = self.lock();
            inner.close_reason = Some(reason.clone());
            std::mem::take(&mut inner.listeners)
        };
        for (_, tx) in listeners {
            let _ = tx.send(ConnEvent::Closed(reason.clone()));
        }
        self.state_tx.send_replace(ConnState::Closed);
    }

    fn signal_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct Entry {
    conn: Arc<SharedConn>,
    refs: usize,
}

struct RegistryInner {
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    entries: Mutex<AHashMap<String, Entry>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    next_id: AtomicU64,
    /// Set by `shutdown` while the entry lock is held; `acquire` checks it
    /// under the same lock.
    closed: AtomicBool,
}

impl RegistryInner {
    fn entries(&self) -> MutexGuard<'_, AHashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the entry for `url` only if it still belongs to connection `id`.
    fn remove_if_current(&self, url: &str, id: u64) {
        let mut entries = self.entries();
        if entries.get(url).is_some_and(|e| e.conn.id == id) {
            entries.remove(url);
        }
    }
}

/// Process-wide, explicitly owned map of endpoint URL → live connection.
///
/// Cheap to clone; clones share the same map.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    /// Create an empty registry that opens sockets through `connector`.
    pub fn new(connector: Arc<dyn Connector>, connect_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connector,
                connect_timeout,
                entries: Mutex::new(AHashMap::new()),
                tasks: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Get a handle to the live connection for `url`, opening one if none is
    /// CONNECTING or OPEN.
    ///
    /// Must be called from within a tokio runtime (the connection task is
    /// spawned here). Fails with [`FeedError::Closed`] after
    /// [`shutdown`](Self::shutdown).
    pub fn acquire(&self, url: &str) -> Result<ConnectionHandle, FeedError> {
        url::Url::parse(url).map_err(|e| FeedError::Config(format!("invalid url {url}: {e}")))?;

        let mut entries = self.inner.entries();
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(FeedError::Closed);
        }

        if let Some(entry) = entries.get_mut(url) {
            if entry.conn.state() != ConnState::Closed {
                entry.refs += 1;
                let conn = Arc::clone(&entry.conn);
                debug!("[ws-{}] attached (refs={})", conn.id, entry.refs);
                drop(entries);
                return Ok(ConnectionHandle::new(self.clone(), conn, false));
            }
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (state_tx, _) = watch::channel(ConnState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let conn = Arc::new(SharedConn {
            id,
            url: url.to_owned(),
            state_tx,
            outbound_tx,
            shutdown_tx,
            inner: Mutex::new(ConnInner::default()),
        });

        let task = tokio::spawn(connection_task(
            Arc::clone(&conn),
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.connector),
            self.inner.connect_timeout,
            outbound_rx,
            shutdown_rx,
        ));
        {
            let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.retain(|t| !t.is_finished());
            tasks.push(task);
        }

        entries.insert(url.to_owned(), Entry { conn: Arc::clone(&conn), refs: 1 });
        drop(entries);
        Ok(ConnectionHandle::new(self.clone(), conn, true))
    }

    /// Drop one reference to connection `connection_id` at `url`.
    ///
    /// The last reference removes the entry and closes the connection.
    /// Returns `true` if this call closed it. A stale id (the entry has since
    /// been replaced) is ignored.
    pub fn release(&self, url: &str, connection_id: u64) -> bool {
        let mut entries = self.inner.entries();
        let Some(entry) = entries.get_mut(url) else { return false };
        if entry.conn.id != connection_id {
            return false;
        }
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 {
            debug!("[ws-{connection_id}] released (refs={})", entry.refs);
            return false;
        }
        if let Some(entry) = entries.remove(url) {
            info!("[ws-{connection_id}] last reference released, closing");
            entry.conn.signal_shutdown();
        }
        true
    }

    /// Number of live entries.
    pub fn connection_count(&self) -> usize {
        self.inner.entries().len()
    }

    /// Reference count of the entry for `url`, if any.
    pub fn refs(&self, url: &str) -> Option<usize> {
        self.inner.entries().get(url).map(|e| e.refs)
    }

    /// True once [`shutdown`](Self::shutdown) has started.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close every connection and wait for the connection tasks to finish.
    /// The registry refuses new acquires from here on.
    pub async fn shutdown(&self) {
        let drained: Vec<Entry> = {
            let mut entries = self.inner.entries();
            self.inner.closed.store(true, Ordering::Release);
            entries.drain().map(|(_, e)| e).collect()
        };
        for entry in &drained {
            entry.conn.signal_shutdown();
        }
        let tasks =
            std::mem::take(&mut *self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        info!("registry shutdown: {} connection(s), {} task(s)", drained.len(), tasks.len());
        for task in tasks {
            let _ = task.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// One reference to a shared connection plus this holder's listener.
///
/// Dropping the handle releases it.
pub struct ConnectionHandle {
    registry: ConnectionRegistry,
    conn: Arc<SharedConn>,
    listener_id: u64,
    events: mpsc::UnboundedReceiver<ConnEvent>,
    owner: bool,
    released: bool,
}

impl ConnectionHandle {
    fn new(registry: ConnectionRegistry, conn: Arc<SharedConn>, owner: bool) -> Self {
        let (listener_id, events) = conn.add_listener();
        Self { registry, conn, listener_id, events, owner, released: false }
    }

    pub fn url(&self) -> &str {
        &self.conn.url
    }

    pub fn connection_id(&self) -> u64 {
        self.conn.id
    }

    /// `true` if this handle's `acquire` created the connection.
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn state(&self) -> ConnState {
        self.conn.state()
    }

    /// Wait until the connection leaves CONNECTING. Returns the close reason
    /// if it closed instead of opening.
    pub async fn wait_open(&self) -> Result<(), FeedError> {
        let mut state_rx = self.conn.state_tx.subscribe();
        let state = match state_rx.wait_for(|s| *s != ConnState::Connecting).await {
            Ok(s) => *s,
            Err(_) => ConnState::Closed,
        };
        match state {
            ConnState::Open => Ok(()),
            _ => Err(self.conn.lock().close_reason.clone().unwrap_or(FeedError::Closed)),
        }
    }

    /// Queue a subscribe frame for `product` unless the connection already
    /// carries that product. Returns whether a frame was queued.
    pub fn send_subscribe(&self, product: &str, text: String) -> Result<bool, FeedError> {
        let mut inner = self.conn.lock();
        if let Some(reason) = &inner.close_reason {
            return Err(reason.clone());
        }
        if !inner.products.insert(product.to_owned()) {
            return Ok(false);
        }
        self.conn.outbound_tx.send(text).map_err(|_| FeedError::Closed)?;
        Ok(true)
    }

    /// Next event for this listener, in arrival order. `None` after release.
    pub async fn recv(&mut self) -> Option<ConnEvent> {
        self.events.recv().await
    }

    /// Deregister the listener and drop this reference. Idempotent.
    pub fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        self.conn.remove_listener(self.listener_id);
        self.events.close();
        self.registry.release(&self.conn.url, self.conn.id);
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

async fn connection_task(
    conn: Arc<SharedConn>,
    registry: Weak<RegistryInner>,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    shutdown_rx: watch::Receiver<bool>,
) {
    let reason =
        run_connection(&conn, connector.as_ref(), connect_timeout, outbound_rx, shutdown_rx).await;

    // Unregister first so anyone reacting to the close can acquire afresh.
    if let Some(registry) = registry.upgrade() {
        registry.remove_if_current(&conn.url, conn.id);
    }
    conn.mark_closed(reason);
}

/// Connect, then pump frames until shutdown or failure. Returns the close
/// reason.
async fn run_connection(
    conn: &SharedConn,
    connector: &dyn Connector,
    connect_timeout: Duration,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> FeedError {
    let conn_id = conn.id;

    if *shutdown_rx.borrow() {
        info!("[ws-{conn_id}] shutdown requested before connect");
        return FeedError::Closed;
    }

    info!("[ws-{conn_id}] connecting to {}", conn.url);

    let connected = tokio::select! {
        _ = shutdown_rx.changed() => {
            info!("[ws-{conn_id}] shutdown while connecting");
            return FeedError::Closed;
        }
        res = tokio::time::timeout(connect_timeout, connector.connect(&conn.url)) => res,
    };

    let (mut sink, mut stream) = match connected {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            error!("[ws-{conn_id}] connection failed: {e}");
            return match e {
                FeedError::Connection(_) => e,
                other => FeedError::Connection(other.to_string()),
            };
        }
        Err(_) => {
            error!("[ws-{conn_id}] connect timed out after {connect_timeout:?}");
            return FeedError::Timeout("connecting".into());
        }
    };

    conn.state_tx.send_replace(ConnState::Open);
    info!("[ws-{conn_id}] connected");

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("[ws-{conn_id}] shutdown signal received");
                let _ = sink.close().await;
                return FeedError::Closed;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(text)) => conn.fan_out(text),
                    Some(Err(e)) => {
                        error!("[ws-{conn_id}] read error: {e}");
                        return match e {
                            FeedError::Connection(_) => e,
                            other => FeedError::Connection(other.to_string()),
                        };
                    }
                    None => {
                        warn!("[ws-{conn_id}] stream ended");
                        return FeedError::Connection("stream ended".into());
                    }
                }
            }

            Some(msg) = outbound_rx.recv() => {
                debug!("[ws-{conn_id}] sending {} bytes", msg.len());
                if let Err(e) = sink.send(msg).await {
                    error!("[ws-{conn_id}] send error: {e}");
                    return FeedError::Connection(format!("send failed: {e}"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::memory::{ConnectPlan, MemoryConnector};

    const URL: &str = "wss://feed.test/ws";

    fn registry(connector: &MemoryConnector) -> ConnectionRegistry {
        ConnectionRegistry::new(Arc::new(connector.clone()), Duration::from_secs(5))
    }

    async fn next_frame(handle: &mut ConnectionHandle) -> String {
        match handle.recv().await {
            Some(ConnEvent::Frame(f)) => f.to_string(),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_acquire_opens_one_connection() {
        let connector = MemoryConnector::new();
        let reg = registry(&connector);

        let mut a = reg.acquire(URL).unwrap();
        let mut b = reg.acquire(URL).unwrap();
        assert!(a.is_owner());
        assert!(!b.is_owner());
        assert_eq!(a.connection_id(), b.connection_id());
        assert_eq!(reg.refs(URL), Some(2));

        let server = connector.accept().await.unwrap();
        a.wait_open().await.unwrap();
        b.wait_open().await.unwrap();
        assert_eq!(connector.connect_count(), 1);

        server.send_frame("one");
        server.send_frame("two");
        assert_eq!(next_frame(&mut a).await, "one");
        assert_eq!(next_frame(&mut a).await, "two");
        assert_eq!(next_frame(&mut b).await, "one");
        assert_eq!(next_frame(&mut b).await, "two");
    }

    #[tokio::test]
    async fn non_last_release_keeps_connection() {
        let connector = MemoryConnector::new();
        let reg = registry(&connector);

        let mut a = reg.acquire(URL).unwrap();
        let mut b = reg.acquire(URL).unwrap();
        let server = connector.accept().await.unwrap();
        a.wait_open().await.unwrap();

        a.release();
        assert_eq!(reg.refs(URL), Some(1));
        assert_eq!(b.state(), ConnState::Open);

        server.send_frame("still here");
        assert_eq!(next_frame(&mut b).await, "still here");
    }

    #[tokio::test]
    async fn last_release_closes_and_allows_fresh_connection() {
        let connector = MemoryConnector::new();
        let reg = registry(&connector);

        let mut a = reg.acquire(URL).unwrap();
        let mut server = connector.accept().await.unwrap();
        a.wait_open().await.unwrap();
        let first_id = a.connection_id();

        a.release();
        assert_eq!(reg.connection_count(), 0);
        // The client sink is dropped once the connection task exits.
        assert_eq!(server.recv().await, None);

        let c = reg.acquire(URL).unwrap();
        assert!(c.is_owner());
        assert_ne!(c.connection_id(), first_id);
        let _server2 = connector.accept().await.unwrap();
        c.wait_open().await.unwrap();
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let connector = MemoryConnector::new();
        let reg = registry(&connector);

        let mut a = reg.acquire(URL).unwrap();
        let _b = reg.acquire(URL).unwrap();
        a.release();
        a.release();
        assert_eq!(reg.refs(URL), Some(1));
        drop(a);
        assert_eq!(reg.refs(URL), Some(1));
    }

    #[tokio::test]
    async fn stale_release_does_not_touch_new_entry() {
        let connector = MemoryConnector::new();
        let reg = registry(&connector);

        let mut a = reg.acquire(URL).unwrap();
        let mut server = connector.accept().await.unwrap();
        a.wait_open().await.unwrap();
        server.close();
        assert!(matches!(a.recv().await, Some(ConnEvent::Closed(FeedError::Connection(_)))));
        assert_eq!(reg.connection_count(), 0);

        let _fresh = reg.acquire(URL).unwrap();
        a.release();
        assert_eq!(reg.refs(URL), Some(1));
    }

    #[tokio::test]
    async fn remote_close_notifies_every_listener() {
        let connector = MemoryConnector::new();
        let reg = registry(&connector);

        let mut a = reg.acquire(URL).unwrap();
        let mut b = reg.acquire(URL).unwrap();
        let mut server = connector.accept().await.unwrap();
        a.wait_open().await.unwrap();

        server.fail("reset by peer");
        for h in [&mut a, &mut b] {
            match h.recv().await {
                Some(ConnEvent::Closed(FeedError::Connection(msg))) => assert!(msg.contains("reset by peer")),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(a.state(), ConnState::Closed);
        assert_eq!(reg.connection_count(), 0);
    }

    #[tokio::test]
    async fn refused_connect_surfaces_connection_error() {
        let connector = MemoryConnector::new();
        connector.push_plan(ConnectPlan::Refuse("refused".into()));
        let reg = registry(&connector);

        let h = reg.acquire(URL).unwrap();
        assert_eq!(h.wait_open().await, Err(FeedError::Connection("refused".into())));
        assert_eq!(reg.connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_connect_times_out() {
        let connector = MemoryConnector::new();
        connector.push_plan(ConnectPlan::Hang);
        let reg = registry(&connector);

        let h = reg.acquire(URL).unwrap();
        assert!(matches!(h.wait_open().await, Err(FeedError::Timeout(_))));
    }

    #[tokio::test]
    async fn subscribe_sent_once_per_product() {
        let connector = MemoryConnector::new();
        let reg = registry(&connector);

        let a = reg.acquire(URL).unwrap();
        let b = reg.acquire(URL).unwrap();
        let mut server = connector.accept().await.unwrap();
        a.wait_open().await.unwrap();

        assert!(a.send_subscribe("BTC-USD", "sub-btc".into()).unwrap());
        assert!(!b.send_subscribe("BTC-USD", "sub-btc-again".into()).unwrap());
        assert!(b.send_subscribe("ETH-USD", "sub-eth".into()).unwrap());

        assert_eq!(server.recv().await.as_deref(), Some("sub-btc"));
        assert_eq!(server.recv().await.as_deref(), Some("sub-eth"));
        assert_eq!(server.try_recv(), None);
    }

    #[tokio::test]
    async fn shutdown_closes_everything() {
        let connector = MemoryConnector::new();
        let reg = registry(&connector);

        let mut a = reg.acquire(URL).unwrap();
        let mut b = reg.acquire("wss://other.test/ws").unwrap();
        let _s1 = connector.accept().await.unwrap();
        let _s2 = connector.accept().await.unwrap();

        reg.shutdown().await;
        assert_eq!(reg.connection_count(), 0);
        assert_eq!(a.recv().await, Some(ConnEvent::Closed(FeedError::Closed)));
        assert_eq!(b.recv().await, Some(ConnEvent::Closed(FeedError::Closed)));
    }

    #[tokio::test]
    async fn acquire_after_shutdown_is_refused() {
        let connector = MemoryConnector::new();
        let reg = registry(&connector);
        let _a = reg.acquire(URL).unwrap();
        let _server = connector.accept().await.unwrap();

        assert!(!reg.is_closed());
        reg.shutdown().await;
        assert!(reg.is_closed());

        assert!(matches!(reg.acquire(URL), Err(FeedError::Closed)));
        assert!(matches!(reg.clone().acquire("wss://other.test/ws"), Err(FeedError::Closed)));
        assert_eq!(reg.connection_count(), 0);
        assert_eq!(connector.connect_count(), 1);
    }

    #[test]
    fn rejects_invalid_url() {
        let reg = registry(&MemoryConnector::new());
        assert!(matches!(reg.acquire("not a url"), Err(FeedError::Config(_))));
        assert_eq!(reg.connection_count(), 0);
    }
}
