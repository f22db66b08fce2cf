//! In-process loopback connector.
//!
//! [`MemoryConnector`] hands out connections whose far end is a
//! [`MemoryServer`] owned by the caller. It counts every `connect` call and
//! can be scripted to refuse or hang, which is how the registry and session
//! behaviour is exercised without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::{sink, stream};
use tokio::sync::mpsc;

use super::client::{Connector, FrameSink, FrameStream};
use crate::error::FeedError;

/// What the next `connect` call does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectPlan {
    /// Open a connection and publish its server end.
    Accept,
    /// Fail immediately with a connection error.
    Refuse(String),
    /// Never complete.
    Hang,
}

/// Loopback connector. Clones share state.
#[derive(Clone)]
pub struct MemoryConnector {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    connects: AtomicUsize,
    plans: Mutex<VecDeque<ConnectPlan>>,
    accepted_tx: mpsc::UnboundedSender<MemoryServer>,
    accepted_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemoryServer>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(MemoryInner {
                connects: AtomicUsize::new(0),
                plans: Mutex::new(VecDeque::new()),
                accepted_tx,
                accepted_rx: tokio::sync::Mutex::new(accepted_rx),
            }),
        }
    }

    /// Number of `connect` calls so far, whatever their outcome.
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Queue the behaviour of a future `connect`. Unplanned connects accept.
    pub fn push_plan(&self, plan: ConnectPlan) {
        self.inner.plans.lock().unwrap_or_else(PoisonError::into_inner).push_back(plan);
    }

    /// Wait for the next accepted connection's server end.
    pub async fn accept(&self) -> Option<MemoryServer> {
        self.inner.accepted_rx.lock().await.recv().await
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), FeedError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        let plan = self
            .inner
            .plans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(ConnectPlan::Accept);

        match plan {
            ConnectPlan::Accept => {}
            ConnectPlan::Refuse(reason) => return Err(FeedError::Connection(reason)),
            ConnectPlan::Hang => std::future::pending::<()>().await,
        }

        let (to_client, client_rx) = mpsc::unbounded_channel::<Result<String, FeedError>>();
        let (client_tx, from_client) = mpsc::unbounded_channel::<String>();

        let frame_sink = sink::unfold(client_tx, |tx, text: String| async move {
            tx.send(text).map_err(|_| FeedError::Connection("peer went away".into()))?;
            Ok::<_, FeedError>(tx)
        });
        let frame_stream = stream::unfold(client_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        let server = MemoryServer { url: url.to_owned(), to_client: Some(to_client), from_client };
        // The receiver lives as long as the connector; a send failure only
        // means nobody will ever accept, which is fine.
        let _ = self.inner.accepted_tx.send(server);

        Ok((Box::pin(frame_sink), Box::pin(frame_stream)))
    }
}

/// Server end of a loopback connection.
pub struct MemoryServer {
    pub url: String,
    to_client: Option<mpsc::UnboundedSender<Result<String, FeedError>>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MemoryServer {
    /// Deliver a text frame to the client. Returns `false` once closed.
    pub fn send_frame(&self, text: impl Into<String>) -> bool {
        self.to_client.as_ref().is_some_and(|tx| tx.send(Ok(text.into())).is_ok())
    }

    /// Break the connection with a transport error.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if let Some(tx) = self.to_client.take() {
            let _ = tx.send(Err(FeedError::Connection(reason.into())));
        }
    }

    /// Close the connection cleanly (the client stream ends).
    pub fn close(&mut self) {
        self.to_client = None;
    }

    /// Next frame the client sent, waiting for it.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next frame the client sent, if one is already queued.
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }
}
