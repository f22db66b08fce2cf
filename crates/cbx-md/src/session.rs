//! One feed session: a single pass through the connection lifecycle.
//!
//! ```text
//! IDLE ──acquire──► CONNECTING ──open, send subscribe──► AUTHENTICATING
//!                        │                                     │
//!                        │ attached to a live connection       │ first inbound frame
//!                        └──────────────► STREAMING ◄──────────┘
//!
//! any state ──close / error / timeout / unsubscribe──► CLOSED
//! ```
//!
//! The feed has no explicit authentication ack, so the first inbound frame of
//! any kind (usually `subscriptions`) is taken as success.
//!
//! CLOSED is terminal. Reconnecting means building a new session, which goes
//! through a fresh registry acquire; see [`Subscription`](crate::subscription::Subscription).

use std::sync::Arc;
use std::time::Duration;

use cbx_api::SubscriptionBuilder;
use cbx_core::config::AppConfig;
use cbx_core::ws::{ConnEvent, ConnectionHandle, ConnectionRegistry};
use cbx_core::FeedError;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::event::{FeedEvent, FeedEventSender};
use crate::json_parser::{DecodedFrame, decode_frame};

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Authenticating,
    Streaming,
    Closed,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnd {
    /// The caller stopped it (or dropped the event receiver).
    Unsubscribed,
    /// The connection failed, closed or timed out.
    Failed {
        reason: FeedError,
        /// Whether at least one market event for the product was
        /// delivered. Reaching STREAMING alone does not count: a rejected
        /// subscribe still answers with an `error` frame before closing.
        delivered: bool,
    },
}

/// Where and what a session subscribes to.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub url: String,
    pub product_id: String,
    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
}

impl SessionSettings {
    pub fn new(url: impl Into<String>, product_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            product_id: product_id.into(),
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_config(config: &AppConfig, product_id: &str) -> Self {
        Self {
            url: config.ws_url.clone(),
            product_id: product_id.to_owned(),
            connect_timeout: config.connect_timeout(),
            auth_timeout: config.auth_timeout(),
        }
    }
}

pub struct StreamSession {
    settings: SessionSettings,
    registry: ConnectionRegistry,
    builder: SubscriptionBuilder,
    state: Arc<watch::Sender<SessionState>>,
}

impl StreamSession {
    pub fn new(settings: SessionSettings, registry: ConnectionRegistry, builder: SubscriptionBuilder) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self::with_state(settings, registry, builder, Arc::new(state))
    }

    /// Build a session that reports into an existing state channel. The
    /// channel is reset to IDLE.
    pub fn with_state(
        settings: SessionSettings,
        registry: ConnectionRegistry,
        builder: SubscriptionBuilder,
        state: Arc<watch::Sender<SessionState>>,
    ) -> Self {
        state.send_replace(SessionState::Idle);
        Self { settings, registry, builder, state }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn product_id(&self) -> &str {
        &self.settings.product_id
    }

    /// Run the lifecycle to CLOSED.
    ///
    /// Events for this session's product go to `events`. Setting `stop` to
    /// `true` (or dropping its sender) ends the session as
    /// [`SessionEnd::Unsubscribed`]. The registry handle is released before
    /// this returns.
    pub async fn run(&self, events: &FeedEventSender, stop: &mut watch::Receiver<bool>) -> SessionEnd {
        if *stop.borrow() {
            self.set_state(SessionState::Closed);
            return SessionEnd::Unsubscribed;
        }

        self.set_state(SessionState::Connecting);
        let end = match self.registry.acquire(&self.settings.url) {
            Ok(mut handle) => {
                let end = self.drive(&mut handle, events, stop).await;
                handle.release();
                end
            }
            Err(e) => SessionEnd::Failed { reason: e, delivered: false },
        };
        self.set_state(SessionState::Closed);

        match &end {
            SessionEnd::Unsubscribed => info!("[session {}] unsubscribed", self.settings.product_id),
            SessionEnd::Failed { reason, .. } => warn!("[session {}] closed: {}", self.settings.product_id, reason),
        }
        end
    }

    async fn drive(
        &self,
        handle: &mut ConnectionHandle,
        events: &FeedEventSender,
        stop: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let product = self.settings.product_id.as_str();
        let mut delivered = false;

        // CONNECTING
        let opened = tokio::select! {
            _ = stop.changed() => return SessionEnd::Unsubscribed,
            res = tokio::time::timeout(self.settings.connect_timeout, handle.wait_open()) => res,
        };
        match opened {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return SessionEnd::Failed { reason, delivered: false },
            Err(_) => {
                return SessionEnd::Failed { reason: FeedError::Timeout("connecting".into()), delivered: false };
            }
        }

        let subscribe = self.builder.build_subscribe(product).to_json();
        match handle.send_subscribe(product, subscribe) {
            Ok(true) => debug!("[session {product}] subscribe queued on ws-{}", handle.connection_id()),
            Ok(false) => debug!("[session {product}] ws-{} already carries {product}", handle.connection_id()),
            Err(reason) => return SessionEnd::Failed { reason, delivered: false },
        }

        let connected = FeedEvent::Connected { connection_id: handle.connection_id(), owner: handle.is_owner() };
        if events.send(connected).is_err() {
            return SessionEnd::Unsubscribed;
        }

        // AUTHENTICATING, only for the session that opened the connection.
        if handle.is_owner() {
            self.set_state(SessionState::Authenticating);
            let first = tokio::select! {
                _ = stop.changed() => return SessionEnd::Unsubscribed,
                res = tokio::time::timeout(self.settings.auth_timeout, handle.recv()) => res,
            };
            match first {
                Ok(Some(ConnEvent::Frame(text))) => {
                    self.set_state(SessionState::Streaming);
                    match self.forward(&text, events) {
                        Some(sent) => delivered |= sent,
                        None => return SessionEnd::Unsubscribed,
                    }
                }
                Ok(Some(ConnEvent::Closed(reason))) => {
                    let reason = match reason {
                        FeedError::Connection(_) => reason,
                        other => FeedError::Connection(other.to_string()),
                    };
                    return SessionEnd::Failed { reason, delivered: false };
                }
                Ok(None) => return SessionEnd::Failed { reason: FeedError::Closed, delivered: false },
                Err(_) => {
                    return SessionEnd::Failed {
                        reason: FeedError::Timeout("authenticating".into()),
                        delivered: false,
                    };
                }
            }
        } else {
            self.set_state(SessionState::Streaming);
        }

        // STREAMING
        loop {
            tokio::select! {
                _ = stop.changed() => return SessionEnd::Unsubscribed,
                event = handle.recv() => match event {
                    Some(ConnEvent::Frame(text)) => match self.forward(&text, events) {
                        Some(sent) => delivered |= sent,
                        None => return SessionEnd::Unsubscribed,
                    },
                    Some(ConnEvent::Closed(reason)) => return SessionEnd::Failed { reason, delivered },
                    None => return SessionEnd::Failed { reason: FeedError::Closed, delivered },
                },
            }
        }
    }

    /// Decode a frame and pass it on if it belongs to this product.
    ///
    /// `Some(true)` if a market event was delivered, `Some(false)` if the
    /// frame was skipped, `None` once the receiver is gone.
    fn forward(&self, text: &str, events: &FeedEventSender) -> Option<bool> {
        match decode_frame(text) {
            DecodedFrame::Event(event) if event.product_id() == self.settings.product_id => {
                events.send(FeedEvent::Market(event)).ok().map(|()| true)
            }
            DecodedFrame::Event(event) => {
                trace!("[session {}] skipping {} for {}", self.settings.product_id, event.kind(), event.product_id());
                Some(false)
            }
            DecodedFrame::Unrecognized => Some(false),
        }
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!("[session {}] {:?} -> {:?}", self.settings.product_id, prev, next);
        }
    }
}
