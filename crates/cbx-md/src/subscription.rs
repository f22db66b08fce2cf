//! Subscription supervisor.
//!
//! A [`Subscription`] keeps one product flowing across connection failures.
//! Each failed [`StreamSession`] is followed, after the retry policy's
//! backoff, by a brand-new session (and therefore a fresh registry acquire).
//! A session that delivered at least one market event resets the attempt
//! counter. The event channel closes when the policy is exhausted or the
//! registry has been shut down.

use std::sync::{Arc, Mutex, PoisonError};

use cbx_api::SubscriptionBuilder;
use cbx_core::retry::RetryPolicy;
use cbx_core::FeedError;
use cbx_core::ws::ConnectionRegistry;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::event::{FeedEvent, FeedEventReceiver, FeedEventSender};
use crate::session::{SessionEnd, SessionSettings, SessionState, StreamSession};

pub struct Subscription {
    product_id: String,
    state_rx: watch::Receiver<SessionState>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    /// Start following `settings.product_id`. Events arrive on the returned
    /// receiver until [`unsubscribe`](Self::unsubscribe) or retry exhaustion.
    pub fn start(
        settings: SessionSettings,
        registry: ConnectionRegistry,
        builder: SubscriptionBuilder,
        retry: RetryPolicy,
    ) -> (Self, FeedEventReceiver) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (stop_tx, stop_rx) = watch::channel(false);
        let product_id = settings.product_id.clone();

        let task = tokio::spawn(supervise(settings, registry, builder, retry, Arc::new(state_tx), events_tx, stop_rx));

        let sub = Self { product_id, state_rx, stop_tx, task: Mutex::new(Some(task)) };
        (sub, events_rx)
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    /// State of the current (or last) session.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Stop the subscription and wait for its session to release the
    /// connection. Idempotent; other subscribers on the same connection are
    /// unaffected.
    pub async fn unsubscribe(&self) {
        self.stop_tx.send_replace(true);
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("[sub {}] supervisor task failed: {}", self.product_id, e);
            }
        }
    }

    /// True once the supervisor has stopped, for whatever reason.
    pub fn is_finished(&self) -> bool {
        self.task.lock().unwrap_or_else(PoisonError::into_inner).as_ref().is_none_or(|t| t.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
    }
}

async fn supervise(
    settings: SessionSettings,
    registry: ConnectionRegistry,
    builder: SubscriptionBuilder,
    retry: RetryPolicy,
    state: Arc<watch::Sender<SessionState>>,
    events: FeedEventSender,
    mut stop: watch::Receiver<bool>,
) {
    let product = settings.product_id.clone();
    let mut attempt: u32 = 0;

    loop {
        let session =
            StreamSession::with_state(settings.clone(), registry.clone(), builder.clone(), Arc::clone(&state));

        let (reason, delivered) = match session.run(&events, &mut stop).await {
            SessionEnd::Unsubscribed => break,
            SessionEnd::Failed { reason, delivered } => (reason, delivered),
        };

        // Closed only comes from a registry shutdown; there is nothing left to
        // reconnect through.
        let terminal = reason == FeedError::Closed || registry.is_closed();
        if events.send(FeedEvent::Disconnected { reason }).is_err() {
            break;
        }
        if terminal {
            info!("[sub {product}] registry closed, not reconnecting");
            break;
        }
        if delivered {
            attempt = 0;
        }
        attempt += 1;

        let Some(delay) = retry.delay_for(attempt) else {
            error!("[sub {product}] giving up after {} attempts", attempt - 1);
            break;
        };
        info!("[sub {product}] reconnecting in {delay:?} (attempt {attempt})");
        if events.send(FeedEvent::Reconnecting { attempt, delay }).is_err() {
            break;
        }

        tokio::select! {
            _ = stop.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    state.send_replace(SessionState::Closed);
    info!("[sub {product}] stopped");
}
