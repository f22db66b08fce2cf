//! Candle feed: one [`Subscription`] folded into one [`CandleAggregator`].
//!
//! ```text
//! Subscription ──FeedEvent──► feed task ──apply(match)──► CandleAggregator
//!                                  │
//!                                  └──CandleUpdate──► caller
//! ```
//!
//! History can be merged in at any time through [`CandleFeed::seed`]; the
//! aggregator sits behind a mutex shared with the feed task.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cbx_api::SubscriptionBuilder;
use cbx_core::retry::RetryPolicy;
use cbx_core::ws::ConnectionRegistry;
use cbx_core::{Candle, Granularity, MarketEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::candles::{CandleAggregator, CandleUpdate};
use crate::event::{FeedEvent, FeedEventReceiver};
use crate::session::{SessionSettings, SessionState};
use crate::subscription::Subscription;

/// Receiver of candle updates from a [`CandleFeed`].
pub type CandleUpdateReceiver = mpsc::UnboundedReceiver<CandleUpdate>;

pub struct CandleFeed {
    label: String,
    subscription: Subscription,
    aggregator: Arc<Mutex<CandleAggregator>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CandleFeed {
    /// Subscribe to `settings.product_id` and aggregate its trades at
    /// `granularity`.
    pub fn start(
        settings: SessionSettings,
        granularity: Granularity,
        registry: ConnectionRegistry,
        builder: SubscriptionBuilder,
        retry: RetryPolicy,
    ) -> (Self, CandleUpdateReceiver) {
        let label = format!("{}/{}", settings.product_id, granularity);
        let aggregator = Arc::new(Mutex::new(CandleAggregator::new(granularity)));
        let (subscription, events) = Subscription::start(settings, registry, builder, retry);
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_feed(label.clone(), events, Arc::clone(&aggregator), updates_tx));
        info!("[feed {label}] started");

        let feed = Self { label, subscription, aggregator, task: Mutex::new(Some(task)) };
        (feed, updates_rx)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Merge history into the series.
    pub fn seed(&self, candles: Vec<Candle>) {
        let count = candles.len();
        self.lock().seed(candles);
        info!("[feed {}] seeded {} candles", self.label, count);
    }

    /// Copy of the current series.
    pub fn series(&self) -> Vec<Candle> {
        self.lock().series().to_vec()
    }

    pub fn last(&self) -> Option<Candle> {
        self.lock().last().copied()
    }

    pub fn late_count(&self) -> u64 {
        self.lock().late_count()
    }

    pub fn state(&self) -> SessionState {
        self.subscription.state()
    }

    /// Unsubscribe and wait for the feed task to drain. Idempotent.
    pub async fn stop(&self) {
        self.subscription.unsubscribe().await;
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("[feed {}] task failed: {}", self.label, e);
            }
        }
        info!("[feed {}] stopped", self.label);
    }

    fn lock(&self) -> MutexGuard<'_, CandleAggregator> {
        self.aggregator.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_feed(
    label: String,
    mut events: FeedEventReceiver,
    aggregator: Arc<Mutex<CandleAggregator>>,
    updates: mpsc::UnboundedSender<CandleUpdate>,
) {
    while let Some(event) = events.recv().await {
        match event {
            FeedEvent::Market(MarketEvent::Match(trade)) => {
                let update = aggregator.lock().unwrap_or_else(PoisonError::into_inner).apply(&trade);
                // A dropped receiver only means nobody is listening; the
                // series keeps growing.
                let _ = updates.send(update);
            }
            FeedEvent::Market(other) => trace!("[feed {label}] ignoring {}", other.kind()),
            FeedEvent::Connected { connection_id, owner } => {
                info!("[feed {label}] connected on ws-{connection_id} (owner: {owner})")
            }
            FeedEvent::Disconnected { reason } => warn!("[feed {label}] disconnected: {reason}"),
            FeedEvent::Reconnecting { attempt, delay } => {
                debug!("[feed {label}] reconnect attempt {attempt} in {delay:?}")
            }
        }
    }
    debug!("[feed {label}] event channel closed");
}
