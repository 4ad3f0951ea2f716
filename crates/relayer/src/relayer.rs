//! Relayer: collects feeder prices and pokes median contracts
//!
//! Two tasks share one lock over every pair's store:
//! - the collector decodes prices from the transport and inserts them
//! - the scheduler evaluates each pair on a fixed interval and pokes when
//!   the on-chain price has expired or drifted past its spread

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use oracle_core::{
    format_wad, AssetPair, Message, PairConfig, Price, PriceMessage, RelayerConfig, PRICE_TOPIC,
};
use oracle_store::PriceStore;

use crate::median::Median;
use crate::transport::Transport;
use crate::{RelayError, RelayEvent, RelayResult, TransportError};

/// A submitted poke
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PokeReceipt {
    pub tx_hash: B256,
    /// Median of the submitted prices
    pub median: U256,
    pub signatures: usize,
}

/// A registered pair: thresholds, its median client and its price store
struct PairState {
    config: PairConfig,
    median: Arc<dyn Median>,
    store: PriceStore,
}

/// State shared by the collector and scheduler tasks
struct Shared {
    pairs: Mutex<HashMap<AssetPair, PairState>>,
    transport: Arc<dyn Transport>,
    events: mpsc::Sender<RelayEvent>,
    simulate_before_poke: bool,
}

impl Shared {
    fn report(&self, event: RelayEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!("Dropping relay event: {}", e);
        }
    }
}

/// Main relayer
pub struct Relayer {
    interval: Duration,
    feeds: Arc<HashSet<Address>>,
    seed: Option<u64>,
    shared: Arc<Shared>,
    shutdown: Arc<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl Relayer {
    pub fn new(
        config: &RelayerConfig,
        transport: Arc<dyn Transport>,
        events: mpsc::Sender<RelayEvent>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);

        Self {
            interval: config.interval(),
            feeds: Arc::new(config.feeds.iter().copied().collect()),
            seed: None,
            shared: Arc::new(Shared {
                pairs: Mutex::new(HashMap::new()),
                transport,
                events,
                simulate_before_poke: config.simulate_before_poke,
            }),
            shutdown: Arc::new(shutdown),
            handles: vec![],
        }
    }

    /// Seed quorum truncation for pairs registered afterwards
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Register a pair and its median client
    pub async fn add_pair(&self, config: PairConfig, median: Arc<dyn Median>) -> RelayResult<()> {
        config.validate()?;

        let mut pairs = self.shared.pairs.lock().await;
        if pairs.contains_key(&config.asset_pair) {
            return Err(RelayError::DuplicatePair(config.asset_pair));
        }

        let asset_pair = config.asset_pair.clone();
        let feeds = Arc::clone(&self.feeds);
        let store = match self.seed {
            Some(seed) => {
                PriceStore::with_seed(asset_pair.clone(), feeds, seed.wrapping_add(pairs.len() as u64))
            }
            None => PriceStore::new(asset_pair.clone(), feeds),
        };

        info!("Registered {} (median {})", asset_pair, median.address());
        pairs.insert(asset_pair, PairState { config, median, store });
        Ok(())
    }

    /// Subscribe to the price topic and spawn the collector and scheduler
    pub async fn start(&mut self) -> RelayResult<()> {
        // Loops that already exited may be restarted without a `wait()`
        self.handles.retain(|h| !h.is_finished());
        if !self.handles.is_empty() {
            return Err(RelayError::AlreadyStarted);
        }

        info!("Starting relayer");
        self.shared.transport.subscribe(PRICE_TOPIC).await?;
        self.shutdown.send_replace(false);

        let collector = tokio::spawn(run_collector(
            Arc::clone(&self.shared),
            self.shutdown.subscribe(),
            Arc::downgrade(&self.shutdown),
        ));
        let scheduler = tokio::spawn(run_scheduler(
            Arc::clone(&self.shared),
            self.interval,
            self.shutdown.subscribe(),
        ));

        self.handles.push(collector);
        self.handles.push(scheduler);
        Ok(())
    }

    /// Signal both loops to exit. Returns without waiting; a poke already in
    /// flight completes before its loop observes the signal.
    pub fn stop(&self) {
        info!("Stopping relayer");
        self.shutdown.send_replace(true);
    }

    /// Wait for both loops to exit after [`Relayer::stop`]
    pub async fn wait(&mut self) {
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!("Relayer task failed: {}", e);
            }
        }
    }

    /// True while both loops are live
    pub fn is_running(&self) -> bool {
        !self.handles.is_empty() && self.handles.iter().all(|h| !h.is_finished())
    }

    /// Decode and store one price message, as the collector does
    pub async fn collect(&self, payload: &[u8]) -> RelayResult<()> {
        collect(&self.shared, payload).await
    }

    /// Evaluate every pair once at `now`, as the scheduler does on each tick.
    /// Returns the submitted poke per pair, if any.
    pub async fn relay_cycle(
        &self,
        now: DateTime<Utc>,
    ) -> Vec<(AssetPair, RelayResult<Option<PokeReceipt>>)> {
        relay_cycle(&self.shared, now).await
    }

    /// Prices currently held for `asset_pair`
    pub async fn prices(&self, asset_pair: &AssetPair) -> Option<Vec<Price>> {
        let pairs = self.shared.pairs.lock().await;
        pairs.get(asset_pair).map(|state| state.store.prices())
    }

    pub async fn asset_pairs(&self) -> Vec<AssetPair> {
        self.shared.pairs.lock().await.keys().cloned().collect()
    }
}

/// `halt` stops the scheduler too when the transport goes away
async fn run_collector(
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
    halt: Weak<watch::Sender<bool>>,
) {
    info!("Collector listening on {}", PRICE_TOPIC);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            received = shared.transport.wait_for(PRICE_TOPIC) => {
                match received {
                    Ok(payload) => {
                        if let Err(e) = collect(&shared, &payload).await {
                            if e.is_expected() {
                                debug!("Price rejected: {}", e);
                            } else {
                                warn!("Price rejected: {}", e);
                            }
                            shared.report(RelayEvent::Failed(e));
                        }
                    }
                    Err(e @ (TransportError::Closed | TransportError::NotSubscribed(_))) => {
                        warn!("Collector stopping: {}", e);
                        shared.report(RelayEvent::Failed(e.into()));
                        if let Some(halt) = halt.upgrade() {
                            halt.send_replace(true);
                        }
                        break;
                    }
                    Err(e) => {
                        warn!("Transport error: {}", e);
                        shared.report(RelayEvent::Failed(e.into()));
                    }
                }
            }
        }
    }

    if let Err(e) = shared.transport.unsubscribe(PRICE_TOPIC).await {
        debug!("Unsubscribe from {} failed: {}", PRICE_TOPIC, e);
    }
    info!("Collector stopped");
}

async fn run_scheduler(shared: Arc<Shared>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    info!("Scheduler relaying every {:?}", interval);

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                for (asset_pair, result) in relay_cycle(&shared, Utc::now()).await {
                    match result {
                        Ok(_) => {}
                        Err(e) if e.is_expected() => {
                            warn!("{}", e);
                            shared.report(RelayEvent::Failed(e));
                        }
                        Err(e) => {
                            error!("Relay of {} failed: {}", asset_pair, e);
                            shared.report(RelayEvent::Failed(e));
                        }
                    }
                }
            }
        }
    }

    info!("Scheduler stopped");
}

async fn collect(shared: &Shared, payload: &[u8]) -> RelayResult<()> {
    let price = PriceMessage::unmarshal(payload)?.price;

    let mut pairs = shared.pairs.lock().await;
    let state = pairs
        .get_mut(&price.asset_pair)
        .ok_or_else(|| RelayError::PairNotConfigured(price.asset_pair.clone()))?;

    let summary = price.to_string();
    let (feeder, kept) = state.store.add(price)?;
    if kept {
        debug!("Stored {} from {} ({} held)", summary, feeder, state.store.count());
    }
    Ok(())
}

async fn relay_cycle(
    shared: &Shared,
    now: DateTime<Utc>,
) -> Vec<(AssetPair, RelayResult<Option<PokeReceipt>>)> {
    let mut pairs = shared.pairs.lock().await;
    let mut results = Vec::with_capacity(pairs.len());

    for (asset_pair, state) in pairs.iter_mut() {
        let result = relay_pair(state, now, shared.simulate_before_poke).await;
        if let Ok(Some(receipt)) = &result {
            shared.report(RelayEvent::Poked {
                asset_pair: asset_pair.clone(),
                tx_hash: receipt.tx_hash,
                median: receipt.median,
                signatures: receipt.signatures,
            });
        }
        results.push((asset_pair.clone(), result));
    }
    results
}

fn on_chain(asset_pair: &AssetPair, call: &'static str) -> impl FnOnce(anyhow::Error) -> RelayError {
    let asset_pair = asset_pair.clone();
    move |source| RelayError::OnChain {
        asset_pair,
        call,
        source,
    }
}

fn shift(time: DateTime<Utc>, secs: u64, forward: bool) -> DateTime<Utc> {
    let delta = i64::try_from(secs).ok().and_then(TimeDelta::try_seconds);
    let shifted = delta.and_then(|d| {
        if forward {
            time.checked_add_signed(d)
        } else {
            time.checked_sub_signed(d)
        }
    });
    shifted.unwrap_or(if forward {
        DateTime::<Utc>::MAX_UTC
    } else {
        DateTime::<Utc>::MIN_UTC
    })
}

/// One collect/decide/submit step for a single pair
async fn relay_pair(
    state: &mut PairState,
    now: DateTime<Utc>,
    simulate: bool,
) -> RelayResult<Option<PokeReceipt>> {
    let asset_pair = state.config.asset_pair.clone();

    // Chain reads first: a failed read leaves the store untouched
    let bar = state.median.bar().await.map_err(on_chain(&asset_pair, "bar"))?;
    let oracle_age = state.median.age().await.map_err(on_chain(&asset_pair, "age"))?;
    let oracle_price = state.median.price().await.map_err(on_chain(&asset_pair, "price"))?;

    if bar == 0 {
        return Err(RelayError::InvalidQuorum(asset_pair));
    }
    let quorum = usize::try_from(bar).unwrap_or(usize::MAX);

    let store = &mut state.store;
    let expired_prices = store.prune_older_than(shift(now, state.config.price_expiration_secs, false));
    let replayed_prices = store.prune_not_newer_than(oracle_age);
    if expired_prices + replayed_prices > 0 {
        debug!(
            "{}: pruned {} expired and {} already on-chain prices",
            asset_pair, expired_prices, replayed_prices
        );
    }

    store.truncate_to_quorum(quorum);
    if store.count() != quorum {
        return Err(RelayError::InsufficientQuorum {
            asset_pair,
            have: store.count(),
            want: quorum,
        });
    }

    let expired = shift(oracle_age, state.config.oracle_expiration_secs, true) < now;
    let spread = store.spread(oracle_price);
    let stale = spread.abs() >= state.config.oracle_spread;

    if !expired && !stale {
        debug!(
            "{}: on-chain price fresh and within spread ({:.4}% < {}%)",
            asset_pair, spread, state.config.oracle_spread
        );
        return Ok(None);
    }

    let prices = store.sorted_prices();
    let median = store.median();
    info!(
        "{}: poking median {} with {} prices, median {} (spread {:.4}%, expired {})",
        asset_pair,
        state.median.address(),
        prices.len(),
        format_wad(median),
        spread,
        expired
    );

    let result = state.median.poke(&prices, simulate).await;
    // Never resubmit the same observations, successful or not
    store.clear();

    let tx_hash = result.map_err(on_chain(&asset_pair, "poke"))?;
    info!("{}: poke submitted in {}", asset_pair, tx_hash);
    Ok(Some(PokeReceipt {
        tx_hash,
        median,
        signatures: prices.len(),
    }))
}
