//! Invoice scheduler
//!
//! Drives polling of outstanding quotes: a countdown that ticks every
//! second, and a check each time it reaches zero. One poll runs per key;
//! starting a poll for a key that is already polling replaces it.
//!
//! Progress is published on a `watch` channel so callers can render the
//! countdown and the attempt count without owning the loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::{AbortHandle, Abortable};
use tokio::sync::watch;

use super::errors::CashuWalletError;
use super::lightning::advance_mint_quote;
use crate::services::node_invoice::{NodeInvoiceClient, NodeInvoiceState, NodeInvoiceStatus};
use crate::stores::api_keys::{ApiKeyRecord, ApiKeyStore};
use crate::stores::cashu_wallet::WalletSession;
use crate::stores::settings_store::EngineSettings;
use crate::utils::time::{now_secs, sleep_secs};

// =============================================================================
// Poll targets
// =============================================================================

/// Result of one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// Not terminal yet, check again after the interval
    Continue,
    /// Terminal success, with a message for the user
    Done(String),
    /// Terminal failure
    Failed(String),
}

/// Something the scheduler can check repeatedly
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait PollTarget: Send + Sync {
    /// Identifies the poll; one poll runs per key
    fn key(&self) -> String;

    /// Seconds between checks
    fn interval_secs(&self) -> u64;

    /// Give up after this many checks
    fn max_attempts(&self) -> Option<u32> {
        None
    }

    async fn poll(&self) -> PollStatus;
}

// =============================================================================
// Progress
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollPhase {
    Running,
    Done(String),
    Failed(String),
    /// Hit the attempt ceiling without a terminal state
    Exhausted,
    Cancelled,
}

impl PollPhase {
    pub fn is_finished(&self) -> bool {
        !matches!(self, PollPhase::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollProgress {
    pub attempts: u32,
    pub seconds_until_next: u64,
    pub phase: PollPhase,
}

impl PollProgress {
    fn starting(interval_secs: u64) -> Self {
        Self {
            attempts: 0,
            seconds_until_next: interval_secs,
            phase: PollPhase::Running,
        }
    }
}

// =============================================================================
// Scheduler
// =============================================================================

struct ActivePoll {
    generation: u64,
    abort: AbortHandle,
    progress: Arc<watch::Sender<PollProgress>>,
}

type ActiveMap = Arc<Mutex<HashMap<String, ActivePoll>>>;

/// Runs at most one poll per key
#[derive(Clone)]
pub struct InvoicePoller {
    tick_secs: u64,
    active: ActiveMap,
    next_generation: Arc<AtomicU64>,
}

impl InvoicePoller {
    pub fn new(tick_secs: u64) -> Self {
        Self {
            tick_secs: tick_secs.max(1),
            active: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(settings.countdown_tick_secs)
    }

    /// Start polling `target`, replacing any poll already running for its key
    pub fn start(&self, target: Arc<dyn PollTarget>) -> watch::Receiver<PollProgress> {
        let key = target.key();
        self.cancel(&key);

        let interval = target.interval_secs().max(1);
        let (tx, rx) = watch::channel(PollProgress::starting(interval));
        let progress = Arc::new(tx);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (abort, registration) = AbortHandle::new_pair();

        if let Ok(mut active) = self.active.lock() {
            active.insert(
                key.clone(),
                ActivePoll {
                    generation,
                    abort,
                    progress: progress.clone(),
                },
            );
        }

        log::info!("Polling {} every {}s", key, interval);

        let tick = self.tick_secs.min(interval);
        let active = self.active.clone();
        let task = async move {
            let _ = Abortable::new(run_poll(target, interval, tick, progress), registration).await;
            if let Ok(mut map) = active.lock() {
                if map.get(&key).map(|p| p.generation) == Some(generation) {
                    map.remove(&key);
                }
            }
        };

        #[cfg(target_arch = "wasm32")]
        wasm_bindgen_futures::spawn_local(task);
        #[cfg(not(target_arch = "wasm32"))]
        tokio::spawn(task);

        rx
    }

    /// Stop the poll for `key`. Returns whether one was running.
    pub fn cancel(&self, key: &str) -> bool {
        let removed = self.active.lock().ok().and_then(|mut map| map.remove(key));
        match removed {
            Some(poll) => {
                poll.abort.abort();
                poll.progress.send_modify(|p| p.phase = PollPhase::Cancelled);
                log::debug!("Cancelled poll for {}", key);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let drained: Vec<ActivePoll> = match self.active.lock() {
            Ok(mut map) => map.drain().map(|(_, poll)| poll).collect(),
            Err(_) => return,
        };
        if !drained.is_empty() {
            log::info!("Cancelling {} active polls", drained.len());
        }
        for poll in drained {
            poll.abort.abort();
            poll.progress.send_modify(|p| p.phase = PollPhase::Cancelled);
        }
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.active
            .lock()
            .map(|map| map.contains_key(key))
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().map(|map| map.len()).unwrap_or(0)
    }
}

async fn run_poll(
    target: Arc<dyn PollTarget>,
    interval: u64,
    tick: u64,
    progress: Arc<watch::Sender<PollProgress>>,
) {
    let key = target.key();
    let mut attempts: u32 = 0;

    loop {
        let mut remaining = interval;
        while remaining > 0 {
            progress.send_modify(|p| p.seconds_until_next = remaining);
            let step = tick.min(remaining);
            sleep_secs(step).await;
            remaining -= step;
        }

        attempts += 1;
        progress.send_modify(|p| {
            p.attempts = attempts;
            p.seconds_until_next = 0;
        });

        match target.poll().await {
            PollStatus::Continue => {}
            PollStatus::Done(message) => {
                log::info!("Poll {} finished after {} attempts: {}", key, attempts, message);
                progress.send_modify(|p| p.phase = PollPhase::Done(message));
                return;
            }
            PollStatus::Failed(message) => {
                log::warn!("Poll {} failed after {} attempts: {}", key, attempts, message);
                progress.send_modify(|p| p.phase = PollPhase::Failed(message));
                return;
            }
        }

        if let Some(max) = target.max_attempts() {
            if attempts >= max {
                log::warn!("Poll {} gave up after {} attempts", key, attempts);
                progress.send_modify(|p| p.phase = PollPhase::Exhausted);
                return;
            }
        }
    }
}

// =============================================================================
// Mint quotes
// =============================================================================

/// Checks a deposit quote and mints once it is paid
pub struct MintQuotePoll {
    wallet: Arc<WalletSession>,
    quote_id: String,
}

impl MintQuotePoll {
    pub fn new(wallet: Arc<WalletSession>, quote_id: impl Into<String>) -> Self {
        Self {
            wallet,
            quote_id: quote_id.into(),
        }
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl PollTarget for MintQuotePoll {
    fn key(&self) -> String {
        format!("mint:{}", self.quote_id)
    }

    fn interval_secs(&self) -> u64 {
        self.wallet.settings().mint_quote_poll_secs
    }

    // past this the recovery sweep picks the quote up
    fn max_attempts(&self) -> Option<u32> {
        Some(self.wallet.settings().node_invoice_max_attempts)
    }

    async fn poll(&self) -> PollStatus {
        match advance_mint_quote(&self.wallet, &self.quote_id).await {
            Ok(outcome) if outcome.is_terminal() => PollStatus::Done(outcome.message()),
            Ok(_) => PollStatus::Continue,
            Err(e) if e.is_retryable() => {
                log::debug!("Quote {} check failed, will retry: {}", self.quote_id, e);
                PollStatus::Continue
            }
            Err(e) => PollStatus::Failed(e.user_message()),
        }
    }
}

// =============================================================================
// Node invoices
// =============================================================================

/// Watches a node-issued invoice until the node reports it settled
pub struct NodeInvoicePoll {
    client: NodeInvoiceClient,
    invoice_id: String,
    api_keys: Option<ApiKeyStore>,
    interval_secs: u64,
    max_attempts: u32,
}

impl NodeInvoicePoll {
    pub fn new(
        client: NodeInvoiceClient,
        invoice_id: impl Into<String>,
        settings: &EngineSettings,
    ) -> Self {
        Self {
            client,
            invoice_id: invoice_id.into(),
            api_keys: None,
            interval_secs: settings.node_invoice_poll_secs,
            max_attempts: settings.node_invoice_max_attempts,
        }
    }

    /// Store the API key a paid invoice returns
    pub fn with_api_keys(mut self, api_keys: ApiKeyStore) -> Self {
        self.api_keys = Some(api_keys);
        self
    }

    async fn on_status(&self, status: NodeInvoiceStatus) -> PollStatus {
        match status.status {
            NodeInvoiceState::Pending => PollStatus::Continue,
            NodeInvoiceState::Expired => PollStatus::Failed("Invoice expired".to_string()),
            NodeInvoiceState::Cancelled => PollStatus::Failed("Invoice was cancelled".to_string()),
            NodeInvoiceState::Paid => {
                let (Some(key), Some(store)) = (status.api_key, &self.api_keys) else {
                    return PollStatus::Done("Payment received".to_string());
                };
                let mut record = ApiKeyRecord::new(key, status.paid_at.unwrap_or_else(now_secs));
                record.balance_sats = status.amount_sats;
                record.invoice_id = Some(self.invoice_id.clone());
                let masked = record.masked();
                match store.add(record).await {
                    Ok(_) => PollStatus::Done(format!("Payment received, API key {} saved", masked)),
                    Err(e) => {
                        log::error!("Paid invoice {} but saving its key failed: {}", self.invoice_id, e);
                        PollStatus::Done(format!("Payment received, but saving API key {} failed", masked))
                    }
                }
            }
        }
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl PollTarget for NodeInvoicePoll {
    fn key(&self) -> String {
        format!("node:{}", self.invoice_id)
    }

    fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    fn max_attempts(&self) -> Option<u32> {
        Some(self.max_attempts)
    }

    async fn poll(&self) -> PollStatus {
        match self.client.invoice_status(&self.invoice_id).await {
            Ok(status) => self.on_status(status).await,
            Err(e) => {
                let err: CashuWalletError = e.into();
                if err.is_retryable() {
                    log::debug!("Invoice {} status check failed, will retry: {}", self.invoice_id, err);
                    PollStatus::Continue
                } else {
                    PollStatus::Failed(err.user_message())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::cashu::lightning::create_mint_quote;
    use crate::stores::cashu::test_support::{FakeMint, FakeMintFactory};
    use crate::stores::cashu::types::{MintUnit, QuoteState};
    use crate::stores::cashu_wallet::test_session::session;
    use crate::stores::local_store::{KeyValueStore, MemoryStore};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct Scripted {
        key: String,
        max: Option<u32>,
        script: Mutex<VecDeque<PollStatus>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(key: &str, max: Option<u32>, script: Vec<PollStatus>) -> Arc<Self> {
            Arc::new(Self {
                key: key.to_string(),
                max,
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
    #[cfg_attr(not(target_arch = "wasm32"), async_trait)]
    impl PollTarget for Scripted {
        fn key(&self) -> String {
            self.key.clone()
        }

        fn interval_secs(&self) -> u64 {
            3
        }

        fn max_attempts(&self) -> Option<u32> {
            self.max
        }

        async fn poll(&self) -> PollStatus {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(PollStatus::Continue)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_done() {
        let poller = InvoicePoller::new(1);
        let target = Scripted::new(
            "q1",
            None,
            vec![PollStatus::Continue, PollStatus::Continue, PollStatus::Done("paid".into())],
        );
        let mut rx = poller.start(target.clone());

        let progress = rx.wait_for(|p| p.phase.is_finished()).await.unwrap().clone();
        assert_eq!(progress.phase, PollPhase::Done("paid".into()));
        assert_eq!(progress.attempts, 3);
        assert_eq!(target.calls(), 3);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!poller.is_active("q1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_ceiling() {
        let poller = InvoicePoller::new(1);
        let target = Scripted::new("q2", Some(3), vec![]);
        let mut rx = poller.start(target.clone());

        let progress = rx.wait_for(|p| p.phase.is_finished()).await.unwrap().clone();
        assert_eq!(progress.phase, PollPhase::Exhausted);
        assert_eq!(target.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_running_poll() {
        let poller = InvoicePoller::new(1);
        let first = Scripted::new("same", None, vec![]);
        let second = Scripted::new("same", None, vec![]);

        let first_rx = poller.start(first.clone());
        tokio::time::sleep(Duration::from_secs(4)).await;
        let _second_rx = poller.start(second.clone());

        assert_eq!(first_rx.borrow().phase, PollPhase::Cancelled);
        assert_eq!(poller.active_count(), 1);

        let first_calls = first.calls();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(first.calls(), first_calls);
        assert!(second.calls() > 0);
        poller.cancel_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_stops_polling() {
        let poller = InvoicePoller::new(1);
        let a = Scripted::new("a", None, vec![]);
        let b = Scripted::new("b", None, vec![]);
        let rx = poller.start(a.clone());
        poller.start(b.clone());
        tokio::time::sleep(Duration::from_secs(7)).await;

        poller.cancel_all();
        assert_eq!(poller.active_count(), 0);
        assert_eq!(rx.borrow().phase, PollPhase::Cancelled);

        let calls = (a.calls(), b.calls());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!((a.calls(), b.calls()), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_ticks() {
        let poller = InvoicePoller::new(1);
        let target = Scripted::new("tick", None, vec![]);
        let rx = poller.start(target);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(rx.borrow().seconds_until_next, 2);
        assert_eq!(rx.borrow().attempts, 0);
        poller.cancel("tick");
    }

    #[tokio::test(start_paused = true)]
    async fn test_mint_quote_poll_credits_once_paid() {
        let factory = FakeMintFactory::new();
        let mint = FakeMint::new("https://mint.example", MintUnit::Sat);
        factory.add_mint(mint.clone());
        let wallet = Arc::new(session(&factory));

        let quote = create_mint_quote(&wallet, "https://mint.example", 500).await.unwrap();
        let poller = InvoicePoller::from_settings(wallet.settings());
        let mut rx = poller.start(Arc::new(MintQuotePoll::new(wallet.clone(), &quote.quote_id)));

        rx.wait_for(|p| p.attempts >= 2).await.unwrap();
        assert_eq!(wallet.balance_sats(), 0);
        mint.pay_quote(&quote.quote_id);

        let progress = rx.wait_for(|p| p.phase.is_finished()).await.unwrap().clone();
        assert_eq!(progress.phase, PollPhase::Done("Received 500 sats".into()));
        assert_eq!(wallet.balance_sats(), 500);
        assert_eq!(
            wallet.invoice_store().get(&quote.quote_id).unwrap().state,
            QuoteState::Issued
        );
    }

    #[tokio::test]
    async fn test_paid_node_invoice_saves_key() {
        let settings = EngineSettings::default();
        let client = NodeInvoiceClient::new("https://node.example", 5).unwrap();
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let keys = ApiKeyStore::new(store, None);
        let poll = NodeInvoicePoll::new(client, "inv-1", &settings).with_api_keys(keys.clone());

        let pending = NodeInvoiceStatus {
            status: NodeInvoiceState::Pending,
            api_key: None,
            amount_sats: None,
            paid_at: None,
        };
        assert_eq!(poll.on_status(pending).await, PollStatus::Continue);

        let paid = NodeInvoiceStatus {
            status: NodeInvoiceState::Paid,
            api_key: Some("sk-abcdef123456".into()),
            amount_sats: Some(2100),
            paid_at: Some(1_700_000_000),
        };
        assert!(matches!(poll.on_status(paid).await, PollStatus::Done(_)));

        let saved = keys.list().await;
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].balance_sats, Some(2100));
        assert_eq!(saved[0].invoice_id.as_deref(), Some("inv-1"));
        assert_eq!(saved[0].created_at, 1_700_000_000);

        let expired = NodeInvoiceStatus {
            status: NodeInvoiceState::Expired,
            api_key: None,
            amount_sats: None,
            paid_at: None,
        };
        assert!(matches!(poll.on_status(expired).await, PollStatus::Failed(_)));
    }
}
