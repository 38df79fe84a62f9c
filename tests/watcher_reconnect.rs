use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use transfer_watcher::blockchain::{
    ChainProvider, EventSender, LogDecoder, LogFilter, Subscription, SupervisorState, TransferDecoder,
    TransferWatcher, WatcherStatus, TRANSFER_EVENT_SIGNATURE,
};
use transfer_watcher::database::Database;
use transfer_watcher::error::{DecodeError, TransportError};
use transfer_watcher::models::{RawLog, TransferEvent};
use transfer_watcher::retry::ReconnectPolicy;
use transfer_watcher::sink::{spawn_sink, DedupMode, SinkStatsSnapshot};
use transfer_watcher::WatcherError;

const TOKEN: &str = "0x77c1693F22B49381984377B190a15922b89fb64C";
const DELAY: Duration = Duration::from_millis(50);

/// In-process stand-in for a chain node
#[derive(Default)]
struct FakeProvider {
    filters: Mutex<Vec<LogFilter>>,
    senders: Mutex<Vec<EventSender>>,
    active: Arc<AtomicUsize>,
    teardowns: Arc<AtomicUsize>,
    /// Number of upcoming subscribe calls that fail
    fail_next: AtomicU32,
}

impl FakeProvider {
    fn subscribe_calls(&self) -> usize {
        self.filters.lock().unwrap().len()
    }

    fn latest_sender(&self) -> EventSender {
        self.senders.lock().unwrap().last().cloned().expect("no subscription yet")
    }

    fn sender(&self, index: usize) -> EventSender {
        self.senders.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ChainProvider for FakeProvider {
    fn endpoint(&self) -> &str {
        "ws://fake"
    }

    async fn subscribe(
        &self,
        filter: &LogFilter,
        events: EventSender,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        self.filters.lock().unwrap().push(filter.clone());

        let failures_left = self.fail_next.load(Ordering::SeqCst);
        if failures_left > 0 {
            self.fail_next.store(failures_left - 1, Ordering::SeqCst);
            return Err(TransportError::Connection("connection refused".to_string()));
        }

        let id = format!("0xsub{}", events.generation());
        self.senders.lock().unwrap().push(events);
        self.active.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(FakeSubscription {
            id,
            torn_down: false,
            active: Arc::clone(&self.active),
            teardowns: Arc::clone(&self.teardowns),
        }))
    }
}

struct FakeSubscription {
    id: String,
    torn_down: bool,
    active: Arc<AtomicUsize>,
    teardowns: Arc<AtomicUsize>,
}

#[async_trait]
impl Subscription for FakeSubscription {
    fn id(&self) -> &str {
        &self.id
    }

    async fn teardown(&mut self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        if !self.torn_down {
            self.torn_down = true;
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Panics on one specific transaction hash
struct PanickyDecoder {
    inner: TransferDecoder,
}

impl LogDecoder for PanickyDecoder {
    fn token_address(&self) -> String {
        self.inner.token_address()
    }

    fn decode(&self, log: &RawLog) -> Result<TransferEvent, DecodeError> {
        if log.transaction_hash.as_deref() == Some("0xpanic") {
            panic!("decoder blew up");
        }
        self.inner.decode(log)
    }
}

fn address_topic(address: &str) -> String {
    format!("0x{:0>64}", address.trim_start_matches("0x").to_lowercase())
}

fn transfer_log(from: &str, to: &str, value: u128, tx_hash: &str, block_number: u64) -> RawLog {
    RawLog {
        address: TOKEN.to_lowercase(),
        topics: vec![
            TRANSFER_EVENT_SIGNATURE.to_string(),
            address_topic(from),
            address_topic(to),
        ],
        data: format!("0x{:064x}", value),
        block_number: Some(format!("0x{:x}", block_number)),
        transaction_hash: Some(tx_hash.to_string()),
        log_index: Some("0x0".to_string()),
        removed: false,
    }
}

fn sample_log(tx_hash: &str) -> RawLog {
    transfer_log(
        "0xAA00000000000000000000000000000000000001",
        "0xBB00000000000000000000000000000000000002",
        500_000_000_000_000_000,
        tx_hash,
        1000,
    )
}

struct Harness {
    provider: Arc<FakeProvider>,
    database: Arc<Database>,
    status: watch::Receiver<WatcherStatus>,
    shutdown: watch::Sender<bool>,
    watcher: JoinHandle<Result<(), WatcherError>>,
    sink: JoinHandle<SinkStatsSnapshot>,
}

impl Harness {
    fn start(provider: FakeProvider, policy: ReconnectPolicy) -> Self {
        let decoder = Arc::new(TransferDecoder::new(TOKEN).expect("Failed to create decoder"));
        Self::start_with_decoder(provider, policy, decoder)
    }

    fn start_with_decoder(provider: FakeProvider, policy: ReconnectPolicy, decoder: Arc<dyn LogDecoder>) -> Self {
        let provider = Arc::new(provider);
        let database = Arc::new(Database::new_in_memory().expect("Failed to create database"));
        let (sink_handle, sink) = spawn_sink(Arc::clone(&database), DedupMode::Off, 16);

        let watcher = TransferWatcher::new(provider.clone(), decoder, sink_handle, policy);
        let status = watcher.status();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let watcher = tokio::spawn(watcher.run(shutdown_rx));

        Self {
            provider,
            database,
            status,
            shutdown,
            watcher,
            sink,
        }
    }

    async fn wait_for_status(&mut self, predicate: impl Fn(&WatcherStatus) -> bool) -> WatcherStatus {
        let status = tokio::time::timeout(Duration::from_secs(5), self.status.wait_for(|s| predicate(s)))
            .await
            .expect("Timed out waiting for watcher status")
            .expect("Watcher status channel closed");
        status.clone()
    }

    async fn wait_for_rows(&self, expected: u64) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if self.database.get_transfer_count().unwrap() == expected {
                return;
            }
            assert!(tokio::time::Instant::now() < deadline, "Timed out waiting for {} rows", expected);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn stop(self) -> (Result<(), WatcherError>, SinkStatsSnapshot) {
        self.shutdown.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), self.watcher)
            .await
            .expect("Watcher did not stop")
            .unwrap();
        let stats = self.sink.await.unwrap();
        (result, stats)
    }
}

#[tokio::test]
async fn test_each_valid_log_appends_one_verbatim_record() {
    let mut harness = Harness::start(FakeProvider::default(), ReconnectPolicy::fixed(DELAY));
    harness.wait_for_status(|s| s.state == SupervisorState::Connected).await;

    let sender = harness.provider.latest_sender();
    assert!(sender.send_log(sample_log("0xdeadbeef")).await);
    harness.wait_for_rows(1).await;

    let rows = harness
        .database
        .get_transfers_by_address("0xaa00000000000000000000000000000000000001")
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].tx_hash, "0xdeadbeef");
    assert_eq!(rows[0].from_address, "0xAA00000000000000000000000000000000000001");
    assert_eq!(rows[0].to_address, "0xBb00000000000000000000000000000000000002");
    assert_eq!(rows[0].value, "500000000000000000");
    assert_eq!(rows[0].block_number, 1000);
    assert_eq!(rows[0].token_address, TOKEN);
    assert!(rows[0].id > 0);

    let (result, stats) = harness.stop().await;
    assert!(result.is_ok());
    assert_eq!(stats.written, 1);
}

#[tokio::test]
async fn test_duplicate_delivery_persists_two_rows() {
    let mut harness = Harness::start(FakeProvider::default(), ReconnectPolicy::fixed(DELAY));
    harness.wait_for_status(|s| s.state == SupervisorState::Connected).await;

    let sender = harness.provider.latest_sender();
    sender.send_log(sample_log("0xdeadbeef")).await;
    sender.send_log(sample_log("0xdeadbeef")).await;
    harness.wait_for_rows(2).await;

    let (_, stats) = harness.stop().await;
    assert_eq!(stats, SinkStatsSnapshot { written: 2, failed: 0, skipped: 0 });
}

#[tokio::test]
async fn test_transport_error_resubscribes_once_after_delay() {
    let mut harness = Harness::start(FakeProvider::default(), ReconnectPolicy::fixed(DELAY));
    let first = harness.wait_for_status(|s| s.state == SupervisorState::Connected).await;
    assert_eq!(first.generation, 1);

    let started = tokio::time::Instant::now();
    harness
        .provider
        .latest_sender()
        .send_error(TransportError::Closed("socket reset".to_string()))
        .await;

    harness.wait_for_status(|s| s.state == SupervisorState::Reconnecting).await;
    let reconnected = harness
        .wait_for_status(|s| s.state == SupervisorState::Connected && s.generation == 2)
        .await;
    assert!(started.elapsed() >= DELAY);
    assert_eq!(reconnected.reconnects, 1);
    assert_eq!(reconnected.subscription_id.as_deref(), Some("0xsub2"));

    // Exactly one live subscription, to the same address and event
    assert_eq!(harness.provider.active.load(Ordering::SeqCst), 1);
    assert_eq!(harness.provider.subscribe_calls(), 2);
    let filters = harness.provider.filters.lock().unwrap().clone();
    assert_eq!(filters[0], filters[1]);
    assert_eq!(filters[1].address, TOKEN);
    assert_eq!(filters[1].topics, vec![Some(TRANSFER_EVENT_SIGNATURE.to_string())]);

    // No further subscriptions without further errors
    tokio::time::sleep(DELAY * 3).await;
    assert_eq!(harness.provider.subscribe_calls(), 2);

    let active = Arc::clone(&harness.provider.active);
    let (result, _) = harness.stop().await;
    assert!(result.is_ok());
    assert_eq!(active.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_events_from_retired_generation_are_ignored() {
    let mut harness = Harness::start(FakeProvider::default(), ReconnectPolicy::fixed(DELAY));
    harness.wait_for_status(|s| s.state == SupervisorState::Connected).await;

    let old = harness.provider.sender(0);
    old.send_error(TransportError::WebSocket("protocol error".to_string())).await;

    // Errors from the old connection while reconnecting do not schedule more reconnects
    old.send_error(TransportError::Closed("late close".to_string())).await;
    harness
        .wait_for_status(|s| s.state == SupervisorState::Connected && s.generation == 2)
        .await;

    old.send_log(sample_log("0xstale")).await;
    old.send_error(TransportError::Closed("stale".to_string())).await;
    harness.provider.latest_sender().send_log(sample_log("0xfresh")).await;
    harness.wait_for_rows(1).await;

    tokio::time::sleep(DELAY * 2).await;
    assert_eq!(harness.database.get_transfer_count().unwrap(), 1);
    assert_eq!(harness.database.get_transfer(1).unwrap().tx_hash, "0xfresh");
    assert_eq!(harness.provider.subscribe_calls(), 2);

    let (result, _) = harness.stop().await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_teardown_happens_before_resubscribe_and_is_idempotent() {
    let mut harness = Harness::start(FakeProvider::default(), ReconnectPolicy::fixed(DELAY));
    harness.wait_for_status(|s| s.state == SupervisorState::Connected).await;

    harness
        .provider
        .latest_sender()
        .send_error(TransportError::Closed("eof".to_string()))
        .await;
    harness
        .wait_for_status(|s| s.state == SupervisorState::Connected && s.generation == 2)
        .await;
    assert_eq!(harness.provider.teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(harness.provider.active.load(Ordering::SeqCst), 1);

    let teardowns = Arc::clone(&harness.provider.teardowns);
    let active = Arc::clone(&harness.provider.active);
    let (result, _) = harness.stop().await;
    assert!(result.is_ok());
    assert_eq!(teardowns.load(Ordering::SeqCst), 2);
    assert_eq!(active.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_fake_subscription_teardown_twice_is_harmless() {
    let provider = FakeProvider::default();
    let (tx, _rx) = tokio::sync::mpsc::channel(1);
    let mut subscription = provider
        .subscribe(&LogFilter::transfer_events(TOKEN), EventSender::new(1, tx))
        .await
        .unwrap();

    subscription.teardown().await;
    subscription.teardown().await;
    assert_eq!(provider.active.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_gives_up_after_max_consecutive_failures() {
    let provider = FakeProvider::default();
    provider.fail_next.store(u32::MAX, Ordering::SeqCst);
    let harness = Harness::start(provider, ReconnectPolicy::fixed(Duration::from_millis(10)).with_max_attempts(2));

    let result = tokio::time::timeout(Duration::from_secs(5), harness.watcher)
        .await
        .expect("Watcher did not give up")
        .unwrap();

    assert!(matches!(result, Err(WatcherError::ReconnectLimit { attempts: 2 })));
    // Initial attempt plus two reconnects
    assert_eq!(harness.provider.subscribe_calls(), 3);
    assert_eq!(harness.status.borrow().state, SupervisorState::Stopped);
}

#[tokio::test]
async fn test_failure_counter_resets_after_successful_subscribe() {
    let provider = FakeProvider::default();
    provider.fail_next.store(2, Ordering::SeqCst);
    let mut harness = Harness::start(provider, ReconnectPolicy::fixed(Duration::from_millis(10)).with_max_attempts(2));

    // Initial failure, one failed reconnect, then success
    harness.wait_for_status(|s| s.state == SupervisorState::Connected).await;
    assert_eq!(harness.provider.subscribe_calls(), 3);

    // Two more failures would exceed the cap if the counter had not been reset
    harness.provider.fail_next.store(1, Ordering::SeqCst);
    harness
        .provider
        .latest_sender()
        .send_error(TransportError::Closed("eof".to_string()))
        .await;
    harness
        .wait_for_status(|s| s.state == SupervisorState::Connected && s.generation == 5)
        .await;

    let (result, _) = harness.stop().await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_undecodable_log_is_skipped_without_reconnect() {
    let mut harness = Harness::start(FakeProvider::default(), ReconnectPolicy::fixed(DELAY));
    harness.wait_for_status(|s| s.state == SupervisorState::Connected).await;

    let sender = harness.provider.latest_sender();
    let mut broken = sample_log("0xbroken");
    broken.topics.truncate(2);
    sender.send_log(broken).await;
    sender.send_log(sample_log("0xgood")).await;
    harness.wait_for_rows(1).await;

    tokio::time::sleep(DELAY * 2).await;
    assert_eq!(harness.provider.subscribe_calls(), 1);
    assert_eq!(harness.status.borrow().generation, 1);

    let (result, _) = harness.stop().await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_decoder_panic_triggers_reconnect() {
    let decoder = Arc::new(PanickyDecoder {
        inner: TransferDecoder::new(TOKEN).expect("Failed to create decoder"),
    });
    let mut harness = Harness::start_with_decoder(FakeProvider::default(), ReconnectPolicy::fixed(DELAY), decoder);
    harness.wait_for_status(|s| s.state == SupervisorState::Connected).await;

    harness.provider.latest_sender().send_log(sample_log("0xpanic")).await;
    harness
        .wait_for_status(|s| s.state == SupervisorState::Connected && s.generation == 2)
        .await;

    // The watcher keeps recording on the new connection
    harness.provider.latest_sender().send_log(sample_log("0xafter")).await;
    harness.wait_for_rows(1).await;

    let (result, _) = harness.stop().await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_logs_after_panic_on_same_connection_are_recorded() {
    let decoder = Arc::new(PanickyDecoder {
        inner: TransferDecoder::new(TOKEN).expect("Failed to create decoder"),
    });
    let mut harness = Harness::start_with_decoder(FakeProvider::default(), ReconnectPolicy::fixed(DELAY), decoder);
    harness.wait_for_status(|s| s.state == SupervisorState::Connected).await;

    // The socket is still healthy after a caught panic
    let first = harness.provider.latest_sender();
    first.send_log(sample_log("0xpanic")).await;
    first.send_log(sample_log("0xvalid")).await;

    harness
        .wait_for_status(|s| s.state == SupervisorState::Connected && s.generation == 2)
        .await;
    harness.wait_for_rows(1).await;
    assert_eq!(harness.database.get_transfer(1).unwrap().tx_hash, "0xvalid");

    // Once torn down, the old connection is retired
    first.send_log(sample_log("0xretired")).await;
    tokio::time::sleep(DELAY * 2).await;
    assert_eq!(harness.database.get_transfer_count().unwrap(), 1);
    assert_eq!(harness.provider.subscribe_calls(), 2);

    let (result, stats) = harness.stop().await;
    assert!(result.is_ok());
    assert_eq!(stats.written, 1);
}

#[tokio::test]
async fn test_shutdown_during_reconnect_delay() {
    let mut harness = Harness::start(FakeProvider::default(), ReconnectPolicy::fixed(Duration::from_secs(60)));
    harness.wait_for_status(|s| s.state == SupervisorState::Connected).await;

    harness
        .provider
        .latest_sender()
        .send_error(TransportError::Closed("eof".to_string()))
        .await;
    harness.wait_for_status(|s| s.state == SupervisorState::Reconnecting).await;

    let provider = Arc::clone(&harness.provider);
    let (result, _) = harness.stop().await;
    assert!(result.is_ok());
    assert_eq!(provider.subscribe_calls(), 1);
    assert_eq!(provider.active.load(Ordering::SeqCst), 0);
}
