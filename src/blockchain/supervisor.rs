use log::{debug, info, trace};
use serde::Serialize;
use serde_json::json;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::blockchain::provider::{
    ChainProvider, EventSender, LogFilter, ProviderEvent, Subscription, TaggedEvent,
};
use crate::blockchain::transfer_decoder::LogDecoder;
use crate::error::{TransportError, WatcherError};
use crate::logging::{ErrorLogger, LogContext, MetricsLogger};
use crate::models::{NewTransfer, RawLog};
use crate::retry::ReconnectPolicy;
use crate::sink::SinkHandle;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SupervisorState {
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

/// Externally observable view of the watcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatcherStatus {
    pub state: SupervisorState,
    pub generation: u64,
    pub reconnects: u64,
    pub subscription_id: Option<String>,
}

impl Default for WatcherStatus {
    fn default() -> Self {
        Self {
            state: SupervisorState::Connecting,
            generation: 0,
            reconnects: 0,
            subscription_id: None,
        }
    }
}

/// Everything the supervisor mutates; owned by the task running [`TransferWatcher::run`]
struct WatcherState {
    subscription: Option<Box<dyn Subscription>>,
    generation: u64,
    state: SupervisorState,
    failed_attempts: u32,
    reconnects: u64,
}

impl WatcherState {
    fn new() -> Self {
        Self {
            subscription: None,
            generation: 0,
            state: SupervisorState::Connecting,
            failed_attempts: 0,
            reconnects: 0,
        }
    }

    fn status(&self) -> WatcherStatus {
        WatcherStatus {
            state: self.state,
            generation: self.generation,
            reconnects: self.reconnects,
            subscription_id: self.subscription.as_ref().map(|s| s.id().to_string()),
        }
    }
}

/// Keeps exactly one Transfer subscription alive and forwards decoded events to the sink.
///
/// Any transport error or caught panic moves the watcher to `Reconnecting`; after
/// the fixed delay the old subscription is torn down and a new one is opened.
/// Logs the old subscription delivers before teardown are still recorded.
pub struct TransferWatcher {
    provider: Arc<dyn ChainProvider>,
    decoder: Arc<dyn LogDecoder>,
    sink: SinkHandle,
    policy: ReconnectPolicy,
    filter: LogFilter,
    token_address: String,
    status: watch::Sender<WatcherStatus>,
}

impl TransferWatcher {
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        decoder: Arc<dyn LogDecoder>,
        sink: SinkHandle,
        policy: ReconnectPolicy,
    ) -> Self {
        let token_address = decoder.token_address();
        let (status, _) = watch::channel(WatcherStatus::default());

        Self {
            provider,
            decoder,
            sink,
            policy,
            filter: LogFilter::transfer_events(&token_address),
            token_address,
            status,
        }
    }

    /// Observe state transitions
    pub fn status(&self) -> watch::Receiver<WatcherStatus> {
        self.status.subscribe()
    }

    /// Run until `shutdown` flips to true or the reconnect limit is hit
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), WatcherError> {
        info!(
            "Starting transfer watcher for {} via {}",
            self.token_address,
            self.provider.endpoint()
        );

        let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut state = WatcherState::new();
        self.publish(&state);

        let first = tokio::select! {
            result = self.establish(&mut state, &events_tx) => Some(result),
            _ = shutdown_requested(&mut shutdown) => None,
        };
        let Some(first) = first else {
            self.stop(&mut state).await;
            return Ok(());
        };
        let mut reconnect_reason = first.err();

        loop {
            if let Some(reason) = reconnect_reason.take() {
                let attempt = state.failed_attempts + 1;
                let Some(delay) = self.policy.next_delay(attempt) else {
                    self.stop(&mut state).await;
                    let error = WatcherError::ReconnectLimit {
                        attempts: state.failed_attempts,
                    };
                    ErrorLogger::log_error(&error, None);
                    return Err(error);
                };

                state.state = SupervisorState::Reconnecting;
                self.publish(&state);
                MetricsLogger::log_reconnect_scheduled(attempt, delay, &reason.to_string());

                // The old subscription stays open until teardown; keep recording what it delivers
                let sleep = tokio::time::sleep(delay);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = &mut sleep => break,
                        _ = shutdown_requested(&mut shutdown) => {
                            self.stop(&mut state).await;
                            return Ok(());
                        }
                        Some(tagged) = events_rx.recv() => {
                            let live = state.subscription.is_some();
                            if let Err(e) = self.record_while_waiting(state.generation, live, tagged).await {
                                ErrorLogger::log_error(&e, None);
                                self.stop(&mut state).await;
                                return Err(e);
                            }
                        }
                    }
                }

                self.teardown(&mut state).await;
                state.reconnects += 1;

                let result = tokio::select! {
                    result = self.establish(&mut state, &events_tx) => Some(result),
                    _ = shutdown_requested(&mut shutdown) => None,
                };
                match result {
                    Some(Ok(())) => {}
                    Some(Err(e)) => {
                        state.failed_attempts += 1;
                        reconnect_reason = Some(e);
                    }
                    None => {
                        self.stop(&mut state).await;
                        return Ok(());
                    }
                }
                continue;
            }

            let event = tokio::select! {
                event = events_rx.recv() => event,
                _ = shutdown_requested(&mut shutdown) => None,
            };
            // `events_tx` lives as long as this loop, so `None` only means shutdown
            let Some(tagged) = event else {
                self.stop(&mut state).await;
                return Ok(());
            };

            match self.handle_event(state.generation, state.state, tagged).await {
                Ok(reason) => reconnect_reason = reason,
                Err(e) => {
                    ErrorLogger::log_error(&e, None);
                    self.stop(&mut state).await;
                    return Err(e);
                }
            }
        }
    }

    /// Open a new subscription under a fresh generation
    async fn establish(
        &self,
        state: &mut WatcherState,
        events_tx: &mpsc::Sender<TaggedEvent>,
    ) -> Result<(), TransportError> {
        state.generation += 1;
        let generation = state.generation;

        let events = EventSender::new(generation, events_tx.clone());
        let subscription = self.provider.subscribe(&self.filter, events).await?;

        MetricsLogger::log_subscription_established(self.provider.endpoint(), generation, subscription.id());
        state.subscription = Some(subscription);
        state.failed_attempts = 0;
        state.state = SupervisorState::Connected;
        self.publish(state);

        Ok(())
    }

    /// Returns the reason to reconnect, if the event calls for one
    async fn handle_event(
        &self,
        generation: u64,
        state: SupervisorState,
        tagged: TaggedEvent,
    ) -> Result<Option<TransportError>, WatcherError> {
        if tagged.generation != generation || state != SupervisorState::Connected {
            trace!(
                "Ignoring event from generation {} (current {}, {:?})",
                tagged.generation,
                generation,
                state
            );
            return Ok(None);
        }

        match tagged.event {
            ProviderEvent::Error(error) => {
                let context = LogContext::new("supervisor", "provider_error").with_generation(tagged.generation);
                ErrorLogger::log_error(&WatcherError::Transport(error.clone()), Some(context));
                Ok(Some(error))
            }
            ProviderEvent::Log(log) => self.record_log(log, tagged.generation).await,
        }
    }

    /// Handle an event that arrives during the reconnect delay. Logs from the
    /// subscription that is about to be torn down are still recorded; errors are
    /// ignored since a reconnect is already scheduled.
    async fn record_while_waiting(&self, generation: u64, live: bool, tagged: TaggedEvent) -> Result<(), WatcherError> {
        if !live || tagged.generation != generation {
            trace!(
                "Ignoring event from generation {} while reconnecting (current {})",
                tagged.generation,
                generation
            );
            return Ok(());
        }

        match tagged.event {
            ProviderEvent::Log(log) => {
                self.record_log(log, tagged.generation).await?;
            }
            ProviderEvent::Error(error) => {
                debug!("Provider error while reconnecting: {}", error);
            }
        }
        Ok(())
    }

    async fn record_log(&self, log: RawLog, generation: u64) -> Result<Option<TransportError>, WatcherError> {
        let decoded = panic::catch_unwind(AssertUnwindSafe(|| self.decoder.decode(&log)));

        match decoded {
            Ok(Ok(event)) => {
                let record = NewTransfer::from_event(event, &self.token_address);
                self.sink.submit(record).await?;
                Ok(None)
            }
            Ok(Err(e)) => {
                let mut context = LogContext::new("supervisor", "decode").with_generation(generation);
                if let Some(tx_hash) = &log.transaction_hash {
                    context = context.with_transaction_hash(tx_hash);
                }
                ErrorLogger::log_error(&WatcherError::Decode(e), Some(context));
                Ok(None)
            }
            Err(payload) => {
                let fault = TransportError::Fault(format!("decoder panicked: {}", panic_message(payload.as_ref())));
                let context = LogContext::new("supervisor", "decode")
                    .with_generation(generation)
                    .with_metadata("log", json!(log));
                ErrorLogger::log_error(&WatcherError::Transport(fault.clone()), Some(context));
                Ok(Some(fault))
            }
        }
    }

    /// Release the current subscription, if any. Safe to call repeatedly.
    async fn teardown(&self, state: &mut WatcherState) {
        if let Some(mut subscription) = state.subscription.take() {
            debug!(
                "Tearing down subscription {} (generation {})",
                subscription.id(),
                state.generation
            );
            subscription.teardown().await;
            self.publish(state);
        }
    }

    async fn stop(&self, state: &mut WatcherState) {
        self.teardown(state).await;
        state.state = SupervisorState::Stopped;
        self.publish(state);
        info!("Transfer watcher stopped after {} reconnects", state.reconnects);
    }

    fn publish(&self, state: &WatcherState) {
        self.status.send_replace(state.status());
    }
}

/// Resolves once the flag is true. A dropped sender never requests shutdown.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
