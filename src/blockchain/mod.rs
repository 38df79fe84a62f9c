pub mod provider;
pub mod supervisor;
pub mod transfer_decoder;
pub mod ws_provider;

pub use provider::{ChainProvider, EventSender, LogFilter, ProviderEvent, Subscription, TaggedEvent, TRANSFER_EVENT_SIGNATURE};
pub use supervisor::{SupervisorState, TransferWatcher, WatcherStatus};
pub use transfer_decoder::{parse_quantity, LogDecoder, TransferDecoder};
pub use ws_provider::{WsProvider, WsSubscription};
