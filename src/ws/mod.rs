//! Exchange WebSocket streaming: message types, frame protocol, and the
//! subscription state machine.

mod message;
mod protocol;
mod socket;

pub use message::{
    ERROR_CODE_AUTH, ErrorMsg, FillMsg, OrderbookDeltaMsg, OrderbookSnapshotMsg,
    PriceLevelCents, PriceLevelDollars, SubscribedMsg,
};
pub use socket::{ExchangeSocket, FillSink, SubscriptionPhase};
