pub mod cache;
pub mod db;
pub mod negotiationdb;
pub mod notificationdb;
pub mod settlementdb;

#[cfg(test)]
pub mod memory;

pub use negotiationdb::NegotiationExt;
pub use notificationdb::NotificationExt;
pub use settlementdb::{OrderExt, SettlementExt};

/// Everything the negotiation services need from persistence.
pub trait NegotiationStore: NegotiationExt + SettlementExt + OrderExt + NotificationExt + Send + Sync {}

impl<T> NegotiationStore for T where T: NegotiationExt + SettlementExt + OrderExt + NotificationExt + Send + Sync {}
