pub mod alert;
pub mod provider;
pub mod retry;

pub use provider::{
    DeliveryError, DeliveryProvider, DeliveryReceipt, OutboundMessage, ProviderRole, Providers,
};
