pub mod notification;
pub mod order;
pub mod queue;
pub mod status;

pub use notification::GatewayNotification;
pub use order::OrderId;
pub use queue::QueueMessage;
pub use status::{FinalStatus, RiskAction, StatusSource};
