#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod currency;
pub mod donation;
pub mod framework;
pub mod fraud;
pub mod gateway;
pub mod gateways;
pub mod processors;
pub mod queue;
pub mod reconcile;
pub mod result;
pub mod session;
pub mod utils;
