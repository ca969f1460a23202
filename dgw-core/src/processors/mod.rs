//! Background workers.
//!
//! - `OrphanSweeper`: periodically reconciles limbo entries whose donor never
//!   came back and whose gateway never notified us

pub mod orphan_sweeper;

pub use orphan_sweeper::{OrphanSweeper, SweepReport};
