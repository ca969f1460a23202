//! Shared types for the donation gateway.
//!
//! Everything that crosses a process boundary lives here: order ids, final
//! statuses, queue messages and gateway notifications, together with the
//! HMAC helpers used for donor tokens and gateway callbacks.

pub mod objects;
pub mod signature;
