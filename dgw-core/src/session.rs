//! Donor session capability.
//!
//! The hosting application owns the actual session; the core only needs to
//! park donor data and the anti-forgery token under an `order_id` and find
//! them again when the donor returns from a gateway.

use crate::donation::FieldMap;
use async_trait::async_trait;
use dgw_sdk::objects::OrderId;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

/// What the core keeps in the donor session for one order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRecord {
    pub donor: FieldMap,
    pub token: String,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, order_id: &OrderId) -> Result<Option<SessionRecord>, SessionError>;

    async fn set(&self, order_id: &OrderId, record: SessionRecord) -> Result<(), SessionError>;

    async fn has(&self, order_id: &OrderId) -> Result<bool, SessionError> {
        Ok(self.get(order_id).await?.is_some())
    }

    async fn remove(&self, order_id: &OrderId) -> Result<(), SessionError>;
}

#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    records: Arc<RwLock<HashMap<OrderId, SessionRecord>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, order_id: &OrderId) -> Result<Option<SessionRecord>, SessionError> {
        Ok(self.records.read().await.get(order_id).cloned())
    }

    async fn set(&self, order_id: &OrderId, record: SessionRecord) -> Result<(), SessionError> {
        self.records.write().await.insert(order_id.clone(), record);
        Ok(())
    }

    async fn remove(&self, order_id: &OrderId) -> Result<(), SessionError> {
        self.records.write().await.remove(order_id);
        Ok(())
    }
}
