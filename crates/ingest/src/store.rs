use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use oee_core::{ProductionEvent, StatusEvent};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only sink for persisted events. Duplicate rows are allowed.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_status(&self, event: &StatusEvent) -> Result<(), StoreError>;
    async fn insert_production(&self, event: &ProductionEvent) -> Result<(), StoreError>;
}

/// Keeps rows in memory; used by tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    status: Mutex<Vec<StatusEvent>>,
    production: Mutex<Vec<ProductionEvent>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following insert fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn status_rows(&self) -> Vec<StatusEvent> {
        self.status.lock().map(|rows| rows.clone()).unwrap_or_default()
    }

    pub fn production_rows(&self) -> Vec<ProductionEvent> {
        self.production.lock().map(|rows| rows.clone()).unwrap_or_default()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store set to fail".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert_status(&self, event: &StatusEvent) -> Result<(), StoreError> {
        self.check()?;
        self.status
            .lock()
            .map_err(|_| StoreError::Unavailable("status rows poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }

    async fn insert_production(&self, event: &ProductionEvent) -> Result<(), StoreError> {
        self.check()?;
        self.production
            .lock()
            .map_err(|_| StoreError::Unavailable("production rows poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }
}
