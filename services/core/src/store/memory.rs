use super::{RecordFilter, Store};
use crate::error::{StoreError, StoreResult};
use crate::model::{LossRecord, WeightRecord};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    weight: Vec<WeightRecord>,
    loss: Vec<LossRecord>,
}

/// In-process store with the same row constraints as the SQL schema.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the backing database went away.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    pub async fn counts(&self) -> (usize, usize) {
        let tables = self.tables.read().await;
        (tables.weight.len(), tables.loss.len())
    }
}

fn check_karat(kt: i32) -> StoreResult<()> {
    if (1..=24).contains(&kt) {
        Ok(())
    } else {
        Err(StoreError::Rejected {
            reason: format!("kt {} outside 1..=24", kt),
        })
    }
}

fn check_mass(column: &str, value: f64) -> StoreResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(StoreError::Rejected {
            reason: format!("{} {} must be a non-negative number", column, value),
        })
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_weight(&self, record: &WeightRecord) -> StoreResult<()> {
        self.ensure_online()?;
        check_karat(record.kt)?;
        check_mass("gross_wt", record.gross_wt)?;
        check_mass("net_wt", record.net_wt)?;
        self.tables.write().await.weight.push(record.clone());
        Ok(())
    }

    async fn insert_loss(&self, record: &LossRecord) -> StoreResult<()> {
        self.ensure_online()?;
        check_karat(record.kt)?;
        check_mass("loss", record.loss)?;
        self.tables.write().await.loss.push(record.clone());
        Ok(())
    }

    async fn delete_all_weight(&self) -> StoreResult<u64> {
        self.ensure_online()?;
        let mut tables = self.tables.write().await;
        let removed = tables.weight.len() as u64;
        tables.weight.clear();
        Ok(removed)
    }

    async fn delete_all_loss(&self) -> StoreResult<u64> {
        self.ensure_online()?;
        let mut tables = self.tables.write().await;
        let removed = tables.loss.len() as u64;
        tables.loss.clear();
        Ok(removed)
    }

    async fn list_weight(&self, filter: &RecordFilter) -> StoreResult<Vec<WeightRecord>> {
        self.ensure_online()?;
        let tables = self.tables.read().await;
        Ok(tables
            .weight
            .iter()
            .filter(|r| filter.matches(&r.item_no, r.date))
            .cloned()
            .collect())
    }

    async fn list_loss(&self, filter: &RecordFilter) -> StoreResult<Vec<LossRecord>> {
        self.ensure_online()?;
        let tables = self.tables.read().await;
        Ok(tables
            .loss
            .iter()
            .filter(|r| filter.matches(&r.item_no, r.date))
            .cloned()
            .collect())
    }
}
