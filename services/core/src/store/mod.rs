//! Storage contract used by ingestion and analytics.
//!
//! Two implementations live here: `MemoryStore` (tests, dry runs) and
//! `PgStore` (PostgreSQL through sqlx). Anything that can insert, wipe and
//! list records can back the engine; grouping has a client-side default.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::{StoreError, StoreResult};
use crate::model::{LossRecord, RecordKind, WeightRecord};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

/// Row selection for list and group queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    /// Only rows whose item_no is in this set. `None` means every item.
    pub item_nos: Option<BTreeSet<String>>,
    /// Inclusive lower date bound.
    pub date_from: Option<NaiveDate>,
    /// Exclusive upper date bound.
    pub date_to: Option<NaiveDate>,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn item(item_no: &str) -> Self {
        Self::items([item_no.to_string()])
    }

    pub fn items<I>(item_nos: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            item_nos: Some(item_nos.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.date_from = Some(from);
        self.date_to = Some(to);
        self
    }

    pub fn matches(&self, item_no: &str, date: NaiveDate) -> bool {
        if let Some(items) = &self.item_nos {
            if !items.contains(item_no) {
                return false;
            }
        }
        if let Some(from) = self.date_from {
            if date < from {
                return false;
            }
        }
        if let Some(to) = self.date_to {
            if date >= to {
                return false;
            }
        }
        true
    }
}

/// Field a `group_sum` buckets by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupField {
    ItemNo,
    Karigar,
    Process,
    /// Calendar month of the record date, `YYYY-MM`.
    Month,
}

/// Field a `group_sum` adds up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SumField {
    PureGoldWeight,
    Loss,
    PureGoldLoss,
}

impl GroupField {
    pub fn column(&self) -> &'static str {
        match self {
            GroupField::ItemNo => "item_no",
            GroupField::Karigar => "karigar",
            GroupField::Process => "process",
            GroupField::Month => "month",
        }
    }

    fn applies_to(&self, kind: RecordKind) -> bool {
        match self {
            GroupField::ItemNo | GroupField::Month => true,
            GroupField::Karigar | GroupField::Process => kind == RecordKind::Loss,
        }
    }
}

impl SumField {
    pub fn column(&self) -> &'static str {
        match self {
            SumField::PureGoldWeight => "pure_gold_weight",
            SumField::Loss => "loss",
            SumField::PureGoldLoss => "pure_gold_loss",
        }
    }

    fn applies_to(&self, kind: RecordKind) -> bool {
        match self {
            SumField::PureGoldWeight => kind == RecordKind::Weight,
            SumField::Loss | SumField::PureGoldLoss => kind == RecordKind::Loss,
        }
    }
}

/// Reject field combinations that do not exist on the record kind.
pub fn check_group_fields(kind: RecordKind, by: GroupField, sum: SumField) -> StoreResult<()> {
    if by.applies_to(kind) && sum.applies_to(kind) {
        Ok(())
    } else {
        Err(StoreError::Unsupported(format!(
            "cannot group {} records by {} summing {}",
            kind,
            by.column(),
            sum.column()
        )))
    }
}

pub fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

impl WeightRecord {
    fn group_key(&self, by: GroupField) -> String {
        match by {
            GroupField::Month => month_key(self.date),
            _ => self.item_no.clone(),
        }
    }

    /// Pure gold weight is the only summable weight field.
    fn sum_value(&self, _sum: SumField) -> f64 {
        self.pure_gold_weight
    }
}

impl LossRecord {
    fn group_key(&self, by: GroupField) -> String {
        match by {
            GroupField::ItemNo => self.item_no.clone(),
            GroupField::Karigar => self.karigar.clone(),
            GroupField::Process => self.process.clone(),
            GroupField::Month => month_key(self.date),
        }
    }

    fn sum_value(&self, sum: SumField) -> f64 {
        match sum {
            SumField::Loss => self.loss,
            _ => self.pure_gold_loss,
        }
    }
}

/// One storage transaction's worth of rows.
#[derive(Debug, Clone, Copy)]
pub enum Batch<'a> {
    Weight(&'a [WeightRecord]),
    Loss(&'a [LossRecord]),
}

impl Batch<'_> {
    pub fn len(&self) -> usize {
        match self {
            Batch::Weight(rows) => rows.len(),
            Batch::Loss(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn item_no(&self, index: usize) -> &str {
        match self {
            Batch::Weight(rows) => rows.get(index).map(|r| r.item_no.as_str()),
            Batch::Loss(rows) => rows.get(index).map(|r| r.item_no.as_str()),
        }
        .unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    /// Position inside the batch.
    pub index: usize,
    pub item_no: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub inserted: usize,
    pub rejected: Vec<RejectedRow>,
}

impl BatchReport {
    /// Fold one row's insert outcome in. Row rejections are recorded, any
    /// other error is handed back to the caller.
    pub fn record(&mut self, batch: Batch<'_>, index: usize, outcome: StoreResult<()>) -> StoreResult<()> {
        match outcome {
            Ok(()) => {
                self.inserted += 1;
                Ok(())
            }
            Err(StoreError::Rejected { reason }) => {
                self.rejected.push(RejectedRow {
                    index,
                    item_no: batch.item_no(index).to_string(),
                    reason,
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_weight(&self, record: &WeightRecord) -> StoreResult<()>;

    async fn insert_loss(&self, record: &LossRecord) -> StoreResult<()>;

    /// Write one batch. Rows go in input order; a rejected row is reported
    /// and skipped, any other failure aborts the batch.
    async fn write_batch(&self, batch: Batch<'_>) -> StoreResult<BatchReport> {
        let mut report = BatchReport::default();
        match batch {
            Batch::Weight(rows) => {
                for (index, record) in rows.iter().enumerate() {
                    let outcome = self.insert_weight(record).await;
                    report.record(batch, index, outcome)?;
                }
            }
            Batch::Loss(rows) => {
                for (index, record) in rows.iter().enumerate() {
                    let outcome = self.insert_loss(record).await;
                    report.record(batch, index, outcome)?;
                }
            }
        }
        Ok(report)
    }

    /// Returns the number of rows removed.
    async fn delete_all_weight(&self) -> StoreResult<u64>;

    async fn delete_all_loss(&self) -> StoreResult<u64>;

    /// Matching weight records in ingestion order.
    async fn list_weight(&self, filter: &RecordFilter) -> StoreResult<Vec<WeightRecord>>;

    /// Matching loss records in ingestion order.
    async fn list_loss(&self, filter: &RecordFilter) -> StoreResult<Vec<LossRecord>>;

    async fn group_sum(
        &self,
        kind: RecordKind,
        by: GroupField,
        sum: SumField,
        filter: &RecordFilter,
    ) -> StoreResult<BTreeMap<String, f64>> {
        check_group_fields(kind, by, sum)?;

        let mut sums: BTreeMap<String, f64> = BTreeMap::new();
        match kind {
            RecordKind::Weight => {
                for record in self.list_weight(filter).await? {
                    *sums.entry(record.group_key(by)).or_default() += record.sum_value(sum);
                }
            }
            RecordKind::Loss => {
                for record in self.list_loss(filter).await? {
                    *sums.entry(record.group_key(by)).or_default() += record.sum_value(sum);
                }
            }
        }
        Ok(sums)
    }

    async fn delete_all(&self, kind: RecordKind) -> StoreResult<u64> {
        match kind {
            RecordKind::Weight => self.delete_all_weight().await,
            RecordKind::Loss => self.delete_all_loss().await,
        }
    }
}
