//! Aggregation engine - read-only loss analytics over the current store
//!
//! Views:
//! - item-wise: pure gold loss per item against the item's pure gold weight
//! - karigar-wise / process-wise: share of the grand total pure gold weight
//! - month-wise: weight month buckets, loss attributed through item membership
//! - item detail: one item's losses with a process -> karigar breakdown
//!
//! Percentages never divide by zero; an empty store yields empty views.

use crate::error::{EngineResult, InputError, StoreResult};
use crate::model::{LossRecord, RecordKind, WeightRecord};
use crate::purity::{percent_of, round3};
use crate::store::{month_key, GroupField, RecordFilter, Store, SumField};
use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Karigar-wise output is cut to the heaviest contributors.
pub const TOP_KARIGARS: usize = 15;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemLoss {
    pub item_no: String,
    pub total_pure_gold_loss: f64,
    pub pure_gold_weight: f64,
    pub loss_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KarigarLoss {
    pub karigar: String,
    pub total_loss: f64,
    pub total_pure_gold_loss: f64,
    pub loss_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessLoss {
    pub process: String,
    pub total_loss: f64,
    pub total_pure_gold_loss: f64,
    pub loss_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthLoss {
    /// `YYYY-MM`
    pub month: String,
    pub total_weight: f64,
    pub total_loss: f64,
    pub percentage_loss: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KarigarShare {
    pub loss: f64,
    pub pure_gold_loss: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessBreakdown {
    pub total_loss: f64,
    pub total_pure_gold_loss: f64,
    pub karigars: BTreeMap<String, KarigarShare>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemDetail {
    pub item_no: String,
    pub weight: Option<WeightRecord>,
    /// Ordered by date, ingestion order within a day.
    pub losses: Vec<LossRecord>,
    pub total_loss: f64,
    pub total_pure_gold_loss: f64,
    pub overall_loss_percentage: f64,
    pub loss_by_process: BTreeMap<String, ProcessBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemOverview {
    pub item_no: String,
    pub date: NaiveDate,
    pub pure_gold_weight: f64,
    pub total_pure_gold_loss: f64,
    pub loss_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemProcessLoss {
    pub process: String,
    pub total_loss: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemKarigarLoss {
    pub karigar: String,
    pub total_loss: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthItem {
    pub weight: WeightRecord,
    pub losses: Vec<LossRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestUpload {
    pub item_no: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub kind: RecordKind,
    pub total_records: usize,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
    /// Pure gold weight for weight data, pure gold loss for loss data.
    pub total_pure_gold: f64,
}

/// One karigar or process bucket before it gets its output shape.
struct Cohort {
    name: String,
    total_loss: f64,
    total_pure_gold_loss: f64,
    loss_percentage: f64,
}

pub struct Analytics<'a, S: Store + ?Sized> {
    store: &'a S,
}

impl<'a, S: Store + ?Sized> Analytics<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Pure gold weight per item. An item weighed more than once is
    /// represented by its most recently ingested record.
    async fn item_weights(&self) -> StoreResult<BTreeMap<String, WeightRecord>> {
        let mut items = BTreeMap::new();
        for record in self.store.list_weight(&RecordFilter::all()).await? {
            items.insert(record.item_no.clone(), record);
        }
        Ok(items)
    }

    pub async fn item_wise_loss(&self) -> StoreResult<Vec<ItemLoss>> {
        let losses = self
            .store
            .group_sum(
                RecordKind::Loss,
                GroupField::ItemNo,
                SumField::PureGoldLoss,
                &RecordFilter::all(),
            )
            .await?;
        let weights = self.item_weights().await?;

        let mut rows: Vec<(String, f64, f64)> = losses
            .into_iter()
            .map(|(item_no, loss)| {
                let weight = weights.get(&item_no).map_or(0.0, |w| w.pure_gold_weight);
                (item_no, loss, weight)
            })
            .collect();
        rows.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Ok(rows
            .into_iter()
            .map(|(item_no, loss, weight)| ItemLoss {
                item_no,
                total_pure_gold_loss: round3(loss),
                pure_gold_weight: round3(weight),
                loss_percentage: round3(percent_of(loss, weight)),
            })
            .collect())
    }

    /// Loss per karigar or process, restricted to weighed items, as a share
    /// of the grand total pure gold weight. Sorted by share, largest first.
    async fn cohort_loss(&self, by: GroupField) -> StoreResult<Vec<Cohort>> {
        let weights = self.item_weights().await?;
        let grand_total: f64 = weights.values().map(|w| w.pure_gold_weight).sum();
        let filter = RecordFilter::items(weights.into_keys());

        let raw = self
            .store
            .group_sum(RecordKind::Loss, by, SumField::Loss, &filter)
            .await?;
        let pure = self
            .store
            .group_sum(RecordKind::Loss, by, SumField::PureGoldLoss, &filter)
            .await?;

        let mut cohorts: Vec<Cohort> = raw
            .into_iter()
            .map(|(name, total_loss)| {
                let total_pure_gold_loss = pure.get(&name).copied().unwrap_or(0.0);
                Cohort {
                    loss_percentage: round3(percent_of(total_pure_gold_loss, grand_total)),
                    total_loss: round3(total_loss),
                    total_pure_gold_loss: round3(total_pure_gold_loss),
                    name,
                }
            })
            .collect();
        cohorts.sort_by(|a, b| {
            b.loss_percentage
                .total_cmp(&a.loss_percentage)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(cohorts)
    }

    pub async fn karigar_wise_loss(&self) -> StoreResult<Vec<KarigarLoss>> {
        let cohorts = self.cohort_loss(GroupField::Karigar).await?;
        Ok(cohorts
            .into_iter()
            .take(TOP_KARIGARS)
            .map(|c| KarigarLoss {
                karigar: c.name,
                total_loss: c.total_loss,
                total_pure_gold_loss: c.total_pure_gold_loss,
                loss_percentage: c.loss_percentage,
            })
            .collect())
    }

    pub async fn process_wise_loss(&self) -> StoreResult<Vec<ProcessLoss>> {
        let cohorts = self.cohort_loss(GroupField::Process).await?;
        Ok(cohorts
            .into_iter()
            .map(|c| ProcessLoss {
                process: c.name,
                total_loss: c.total_loss,
                total_pure_gold_loss: c.total_pure_gold_loss,
                loss_percentage: c.loss_percentage,
            })
            .collect())
    }

    /// Months come from weight dates. A month's loss is every loss record of
    /// the items weighed that month, whatever the loss record's own date.
    /// Months between the first and last weighing with no weighings are
    /// reported as zeros.
    pub async fn month_wise_loss(&self) -> StoreResult<Vec<MonthLoss>> {
        let weights = self.store.list_weight(&RecordFilter::all()).await?;

        // month -> items weighed that month
        let mut members: BTreeMap<NaiveDate, BTreeSet<String>> = BTreeMap::new();
        for record in &weights {
            members
                .entry(month_start(record.date))
                .or_default()
                .insert(record.item_no.clone());
        }
        let (Some(first), Some(last)) = (
            members.keys().next().copied(),
            members.keys().next_back().copied(),
        ) else {
            return Ok(Vec::new());
        };

        let weight_by_month = self
            .store
            .group_sum(
                RecordKind::Weight,
                GroupField::Month,
                SumField::PureGoldWeight,
                &RecordFilter::all(),
            )
            .await?;
        let loss_by_item = self
            .store
            .group_sum(
                RecordKind::Loss,
                GroupField::ItemNo,
                SumField::PureGoldLoss,
                &RecordFilter::items(weights.into_iter().map(|w| w.item_no)),
            )
            .await?;

        let mut months = Vec::new();
        let mut cursor = first;
        while cursor <= last {
            let month = month_key(cursor);
            let total_weight = weight_by_month.get(&month).copied().unwrap_or(0.0);
            let total_loss: f64 = members
                .get(&cursor)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| loss_by_item.get(item))
                        .sum()
                })
                .unwrap_or(0.0);

            months.push(MonthLoss {
                month,
                total_weight: round3(total_weight),
                total_loss: round3(total_loss),
                percentage_loss: round3(percent_of(total_loss, total_weight)),
            });

            cursor = match cursor.checked_add_months(Months::new(1)) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(months)
    }

    pub async fn item_detail(&self, item_no: &str) -> StoreResult<ItemDetail> {
        let filter = RecordFilter::item(item_no);
        let weight = self.store.list_weight(&filter).await?.pop();
        let mut losses = self.store.list_loss(&filter).await?;
        losses.sort_by_key(|l| l.date);

        let total_loss: f64 = losses.iter().map(|l| l.loss).sum();
        let total_pure_gold_loss: f64 = losses.iter().map(|l| l.pure_gold_loss).sum();
        let overall_loss_percentage = weight
            .as_ref()
            .map_or(0.0, |w| percent_of(total_pure_gold_loss, w.pure_gold_weight));

        // process -> karigar; a key gets a zeroed entry the first time it is seen
        let mut loss_by_process: BTreeMap<String, ProcessBreakdown> = BTreeMap::new();
        for loss in &losses {
            let process = loss_by_process.entry(loss.process.clone()).or_default();
            process.total_loss += loss.loss;
            process.total_pure_gold_loss += loss.pure_gold_loss;

            let karigar = process.karigars.entry(loss.karigar.clone()).or_default();
            karigar.loss += loss.loss;
            karigar.pure_gold_loss += loss.pure_gold_loss;
        }
        for process in loss_by_process.values_mut() {
            process.total_loss = round3(process.total_loss);
            process.total_pure_gold_loss = round3(process.total_pure_gold_loss);
            for karigar in process.karigars.values_mut() {
                karigar.loss = round3(karigar.loss);
                karigar.pure_gold_loss = round3(karigar.pure_gold_loss);
            }
        }

        Ok(ItemDetail {
            item_no: item_no.to_string(),
            weight: weight.map(|w| WeightRecord {
                gross_wt: round3(w.gross_wt),
                net_wt: round3(w.net_wt),
                pure_gold_weight: round3(w.pure_gold_weight),
                ..w
            }),
            losses: losses
                .into_iter()
                .map(|l| LossRecord {
                    loss: round3(l.loss),
                    pure_gold_loss: round3(l.pure_gold_loss),
                    ..l
                })
                .collect(),
            total_loss: round3(total_loss),
            total_pure_gold_loss: round3(total_pure_gold_loss),
            overall_loss_percentage: round3(overall_loss_percentage),
            loss_by_process,
        })
    }

    /// Every weighed item with its loss, ordered by item number.
    pub async fn items_overview(&self) -> StoreResult<Vec<ItemOverview>> {
        let weights = self.item_weights().await?;
        let losses = self
            .store
            .group_sum(
                RecordKind::Loss,
                GroupField::ItemNo,
                SumField::PureGoldLoss,
                &RecordFilter::items(weights.keys().cloned()),
            )
            .await?;

        Ok(weights
            .into_values()
            .map(|w| {
                let loss = losses.get(&w.item_no).copied().unwrap_or(0.0);
                ItemOverview {
                    loss_percentage: round3(percent_of(loss, w.pure_gold_weight)),
                    total_pure_gold_loss: round3(loss),
                    pure_gold_weight: round3(w.pure_gold_weight),
                    date: w.date,
                    item_no: w.item_no,
                }
            })
            .collect())
    }

    pub async fn item_process_loss(&self, item_no: &str) -> StoreResult<Vec<ItemProcessLoss>> {
        let sums = self
            .store
            .group_sum(
                RecordKind::Loss,
                GroupField::Process,
                SumField::Loss,
                &RecordFilter::item(item_no),
            )
            .await?;
        Ok(sums
            .into_iter()
            .map(|(process, total)| ItemProcessLoss {
                process,
                total_loss: round3(total),
            })
            .collect())
    }

    pub async fn item_karigar_loss(&self, item_no: &str) -> StoreResult<Vec<ItemKarigarLoss>> {
        let sums = self
            .store
            .group_sum(
                RecordKind::Loss,
                GroupField::Karigar,
                SumField::Loss,
                &RecordFilter::item(item_no),
            )
            .await?;
        Ok(sums
            .into_iter()
            .map(|(karigar, total)| ItemKarigarLoss {
                karigar,
                total_loss: round3(total),
            })
            .collect())
    }

    /// Weight records dated in the given month, each with its item's losses.
    pub async fn month_details(&self, year: i32, month: u32) -> EngineResult<Vec<MonthItem>> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or(InputError::InvalidMonth { year, month })?;
        let end = start
            .checked_add_months(Months::new(1))
            .ok_or(InputError::InvalidMonth { year, month })?;

        let weights = self
            .store
            .list_weight(&RecordFilter::all().between(start, end))
            .await?;
        let losses = self
            .store
            .list_loss(&RecordFilter::items(weights.iter().map(|w| w.item_no.clone())))
            .await?;

        let mut by_item: BTreeMap<&str, Vec<LossRecord>> = BTreeMap::new();
        for loss in &losses {
            by_item.entry(loss.item_no.as_str()).or_default().push(loss.clone());
        }

        Ok(weights
            .iter()
            .map(|w| MonthItem {
                losses: by_item.get(w.item_no.as_str()).cloned().unwrap_or_default(),
                weight: w.clone(),
            })
            .collect())
    }

    /// The most recent record of a kind by date. Among equal dates the one
    /// ingested last wins.
    pub async fn latest_upload(&self, kind: RecordKind) -> StoreResult<Option<LatestUpload>> {
        let all = RecordFilter::all();
        let latest = match kind {
            RecordKind::Weight => self
                .store
                .list_weight(&all)
                .await?
                .into_iter()
                .max_by_key(|r| r.date)
                .map(|r| LatestUpload {
                    item_no: r.item_no,
                    date: r.date,
                }),
            RecordKind::Loss => self
                .store
                .list_loss(&all)
                .await?
                .into_iter()
                .max_by_key(|r| r.date)
                .map(|r| LatestUpload {
                    item_no: r.item_no,
                    date: r.date,
                }),
        };
        Ok(latest)
    }

    pub async fn summary(&self, kind: RecordKind) -> StoreResult<DatasetSummary> {
        let all = RecordFilter::all();
        let (dates, total): (Vec<NaiveDate>, f64) = match kind {
            RecordKind::Weight => {
                let rows = self.store.list_weight(&all).await?;
                (
                    rows.iter().map(|r| r.date).collect(),
                    rows.iter().map(|r| r.pure_gold_weight).sum(),
                )
            }
            RecordKind::Loss => {
                let rows = self.store.list_loss(&all).await?;
                (
                    rows.iter().map(|r| r.date).collect(),
                    rows.iter().map(|r| r.pure_gold_loss).sum(),
                )
            }
        };

        Ok(DatasetSummary {
            kind,
            total_records: dates.len(),
            min_date: dates.iter().min().copied(),
            max_date: dates.iter().max().copied(),
            total_pure_gold: round3(total),
        })
    }
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, StoreError};
    use crate::purity::to_pure_gold;
    use crate::store::MemoryStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn weight(item_no: &str, on: NaiveDate, kt: i32, net_wt: f64) -> WeightRecord {
        WeightRecord {
            item_no: item_no.to_string(),
            date: on,
            kt,
            gross_wt: net_wt,
            net_wt,
            pure_gold_weight: to_pure_gold(net_wt, kt),
        }
    }

    fn loss(item_no: &str, on: NaiveDate, karigar: &str, process: &str, amount: f64) -> LossRecord {
        LossRecord {
            item_no: item_no.to_string(),
            date: on,
            kt: 22,
            karigar: karigar.to_string(),
            process: process.to_string(),
            loss: amount,
            pure_gold_loss: round3(to_pure_gold(amount, 22)),
        }
    }

    async fn seed(weights: &[WeightRecord], losses: &[LossRecord]) -> MemoryStore {
        let store = MemoryStore::new();
        for w in weights {
            store.insert_weight(w).await.unwrap();
        }
        for l in losses {
            store.insert_loss(l).await.unwrap();
        }
        store
    }

    // -------------------------------------------------------------------------
    // ITEM-WISE
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_end_to_end_single_item() {
        let store = seed(
            &[weight("A1", date(2024, 3, 5), 22, 10.0)],
            &[loss("A1", date(2024, 3, 6), "K1", "P1", 1.0)],
        )
        .await;

        let rows = Analytics::new(&store).item_wise_loss().await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].item_no, "A1");
        assert_eq!(rows[0].total_pure_gold_loss, 0.921);
        assert_eq!(rows[0].pure_gold_weight, 9.213);
        assert!((rows[0].loss_percentage - 10.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_item_wise_zero_guard_for_missing_weight() {
        let store = seed(&[], &[loss("GHOST", date(2024, 3, 6), "K1", "P1", 1.0)]).await;

        let rows = Analytics::new(&store).item_wise_loss().await.unwrap();

        assert_eq!(rows[0].pure_gold_weight, 0.0);
        assert_eq!(rows[0].loss_percentage, 0.0);
    }

    #[tokio::test]
    async fn test_item_wise_zero_guard_for_zero_weight() {
        let store = seed(
            &[weight("Z", date(2024, 3, 5), 22, 0.0)],
            &[loss("Z", date(2024, 3, 6), "K1", "P1", 1.0)],
        )
        .await;

        let rows = Analytics::new(&store).item_wise_loss().await.unwrap();
        assert_eq!(rows[0].loss_percentage, 0.0);
    }

    #[tokio::test]
    async fn test_item_wise_sorted_by_loss_desc() {
        let d = date(2024, 3, 6);
        let store = seed(
            &[],
            &[
                loss("SMALL", d, "K", "P", 0.1),
                loss("BIG", d, "K", "P", 2.0),
                loss("MID", d, "K", "P", 0.5),
                loss("MID", d, "K", "P", 0.5),
            ],
        )
        .await;

        let rows = Analytics::new(&store).item_wise_loss().await.unwrap();
        let order: Vec<&str> = rows.iter().map(|r| r.item_no.as_str()).collect();
        assert_eq!(order, ["BIG", "MID", "SMALL"]);
    }

    #[tokio::test]
    async fn test_latest_weighing_represents_the_item() {
        let store = seed(
            &[
                weight("A", date(2024, 1, 1), 22, 100.0),
                weight("A", date(2024, 2, 1), 22, 10.0),
            ],
            &[loss("A", date(2024, 2, 2), "K", "P", 1.0)],
        )
        .await;

        let rows = Analytics::new(&store).item_wise_loss().await.unwrap();
        assert_eq!(rows[0].pure_gold_weight, round3(to_pure_gold(10.0, 22)));
    }

    #[tokio::test]
    async fn test_empty_store_gives_empty_views() {
        let store = MemoryStore::new();
        let analytics = Analytics::new(&store);
        assert!(analytics.item_wise_loss().await.unwrap().is_empty());
        assert!(analytics.karigar_wise_loss().await.unwrap().is_empty());
        assert!(analytics.process_wise_loss().await.unwrap().is_empty());
        assert!(analytics.month_wise_loss().await.unwrap().is_empty());
        assert!(analytics.items_overview().await.unwrap().is_empty());
    }

    // -------------------------------------------------------------------------
    // KARIGAR-WISE / PROCESS-WISE
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_karigar_share_uses_grand_total_weight() {
        let d = date(2024, 3, 5);
        let store = seed(
            &[weight("A", d, 22, 10.0), weight("B", d, 22, 30.0)],
            &[
                loss("A", d, "K1", "CAST", 1.0),
                loss("B", d, "K2", "CAST", 0.5),
                loss("B", d, "K1", "POLISH", 0.5),
            ],
        )
        .await;

        let rows = Analytics::new(&store).karigar_wise_loss().await.unwrap();
        let grand_total = to_pure_gold(40.0, 22);
        let k1_pure = round3(to_pure_gold(1.0, 22)) + round3(to_pure_gold(0.5, 22));

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].karigar, "K1");
        assert_eq!(rows[0].total_loss, 1.5);
        assert_eq!(rows[0].total_pure_gold_loss, round3(k1_pure));
        assert_eq!(rows[0].loss_percentage, round3(k1_pure / grand_total * 100.0));
        assert_eq!(rows[1].karigar, "K2");
    }

    #[tokio::test]
    async fn test_karigar_ignores_unweighed_items() {
        let d = date(2024, 3, 5);
        let store = seed(
            &[weight("A", d, 22, 10.0)],
            &[loss("A", d, "K1", "P", 0.2), loss("GHOST", d, "K9", "P", 5.0)],
        )
        .await;

        let rows = Analytics::new(&store).karigar_wise_loss().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].karigar, "K1");
    }

    #[tokio::test]
    async fn test_karigar_top_15_sorted_desc() {
        let d = date(2024, 3, 5);
        let losses: Vec<LossRecord> = (1..=20)
            .map(|i| loss("A", d, &format!("K{:02}", i), "P", i as f64 * 0.01))
            .collect();
        let store = seed(&[weight("A", d, 22, 100.0)], &losses).await;

        let rows = Analytics::new(&store).karigar_wise_loss().await.unwrap();

        assert_eq!(rows.len(), TOP_KARIGARS);
        assert_eq!(rows[0].karigar, "K20");
        assert!(rows
            .windows(2)
            .all(|w| w[0].loss_percentage >= w[1].loss_percentage));
        assert!(!rows.iter().any(|r| r.karigar == "K01"));
    }

    #[tokio::test]
    async fn test_process_wise_not_truncated() {
        let d = date(2024, 3, 5);
        let losses: Vec<LossRecord> = (1..=20)
            .map(|i| loss("A", d, "K", &format!("P{:02}", i), 0.01))
            .collect();
        let store = seed(&[weight("A", d, 22, 100.0)], &losses).await;

        let rows = Analytics::new(&store).process_wise_loss().await.unwrap();
        assert_eq!(rows.len(), 20);
        // equal shares fall back to name order
        assert_eq!(rows[0].process, "P01");
    }

    #[tokio::test]
    async fn test_process_wise_totals() {
        let d = date(2024, 3, 5);
        let store = seed(
            &[weight("A", d, 22, 10.0)],
            &[
                loss("A", d, "K1", "CAST", 0.3),
                loss("A", d, "K2", "CAST", 0.2),
                loss("A", d, "K1", "POLISH", 0.1),
            ],
        )
        .await;

        let rows = Analytics::new(&store).process_wise_loss().await.unwrap();
        assert_eq!(rows[0].process, "CAST");
        assert_eq!(rows[0].total_loss, 0.5);
        assert_eq!(rows[1].process, "POLISH");
        assert_eq!(rows[1].total_loss, 0.1);
    }

    // -------------------------------------------------------------------------
    // MONTH-WISE
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_same_month_weights_merge() {
        let store = seed(
            &[
                weight("A", date(2024, 3, 1), 22, 10.0),
                weight("B", date(2024, 3, 28), 22, 5.0),
            ],
            &[],
        )
        .await;

        let rows = Analytics::new(&store).month_wise_loss().await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].month, "2024-03");
        assert_eq!(rows[0].total_weight, round3(to_pure_gold(10.0, 22) + to_pure_gold(5.0, 22)));
        assert_eq!(rows[0].total_loss, 0.0);
        assert_eq!(rows[0].percentage_loss, 0.0);
    }

    #[tokio::test]
    async fn test_loss_follows_weight_month_not_loss_date() {
        let store = seed(
            &[weight("A", date(2024, 1, 15), 22, 10.0)],
            &[loss("A", date(2024, 2, 3), "K", "P", 1.0)],
        )
        .await;

        let rows = Analytics::new(&store).month_wise_loss().await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].month, "2024-01");
        assert_eq!(rows[0].total_loss, 0.921);
    }

    #[tokio::test]
    async fn test_month_axis_is_contiguous() {
        let store = seed(
            &[
                weight("A", date(2023, 11, 2), 22, 10.0),
                weight("B", date(2024, 2, 9), 22, 10.0),
            ],
            &[],
        )
        .await;

        let rows = Analytics::new(&store).month_wise_loss().await.unwrap();
        let months: Vec<&str> = rows.iter().map(|r| r.month.as_str()).collect();
        assert_eq!(months, ["2023-11", "2023-12", "2024-01", "2024-02"]);
        assert_eq!(rows[1].total_weight, 0.0);
        assert_eq!(rows[1].percentage_loss, 0.0);
    }

    #[tokio::test]
    async fn test_item_counted_once_per_month() {
        let store = seed(
            &[
                weight("A", date(2024, 3, 1), 22, 10.0),
                weight("A", date(2024, 3, 2), 22, 10.0),
            ],
            &[loss("A", date(2024, 3, 3), "K", "P", 1.0)],
        )
        .await;

        let rows = Analytics::new(&store).month_wise_loss().await.unwrap();
        assert_eq!(rows[0].total_loss, 0.921);
        // both weighings still count toward the month's weight
        assert_eq!(rows[0].total_weight, round3(2.0 * to_pure_gold(10.0, 22)));
    }

    // -------------------------------------------------------------------------
    // ITEM DETAIL
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_item_detail_rollup() {
        let store = seed(
            &[weight("A", date(2024, 3, 1), 22, 10.0)],
            &[
                loss("A", date(2024, 3, 9), "K1", "POLISH", 0.1),
                loss("A", date(2024, 3, 2), "K1", "CAST", 0.3),
                loss("A", date(2024, 3, 4), "K2", "CAST", 0.2),
                loss("B", date(2024, 3, 4), "K2", "CAST", 9.0),
            ],
        )
        .await;

        let detail = Analytics::new(&store).item_detail("A").await.unwrap();

        assert_eq!(detail.item_no, "A");
        assert_eq!(detail.weight.as_ref().unwrap().pure_gold_weight, 9.213);
        let dates: Vec<NaiveDate> = detail.losses.iter().map(|l| l.date).collect();
        assert_eq!(dates, [date(2024, 3, 2), date(2024, 3, 4), date(2024, 3, 9)]);
        assert_eq!(detail.total_loss, 0.6);

        let cast = &detail.loss_by_process["CAST"];
        assert_eq!(cast.total_loss, 0.5);
        assert_eq!(cast.karigars.len(), 2);
        assert_eq!(cast.karigars["K1"].loss, 0.3);
        assert_eq!(detail.loss_by_process["POLISH"].karigars["K1"].loss, 0.1);

        let expected = percent_of(detail.total_pure_gold_loss, to_pure_gold(10.0, 22));
        assert!((detail.overall_loss_percentage - expected).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_item_detail_without_weight() {
        let store = seed(&[], &[loss("A", date(2024, 3, 2), "K1", "CAST", 0.3)]).await;

        let detail = Analytics::new(&store).item_detail("A").await.unwrap();
        assert!(detail.weight.is_none());
        assert_eq!(detail.overall_loss_percentage, 0.0);
        assert_eq!(detail.total_loss, 0.3);
    }

    #[tokio::test]
    async fn test_item_detail_unknown_item() {
        let store = MemoryStore::new();
        let detail = Analytics::new(&store).item_detail("NOPE").await.unwrap();
        assert!(detail.weight.is_none());
        assert!(detail.losses.is_empty());
        assert!(detail.loss_by_process.is_empty());
    }

    // -------------------------------------------------------------------------
    // LISTINGS
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_items_overview() {
        let d = date(2024, 3, 1);
        let store = seed(
            &[weight("B", d, 22, 10.0), weight("A", d, 18, 5.0)],
            &[loss("B", d, "K", "P", 1.0), loss("GHOST", d, "K", "P", 1.0)],
        )
        .await;

        let rows = Analytics::new(&store).items_overview().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].item_no, "A");
        assert_eq!(rows[0].total_pure_gold_loss, 0.0);
        assert_eq!(rows[1].item_no, "B");
        assert_eq!(rows[1].total_pure_gold_loss, 0.921);
    }

    #[tokio::test]
    async fn test_item_process_and_karigar_loss() {
        let d = date(2024, 3, 1);
        let store = seed(
            &[],
            &[
                loss("A", d, "K1", "CAST", 0.3),
                loss("A", d, "K2", "CAST", 0.2),
                loss("A", d, "K1", "POLISH", 0.1),
                loss("B", d, "K1", "CAST", 5.0),
            ],
        )
        .await;
        let analytics = Analytics::new(&store);

        let processes = analytics.item_process_loss("A").await.unwrap();
        assert_eq!(processes.len(), 2);
        assert_eq!(processes[0].process, "CAST");
        assert_eq!(processes[0].total_loss, 0.5);

        let karigars = analytics.item_karigar_loss("A").await.unwrap();
        assert_eq!(karigars[0].karigar, "K1");
        assert_eq!(karigars[0].total_loss, 0.4);
    }

    #[tokio::test]
    async fn test_month_details() {
        let store = seed(
            &[
                weight("A", date(2024, 3, 1), 22, 10.0),
                weight("B", date(2024, 3, 31), 22, 10.0),
                weight("C", date(2024, 4, 1), 22, 10.0),
            ],
            &[
                loss("A", date(2024, 3, 2), "K", "P", 0.1),
                loss("A", date(2024, 5, 2), "K", "P", 0.1),
                loss("C", date(2024, 4, 2), "K", "P", 0.1),
            ],
        )
        .await;

        let rows = Analytics::new(&store).month_details(2024, 3).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].weight.item_no, "A");
        assert_eq!(rows[0].losses.len(), 2);
        assert_eq!(rows[1].weight.item_no, "B");
        assert!(rows[1].losses.is_empty());
    }

    #[tokio::test]
    async fn test_month_details_rejects_bad_month() {
        let store = MemoryStore::new();
        let err = Analytics::new(&store).month_details(2024, 13).await.unwrap_err();
        assert!(matches!(err, EngineError::Input(InputError::InvalidMonth { month: 13, .. })));
    }

    #[tokio::test]
    async fn test_latest_upload() {
        let store = seed(
            &[
                weight("OLD", date(2024, 1, 1), 22, 1.0),
                weight("NEW", date(2024, 6, 1), 22, 1.0),
                weight("MID", date(2024, 3, 1), 22, 1.0),
            ],
            &[],
        )
        .await;
        let analytics = Analytics::new(&store);

        let latest = analytics.latest_upload(RecordKind::Weight).await.unwrap().unwrap();
        assert_eq!(latest.item_no, "NEW");
        assert_eq!(latest.date, date(2024, 6, 1));
        assert!(analytics.latest_upload(RecordKind::Loss).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_summary() {
        let store = seed(
            &[],
            &[
                loss("A", date(2024, 3, 2), "K", "P", 1.0),
                loss("B", date(2024, 1, 2), "K", "P", 1.0),
            ],
        )
        .await;

        let summary = Analytics::new(&store).summary(RecordKind::Loss).await.unwrap();
        assert_eq!(summary.total_records, 2);
        assert_eq!(summary.min_date, Some(date(2024, 1, 2)));
        assert_eq!(summary.max_date, Some(date(2024, 3, 2)));
        assert_eq!(summary.total_pure_gold, 1.842);
    }

    #[tokio::test]
    async fn test_outage_propagates() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let err = Analytics::new(&store).item_wise_loss().await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
