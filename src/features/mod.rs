//! Feature engineering: raw transaction batch -> numeric feature table.
//!
//! Steps, in order: timestamp cleaning, temporal flags, per-sender rolling velocity,
//! batch-level sender aggregates and z-score, graph centrality, cross-state flag,
//! drop-first one-hot encoding, and a final zero fill of anything non-finite.

mod behavioral;
mod encoding;
mod graph;
pub mod schema;
mod temporal;
mod velocity;

pub use behavioral::{SenderAggregate, SenderAggregates};
pub use encoding::CATEGORICAL_COLUMNS;
pub use graph::{CentralityParams, GraphScores};
pub use schema::FeatureSchema;
pub use temporal::{parse_timestamp, TemporalFeatures};

use std::io::Write;

use chrono::{Duration, NaiveDateTime};
use ndarray::{Array1, Array2, ArrayView1};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::csv_reader::{RawTransaction, TransactionBatch, REQUIRED_COLUMNS};
use crate::error::PipelineError;
use crate::profiles::SenderProfileStore;

pub const AMOUNT: &str = "amount";
pub const ACCOUNT_AGE_DAYS: &str = "account_age_days";
pub const IS_NIGHT: &str = "is_night";
pub const TXN_VELOCITY_1H: &str = "txn_velocity_1h";
pub const SENDER_MEAN_AMT: &str = "sender_mean_amt";
pub const SENDER_STD_AMT: &str = "sender_std_amt";
pub const SENDER_TXN_COUNT: &str = "sender_txn_count";
pub const UNIQUE_RECEIVERS: &str = "unique_receivers";
pub const AMOUNT_ZSCORE: &str = "amount_zscore";
pub const SENDER_PAGERANK: &str = "sender_pagerank";
pub const SENDER_DEGREE: &str = "sender_degree";
pub const CROSS_STATE: &str = "cross_state";

// A record that survived timestamp parsing, with the fields every step needs.
pub(crate) struct CleanRow<'a> {
    pub record: &'a RawTransaction,
    pub timestamp: NaiveDateTime,
    pub sender: &'a str,
    pub receiver: &'a str,
    /// NaN when the record carries no amount
    pub amount: f64,
}

/// Identifier, timestamp and label columns carried beside the feature matrix.
/// None of them is ever a model input.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowKey {
    pub transaction_id: Option<String>,
    pub timestamp: NaiveDateTime,
    pub sender_id: String,
    pub receiver_id: String,
    pub fraud_flag: Option<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    columns: Vec<String>,
    keys: Vec<RowKey>,
    values: Array2<f64>,
}

impl FeatureTable {
    pub fn new(columns: Vec<String>, keys: Vec<RowKey>, values: Array2<f64>) -> Self {
        debug_assert_eq!(columns.len(), values.ncols());
        debug_assert_eq!(keys.len(), values.nrows());
        Self {
            columns,
            keys,
            values,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn keys(&self) -> &[RowKey] {
        &self.keys
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn nrows(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.column_index(name).map(|i| self.values.column(i))
    }

    pub fn get(&self, row: usize, name: &str) -> Option<f64> {
        let col = self.column_index(name)?;
        self.values.get([row, col]).copied()
    }

    /// Overwrites one cell; returns false when the column does not exist.
    pub(crate) fn set(&mut self, row: usize, name: &str, value: f64) -> bool {
        match self.column_index(name) {
            Some(col) => {
                self.values[[row, col]] = value;
                true
            }
            None => false,
        }
    }

    pub fn row_of(&self, transaction_id: &str) -> Option<usize> {
        self.keys
            .iter()
            .position(|key| key.transaction_id.as_deref() == Some(transaction_id))
    }

    pub fn missing_labels(&self) -> usize {
        self.keys.iter().filter(|key| key.fraud_flag.is_none()).count()
    }

    /// Labels as class indices (0 = legitimate, 1 = fraud); `None` if any row is unlabeled.
    pub fn labels(&self) -> Option<Array1<usize>> {
        self.keys
            .iter()
            .map(|key| key.fraud_flag.map(|flag| usize::from(flag > 0)))
            .collect()
    }

    /// Writes keys, features and label as CSV with a header row.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header = vec!["transaction_id", "timestamp", "sender_id", "receiver_id"];
        header.extend(self.columns.iter().map(String::as_str));
        header.push("fraud_flag");
        wtr.write_record(&header)?;

        for (key, values) in self.keys.iter().zip(self.values.rows()) {
            let mut record = vec![
                key.transaction_id.clone().unwrap_or_default(),
                key.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                key.sender_id.clone(),
                key.receiver_id.clone(),
            ];
            record.extend(values.iter().map(|v| v.to_string()));
            record.push(key.fraud_flag.map(|f| f.to_string()).unwrap_or_default());
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

// Named columns accumulated step by step, assembled into a matrix at the end.
#[derive(Default)]
struct ColumnSet {
    names: Vec<String>,
    data: Vec<Vec<f64>>,
}

impl ColumnSet {
    fn push(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.names.push(name.into());
        self.data.push(values);
    }

    fn into_table(self, keys: Vec<RowKey>) -> FeatureTable {
        let data = self.data;
        let values = Array2::from_shape_fn((keys.len(), data.len()), |(row, col)| {
            let value = data[col][row];
            if value.is_finite() {
                value
            } else {
                0.0
            }
        });
        FeatureTable::new(self.names, keys, values)
    }
}

fn flag(condition: bool) -> f64 {
    if condition {
        1.0
    } else {
        0.0
    }
}

/// A missing state on either side counts as a cross-state transfer.
fn states_differ(sender: &Option<String>, receiver: &Option<String>) -> bool {
    match (sender, receiver) {
        (Some(a), Some(b)) => a != b,
        _ => true,
    }
}

/// Output of one engineering pass, before the batch context is thrown away.
pub struct EngineeredBatch {
    pub table: FeatureTable,
    pub aggregates: SenderAggregates,
    pub graph: GraphScores,
}

#[derive(Debug, Clone, Default)]
pub struct FeaturePipeline {
    config: PipelineConfig,
}

impl FeaturePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn transform(&self, batch: &TransactionBatch) -> Result<FeatureTable, PipelineError> {
        self.engineer(batch).map(|engineered| engineered.table)
    }

    /// Transform and also capture the per-sender aggregates and graph scores as a
    /// snapshot for serving-time lookup.
    pub fn transform_with_snapshot(
        &self,
        batch: &TransactionBatch,
    ) -> Result<(FeatureTable, SenderProfileStore), PipelineError> {
        let engineered = self.engineer(batch)?;
        let profiles = SenderProfileStore::from_batch(&engineered.aggregates, &engineered.graph);
        Ok((engineered.table, profiles))
    }

    pub fn engineer(&self, batch: &TransactionBatch) -> Result<EngineeredBatch, PipelineError> {
        if let Some(missing) = REQUIRED_COLUMNS.into_iter().find(|c| !batch.has_column(c)) {
            return Err(PipelineError::MissingColumn(missing));
        }

        let rows = clean(batch);
        let mut columns = ColumnSet::default();

        columns.push(AMOUNT, rows.iter().map(|r| r.amount).collect());
        if batch.has_column(ACCOUNT_AGE_DAYS) {
            columns.push(
                ACCOUNT_AGE_DAYS,
                rows.iter()
                    .map(|r| r.record.account_age_days.unwrap_or(f64::NAN))
                    .collect(),
            );
        }

        let temporal: Vec<TemporalFeatures> = rows
            .iter()
            .map(|r| TemporalFeatures::from_timestamp(&r.timestamp))
            .collect();
        columns.push("hour", temporal.iter().map(|t| f64::from(t.hour)).collect());
        columns.push("day_of_week", temporal.iter().map(|t| f64::from(t.day_of_week)).collect());
        columns.push("is_weekend", temporal.iter().map(|t| flag(t.is_weekend)).collect());
        columns.push("month", temporal.iter().map(|t| f64::from(t.month)).collect());
        columns.push(IS_NIGHT, temporal.iter().map(|t| flag(t.is_night)).collect());
        columns.push("is_salary_week", temporal.iter().map(|t| flag(t.is_salary_week)).collect());

        let window = Duration::seconds(self.config.velocity_window_secs);
        columns.push(TXN_VELOCITY_1H, velocity::rolling_counts(&rows, window));

        let aggregates = SenderAggregates::from_rows(&rows);
        let per_row: Vec<Option<&SenderAggregate>> =
            rows.iter().map(|r| aggregates.get(r.sender)).collect();
        columns.push(
            SENDER_MEAN_AMT,
            per_row.iter().map(|a| a.map_or(f64::NAN, |a| a.mean_amount)).collect(),
        );
        columns.push(
            SENDER_STD_AMT,
            per_row
                .iter()
                .map(|a| a.and_then(|a| a.std_amount).unwrap_or(f64::NAN))
                .collect(),
        );
        columns.push(
            SENDER_TXN_COUNT,
            per_row.iter().map(|a| a.map_or(0.0, |a| a.txn_count as f64)).collect(),
        );
        columns.push(
            UNIQUE_RECEIVERS,
            per_row.iter().map(|a| a.map_or(0.0, |a| a.unique_receivers as f64)).collect(),
        );
        let epsilon = self.config.zscore_epsilon;
        columns.push(
            AMOUNT_ZSCORE,
            rows.iter()
                .zip(&per_row)
                .map(|(r, a)| a.map_or(f64::NAN, |a| a.zscore(r.amount, epsilon)))
                .collect(),
        );

        let graph = GraphScores::from_edges(
            rows.iter().map(|r| (r.sender, r.receiver)),
            &CentralityParams::from(&self.config),
        );
        columns.push(SENDER_PAGERANK, rows.iter().map(|r| graph.pagerank(r.sender)).collect());
        columns.push(SENDER_DEGREE, rows.iter().map(|r| graph.degree(r.sender)).collect());

        if batch.has_column("sender_state") && batch.has_column("receiver_state") {
            columns.push(
                CROSS_STATE,
                rows.iter()
                    .map(|r| flag(states_differ(&r.record.sender_state, &r.record.receiver_state)))
                    .collect(),
            );
        }

        for (name, values) in encoding::one_hot(&rows, |c| batch.has_column(c)) {
            columns.push(name, values);
        }

        let keys = rows
            .iter()
            .map(|r| RowKey {
                transaction_id: r.record.transaction_id.clone(),
                timestamp: r.timestamp,
                sender_id: r.sender.to_string(),
                receiver_id: r.receiver.to_string(),
                fraud_flag: r.record.fraud_flag,
            })
            .collect();
        let table = columns.into_table(keys);

        info!(
            rows = table.nrows(),
            features = table.columns().len(),
            senders = aggregates.len(),
            accounts = graph.node_count(),
            "feature engineering completed"
        );

        Ok(EngineeredBatch {
            table,
            aggregates,
            graph,
        })
    }
}

// Parses timestamps, drops the rows that fail, and orders the rest by sender then time.
fn clean(batch: &TransactionBatch) -> Vec<CleanRow<'_>> {
    let mut rows = Vec::with_capacity(batch.len());
    for record in batch.records() {
        let Some(timestamp) = record.timestamp.as_deref().and_then(parse_timestamp) else {
            continue;
        };
        rows.push(CleanRow {
            record,
            timestamp,
            sender: record.sender_id.as_deref().unwrap_or_default(),
            receiver: record.receiver_id.as_deref().unwrap_or_default(),
            amount: record.amount.unwrap_or(f64::NAN),
        });
    }

    let dropped = batch.len() - rows.len();
    if dropped > 0 {
        warn!(dropped, kept = rows.len(), "dropped rows with unparseable timestamps");
    }

    rows.sort_by(|a, b| a.sender.cmp(b.sender).then(a.timestamp.cmp(&b.timestamp)));
    rows
}
