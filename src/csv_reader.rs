use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LoadError;

/// Columns every batch must carry before feature engineering can start.
pub const REQUIRED_COLUMNS: [&str; 4] = ["sender_id", "receiver_id", "amount", "timestamp"];

/// Every column a raw transaction may carry, in file order.
pub const KNOWN_COLUMNS: [&str; 15] = [
    "transaction_id",
    "timestamp",
    "sender_id",
    "receiver_id",
    "amount",
    "transaction_type",
    "merchant_category",
    "sender_state",
    "receiver_state",
    "sender_bank",
    "receiver_bank",
    "device_type",
    "network_type",
    "account_age_days",
    "fraud_flag",
];

// One payment event as it arrives from a file or a scoring request.
// Every field is optional so that a missing column and a missing value can be told apart
// by the batch, not by deserialization.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct RawTransaction {
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub receiver_id: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub merchant_category: Option<String>,
    #[serde(default)]
    pub sender_state: Option<String>,
    #[serde(default)]
    pub receiver_state: Option<String>,
    #[serde(default)]
    pub sender_bank: Option<String>,
    #[serde(default)]
    pub receiver_bank: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub network_type: Option<String>,
    #[serde(default)]
    pub account_age_days: Option<f64>,
    #[serde(default)]
    pub fraud_flag: Option<u8>,
}

impl RawTransaction {
    /// Value of a categorical column by name; `None` for nulls and non-categorical names.
    pub fn category(&self, column: &str) -> Option<&str> {
        let value = match column {
            "transaction_type" => &self.transaction_type,
            "merchant_category" => &self.merchant_category,
            "sender_state" => &self.sender_state,
            "receiver_state" => &self.receiver_state,
            "sender_bank" => &self.sender_bank,
            "receiver_bank" => &self.receiver_bank,
            "device_type" => &self.device_type,
            "network_type" => &self.network_type,
            _ => return None,
        };
        value.as_deref()
    }
}

/// A table of raw transactions plus the set of columns the source actually provided.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionBatch {
    columns: BTreeSet<String>,
    records: Vec<RawTransaction>,
}

impl TransactionBatch {
    pub fn new<I, S>(columns: I, records: Vec<RawTransaction>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            records,
        }
    }

    /// Batch built in code: every known column counts as present.
    pub fn from_records(records: Vec<RawTransaction>) -> Self {
        Self::new(KNOWN_COLUMNS, records)
    }

    /// Accepts a single JSON object or an array of objects. Object keys define the columns.
    pub fn from_json_value(value: Value) -> Result<Self, LoadError> {
        let objects = match value {
            Value::Object(map) => vec![map],
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => Ok(map),
                    _ => Err(LoadError::NotARecord),
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(LoadError::NotARecord),
        };

        let mut columns = BTreeSet::new();
        let mut records = Vec::with_capacity(objects.len());
        for map in objects {
            columns.extend(map.keys().cloned());
            records.push(serde_json::from_value(Value::Object(map))?);
        }
        Ok(Self { columns, records })
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    pub fn records(&self) -> &[RawTransaction] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub fn read_transactions<P: AsRef<Path>>(file_path: P) -> Result<TransactionBatch, LoadError> {
    let path = file_path.as_ref();
    let file = File::open(path).map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(file);
    let columns: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();

    let records: Vec<RawTransaction> = rdr
        .deserialize()
        .collect::<Result<Vec<RawTransaction>, csv::Error>>()?;

    Ok(TransactionBatch::new(columns, records))
}

/// Reads a `.json` file as one record or an array of records, anything else as CSV.
pub fn read_batch<P: AsRef<Path>>(file_path: P) -> Result<TransactionBatch, LoadError> {
    let path = file_path.as_ref();
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if !is_json {
        return read_transactions(path);
    }

    let file = File::open(path).map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_reader(std::io::BufReader::new(file))?;
    TransactionBatch::from_json_value(value)
}
