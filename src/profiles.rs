//! Training-time snapshot of per-sender behaviour and graph scores.
//!
//! A single scored record is a batch of one, so its batch aggregates collapse to
//! mean = amount, std = 0, count = 1 and its graph has two nodes. When the service
//! has this snapshot it swaps those columns for what the training batch saw. The
//! snapshot is read-only; it is as stale as the artifact it ships with.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ArtifactError;
use crate::features::{
    FeatureTable, GraphScores, SenderAggregates, AMOUNT, AMOUNT_ZSCORE, SENDER_DEGREE,
    SENDER_MEAN_AMT, SENDER_PAGERANK, SENDER_STD_AMT, SENDER_TXN_COUNT, UNIQUE_RECEIVERS,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderProfile {
    pub mean_amount: f64,
    /// Zero when the sender had a single transaction
    pub std_amount: f64,
    pub txn_count: usize,
    pub unique_receivers: usize,
    pub pagerank: f64,
    pub degree: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderProfileStore {
    pub created_at: DateTime<Utc>,
    senders: BTreeMap<String, SenderProfile>,
}

impl SenderProfileStore {
    pub fn from_batch(aggregates: &SenderAggregates, graph: &GraphScores) -> Self {
        let senders = aggregates
            .iter()
            .map(|(sender, aggregate)| {
                let mean = if aggregate.mean_amount.is_finite() {
                    aggregate.mean_amount
                } else {
                    0.0
                };
                let profile = SenderProfile {
                    mean_amount: mean,
                    std_amount: aggregate.std_amount.filter(|s| s.is_finite()).unwrap_or(0.0),
                    txn_count: aggregate.txn_count,
                    unique_receivers: aggregate.unique_receivers,
                    pagerank: graph.pagerank(sender),
                    degree: graph.degree(sender),
                };
                (sender.to_string(), profile)
            })
            .collect();

        Self {
            created_at: Utc::now(),
            senders,
        }
    }

    pub fn get(&self, sender: &str) -> Option<&SenderProfile> {
        self.senders.get(sender)
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Overwrites aggregate and graph columns with snapshot values. Known senders get
    /// their profile and a z-score against it; unknown senders keep their batch
    /// aggregates and score 0 on the graph columns. Returns how many rows matched.
    pub fn apply(&self, table: &mut FeatureTable, epsilon: f64) -> usize {
        let mut matched = 0;
        for row in 0..table.nrows() {
            let sender = table.keys()[row].sender_id.clone();
            match self.senders.get(&sender) {
                Some(profile) => {
                    matched += 1;
                    let amount = table.get(row, AMOUNT).unwrap_or(0.0);
                    let zscore = (amount - profile.mean_amount) / (profile.std_amount + epsilon);
                    table.set(row, SENDER_MEAN_AMT, profile.mean_amount);
                    table.set(row, SENDER_STD_AMT, profile.std_amount);
                    table.set(row, SENDER_TXN_COUNT, profile.txn_count as f64);
                    table.set(row, UNIQUE_RECEIVERS, profile.unique_receivers as f64);
                    table.set(row, AMOUNT_ZSCORE, zscore);
                    table.set(row, SENDER_PAGERANK, profile.pagerank);
                    table.set(row, SENDER_DEGREE, profile.degree);
                }
                None => {
                    table.set(row, SENDER_PAGERANK, 0.0);
                    table.set(row, SENDER_DEGREE, 0.0);
                }
            }
        }
        matched
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let data = fs::read_to_string(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ArtifactError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        let data = serde_json::to_string(self).map_err(|source| ArtifactError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, data).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
