use std::collections::{HashMap, HashSet};

use super::CleanRow;

/// Batch-level amount statistics for one sender.
#[derive(Debug, Clone, PartialEq)]
pub struct SenderAggregate {
    pub mean_amount: f64,
    /// Sample standard deviation (n - 1); `None` with fewer than two amounts.
    pub std_amount: Option<f64>,
    /// Number of transactions carrying an amount.
    pub txn_count: usize,
    pub unique_receivers: usize,
}

impl SenderAggregate {
    pub fn zscore(&self, amount: f64, epsilon: f64) -> f64 {
        match self.std_amount {
            Some(std) => (amount - self.mean_amount) / (std + epsilon),
            None => f64::NAN,
        }
    }
}

/// Per-sender aggregates over a whole batch. Not causal: every row of a sender sees the
/// same values, including amounts that come after it.
#[derive(Debug, Clone, Default)]
pub struct SenderAggregates {
    by_sender: HashMap<String, SenderAggregate>,
}

impl SenderAggregates {
    pub(crate) fn from_rows(rows: &[CleanRow<'_>]) -> Self {
        let mut amounts: HashMap<&str, Vec<f64>> = HashMap::new();
        let mut receivers: HashMap<&str, HashSet<&str>> = HashMap::new();
        for row in rows {
            let sender_amounts = amounts.entry(row.sender).or_default();
            if row.amount.is_finite() {
                sender_amounts.push(row.amount);
            }
            receivers.entry(row.sender).or_default().insert(row.receiver);
        }

        let by_sender = amounts
            .into_iter()
            .map(|(sender, values)| {
                let aggregate = SenderAggregate {
                    mean_amount: mean(&values),
                    std_amount: sample_std(&values),
                    txn_count: values.len(),
                    unique_receivers: receivers.get(sender).map_or(0, HashSet::len),
                };
                (sender.to_string(), aggregate)
            })
            .collect();

        Self { by_sender }
    }

    pub fn get(&self, sender: &str) -> Option<&SenderAggregate> {
        self.by_sender.get(sender)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SenderAggregate)> {
        self.by_sender.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.by_sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sender.is_empty()
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    let variance = values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv_reader::RawTransaction;
    use crate::features::parse_timestamp;

    fn row<'a>(record: &'a RawTransaction, sender: &'a str, receiver: &'a str, amount: f64) -> CleanRow<'a> {
        CleanRow {
            record,
            timestamp: parse_timestamp("2024-01-01 10:00:00").unwrap(),
            sender,
            receiver,
            amount,
        }
    }

    #[test]
    fn single_transaction_sender_has_no_std() {
        let record = RawTransaction::default();
        let aggregates = SenderAggregates::from_rows(&[row(&record, "S1", "R1", 500.0)]);
        let s1 = aggregates.get("S1").unwrap();
        assert_eq!(s1.mean_amount, 500.0);
        assert_eq!(s1.std_amount, None);
        assert_eq!(s1.txn_count, 1);
        assert_eq!(s1.unique_receivers, 1);
        assert!(s1.zscore(500.0, 1e-5).is_nan());
    }

    #[test]
    fn sample_statistics_per_sender() {
        let record = RawTransaction::default();
        let rows = vec![
            row(&record, "S1", "R1", 100.0),
            row(&record, "S1", "R1", 200.0),
            row(&record, "S1", "R2", 300.0),
            row(&record, "S2", "R9", 50.0),
        ];
        let aggregates = SenderAggregates::from_rows(&rows);
        assert_eq!(aggregates.len(), 2);

        let s1 = aggregates.get("S1").unwrap();
        assert_eq!(s1.mean_amount, 200.0);
        assert_eq!(s1.std_amount, Some(100.0));
        assert_eq!(s1.txn_count, 3);
        assert_eq!(s1.unique_receivers, 2);
        let z = s1.zscore(300.0, 1e-5);
        assert!((z - 1.0).abs() < 1e-6);
    }

    #[test]
    fn missing_amounts_are_skipped() {
        let record = RawTransaction::default();
        let rows = vec![
            row(&record, "S1", "R1", 100.0),
            row(&record, "S1", "R2", f64::NAN),
            row(&record, "S1", "R3", 300.0),
        ];
        let s1 = SenderAggregates::from_rows(&rows).get("S1").cloned().unwrap();
        assert_eq!(s1.mean_amount, 200.0);
        assert_eq!(s1.txn_count, 2);
        assert_eq!(s1.unique_receivers, 3);
    }
}
