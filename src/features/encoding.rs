use std::collections::BTreeSet;

use super::CleanRow;

/// Categorical columns expanded into indicator columns, in output order.
pub const CATEGORICAL_COLUMNS: [&str; 8] = [
    "transaction_type",
    "merchant_category",
    "sender_state",
    "receiver_state",
    "sender_bank",
    "receiver_bank",
    "device_type",
    "network_type",
];

// Drop-first one-hot encoding. Levels are the distinct non-null values of the batch,
// sorted; the first level is the reference and gets no column. Nulls encode as all zeros.
pub(crate) fn one_hot<F>(rows: &[CleanRow<'_>], has_column: F) -> Vec<(String, Vec<f64>)>
where
    F: Fn(&str) -> bool,
{
    let mut encoded = Vec::new();
    for column in CATEGORICAL_COLUMNS.iter().copied().filter(|c| has_column(c)) {
        let levels: BTreeSet<&str> = rows
            .iter()
            .filter_map(|row| row.record.category(column))
            .collect();

        for level in levels.into_iter().skip(1) {
            let indicator = rows
                .iter()
                .map(|row| {
                    if row.record.category(column) == Some(level) {
                        1.0
                    } else {
                        0.0
                    }
                })
                .collect();
            encoded.push((format!("{}_{}", column, level), indicator));
        }
    }
    encoded
}
