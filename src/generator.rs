//! Seeded synthetic UPI transactions with rule-based, label-noised fraud flags.

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal, Poisson};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::GeneratorConfig;
use crate::csv_reader::{RawTransaction, TransactionBatch};
use crate::error::GeneratorError;
use crate::features::TemporalFeatures;

pub const STATES: [&str; 10] = [
    "Delhi",
    "Maharashtra",
    "Karnataka",
    "Tamil Nadu",
    "Gujarat",
    "Uttar Pradesh",
    "Telangana",
    "West Bengal",
    "Rajasthan",
    "Odisha",
];
pub const BANKS: [&str; 7] = ["SBI", "HDFC", "ICICI", "Axis", "PNB", "Bank of Baroda", "Kotak"];
pub const MERCHANT_CATEGORIES: [&str; 6] =
    ["Grocery", "Retail", "Travel", "Entertainment", "Food", "Bills"];
pub const DEVICE_TYPES: [&str; 2] = ["Android", "iOS"];
pub const NETWORK_TYPES: [&str; 3] = ["4G", "5G", "WiFi"];
pub const TRANSACTION_TYPES: [&str; 2] = ["P2P", "P2M"];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const MINUTES_PER_YEAR: i64 = 365 * 24 * 60;

/// One generated row, in the column order of the training CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedTransaction {
    pub transaction_id: String,
    pub timestamp: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub amount: f64,
    pub transaction_type: String,
    pub merchant_category: String,
    pub sender_state: String,
    pub receiver_state: String,
    pub sender_bank: String,
    pub receiver_bank: String,
    pub device_type: String,
    pub network_type: String,
    pub account_age_days: u32,
    pub is_salary_week: u8,
    pub is_night: u8,
    pub txn_velocity_1h: u32,
    pub fraud_flag: u8,
}

impl From<&GeneratedTransaction> for RawTransaction {
    fn from(txn: &GeneratedTransaction) -> Self {
        RawTransaction {
            transaction_id: Some(txn.transaction_id.clone()),
            timestamp: Some(txn.timestamp.clone()),
            sender_id: Some(txn.sender_id.clone()),
            receiver_id: Some(txn.receiver_id.clone()),
            amount: Some(txn.amount),
            transaction_type: Some(txn.transaction_type.clone()),
            merchant_category: Some(txn.merchant_category.clone()),
            sender_state: Some(txn.sender_state.clone()),
            receiver_state: Some(txn.receiver_state.clone()),
            sender_bank: Some(txn.sender_bank.clone()),
            receiver_bank: Some(txn.receiver_bank.clone()),
            device_type: Some(txn.device_type.clone()),
            network_type: Some(txn.network_type.clone()),
            account_age_days: Some(f64::from(txn.account_age_days)),
            fraud_flag: Some(txn.fraud_flag),
        }
    }
}

fn pick<R: Rng>(rng: &mut R, values: &[&'static str]) -> String {
    values.choose(rng).copied().unwrap_or_default().to_string()
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

pub fn generate(config: &GeneratorConfig) -> Result<Vec<GeneratedTransaction>, GeneratorError> {
    if config.senders == 0 {
        return Err(GeneratorError::EmptyPool("sender"));
    }
    if config.receivers == 0 || config.mule_receiver_pool == 0 {
        return Err(GeneratorError::EmptyPool("receiver"));
    }
    let start: NaiveDateTime = NaiveDate::parse_from_str(&config.start_date, "%Y-%m-%d")
        .map_err(|_| GeneratorError::InvalidStartDate(config.start_date.clone()))?
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| GeneratorError::InvalidStartDate(config.start_date.clone()))?;

    let amounts =
        LogNormal::new(7.0, 0.8).map_err(|e| GeneratorError::Distribution(e.to_string()))?;
    let velocities =
        Poisson::new(1.0).map_err(|e| GeneratorError::Distribution(e.to_string()))?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mule_receivers: HashSet<String> = (0..config.mule_accounts)
        .map(|_| format!("R{}", rng.gen_range(1..=config.mule_receiver_pool)))
        .collect();

    let rules = &config.rules;
    let mut rows = Vec::with_capacity(config.rows);
    for i in 0..config.rows {
        let timestamp = start + Duration::minutes(rng.gen_range(0..=MINUTES_PER_YEAR));
        let sender_id = format!("S{}", rng.gen_range(1..=config.senders));
        let receiver_id = format!("R{}", rng.gen_range(1..=config.receivers));
        let temporal = TemporalFeatures::from_timestamp(&timestamp);

        let mut amount: f64 = amounts.sample(&mut rng);
        let transaction_type = pick(&mut rng, &TRANSACTION_TYPES);
        let merchant_category = pick(&mut rng, &MERCHANT_CATEGORIES);
        let sender_state = pick(&mut rng, &STATES);
        let receiver_state = pick(&mut rng, &STATES);
        let sender_bank = pick(&mut rng, &BANKS);
        let receiver_bank = pick(&mut rng, &BANKS);
        let device_type = pick(&mut rng, &DEVICE_TYPES);
        let network_type = pick(&mut rng, &NETWORK_TYPES);
        let mut account_age_days: u32 = rng.gen_range(10..=1500);
        let base_velocity: f64 = velocities.sample(&mut rng);
        let mut txn_velocity_1h = base_velocity as u32;

        // first matching rule wins
        let mut fraud = false;
        if rules.mule_network && mule_receivers.contains(&receiver_id) {
            fraud = true;
            amount *= rng.gen_range(3.0..6.0);
            txn_velocity_1h = rng.gen_range(4..=8);
            account_age_days = rng.gen_range(1..=20);
        } else if rules.night_high_amount
            && amount > 20_000.0
            && temporal.is_night
            && account_age_days < 30
        {
            fraud = true;
        } else if rules.burst_velocity && txn_velocity_1h > 5 {
            fraud = true;
            amount *= rng.gen_range(2.0..4.0);
        }

        if fraud && rng.gen::<f64>() < config.label_flip_rate {
            fraud = false;
        }

        rows.push(GeneratedTransaction {
            transaction_id: format!("TXN{}", i),
            timestamp: timestamp.format(TIMESTAMP_FORMAT).to_string(),
            sender_id,
            receiver_id,
            amount: round_cents(amount),
            transaction_type,
            merchant_category,
            sender_state,
            receiver_state,
            sender_bank,
            receiver_bank,
            device_type,
            network_type,
            account_age_days,
            is_salary_week: u8::from(temporal.is_salary_week),
            is_night: u8::from(temporal.is_night),
            txn_velocity_1h,
            fraud_flag: u8::from(fraud),
        });
    }

    let frauds = rows.iter().filter(|r| r.fraud_flag == 1).count();
    info!(
        rows = rows.len(),
        frauds,
        fraud_rate = frauds as f64 / rows.len().max(1) as f64,
        mule_receivers = mule_receivers.len(),
        "generated synthetic transactions"
    );
    Ok(rows)
}

/// Generated rows as a batch with every known column present.
pub fn to_batch(rows: &[GeneratedTransaction]) -> TransactionBatch {
    TransactionBatch::from_records(rows.iter().map(RawTransaction::from).collect())
}

pub fn write_csv(rows: &[GeneratedTransaction], path: &Path) -> Result<(), GeneratorError> {
    let file = File::create(path).map_err(|source| GeneratorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut wtr = csv::Writer::from_writer(file);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush().map_err(|source| GeneratorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
