//! Hand-written rule scorer mirroring the generator's labeling rules, with the
//! list of rules that fired.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::csv_reader::RawTransaction;
use crate::features::{parse_timestamp, TemporalFeatures};
use crate::scoring::Decision;

const BASE_PROBABILITY: f64 = 0.03;
const MAX_PROBABILITY: f64 = 0.99;
const DECISION_CUT: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicInput {
    pub amount: f64,
    pub timestamp: NaiveDateTime,
    pub account_age_days: f64,
    pub txn_velocity_1h: f64,
    pub cross_state: bool,
    pub inter_bank: bool,
}

impl HeuristicInput {
    /// `None` when the record has no parseable timestamp. Missing states or banks
    /// never count as a mismatch; a missing account age never counts as new.
    pub fn from_record(record: &RawTransaction, txn_velocity_1h: f64) -> Option<Self> {
        let timestamp = record.timestamp.as_deref().and_then(parse_timestamp)?;
        let differs = |a: &Option<String>, b: &Option<String>| match (a, b) {
            (Some(a), Some(b)) => a != b,
            _ => false,
        };
        Some(Self {
            amount: record.amount.unwrap_or(0.0),
            timestamp,
            account_age_days: record.account_age_days.unwrap_or(f64::INFINITY),
            txn_velocity_1h,
            cross_state: differs(&record.sender_state, &record.receiver_state),
            inter_bank: differs(&record.sender_bank, &record.receiver_bank),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Contributor {
    pub rule: &'static str,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeuristicScore {
    pub fraud_probability: f64,
    pub decision: Decision,
    pub contributors: Vec<Contributor>,
}

pub fn score(input: &HeuristicInput) -> HeuristicScore {
    let is_night = TemporalFeatures::from_timestamp(&input.timestamp).is_night;
    let rules = [
        (
            "Mule Pattern",
            0.55,
            input.account_age_days <= 20.0 && input.txn_velocity_1h >= 4.0,
        ),
        (
            "Night High Amount",
            0.50,
            input.amount > 20_000.0 && is_night && input.account_age_days < 30.0,
        ),
        ("Burst Velocity", 0.40, input.txn_velocity_1h > 5.0),
        ("Cross-State", 0.06, input.cross_state),
        ("Inter-Bank", 0.04, input.inter_bank),
    ];

    let contributors: Vec<Contributor> = rules
        .into_iter()
        .filter(|&(_, _, fired)| fired)
        .map(|(rule, weight, _)| Contributor { rule, weight })
        .collect();
    let total = BASE_PROBABILITY + contributors.iter().map(|c| c.weight).sum::<f64>();
    let fraud_probability = total.min(MAX_PROBABILITY);

    HeuristicScore {
        fraud_probability,
        decision: if fraud_probability > DECISION_CUT {
            Decision::Fraud
        } else {
            Decision::Safe
        },
        contributors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(ts: &str, amount: f64, age: f64, velocity: f64) -> HeuristicInput {
        HeuristicInput {
            amount,
            timestamp: parse_timestamp(ts).unwrap(),
            account_age_days: age,
            txn_velocity_1h: velocity,
            cross_state: false,
            inter_bank: false,
        }
    }

    #[test]
    fn quiet_daytime_payment_is_safe() {
        let s = score(&input("2024-03-12 14:00:00", 800.0, 900.0, 1.0));
        assert!((s.fraud_probability - 0.03).abs() < 1e-12);
        assert_eq!(s.decision, Decision::Safe);
        assert!(s.contributors.is_empty());
    }

    #[test]
    fn night_new_account_burst_outscores_daytime_old_account() {
        let risky = score(&input("2024-03-12 02:00:00", 50_000.0, 5.0, 6.0));
        let calm = score(&input("2024-03-12 14:00:00", 50_000.0, 900.0, 1.0));
        assert!(risky.fraud_probability > calm.fraud_probability);
        assert_eq!(risky.decision, Decision::Fraud);
        assert_eq!(risky.fraud_probability, 0.99);
        let rules: Vec<&str> = risky.contributors.iter().map(|c| c.rule).collect();
        assert_eq!(rules, vec!["Mule Pattern", "Night High Amount", "Burst Velocity"]);
    }

    #[test]
    fn soft_signals_alone_stay_safe() {
        let mut i = input("2024-03-12 14:00:00", 800.0, 900.0, 1.0);
        i.cross_state = true;
        i.inter_bank = true;
        let s = score(&i);
        assert!((s.fraud_probability - 0.13).abs() < 1e-12);
        assert_eq!(s.decision, Decision::Safe);
        assert_eq!(s.contributors.len(), 2);
    }

    #[test]
    fn builds_from_a_raw_record() {
        let record = RawTransaction {
            timestamp: Some("2024-03-12 03:30:00".to_string()),
            amount: Some(25_000.0),
            sender_state: Some("Kerala".to_string()),
            receiver_state: Some("Delhi".to_string()),
            sender_bank: Some("SBI".to_string()),
            account_age_days: Some(12.0),
            ..Default::default()
        };
        let i = HeuristicInput::from_record(&record, 2.0).unwrap();
        assert!(i.cross_state);
        assert!(!i.inter_bank);
        let rules: Vec<&str> = score(&i).contributors.iter().map(|c| c.rule).collect();
        assert_eq!(rules, vec!["Night High Amount", "Cross-State"]);

        let undated = RawTransaction::default();
        assert!(HeuristicInput::from_record(&undated, 0.0).is_none());
    }
}
