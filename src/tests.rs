use crate::csv_reader::{RawTransaction, TransactionBatch};
use crate::features::FeaturePipeline;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use ndarray::ArrayView2;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::{GeneratorConfig, TrainingConfig};
    use crate::error::{PipelineError, TrainingError};
    use crate::features::{FeatureSchema, AMOUNT, IS_NIGHT};
    use crate::generator;
    use crate::model::{ArtifactPaths, FraudClassifier, GbdtClassifier};
    use crate::scoring::{Decision, ScoringService};
    use crate::server::create_router;
    use crate::threshold::CostModel;
    use crate::training::Trainer;

    fn txn(id: &str, sender: &str, receiver: &str, amount: f64, ts: &str) -> RawTransaction {
        RawTransaction {
            transaction_id: Some(id.to_string()),
            timestamp: Some(ts.to_string()),
            sender_id: Some(sender.to_string()),
            receiver_id: Some(receiver.to_string()),
            amount: Some(amount),
            transaction_type: Some("P2P".to_string()),
            sender_state: Some("Delhi".to_string()),
            receiver_state: Some("Delhi".to_string()),
            sender_bank: Some("SBI".to_string()),
            receiver_bank: Some("SBI".to_string()),
            device_type: Some("Android".to_string()),
            network_type: Some("4G".to_string()),
            account_age_days: Some(400.0),
            fraud_flag: Some(0),
            ..Default::default()
        }
    }

    fn transform(records: Vec<RawTransaction>) -> crate::features::FeatureTable {
        FeaturePipeline::default()
            .transform(&TransactionBatch::from_records(records))
            .unwrap()
    }

    #[test]
    fn test_night_and_salary_week_flags() {
        let table = transform(vec![txn("T1", "S1", "R1", 500.0, "2024-03-05 02:30:00")]);
        assert_eq!(table.get(0, "is_night"), Some(1.0), "02:30 should be night");
        assert_eq!(table.get(0, "is_salary_week"), Some(1.0), "day 5 is in salary week");
        assert_eq!(table.get(0, "hour"), Some(2.0));
        assert_eq!(table.get(0, "day_of_week"), Some(1.0), "2024-03-05 is a Tuesday");
        assert_eq!(table.get(0, "month"), Some(3.0));
    }

    #[test]
    fn test_constant_sender_has_zero_std_and_zscore() {
        let table = transform(vec![
            txn("T1", "S1", "R1", 100.0, "2024-03-10 10:00:00"),
            txn("T2", "S1", "R2", 100.0, "2024-03-11 10:00:00"),
            txn("T3", "S1", "R3", 100.0, "2024-03-12 10:00:00"),
        ]);
        for row in 0..3 {
            assert_eq!(table.get(row, "sender_std_amt"), Some(0.0));
            assert_eq!(table.get(row, "amount_zscore"), Some(0.0));
            assert_eq!(table.get(row, "sender_txn_count"), Some(3.0));
            assert_eq!(table.get(row, "unique_receivers"), Some(3.0));
        }
    }

    #[test]
    fn test_single_row_sender_gets_zero_filled_std() {
        let table = transform(vec![txn("T1", "S1", "R1", 900.0, "2024-03-10 10:00:00")]);
        assert_eq!(table.get(0, "sender_std_amt"), Some(0.0), "undefined std is filled with 0");
        assert_eq!(table.get(0, "amount_zscore"), Some(0.0));
    }

    #[test]
    fn test_same_state_batch_has_no_cross_state() {
        let table = transform(vec![
            txn("T1", "S1", "R1", 100.0, "2024-03-10 10:00:00"),
            txn("T2", "S2", "R2", 200.0, "2024-03-10 11:00:00"),
        ]);
        let cross = table.column("cross_state").unwrap();
        assert!(cross.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_missing_state_counts_as_cross_state() {
        let mut both_null = txn("T1", "S1", "R1", 100.0, "2024-03-10 10:00:00");
        both_null.sender_state = None;
        both_null.receiver_state = None;
        let mut one_null = txn("T2", "S2", "R2", 100.0, "2024-03-10 11:00:00");
        one_null.receiver_state = None;
        let table = transform(vec![both_null, one_null]);
        let cross = table.column("cross_state").unwrap();
        assert!(cross.iter().all(|&v| v == 1.0), "cross_state {:?}", cross);
    }

    #[test]
    fn test_cross_state_needs_both_state_columns() {
        let batch = TransactionBatch::new(
            ["transaction_id", "timestamp", "sender_id", "receiver_id", "amount", "sender_state"],
            vec![txn("T1", "S1", "R1", 100.0, "2024-03-10 10:00:00")],
        );
        let table = FeaturePipeline::default().transform(&batch).unwrap();
        assert!(table.column("cross_state").is_none());
        assert!(table.column("account_age_days").is_none());
    }

    #[test]
    fn test_velocity_window_boundaries() {
        let apart = transform(vec![
            txn("T1", "S1", "R1", 100.0, "2024-03-10 10:00:00"),
            txn("T2", "S1", "R1", 100.0, "2024-03-10 11:01:00"),
        ]);
        let t2 = apart.row_of("T2").unwrap();
        assert_eq!(apart.get(t2, "txn_velocity_1h"), Some(1.0), "61 minutes apart");

        let close = transform(vec![
            txn("T1", "S1", "R1", 100.0, "2024-03-10 10:00:00"),
            txn("T2", "S1", "R1", 100.0, "2024-03-10 10:30:00"),
        ]);
        let t2 = close.row_of("T2").unwrap();
        assert_eq!(close.get(t2, "txn_velocity_1h"), Some(2.0), "30 minutes apart");
    }

    #[test]
    fn test_one_hot_drops_first_level() {
        let mut records = Vec::new();
        for (i, network) in ["WiFi", "4G", "5G"].iter().enumerate() {
            let mut record = txn(&format!("T{}", i), "S1", "R1", 100.0, "2024-03-10 10:00:00");
            record.network_type = Some(network.to_string());
            records.push(record);
        }
        let table = transform(records);
        let network_columns: Vec<&String> = table
            .columns()
            .iter()
            .filter(|c| c.starts_with("network_type_"))
            .collect();
        assert_eq!(network_columns, vec!["network_type_5G", "network_type_WiFi"]);
    }

    #[test]
    fn test_feature_columns_are_ordered() {
        let table = transform(vec![txn("T1", "S1", "R1", 100.0, "2024-03-10 10:00:00")]);
        let expected = [
            "amount",
            "account_age_days",
            "hour",
            "day_of_week",
            "is_weekend",
            "month",
            "is_night",
            "is_salary_week",
            "txn_velocity_1h",
            "sender_mean_amt",
            "sender_std_amt",
            "sender_txn_count",
            "unique_receivers",
            "amount_zscore",
            "sender_pagerank",
            "sender_degree",
            "cross_state",
        ];
        assert_eq!(&table.columns()[..expected.len()], &expected);
    }

    #[test]
    fn test_transform_is_deterministic() {
        let records = vec![
            txn("T1", "S2", "R1", 150.0, "2024-03-10 10:00:00"),
            txn("T2", "S1", "R2", 250.0, "2024-03-10 10:10:00"),
            txn("T3", "S1", "R1", 350.0, "2024-03-10 10:20:00"),
            txn("T4", "S3", "R2", 50.0, "2024-03-11 23:00:00"),
        ];
        assert_eq!(transform(records.clone()), transform(records));
    }

    #[test]
    fn test_bad_timestamps_are_dropped_not_fatal() {
        let table = transform(vec![
            txn("T1", "S1", "R1", 100.0, "2024-03-10 10:00:00"),
            txn("T2", "S1", "R1", 100.0, "not a time"),
        ]);
        assert_eq!(table.nrows(), 1);
        assert!(table.row_of("T2").is_none());
    }

    #[test]
    fn test_missing_required_column_is_fatal() {
        let batch = TransactionBatch::new(
            ["timestamp", "sender_id", "amount"],
            vec![txn("T1", "S1", "R1", 100.0, "2024-03-10 10:00:00")],
        );
        assert_eq!(
            FeaturePipeline::default().transform(&batch).unwrap_err(),
            PipelineError::MissingColumn("receiver_id")
        );
    }

    #[test]
    fn test_night_burst_record_end_to_end() {
        let mut records: Vec<RawTransaction> = (0..6)
            .map(|i| {
                let ts = format!("2024-03-05 02:{:02}:00", i * 5);
                txn(&format!("T{}", i + 1), "S9", "R1", 1_000.0, &ts)
            })
            .collect();
        records[5].amount = Some(50_000.0);
        records[5].account_age_days = Some(10.0);
        records[5].receiver_state = Some("Kerala".to_string());

        let table = transform(records);
        let row = table.row_of("T6").unwrap();
        assert_eq!(table.get(row, "is_night"), Some(1.0));
        assert_eq!(table.get(row, "txn_velocity_1h"), Some(6.0));
        assert_eq!(table.get(row, "amount"), Some(50_000.0));
        assert_eq!(table.get(row, "account_age_days"), Some(10.0));
        assert_eq!(table.get(row, "cross_state"), Some(1.0));
        assert!(table.get(row, "amount_zscore").unwrap() > 2.0);
        assert_eq!(table.get(row, "network_type_5G"), None, "single network level");
    }

    /// Probability = amount / 100000 from the first aligned column.
    struct AmountScaled;

    impl FraudClassifier for AmountScaled {
        fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Vec<f64> {
            features.column(0).iter().map(|a| (a / 100_000.0).min(1.0)).collect()
        }
    }

    fn stub_service() -> Arc<ScoringService> {
        Arc::new(ScoringService::new(
            FeaturePipeline::default(),
            Box::new(AmountScaled),
            FeatureSchema::new(vec![AMOUNT.to_string(), IS_NIGHT.to_string()]),
            0.3,
        ))
    }

    fn post_predict(body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/predict")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_threshold_and_features() {
        let app = create_router(stub_service());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["threshold"], 0.3);
        assert_eq!(body["features"], 2);
    }

    #[tokio::test]
    async fn test_predict_returns_probability_and_decision() {
        let app = create_router(stub_service());
        let payload = json!({
            "transaction_id": "TXN1",
            "timestamp": "2024-03-05 02:30:00",
            "sender_id": "S1",
            "receiver_id": "R1",
            "amount": 50000.0,
            "fraud_flag": 0
        });
        let response = app.oneshot(post_predict(payload.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["fraud_probability"], 0.5);
        assert_eq!(body["decision"], "Fraud");
    }

    #[tokio::test]
    async fn test_predict_rejects_missing_column() {
        let app = create_router(stub_service());
        let payload = json!({
            "timestamp": "2024-03-05 02:30:00",
            "receiver_id": "R1",
            "amount": 10.0
        });
        let response = app.oneshot(post_predict(payload.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["status"], 400);
        assert!(body["error"].as_str().unwrap().contains("sender_id"));
    }

    #[tokio::test]
    async fn test_predict_rejects_malformed_json() {
        let app = create_router(stub_service());
        let response = app.oneshot(post_predict("{not json".to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    struct BrokenModel;

    impl FraudClassifier for BrokenModel {
        fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Vec<f64> {
            vec![f64::NAN; features.nrows()]
        }
    }

    #[tokio::test]
    async fn test_predict_reports_non_finite_score_as_server_error() {
        let service = Arc::new(ScoringService::new(
            FeaturePipeline::default(),
            Box::new(BrokenModel),
            FeatureSchema::new(vec![AMOUNT.to_string()]),
            0.5,
        ));
        let payload = json!({
            "timestamp": "2024-03-05 02:30:00",
            "sender_id": "S1",
            "receiver_id": "R1",
            "amount": 10.0
        });
        let response = create_router(service)
            .oneshot(post_predict(payload.to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["status"], 500);
        assert_eq!(body["error"], "Internal server error");
    }

    fn small_dataset() -> TransactionBatch {
        let config = GeneratorConfig {
            rows: 2_000,
            senders: 150,
            receivers: 200,
            mule_accounts: 12,
            mule_receiver_pool: 100,
            ..GeneratorConfig::default()
        };
        generator::to_batch(&generator::generate(&config).unwrap())
    }

    fn quick_trainer() -> Trainer {
        let training = TrainingConfig {
            n_estimators: 15,
            max_depth: 3,
            learning_rate: 0.2,
            ..TrainingConfig::default()
        };
        Trainer::new(FeaturePipeline::default(), training, CostModel::default())
    }

    #[test]
    fn test_train_persist_and_serve() {
        let batch = small_dataset();
        let trainer = quick_trainer();
        let outcome = trainer.train(&batch).unwrap();

        let report = &outcome.report;
        assert_eq!(report.train_rows + report.test_rows, batch.len());
        assert!(report.synthetic_rows > 0, "training split should be oversampled");
        assert_eq!(report.features, outcome.schema.len());
        assert_eq!(report.confusion.total(), report.test_rows);
        assert!(report.roc_auc.unwrap() > 0.5, "auc {:?}", report.roc_auc);

        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::new(dir.path());
        outcome.save(&paths).unwrap();
        assert!(paths.report.exists());
        assert!(!paths.threshold.exists());

        let service = ScoringService::load(&paths, &crate::config::AppConfig::default()).unwrap();
        assert_eq!(service.threshold(), 0.5, "no threshold file yet");
        assert_eq!(service.schema(), &outcome.schema);

        let one = TransactionBatch::from_records(vec![batch.records()[0].clone()]);
        let predictions = service.score_batch(&one).unwrap();
        assert_eq!(predictions.len(), 1);
        assert!((0.0..=1.0).contains(&predictions[0].fraud_probability));
        let expected = if predictions[0].fraud_probability > 0.5 {
            Decision::Fraud
        } else {
            Decision::Safe
        };
        assert_eq!(predictions[0].decision, expected);

        let model = GbdtClassifier::load(&paths.model).unwrap();
        let tuned = trainer.optimize_threshold(&batch, &model, &outcome.schema).unwrap();
        assert!(tuned.choice.threshold >= 0.1 && tuned.choice.threshold < 0.9);
        assert_eq!(tuned.curve.len(), 80);
        assert_eq!(tuned.test_rows, report.test_rows);
    }

    #[test]
    fn test_split_is_stable_and_stratified() {
        let batch = small_dataset();
        let trainer = quick_trainer();
        let first = trainer.prepare(&batch).unwrap();
        let second = trainer.prepare(&batch).unwrap();
        assert_eq!(first.split, second.split);

        let fraud_total = first.targets.iter().filter(|&&t| t == 1).count();
        let fraud_test = first.split.test.iter().filter(|&&i| first.targets[i] == 1).count();
        let expected = (fraud_total as f64 * 0.2).round() as usize;
        assert_eq!(fraud_test, expected);
    }

    #[test]
    fn test_training_requires_labels() {
        let mut record = txn("T1", "S1", "R1", 100.0, "2024-03-10 10:00:00");
        record.fraud_flag = None;
        let batch = TransactionBatch::from_records(vec![record]);
        let err = quick_trainer().train(&batch).err().unwrap();
        assert!(matches!(err, TrainingError::MissingLabels { missing: 1, rows: 1 }));
    }

    #[test]
    fn test_training_requires_both_classes() {
        let batch = TransactionBatch::from_records(vec![
            txn("T1", "S1", "R1", 100.0, "2024-03-10 10:00:00"),
            txn("T2", "S2", "R1", 200.0, "2024-03-10 11:00:00"),
        ]);
        let err = quick_trainer().train(&batch).err().unwrap();
        assert!(matches!(err, TrainingError::EmptyClass { class: 1 }));
    }
}
