//! Offline training: engineer features, split, oversample the training side, fit,
//! evaluate on the untouched test side, persist the artifact.

mod smote;
mod split;

pub use smote::{oversample, Oversampled};
pub use split::{stratified_split, SplitIndices};

use std::fs;

use linfa::Dataset;
use ndarray::{Array1, Array2, Axis, Ix1};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::TrainingConfig;
use crate::csv_reader::TransactionBatch;
use crate::error::{ArtifactError, TrainingError};
use crate::features::{FeaturePipeline, FeatureSchema, FeatureTable};
use crate::metrics::{average_precision, roc_auc, ClassificationReport, ConfusionMatrix};
use crate::model::{ArtifactPaths, FraudClassifier, GbdtClassifier, GbdtParams};
use crate::profiles::SenderProfileStore;
use crate::threshold::{loss_curve, select_threshold, CostModel, ThresholdChoice};

/// Cut used for the evaluation report; the tuned threshold is chosen separately.
pub const EVALUATION_CUT: f64 = 0.5;

/// Labelled feature matrix and its deterministic split.
pub struct PreparedData {
    pub table: FeatureTable,
    pub schema: FeatureSchema,
    pub profiles: SenderProfileStore,
    pub records: Array2<f64>,
    pub targets: Array1<usize>,
    pub split: SplitIndices,
}

impl PreparedData {
    pub fn train_dataset(&self) -> Dataset<f64, usize, Ix1> {
        self.subset(&self.split.train)
    }

    pub fn test_dataset(&self) -> Dataset<f64, usize, Ix1> {
        self.subset(&self.split.test)
    }

    fn subset(&self, rows: &[usize]) -> Dataset<f64, usize, Ix1> {
        Dataset::new(
            self.records.select(Axis(0), rows),
            self.targets.select(Axis(0), rows),
        )
        .with_feature_names(self.schema.columns().to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub train_rows: usize,
    pub test_rows: usize,
    pub synthetic_rows: usize,
    pub features: usize,
    pub train_roc_auc: Option<f64>,
    pub roc_auc: Option<f64>,
    pub average_precision: Option<f64>,
    pub cut: f64,
    pub confusion: ConfusionMatrix,
    pub classification: ClassificationReport,
    pub financial_loss: f64,
}

pub struct TrainingOutcome {
    pub model: GbdtClassifier,
    pub schema: FeatureSchema,
    pub profiles: SenderProfileStore,
    pub report: EvaluationReport,
}

impl TrainingOutcome {
    /// Writes model, schema, sender profiles and report. The threshold file is left
    /// alone; `optimize-threshold` owns it.
    pub fn save(&self, paths: &ArtifactPaths) -> Result<(), ArtifactError> {
        paths.create_dir()?;
        self.model.save(&paths.model)?;
        self.schema.save(&paths.schema)?;
        self.profiles.save(&paths.profiles)?;
        let report = serde_json::to_string_pretty(&self.report).map_err(|source| ArtifactError::Json {
            path: paths.report.clone(),
            source,
        })?;
        fs::write(&paths.report, report).map_err(|source| ArtifactError::Io {
            path: paths.report.clone(),
            source,
        })?;
        info!(dir = %paths.dir.display(), "artifact written");
        Ok(())
    }
}

/// Result of scoring the held-out split against the cost model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdReport {
    pub choice: ThresholdChoice,
    pub curve: Vec<ThresholdChoice>,
    pub test_rows: usize,
}

pub struct Trainer {
    pipeline: FeaturePipeline,
    config: TrainingConfig,
    costs: CostModel,
}

impl Trainer {
    pub fn new(pipeline: FeaturePipeline, config: TrainingConfig, costs: CostModel) -> Self {
        Self {
            pipeline,
            config,
            costs,
        }
    }

    /// Engineers features, checks labels and computes the split.
    pub fn prepare(&self, batch: &TransactionBatch) -> Result<PreparedData, TrainingError> {
        let (table, profiles) = self.pipeline.transform_with_snapshot(batch)?;
        let targets = table.labels().ok_or(TrainingError::MissingLabels {
            missing: table.missing_labels(),
            rows: table.nrows(),
        })?;
        for class in [0, 1] {
            if !targets.iter().any(|&t| t == class) {
                return Err(TrainingError::EmptyClass { class });
            }
        }

        let schema = FeatureSchema::from_table(&table);
        let records = table.values().clone();
        let split = stratified_split(
            &targets.to_vec(),
            self.config.test_fraction,
            self.config.seed,
        );
        info!(
            rows = table.nrows(),
            train = split.train.len(),
            test = split.test.len(),
            fraud = targets.iter().filter(|&&t| t == 1).count(),
            "prepared training data"
        );

        Ok(PreparedData {
            table,
            schema,
            profiles,
            records,
            targets,
            split,
        })
    }

    pub fn train(&self, batch: &TransactionBatch) -> Result<TrainingOutcome, TrainingError> {
        let prepared = self.prepare(batch)?;
        let train = prepared.train_dataset();
        let test = prepared.test_dataset();

        let balanced = oversample(
            train.records().view(),
            train.targets().view(),
            self.config.smote_neighbors,
            self.config.seed,
        )?;
        let fit_on = Dataset::new(balanced.records, balanced.targets)
            .with_feature_names(prepared.schema.columns().to_vec());

        let model = GbdtClassifier::fit(&fit_on, &GbdtParams::from(&self.config));

        let train_labels = as_flags(train.targets());
        let train_probs = model.predict_proba(train.records().view());
        let train_roc_auc = roc_auc(&train_probs, &train_labels);
        info!(train_roc_auc = ?train_roc_auc, "fit complete");

        let report = self.evaluate(&model, &test, balanced.synthetic, train.records().nrows());
        info!(
            roc_auc = ?report.roc_auc,
            average_precision = ?report.average_precision,
            financial_loss = report.financial_loss,
            "evaluation on held-out split"
        );

        Ok(TrainingOutcome {
            model,
            schema: prepared.schema,
            profiles: prepared.profiles,
            report: EvaluationReport {
                train_roc_auc,
                ..report
            },
        })
    }

    fn evaluate(
        &self,
        model: &dyn FraudClassifier,
        test: &Dataset<f64, usize, Ix1>,
        synthetic_rows: usize,
        train_rows: usize,
    ) -> EvaluationReport {
        let labels = as_flags(test.targets());
        let probs = model.predict_proba(test.records().view());
        let confusion = ConfusionMatrix::from_scores(&probs, &labels, EVALUATION_CUT);
        if labels.is_empty() {
            warn!("held-out split is empty; evaluation metrics are degenerate");
        }

        EvaluationReport {
            train_rows,
            test_rows: labels.len(),
            synthetic_rows,
            features: test.records().ncols(),
            train_roc_auc: None,
            roc_auc: roc_auc(&probs, &labels),
            average_precision: average_precision(&probs, &labels),
            cut: EVALUATION_CUT,
            confusion,
            classification: ClassificationReport::from_confusion(&confusion),
            financial_loss: self.costs.loss(&confusion),
        }
    }

    /// Re-derives the training split from `batch`, scores its test side with a
    /// persisted model aligned to `schema`, and picks the cost-minimising threshold.
    pub fn optimize_threshold(
        &self,
        batch: &TransactionBatch,
        model: &dyn FraudClassifier,
        schema: &FeatureSchema,
    ) -> Result<ThresholdReport, TrainingError> {
        let prepared = self.prepare(batch)?;
        let aligned = schema.align(&prepared.table);
        let test_records = aligned.select(Axis(0), &prepared.split.test);
        let labels = as_flags(&prepared.targets.select(Axis(0), &prepared.split.test));

        let probs = model.predict_proba(test_records.view());
        let choice = select_threshold(&probs, &labels, &self.costs)?;
        let curve = loss_curve(&probs, &labels, &self.costs)?;
        info!(
            threshold = choice.threshold,
            expected_loss = choice.expected_loss,
            test_rows = labels.len(),
            "optimal threshold"
        );
        Ok(ThresholdReport {
            choice,
            curve,
            test_rows: labels.len(),
        })
    }
}

fn as_flags(targets: &Array1<usize>) -> Vec<u8> {
    targets.iter().map(|&t| u8::from(t > 0)).collect()
}
