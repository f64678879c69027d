//! Load-once scoring: pipeline, schema alignment, classifier, threshold.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::csv_reader::TransactionBatch;
use crate::error::{ArtifactError, PipelineError};
use crate::features::{FeaturePipeline, FeatureSchema};
use crate::model::{load_threshold, ArtifactPaths, FraudClassifier, GbdtClassifier};
use crate::profiles::SenderProfileStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Fraud,
    Safe,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub sender_id: String,
    pub fraud_probability: f64,
    pub decision: Decision,
}

/// Everything needed to score, immutable after construction.
pub struct ScoringService {
    pipeline: FeaturePipeline,
    classifier: Box<dyn FraudClassifier>,
    schema: FeatureSchema,
    threshold: f64,
    profiles: Option<SenderProfileStore>,
}

impl ScoringService {
    pub fn new(
        pipeline: FeaturePipeline,
        classifier: Box<dyn FraudClassifier>,
        schema: FeatureSchema,
        threshold: f64,
    ) -> Self {
        Self {
            pipeline,
            classifier,
            schema,
            threshold,
            profiles: None,
        }
    }

    pub fn with_profiles(mut self, profiles: SenderProfileStore) -> Self {
        self.profiles = Some(profiles);
        self
    }

    /// Reads model, schema and threshold from the artifact directory. The sender
    /// profile snapshot is optional and only loaded when enabled.
    pub fn load(paths: &ArtifactPaths, config: &AppConfig) -> Result<Self, ArtifactError> {
        let classifier = GbdtClassifier::load(&paths.model)?;
        let schema = FeatureSchema::load(&paths.schema)?;
        let threshold = load_threshold(&paths.threshold, config.serving.default_threshold)?;

        let mut service = Self::new(
            FeaturePipeline::new(config.pipeline.clone()),
            Box::new(classifier),
            schema,
            threshold,
        );
        if config.serving.use_sender_profiles {
            if paths.profiles.exists() {
                service = service.with_profiles(SenderProfileStore::load(&paths.profiles)?);
            } else {
                warn!(path = %paths.profiles.display(), "no sender profile snapshot; using batch aggregates");
            }
        }

        info!(
            features = service.schema.len(),
            threshold = service.threshold,
            profiles = service.profiles.as_ref().map_or(0, SenderProfileStore::len),
            "scoring service loaded"
        );
        Ok(service)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn decide(&self, probability: f64) -> Decision {
        if probability > self.threshold {
            Decision::Fraud
        } else {
            Decision::Safe
        }
    }

    /// One prediction per record that survives timestamp parsing, in
    /// (sender, timestamp) order.
    pub fn score_batch(&self, batch: &TransactionBatch) -> Result<Vec<Prediction>, PipelineError> {
        let mut table = self.pipeline.transform(batch)?;
        if let Some(profiles) = &self.profiles {
            let matched = profiles.apply(&mut table, self.pipeline.config().zscore_epsilon);
            debug!(matched, rows = table.nrows(), "applied sender profiles");
        }

        let features = self.schema.align(&table);
        let probabilities = self.classifier.predict_proba(features.view());

        Ok(table
            .keys()
            .iter()
            .zip(probabilities)
            .map(|(key, p)| Prediction {
                transaction_id: key.transaction_id.clone(),
                sender_id: key.sender_id.clone(),
                fraud_probability: p,
                decision: self.decide(p),
            })
            .collect())
    }
}
