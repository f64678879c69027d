//! Binary classification metrics for the evaluation report.

use std::fmt;

use serde::Serialize;

/// Counts at a fixed cut; positives are fraud (label 1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub tn: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    pub tp: usize,
}

impl ConfusionMatrix {
    /// Predicts fraud when `p > threshold`.
    pub fn from_scores(probabilities: &[f64], labels: &[u8], threshold: f64) -> Self {
        let predicted: Vec<u8> = probabilities.iter().map(|&p| u8::from(p > threshold)).collect();
        Self::from_predictions(&predicted, labels)
    }

    pub fn from_predictions(predicted: &[u8], labels: &[u8]) -> Self {
        let mut matrix = Self::default();
        for (&pred, &label) in predicted.iter().zip(labels) {
            match (label > 0, pred > 0) {
                (false, false) => matrix.tn += 1,
                (false, true) => matrix.fp += 1,
                (true, false) => matrix.fn_ += 1,
                (true, true) => matrix.tp += 1,
            }
        }
        matrix
    }

    pub fn total(&self) -> usize {
        self.tn + self.fp + self.fn_ + self.tp
    }
}

/// Area under the ROC curve via the rank-sum statistic, with average ranks for ties.
/// `None` when either class is absent.
pub fn roc_auc(scores: &[f64], labels: &[u8]) -> Option<f64> {
    let n = scores.len().min(labels.len());
    let positives = labels[..n].iter().filter(|&&l| l > 0).count();
    let negatives = n - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum = 0.0;
    let mut start = 0;
    while start < n {
        let mut end = start + 1;
        while end < n && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // ranks are 1-based; tied block [start, end) shares the mean rank
        let mean_rank = (start + end + 1) as f64 / 2.0;
        rank_sum += order[start..end]
            .iter()
            .filter(|&&i| labels[i] > 0)
            .count() as f64
            * mean_rank;
        start = end;
    }

    let pos = positives as f64;
    Some((rank_sum - pos * (pos + 1.0) / 2.0) / (pos * negatives as f64))
}

/// Average precision: sum over distinct score cuts of precision weighted by the
/// recall gained at that cut. `None` when there are no positives.
pub fn average_precision(scores: &[f64], labels: &[u8]) -> Option<f64> {
    let n = scores.len().min(labels.len());
    let positives = labels[..n].iter().filter(|&&l| l > 0).count();
    if positives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut ap = 0.0;
    let mut tp = 0usize;
    let mut seen = 0usize;
    let mut prev_recall = 0.0;
    let mut i = 0;
    while i < n {
        let cut = scores[order[i]];
        while i < n && scores[order[i]] == cut {
            if labels[order[i]] > 0 {
                tp += 1;
            }
            seen += 1;
            i += 1;
        }
        let recall = tp as f64 / positives as f64;
        let precision = tp as f64 / seen as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }
    Some(ap)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

impl ClassMetrics {
    fn new(tp: usize, fp: usize, fn_: usize) -> Self {
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            precision,
            recall,
            f1,
            support: tp + fn_,
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Per-class precision, recall and F1 with accuracy and the macro and
/// support-weighted averages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub legitimate: ClassMetrics,
    pub fraud: ClassMetrics,
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

impl ClassificationReport {
    pub fn from_confusion(matrix: &ConfusionMatrix) -> Self {
        let legitimate = ClassMetrics::new(matrix.tn, matrix.fn_, matrix.fp);
        let fraud = ClassMetrics::new(matrix.tp, matrix.fp, matrix.fn_);
        let total = matrix.total();

        let macro_avg = ClassMetrics {
            precision: (legitimate.precision + fraud.precision) / 2.0,
            recall: (legitimate.recall + fraud.recall) / 2.0,
            f1: (legitimate.f1 + fraud.f1) / 2.0,
            support: total,
        };
        let weight = |a: f64, b: f64| {
            if total == 0 {
                0.0
            } else {
                (a * legitimate.support as f64 + b * fraud.support as f64) / total as f64
            }
        };
        let weighted_avg = ClassMetrics {
            precision: weight(legitimate.precision, fraud.precision),
            recall: weight(legitimate.recall, fraud.recall),
            f1: weight(legitimate.f1, fraud.f1),
            support: total,
        };

        Self {
            legitimate,
            fraud,
            accuracy: ratio(matrix.tn + matrix.tp, total),
            macro_avg,
            weighted_avg,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>14} {:>9} {:>9} {:>9} {:>9}", "", "precision", "recall", "f1-score", "support")?;
        for (name, m) in [("0", &self.legitimate), ("1", &self.fraud)] {
            writeln!(
                f,
                "{:>14} {:>9.4} {:>9.4} {:>9.4} {:>9}",
                name, m.precision, m.recall, m.f1, m.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>14} {:>9} {:>9} {:>9.4} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        for (name, m) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>14} {:>9.4} {:>9.4} {:>9.4} {:>9}",
                name, m.precision, m.recall, m.f1, m.support
            )?;
        }
        Ok(())
    }
}
