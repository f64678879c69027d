//! Synthetic minority oversampling over a KD-tree of the minority rows.

use linfa_nn::distance::L2Dist;
use linfa_nn::{CommonNearestNeighbour, NearestNeighbour};
use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::TrainingError;

pub struct Oversampled {
    pub records: Array2<f64>,
    pub targets: Array1<usize>,
    pub synthetic: usize,
}

/// Appends interpolated minority rows until both classes have the same count.
/// Each synthetic row is `x + gap * (neighbour - x)` for a random minority row `x`,
/// one of its `k` nearest minority neighbours and `gap` uniform in `[0, 1)`.
pub fn oversample(
    records: ArrayView2<'_, f64>,
    targets: ArrayView1<'_, usize>,
    k: usize,
    seed: u64,
) -> Result<Oversampled, TrainingError> {
    let positives = targets.iter().filter(|&&t| t > 0).count();
    let negatives = targets.len() - positives;
    let (minority_class, n_min, n_maj) = if positives <= negatives {
        (1, positives, negatives)
    } else {
        (0, negatives, positives)
    };

    if n_min == n_maj {
        return Ok(Oversampled {
            records: records.to_owned(),
            targets: targets.to_owned(),
            synthetic: 0,
        });
    }
    if n_min < 2 {
        return Err(TrainingError::InsufficientMinority { found: n_min });
    }

    let minority_rows: Vec<usize> = targets
        .iter()
        .enumerate()
        .filter(|(_, t)| usize::from(**t > 0) == minority_class)
        .map(|(i, _)| i)
        .collect();
    let minority = records.select(Axis(0), &minority_rows);

    let k = k.clamp(1, n_min - 1);
    let index = CommonNearestNeighbour::KdTree.from_batch(&minority, L2Dist)?;
    let mut neighbours = Vec::with_capacity(n_min);
    for (i, row) in minority.rows().into_iter().enumerate() {
        let found: Vec<usize> = index
            .k_nearest(row, k + 1)?
            .into_iter()
            .map(|(_, j)| j)
            .filter(|&j| j != i)
            .take(k)
            .collect();
        neighbours.push(found);
    }

    let needed = n_maj - n_min;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut synthetic = Array2::<f64>::zeros((needed, records.ncols()));
    for mut out in synthetic.rows_mut() {
        let i = rng.gen_range(0..n_min);
        let base = minority.row(i);
        match neighbours[i].as_slice() {
            [] => out.assign(&base),
            candidates => {
                let neighbour = minority.row(candidates[rng.gen_range(0..candidates.len())]);
                let gap: f64 = rng.gen();
                out.assign(&(&base + &((&neighbour - &base) * gap)));
            }
        }
    }

    debug!(
        minority = n_min,
        majority = n_maj,
        synthetic = needed,
        k,
        "oversampled minority class"
    );

    let records = concatenate(Axis(0), &[records.view(), synthetic.view()])?;
    let mut all_targets = targets.to_vec();
    all_targets.extend(std::iter::repeat(minority_class).take(needed));
    Ok(Oversampled {
        records,
        targets: Array1::from(all_targets),
        synthetic: needed,
    })
}
