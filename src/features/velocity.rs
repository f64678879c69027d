use chrono::Duration;

use super::CleanRow;

// Rolling per-sender transaction count over the half-open window (t - window, t].
// `rows` must already be grouped by sender and ordered by timestamp inside each group.
// Rows sharing a timestamp only count the ones positioned before them, so the first of
// several simultaneous transactions still sees a count of 1.
pub(crate) fn rolling_counts(rows: &[CleanRow<'_>], window: Duration) -> Vec<f64> {
    let mut counts = vec![1.0; rows.len()];
    let mut group_start = 0;

    while group_start < rows.len() {
        let sender = rows[group_start].sender;
        let group_end = rows[group_start..]
            .iter()
            .position(|row| row.sender != sender)
            .map_or(rows.len(), |offset| group_start + offset);

        let mut window_start = group_start;
        for i in group_start..group_end {
            let cutoff = rows[i].timestamp - window;
            while window_start < i && rows[window_start].timestamp <= cutoff {
                window_start += 1;
            }
            counts[i] = (i - window_start + 1) as f64;
        }
        group_start = group_end;
    }

    counts
}
