//! Competitive pricing snapshots, aggregated per (city, cuisine) key.

use crate::{prelude::*, store::SnapshotStore};

/// Snapshots below this sample size would leak individual restaurants'
/// pricing, so we refuse to write them.
pub const MIN_SAMPLE_SIZE: usize = 3;

/// Mean and median of a sample set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SnapshotStats {
    pub avg: f64,
    pub median: f64,
    pub sample_size: usize,
}

/// Compute snapshot statistics, or `None` when the sample is too small.
pub fn snapshot_stats(totals: &[f64]) -> Option<SnapshotStats> {
    if totals.len() < MIN_SAMPLE_SIZE {
        return None;
    }
    let mut sorted = totals.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let avg = sorted.iter().sum::<f64>() / sorted.len() as f64;
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };
    Some(SnapshotStats {
        avg,
        median,
        sample_size: sorted.len(),
    })
}

/// Recompute and persist the snapshot for one (city, cuisine) key.
///
/// A quiet no-op when fewer than [`MIN_SAMPLE_SIZE`] parsed menus exist under
/// the key. Any previously written snapshot is left as it was.
#[instrument(level = "debug", skip(store))]
pub async fn recompute(store: &dyn SnapshotStore, city: &str, cuisine_type: &str) -> Result<()> {
    let totals = store.parsed_totals(city, cuisine_type).await?;
    let Some(stats) = snapshot_stats(&totals) else {
        debug!(
            city,
            cuisine_type,
            samples = totals.len(),
            "too few parsed menus for a snapshot"
        );
        return Ok(());
    };
    store
        .upsert_snapshot(
            city,
            cuisine_type,
            stats.avg,
            stats.median,
            stats.sample_size as i64,
        )
        .await?;
    info!(
        city,
        cuisine_type,
        avg = stats.avg,
        median = stats.median,
        sample_size = stats.sample_size,
        "updated competitive snapshot"
    );
    Ok(())
}
