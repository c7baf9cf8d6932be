//! Tiled bounding-box discovery with finer-grid escalation.
//!
//! Large spatial queries time out server-side, so the bounding box is cut
//! into a grid and each tile is paginated on its own. If any tile
//! exhausts its retries, the whole pass restarts with the next, finer
//! [`TilingStrategy`] (smaller tiles, smaller pages). Results from every
//! attempt are pooled into one [`RecordSet`], so records already fetched
//! by an abandoned pass are kept and never duplicated.

use std::sync::Arc;
use std::time::Duration;

use backyard_ecology_fetch_models::BoundingBox;
use serde::Deserialize;

use crate::FetchError;
use crate::executor::Executor;
use crate::paginate::{ConnectionQuery, DEFAULT_PAGE_SIZE, PaginationConfig, paginate};
use crate::progress::{ProgressCallback, null_progress};
use crate::record_set::RecordSet;
use crate::transport::Transport;

/// One tiling level: grid dimensions and the page size to use per tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TilingStrategy {
    /// Grid rows (latitude bands).
    pub rows: u32,
    /// Grid columns (longitude bands).
    pub cols: u32,
    /// Nodes per page within a tile.
    pub page_size: u32,
}

impl TilingStrategy {
    #[must_use]
    pub const fn new(rows: u32, cols: u32, page_size: u32) -> Self {
        Self {
            rows,
            cols,
            page_size,
        }
    }

    /// Number of tiles this strategy produces.
    #[must_use]
    pub const fn tile_count(&self) -> u32 {
        let rows = if self.rows == 0 { 1 } else { self.rows };
        let cols = if self.cols == 0 { 1 } else { self.cols };
        rows.saturating_mul(cols)
    }
}

/// Default escalation ladder: 2×2, then 4×4, then 8×8.
#[must_use]
pub fn default_strategies() -> Vec<TilingStrategy> {
    vec![
        TilingStrategy::new(2, 2, 100),
        TilingStrategy::new(4, 4, 50),
        TilingStrategy::new(8, 8, 25),
    ]
}

/// What to discover and how to deduplicate it.
#[derive(Debug, Clone)]
pub struct TiledDiscovery<'a> {
    /// Full extent to cover.
    pub bbox: BoundingBox,
    /// Tiling levels, coarsest first.
    pub strategies: &'a [TilingStrategy],
    /// Pause between pages and between tiles.
    pub pacing: Duration,
    /// Record field used for deduplication.
    pub id_field: &'a str,
    /// Short description for log messages.
    pub label: &'a str,
}

/// Discovers every record inside `discovery.bbox`.
///
/// `build_query` turns one tile into the connection query to paginate.
/// `progress` advances by one per completed tile.
///
/// # Errors
///
/// * [`FetchError::EscalationExhausted`] if a tile exhausted its retries at
///   every tiling level.
/// * Any non-retry failure (application errors, stalled cursors, malformed
///   responses) is returned immediately, since a finer grid will not fix
///   it.
pub async fn discover_tiled<T, F>(
    executor: &mut Executor<T>,
    discovery: &TiledDiscovery<'_>,
    build_query: F,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<RecordSet, FetchError>
where
    T: Transport,
    F: Fn(&BoundingBox) -> ConnectionQuery,
{
    let fallback = [TilingStrategy::new(1, 1, DEFAULT_PAGE_SIZE)];
    let strategies = if discovery.strategies.is_empty() {
        &fallback[..]
    } else {
        discovery.strategies
    };
    let label = discovery.label;
    let levels = strategies.len();

    let mut records = RecordSet::new(discovery.id_field);
    let mut last_error = None;

    for (level, strategy) in strategies.iter().enumerate() {
        let tiles = discovery.bbox.tiles(strategy.rows, strategy.cols);
        log::info!(
            "{label}: tiling level {}/{levels}: {} tiles ({}x{}), page size {}",
            level + 1,
            tiles.len(),
            strategy.rows,
            strategy.cols,
            strategy.page_size,
        );
        progress.set_message(format!(
            "{label} ({}x{} tiles)",
            strategy.rows, strategy.cols
        ));
        progress.set_total(tiles.len() as u64);
        progress.set_position(0);

        let pagination = PaginationConfig {
            page_size: strategy.page_size,
            pacing_ms: u64::try_from(discovery.pacing.as_millis()).unwrap_or(u64::MAX),
        };

        match run_level(executor, &tiles, &pagination, &build_query, &mut records, progress).await
        {
            Ok(()) => {
                log::info!(
                    "{label}: discovered {} unique records at tiling level {}",
                    records.len(),
                    level + 1
                );
                return Ok(records);
            }
            Err(e) if e.is_retry_exhausted() => {
                log::warn!(
                    "{label}: tiling level {}/{levels} failed ({e}); {} records kept so far",
                    level + 1,
                    records.len()
                );
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(FetchError::EscalationExhausted {
        levels,
        last_error: Box::new(last_error.unwrap_or_else(|| FetchError::MalformedResponse {
            label: label.to_string(),
            message: "no tiling strategies ran".to_string(),
        })),
    })
}

async fn run_level<T, F>(
    executor: &mut Executor<T>,
    tiles: &[BoundingBox],
    pagination: &PaginationConfig,
    build_query: &F,
    records: &mut RecordSet,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<(), FetchError>
where
    T: Transport,
    F: Fn(&BoundingBox) -> ConnectionQuery,
{
    let quiet = null_progress();

    for (index, tile) in tiles.iter().enumerate() {
        if index > 0 && !executor.backed_off() && !pagination.pacing().is_zero() {
            tokio::time::sleep(pagination.pacing()).await;
        }

        let query = build_query(tile);
        let nodes = paginate(executor, &query, pagination, &quiet).await?;
        let fetched = nodes.len();
        let added = records.extend(nodes);
        log::debug!(
            "{}: tile {}/{}: {fetched} records, {added} new",
            query.label,
            index + 1,
            tiles.len()
        );
        progress.inc(1);
    }

    Ok(())
}
