//! Exact-duplicate row removal

use crate::error::Result;
use polars::prelude::*;
use tracing::info;

/// Drop rows that exactly repeat an earlier row.
///
/// The first occurrence of every distinct record is kept and the surviving
/// rows stay in their original order. Rows are compared on their typed
/// values, so floats are never rounded before comparison.
pub fn drop_duplicates(df: &DataFrame) -> Result<DataFrame> {
    if df.height() == 0 {
        return Ok(df.clone());
    }
    let deduped = df.unique_stable(None, UniqueKeepStrategy::First, None)?;
    info!(
        rows_before = df.height(),
        rows_after = deduped.height(),
        "dropped duplicate rows"
    );
    Ok(deduped)
}
