//! Concurrent fallback for providers without a batch endpoint
//!
//! Every query gets its own single-item geocode. All of them are started
//! before any is awaited, and a failure only fills its own slot.

use std::future::Future;

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{BatchEntry, BatchOutcome, Query, ResultSet};

/// Run `geocode` for every query concurrently.
///
/// The outcome is in input order regardless of completion order. Errors are
/// captured per entry and never abort the group.
pub async fn geocode_concurrently<'a, F, Fut>(queries: &'a [Query], geocode: F) -> BatchOutcome
where
    F: Fn(&'a Query) -> Fut,
    Fut: Future<Output = Result<ResultSet>>,
{
    let pending = queries.iter().enumerate().map(|(index, query)| {
        let call = geocode(query);
        async move {
            match call.await {
                Ok(results) => BatchEntry::success(results.items),
                Err(error) => {
                    warn!(index, %error, "batch item failed");
                    BatchEntry::failure(error.to_string())
                }
            }
        }
    });

    let outcome = join_all(pending).await;
    debug!(
        total = outcome.len(),
        failed = outcome.iter().filter(|entry| entry.is_error()).count(),
        "fallback batch finished"
    );
    outcome
}
