//! Watermark service (C5): per-table last-sync timestamp and the
//! global-floor merge rule.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::error::Result;
use crate::target::PostgresTargetStore;

/// Epoch sentinel: `last_watermark` treats this value as "no watermark
/// yet" rather than a real data point, mirroring the `'1900-01-01'`
/// `COALESCE` fallback used to distinguish an empty table from a table
/// whose rows genuinely date to 1900.
fn epoch_sentinel() -> DateTime<Utc> {
    Utc.from_utc_datetime(&NaiveDate::from_ymd_opt(1900, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap())
}

/// The latest `GREATEST(MAX(created_at), MAX(updated_at))` for `table`,
/// or `None` if the table is empty (both columns coalesce to the epoch
/// sentinel, which this treats as absent).
///
/// # Errors
///
/// Propagates the underlying Postgres error.
pub async fn last_watermark(target: &PostgresTargetStore, table: &str) -> Result<Option<DateTime<Utc>>> {
    let sql = format!(
        "SELECT GREATEST(COALESCE(MAX(created_at), '1900-01-01'::timestamp), COALESCE(MAX(updated_at), '1900-01-01'::timestamp)) FROM {table}"
    );
    let row = target.client().query_one(&sql, &[]).await?;
    let ts: Option<chrono::NaiveDateTime> = row.get(0);
    Ok(ts.and_then(|naive| {
        let utc = Utc.from_utc_datetime(&naive);
        if utc == epoch_sentinel() { None } else { Some(utc) }
    }))
}

/// Effective start date from a table-specific watermark and a global
/// threshold: the earlier of the two when both are present, whichever
/// one exists when only one is, `None` (full migration) when neither is.
#[must_use]
pub fn apply_global_threshold(
    table_date: Option<DateTime<Utc>>,
    global_threshold: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (table_date, global_threshold) {
        (table_date, None) => table_date,
        (None, global_threshold) => global_threshold,
        (Some(table_date), Some(global_threshold)) => {
            let effective = table_date.min(global_threshold);
            if effective == global_threshold && table_date != global_threshold {
                tracing::info!("global threshold is earlier; extending sync window backward");
            }
            Some(effective)
        }
    }
}

/// `TRUNCATE TABLE table CASCADE`, logging and swallowing the error
/// rather than aborting the run; mirrors the original's
/// try/rollback-on-error around the truncate.
///
/// # Errors
///
/// Never returns an error; failures are logged and the table is left as
/// is.
pub async fn truncate_before_import(target: &PostgresTargetStore, table: &str) -> Result<()> {
    let sql = format!("TRUNCATE TABLE {table} CASCADE");
    if let Err(error) = target.execute_raw(&sql).await {
        tracing::warn!(%error, table, "error truncating table, leaving existing data in place");
    }
    Ok(())
}
