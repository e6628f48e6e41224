//! Import summary (C7): per-table counters plus a bounded sample of
//! failing rows.

use std::collections::BTreeMap;

use comfy_table::{Cell, Table, presets::UTF8_FULL};

const MAX_FAILED_RECORDS: usize = 10;
const DETAIL_TRUNCATE_LEN: usize = 200;

/// A single captured failing row, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct FailedRecord {
    pub reason: String,
    pub record_id: String,
    pub details: String,
}

#[derive(Debug, Clone, Default)]
struct TableStats {
    good: u64,
    skipped: u64,
    bad: BTreeMap<String, u64>,
    failed_records: Vec<FailedRecord>,
}

/// Per-run, per-table counters. One instance per run, passed explicitly
/// through the call stack (not a global) and aggregated at run end.
#[derive(Debug, Clone, Default)]
pub struct ImportSummary {
    stats: BTreeMap<String, TableStats>,
}

impl ImportSummary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, table: &str, count: u64) {
        self.stats.entry(table.to_string()).or_default().good += count;
    }

    pub fn record_skipped(&mut self, table: &str, count: u64) {
        self.stats.entry(table.to_string()).or_default().skipped += count;
    }

    /// Record an error for `table` under `reason`, with a bounded sample
    /// of the failing row for diagnostics (`record_id`, `details`
    /// truncated to 200 chars with a `...` suffix). The sample buffer
    /// never exceeds `MAX_FAILED_RECORDS`, regardless of how many errors
    /// of that reason occur.
    pub fn record_error(&mut self, table: &str, reason: &str, record_id: &str, details: &str) {
        let entry = self.stats.entry(table.to_string()).or_default();
        *entry.bad.entry(reason.to_string()).or_insert(0) += 1;

        if entry.failed_records.len() < MAX_FAILED_RECORDS {
            let truncated = if details.chars().count() > DETAIL_TRUNCATE_LEN {
                format!("{}...", details.chars().take(DETAIL_TRUNCATE_LEN).collect::<String>())
            } else {
                details.to_string()
            };
            entry.failed_records.push(FailedRecord {
                reason: reason.to_string(),
                record_id: record_id.to_string(),
                details: truncated,
            });
        }
    }

    #[must_use]
    pub fn good(&self, table: &str) -> u64 {
        self.stats.get(table).map_or(0, |s| s.good)
    }

    #[must_use]
    pub fn skipped(&self, table: &str) -> u64 {
        self.stats.get(table).map_or(0, |s| s.skipped)
    }

    #[must_use]
    pub fn bad_total(&self, table: &str) -> u64 {
        self.stats
            .get(table)
            .map_or(0, |s| s.bad.values().sum())
    }

    #[must_use]
    pub fn tried(&self, table: &str) -> u64 {
        self.good(table) + self.skipped(table) + self.bad_total(table)
    }

    /// Merge another table's counters into this run summary (used by the
    /// runner to fold each table's per-table summary into the run total).
    pub fn merge(&mut self, other: &Self) {
        for (table, other_stats) in &other.stats {
            let entry = self.stats.entry(table.clone()).or_default();
            entry.good += other_stats.good;
            entry.skipped += other_stats.skipped;
            for (reason, count) in &other_stats.bad {
                *entry.bad.entry(reason.clone()).or_insert(0) += count;
            }
            for record in &other_stats.failed_records {
                if entry.failed_records.len() < MAX_FAILED_RECORDS {
                    entry.failed_records.push(record.clone());
                }
            }
        }
    }

    /// Render the summary as a table, grouped by table name, plus an
    /// overall totals row.
    #[must_use]
    pub fn render(&self) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL).set_header(vec![
            "table", "good", "skipped", "bad", "top reasons",
        ]);

        for (name, stats) in &self.stats {
            let reasons: Vec<String> = stats
                .bad
                .iter()
                .map(|(reason, count)| format!("{reason}: {count}"))
                .collect();
            table.add_row(vec![
                Cell::new(name),
                Cell::new(stats.good),
                Cell::new(stats.skipped),
                Cell::new(stats.bad.values().sum::<u64>()),
                Cell::new(reasons.join("; ")),
            ]);
        }

        let total_good: u64 = self.stats.values().map(|s| s.good).sum();
        let total_bad: u64 = self.stats.values().map(|s| s.bad.values().sum::<u64>()).sum();
        let total_skipped: u64 = self.stats.values().map(|s| s.skipped).sum();

        format!(
            "{table}\ntotals: {total_good} good, {total_bad} bad, {total_skipped} skipped"
        )
    }

    /// Sample failing rows captured for `table`, for diagnostics output.
    #[must_use]
    pub fn failed_records(&self, table: &str) -> &[FailedRecord] {
        self.stats
            .get(table)
            .map_or(&[], |s| s.failed_records.as_slice())
    }
}
