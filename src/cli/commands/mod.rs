//! Subcommand implementations, and the shared registry-loading and
//! strategy-wiring helpers they build on.

pub mod apply_sql;
pub mod compare;
pub mod completions;
pub mod mirror_analytics;
pub mod plan;
pub mod run;

use std::collections::HashMap;
use std::path::Path;

use crate::error::{MigrationError, Result};
use crate::registry::Registry;
use crate::strategy::{DirectTranslationStrategy, ImportStrategy, StrategyKind};

/// Read and parse the registry YAML file at `path`.
///
/// # Errors
///
/// Returns `MigrationError::Io` if the file can't be read, or
/// `MigrationError::Schema` if it doesn't parse or violates an
/// invariant.
pub fn load_registry(path: &Path) -> Result<Registry> {
    let yaml = std::fs::read_to_string(path)
        .map_err(|e| MigrationError::Config(format!("cannot read registry file {}: {e}", path.display())))?;
    Registry::from_yaml(&yaml)
}

/// Build the concrete strategy for every table the registry declares.
///
/// Only `DirectTranslation` tables can be wired generically from the
/// registry alone; the other three variants need table-specific
/// extraction closures (which array field to pull from, which child
/// collection and discriminator a relationship lives on) that have no
/// generic derivation from a column list. A table declared with one of
/// those kinds and no bespoke wiring registered here is logged and
/// skipped by the runner, exactly as an unregistered table is.
#[must_use]
pub fn build_strategies(registry: &Registry) -> HashMap<String, Box<dyn ImportStrategy>> {
    let mut strategies: HashMap<String, Box<dyn ImportStrategy>> = HashMap::new();
    for schema in registry.ordered() {
        match schema.strategy {
            StrategyKind::DirectTranslation => {
                strategies.insert(schema.name.clone(), Box::new(DirectTranslationStrategy::new(schema.clone())));
            }
            StrategyKind::ArrayExtraction | StrategyKind::DeleteAndInsert | StrategyKind::SmartDiff => {
                tracing::warn!(
                    table = %schema.name,
                    strategy = ?schema.strategy,
                    "no bespoke strategy wiring registered for this table; it will be skipped"
                );
            }
        }
    }
    strategies
}
