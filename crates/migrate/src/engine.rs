//! Reconciliation engine
//!
//! Compares the version recorded in the database with the highest version the
//! catalog offers and drives the database to it:
//!
//! - `current < top`: apply `(current, top]` in ascending order
//! - `current > top`: revert every recorded version above `top` from its stored
//!   rollback script, then let the Down-runner confirm the database sits at
//!   `top`. Catalog versions history never recorded are applied afterwards.
//! - `current == top`: converged, nothing runs
//!
//! A failure stops the run where it happened. Nothing is retried or compensated.

use std::time::Instant;
use tracing::info;

use crate::definitions::{
    Direction, Migration, MigrationRunResult, Outcome, ReconciliationPlan, RollbackResult,
    Version,
};
use crate::dialect::Dialect;
use crate::error::{MigrateResult, Operation};
use crate::recovery::{RecoverySink, RollbackRecovery};
use crate::runner::{MigrationBackend, MigrationRunner};

pub struct ReconciliationEngine<'a, B: ?Sized> {
    backend: &'a B,
    dialect: Dialect,
    sink: Option<&'a dyn RecoverySink>,
}

impl<'a, B: MigrationBackend + ?Sized> ReconciliationEngine<'a, B> {
    pub fn new(backend: &'a B, dialect: Dialect) -> Self {
        Self {
            backend,
            dialect,
            sink: None,
        }
    }

    /// Dump recovered rollback scripts to `sink` before they run
    pub fn with_sink(mut self, sink: &'a dyn RecoverySink) -> Self {
        self.sink = Some(sink);
        self
    }

    async fn settled_version(&self, target: Version) -> MigrateResult<Version> {
        self.backend.current_version().await.map_err(|e| {
            e.context(
                Operation::CurrentVersionLookup,
                format!("after reverting to {}", target),
            )
        })
    }

    /// Decide what a run from `current` against `catalog` would do
    pub fn plan(current: Version, catalog: &[Migration]) -> ReconciliationPlan {
        let top = catalog.last().map_or(0, |m| m.version);
        ReconciliationPlan::new(current, top)
    }

    /// Bring the database from `current` to the catalog's top version.
    ///
    /// `catalog` must be sorted ascending by version, as the catalog returns it.
    pub async fn reconcile(&self, current: Version, catalog: &[Migration]) -> MigrateResult<Outcome> {
        let plan = Self::plan(current, catalog);
        let started = Instant::now();
        let runner = MigrationRunner::new(self.backend);

        match plan.direction {
            Direction::None => {
                info!(
                    "No migrations to run. Current version: {}, top most migration: {}",
                    plan.current, plan.target
                );
                Ok(Outcome::Converged {
                    version: plan.current,
                })
            }
            Direction::Up => {
                let applied = runner
                    .up_to(plan.current, catalog, plan.target)
                    .await
                    .map_err(|e| {
                        e.context(
                            Operation::ForwardRun,
                            format!("migrating {} -> {}", plan.current, plan.target),
                        )
                    })?;

                info!(
                    "Migrated {} -> {} ({} applied)",
                    plan.current,
                    plan.target,
                    applied.len()
                );
                Ok(Outcome::MigratedUp(MigrationRunResult {
                    from: plan.current,
                    to: plan.target,
                    applied_migrations: applied,
                    execution_time_ms: started.elapsed().as_millis(),
                }))
            }
            Direction::Down => {
                let floor = plan.target + 1;
                let mut recovery = RollbackRecovery::new(self.backend, self.dialect);
                if let Some(sink) = self.sink {
                    recovery = recovery.with_sink(sink);
                }
                let recovered = recovery.recover(floor).await.map_err(|e| {
                    e.context(
                        Operation::Recovery,
                        format!("recovering {} -> {}", floor, plan.current),
                    )
                })?;

                let rolled_back = runner.down_to(plan.target, catalog).await.map_err(|e| {
                    e.context(Operation::RevertRun, format!("reverting to {}", plan.target))
                })?;

                // History may never have recorded a catalog version below the
                // ones just reverted; the run only ends once it sits at `target`.
                let settled = self.settled_version(plan.target).await?;
                let reapplied = if settled < plan.target {
                    runner
                        .up_to(settled, catalog, plan.target)
                        .await
                        .map_err(|e| {
                            e.context(
                                Operation::ForwardRun,
                                format!("migrating {} -> {}", settled, plan.target),
                            )
                        })?
                } else {
                    Vec::new()
                };
                let to = if reapplied.is_empty() {
                    settled
                } else {
                    self.settled_version(plan.target).await?
                };

                info!(
                    "Migrated {} -> {} ({} recovered, {} reverted, {} re-applied)",
                    plan.current,
                    to,
                    recovered.len(),
                    rolled_back.len(),
                    reapplied.len()
                );
                Ok(Outcome::MigratedDown(RollbackResult {
                    from: plan.current,
                    to,
                    recovered_migrations: recovered,
                    rolled_back_migrations: rolled_back,
                    reapplied_migrations: reapplied,
                    execution_time_ms: started.elapsed().as_millis(),
                }))
            }
        }
    }
}
