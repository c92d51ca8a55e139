//! Pipeline orchestration: the fixed step sequence and the two
//! execution modes.
//!
//! Step order: ensure schema → mark running → sync reference dimension
//! → parallel extract → transactional replace-and-bulk-load → transform
//! → generate findings → aggregate cashflow → mark success. Any failure
//! aborts the remaining steps and marks the run FAILED with the
//! captured (truncated) message.
//!
//! Synchronous mode re-raises the failure to the caller. Background
//! mode is fire-and-forget: the QUEUED row is persisted, the run id
//! returned immediately, and execution proceeds on a detached task;
//! callers observe progress by polling the run row. There is no
//! cancellation: once started, a run can only be observed.

pub mod cashflow;
pub mod extract;
pub mod findings;
pub mod load;
pub mod run;
pub mod schema;
pub mod transform;

use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::types::{PipelineError, SnapshotRequest, SnapshotRun};
use cashflow::CashflowAggregator;
use extract::{ExtractionWindow, Extractor};
use findings::FindingsEngine;
use load::BulkLoader;
use run::RunLifecycle;
use schema::SchemaEvolution;
use transform::Transformer;

/// The assembled pipeline. Cheap to clone (pools are handles), which
/// is what lets background runs detach.
#[derive(Clone)]
pub struct Pipeline {
    source: SqlitePool,
    audit: SqlitePool,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(source: SqlitePool, audit: SqlitePool, config: PipelineConfig) -> Self {
        Self {
            source,
            audit,
            config,
        }
    }

    /// Run-status accessor for callers polling a background run.
    pub fn runs(&self) -> RunLifecycle<'_> {
        RunLifecycle::new(&self.audit)
    }

    /// Synchronous execution: the caller awaits the full pipeline. Any
    /// failure marks the run FAILED and is re-raised.
    pub async fn run_sync(&self, request: &SnapshotRequest) -> Result<Uuid, PipelineError> {
        let run = self.prepare(request).await?;
        let run_id = run.run_id;
        self.execute(run).await?;
        Ok(run_id)
    }

    /// Queue-and-return execution: persists the QUEUED row, returns the
    /// run id immediately, and executes on a detached task. Failures
    /// are logged and recorded on the run row, never raised here.
    pub async fn run_background(&self, request: &SnapshotRequest) -> Result<Uuid, PipelineError> {
        let run = self.prepare(request).await?;
        let run_id = run.run_id;
        let pipeline = self.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.execute(run).await {
                error!(run_id = %run_id, error = %e, "background snapshot run failed");
            }
        });
        Ok(run_id)
    }

    /// Ensure the destination schema and persist the QUEUED row.
    async fn prepare(&self, request: &SnapshotRequest) -> Result<SnapshotRun, PipelineError> {
        SchemaEvolution::new(&self.audit).ensure().await?;
        let run = SnapshotRun::new(request);
        RunLifecycle::new(&self.audit).create(&run).await?;
        Ok(run)
    }

    /// Execute all steps, recording the terminal state either way.
    async fn execute(&self, run: SnapshotRun) -> Result<(), PipelineError> {
        let lifecycle = RunLifecycle::new(&self.audit);
        match self.execute_steps(&run).await {
            Ok(()) => lifecycle.finish_success(run.run_id).await,
            Err(e) => {
                if let Err(persist) =
                    lifecycle.finish_failure(run.run_id, &e.to_string()).await
                {
                    error!(
                        run_id = %run.run_id,
                        error = %persist,
                        "could not record run failure"
                    );
                }
                Err(e)
            }
        }
    }

    async fn execute_steps(&self, run: &SnapshotRun) -> Result<(), PipelineError> {
        let pipeline_start = Instant::now();
        let lifecycle = RunLifecycle::new(&self.audit);
        let extractor = Extractor::new(&self.source);
        let loader = BulkLoader::new(&self.audit, self.config.insert_batch_size);

        // Re-checked here as well so re-invoking a crashed run id goes
        // through the same guarantees as a fresh run.
        SchemaEvolution::new(&self.audit).ensure().await?;
        lifecycle.mark_running(run.run_id).await?;

        let step = Instant::now();
        let tipos = extractor.fetch_movement_types().await?;
        loader.upsert_movement_types(&tipos).await?;
        info!(
            run_id = %run.run_id,
            elapsed_ms = step.elapsed().as_millis() as u64,
            rows = tipos.len(),
            "step complete: dimension sync"
        );

        let step = Instant::now();
        let window = ExtractionWindow {
            start: run.period_start,
            end: run.period_end,
            axis: run.window_axis,
            branch: run.legacy_branch_filter,
        };
        let extraction = extractor.extract(&window).await?;
        info!(
            run_id = %run.run_id,
            elapsed_ms = step.elapsed().as_millis() as u64,
            rows = extraction.total_rows(),
            "step complete: extract"
        );

        let step = Instant::now();
        let load_summary = loader.replace_run(run.run_id, &extraction).await?;
        info!(
            run_id = %run.run_id,
            elapsed_ms = step.elapsed().as_millis() as u64,
            rows = load_summary.total(),
            "step complete: load"
        );

        let step = Instant::now();
        let transformer = Transformer::new(
            &self.audit,
            self.config.house_bank_marker.clone(),
            Utc::now().date_naive(),
            self.config.insert_batch_size,
        );
        let fact_count = transformer.build_facts(run.run_id).await?;
        info!(
            run_id = %run.run_id,
            elapsed_ms = step.elapsed().as_millis() as u64,
            rows = fact_count,
            "step complete: transform"
        );

        let step = Instant::now();
        let engine = FindingsEngine::new(
            &self.audit,
            self.config.divergence_tolerance,
            self.config.insert_batch_size,
        );
        let finding_count = engine.generate(run.run_id).await?;
        info!(
            run_id = %run.run_id,
            elapsed_ms = step.elapsed().as_millis() as u64,
            rows = finding_count,
            "step complete: findings"
        );

        let step = Instant::now();
        let aggregator = CashflowAggregator::new(&self.audit, self.config.insert_batch_size);
        let day_count = aggregator.aggregate(run.run_id).await?;
        info!(
            run_id = %run.run_id,
            elapsed_ms = step.elapsed().as_millis() as u64,
            rows = day_count,
            "step complete: cashflow"
        );

        info!(
            run_id = %run.run_id,
            elapsed_ms = pipeline_start.elapsed().as_millis() as u64,
            facts = fact_count,
            findings = finding_count,
            cashflow_days = day_count,
            "pipeline complete"
        );
        Ok(())
    }
}
