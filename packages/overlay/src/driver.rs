//! Runs every catalog dataset through resolve, clip, aggregate and
//! summarise, recording each outcome in a [`ReportAccumulator`].

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt as _;
use overlay_report_catalog_models::DatasetDescriptor;
use overlay_report_geometry::GeometryEngine;
use overlay_report_report::{InterestSummarizer, ReportAccumulator, SummaryRequest};
use overlay_report_report_models::{FailedInterest, Interest};
use overlay_report_source::{DataSourceResolver, SourceHandle};

use crate::aggregator::ResultAggregator;
use crate::aoi::AreaOfInterest;
use crate::clipper::{Candidates, ClippedFragment, OverlayClipper};
use crate::context::RunContext;
use crate::failure::FailureReason;

/// Where a dataset is in its evaluation. Logged on each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetState {
    Pending,
    Resolving,
    Clipping,
    Aggregating,
    Summarizing,
    Done,
    Failed,
}

impl fmt::Display for DatasetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Clipping => "clipping",
            Self::Aggregating => "aggregating",
            Self::Summarizing => "summarizing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of one dataset.
#[derive(Debug)]
enum DatasetOutcome {
    /// Evaluated. `partial_failure` is set when some AOI features could not
    /// be clipped.
    Completed {
        interest: Box<Interest>,
        partial_failure: Option<FailureReason>,
    },
    Failed(FailureReason),
    /// Recognised but not evaluated (raster input).
    Skipped,
    /// Cancelled between AOI features.
    Cancelled,
}

/// What a driver run produced.
#[derive(Debug)]
pub struct DriverOutcome {
    pub accumulator: ReportAccumulator,
    pub cancelled: bool,
    /// Datasets that finished (including failures and skips).
    pub processed: usize,
}

pub struct OverlayPipelineDriver {
    resolver: Arc<DataSourceResolver>,
    engine: Arc<dyn GeometryEngine>,
    summarizer: InterestSummarizer,
    context: RunContext,
}

impl OverlayPipelineDriver {
    #[must_use]
    pub fn new(
        resolver: DataSourceResolver,
        engine: Arc<dyn GeometryEngine>,
        context: RunContext,
    ) -> Self {
        Self {
            resolver: Arc::new(resolver),
            engine,
            summarizer: InterestSummarizer::default(),
            context,
        }
    }

    /// Evaluates `datasets` against `aoi`.
    ///
    /// Up to `concurrency` datasets run at once; results are recorded in
    /// catalog order. Loading and clipping run on blocking threads, so file
    /// datasets evaluate in parallel. Cancellation is checked before each dataset is
    /// started and between AOI features, and stops the run with whatever
    /// has been recorded so far.
    pub async fn run(&self, aoi: &AreaOfInterest, datasets: &[DatasetDescriptor]) -> DriverOutcome {
        let total = datasets.len();
        let progress = &self.context.progress;
        progress.set_total(total as u64);
        log::info!("Evaluating {total} interests");

        let mut accumulator = ReportAccumulator::new();
        let mut processed = 0;

        let mut outcomes = futures::stream::iter(datasets.iter().enumerate())
            .take_while(|_| futures::future::ready(!self.context.is_cancelled()))
            .map(|(index, descriptor)| async move {
                let outcome = self.process_dataset(index, total, aoi, descriptor).await;
                (descriptor, outcome)
            })
            .buffered(self.context.concurrency.max(1));

        while let Some((descriptor, outcome)) = outcomes.next().await {
            match outcome {
                DatasetOutcome::Completed {
                    interest,
                    partial_failure,
                } => {
                    if let Some(reason) = partial_failure {
                        accumulator.push_failure(failed_interest(descriptor, &reason));
                    }
                    accumulator.push_interest(*interest);
                }
                DatasetOutcome::Failed(reason) => {
                    accumulator.push_failure(failed_interest(descriptor, &reason));
                }
                DatasetOutcome::Skipped => {}
                DatasetOutcome::Cancelled => continue,
            }
            processed += 1;
            progress.inc(1);
        }

        let cancelled = self.context.is_cancelled();
        if cancelled {
            log::warn!("Run cancelled after {processed} of {total} datasets");
            progress.finish(format!("Cancelled after {processed}/{total} datasets"));
        } else {
            progress.finish(format!(
                "Evaluated {total} datasets: {} interests, {} failed",
                accumulator.interests().len(),
                accumulator.failures().len()
            ));
        }

        DriverOutcome {
            accumulator,
            cancelled,
            processed,
        }
    }

    async fn process_dataset(
        &self,
        index: usize,
        total: usize,
        aoi: &AreaOfInterest,
        descriptor: &DatasetDescriptor,
    ) -> DatasetOutcome {
        let title = descriptor.title.as_str();
        let started = Instant::now();

        log::debug!("{title}: {}", DatasetState::Pending);
        self.context
            .progress
            .set_message(format!("[{}/{total}] {title}", index + 1));

        let outcome = match self.evaluate(aoi, descriptor).await {
            Ok(outcome) => outcome,
            Err(reason) => {
                log::warn!("{title}: {} - {reason}", DatasetState::Failed);
                self.context
                    .progress
                    .set_message(format!("{title}: {}", reason.comment()));
                DatasetOutcome::Failed(reason)
            }
        };

        if let DatasetOutcome::Completed { interest, .. } = &outcome {
            log::info!(
                "{title}: {} - {} overlapping feature(s)",
                DatasetState::Done,
                interest.count
            );
        }
        log::info!(
            "{title}: finished in {:.2}s",
            started.elapsed().as_secs_f64()
        );

        outcome
    }

    async fn evaluate(
        &self,
        aoi: &AreaOfInterest,
        descriptor: &DatasetDescriptor,
    ) -> Result<DatasetOutcome, FailureReason> {
        let title = descriptor.title.as_str();
        let working_crs = self.context.working_crs;

        log::debug!("{title}: {}", DatasetState::Resolving);
        let handle = self.resolve(descriptor).await?;

        let Some(adapter) = handle.adapter() else {
            if let SourceHandle::Raster { path } = &handle {
                log::info!("{title}: raster input {} skipped", path.display());
            }
            return Ok(DatasetOutcome::Skipped);
        };

        let secure = descriptor
            .table
            .as_deref()
            .is_some_and(|table| self.context.protected.contains(table));

        if handle.is_remote() {
            let exists = adapter
                .exists()
                .await
                .map_err(|e| FailureReason::from_source(&e, secure))?;
            if !exists {
                return Err(FailureReason::TableInaccessible { protected: secure });
            }
            let has_rows = adapter
                .has_spatial_rows()
                .await
                .map_err(|e| FailureReason::from_source(&e, secure))?;
            if !has_rows {
                return Err(FailureReason::NoSpatialData);
            }
        }

        let kind = adapter
            .geometry_kind()
            .await
            .map_err(|e| FailureReason::from_source(&e, secure))?;
        log::debug!(
            "{title}: geometry type {}",
            kind.map_or_else(|| "none".to_string(), |k| k.to_string())
        );

        log::debug!("{title}: {}", DatasetState::Clipping);
        let clipper = OverlayClipper::new(self.engine.as_ref(), working_crs);
        let mut fragments = Vec::with_capacity(aoi.features.len());
        let mut partial_failure = None;

        for feature in &aoi.features {
            if self.context.is_cancelled() {
                log::info!("{title}: cancelled before AOI feature {}", feature.index);
                return Ok(DatasetOutcome::Cancelled);
            }

            let clipped = match clipper
                .candidates(adapter, feature, descriptor.filter.as_deref())
                .await
            {
                Ok(candidates) => self.clip(candidates).await,
                Err(reason) => Err(reason),
            };

            match clipped {
                Ok(fragment) => fragments.push(fragment),
                Err(reason) if reason.continues_dataset() => {
                    log::warn!("{title}: AOI feature {}: {reason}", feature.index);
                    partial_failure.get_or_insert(reason);
                }
                Err(reason) => return Err(reason),
            }
        }

        log::debug!("{title}: {}", DatasetState::Aggregating);
        let aggregator = ResultAggregator::new(self.engine.as_ref(), working_crs);
        let Some(layer) = aggregator.aggregate(fragments, title)? else {
            return match partial_failure {
                Some(reason) => Err(reason),
                None => Ok(DatasetOutcome::Skipped),
            };
        };

        log::debug!("{title}: {}", DatasetState::Summarizing);
        let interest = self
            .summarizer
            .summarize(
                &layer,
                &SummaryRequest {
                    group: &descriptor.group,
                    subgroup: descriptor.subgroup.as_deref(),
                    summary_fields: &descriptor.summary_fields,
                    secure,
                },
            )
            .map_err(|e| FailureReason::from_summary(&e))?;

        Ok(DatasetOutcome::Completed {
            interest: Box::new(interest),
            partial_failure,
        })
    }

    /// Loads the dataset on a blocking thread; file loaders read from disk
    /// and DuckDB synchronously.
    async fn resolve(&self, descriptor: &DatasetDescriptor) -> Result<SourceHandle, FailureReason> {
        let resolver = Arc::clone(&self.resolver);
        let descriptor = descriptor.clone();

        tokio::task::spawn_blocking(move || resolver.resolve(&descriptor))
            .await
            .map_err(|e| FailureReason::InvalidInput {
                detail: format!("loader aborted: {e}"),
            })?
            .map_err(|e| FailureReason::from_resolution(&e))
    }

    /// Clips on a blocking thread. A panic inside the geometry engine is
    /// reported as a geometry issue for this AOI feature.
    async fn clip(&self, candidates: Candidates) -> Result<ClippedFragment, FailureReason> {
        let engine = Arc::clone(&self.engine);
        let working_crs = self.context.working_crs;

        tokio::task::spawn_blocking(move || {
            OverlayClipper::new(engine.as_ref(), working_crs).clip_candidates(candidates)
        })
        .await
        .unwrap_or_else(|e| {
            Err(FailureReason::GeometryRepairExhausted {
                detail: format!("clip aborted: {e}"),
            })
        })
    }
}

fn failed_interest(descriptor: &DatasetDescriptor, reason: &FailureReason) -> FailedInterest {
    FailedInterest {
        name: descriptor.title.clone(),
        group: descriptor.group.clone(),
        subgroup: descriptor.subgroup.clone(),
        comment: reason.comment(),
    }
}
