//! Worker pool driving per-feature ingestion.
//!
//! The first input of every pass runs on the calling thread before anything
//! is dispatched, so systemic failures (a bad file, a bad configuration)
//! surface before workers start. The remaining inputs are handed to a rayon
//! pool in sequence order and may finish out of order. The caller's iterator
//! is consumed on the calling thread only, so lazy sources need not be
//! `Send`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use log::{debug, info, warn};
use munigeo_core::RecordId;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::ImportError;

/// Default number of import workers.
pub const DEFAULT_WORKERS: usize = 8;

/// Result of ingesting one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureOutcome {
    /// The record was written and committed.
    Committed(RecordId),
    /// The record was buffered for a later bulk write.
    Queued,
    /// The input was skipped for the given reason.
    Skipped(String),
}

/// An input skipped by its ingestor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFeature {
    /// Position of the input in the pass.
    pub index: usize,
    /// Why it was skipped.
    pub reason: String,
}

/// An input whose ingestion failed without aborting the pass.
#[derive(Debug)]
pub struct FeatureFailure {
    /// Position of the input in the pass.
    pub index: usize,
    /// The collected error.
    pub error: ImportError,
}

/// Per-pass accounting produced by [`ConcurrentImportRunner::run`].
#[derive(Debug, Default)]
pub struct PassReport {
    /// Inputs handed to the ingestor.
    pub processed: usize,
    /// Records committed individually.
    pub committed: usize,
    /// Records buffered for bulk creation.
    pub queued: usize,
    /// Skipped inputs, in input order.
    pub skipped: Vec<SkippedFeature>,
    /// Non-fatal failures, in input order.
    pub failures: Vec<FeatureFailure>,
}

impl PassReport {
    /// Whether every processed input was committed, queued or skipped.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, index: usize, result: Result<FeatureOutcome, ImportError>) {
        self.processed += 1;
        match result {
            Ok(FeatureOutcome::Committed(_)) => self.committed += 1,
            Ok(FeatureOutcome::Queued) => self.queued += 1,
            Ok(FeatureOutcome::Skipped(reason)) => {
                warn!("Skipped feature {index}: {reason}");
                self.skipped.push(SkippedFeature { index, reason });
            }
            Err(error) => {
                warn!("Feature {index} failed: {error}");
                self.failures.push(FeatureFailure { index, error });
            }
        }
    }

    fn sort(&mut self) {
        self.skipped.sort_by_key(|skipped| skipped.index);
        self.failures.sort_by_key(|failure| failure.index);
    }
}

/// Bounded worker pool for import passes.
///
/// A runner built with [`ConcurrentImportRunner::sequential`] processes every
/// input on the calling thread with the same error policy.
pub struct ConcurrentImportRunner {
    pool: Option<ThreadPool>,
}

impl std::fmt::Debug for ConcurrentImportRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentImportRunner")
            .field("workers", &self.workers())
            .finish()
    }
}

impl ConcurrentImportRunner {
    /// Runner backed by `workers` threads.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::WorkerPool`] when the threads cannot be spawned.
    pub fn new(workers: usize) -> Result<Self, ImportError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("munigeo-import-{index}"))
            .build()?;
        Ok(Self { pool: Some(pool) })
    }

    /// Runner that processes every input on the calling thread.
    #[must_use]
    pub const fn sequential() -> Self {
        Self { pool: None }
    }

    /// Number of worker threads, `1` for a sequential runner.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.pool
            .as_ref()
            .map_or(1, ThreadPool::current_num_threads)
    }

    /// Feed every input through `handler`.
    ///
    /// Any error from the first input aborts the pass before dispatch
    /// starts. Afterwards, fatal errors (see [`ImportError::is_fatal`]) stop
    /// further dispatch and the first one raised is returned once in-flight
    /// work has drained; other errors are collected in the report.
    /// Committed work is never rolled back.
    ///
    /// # Errors
    ///
    /// Returns the first-input error or the first fatal error raised.
    pub fn run<I, H>(&self, inputs: I, handler: H) -> Result<PassReport, ImportError>
    where
        I: IntoIterator,
        I::Item: Send,
        H: Fn(I::Item) -> Result<FeatureOutcome, ImportError> + Sync,
    {
        let mut inputs = inputs.into_iter().enumerate();
        let mut report = PassReport::default();

        let Some((index, first)) = inputs.next() else {
            debug!("Import pass received no input");
            return Ok(report);
        };
        let outcome = handler(first).inspect_err(|err| {
            warn!("First feature failed, aborting pass before dispatch: {err}");
        })?;
        report.record(index, Ok(outcome));

        match &self.pool {
            None => Self::drain_sequential(inputs, &handler, &mut report)?,
            Some(pool) => Self::drain_pool(pool, inputs, &handler, &mut report)?,
        }

        report.sort();
        info!(
            "Import pass processed {} features: {} committed, {} queued, {} skipped, {} failed",
            report.processed,
            report.committed,
            report.queued,
            report.skipped.len(),
            report.failures.len()
        );
        Ok(report)
    }

    fn drain_sequential<T, H>(
        inputs: impl Iterator<Item = (usize, T)>,
        handler: &H,
        report: &mut PassReport,
    ) -> Result<(), ImportError>
    where
        H: Fn(T) -> Result<FeatureOutcome, ImportError>,
    {
        for (index, input) in inputs {
            match handler(input) {
                Err(err) if err.is_fatal() => {
                    warn!("Feature {index} failed fatally, aborting pass: {err}");
                    return Err(err);
                }
                result => report.record(index, result),
            }
        }
        Ok(())
    }

    fn drain_pool<T, H>(
        pool: &ThreadPool,
        inputs: impl Iterator<Item = (usize, T)>,
        handler: &H,
        report: &mut PassReport,
    ) -> Result<(), ImportError>
    where
        T: Send,
        H: Fn(T) -> Result<FeatureOutcome, ImportError> + Sync,
    {
        let abort = AtomicBool::new(false);
        let completed: Mutex<Vec<(usize, Result<FeatureOutcome, ImportError>)>> =
            Mutex::new(Vec::new());
        let fatal: Mutex<Option<ImportError>> = Mutex::new(None);

        pool.in_place_scope(|scope| {
            for (index, input) in inputs {
                if abort.load(Ordering::Acquire) {
                    debug!("Dispatch stopped at feature {index}");
                    break;
                }
                let (abort, completed, fatal) = (&abort, &completed, &fatal);
                scope.spawn(move |_| {
                    if abort.load(Ordering::Acquire) {
                        return;
                    }
                    match handler(input) {
                        Err(err) if err.is_fatal() => {
                            abort.store(true, Ordering::Release);
                            warn!("Feature {index} failed fatally, aborting dispatch: {err}");
                            fatal
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .get_or_insert(err);
                        }
                        result => completed
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push((index, result)),
                    }
                });
            }
        });

        for (index, result) in completed
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
        {
            report.record(index, result);
        }
        match fatal.into_inner().unwrap_or_else(PoisonError::into_inner) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use munigeo_core::StoreError;
    use rstest::rstest;
    use std::sync::atomic::AtomicUsize;

    fn committing(n: usize) -> Result<FeatureOutcome, ImportError> {
        Ok(FeatureOutcome::Committed(RecordId(
            i64::try_from(n).expect("small index"),
        )))
    }

    #[rstest]
    #[case::sequential(ConcurrentImportRunner::sequential())]
    #[case::pooled(ConcurrentImportRunner::new(4).expect("pool"))]
    fn every_input_is_processed(#[case] runner: ConcurrentImportRunner) {
        let report = runner.run(0..50_usize, committing).expect("pass");

        assert_eq!(report.processed, 50);
        assert_eq!(report.committed, 50);
        assert!(report.is_clean());
    }

    #[rstest]
    fn empty_input_yields_empty_report() {
        let runner = ConcurrentImportRunner::new(2).expect("pool");
        let report = runner.run(Vec::<usize>::new(), committing).expect("pass");
        assert_eq!(report.processed, 0);
    }

    #[rstest]
    #[case::sequential(ConcurrentImportRunner::sequential())]
    #[case::pooled(ConcurrentImportRunner::new(4).expect("pool"))]
    fn first_failure_stops_before_dispatch(#[case] runner: ConcurrentImportRunner) {
        let calls = AtomicUsize::new(0);

        let err = runner
            .run(0..20_usize, |n| {
                calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    return Err(ImportError::UnparsableLabel {
                        label: String::from("Helsinki"),
                    });
                }
                committing(n)
            })
            .expect_err("first input fails");

        assert!(matches!(err, ImportError::UnparsableLabel { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    #[case::sequential(ConcurrentImportRunner::sequential())]
    #[case::pooled(ConcurrentImportRunner::new(4).expect("pool"))]
    fn later_data_errors_are_collected_in_order(#[case] runner: ConcurrentImportRunner) {
        let report = runner
            .run(0..30_usize, |n| match n % 10 {
                3 => Err(ImportError::MissingIdentifier {
                    attribute: String::from("nationalCode"),
                }),
                7 => Ok(FeatureOutcome::Skipped(String::from("no city"))),
                _ => committing(n),
            })
            .expect("pass");

        let failed: Vec<_> = report.failures.iter().map(|f| f.index).collect();
        let skipped: Vec<_> = report.skipped.iter().map(|s| s.index).collect();
        assert_eq!(failed, vec![3, 13, 23]);
        assert_eq!(skipped, vec![7, 17, 27]);
        assert_eq!(report.committed, 24);
    }

    #[rstest]
    fn fatal_error_stops_sequential_dispatch() {
        let runner = ConcurrentImportRunner::sequential();
        let calls = AtomicUsize::new(0);

        let err = runner
            .run(0..10_usize, |n| {
                calls.fetch_add(1, Ordering::SeqCst);
                if n == 4 {
                    return Err(ImportError::Store(StoreError::Poisoned));
                }
                committing(n)
            })
            .expect_err("fatal error");

        assert!(matches!(err, ImportError::Store(StoreError::Poisoned)));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[rstest]
    fn fatal_error_in_pool_is_propagated() {
        let runner = ConcurrentImportRunner::new(2).expect("pool");

        let err = runner
            .run(0..200_usize, |n| {
                if n == 1 {
                    return Err(ImportError::Store(StoreError::Poisoned));
                }
                committing(n)
            })
            .expect_err("fatal error");

        assert!(matches!(err, ImportError::Store(StoreError::Poisoned)));
    }

    #[rstest]
    fn pooled_runner_reports_worker_count() {
        let runner = ConcurrentImportRunner::new(3).expect("pool");
        assert_eq!(runner.workers(), 3);
        assert_eq!(ConcurrentImportRunner::sequential().workers(), 1);
    }
}
