//! Worker pool for CPU-bound image conversion

use crate::config::{ConversionOptions, Limits};
use crate::converter;
use crate::error::ConvertError;
use crate::job::{JobHandle, JobState, Stage};
use crate::source::SourceAsset;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn, Instrument};

/// Bounds how many conversions run on the blocking thread pool at once.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    /// Start converting `source`. Must be called from within a tokio runtime.
    ///
    /// The job waits for a free worker, then runs its stages on the blocking pool.
    /// Cancellation is honoured while queued and between every two stages.
    pub fn submit(
        &self,
        source: SourceAsset,
        options: ConversionOptions,
        limits: Limits,
    ) -> JobHandle {
        let job = JobHandle::new();
        let span = tracing::info_span!("job", id = %job.id());
        let semaphore = self.semaphore.clone();
        let runner = job.clone();

        tokio::spawn(
            async move {
                let token = runner.cancellation_token();
                let permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!("Cancelled while queued");
                        return;
                    }
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => {
                            runner.fail(
                                Stage::Parse,
                                ConvertError::Internal("worker pool closed".to_string()),
                            );
                            return;
                        }
                    },
                };

                let span = tracing::Span::current();
                let job = runner.clone();
                let joined = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    let _entered = span.enter();
                    run_stages(&job, &source, &options, &limits);
                })
                .await;

                if let Err(e) = joined {
                    let stage = runner.snapshot().state.stage().unwrap_or(Stage::Parse);
                    runner.fail(stage, ConvertError::Internal(e.to_string()));
                }
            }
            .instrument(span),
        );

        job
    }

    /// Number of workers currently free.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

/// Drive one job through every stage, stopping as soon as it turns terminal.
fn run_stages(job: &JobHandle, source: &SourceAsset, options: &ConversionOptions, limits: &Limits) {
    info!(size = source.len(), media_type = source.media_type().mime(), "Conversion started");

    macro_rules! stage {
        ($state:expr, $stage:expr, $work:expr) => {{
            if !job.advance($state) {
                debug!(stage = ?$stage, "Stopped before stage");
                return;
            }
            match $work {
                Ok(value) => value,
                Err(error) => {
                    warn!(stage = ?$stage, %error, "Conversion failed");
                    job.fail($stage, error);
                    return;
                }
            }
        }};
    }

    let meta = stage!(JobState::Parsing, Stage::Parse, converter::parse(source, limits));
    let raster = stage!(JobState::Decoding, Stage::Decode, converter::decode(source, &meta));
    let raster = stage!(
        JobState::Transforming,
        Stage::Transform,
        converter::transform(raster, &meta, options)
    );
    let output = stage!(
        JobState::Encoding,
        Stage::Encode,
        converter::encode(&raster, &meta, options)
    );
    drop(raster);

    let (width, height, bytes) = (output.width(), output.height(), output.len());
    if job.complete(output) {
        info!(width, height, bytes, "Conversion complete");
    } else {
        debug!("Discarded output of a cancelled job");
    }
}
