//! Per-caller conversion slot with cancel-and-replace semantics

use crate::config::{ConversionOptions, Limits};
use crate::error::ConvertError;
use crate::job::JobHandle;
use crate::source::SourceAsset;
use crate::worker::WorkerPool;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, instrument};

/// Holds at most one job. Starting a new conversion cancels the one in flight.
#[derive(Debug)]
pub struct ConversionSession {
    pool: WorkerPool,
    limits: Limits,
    created_at: DateTime<Utc>,
    current: Mutex<Option<JobHandle>>,
    upload_name: Mutex<Option<String>>,
}

impl ConversionSession {
    pub fn new(pool: WorkerPool, limits: Limits) -> Self {
        Self {
            pool,
            limits,
            created_at: Utc::now(),
            current: Mutex::new(None),
            upload_name: Mutex::new(None),
        }
    }

    /// Validate the request and start converting it.
    ///
    /// Empty input, input without a HEIC/HEIF `ftyp` signature, oversized input
    /// and out-of-range options fail here, before any job exists. On success the
    /// previous job (if any) is cancelled and replaced.
    #[instrument(skip_all, fields(size = source.len()))]
    pub fn start_conversion(
        &self,
        source: Bytes,
        options: ConversionOptions,
    ) -> Result<JobHandle, ConvertError> {
        options.validate()?;
        let asset = SourceAsset::new(source)?;
        if asset.len() > self.limits.max_file_size {
            return Err(ConvertError::FileTooLarge {
                size: asset.len(),
                max: self.limits.max_file_size,
            });
        }

        let job = self.pool.submit(asset, options, self.limits);
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(job.clone());
        if let Some(previous) = previous {
            debug!(previous = %previous.id(), "Replacing conversion");
            previous.cancel();
        }
        Ok(job)
    }

    pub fn current(&self) -> Option<JobHandle> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remember the client's file name for the current conversion's download.
    pub fn set_upload_name(&self, name: Option<String>) {
        *self
            .upload_name
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = name;
    }

    pub fn upload_name(&self) -> Option<String> {
        self.upload_name
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// No conversion is running: none was started or the last one reached a terminal state.
    pub fn is_idle(&self) -> bool {
        self.current()
            .is_none_or(|job| job.snapshot().state.is_terminal())
    }

    /// Start of the current job, or of the session when it has none.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.current()
            .map_or(self.created_at, |job| job.created_at())
    }

    /// Cancel and forget the current job, if any.
    pub fn discard(&self) -> Option<JobHandle> {
        let job = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(job) = &job {
            job.cancel();
        }
        job
    }
}
