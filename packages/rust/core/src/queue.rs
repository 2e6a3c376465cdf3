//! Background job queue: a bounded channel drained by one worker task.

use std::sync::Arc;

use async_trait::async_trait;
use scorchbook_shared::{Result, ScorchbookError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::pipeline::{ProcessJob, SilentProgress, TastingProcessor};

/// Runs one queued job to completion.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, job: ProcessJob) -> Result<()>;
}

#[async_trait]
impl JobRunner for TastingProcessor {
    async fn run(&self, job: ProcessJob) -> Result<()> {
        self.process_tasting(&job, &SilentProgress).await
    }
}

/// Handle for submitting jobs. Cloning shares the same worker.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<ProcessJob>,
}

impl JobQueue {
    /// Start the worker. It exits once every handle is dropped and the
    /// queue drains.
    pub fn spawn(runner: Arc<dyn JobRunner>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<ProcessJob>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                let record_id = job.record_id;
                debug!(%record_id, "job started");
                if let Err(e) = runner.run(job).await {
                    warn!(%record_id, error = %e, "job failed");
                }
            }
            debug!("job queue closed");
        });
        (Self { sender }, worker)
    }

    /// Queue a job without waiting. Fails when the queue is full or the
    /// worker has stopped.
    pub fn enqueue(&self, job: ProcessJob) -> Result<()> {
        let record_id = job.record_id;
        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                ScorchbookError::Enrichment("processing queue is full".into())
            }
            mpsc::error::TrySendError::Closed(_) => {
                ScorchbookError::Enrichment("processing queue is closed".into())
            }
        })?;
        info!(%record_id, "agent.process.queued");
        Ok(())
    }
}
