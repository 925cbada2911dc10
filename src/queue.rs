use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::pipeline::Pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    pub job_id: Uuid,
}

/// Fixed-size pool of workers draining a shared queue of jobs. Each job runs
/// in its own task so a panic fails that job without taking the worker down.
pub struct WorkerPool {
    sender: mpsc::UnboundedSender<WorkItem>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(pipeline: Arc<Pipeline>, size: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel::<WorkItem>();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size.max(1))
            .map(|worker| {
                let pipeline = Arc::clone(&pipeline);
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(item) = next else {
                            break;
                        };
                        debug!(worker, job_id = %item.job_id, "picked up job");

                        let task = {
                            let pipeline = Arc::clone(&pipeline);
                            tokio::spawn(async move { pipeline.run(item.job_id).await })
                        };
                        if let Err(err) = task.await {
                            error!(worker, job_id = %item.job_id, error = %err, "job task aborted");
                            pipeline.abandon(item.job_id, &format!("job task aborted: {err}")).await;
                        }
                    }
                    debug!(worker, "worker stopped");
                })
            })
            .collect();

        Self { sender, workers }
    }

    pub fn enqueue(&self, job_id: Uuid) -> Result<()> {
        self.sender
            .send(WorkItem { job_id })
            .map_err(|_| PipelineError::QueueClosed)
    }

    /// Stops accepting work and waits for every queued job to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            if let Err(err) = worker.await {
                error!(error = %err, "worker exited abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;
    use crate::pipeline::tests::{loose_csv, mother_csv, Fixture};

    #[tokio::test]
    async fn pool_drains_every_queued_job() {
        let fixture = Fixture::new();
        let mut job_ids = Vec::new();
        for _ in 0..4 {
            let job = fixture
                .job_for(
                    &mother_csv(&["1", "2"]),
                    &loose_csv(&[("1", "Meli", "2024-01-10", "2024-01-11", "1")]),
                )
                .await;
            job_ids.push(job.id);
        }
        let Fixture { dir, pipeline } = fixture;
        let pipeline = Arc::new(pipeline);

        let pool = WorkerPool::start(Arc::clone(&pipeline), 2);
        for job_id in &job_ids {
            pool.enqueue(*job_id).unwrap();
        }
        pool.shutdown().await;

        for job_id in job_ids {
            let job = pipeline.repos().job(job_id).await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Completed);
        }
        drop(dir);
    }

    #[tokio::test]
    async fn unknown_job_does_not_stop_the_worker() {
        let fixture = Fixture::new();
        let job = fixture
            .job_for(&mother_csv(&["1"]), &loose_csv(&[]))
            .await;
        let Fixture { dir, pipeline } = fixture;
        let pipeline = Arc::new(pipeline);

        let pool = WorkerPool::start(Arc::clone(&pipeline), 1);
        pool.enqueue(Uuid::new_v4()).unwrap();
        pool.enqueue(job.id).unwrap();
        pool.shutdown().await;

        let stored = pipeline.repos().job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.message.as_deref(), Some("loose table has no data rows"));
        drop(dir);
    }
}
