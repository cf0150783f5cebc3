// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Background Jobs
//!
//! Fire-and-forget work that must not delay a response, such as sending the
//! password-reset email or downloading a federated user's avatar.
//!
//! Request handlers push jobs through a cloneable [`BackgroundTasks`] handle.
//! A single [`TaskWorker`] drains the queue and runs each job on its own
//! tokio task, so a slow SMTP relay never blocks an avatar download.
//!
//! ## Shutdown
//!
//! The worker stops accepting jobs when its `CancellationToken` fires, then
//! gives in-flight jobs [`SHUTDOWN_GRACE`] to finish before aborting them.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Time in-flight jobs get to complete after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type BoxedJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Job {
    name: &'static str,
    future: BoxedJob,
}

/// Handle for submitting background jobs.
#[derive(Clone)]
pub struct BackgroundTasks {
    sender: mpsc::UnboundedSender<Job>,
}

impl BackgroundTasks {
    /// Create a queue and the worker that drains it.
    pub fn new() -> (Self, TaskWorker) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, TaskWorker { receiver })
    }

    /// Queue a job. Never blocks; if the worker has stopped the job is
    /// dropped with a warning.
    pub fn submit<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let job = Job {
            name,
            future: Box::pin(future),
        };
        if self.sender.send(job).is_err() {
            warn!(job = name, "Background worker stopped; job dropped");
        }
    }
}

/// Consumer side of the job queue.
pub struct TaskWorker {
    receiver: mpsc::UnboundedReceiver<Job>,
}

impl TaskWorker {
    /// Run jobs until the cancellation token is triggered or every
    /// [`BackgroundTasks`] handle is dropped.
    ///
    /// ```rust,ignore
    /// tokio::spawn(worker.run(shutdown.clone()));
    /// ```
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Background worker started");
        let mut running = JoinSet::new();

        loop {
            tokio::select! {
                job = self.receiver.recv() => {
                    let Some(job) = job else { break };
                    debug!(job = job.name, "Starting background job");
                    let name = job.name;
                    running.spawn(async move {
                        job.future.await;
                        name
                    });
                }
                Some(done) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = done {
                        warn!(error = %e, "Background job panicked");
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Background worker received shutdown signal");
                    break;
                }
            }
        }

        self.receiver.close();
        if !running.is_empty() {
            let pending = running.len();
            let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
                while running.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(pending, "Aborting unfinished background jobs");
                running.abort_all();
            }
        }

        info!("Background worker stopped");
    }
}
