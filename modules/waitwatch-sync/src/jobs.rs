use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub enum SubmitOutcome {
    Started(JoinHandle<()>),
    /// A job with this name is queued or running; nothing was submitted.
    AlreadyRunning,
}

impl SubmitOutcome {
    pub fn started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

/// Background job submission bounded by a semaphore. At most one job per
/// name is in flight at a time.
#[derive(Clone)]
pub struct JobRunner {
    permits: Arc<Semaphore>,
    active: Arc<Mutex<HashSet<String>>>,
}

/// Clears a job's name when its task ends, including on panic.
struct ActiveGuard {
    name: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        active.remove(&self.name);
    }
}

impl JobRunner {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        active.contains(name)
    }

    pub fn submit<F>(&self, name: &str, job: F) -> SubmitOutcome
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        {
            let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
            if !active.insert(name.to_string()) {
                info!(job = name, "Job already running, not resubmitting");
                return SubmitOutcome::AlreadyRunning;
            }
        }

        let guard = ActiveGuard {
            name: name.to_string(),
            active: self.active.clone(),
        };
        let permits = self.permits.clone();

        SubmitOutcome::Started(tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                error!(job = guard.name.as_str(), "Job runner closed before job could start");
                return;
            };
            info!(job = guard.name.as_str(), "Job started");
            match job.await {
                Ok(()) => info!(job = guard.name.as_str(), "Job finished"),
                Err(e) => error!(job = guard.name.as_str(), error = %e, "Job failed"),
            }
        }))
    }
}
