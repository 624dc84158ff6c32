use crate::job::{runner, Id, Job, Snapshot, Status, Summary};
use dbferry_core::{config::Endpoint, migrate::FailurePolicy, tool::Tools};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

#[derive(Debug, thiserror::Error)]
#[error("no job with id {0}")]
pub struct NotFound(pub Id);

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub tools: Tools,
    pub failure_policy: FailurePolicy,
    /// Cap on *finished* jobs kept in the registry; running and pending jobs
    /// are never evicted. Unbounded when unset.
    pub retain: Option<usize>,
}

/// Thread-safe home of all jobs in this process. Constructed once at startup
/// and shared by reference; the map lock is only ever held for map and field
/// operations, never across a tool run.
#[derive(Debug)]
pub struct Registry {
    config: Config,
    jobs: Mutex<HashMap<Id, Arc<Job>>>,
}

impl Registry {
    pub fn new(config: Config) -> Self {
        Registry {
            config,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<Id, Arc<Job>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new job and spawns its runner task. Returns immediately;
    /// callers observe the run through `get`.
    pub fn create(&self, source: Endpoint, destination: Endpoint) -> (Id, Status) {
        let job = Arc::new(Job::new(source, destination));
        {
            let mut jobs = self.jobs();
            jobs.insert(job.id, job.clone());
            self.evict_finished(&mut jobs);
        }
        tracing::info!(id = %job.id, source = %job.source.database, destination = %job.destination.database, "created migration job");
        self.start(&job);
        (job.id, job.status())
    }

    fn start(&self, job: &Arc<Job>) {
        if !job.mark_started() {
            return;
        }
        let job = job.clone();
        let tools = self.config.tools.clone();
        let failure_policy = self.config.failure_policy;
        tokio::spawn(async move { runner::run(job, &tools, failure_policy).await });
    }

    pub fn get(&self, id: Id) -> Result<Snapshot, NotFound> {
        self.jobs()
            .get(&id)
            .map(|job| job.snapshot())
            .ok_or(NotFound(id))
    }

    pub fn list(&self) -> Vec<Summary> {
        let jobs = self.jobs();
        let mut jobs: Vec<_> = jobs.values().cloned().collect();
        jobs.sort_by_key(|job| job.created());
        jobs.iter().map(|job| job.summary()).collect()
    }

    /// Requests cooperative cancellation. Succeeds without effect when the
    /// job has already finished.
    pub fn cancel(&self, id: Id) -> Result<(), NotFound> {
        let job = self.jobs().get(&id).cloned().ok_or(NotFound(id))?;
        if job.status().is_terminal() {
            return Ok(());
        }
        job.append_log("Cancellation requested by user.");
        job.request_cancel();
        tracing::info!(id = %job.id, "cancellation requested");
        Ok(())
    }

    fn evict_finished(&self, jobs: &mut HashMap<Id, Arc<Job>>) {
        let Some(retain) = self.config.retain else {
            return;
        };
        let mut finished: Vec<_> = jobs
            .values()
            .filter(|job| job.status().is_terminal())
            .map(|job| (job.created(), job.id))
            .collect();
        if finished.len() <= retain {
            return;
        }
        finished.sort_by_key(|(created, _)| *created);
        for (_, id) in finished.iter().take(finished.len() - retain) {
            jobs.remove(id);
        }
    }
}
