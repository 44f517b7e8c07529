use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use dispatch_core::{DispatchError, DispatchTiming};
use dispatch_store::Store;
use dispatch_types::{Job, JobId, JobStat, JobStatus, WorkerId};
use health::HealthHandle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

/// The heartbeat record described in §4: exists only while a job is
/// `running` on a specific worker.
struct Heartbeat {
    worker_id: WorkerId,
    last_beat: chrono::DateTime<Utc>,
}

enum Command {
    SubmitAsync {
        job: Job,
        reply: oneshot::Sender<Result<(), DispatchError>>,
    },
    SubmitBlocking {
        job: Job,
        reply: oneshot::Sender<Result<oneshot::Receiver<Job>, DispatchError>>,
    },
    Retrieve {
        id: JobId,
        reply: oneshot::Sender<Result<Job, DispatchError>>,
    },
    Fetch {
        worker_id: WorkerId,
        reply: oneshot::Sender<Result<Job, DispatchError>>,
    },
    Push {
        job: Job,
        reply: oneshot::Sender<Result<(), DispatchError>>,
    },
    Beat {
        worker_id: WorkerId,
        job_id: JobId,
        reply: oneshot::Sender<bool>,
    },
    Current {
        reply: oneshot::Sender<Vec<JobStat>>,
    },
}

/// A cheaply-clonable front door to the dispatcher serializer task. All
/// mutation goes through the task; this handle only sends messages and
/// awaits replies.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<Command>,
}

impl DispatcherHandle {
    pub async fn submit_async(&self, job: Job) -> Result<(), DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SubmitAsync { job, reply }).await;
        rx.await.map_err(channel_closed)?
    }

    /// Blocking submit: registers a completion channel with the dispatcher
    /// and waits for the post-Push record.
    pub async fn submit_blocking(&self, job: Job) -> Result<Job, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SubmitBlocking { job, reply }).await;
        let completion = rx.await.map_err(channel_closed)??;
        completion.await.map_err(channel_closed)
    }

    pub async fn retrieve(&self, id: JobId) -> Result<Job, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Retrieve { id, reply }).await;
        rx.await.map_err(channel_closed)?
    }

    pub async fn fetch(&self, worker_id: WorkerId) -> Result<Job, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Fetch { worker_id, reply }).await;
        rx.await.map_err(channel_closed)?
    }

    pub async fn push(&self, job: Job) -> Result<(), DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Push { job, reply }).await;
        rx.await.map_err(channel_closed)?
    }

    /// Returns `true` if the worker should kill its local process for this job.
    pub async fn beat(&self, worker_id: WorkerId, job_id: JobId) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Beat {
            worker_id,
            job_id,
            reply,
        })
        .await;
        rx.await.unwrap_or(true)
    }

    pub async fn current(&self) -> Vec<JobStat> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Current { reply }).await;
        rx.await.unwrap_or_default()
    }

    async fn send(&self, cmd: Command) {
        if self.tx.send(cmd).await.is_err() {
            tracing::error!("dispatcher task is gone; command dropped");
        }
    }
}

fn channel_closed<T>(_: oneshot::error::RecvError) -> DispatchError {
    DispatchError::ShuttingDown
}

struct Serializer {
    store: Arc<Store>,
    timing: DispatchTiming,
    queue: VecDeque<JobId>,
    jobs: HashMap<JobId, Job>,
    heartbeats: HashMap<JobId, Heartbeat>,
    completions: HashMap<JobId, oneshot::Sender<Job>>,
    liveness: HealthHandle,
}

impl Serializer {
    fn handle_submit(&mut self, mut job: Job) -> Result<JobId, DispatchError> {
        if !job.is_runnable() {
            return Err(DispatchError::EmptyCommand);
        }
        job.status = JobStatus::Queued;
        job.submitted = Some(Utc::now());
        let id = job.id;

        if let Err(err) = self.store.put(&job) {
            tracing::error!(error = %err, job_id = %id, "failed to persist submitted job");
            return Err(DispatchError::Internal(err.to_string()));
        }
        self.jobs.insert(id, job);
        self.queue.push_back(id);
        metrics::counter!("dispatch_jobs_submitted_total").increment(1);
        Ok(id)
    }

    fn handle_retrieve(&mut self, id: JobId) -> Result<Job, DispatchError> {
        if let Some(job) = self.jobs.get(&id) {
            return Ok(job.clone());
        }
        match self.store.get(id) {
            Ok(Some(job)) => {
                self.jobs.insert(id, job.clone());
                Ok(job)
            }
            Ok(None) => Err(DispatchError::UnknownJob(id)),
            Err(err) => Err(DispatchError::Internal(err.to_string())),
        }
    }

    /// Scan the queue head-first for the first entry still genuinely queued;
    /// entries that were already completed by a late-reassigned worker are
    /// dropped as we pass over them.
    fn handle_fetch(&mut self, worker_id: WorkerId) -> Result<Job, DispatchError> {
        while let Some(id) = self.queue.pop_front() {
            let Some(job) = self.jobs.get(&id) else {
                continue;
            };
            if job.status != JobStatus::Queued {
                continue;
            }

            let mut job = job.clone();
            job.status = JobStatus::Running;
            job.started = Some(Utc::now());
            job.worker_id = Some(worker_id);

            if let Err(err) = self.store.put(&job) {
                tracing::error!(error = %err, job_id = %id, "failed to persist fetched job");
                return Err(DispatchError::Internal(err.to_string()));
            }

            self.jobs.insert(id, job.clone());
            self.heartbeats.insert(
                id,
                Heartbeat {
                    worker_id,
                    last_beat: Utc::now(),
                },
            );
            metrics::counter!("dispatch_jobs_fetched_total").increment(1);
            return Ok(job);
        }
        Err(DispatchError::NoJobAvailable)
    }

    fn handle_push(&mut self, mut job: Job) -> Result<(), DispatchError> {
        let id = job.id;

        // The worker strips Infiles before Push to save bandwidth; reattach
        // them from the stored copy.
        if let Some(stored) = self.jobs.get(&id) {
            job.infiles = stored.infiles.clone();
        } else if let Ok(Some(stored)) = self.store.get(id) {
            job.infiles = stored.infiles;
        }

        self.heartbeats.remove(&id);

        if let Err(err) = self.store.put(&job) {
            tracing::error!(error = %err, job_id = %id, "failed to persist pushed job");
            return Err(DispatchError::Internal(err.to_string()));
        }

        self.jobs.insert(id, job.clone());
        metrics::counter!("dispatch_jobs_pushed_total").increment(1);

        if let Some(completion) = self.completions.remove(&id) {
            let _ = completion.send(job);
        }
        Ok(())
    }

    /// `kill=true` is a one-shot authorization: once a job has been
    /// reassigned we always tell the original worker to kill it.
    fn handle_beat(&mut self, worker_id: WorkerId, job_id: JobId) -> bool {
        match self.heartbeats.get_mut(&job_id) {
            Some(hb) if hb.worker_id == worker_id => {
                hb.last_beat = Utc::now();
                false
            }
            _ => true,
        }
    }

    /// Requeue every job whose heartbeat is older than `2 * beat_interval`,
    /// reverting it to `queued` and prepending it to the queue head.
    fn sweep_heartbeats(&mut self) {
        let now = Utc::now();
        let threshold = chrono::Duration::from_std(self.timing.expiry_threshold())
            .unwrap_or(chrono::Duration::MAX);

        let expired: Vec<JobId> = self
            .heartbeats
            .iter()
            .filter(|(_, hb)| now.signed_duration_since(hb.last_beat) > threshold)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            self.heartbeats.remove(&id);
            let Some(job) = self.jobs.get_mut(&id) else {
                continue;
            };
            job.status = JobStatus::Queued;
            if let Err(err) = self.store.put(job) {
                tracing::error!(error = %err, job_id = %id, "failed to persist requeued job");
            }
            self.queue.push_front(id);
            metrics::counter!("dispatch_jobs_requeued_total").increment(1);
            tracing::info!(job_id = %id, "requeued job after heartbeat expiry");
        }
    }

    fn current(&self) -> Vec<JobStat> {
        self.jobs
            .values()
            .filter(|job| !job.status.is_terminal())
            .map(JobStat::from)
            .collect()
    }
}

/// Spawns the dispatcher serializer task and returns a handle to it. The
/// task owns all mutable dispatch state; every other task talks to it only
/// through `DispatcherHandle`.
pub fn spawn(
    store: Arc<Store>,
    timing: DispatchTiming,
    liveness: HealthHandle,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> DispatcherHandle {
    let (tx, mut rx) = mpsc::channel(256);

    tokio::spawn(async move {
        let mut serializer = Serializer {
            store,
            timing,
            queue: VecDeque::new(),
            jobs: HashMap::new(),
            heartbeats: HashMap::new(),
            completions: HashMap::new(),
            liveness,
        };

        let mut sweep = tokio::time::interval(timing.beat_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            serializer.liveness.report_healthy().await;

            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("dispatcher serializer shutting down");
                        break;
                    }
                }

                _ = sweep.tick() => {
                    serializer.sweep_heartbeats();
                }

                cmd = rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    match cmd {
                        Command::SubmitAsync { job, reply } => {
                            let result = serializer.handle_submit(job).map(|_| ());
                            let _ = reply.send(result);
                        }
                        Command::SubmitBlocking { job, reply } => {
                            let id = job.id;
                            match serializer.handle_submit(job) {
                                Ok(_) => {
                                    let (tx, rx) = oneshot::channel();
                                    serializer.completions.insert(id, tx);
                                    let _ = reply.send(Ok(rx));
                                }
                                Err(err) => {
                                    let _ = reply.send(Err(err));
                                }
                            }
                        }
                        Command::Retrieve { id, reply } => {
                            let _ = reply.send(serializer.handle_retrieve(id));
                        }
                        Command::Fetch { worker_id, reply } => {
                            let _ = reply.send(serializer.handle_fetch(worker_id));
                        }
                        Command::Push { job, reply } => {
                            let _ = reply.send(serializer.handle_push(job));
                        }
                        Command::Beat { worker_id, job_id, reply } => {
                            let _ = reply.send(serializer.handle_beat(worker_id, job_id));
                        }
                        Command::Current { reply } => {
                            let _ = reply.send(serializer.current());
                        }
                    }
                }
            }
        }
    });

    DispatcherHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::StoreLimits;
    use std::time::Duration;

    async fn test_handle() -> DispatcherHandle {
        let store = Arc::new(Store::open_temporary(StoreLimits::default()).unwrap());
        let timing = DispatchTiming {
            beat_interval: Duration::from_millis(50),
            collect_freq: Duration::from_secs(3600),
        };
        let liveness = health::HealthRegistry::new("test")
            .register("dispatcher".to_string(), Duration::from_secs(60))
            .await;
        let (_tx, rx) = tokio::sync::watch::channel(false);
        spawn(store, timing, liveness, rx)
    }

    #[tokio::test]
    async fn submit_async_then_fetch() {
        let handle = test_handle().await;
        let job = Job::new(vec!["echo".into(), "hi".into()]);
        let id = job.id;
        handle.submit_async(job).await.unwrap();

        let fetched = handle.fetch(WorkerId::new()).await.unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn fetch_with_empty_queue_errors() {
        let handle = test_handle().await;
        let err = handle.fetch(WorkerId::new()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoJobAvailable));
    }

    #[tokio::test]
    async fn submit_rejects_empty_command() {
        let handle = test_handle().await;
        let job = Job::new(vec![]);
        let err = handle.submit_async(job).await.unwrap_err();
        assert!(matches!(err, DispatchError::EmptyCommand));
    }

    #[tokio::test]
    async fn push_reattaches_infiles_and_resolves_blocking_submit() {
        let handle = test_handle().await;
        let mut job = Job::new(vec!["echo".into()]);
        job.infiles
            .push(dispatch_types::FileEntry::new("in.txt", b"data".to_vec()));

        let handle2 = handle.clone();
        let submit_task = tokio::spawn(async move { handle2.submit_blocking(job).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let worker = WorkerId::new();
        let fetched = handle.fetch(worker).await.unwrap();
        assert!(!fetched.infiles.is_empty());

        let mut pushed = fetched.clone();
        pushed.infiles.clear();
        pushed.status = JobStatus::Complete;
        pushed.finished = Some(Utc::now());
        handle.push(pushed).await.unwrap();

        let completed = submit_task.await.unwrap().unwrap();
        assert_eq!(completed.status, JobStatus::Complete);
        assert_eq!(completed.infiles.len(), 1);
    }

    #[tokio::test]
    async fn beat_from_wrong_worker_requests_kill() {
        let handle = test_handle().await;
        let job = Job::new(vec!["echo".into()]);
        handle.submit_async(job).await.unwrap();
        let worker = WorkerId::new();
        let fetched = handle.fetch(worker).await.unwrap();

        assert!(!handle.beat(worker, fetched.id).await);
        assert!(handle.beat(WorkerId::new(), fetched.id).await);
    }

    #[tokio::test]
    async fn heartbeat_expiry_requeues_job_to_head() {
        let handle = test_handle().await;
        let older = Job::new(vec!["old".into()]);
        let older_id = older.id;
        handle.submit_async(older).await.unwrap();
        handle.fetch(WorkerId::new()).await.unwrap();

        let newer = Job::new(vec!["new".into()]);
        handle.submit_async(newer).await.unwrap();

        // Wait past 2*beat_interval (100ms) for the sweep to requeue `older`.
        tokio::time::sleep(Duration::from_millis(250)).await;

        let refetched = handle.fetch(WorkerId::new()).await.unwrap();
        assert_eq!(refetched.id, older_id);
    }

    #[tokio::test]
    async fn current_omits_terminal_jobs() {
        let handle = test_handle().await;
        let job = Job::new(vec!["echo".into()]);
        let id = job.id;
        handle.submit_async(job).await.unwrap();
        assert_eq!(handle.current().await.len(), 1);

        let mut pushed = handle.fetch(WorkerId::new()).await.unwrap();
        pushed.status = JobStatus::Complete;
        pushed.finished = Some(Utc::now());
        handle.push(pushed).await.unwrap();

        let current = handle.current().await;
        assert!(current.iter().all(|s| s.id != id));
    }
}
