use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use dispatch_client::Client;
use dispatch_types::{Job, JobId, WorkerId};
use health::HealthHandle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::executor;

/// The per-worker fetch/heartbeat/execute/push loop described in §4.3.
pub struct Worker {
    id: WorkerId,
    client: Client,
    wait: Duration,
    beat_interval: Duration,
    max_idle: Option<Duration>,
    whitelist: Vec<String>,
    scratch_root: PathBuf,
    file_cache: HashMap<String, Vec<u8>>,
    liveness: HealthHandle,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Client,
        wait: Duration,
        beat_interval: Duration,
        max_idle: Option<Duration>,
        whitelist: Vec<String>,
        scratch_root: PathBuf,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            id: WorkerId::new(),
            client,
            wait,
            beat_interval,
            max_idle,
            whitelist,
            scratch_root,
            file_cache: HashMap::new(),
            liveness,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub async fn run(mut self) {
        tokio::fs::create_dir_all(&self.scratch_root)
            .await
            .expect("failed to create worker scratch root");

        let mut last_job_at = Instant::now();
        loop {
            self.liveness.report_healthy().await;

            match self.client.fetch(self.id).await {
                Ok(Some(job)) => {
                    last_job_at = Instant::now();
                    tracing::info!(job_id = %job.id, worker_id = %self.id, "fetched job");
                    self.run_one_job(job).await;
                }
                Ok(None) => {
                    if let Some(max_idle) = self.max_idle {
                        if last_job_at.elapsed() > max_idle {
                            tracing::info!(?max_idle, "no job obtained within max idle, exiting");
                            return;
                        }
                    }
                    tokio::time::sleep(self.wait).await;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "fetch failed; retrying after wait");
                    tokio::time::sleep(self.wait).await;
                }
            }
        }
    }

    async fn run_one_job(&mut self, mut job: Job) {
        apply_cached_infiles(&mut job, &self.file_cache);
        record_cacheable_infiles(&job, &mut self.file_cache);

        let (kill_tx, kill_rx) = oneshot::channel();
        let beat_task = self.spawn_heartbeat(job.id, kill_tx);

        let outcome = executor::execute(&job, &self.scratch_root, &self.whitelist, kill_rx).await;
        beat_task.abort();

        job.status = outcome.status;
        job.append_stdout(&outcome.stdout);
        job.append_stderr(&outcome.stderr);
        job.outfiles = outcome.outfiles;
        job.finished = Some(Utc::now());
        job.worker_id = Some(self.id);
        // Save bandwidth: the server reattaches these from its own stored copy.
        job.infiles.clear();

        if let Err(err) = self.client.push(&job).await {
            tracing::error!(
                error = %err,
                job_id = %job.id,
                "push failed; server will requeue on heartbeat expiry"
            );
            metrics::counter!("dispatch_worker_push_errors_total").increment(1);
        }
    }

    fn spawn_heartbeat(&self, job_id: JobId, kill_tx: oneshot::Sender<()>) -> JoinHandle<()> {
        let client = self.client.clone();
        let worker_id = self.id;
        let interval = self.beat_interval;

        tokio::spawn(async move {
            let mut kill_tx = Some(kill_tx);
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; the job just started

            loop {
                ticker.tick().await;
                match client.heartbeat(worker_id, job_id).await {
                    Ok(true) => {
                        tracing::info!(job_id = %job_id, "server requested kill");
                        if let Some(tx) = kill_tx.take() {
                            let _ = tx.send(());
                        }
                        return;
                    }
                    Ok(false) => {}
                    Err(err) => tracing::warn!(error = %err, job_id = %job_id, "heartbeat failed"),
                }
            }
        })
    }
}

/// Fill in `Data` for any `Infile` the worker has a cached copy of by name.
fn apply_cached_infiles(job: &mut Job, cache: &HashMap<String, Vec<u8>>) {
    for infile in &mut job.infiles {
        if infile.cache && infile.data.is_empty() {
            if let Some(cached) = cache.get(&infile.name) {
                infile.data = cached.clone();
            }
        }
    }
}

/// Remember any `Infile` flagged `Cache=true` for future jobs.
fn record_cacheable_infiles(job: &Job, cache: &mut HashMap<String, Vec<u8>>) {
    for infile in &job.infiles {
        if infile.cache && !infile.data.is_empty() {
            cache.insert(infile.name.clone(), infile.data.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_types::FileEntry;

    #[test]
    fn cached_infile_data_is_filled_in() {
        let mut cache = HashMap::new();
        cache.insert("lib.dat".to_string(), b"cached-bytes".to_vec());

        let mut job = Job::new(vec!["run".to_string()]);
        let mut entry = FileEntry::new("lib.dat", Vec::new());
        entry.cache = true;
        job.infiles.push(entry);

        apply_cached_infiles(&mut job, &cache);
        assert_eq!(job.infiles[0].data, b"cached-bytes");
    }

    #[test]
    fn cacheable_infile_is_recorded() {
        let mut cache = HashMap::new();
        let mut job = Job::new(vec!["run".to_string()]);
        let mut entry = FileEntry::new("lib.dat", b"bytes".to_vec());
        entry.cache = true;
        job.infiles.push(entry);

        record_cacheable_infiles(&job, &mut cache);
        assert_eq!(cache.get("lib.dat"), Some(&b"bytes".to_vec()));
    }

    #[test]
    fn non_cacheable_infile_is_not_recorded() {
        let mut cache = HashMap::new();
        let mut job = Job::new(vec!["run".to_string()]);
        job.infiles.push(FileEntry::new("plain.dat", b"bytes".to_vec()));

        record_cacheable_infiles(&job, &mut cache);
        assert!(cache.is_empty());
    }
}
