mod error;
mod keys;

use std::path::Path;

use chrono::Utc;
use dispatch_core::StoreLimits;
use dispatch_types::{Job, JobId, JobStatus};

pub use error::StoreError;

/// The persistent job store: one sled tree holding job records plus the two
/// secondary indices described in the data model (`curr/` for non-terminal
/// jobs, `finish/` ordered by completion time).
pub struct Store {
    db: sled::Db,
    limits: StoreLimits,
}

impl Store {
    pub fn open(path: impl AsRef<Path>, limits: StoreLimits) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self { db, limits })
    }

    /// An in-memory store, for tests that don't care about durability.
    pub fn open_temporary(limits: StoreLimits) -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db, limits })
    }

    /// Persist `job` and keep both indices consistent with it. The three
    /// writes land in a single sled batch, so either all of them are visible
    /// or none are.
    pub fn put(&self, job: &Job) -> Result<(), StoreError> {
        let job_bytes = serde_json::to_vec(job)?;
        let jk = keys::job_key(&job.id);
        let ck = keys::curr_key(&job.id);

        let mut batch = sled::Batch::default();
        batch.insert(jk, job_bytes);

        if job.status.is_terminal() {
            batch.remove(ck);
            if let Some(finished) = job.finished {
                let secs = finished.timestamp();
                if secs >= 0 {
                    batch.insert(keys::finish_key(secs, &job.id), job.id.as_bytes().to_vec());
                }
            }
        } else {
            batch.insert(ck, job.id.as_bytes().to_vec());
        }

        self.db.apply_batch(batch)?;
        Ok(())
    }

    pub fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let key = keys::job_key(&id);
        match self.db.get(&key)? {
            Some(ivec) => decode_job(&key, &ivec).map(Some),
            None => Ok(None),
        }
    }

    pub fn count(&self) -> usize {
        self.db.scan_prefix(keys::job_prefix()).count()
    }

    /// Cumulative bytes of all encoded job records, excluding index entries.
    pub fn size(&self) -> u64 {
        let mut total = 0u64;
        for item in self.db.scan_prefix(keys::job_prefix()) {
            match item {
                Ok((_, value)) => total += value.len() as u64,
                Err(err) => tracing::warn!(error = %err, "skipping unreadable job record while sizing store"),
            }
        }
        total
    }

    /// All jobs whose `curr/` index entry exists, in the store's iteration
    /// order. Dangling index entries (job missing) are silently skipped.
    pub fn current(&self) -> Result<Vec<Job>, StoreError> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(keys::curr_prefix()) {
            let (key, _) = item?;
            let Some(id) = keys::job_id_from_curr_key(&key) else {
                continue;
            };
            if let Some(job) = self.get(id)? {
                out.push(job);
            }
        }
        Ok(out)
    }

    /// The last `n` finished jobs, most recent first.
    pub fn recent(&self, n: usize) -> Result<Vec<Job>, StoreError> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(keys::finish_prefix()).rev() {
            if out.len() >= n {
                break;
            }
            let (key, _) = item?;
            let Some(id) = keys::job_id_from_finish_key(&key) else {
                continue;
            };
            if let Some(job) = self.get(id)? {
                out.push(job);
            }
        }
        Ok(out)
    }

    /// All jobs currently in the `failed` state. A full scan; there is no
    /// secondary index on status beyond terminal/non-terminal.
    pub fn failed(&self) -> Result<Vec<Job>, StoreError> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(keys::job_prefix()) {
            let (key, value) = item?;
            let job = decode_job(&key, &value)?;
            if job.status == JobStatus::Failed {
                out.push(job);
            }
        }
        Ok(out)
    }

    /// Purge terminal jobs older than `PurgeAge`, but only if the store is
    /// over its byte budget. Returns `(npurged, nremaining)`, or `(0, -1)`
    /// when GC was skipped because the store is under the limit.
    pub fn gc(&self) -> Result<(i64, i64), StoreError> {
        if self.size() < self.limits.limit_bytes {
            return Ok((0, -1));
        }

        let now = Utc::now();
        let mut batch = sled::Batch::default();
        let mut npurged: i64 = 0;

        for item in self.db.scan_prefix(keys::job_prefix()) {
            let (key, value) = item?;
            let job = match decode_job(&key, &value) {
                Ok(job) => job,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping malformed job record during gc");
                    continue;
                }
            };

            if !job.status.is_terminal() {
                continue;
            }
            let Some(finished) = job.finished else {
                continue;
            };
            let age = now.signed_duration_since(finished);
            let purge_age = chrono::Duration::from_std(self.limits.purge_age)
                .unwrap_or(chrono::Duration::MAX);
            if age <= purge_age {
                continue;
            }

            batch.remove(key);
            batch.remove(keys::curr_key(&job.id));
            if finished.timestamp() >= 0 {
                batch.remove(keys::finish_key(finished.timestamp(), &job.id));
            }
            npurged += 1;
        }

        if npurged > 0 {
            self.db.apply_batch(batch)?;
        }

        let nremaining = self.count() as i64;
        Ok((npurged, nremaining))
    }
}

fn decode_job(key: &[u8], bytes: &[u8]) -> Result<Job, StoreError> {
    serde_json::from_slice(bytes).map_err(|err| StoreError::Corrupt(key.to_vec(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dispatch_types::FileEntry;
    use std::time::Duration;

    fn store() -> Store {
        Store::open_temporary(StoreLimits {
            limit_bytes: 1 << 30,
            purge_age: Duration::from_secs(3600),
        })
        .unwrap()
    }

    fn queued_job(cmd: &str) -> Job {
        let mut job = Job::new(vec![cmd.to_string()]);
        job.submitted = Some(Utc::now());
        job
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = store();
        let job = queued_job("echo");
        store.put(&job).unwrap();
        let fetched = store.get(job.id).unwrap().unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.cmd, job.cmd);
    }

    #[test]
    fn get_missing_returns_none() {
        let store = store();
        assert!(store.get(JobId::new()).unwrap().is_none());
    }

    #[test]
    fn non_terminal_job_appears_in_current() {
        let store = store();
        let job = queued_job("echo");
        store.put(&job).unwrap();
        let current = store.current().unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].id, job.id);
    }

    #[test]
    fn terminal_job_leaves_current_and_enters_recent() {
        let store = store();
        let mut job = queued_job("echo");
        store.put(&job).unwrap();

        job.status = JobStatus::Complete;
        job.started = Some(Utc::now());
        job.finished = Some(Utc::now());
        store.put(&job).unwrap();

        assert!(store.current().unwrap().is_empty());
        let recent = store.recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, job.id);
    }

    #[test]
    fn recent_orders_most_recent_first() {
        let store = store();
        let mut older = queued_job("a");
        older.status = JobStatus::Complete;
        older.finished = Some(Utc.timestamp_opt(1_000, 0).unwrap());
        store.put(&older).unwrap();

        let mut newer = queued_job("b");
        newer.status = JobStatus::Complete;
        newer.finished = Some(Utc.timestamp_opt(2_000, 0).unwrap());
        store.put(&newer).unwrap();

        let recent = store.recent(10).unwrap();
        assert_eq!(recent[0].id, newer.id);
        assert_eq!(recent[1].id, older.id);
    }

    #[test]
    fn failed_lists_only_failed_jobs() {
        let store = store();
        let mut failed = queued_job("bad");
        failed.status = JobStatus::Failed;
        failed.finished = Some(Utc::now());
        store.put(&failed).unwrap();

        let ok = queued_job("good");
        store.put(&ok).unwrap();

        let failed_jobs = store.failed().unwrap();
        assert_eq!(failed_jobs.len(), 1);
        assert_eq!(failed_jobs[0].id, failed.id);
    }

    #[test]
    fn gc_skips_when_under_limit() {
        let store = store();
        store.put(&queued_job("echo")).unwrap();
        assert_eq!(store.gc().unwrap(), (0, -1));
    }

    #[test]
    fn gc_purges_old_terminal_jobs_over_limit() {
        let store = Store::open_temporary(StoreLimits {
            limit_bytes: 1,
            purge_age: Duration::from_secs(0),
        })
        .unwrap();

        let mut job = queued_job("echo");
        job.status = JobStatus::Complete;
        job.finished = Some(Utc::now() - chrono::Duration::seconds(10));
        store.put(&job).unwrap();

        let (purged, remaining) = store.gc().unwrap();
        assert_eq!(purged, 1);
        assert_eq!(remaining, 0);
        assert!(store.get(job.id).unwrap().is_none());
    }

    #[test]
    fn gc_never_purges_non_terminal_jobs() {
        let store = Store::open_temporary(StoreLimits {
            limit_bytes: 1,
            purge_age: Duration::from_secs(0),
        })
        .unwrap();

        let job = queued_job("echo");
        store.put(&job).unwrap();

        let (purged, _) = store.gc().unwrap();
        assert_eq!(purged, 0);
        assert!(store.get(job.id).unwrap().is_some());
    }

    #[test]
    fn outfiles_round_trip_through_store() {
        let store = store();
        let mut job = queued_job("echo");
        job.outfiles.push(FileEntry::new("out.txt", b"data".to_vec()));
        store.put(&job).unwrap();
        let fetched = store.get(job.id).unwrap().unwrap();
        assert_eq!(fetched.outfiles, job.outfiles);
    }
}
