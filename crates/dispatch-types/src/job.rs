use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::ids::{JobId, WorkerId};

/// Default execution timeout applied when a submitted job leaves `Timeout` unset (zero).
pub const DEFAULT_TIMEOUT_SECONDS: i64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    /// `complete` and `failed` are terminal as far as the dispatcher is concerned.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("{other} is not a valid job status")),
        }
    }
}

/// One file attached to, or expected from, a job. `Name` is a path relative to
/// the worker's scratch directory. `Cache` marks files the worker may keep
/// across jobs instead of re-fetching them every time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub cache: bool,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
            cache: false,
        }
    }
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64.decode(s.as_bytes()).map_err(de::Error::custom)
    }
}

/// A job: a command line plus its input bundle, declared output names, and
/// whatever the worker has reported back so far. The `Id` never changes after
/// creation; every other field is mutated only by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "Id")]
    pub id: JobId,
    #[serde(rename = "Cmd")]
    pub cmd: Vec<String>,
    #[serde(rename = "Infiles", default)]
    pub infiles: Vec<FileEntry>,
    #[serde(rename = "Outfiles", default)]
    pub outfiles: Vec<FileEntry>,
    #[serde(rename = "Status")]
    pub status: JobStatus,
    #[serde(rename = "Stdout", default, with = "base64_bytes")]
    pub stdout: Vec<u8>,
    #[serde(rename = "Stderr", default, with = "base64_bytes")]
    pub stderr: Vec<u8>,
    /// Nanoseconds. Zero means "use the default" (§3: 600s).
    #[serde(rename = "Timeout")]
    pub timeout_ns: i64,
    #[serde(rename = "Submitted")]
    pub submitted: Option<DateTime<Utc>>,
    #[serde(rename = "Started")]
    pub started: Option<DateTime<Utc>>,
    #[serde(rename = "Finished")]
    pub finished: Option<DateTime<Utc>>,
    #[serde(rename = "WorkerId")]
    pub worker_id: Option<WorkerId>,
    #[serde(rename = "Note", default)]
    pub note: String,
}

impl Job {
    /// Construct a fresh, unsubmitted job from a command line. Caller fills in
    /// infiles/outfiles/timeout/note afterwards.
    pub fn new(cmd: Vec<String>) -> Self {
        Self {
            id: JobId::new(),
            cmd,
            infiles: Vec::new(),
            outfiles: Vec::new(),
            status: JobStatus::Queued,
            stdout: Vec::new(),
            stderr: Vec::new(),
            timeout_ns: 0,
            submitted: None,
            started: None,
            finished: None,
            worker_id: None,
            note: String::new(),
        }
    }

    /// The effective timeout, applying the §3 default of 600s when unset.
    pub fn timeout(&self) -> chrono::Duration {
        if self.timeout_ns <= 0 {
            chrono::Duration::seconds(DEFAULT_TIMEOUT_SECONDS)
        } else {
            chrono::Duration::nanoseconds(self.timeout_ns)
        }
    }

    /// `Cmd[0]` is the program to run; empty commands are never runnable.
    pub fn is_runnable(&self) -> bool {
        !self.cmd.is_empty()
    }

    /// Rough on-wire/on-disk size of this job record, used for store byte
    /// accounting (§4.2 `Size()`).
    pub fn encoded_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }

    pub fn append_stdout(&mut self, bytes: &[u8]) {
        self.stdout.extend_from_slice(bytes);
    }

    pub fn append_stderr(&mut self, bytes: &[u8]) {
        self.stderr.extend_from_slice(bytes);
    }
}

/// The compact "JobStat" projection: everything about a job except its file
/// bundles, plus the encoded size of the full record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStat {
    #[serde(rename = "Id")]
    pub id: JobId,
    #[serde(rename = "Cmd")]
    pub cmd: Vec<String>,
    #[serde(rename = "Status")]
    pub status: JobStatus,
    #[serde(rename = "Timeout")]
    pub timeout_ns: i64,
    #[serde(rename = "Submitted")]
    pub submitted: Option<DateTime<Utc>>,
    #[serde(rename = "Started")]
    pub started: Option<DateTime<Utc>>,
    #[serde(rename = "Finished")]
    pub finished: Option<DateTime<Utc>>,
    #[serde(rename = "WorkerId")]
    pub worker_id: Option<WorkerId>,
    #[serde(rename = "Note")]
    pub note: String,
    #[serde(rename = "Size")]
    pub size: usize,
}

impl From<&Job> for JobStat {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            cmd: job.cmd.clone(),
            status: job.status,
            timeout_ns: job.timeout_ns,
            submitted: job.submitted,
            started: job.started,
            finished: job.finished,
            worker_id: job.worker_id,
            note: job.note.clone(),
            size: job.encoded_size(),
        }
    }
}
