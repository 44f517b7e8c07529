mod ids;
mod job;

pub use ids::{IdParseError, JobId, WorkerId};
pub use job::{FileEntry, Job, JobStat, JobStatus, DEFAULT_TIMEOUT_SECONDS};
