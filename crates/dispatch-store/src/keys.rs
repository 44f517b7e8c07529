use dispatch_types::JobId;

const JOB_PREFIX: &[u8] = b"job/";
const CURR_PREFIX: &[u8] = b"curr/";
const FINISH_PREFIX: &[u8] = b"finish/";
const FINISH_SEP: u8 = b'-';

pub fn job_key(id: &JobId) -> Vec<u8> {
    [JOB_PREFIX, id.as_bytes()].concat()
}

pub fn curr_key(id: &JobId) -> Vec<u8> {
    [CURR_PREFIX, id.as_bytes()].concat()
}

/// `finish/<big-endian-unix-seconds><'-'><JobId-bytes>`. Big-endian encoding
/// of the timestamp makes lexicographic key order match chronological order,
/// which is what `Recent()` relies on.
pub fn finish_key(finished_unix_secs: i64, id: &JobId) -> Vec<u8> {
    let mut key = Vec::with_capacity(FINISH_PREFIX.len() + 8 + 1 + 16);
    key.extend_from_slice(FINISH_PREFIX);
    key.extend_from_slice(&(finished_unix_secs as u64).to_be_bytes());
    key.push(FINISH_SEP);
    key.extend_from_slice(id.as_bytes());
    key
}

pub fn job_id_from_job_key(key: &[u8]) -> Option<JobId> {
    let rest = key.strip_prefix(JOB_PREFIX)?;
    id_from_bytes(rest)
}

pub fn job_id_from_curr_key(key: &[u8]) -> Option<JobId> {
    let rest = key.strip_prefix(CURR_PREFIX)?;
    id_from_bytes(rest)
}

pub fn job_id_from_finish_key(key: &[u8]) -> Option<JobId> {
    let rest = key.strip_prefix(FINISH_PREFIX)?;
    let id_bytes = rest.get(rest.len().checked_sub(16)?..)?;
    id_from_bytes(id_bytes)
}

fn id_from_bytes(bytes: &[u8]) -> Option<JobId> {
    let arr: [u8; 16] = bytes.try_into().ok()?;
    Some(JobId::from_bytes(arr))
}

pub fn job_prefix() -> &'static [u8] {
    JOB_PREFIX
}

pub fn curr_prefix() -> &'static [u8] {
    CURR_PREFIX
}

pub fn finish_prefix() -> &'static [u8] {
    FINISH_PREFIX
}
