use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use dispatch_types::{FileEntry, Job, JobStatus};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::oneshot;

/// Everything the worker loop needs to fold back into the job record after
/// one execution attempt.
pub struct ExecOutcome {
    pub status: JobStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub outfiles: Vec<FileEntry>,
}

/// Run `job`'s command in a fresh scratch directory under `scratch_root`.
/// `kill_rx` fires when the server has told the heartbeat task to abort this
/// job (reassignment); it races against the job's own timeout.
pub async fn execute(
    job: &Job,
    scratch_root: &Path,
    whitelist: &[String],
    kill_rx: oneshot::Receiver<()>,
) -> ExecOutcome {
    if !whitelist.is_empty() && !whitelist.iter().any(|w| w == &job.cmd[0]) {
        metrics::counter!("dispatch_worker_jobs_failed_total").increment(1);
        return ExecOutcome {
            status: JobStatus::Failed,
            stdout: Vec::new(),
            stderr: format!("command {:?} is not in the worker whitelist\n", job.cmd[0])
                .into_bytes(),
            outfiles: Vec::new(),
        };
    }

    let scratch_dir = scratch_root.join(dispatch_types::JobId::new().to_hex());
    if let Err(err) = tokio::fs::create_dir_all(&scratch_dir).await {
        metrics::counter!("dispatch_worker_jobs_failed_total").increment(1);
        return ExecOutcome {
            status: JobStatus::Failed,
            stdout: Vec::new(),
            stderr: format!("failed to create scratch directory: {err}\n").into_bytes(),
            outfiles: Vec::new(),
        };
    }

    let outcome = run_in_scratch(job, &scratch_dir, kill_rx).await;

    if let Err(err) = tokio::fs::remove_dir_all(&scratch_dir).await {
        tracing::warn!(error = %err, dir = %scratch_dir.display(), "failed to remove scratch directory");
    }

    outcome
}

async fn run_in_scratch(
    job: &Job,
    scratch_dir: &Path,
    kill_rx: oneshot::Receiver<()>,
) -> ExecOutcome {
    for infile in &job.infiles {
        if let Err(err) = write_infile(scratch_dir, infile).await {
            metrics::counter!("dispatch_worker_jobs_failed_total").increment(1);
            return ExecOutcome {
                status: JobStatus::Failed,
                stdout: Vec::new(),
                stderr: format!("failed to write infile {}: {err}\n", infile.name).into_bytes(),
                outfiles: Vec::new(),
            };
        }
    }

    let mut command = Command::new(&job.cmd[0]);
    command
        .args(&job.cmd[1..])
        .current_dir(scratch_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            metrics::counter!("dispatch_worker_jobs_failed_total").increment(1);
            return ExecOutcome {
                status: JobStatus::Failed,
                stdout: Vec::new(),
                stderr: format!("failed to spawn {}: {err}\n", job.cmd[0]).into_bytes(),
                outfiles: Vec::new(),
            };
        }
    };
    metrics::counter!("dispatch_worker_jobs_run_total").increment(1);

    let mut stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        buf
    });

    let timeout = job.timeout();
    let std_timeout = timeout
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(dispatch_types::DEFAULT_TIMEOUT_SECONDS as u64));

    tokio::select! {
        wait_result = child.wait() => {
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            finish_on_exit(job, scratch_dir, wait_result, stdout, stderr).await
        }
        _ = tokio::time::sleep(std_timeout) => {
            let _ = child.kill().await;
            let mut stderr = stderr_task.await.unwrap_or_default();
            stderr.extend_from_slice(format!("Job timed out after {std_timeout:?}\n").as_bytes());
            metrics::counter!("dispatch_worker_jobs_timed_out_total").increment(1);
            ExecOutcome {
                status: JobStatus::Failed,
                stdout: stdout_task.await.unwrap_or_default(),
                stderr,
                outfiles: Vec::new(),
            }
        }
        _ = kill_rx => {
            let _ = child.kill().await;
            let mut stderr = stderr_task.await.unwrap_or_default();
            stderr.extend_from_slice(b"Job was terminated by server\n");
            metrics::counter!("dispatch_worker_jobs_killed_total").increment(1);
            ExecOutcome {
                status: JobStatus::Failed,
                stdout: stdout_task.await.unwrap_or_default(),
                stderr,
                outfiles: Vec::new(),
            }
        }
    }
}

async fn finish_on_exit(
    job: &Job,
    scratch_dir: &Path,
    wait_result: std::io::Result<std::process::ExitStatus>,
    stdout: Vec<u8>,
    mut stderr: Vec<u8>,
) -> ExecOutcome {
    let exit_status = match wait_result {
        Ok(status) => status,
        Err(err) => {
            stderr.extend_from_slice(format!("failed to wait on child: {err}\n").as_bytes());
            metrics::counter!("dispatch_worker_jobs_failed_total").increment(1);
            return ExecOutcome {
                status: JobStatus::Failed,
                stdout,
                stderr,
                outfiles: Vec::new(),
            };
        }
    };

    if !exit_status.success() {
        stderr.extend_from_slice(format!("command exited with {exit_status}\n").as_bytes());
        metrics::counter!("dispatch_worker_jobs_failed_total").increment(1);
        return ExecOutcome {
            status: JobStatus::Failed,
            stdout,
            stderr,
            outfiles: Vec::new(),
        };
    }

    let mut status = JobStatus::Complete;
    let mut outfiles = Vec::with_capacity(job.outfiles.len());
    for outfile in &job.outfiles {
        match read_outfile(scratch_dir, &outfile.name).await {
            Ok(data) => outfiles.push(FileEntry::new(outfile.name.clone(), data)),
            Err(err) => {
                status = JobStatus::Failed;
                stderr.extend_from_slice(
                    format!("failed to read outfile {}: {err}\n", outfile.name).as_bytes(),
                );
                metrics::counter!("dispatch_worker_outfile_read_errors_total").increment(1);
            }
        }
    }

    if status == JobStatus::Failed {
        metrics::counter!("dispatch_worker_jobs_failed_total").increment(1);
    }

    ExecOutcome {
        status,
        stdout,
        stderr,
        outfiles,
    }
}

async fn write_infile(scratch_dir: &Path, infile: &FileEntry) -> std::io::Result<()> {
    let path = infile_path(scratch_dir, &infile.name);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, &infile.data).await?;
    tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

async fn read_outfile(scratch_dir: &Path, name: &str) -> std::io::Result<Vec<u8>> {
    tokio::fs::read(infile_path(scratch_dir, name)).await
}

/// Directory traversal in `name` is permitted here by design (§4.3.1): the
/// caller is responsible for vetting file names before submitting a job.
fn infile_path(scratch_dir: &Path, name: &str) -> PathBuf {
    scratch_dir.join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_echo_and_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::new(vec!["echo".to_string(), "hello".to_string()]);
        let (_tx, rx) = oneshot::channel();

        let outcome = execute(&job, dir.path(), &[], rx).await;
        assert_eq!(outcome.status, JobStatus::Complete);
        assert_eq!(outcome.stdout, b"hello\n");
    }

    #[tokio::test]
    async fn nonzero_exit_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::new(vec!["false".to_string()]);
        let (_tx, rx) = oneshot::channel();

        let outcome = execute(&job, dir.path(), &[], rx).await;
        assert_eq!(outcome.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn command_not_whitelisted_fails_without_running() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::new(vec!["echo".to_string(), "hi".to_string()]);
        let (_tx, rx) = oneshot::channel();

        let outcome = execute(&job, dir.path(), &["true".to_string()], rx).await;
        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(String::from_utf8_lossy(&outcome.stderr).contains("not in the worker whitelist"));
    }

    #[tokio::test]
    async fn timeout_kills_child_and_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = Job::new(vec!["sleep".to_string(), "5".to_string()]);
        job.timeout_ns = chrono::Duration::milliseconds(100).num_nanoseconds().unwrap();
        let (_tx, rx) = oneshot::channel();

        let outcome = execute(&job, dir.path(), &[], rx).await;
        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(String::from_utf8_lossy(&outcome.stderr).contains("Job timed out after"));
    }

    #[tokio::test]
    async fn kill_signal_terminates_child() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::new(vec!["sleep".to_string(), "5".to_string()]);
        let (tx, rx) = oneshot::channel();
        tx.send(()).unwrap();

        let outcome = execute(&job, dir.path(), &[], rx).await;
        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(String::from_utf8_lossy(&outcome.stderr).contains("terminated by server"));
    }

    #[tokio::test]
    async fn reads_back_declared_outfiles() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = Job::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo hi > out.txt".to_string(),
        ]);
        job.outfiles.push(FileEntry::new("out.txt", Vec::new()));
        let (_tx, rx) = oneshot::channel();

        let outcome = execute(&job, dir.path(), &[], rx).await;
        assert_eq!(outcome.status, JobStatus::Complete);
        assert_eq!(outcome.outfiles.len(), 1);
        assert_eq!(outcome.outfiles[0].data, b"hi\n");
    }

    #[tokio::test]
    async fn scratch_directory_is_removed_after_run() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::new(vec!["true".to_string()]);
        let (_tx, rx) = oneshot::channel();

        execute(&job, dir.path(), &[], rx).await;
        let remaining: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(remaining.is_empty());
    }
}
