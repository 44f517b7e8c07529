use std::io::{Cursor, Write};
use std::str::FromStr;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use dispatch_types::{FileEntry, Job, JobId, JobStat, JobStatus};

use super::rpc::RpcState;
use crate::wire::{internal, invalid_id, ApiError};

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    JobId::from_str(raw).map_err(|err| invalid_id(err.to_string()))
}

/// `GET /api/v1/job/<jobid>`: full `Job` if terminal, otherwise the compact
/// `JobStat` projection.
pub async fn get_job(
    State(state): State<RpcState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_job_id(&job_id)?;
    let job = state.dispatcher.retrieve(id).await?;

    let mut response = if job.status.is_terminal() {
        Json(job.clone()).into_response()
    } else {
        Json(JobStat::from(&job)).into_response()
    };

    response.headers_mut().insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("filename=\"job-{id}.json\"")).unwrap(),
    );
    Ok(response)
}

/// `POST /api/v1/job/`: body is `Job` JSON; enqueues and returns the created
/// record, setting `Location`.
pub async fn post_job(
    State(state): State<RpcState>,
    Json(job): Json<Job>,
) -> Result<Response, ApiError> {
    let id = job.id;
    state.dispatcher.submit_async(job).await?;
    let created = state.dispatcher.retrieve(id).await?;

    let mut response = (StatusCode::CREATED, Json(created)).into_response();
    response.headers_mut().insert(
        header::LOCATION,
        HeaderValue::from_str(&format!("/api/v1/job/{id}")).unwrap(),
    );
    Ok(response)
}

/// `POST /api/v1/job-infile`: body is a raw simulation input; the server
/// wraps it in a default job and enqueues it.
pub async fn post_job_infile(
    State(state): State<RpcState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let mut job = Job::new(vec!["run".to_string()]);
    job.infiles
        .push(FileEntry::new("input", body.to_vec()));
    let id = job.id;
    state.dispatcher.submit_async(job).await?;
    let created = state.dispatcher.retrieve(id).await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

/// `GET /api/v1/job-outfiles/<jobid>`: a zip archive of the job's Outfiles.
/// 400 if the job is not yet complete.
pub async fn get_job_outfiles(
    State(state): State<RpcState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_job_id(&job_id)?;
    let job = state.dispatcher.retrieve(id).await?;

    if job.status != JobStatus::Complete {
        return Err(invalid_id(format!(
            "job {id} is not complete (status={:?})",
            job.status
        )));
    }

    let bytes = zip_outfiles(&job).map_err(|err| internal(err.to_string()))?;

    let mut response = (StatusCode::OK, bytes).into_response();
    response.headers_mut().insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("filename=\"results-{id}.zip\"")).unwrap(),
    );
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    Ok(response)
}

/// `POST /api/v1/job-outfiles/<jobid>`: workers stream a zip of Outfiles
/// here instead of inlining them in the `Push` RPC body.
pub async fn post_job_outfiles(
    State(state): State<RpcState>,
    Path(job_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let id = parse_job_id(&job_id)?;
    let mut job = state.dispatcher.retrieve(id).await?;

    let outfiles = unzip_outfiles(&body).map_err(|err| internal(err.to_string()))?;
    job.outfiles = outfiles;
    state.dispatcher.push(job).await?;
    Ok(StatusCode::OK)
}

/// Supplemented read-only listing: every non-terminal job as a `JobStat`.
pub async fn list_jobs(State(state): State<RpcState>) -> Json<Vec<JobStat>> {
    Json(state.dispatcher.current().await)
}

fn zip_outfiles(job: &Job) -> zip::result::ZipResult<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let cursor = Cursor::new(&mut buf);
        let mut writer = zip::ZipWriter::new(cursor);
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for outfile in &job.outfiles {
            writer.start_file(&outfile.name, options)?;
            writer.write_all(&outfile.data)?;
        }
        writer.finish()?;
    }
    Ok(buf)
}

fn unzip_outfiles(bytes: &[u8]) -> zip::result::ZipResult<Vec<FileEntry>> {
    let cursor = Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor)?;
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let mut data = Vec::with_capacity(file.size() as usize);
        std::io::copy(&mut file, &mut data)?;
        entries.push(FileEntry::new(file.name().to_string(), data));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_round_trips_outfiles() {
        let mut job = Job::new(vec!["echo".into()]);
        job.outfiles.push(FileEntry::new("a.txt", b"hello".to_vec()));
        job.outfiles.push(FileEntry::new("b.txt", b"world".to_vec()));

        let zipped = zip_outfiles(&job).unwrap();
        let unzipped = unzip_outfiles(&zipped).unwrap();

        assert_eq!(unzipped.len(), 2);
        assert_eq!(unzipped[0].name, "a.txt");
        assert_eq!(unzipped[0].data, b"hello");
        assert_eq!(unzipped[1].data, b"world");
    }
}
