mod error;

pub use error::ClientError;

use dispatch_types::{Job, JobId, WorkerId};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// A thin client over the dispatcher's JSON-over-HTTP RPC surface. Cheap to
/// clone: the underlying `reqwest::Client` pools connections internally.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    kind: String,
    message: String,
}

impl Client {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// `Run(j)`: blocking submit. Resolves only once the job reaches a
    /// terminal state.
    pub async fn run(&self, job: &Job) -> Result<Job, ClientError> {
        self.post_json("/api/v1/rpc/submit", job).await
    }

    /// `Start(j, ch)`: submit the job and hand back a channel that resolves
    /// with the same result `run` would have returned, without blocking the
    /// caller's task on the HTTP round trip.
    pub fn start(&self, job: Job) -> oneshot::Receiver<Result<Job, ClientError>> {
        let (tx, rx) = oneshot::channel();
        let client = self.clone();
        tokio::spawn(async move {
            let result = client.run(&job).await;
            let _ = tx.send(result);
        });
        rx
    }

    pub async fn submit_async(&self, job: &Job) -> Result<JobId, ClientError> {
        #[derive(Deserialize)]
        struct Ack {
            #[serde(rename = "Id")]
            id: JobId,
        }
        let ack: Ack = self.post_json("/api/v1/rpc/submit_async", job).await?;
        Ok(ack.id)
    }

    pub async fn retrieve(&self, id: JobId) -> Result<Job, ClientError> {
        #[derive(Serialize)]
        struct Req {
            #[serde(rename = "Id")]
            id: JobId,
        }
        self.post_json("/api/v1/rpc/retrieve", &Req { id }).await
    }

    /// Returns `Ok(None)` when the server signals "no job available".
    pub async fn fetch(&self, worker_id: WorkerId) -> Result<Option<Job>, ClientError> {
        #[derive(Serialize)]
        struct Req {
            #[serde(rename = "WorkerId")]
            worker_id: WorkerId,
        }
        let resp = self
            .http
            .post(self.url("/api/v1/rpc/fetch"))
            .json(&Req { worker_id })
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let job = Self::into_json(resp).await?;
        Ok(Some(job))
    }

    pub async fn push(&self, job: &Job) -> Result<(), ClientError> {
        let resp = self
            .http
            .post(self.url("/api/v1/rpc/push"))
            .json(job)
            .send()
            .await?;
        Self::check_status(resp).await?;
        Ok(())
    }

    /// Returns `true` if the server wants this worker to kill its local process.
    pub async fn heartbeat(&self, worker_id: WorkerId, job_id: JobId) -> Result<bool, ClientError> {
        #[derive(Serialize)]
        struct Req {
            #[serde(rename = "WorkerId")]
            worker_id: WorkerId,
            #[serde(rename = "JobId")]
            job_id: JobId,
        }
        #[derive(Deserialize)]
        struct Resp {
            kill: bool,
        }
        let resp: Resp = self
            .post_json("/api/v1/rpc/heartbeat", &Req { worker_id, job_id })
            .await?;
        Ok(resp.kill)
    }

    async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ClientError> {
        let resp = self.http.post(self.url(path)).json(body).send().await?;
        Self::into_json(resp).await
    }

    async fn into_json<R: for<'de> Deserialize<'de>>(
        resp: reqwest::Response,
    ) -> Result<R, ClientError> {
        let resp = Self::check_status(resp).await?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        match resp.json::<ErrorBody>().await {
            Ok(body) => Err(ClientError::Api {
                kind: body.kind,
                message: body.message,
            }),
            Err(_) => Err(ClientError::Api {
                kind: "internal".to_string(),
                message: "server returned an unreadable error body".to_string(),
            }),
        }
    }
}
