//! [`SolveService`] backed by the nova.astrometry.net JSON API.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, multipart};
use reqwest::header::{COOKIE, REFERER};
use serde::Deserialize;
use serde_json::json;

use crate::solve::{JobId, JobStatus, Session, SolveError, SolveService, SubmissionId, Visibility};

/// Public nova.astrometry.net site.
pub const NOVA_BASE_URL: &str = "http://nova.astrometry.net";
/// API root of the public site.
pub const NOVA_API_URL: &str = "http://nova.astrometry.net/api";

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct LoginResponse {
    status: String,
    session: Option<String>,
    #[serde(default, alias = "errormessage")]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    status: String,
    subid: Option<u64>,
    #[serde(default, alias = "errormessage")]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmissionStatusResponse {
    jobs: Option<Vec<Option<u64>>>,
}

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    status: Option<String>,
}

fn flag(value: bool) -> &'static str {
    if value { "y" } else { "n" }
}

fn rejection(status: &str, message: Option<String>) -> String {
    message.unwrap_or_else(|| format!("status {status:?}"))
}

/// HTTP client for nova.astrometry.net or a compatible server.
#[derive(Debug, Clone)]
pub struct NovaService {
    client: Client,
    base_url: String,
    api_url: String,
}

impl NovaService {
    /// Client for a server with the given site and API roots.
    pub fn new(
        base_url: impl Into<String>,
        api_url: impl Into<String>,
    ) -> Result<Self, SolveError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Client for the public nova.astrometry.net service.
    pub fn public() -> Result<Self, SolveError> {
        Self::new(NOVA_BASE_URL, NOVA_API_URL)
    }

    fn get(&self, session: &Session, url: &str) -> RequestBuilder {
        self.client
            .get(url)
            .header(COOKIE, format!("session={}", session.token()))
    }
}

impl SolveService for NovaService {
    fn authenticate(&self, api_key: &str) -> Result<Session, SolveError> {
        let request_json = json!({ "apikey": api_key });
        let response: LoginResponse = self
            .client
            .post(format!("{}/login", self.api_url))
            .form(&[("request-json", request_json.to_string())])
            .send()?
            .error_for_status()?
            .json()?;

        match (response.status.as_str(), response.session) {
            ("success", Some(token)) => Ok(Session::new(token)),
            (status, _) => Err(SolveError::LoginRejected(rejection(status, response.message))),
        }
    }

    fn submit(
        &self,
        session: &Session,
        image: &[u8],
        file_name: &str,
        visibility: &Visibility,
    ) -> Result<SubmissionId, SolveError> {
        let request_json = json!({
            "session": session.token(),
            "publicly_visible": flag(visibility.publicly_visible),
            "allow_modifications": flag(visibility.allow_modifications),
            "allow_commercial_use": flag(visibility.allow_commercial_use),
        });
        let form = multipart::Form::new()
            .text("request-json", request_json.to_string())
            .part(
                "file",
                multipart::Part::bytes(image.to_vec())
                    .file_name(file_name.to_string())
                    .mime_str("application/octet-stream")?,
            );

        let response: UploadResponse = self
            .client
            .post(format!("{}/upload", self.api_url))
            .header(COOKIE, format!("session={}", session.token()))
            .multipart(form)
            .send()?
            .error_for_status()?
            .json()?;

        match (response.status.as_str(), response.subid) {
            ("success", Some(id)) => Ok(SubmissionId(id)),
            (status, _) => Err(SolveError::UploadRejected(rejection(status, response.message))),
        }
    }

    fn submission_jobs(
        &self,
        session: &Session,
        submission: SubmissionId,
    ) -> Result<Vec<JobId>, SolveError> {
        let response: SubmissionStatusResponse = self
            .get(session, &format!("{}/submissions/{submission}", self.api_url))
            .send()?
            .error_for_status()?
            .json()?;
        // Jobs not yet started are reported as null.
        Ok(response
            .jobs
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .map(JobId)
            .collect())
    }

    fn job_status(&self, session: &Session, job: JobId) -> Result<JobStatus, SolveError> {
        let response: JobStatusResponse = self
            .get(session, &format!("{}/jobs/{job}", self.api_url))
            .send()?
            .error_for_status()?
            .json()?;
        Ok(match response.status.as_deref() {
            Some("success") => JobStatus::Success,
            Some("failure") => JobStatus::Failure,
            _ => JobStatus::Pending,
        })
    }

    fn fetch_solution(&self, session: &Session, job: JobId) -> Result<Vec<u8>, SolveError> {
        let bytes = self
            .get(session, &format!("{}/wcs_file/{job}", self.base_url))
            .header(REFERER, format!("{}/login", self.api_url))
            .send()?
            .error_for_status()?
            .bytes()?;
        Ok(bytes.to_vec())
    }
}
