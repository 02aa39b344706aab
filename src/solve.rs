//! Lifecycle of a remote plate-solving job: login, submission, polling and solution retrieval.
//!
//! The transport is abstracted by [`SolveService`]; [`SolveJobClient`] drives the state machine on
//! top of it. Every failure is returned to the caller, none of them terminates the process.

use std::fmt;
use std::thread::sleep;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;

/// Pause before each poll.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Number of polls before giving up.
pub const MAX_POLL_ATTEMPTS: usize = 60;

/// Identifier of an uploaded image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubmissionId(pub u64);

/// Identifier of a solving job spawned by a submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JobId(pub u64);

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors of the solving lifecycle.
#[derive(Error, Debug)]
pub enum SolveError {
    /// The service refused the credentials.
    #[error("login rejected: {0}")]
    LoginRejected(String),
    /// The service refused the upload.
    #[error("upload rejected: {0}")]
    UploadRejected(String),
    /// The remote solver gave up on the image.
    #[error("solving failed for job {0}")]
    SolveFailed(JobId),
    /// No definitive outcome within the poll budget.
    #[error("solving did not finish after {attempts} polls of submission {submission}")]
    TimedOut {
        /// The submission that was abandoned.
        submission: SubmissionId,
        /// Polls made.
        attempts: usize,
    },
    /// A request could not be completed or its reply not understood.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<reqwest::Error> for SolveError {
    fn from(e: reqwest::Error) -> Self {
        SolveError::Transport(Box::new(e))
    }
}

/// Authentication token of one run. Attached to every call after login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    token: String,
}

impl Session {
    /// Wrap a token returned by the service.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// The raw token.
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Remote state of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    /// Queued or solving.
    Pending,
    /// Solved.
    Success,
    /// The solver gave up.
    Failure,
}

/// Visibility and license flags sent with an upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Visibility {
    /// Whether the submission is listed publicly.
    pub publicly_visible: bool,
    /// Whether others may modify the image.
    pub allow_modifications: bool,
    /// Whether commercial use is allowed.
    pub allow_commercial_use: bool,
}

impl Default for Visibility {
    fn default() -> Self {
        Self {
            publicly_visible: true,
            allow_modifications: false,
            allow_commercial_use: false,
        }
    }
}

/// A submission and what polling has learned about it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionJob {
    /// Identifier of the upload.
    pub submission_id: SubmissionId,
    /// First job spawned by the submission, once assigned.
    pub job_id: Option<JobId>,
    /// Last observed job status.
    pub status: JobStatus,
}

impl SubmissionJob {
    /// A freshly uploaded submission.
    pub fn new(submission_id: SubmissionId) -> Self {
        Self {
            submission_id,
            job_id: None,
            status: JobStatus::Pending,
        }
    }
}

/// Operations offered by a plate-solving service.
pub trait SolveService {
    /// Exchange an API key for a session.
    fn authenticate(&self, api_key: &str) -> Result<Session, SolveError>;

    /// Upload an image.
    fn submit(
        &self,
        session: &Session,
        image: &[u8],
        file_name: &str,
        visibility: &Visibility,
    ) -> Result<SubmissionId, SolveError>;

    /// Jobs spawned by a submission so far, in creation order.
    fn submission_jobs(
        &self,
        session: &Session,
        submission: SubmissionId,
    ) -> Result<Vec<JobId>, SolveError>;

    /// Current state of a job.
    fn job_status(&self, session: &Session, job: JobId) -> Result<JobStatus, SolveError>;

    /// The solution of a successful job as a FITS WCS file.
    fn fetch_solution(&self, session: &Session, job: JobId) -> Result<Vec<u8>, SolveError>;
}

impl<S: SolveService + ?Sized> SolveService for &S {
    fn authenticate(&self, api_key: &str) -> Result<Session, SolveError> {
        (**self).authenticate(api_key)
    }

    fn submit(
        &self,
        session: &Session,
        image: &[u8],
        file_name: &str,
        visibility: &Visibility,
    ) -> Result<SubmissionId, SolveError> {
        (**self).submit(session, image, file_name, visibility)
    }

    fn submission_jobs(
        &self,
        session: &Session,
        submission: SubmissionId,
    ) -> Result<Vec<JobId>, SolveError> {
        (**self).submission_jobs(session, submission)
    }

    fn job_status(&self, session: &Session, job: JobId) -> Result<JobStatus, SolveError> {
        (**self).job_status(session, job)
    }

    fn fetch_solution(&self, session: &Session, job: JobId) -> Result<Vec<u8>, SolveError> {
        (**self).fetch_solution(session, job)
    }
}

/// Polling cadence and budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Pause before each poll.
    pub interval: Duration,
    /// Number of polls before timing out.
    pub max_attempts: usize,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            max_attempts: MAX_POLL_ATTEMPTS,
        }
    }
}

/// What a single poll found out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PollOutcome {
    /// No job assigned yet, job still running, or nothing learned.
    Waiting,
    /// The job finished.
    Finished(JobId, JobStatus),
}

/// Drives a [`SolveService`] through a complete solve.
#[derive(Debug)]
pub struct SolveJobClient<S> {
    service: S,
    policy: PollPolicy,
}

impl<S: SolveService> SolveJobClient<S> {
    /// Client with the default poll policy.
    pub fn new(service: S) -> Self {
        Self {
            service,
            policy: PollPolicy::default(),
        }
    }

    /// Set the poll policy.
    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The underlying service.
    pub fn service(&self) -> &S {
        &self.service
    }

    /// Log in. A rejected key is final.
    pub fn login(&self, api_key: &str) -> Result<Session, SolveError> {
        info!("Logging in.");
        let session = self.service.authenticate(api_key)?;
        debug!("Logged in with session {}.", session.token());
        Ok(session)
    }

    /// Upload an image. A rejected upload is final.
    pub fn submit(
        &self,
        session: &Session,
        image: &[u8],
        file_name: &str,
        visibility: &Visibility,
    ) -> Result<SubmissionJob, SolveError> {
        info!("Uploading {file_name} ({} bytes).", image.len());
        let submission_id = self.service.submit(session, image, file_name, visibility)?;
        info!("Upload accepted, submission {submission_id}.");
        Ok(SubmissionJob::new(submission_id))
    }

    /// Poll until the submission's first job succeeds or fails, or the poll budget runs out.
    ///
    /// Transport errors while polling are logged and use up the attempt.
    pub fn await_completion(
        &self,
        session: &Session,
        job: &mut SubmissionJob,
    ) -> Result<JobId, SolveError> {
        let max = self.policy.max_attempts;
        info!("Waiting for submission {} to be solved.", job.submission_id);

        for attempt in 1..=max {
            sleep(self.policy.interval);
            match self.poll(session, job) {
                Ok(PollOutcome::Finished(id, JobStatus::Success)) => {
                    info!("Job {id} solved after {attempt} polls.");
                    return Ok(id);
                }
                Ok(PollOutcome::Finished(id, _)) => return Err(SolveError::SolveFailed(id)),
                Ok(PollOutcome::Waiting) => match job.job_id {
                    Some(id) => info!("Job {id} {:?} ({attempt}/{max}).", job.status),
                    None => info!("Waiting for a job ({attempt}/{max})."),
                },
                Err(e) => warn!("Polling failed ({attempt}/{max}): {e}"),
            }
        }

        Err(SolveError::TimedOut {
            submission: job.submission_id,
            attempts: max,
        })
    }

    /// Download the solution of a successful job.
    pub fn fetch_solution(&self, session: &Session, job: JobId) -> Result<Vec<u8>, SolveError> {
        let bytes = self.service.fetch_solution(session, job)?;
        info!("Fetched solution of job {job} ({} bytes).", bytes.len());
        Ok(bytes)
    }

    /// Login, upload, wait and fetch in one go. Returns the finished job and its solution.
    pub fn solve(
        &self,
        api_key: &str,
        image: &[u8],
        file_name: &str,
        visibility: &Visibility,
    ) -> Result<(SubmissionJob, Vec<u8>), SolveError> {
        let session = self.login(api_key)?;
        let mut job = self.submit(&session, image, file_name, visibility)?;
        let job_id = self.await_completion(&session, &mut job)?;
        let solution = self.fetch_solution(&session, job_id)?;
        Ok((job, solution))
    }

    fn poll(&self, session: &Session, job: &mut SubmissionJob) -> Result<PollOutcome, SolveError> {
        let jobs = self.service.submission_jobs(session, job.submission_id)?;
        let Some(&id) = jobs.first() else {
            return Ok(PollOutcome::Waiting);
        };
        job.job_id = Some(id);

        job.status = self.service.job_status(session, id)?;
        match job.status {
            JobStatus::Pending => Ok(PollOutcome::Waiting),
            status => Ok(PollOutcome::Finished(id, status)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    use super::*;

    /// What the fake service reports for one poll.
    #[derive(Clone, Copy, Debug)]
    pub(crate) enum Step {
        NoJob,
        Status(JobStatus),
        SubmissionError,
        JobError,
    }

    /// Scripted in-memory service.
    pub(crate) struct FakeService {
        pub(crate) api_key: &'static str,
        pub(crate) accept_upload: bool,
        pub(crate) steps: RefCell<VecDeque<Step>>,
        pub(crate) solution: Vec<u8>,
        pub(crate) polls: Cell<usize>,
        pub(crate) status_requests: Cell<usize>,
        pub(crate) current: Cell<Option<Step>>,
        pub(crate) sessions_seen: RefCell<Vec<String>>,
    }

    impl FakeService {
        pub(crate) fn new(steps: impl IntoIterator<Item = Step>) -> Self {
            Self {
                api_key: "key",
                accept_upload: true,
                steps: RefCell::new(steps.into_iter().collect()),
                solution: b"SIMPLE".to_vec(),
                polls: Cell::new(0),
                status_requests: Cell::new(0),
                current: Cell::new(None),
                sessions_seen: RefCell::new(Vec::new()),
            }
        }

        fn see(&self, session: &Session) {
            self.sessions_seen.borrow_mut().push(session.token().to_string());
        }
    }

    fn transient() -> SolveError {
        SolveError::Transport("connection reset".into())
    }

    impl SolveService for FakeService {
        fn authenticate(&self, api_key: &str) -> Result<Session, SolveError> {
            if api_key == self.api_key {
                Ok(Session::new("s3ss10n"))
            } else {
                Err(SolveError::LoginRejected("bad apikey".into()))
            }
        }

        fn submit(
            &self,
            session: &Session,
            _image: &[u8],
            _file_name: &str,
            _visibility: &Visibility,
        ) -> Result<SubmissionId, SolveError> {
            self.see(session);
            if self.accept_upload {
                Ok(SubmissionId(42))
            } else {
                Err(SolveError::UploadRejected("no file".into()))
            }
        }

        fn submission_jobs(
            &self,
            session: &Session,
            submission: SubmissionId,
        ) -> Result<Vec<JobId>, SolveError> {
            self.see(session);
            assert_eq!(submission, SubmissionId(42));
            self.polls.set(self.polls.get() + 1);
            let step = self.steps.borrow_mut().pop_front().unwrap_or(Step::NoJob);
            self.current.set(Some(step));
            match step {
                Step::NoJob => Ok(vec![]),
                Step::SubmissionError => Err(transient()),
                Step::Status(_) | Step::JobError => Ok(vec![JobId(7), JobId(8)]),
            }
        }

        fn job_status(&self, session: &Session, job: JobId) -> Result<JobStatus, SolveError> {
            self.see(session);
            assert_eq!(job, JobId(7));
            self.status_requests.set(self.status_requests.get() + 1);
            match self.current.get() {
                Some(Step::Status(status)) => Ok(status),
                Some(Step::JobError) => Err(transient()),
                other => panic!("job status requested after {other:?}"),
            }
        }

        fn fetch_solution(&self, session: &Session, job: JobId) -> Result<Vec<u8>, SolveError> {
            self.see(session);
            assert_eq!(job, JobId(7));
            Ok(self.solution.clone())
        }
    }

    pub(crate) fn fast() -> PollPolicy {
        PollPolicy {
            interval: Duration::ZERO,
            max_attempts: MAX_POLL_ATTEMPTS,
        }
    }

    fn run(
        steps: Vec<Step>,
    ) -> (
        Result<JobId, SolveError>,
        SolveJobClient<FakeService>,
        SubmissionJob,
    ) {
        let client = SolveJobClient::new(FakeService::new(steps)).with_policy(fast());
        let session = client.login("key").unwrap();
        let mut job = client
            .submit(&session, b"jpeg", "starphoto.jpg", &Visibility::default())
            .unwrap();
        let result = client.await_completion(&session, &mut job);
        (result, client, job)
    }

    #[test]
    fn success_after_k_polls() {
        for k in [1, 2, 17, MAX_POLL_ATTEMPTS] {
            let mut steps = vec![Step::NoJob; k - 1];
            if k > 3 {
                steps[1] = Step::Status(JobStatus::Pending);
                steps[2] = Step::SubmissionError;
            }
            steps.push(Step::Status(JobStatus::Success));
            steps.push(Step::Status(JobStatus::Failure));

            let (result, client, job) = run(steps);
            assert_eq!(result.unwrap(), JobId(7));
            assert_eq!(client.service().polls.get(), k);
            assert_eq!(job.job_id, Some(JobId(7)));
            assert_eq!(job.status, JobStatus::Success);
        }
    }

    #[test]
    fn failure_is_final() {
        for k in [1, 5, MAX_POLL_ATTEMPTS] {
            let mut steps = vec![Step::Status(JobStatus::Pending); k - 1];
            steps.push(Step::Status(JobStatus::Failure));
            steps.push(Step::Status(JobStatus::Success));

            let (result, client, job) = run(steps);
            assert!(matches!(result, Err(SolveError::SolveFailed(JobId(7)))));
            assert_eq!(client.service().polls.get(), k);
            assert_eq!(job.status, JobStatus::Failure);
        }
    }

    #[test]
    fn pending_forever_times_out() {
        let (result, client, job) =
            run(vec![Step::Status(JobStatus::Pending); MAX_POLL_ATTEMPTS + 5]);
        assert!(matches!(
            result,
            Err(SolveError::TimedOut {
                submission: SubmissionId(42),
                attempts: MAX_POLL_ATTEMPTS
            })
        ));
        assert_eq!(client.service().polls.get(), MAX_POLL_ATTEMPTS);
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn transient_errors_use_up_attempts() {
        let mut steps = vec![Step::SubmissionError, Step::JobError, Step::NoJob];
        steps.extend(vec![Step::JobError; MAX_POLL_ATTEMPTS]);
        let (result, client, _) = run(steps);
        assert!(matches!(result, Err(SolveError::TimedOut { .. })));
        assert_eq!(client.service().polls.get(), MAX_POLL_ATTEMPTS);
        assert_eq!(client.service().status_requests.get(), MAX_POLL_ATTEMPTS - 2);
    }

    #[test]
    fn custom_budget() {
        let client = SolveJobClient::new(FakeService::new(vec![]))
            .with_policy(PollPolicy {
                interval: Duration::ZERO,
                max_attempts: 3,
            });
        let session = client.login("key").unwrap();
        let mut job = SubmissionJob::new(SubmissionId(42));
        assert!(matches!(
            client.await_completion(&session, &mut job),
            Err(SolveError::TimedOut { attempts: 3, .. })
        ));
        assert_eq!(client.service().polls.get(), 3);
    }

    #[test]
    fn rejected_login() {
        let client = SolveJobClient::new(FakeService::new(vec![]));
        assert!(matches!(
            client.login("wrong"),
            Err(SolveError::LoginRejected(_))
        ));
    }

    #[test]
    fn rejected_upload() {
        let mut service = FakeService::new(vec![]);
        service.accept_upload = false;
        let client = SolveJobClient::new(service);
        let result = client.solve("key", b"jpeg", "starphoto.jpg", &Visibility::default());
        assert!(matches!(result, Err(SolveError::UploadRejected(_))));
        assert_eq!(client.service().polls.get(), 0);
    }

    #[test]
    fn full_solve_reuses_session() {
        let client = SolveJobClient::new(FakeService::new(vec![
            Step::NoJob,
            Step::Status(JobStatus::Success),
        ]))
        .with_policy(fast());
        let (job, solution) = client
            .solve("key", b"jpeg", "starphoto.jpg", &Visibility::default())
            .unwrap();

        assert_eq!(job.submission_id, SubmissionId(42));
        assert_eq!(solution, b"SIMPLE".to_vec());
        let seen = client.service().sessions_seen.borrow();
        assert!(seen.len() >= 4);
        assert!(seen.iter().all(|s| s == "s3ss10n"));
    }
}
