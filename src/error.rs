use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

// sysexits(3) codes understood by Postfix pipe(8).
pub const EX_DATAERR: i32 = 65;
pub const EX_SOFTWARE: i32 = 70;
pub const EX_TEMPFAIL: i32 = 75;
pub const EX_CONFIG: i32 = 78;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("message is empty")]
    Empty,
    #[error("message has no header section")]
    NoHeaders,
    #[error("malformed header section: {0}")]
    Malformed(#[from] mailparse::MailParseError),
    #[error("malformed header field {0:?}")]
    MalformedHeader(String),
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("failed to start delivery agent {path}: {source}")]
    Spawn { path: String, source: io::Error },
    #[error("failed to stream message to delivery agent: {0}")]
    Stream(#[source] io::Error),
    #[error("delivery agent exited with {status}: {stderr}")]
    Rejected { status: ExitStatus, stderr: String },
    #[error("invalid envelope address {address:?}: {reason}")]
    Address { address: String, reason: String },
    #[error("SMTP reinjection failed: {0}")]
    Smtp(String),
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("cannot parse message: {0}")]
    Parse(#[from] ParseError),
    #[error("staging directory {0} does not exist")]
    StagingDirectoryMissing(PathBuf),
    #[error("invalid value for X-Filter-Env header: {0:?}")]
    InvalidEnvironmentValue(String),
    #[error("recipients were already diverted")]
    AlreadyDiverted,
    #[error("submission failed: {0}")]
    Submission(#[from] SubmissionError),
    #[error("{context}: {source}")]
    Io { context: String, source: io::Error },
}

impl FilterError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        FilterError::Io {
            context: context.into(),
            source,
        }
    }

    /// Exit status reported back to the MTA. Temporary failures make the
    /// MTA keep the message queued and retry later.
    pub fn exit_code(&self) -> i32 {
        match self {
            FilterError::Config(_) => EX_CONFIG,
            FilterError::Parse(_) | FilterError::InvalidEnvironmentValue(_) => EX_DATAERR,
            FilterError::StagingDirectoryMissing(_)
            | FilterError::Submission(_)
            | FilterError::Io { .. } => EX_TEMPFAIL,
            FilterError::AlreadyDiverted => EX_SOFTWARE,
        }
    }
}

pub type Result<T> = std::result::Result<T, FilterError>;
