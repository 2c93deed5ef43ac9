use lettre::address::{Address, Envelope};
use lettre::{SmtpTransport, Transport};
use log::{debug, info};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::error::SubmissionError;

pub const DEFAULT_SENDMAIL_PATH: &str = "/usr/sbin/sendmail";
pub const DEFAULT_SMTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_SMTP_PORT: u16 = 10025;

// -G: treat as a gateway submission, -i: a lone dot does not end the message.
const SENDMAIL_FLAGS: [&str; 2] = ["-G", "-i"];

/// Hands a finished message back to the MTA. Routing comes from the
/// envelope arguments only; headers inside `message` are not consulted.
pub trait DeliveryAgent {
    fn submit(&self, sender: &str, recipients: &[String], message: &[u8]) -> Result<(), SubmissionError>;
}

impl<T: DeliveryAgent + ?Sized> DeliveryAgent for Box<T> {
    fn submit(&self, sender: &str, recipients: &[String], message: &[u8]) -> Result<(), SubmissionError> {
        (**self).submit(sender, recipients, message)
    }
}

fn is_null_sender(sender: &str) -> bool {
    sender.is_empty() || sender == "<>"
}

/// Resubmission through the local `sendmail` compatibility binary.
#[derive(Debug, Clone)]
pub struct Sendmail {
    path: PathBuf,
}

impl Sendmail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn command(&self, sender: &str, recipients: &[String]) -> Command {
        let sender = if is_null_sender(sender) { "<>" } else { sender };
        let mut cmd = Command::new(&self.path);
        cmd.args(SENDMAIL_FLAGS)
            .arg("-f")
            .arg(sender)
            .arg("--")
            .args(recipients)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Default for Sendmail {
    fn default() -> Self {
        Self::new(DEFAULT_SENDMAIL_PATH)
    }
}

impl DeliveryAgent for Sendmail {
    fn submit(&self, sender: &str, recipients: &[String], message: &[u8]) -> Result<(), SubmissionError> {
        debug!(
            "[delivery] running {} -f {} -- {}",
            self.path.display(),
            sender,
            recipients.join(" ")
        );
        let mut child = self
            .command(sender, recipients)
            .spawn()
            .map_err(|source| SubmissionError::Spawn {
                path: self.path.display().to_string(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // An agent that exits early closes the pipe; its exit status says more.
            match stdin.write_all(message) {
                Err(e) if e.kind() != ErrorKind::BrokenPipe => {
                    if let Err(kill_err) = child.kill() {
                        debug!("[delivery] could not kill sendmail after write error: {}", kill_err);
                    }
                    // Reap the child so no zombie is left behind.
                    let _ = child.wait();
                    return Err(SubmissionError::Stream(e));
                }
                _ => {}
            }
        }

        let output = child.wait_with_output().map_err(SubmissionError::Stream)?;
        if !output.status.success() {
            return Err(SubmissionError::Rejected {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        info!("[delivery] sendmail accepted message for {} recipient(s)", recipients.len());
        Ok(())
    }
}

/// Raw SMTP reinjection into a local listener that bypasses the content
/// filter (Postfix `127.0.0.1:10025` convention).
#[derive(Debug, Clone)]
pub struct SmtpRelay {
    host: String,
    port: u16,
}

impl SmtpRelay {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    fn envelope(sender: &str, recipients: &[String]) -> Result<Envelope, SubmissionError> {
        let from = if is_null_sender(sender) {
            None
        } else {
            Some(parse_address(sender)?)
        };
        let to = recipients
            .iter()
            .map(|r| parse_address(r))
            .collect::<Result<Vec<_>, _>>()?;
        Envelope::new(from, to).map_err(|e| SubmissionError::Address {
            address: recipients.join(" "),
            reason: e.to_string(),
        })
    }
}

fn parse_address(raw: &str) -> Result<Address, SubmissionError> {
    raw.parse::<Address>().map_err(|e| SubmissionError::Address {
        address: raw.to_string(),
        reason: e.to_string(),
    })
}

impl DeliveryAgent for SmtpRelay {
    fn submit(&self, sender: &str, recipients: &[String], message: &[u8]) -> Result<(), SubmissionError> {
        let envelope = Self::envelope(sender, recipients)?;
        debug!("[delivery] connecting to {}:{} for reinjection", self.host, self.port);
        let mailer = SmtpTransport::builder_dangerous(&self.host)
            .port(self.port)
            .build();
        mailer
            .send_raw(&envelope, message)
            .map_err(|e| SubmissionError::Smtp(e.to_string()))?;
        info!(
            "[delivery] SMTP reinjection completed via {}:{} for {} recipient(s)",
            self.host,
            self.port,
            recipients.len()
        );
        Ok(())
    }
}
