use log::{debug, error, info, warn};

use crate::delivery::DeliveryAgent;
use crate::error::Result;
use crate::identity::Identifier;
use crate::mail::{Envelope, Mail};
use crate::message::Message;
use crate::policy::{self, EnvClass, PolicySettings};
use crate::staging::{Checkpoint, StagingStore};

/// What happened to one message, for the final log line.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterReport {
    pub id: Identifier,
    pub class: EnvClass,
    pub changed: bool,
    pub recipients: Vec<String>,
}

pub struct Filter<A> {
    store: StagingStore,
    settings: PolicySettings,
    agent: A,
    keep_snapshots: bool,
}

impl<A: DeliveryAgent> Filter<A> {
    pub fn new(store: StagingStore, settings: PolicySettings, agent: A, keep_snapshots: bool) -> Self {
        Self {
            store,
            settings,
            agent,
            keep_snapshots,
        }
    }

    #[cfg(test)]
    pub fn agent(&self) -> &A {
        &self.agent
    }

    /// Filter one raw message and resubmit it. Any error means the message
    /// was not submitted.
    pub fn run(&self, raw: &[u8], sender: &str, recipients: Vec<String>) -> Result<FilterReport> {
        info!(
            "[filter] starting content filter sender={}, recipients={}",
            sender,
            recipients.join(", ")
        );
        let message = Message::parse(raw)?;

        let id = Identifier::assign();
        info!("[filter] {}: new identifier generated for incoming email", id);
        debug!("[filter] {}: message body is {} bytes", id, message.body().len());
        let mail = Mail::new(id.clone(), message, Envelope::new(sender, recipients));

        self.process(mail).map_err(|e| {
            error!("[filter] {}: {}", id, e);
            e
        })
    }

    fn process(&self, mail: Mail) -> Result<FilterReport> {
        let id = mail.id().clone();
        self.store
            .write(&id, Checkpoint::Received, &mail.message.to_bytes())?;

        let outcome = policy::apply(mail, &self.settings)?;
        for event in &outcome.events {
            info!("[policy] {}: {}", id, event);
        }
        let mail = outcome.mail;

        self.store
            .write(&id, Checkpoint::Filtered, &mail.message.to_bytes())?;

        debug!("[filter] {}: get 'filtered' email from disk", id);
        let filtered = self.store.read(&id, Checkpoint::Filtered)?;

        let recipients = mail.envelope.effective_recipients().to_vec();
        info!(
            "[filter] {}: submitting email from {} to {}",
            id,
            mail.envelope.sender(),
            recipients.join(" ")
        );
        self.agent
            .submit(mail.envelope.sender(), &recipients, &filtered)?;

        if !self.keep_snapshots {
            // The message is already handed over; a failure here must not
            // make the MTA deliver it a second time.
            if let Err(e) = self.store.purge(&id) {
                warn!("[filter] {}: could not delete email files: {}", id, e);
            }
        }

        Ok(FilterReport {
            id,
            class: outcome.class,
            changed: mail.changed(),
            recipients,
        })
    }
}
