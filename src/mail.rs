use crate::error::{FilterError, Result};
use crate::identity::Identifier;
use crate::message::Message;

pub const UUID_HEADER: &str = "X-Filter-UUID";

/// Routing information handed over by the MTA. The original recipient list
/// is never modified; a diversion replaces the effective list once.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    sender: String,
    original_recipients: Vec<String>,
    diverted: Option<Vec<String>>,
}

impl Envelope {
    pub fn new(sender: impl Into<String>, recipients: Vec<String>) -> Self {
        Self {
            sender: sender.into(),
            original_recipients: recipients,
            diverted: None,
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn original_recipients(&self) -> &[String] {
        &self.original_recipients
    }

    pub fn effective_recipients(&self) -> &[String] {
        self.diverted.as_deref().unwrap_or(&self.original_recipients)
    }

    pub fn divert(&mut self, recipients: Vec<String>) -> Result<()> {
        if self.diverted.is_some() {
            return Err(FilterError::AlreadyDiverted);
        }
        self.diverted = Some(recipients);
        Ok(())
    }
}

/// One message moving through the filter.
#[derive(Debug, Clone)]
pub struct Mail {
    id: Identifier,
    pub message: Message,
    pub envelope: Envelope,
    changed: bool,
}

impl Mail {
    /// Wraps a freshly parsed message and stamps it with its identifier.
    pub fn new(id: Identifier, mut message: Message, envelope: Envelope) -> Self {
        message.add_header(UUID_HEADER, id.as_str());
        Self {
            id,
            message,
            envelope,
            changed: false,
        }
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    pub(crate) fn mark_changed(&mut self) {
        self.changed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipients(list: &[&str]) -> Vec<String> {
        list.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn effective_recipients_default_to_original() {
        let env = Envelope::new("sender@example.com", recipients(&["a@example.com", "b@example.com"]));
        assert_eq!(env.effective_recipients(), env.original_recipients());
    }

    #[test]
    fn divert_replaces_effective_but_keeps_original() {
        let mut env = Envelope::new("sender@example.com", recipients(&["a@example.com"]));
        env.divert(recipients(&["qa@example.com"])).unwrap();
        assert_eq!(env.effective_recipients(), ["qa@example.com"]);
        assert_eq!(env.original_recipients(), ["a@example.com"]);
    }

    #[test]
    fn second_diversion_is_refused() {
        let mut env = Envelope::new("", recipients(&["a@example.com"]));
        env.divert(recipients(&["qa@example.com"])).unwrap();
        assert!(matches!(
            env.divert(recipients(&["other@example.com"])),
            Err(FilterError::AlreadyDiverted)
        ));
        assert_eq!(env.effective_recipients(), ["qa@example.com"]);
    }

    #[test]
    fn new_mail_is_tagged_with_identifier() {
        let message = Message::parse(b"Subject: hi\n\nbody\n").unwrap();
        let id = Identifier::assign();
        let mail = Mail::new(id.clone(), message, Envelope::new("s@example.com", vec![]));
        assert_eq!(mail.message.header(UUID_HEADER), Some(id.as_str()));
        assert!(!mail.changed());
    }
}
