//! Environment-aware recipient diversion.
//!
//! Non-production traffic (`X-Filter-Env` in the dev or staging class) is
//! rerouted to a QA recipient list and annotated so the diversion is visible
//! downstream. Production traffic is passed through untouched. The engine
//! does no I/O: it returns the updated mail plus the events to be logged.

use std::fmt;

use crate::error::{FilterError, Result};
use crate::mail::Mail;

pub const ENV_HEADER: &str = "X-Filter-Env";
pub const RECIPIENTS_HEADER: &str = "X-Filter-Recipients";
pub const TRANSPORT_HEADER: &str = "X-Filter-Env-Transport";
pub const ORIGIN_RECIPIENTS_HEADER: &str = "X-Filter-Origin-Recipients";
pub const MODIFY_HEADER: &str = "X-Filter-Modify";

pub const DEFAULT_SUBJECT_PREFIX: &str = "[This email has been diverted] - ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvClass {
    Dev,
    Staging,
    Prod,
}

impl EnvClass {
    /// Map a raw `X-Filter-Env` value onto its class. Matching is exact
    /// apart from surrounding whitespace.
    pub fn classify(value: &str) -> Option<Self> {
        match value.trim() {
            "dev" | "development" => Some(EnvClass::Dev),
            "preprod" | "preproduction" | "staging" => Some(EnvClass::Staging),
            "prod" | "production" | "live" => Some(EnvClass::Prod),
            _ => None,
        }
    }

    pub fn diverts(self) -> bool {
        !matches!(self, EnvClass::Prod)
    }

    pub fn transport_hint(self) -> Option<&'static str> {
        match self {
            EnvClass::Dev => Some("dev"),
            EnvClass::Staging => Some("staging"),
            EnvClass::Prod => None,
        }
    }
}

impl fmt::Display for EnvClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EnvClass::Dev => "dev",
            EnvClass::Staging => "staging",
            EnvClass::Prod => "prod",
        })
    }
}

/// Split a recipient list on commas and whitespace, dropping empty entries.
pub fn normalize_recipients<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    raw.iter()
        .flat_map(|entry| {
            entry
                .as_ref()
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct PolicySettings {
    pub default_env: String,
    pub default_recipients: Vec<String>,
    pub subject_prefix: String,
}

/// Something the engine decided, for the caller to log.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyEvent {
    EnvDefaulted { value: String },
    EnvPresent { value: String },
    TransportTagged { hint: &'static str },
    RecipientsFromHeader { value: String },
    RecipientsFromDefault,
    Diverted { from: Vec<String>, to: Vec<String> },
    ToHeaderRemoved { count: usize },
    ProductionPassThrough,
    TaggedChanged,
}

impl fmt::Display for PolicyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyEvent::EnvDefaulted { value } => {
                write!(f, "header '{}' isn't present, set it to '{}'", ENV_HEADER, value)
            }
            PolicyEvent::EnvPresent { value } => {
                write!(f, "header '{}' is present ({})", ENV_HEADER, value)
            }
            PolicyEvent::TransportTagged { hint } => {
                write!(f, "set '{}' to '{}'", TRANSPORT_HEADER, hint)
            }
            PolicyEvent::RecipientsFromHeader { value } => {
                write!(f, "header '{}' is present ({})", RECIPIENTS_HEADER, value)
            }
            PolicyEvent::RecipientsFromDefault => {
                write!(f, "header '{}' isn't usable, using default recipients", RECIPIENTS_HEADER)
            }
            PolicyEvent::Diverted { from, to } => {
                write!(f, "email has been diverted from '{}' to '{}'", from.join(" "), to.join(" "))
            }
            PolicyEvent::ToHeaderRemoved { count } => {
                write!(f, "removed {} 'To' header(s)", count)
            }
            PolicyEvent::ProductionPassThrough => {
                write!(f, "no modification allowed on production environment")
            }
            PolicyEvent::TaggedChanged => write!(f, "tagged email as changed"),
        }
    }
}

#[derive(Debug)]
pub struct PolicyOutcome {
    pub mail: Mail,
    pub class: EnvClass,
    pub events: Vec<PolicyEvent>,
}

/// Run the diversion state machine over `mail`.
///
/// An unrecognised `X-Filter-Env` value fails before anything is mutated.
pub fn apply(mut mail: Mail, settings: &PolicySettings) -> Result<PolicyOutcome> {
    let mut events = Vec::new();

    let present = mail.message.header(ENV_HEADER).map(str::to_string);
    let env_value = match &present {
        Some(value) => value.clone(),
        None => settings.default_env.clone(),
    };
    let class = EnvClass::classify(&env_value)
        .ok_or_else(|| FilterError::InvalidEnvironmentValue(env_value.clone()))?;

    match present {
        Some(value) => events.push(PolicyEvent::EnvPresent { value }),
        None => {
            mail.message.add_header(ENV_HEADER, &env_value);
            events.push(PolicyEvent::EnvDefaulted { value: env_value });
        }
    }

    if let Some(hint) = class.transport_hint() {
        mail.message.add_header(TRANSPORT_HEADER, hint);
        events.push(PolicyEvent::TransportTagged { hint });
    }

    if class.diverts() {
        divert(&mut mail, settings, &mut events)?;
    } else {
        events.push(PolicyEvent::ProductionPassThrough);
    }

    if mail.changed() {
        tag_changes(&mut mail, &settings.subject_prefix);
        events.push(PolicyEvent::TaggedChanged);
    }

    Ok(PolicyOutcome {
        mail,
        class,
        events,
    })
}

fn divert(mail: &mut Mail, settings: &PolicySettings, events: &mut Vec<PolicyEvent>) -> Result<()> {
    let from_header = mail
        .message
        .header(RECIPIENTS_HEADER)
        .map(|value| (value.to_string(), normalize_recipients(&[value])))
        .filter(|(_, list)| !list.is_empty());

    let divert_to = match from_header {
        Some((value, list)) => {
            events.push(PolicyEvent::RecipientsFromHeader { value });
            list
        }
        None => {
            events.push(PolicyEvent::RecipientsFromDefault);
            settings.default_recipients.clone()
        }
    };

    let original = mail.envelope.original_recipients().to_vec();
    mail.envelope.divert(divert_to.clone())?;
    mail.message
        .add_header(ORIGIN_RECIPIENTS_HEADER, &original.join(","));
    events.push(PolicyEvent::Diverted {
        from: original,
        to: divert_to,
    });

    let removed = mail.message.remove_header("To");
    if removed > 0 {
        events.push(PolicyEvent::ToHeaderRemoved { count: removed });
    }

    mail.mark_changed();
    Ok(())
}

fn tag_changes(mail: &mut Mail, prefix: &str) {
    mail.message.add_header(MODIFY_HEADER, "yes");
    let subject = match mail.message.header("Subject") {
        Some(current) => format!("{}{}", prefix, current),
        None => prefix.trim_end_matches([' ', '-']).to_string(),
    };
    mail.message.set_header("Subject", &subject);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identifier;
    use crate::mail::Envelope;
    use crate::message::Message;

    fn settings(default_env: &str, default_recipients: &[&str]) -> PolicySettings {
        PolicySettings {
            default_env: default_env.to_string(),
            default_recipients: default_recipients.iter().map(|r| r.to_string()).collect(),
            subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
        }
    }

    fn mail(raw: &str, recipients: &[&str]) -> Mail {
        let message = Message::parse(raw.as_bytes()).unwrap();
        let envelope = Envelope::new(
            "sender@example.com",
            recipients.iter().map(|r| r.to_string()).collect(),
        );
        Mail::new(Identifier::assign(), message, envelope)
    }

    #[test]
    fn classify_known_values() {
        for v in ["dev", "development", " development "] {
            assert_eq!(EnvClass::classify(v), Some(EnvClass::Dev), "{}", v);
        }
        for v in ["preprod", "preproduction", "staging"] {
            assert_eq!(EnvClass::classify(v), Some(EnvClass::Staging), "{}", v);
        }
        for v in ["prod", "production", "live"] {
            assert_eq!(EnvClass::classify(v), Some(EnvClass::Prod), "{}", v);
        }
        assert_eq!(EnvClass::classify("qa"), None);
        assert_eq!(EnvClass::classify("DEV"), None);
        assert_eq!(EnvClass::classify("Production"), None);
        assert_eq!(EnvClass::classify(""), None);
    }

    #[test]
    fn normalize_splits_commas_and_spaces() {
        assert_eq!(
            normalize_recipients(&["a@example.com, b@example.com,c@example.com  d@example.com"]),
            vec!["a@example.com", "b@example.com", "c@example.com", "d@example.com"]
        );
        assert!(normalize_recipients(&[" , "]).is_empty());
    }

    #[test]
    fn absent_env_header_takes_default_value_and_class() {
        let m = mail("Subject: hi\n\nbody\n", &["alice@example.com"]);
        let out = apply(m, &settings("live", &["qa@example.com"])).unwrap();
        assert_eq!(out.class, EnvClass::Prod);
        assert_eq!(out.mail.message.header(ENV_HEADER), Some("live"));
        assert_eq!(out.events[0], PolicyEvent::EnvDefaulted { value: "live".to_string() });
    }

    #[test]
    fn production_is_a_strict_no_op() {
        let raw = "To: Alice <alice@example.com>\nSubject: Invoice\nX-Filter-Env: production\n\nbody\n";
        let m = mail(raw, &["alice@example.com"]);
        let before = m.message.to_bytes();

        let out = apply(m, &settings("dev", &["qa@example.com"])).unwrap();
        assert_eq!(out.class, EnvClass::Prod);
        assert!(!out.mail.changed());
        assert_eq!(out.mail.envelope.effective_recipients(), ["alice@example.com"]);
        assert_eq!(out.mail.message.header(ORIGIN_RECIPIENTS_HEADER), None);
        assert_eq!(out.mail.message.header(MODIFY_HEADER), None);
        assert_eq!(out.mail.message.header(TRANSPORT_HEADER), None);
        assert_eq!(out.mail.message.header("Subject"), Some("Invoice"));
        assert_eq!(out.mail.message.to_bytes(), before);
    }

    #[test]
    fn dev_with_recipients_header_diverts_to_header_value() {
        let raw = "To: alice@example.com\nSubject: Welcome\nX-Filter-Env: dev\nX-Filter-Recipients: dev1@example.com, dev2@example.com\n\nbody\n";
        let m = mail(raw, &["alice@example.com", "bob@example.com"]);

        let out = apply(m, &settings("production", &["qa@example.com"])).unwrap();
        let msg = &out.mail.message;
        assert_eq!(out.class, EnvClass::Dev);
        assert!(out.mail.changed());
        assert_eq!(
            out.mail.envelope.effective_recipients(),
            ["dev1@example.com", "dev2@example.com"]
        );
        assert_eq!(
            out.mail.envelope.original_recipients(),
            ["alice@example.com", "bob@example.com"]
        );
        assert_eq!(
            msg.header(ORIGIN_RECIPIENTS_HEADER),
            Some("alice@example.com,bob@example.com")
        );
        assert_eq!(msg.header("To"), None);
        assert_eq!(msg.header(TRANSPORT_HEADER), Some("dev"));
        assert_eq!(msg.header(MODIFY_HEADER), Some("yes"));
        assert_eq!(msg.header("Subject"), Some("[This email has been diverted] - Welcome"));
    }

    #[test]
    fn staging_without_recipients_header_uses_defaults() {
        let raw = "To: alice@example.com\nSubject: Hello\nX-Filter-Env: preprod\n\nbody\n";
        let m = mail(raw, &["alice@example.com"]);

        let out = apply(m, &settings("production", &["qa1@example.com", "qa2@example.com"])).unwrap();
        assert_eq!(out.class, EnvClass::Staging);
        assert_eq!(
            out.mail.envelope.effective_recipients(),
            ["qa1@example.com", "qa2@example.com"]
        );
        assert_eq!(out.mail.message.header(TRANSPORT_HEADER), Some("staging"));
        assert!(out.events.contains(&PolicyEvent::RecipientsFromDefault));
    }

    #[test]
    fn blank_recipients_header_falls_back_to_defaults() {
        let raw = "Subject: Hello\nX-Filter-Env: dev\nX-Filter-Recipients: ,\n\nbody\n";
        let out = apply(mail(raw, &["alice@example.com"]), &settings("prod", &["qa@example.com"])).unwrap();
        assert_eq!(out.mail.envelope.effective_recipients(), ["qa@example.com"]);
    }

    #[test]
    fn all_to_headers_are_removed() {
        let raw = "To: a@example.com\nTo: b@example.com\nSubject: x\nX-Filter-Env: dev\n\nbody\n";
        let out = apply(mail(raw, &["a@example.com"]), &settings("prod", &["qa@example.com"])).unwrap();
        assert!(out.mail.message.header_values("to").is_empty());
        assert!(out.events.contains(&PolicyEvent::ToHeaderRemoved { count: 2 }));
    }

    #[test]
    fn missing_subject_gets_bare_marker() {
        let raw = "From: a@example.com\nX-Filter-Env: dev\n\nbody\n";
        let out = apply(mail(raw, &["a@example.com"]), &settings("prod", &["qa@example.com"])).unwrap();
        assert_eq!(
            out.mail.message.header("Subject"),
            Some("[This email has been diverted]")
        );
    }

    #[test]
    fn invalid_env_value_fails_without_mutation() {
        let raw = "Subject: x\nX-Filter-Env: qa\n\nbody\n";
        let m = mail(raw, &["a@example.com"]);
        match apply(m, &settings("prod", &["qa@example.com"])) {
            Err(FilterError::InvalidEnvironmentValue(v)) => assert_eq!(v, "qa"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn env_value_matching_is_case_sensitive() {
        let raw = "To: a@example.com\nSubject: x\nX-Filter-Env: DEV\n\nbody\n";
        let m = mail(raw, &["a@example.com"]);
        match apply(m, &settings("prod", &["qa@example.com"])) {
            Err(FilterError::InvalidEnvironmentValue(v)) => assert_eq!(v, "DEV"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn body_is_never_touched() {
        let raw = "Subject: x\nX-Filter-Env: staging\n\nline 1\nTo: not-a-header@example.com\n";
        let out = apply(mail(raw, &["a@example.com"]), &settings("prod", &["qa@example.com"])).unwrap();
        assert_eq!(out.mail.message.body(), b"line 1\nTo: not-a-header@example.com\n");
    }
}
