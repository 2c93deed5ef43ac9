use std::fmt;

use uuid::Uuid;

pub const IDENTIFIER_LEN: usize = 10;

/// Per-message tracing token, also used as the snapshot filename stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    pub fn assign() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(IDENTIFIER_LEN);
        Identifier(id.to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn identifier_is_ten_uppercase_hex_chars() {
        let id = Identifier::assign();
        assert_eq!(id.as_str().len(), IDENTIFIER_LEN);
        assert!(id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn ten_thousand_identifiers_do_not_collide() {
        let ids: HashSet<Identifier> = (0..10_000).map(|_| Identifier::assign()).collect();
        assert_eq!(ids.len(), 10_000);
    }
}
