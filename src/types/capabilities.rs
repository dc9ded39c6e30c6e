use std::collections::hash_set::Iter;
use std::collections::HashSet;

use imap_proto::types::Capability;

/// From [section 7.2.1 of RFC 3501](https://tools.ietf.org/html/rfc3501#section-7.2.1).
///
/// A list of capabilities that the server supports.
/// The capability list will include the atom "IMAP4rev1".
///
/// A capability name which begins with `AUTH=` indicates that the server supports that particular
/// authentication mechanism. Folder pushing additionally requires the `IDLE` capability from
/// [RFC 2177](https://tools.ietf.org/html/rfc2177).
///
/// Capability names are case-insensitive atoms, so they are stored upper-cased.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities(pub(crate) HashSet<String>);

impl Capabilities {
    pub(crate) fn insert(&mut self, capability: &Capability<'_>) {
        let name = match capability {
            Capability::Imap4rev1 => "IMAP4REV1".to_string(),
            Capability::Auth(mechanism) => format!("AUTH={}", mechanism.to_ascii_uppercase()),
            Capability::Atom(atom) => atom.to_ascii_uppercase(),
        };
        self.0.insert(name);
    }

    /// Check if the server has the given capability.
    pub fn has_str<S: AsRef<str>>(&self, s: S) -> bool {
        self.0.contains(&s.as_ref().to_ascii_uppercase())
    }

    /// Iterate over all the server's capabilities
    pub fn iter(&self) -> Iter<'_, String> {
        self.0.iter()
    }

    /// Returns how many capabilities the server has.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the server purports to have no capabilities.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
