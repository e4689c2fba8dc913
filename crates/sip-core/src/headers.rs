use std::slice::Iter;

use smol_str::SmolStr;

/// A single header field as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: SmolStr,
    pub value: SmolStr,
}

/// Ordered header collection. Names compare ignoring ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header, keeping any existing entries with the same name.
    pub fn push(&mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        self.0.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Replaces every header named `name` with a single entry.
    ///
    /// The new entry takes the position of the first removed header so
    /// rewriting `CSeq` or `Via` keeps the message layout stable.
    pub fn set(&mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter().position(|h| h.name.eq_ignore_ascii_case(&name)) {
            Some(index) => {
                self.0[index] = Header { name: name.clone(), value };
                let mut seen = 0usize;
                self.0.retain(|h| {
                    if h.name.eq_ignore_ascii_case(&name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.0.push(Header { name, value }),
        }
    }

    /// Removes every header named `name`, returning how many were dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.0.len();
        self.0.retain(|h| !h.name.eq_ignore_ascii_case(name));
        before - self.0.len()
    }

    /// Appends every header from `other` in order.
    pub fn extend(&mut self, other: Headers) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> Iter<'_, Header> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|h| h.name.eq_ignore_ascii_case(name))
    }

    /// First value stored under exactly `name` (ignoring case).
    ///
    /// Compact forms are not resolved here; use `sip_parse::header` when the
    /// message came off the wire.
    pub fn get(&self, name: &str) -> Option<&SmolStr> {
        self.0
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| &h.value)
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a SmolStr> + 'a {
        self.0
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| &h.value)
    }
}

impl FromIterator<(SmolStr, SmolStr)> for Headers {
    fn from_iter<T: IntoIterator<Item = (SmolStr, SmolStr)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| Header { name, value })
                .collect(),
        )
    }
}

impl IntoIterator for Headers {
    type Item = Header;
    type IntoIter = std::vec::IntoIter<Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_all_duplicates_in_place() {
        let mut headers = Headers::new();
        headers.push("Via", "SIP/2.0/UDP a");
        headers.push("CSeq", "1 INVITE");
        headers.push("cseq", "7 INVITE");
        headers.push("Call-ID", "abc");

        headers.set("CSeq", "2 INVITE");

        let names: Vec<_> = headers.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["Via", "CSeq", "Call-ID"]);
        assert_eq!(headers.get("cseq").unwrap(), "2 INVITE");
    }

    #[test]
    fn set_appends_when_missing() {
        let mut headers = Headers::new();
        headers.set("Min-SE", "90");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("min-se").unwrap(), "90");
    }

    #[test]
    fn remove_is_case_insensitive() {
        let mut headers = Headers::new();
        headers.push("Require", "timer");
        headers.push("REQUIRE", "100rel");
        headers.push("Supported", "timer");
        assert_eq!(headers.remove("require"), 2);
        assert!(!headers.contains("Require"));
        assert!(headers.contains("supported"));
    }
}
