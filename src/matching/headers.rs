//! Header allow-list for fuzzy matching.

use serde::{Deserialize, Serialize};

/// Headers compared by the fuzzy preset.
///
/// The shipped list leaves out Accept, Connection, Cookie and User-Agent;
/// those vary between otherwise identical page loads. Add them through
/// configuration if a recording needs them.
pub const SHIPPED_HEADERS: [&str; 4] = ["Accept-Encoding", "Accept-Language", "Host", "Referer"];

/// Ordered set of header names; comparison is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderAllowList {
    names: Vec<String>,
}

impl HeaderAllowList {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Self { names: Vec::new() };
        for name in names {
            let name = name.into();
            if !list.contains(&name) {
                list.names.push(name);
            }
        }
        list
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }
}

impl Default for HeaderAllowList {
    fn default() -> Self {
        Self::new(SHIPPED_HEADERS)
    }
}

/// CGI variable carrying a request header: `Accept-Encoding` → `HTTP_ACCEPT_ENCODING`.
pub fn cgi_variable(header: &str) -> String {
    format!("HTTP_{}", header.to_ascii_uppercase().replace('-', "_"))
}

/// Header named by a CGI variable: `HTTP_ACCEPT_ENCODING` → `Accept-Encoding`.
pub fn header_from_cgi(variable: &str) -> Option<String> {
    let raw = variable.strip_prefix("HTTP_")?;
    if raw.is_empty() {
        return None;
    }
    let words: Vec<String> = raw
        .split('_')
        .map(|word| {
            let lower = word.to_ascii_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    Some(words.join("-"))
}
