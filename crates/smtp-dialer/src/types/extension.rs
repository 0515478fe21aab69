//! SMTP service extensions advertised in the EHLO reply.

use std::collections::HashMap;

/// Extensions discovered from an EHLO response.
///
/// Keywords are stored upper-cased and map to their raw parameter string,
/// e.g. `AUTH` → `"PLAIN LOGIN CRAM-MD5"`, `STARTTLS` → `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions(HashMap<String, String>);

impl Extensions {
    /// Parses the extension lines of an EHLO reply.
    ///
    /// The first line is the server greeting and is skipped.
    #[must_use]
    pub fn from_ehlo<S: AsRef<str>>(lines: &[S]) -> Self {
        let map = lines
            .iter()
            .skip(1)
            .filter_map(|line| {
                let line = line.as_ref().trim();
                if line.is_empty() {
                    return None;
                }
                let (keyword, params) = line.split_once(' ').unwrap_or((line, ""));
                Some((keyword.to_uppercase(), params.trim().to_string()))
            })
            .collect();
        Self(map)
    }

    /// Looks up an extension by keyword (case-insensitive).
    ///
    /// Returns the parameter string if the extension is advertised.
    #[must_use]
    pub fn get(&self, keyword: &str) -> Option<&str> {
        self.0.get(&keyword.to_uppercase()).map(String::as_str)
    }

    /// Returns true if the extension is advertised.
    #[must_use]
    pub fn contains(&self, keyword: &str) -> bool {
        self.get(keyword).is_some()
    }

    /// Returns the advertised AUTH mechanisms.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<String> {
        self.get("AUTH")
            .map(|params| params.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Returns true if no extension was advertised (plain HELO server).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
