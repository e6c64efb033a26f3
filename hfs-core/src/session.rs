use std::fmt;

use reqwest::header::{HeaderMap, SET_COOKIE};

/// Credentials for one HFS session.
///
/// A session is an explicit value: every client call takes it by reference and
/// nothing is stored globally. A sync run owns one session for its lifetime.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Session {
    cookies: Vec<(String, String)>,
}

impl Session {
    /// A session without credentials. HFS serves public folders to it.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn from_cookies<I, K, V>(cookies: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            cookies: cookies
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }

    /// Parses a `Cookie` request header value (`a=1; b=2`).
    pub fn from_cookie_header(header: &str) -> Self {
        Self {
            cookies: header.split(';').filter_map(parse_pair).collect(),
        }
    }

    pub(crate) fn from_set_cookie(headers: &HeaderMap) -> Self {
        let cookies = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            // Attributes (Path, HttpOnly, ...) follow the first ';'.
            .filter_map(|value| value.split(';').next())
            .filter_map(parse_pair)
            .collect();
        Self { cookies }
    }

    pub fn is_anonymous(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn cookies(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cookies
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.cookies.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("Session").field("cookies", &names).finish()
    }
}

fn parse_pair(raw: &str) -> Option<(String, String)> {
    let (name, value) = raw.trim().split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}
