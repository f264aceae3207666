//! The request being replayed, as handed over by a CGI-style web server.
//!
//! | variable          | meaning                                   |
//! |-------------------|-------------------------------------------|
//! | `REQUEST_METHOD`  | method                                    |
//! | `REQUEST_URI`     | target as sent, query string included     |
//! | `SCRIPT_URI`      | URL of the resource, no query (optional)  |
//! | `SERVER_PROTOCOL` | `HTTP/1.1` etc.                           |
//! | `HTTP_*`          | request headers                           |

use url::Url;

use crate::http::message::{Header, HttpMessage};
use crate::matching::headers::header_from_cgi;
use crate::replay::ReplayError;

/// One incoming request, independent of where its attributes came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub method: String,
    pub uri: String,
    /// Path from `SCRIPT_URI`, when given.
    pub script_path: Option<String>,
    pub protocol: String,
    pub headers: Vec<Header>,
}

impl RequestContext {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, ReplayError> {
        Self::from_vars(std::env::vars_os().filter_map(|(name, value)| {
            Some((name.into_string().ok()?, value.into_string().ok()?))
        }))
    }

    /// Build from `(name, value)` pairs. Headers come out sorted by
    /// variable name.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ReplayError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut method = None;
        let mut uri = None;
        let mut script_uri = None;
        let mut protocol = None;
        let mut headers = Vec::new();

        for (name, value) in vars {
            let name = name.into();
            let value = value.into();
            match name.as_str() {
                "REQUEST_METHOD" => method = Some(value),
                "REQUEST_URI" => uri = Some(value),
                "SCRIPT_URI" => script_uri = Some(value),
                "SERVER_PROTOCOL" => protocol = Some(value),
                _ => {
                    if let Some(header) = header_from_cgi(&name) {
                        headers.push((name, Header::new(header, value)));
                    }
                }
            }
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let script_path = script_uri.as_deref().map(script_path).transpose()?;

        Ok(Self {
            method: method.ok_or(ReplayError::MissingVariable("REQUEST_METHOD"))?,
            uri: uri.ok_or(ReplayError::MissingVariable("REQUEST_URI"))?,
            script_path,
            protocol: protocol.ok_or(ReplayError::MissingVariable("SERVER_PROTOCOL"))?,
            headers: headers.into_iter().map(|(_, header)| header).collect(),
        })
    }

    /// Query string of `REQUEST_URI`, without the `?`.
    pub fn query(&self) -> Option<&str> {
        self.uri.split_once('?').map(|(_, query)| query)
    }

    /// The resource without a query string: the `SCRIPT_URI` path when
    /// known, otherwise `REQUEST_URI` up to `?`. Only used to spot a
    /// recording that differs by query string alone.
    pub fn resource(&self) -> &str {
        match &self.script_path {
            Some(path) => path,
            None => self.uri.split('?').next().unwrap_or_default(),
        }
    }

    /// The request as an HTTP message without a body. The target is
    /// `REQUEST_URI` exactly as sent.
    pub fn to_message(&self) -> HttpMessage {
        HttpMessage::new(
            format!("{} {} {}", self.method, self.uri, self.protocol),
            self.headers.clone(),
            Vec::new(),
        )
    }
}

fn script_path(script_uri: &str) -> Result<String, ReplayError> {
    if script_uri.starts_with('/') {
        return Ok(script_uri.split('?').next().unwrap_or_default().to_string());
    }
    Url::parse(script_uri)
        .map(|url| url.path().to_string())
        .map_err(|_| ReplayError::InvalidVariable {
            name: "SCRIPT_URI",
            value: script_uri.to_string(),
        })
}
