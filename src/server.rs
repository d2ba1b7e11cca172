//! ComfyUI servers.
//!
//! The fleet is a fixed, ordered list of servers read once at startup. A server's position in
//! that list is its index for manual triggers, so the order of the servers file matters.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use colored::*;
use colourado::Color;
use serde::{Deserialize, Serialize};
use void::Void;

use crate::error::CacheWardenError;
use crate::serde::string_or_mapping;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Server {
    /// Base URL, e.g. `http://10.0.0.7:8188`, without a trailing slash.
    pub url: String,
    /// Optional human-friendly name shown in logs and reports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Server {
    pub fn new(url: &str) -> Result<Self, CacheWardenError> {
        let trimmed = url.trim().trim_end_matches('/');
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(CacheWardenError::InvalidServer(url.to_string()));
        }
        // A bare scheme is not an address.
        if trimmed.ends_with("://") {
            return Err(CacheWardenError::InvalidServer(url.to_string()));
        }
        Ok(Self {
            url: trimmed.to_string(),
            name: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The name if one was given, otherwise the URL.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }

    /// Joins an absolute API path onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.url, path)
    }

    /// For pretty-printing the server in CLI reports.
    /// Surrounds with brackets and colors it with the given palette color.
    pub fn prettify(&self, color: Color) -> ColoredString {
        let r = (color.red * 255.0) as u8;
        let g = (color.green * 255.0) as u8;
        let b = (color.blue * 255.0) as u8;
        format!("{}", self).truecolor(r, g, b)
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "[{} ({})]", name, self.url),
            None => write!(f, "[{}]", self.url),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServerSpec(#[serde(deserialize_with = "string_or_mapping")] ServerSpecInner);

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerSpecInner {
    url: String,
    #[serde(default)]
    name: Option<String>,
}

impl FromStr for ServerSpecInner {
    type Err = Void;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            url: s.to_string(),
            name: None,
        })
    }
}

/// Parses a servers document: a YAML list of bare URLs or `{url, name}` mappings.
pub fn parse_servers(yaml: &str) -> Result<Vec<Server>, CacheWardenError> {
    let specs: Option<Vec<ServerSpec>> = serde_yaml::from_str(yaml)?;
    specs
        .unwrap_or_default()
        .into_iter()
        .map(|ServerSpec(spec)| {
            let server = Server::new(&spec.url)?;
            Ok(match spec.name {
                Some(name) => server.with_name(name),
                None => server,
            })
        })
        .collect()
}

/// Reads the servers file, then appends the servers given inline on the command line.
///
/// A missing servers file is not an error when inline servers were given. An empty fleet is.
pub fn get_servers(
    servers_file: &Path,
    inline: &[String],
) -> Result<Vec<Server>, CacheWardenError> {
    let mut servers = match std::fs::read_to_string(servers_file) {
        Ok(contents) => parse_servers(&contents)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !inline.is_empty() => vec![],
        Err(e) => return Err(e.into()),
    };
    for url in inline {
        servers.push(Server::new(url)?);
    }
    if servers.is_empty() {
        return Err(CacheWardenError::NoServers);
    }
    tracing::info!(count = servers.len(), "servers configured");
    Ok(servers)
}
