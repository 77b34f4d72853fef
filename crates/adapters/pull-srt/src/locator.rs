//! SRT source locator parsing
//!
//! Resolves a locator of the form
//! `srt://host[:port][?key=value[&key=value...]]` into the parameters
//! needed to open a caller-mode SRT connection.
//!
//! # Parameters
//!
//! | Key | Description |
//! |-----|-------------|
//! | `streamid` | Stream id sent during the handshake |
//! | `latency` | Latency budget override in milliseconds |
//! | `passphrase` | Shared secret enabling encryption |
//!
//! Parsing is lenient: a parameter without `=` and unknown keys are ignored
//! so that extra options meant for other tools never abort a connection.

use std::fmt;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use url::{Host, Url};

use crate::config::SrtDefaults;
use crate::error::{PullError, Result};

/// Expected locator scheme
pub const SRT_SCHEME: &str = "srt";

/// Parsed source locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocator {
    /// Scheme, lowercased
    pub scheme: String,

    /// Host name or literal address (IPv6 without brackets)
    pub host: String,

    /// Explicit port, if the locator carried one
    pub port: Option<u16>,

    /// Stream id (`streamid=`)
    pub stream_id: Option<String>,

    /// Shared secret (`passphrase=`)
    pub passphrase: Option<String>,

    /// Latency override in milliseconds (`latency=`)
    pub latency_ms: Option<u32>,
}

impl SourceLocator {
    /// Parse a locator string
    ///
    /// # Errors
    ///
    /// Returns [`PullError::InvalidLocator`] when the scheme is not `srt` or
    /// the host cannot be parsed.
    pub fn parse(locator: &str) -> Result<Self> {
        // SRT access-control stream ids start with `#!::`. Keep a bare `#`
        // inside the query instead of letting it start a fragment.
        let escaped = locator.trim().replace('#', "%23");

        let url = Url::parse(&escaped)
            .map_err(|e| PullError::invalid_locator(locator, e.to_string()))?;

        if url.scheme() != SRT_SCHEME {
            return Err(PullError::invalid_locator(
                locator,
                format!("unsupported scheme '{}', expected {}", url.scheme(), SRT_SCHEME),
            ));
        }

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(PullError::invalid_locator(locator, "missing host")),
        };

        let mut parsed = Self {
            scheme: url.scheme().to_string(),
            host,
            // Port 0 means "use the default"
            port: url.port().filter(|port| *port != 0),
            stream_id: None,
            passphrase: None,
            latency_ms: None,
        };

        if let Some(query) = url.query() {
            parsed.apply_query(query);
        }

        Ok(parsed)
    }

    fn apply_query(&mut self, query: &str) {
        for param in query.split('&') {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            // Percent-decoding only: `+` is literal in stream ids and secrets
            let value = percent_decode_str(value).decode_utf8_lossy();

            match key {
                "streamid" => self.stream_id = non_empty(value.into_owned()),
                "passphrase" => self.passphrase = non_empty(value.into_owned()),
                "latency" => match value.trim().parse::<u32>() {
                    Ok(latency) => self.latency_ms = Some(latency),
                    Err(_) => {
                        tracing::warn!(
                            host = %self.host,
                            value = %value,
                            "Ignoring non-integer latency parameter"
                        );
                    }
                },
                _ => {
                    // Ignore unknown keys (mode, transtype, ...)
                }
            }
        }
    }

    /// Port to connect to, falling back to the configured default
    pub fn port_or(&self, default_port: u16) -> u16 {
        self.port.unwrap_or(default_port)
    }

    /// Merge locator overrides over adapter defaults
    pub fn connection_params(&self, defaults: &SrtDefaults) -> ConnectionParams {
        ConnectionParams {
            host: self.host.clone(),
            port: self.port_or(defaults.port),
            stream_id: self.stream_id.clone(),
            passphrase: self.passphrase.clone(),
            latency: Duration::from_millis(self.latency_ms.unwrap_or(defaults.latency_ms) as u64),
            connect_timeout: Duration::from_millis(defaults.connect_timeout_ms),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

impl fmt::Display for SourceLocator {
    /// Renders the locator for logs; the passphrase is redacted
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]", self.scheme, self.host)?;
        } else {
            write!(f, "{}://{}", self.scheme, self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }

        let mut separator = '?';
        if let Some(stream_id) = &self.stream_id {
            write!(f, "{}streamid={}", separator, stream_id)?;
            separator = '&';
        }
        if let Some(latency) = self.latency_ms {
            write!(f, "{}latency={}", separator, latency)?;
            separator = '&';
        }
        if self.passphrase.is_some() {
            write!(f, "{}passphrase=***", separator)?;
        }
        Ok(())
    }
}

/// Parameters for one connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub stream_id: Option<String>,
    pub passphrase: Option<String>,
    pub latency: Duration,
    pub connect_timeout: Duration,
}

/// Ordered list of candidate locators with a current selection
///
/// Entries are kept as given and resolved on every connection attempt, so
/// a malformed entry fails the attempt that selects it rather than the
/// session construction.
#[derive(Debug, Clone)]
pub struct LocatorList {
    entries: Vec<String>,
    current: usize,
}

impl LocatorList {
    pub fn new(entries: Vec<String>) -> Self {
        Self {
            entries,
            current: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the current locator
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Current locator as given
    pub fn current(&self) -> Option<&str> {
        self.entries.get(self.current).map(String::as_str)
    }

    /// Make `index` the current locator
    pub fn select(&mut self, index: usize) {
        if index < self.entries.len() {
            self.current = index;
        }
    }

    /// Candidates in try order: the current one first, then the rest, wrapping
    pub fn candidates(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        let len = self.entries.len();
        (0..len).map(move |offset| {
            let index = (self.current + offset) % len;
            (index, self.entries[index].as_str())
        })
    }
}
