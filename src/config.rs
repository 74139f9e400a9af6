//! Connection settings and the small parsers shared by the command surface.
//!
//! Endpoints and header lists are parsed with `nom`, times with `chrono`.
use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use nom::{
    branch::alt,
    bytes::complete::{take_till, take_till1},
    character::complete::{char, digit1},
    combinator::{all_consuming, map, map_res},
    multi::separated_list1,
    sequence::{delimited, separated_pair},
    IResult,
};

use crate::error::{Error, Result};

/// Human readable time format used for every time value on the command line.
pub const DATE_FORMAT: &str = "%d-%m-%Y %H:%M:%S";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_CLIENT_ID: &str = "klient";

/// Address of a broker, as `host:port`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (_, endpoint) = all_consuming(parse_endpoint)(s.trim())
            .map_err(|_| Error::invalid(format!("'{s}' is not a valid host:port address")))?;
        Ok(endpoint)
    }
}

fn parse_endpoint(s: &str) -> IResult<&str, Endpoint> {
    let host = alt((
        delimited(char('['), take_till1(|c| c == ']'), char(']')),
        take_till1(|c| c == ':'),
    ));
    let port = map_res(digit1, str::parse::<u16>);
    map(separated_pair(host, char(':'), port), |(host, port)| {
        Endpoint::new(host, port)
    })(s)
}

/// Parse a comma separated bootstrap list. Empty entries are skipped but at
/// least one address is required.
pub fn parse_bootstrappers(s: &str) -> Result<Vec<Endpoint>> {
    let endpoints = s
        .split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(Endpoint::from_str)
        .collect::<Result<Vec<_>>>()?;

    if endpoints.is_empty() {
        return Err(Error::invalid("at least one bootstrap address is required"));
    }
    Ok(endpoints)
}

/// Validate the I/O delimiter. It must be a single byte; the escapes `\n`,
/// `\t` and `\0` are accepted for shells that cannot pass them literally.
pub fn parse_delimiter(s: &str) -> Result<u8> {
    match s.as_bytes() {
        [byte] => Ok(*byte),
        b"\\n" => Ok(b'\n'),
        b"\\t" => Ok(b'\t'),
        b"\\0" => Ok(0),
        _ => Err(Error::invalid(
            "delimiter must be a single ascii character",
        )),
    }
}

/// Parse a `DD-MM-YYYY HH:MM:SS` value as UTC.
pub fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), DATE_FORMAT)
        .map(|time| time.and_utc())
        .map_err(|err| {
            Error::invalid(format!(
                "unable to parse time '{s}': {err}. expected format 'DD-MM-YYYY HH:MM:SS'"
            ))
        })
}

pub fn format_time(time: &DateTime<Utc>) -> String {
    time.format(DATE_FORMAT).to_string()
}

/// Parse a CSV list of `key=value` message headers. An empty list is allowed.
pub fn parse_headers(s: &str) -> Result<Vec<(String, Bytes)>> {
    if s.trim().is_empty() {
        return Ok(vec![]);
    }
    let (_, pairs) = all_consuming(separated_list1(char(','), parse_header))(s).map_err(|_| {
        Error::invalid(format!(
            "'{s}' is not a valid header list. expected 'key=value[,key=value...]'"
        ))
    })?;

    Ok(pairs
        .into_iter()
        .map(|(key, value)| (key.trim().to_owned(), Bytes::copy_from_slice(value.as_bytes())))
        .collect())
}

fn parse_header(s: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(
        take_till1(|c| c == '=' || c == ','),
        char('='),
        take_till(|c| c == ','),
    )(s)
}

/// Authentication and transport parameters applied to every dial.
#[derive(Clone)]
pub struct ConnectConfig {
    /// API key or username. SASL is used whenever this is non-empty.
    pub api_key: String,
    pub api_secret: String,
    pub tls: bool,
    pub skip_tls_verify: bool,
    /// Use SCRAM instead of PLAIN for SASL.
    pub scram: bool,
    pub timeout: Duration,
    pub tls_ca: Option<PathBuf>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub client_id: String,
}

impl ConnectConfig {
    pub fn sasl_enabled(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn timeout_ms(&self) -> i32 {
        i32::try_from(self.timeout.as_millis()).unwrap_or(i32::MAX)
    }
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            tls: false,
            skip_tls_verify: false,
            scram: false,
            timeout: DEFAULT_TIMEOUT,
            tls_ca: None,
            tls_cert: None,
            tls_key: None,
            client_id: DEFAULT_CLIENT_ID.to_owned(),
        }
    }
}

impl fmt::Debug for ConnectConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectConfig")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("tls", &self.tls)
            .field("skip_tls_verify", &self.skip_tls_verify)
            .field("scram", &self.scram)
            .field("timeout", &self.timeout)
            .field("tls_ca", &self.tls_ca)
            .field("tls_cert", &self.tls_cert)
            .field("tls_key", &self.tls_key)
            .field("client_id", &self.client_id)
            .finish()
    }
}
