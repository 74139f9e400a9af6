//! Topic administration responses.
//!
//! samsa folds broker error codes it does not know into a single unknown code,
//! which loses the policy violation code the engine reports on. The create and
//! delete responses are small, so they are parsed here keeping the raw code and
//! the broker's error message.
//!
//! ### Protocol Def
//! ```text
//! CreateTopics Response (Version: 3) => throttle_time_ms [topics]
//!   topics => name error_code error_message
//!
//! DeleteTopics Response (Version: 3) => throttle_time_ms [responses]
//!   responses => name error_code
//! ```
use bytes::Bytes;
use nom::{
    bytes::complete::take,
    number::complete::{be_i16, be_i32, be_u16},
    IResult,
};
use nombytes::NomBytes;

use crate::client::ProtocolError;

/// Result of one topic in a create or delete response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicOutcome {
    pub name: String,
    pub code: i16,
    pub message: Option<String>,
}

pub fn parse_create_topics(response: Bytes) -> Result<Vec<TopicOutcome>, ProtocolError> {
    parse(response, true, "create topics")
}

pub fn parse_delete_topics(response: Bytes) -> Result<Vec<TopicOutcome>, ProtocolError> {
    parse(response, false, "delete topics")
}

fn parse(response: Bytes, with_message: bool, kind: &str) -> Result<Vec<TopicOutcome>, ProtocolError> {
    tracing::trace!("Parsing {} response {:?}", kind, response);
    let (_, outcomes) = parse_outcomes(NomBytes::new(response), with_message).map_err(|err| {
        tracing::error!("ERROR: Failed parsing {} response {:?}", kind, err);
        ProtocolError::new(format!("unable to parse {kind} response"))
    })?;
    Ok(outcomes)
}

fn parse_outcomes(s: NomBytes, with_message: bool) -> IResult<NomBytes, Vec<TopicOutcome>> {
    let (s, _correlation_id) = be_i32(s)?;
    let (s, _throttle_time_ms) = be_i32(s)?;
    let (mut s, count) = be_i32(s)?;

    let count = usize::try_from(count).unwrap_or(0);
    let mut outcomes = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let (rest, name) = parse_string(s)?;
        let (rest, code) = be_i16(rest)?;
        let (rest, message) = if with_message {
            parse_nullable_string(rest)?
        } else {
            (rest, None)
        };

        outcomes.push(TopicOutcome {
            name: String::from_utf8_lossy(&name).into_owned(),
            code,
            message: message.map(|message| String::from_utf8_lossy(&message).into_owned()),
        });
        s = rest;
    }

    Ok((s, outcomes))
}

fn parse_string(s: NomBytes) -> IResult<NomBytes, Bytes> {
    let (s, length) = be_u16(s)?;
    let (s, string) = take(length)(s)?;
    Ok((s, string.into_bytes()))
}

fn parse_nullable_string(s: NomBytes) -> IResult<NomBytes, Option<Bytes>> {
    let (s, length) = be_i16(s)?;
    if length < 0 {
        return Ok((s, None));
    }
    let (s, string) = take(length as u16)(s)?;
    Ok((s, Some(string.into_bytes())))
}

/// Turn the outcome for `topic` into a result.
pub fn check(outcomes: &[TopicOutcome], topic: &str) -> Result<(), ProtocolError> {
    let outcome = outcomes
        .iter()
        .find(|outcome| outcome.name == topic)
        .ok_or_else(|| ProtocolError::new(format!("broker response does not mention topic '{topic}'")))?;

    if outcome.code == 0 {
        return Ok(());
    }

    let detail = outcome
        .message
        .as_deref()
        .filter(|message| !message.is_empty())
        .unwrap_or(topic);
    Err(ProtocolError::with_code(
        outcome.code,
        format!("[{}] {}: {}", outcome.code, title(outcome.code), detail),
    ))
}

/// Human readable name of the broker error codes topic administration can
/// return.
pub fn title(code: i16) -> &'static str {
    match code {
        3 => "Unknown Topic Or Partition",
        7 => "Request Timed Out",
        17 => "Invalid Topic",
        29 => "Topic Authorization Failed",
        31 => "Cluster Authorization Failed",
        36 => "Topic Already Exists",
        37 => "Invalid Partitions",
        38 => "Invalid Replication Factor",
        39 => "Invalid Replica Assignment",
        40 => "Invalid Configuration",
        41 => "Not Controller",
        42 => "Invalid Request",
        44 => "Policy Violation",
        73 => "Topic Deletion Disabled",
        _ => "Unexpected Server Error",
    }
}
