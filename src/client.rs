//! The seam between the engine and a broker protocol client.
//!
//! The engine never speaks the wire protocol itself. It is generic over
//! [`BrokerClient`], which hands out three kinds of handles:
//!
//! - an [`AdminLink`]: a single connection to one broker, used for metadata
//!   reads and topic administration;
//! - a [`MessageReader`]: a positioned consumer for one partition or one
//!   consumer group;
//! - a [`MessageWriter`]: a producer bound to one topic.
//!
//! The engine is single threaded per command, so none of these futures are
//! required to be `Send`.
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{config::Endpoint, topology::PartitionRecord};

/// Ordered message headers.
pub type Headers = Vec<(String, Bytes)>;

/// A failure reported by the broker protocol client.
///
/// Carries the broker error code when the failure came from a response
/// rather than from the transport.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProtocolError {
    code: Option<i16>,
    message: String,
}

impl ProtocolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: i16, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<i16> {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A consumed message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub partition: i32,
    pub offset: i64,
    pub key: Bytes,
    pub value: Bytes,
    pub headers: Headers,
    /// Broker assigned append time.
    pub timestamp: DateTime<Utc>,
}

/// A record to produce.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    pub key: Bytes,
    pub value: Bytes,
    pub headers: Headers,
}

impl Record {
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            headers: vec![],
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// Where a single partition reader starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Seek {
    /// The partition's natural starting point, its earliest retained offset.
    Earliest,
    Offset(i64),
    /// The first offset whose timestamp is at or after the given time.
    Timestamp(DateTime<Utc>),
}

/// What a reader is bound to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReaderSpec {
    Partition {
        topic: String,
        partition: i32,
        seek: Seek,
    },
    /// Every partition of the topic as a member of the named group. The group's
    /// committed offsets are resumed; a new group starts from the earliest.
    Group { topic: String, group: String },
}

impl ReaderSpec {
    pub fn topic(&self) -> &str {
        match self {
            ReaderSpec::Partition { topic, .. } | ReaderSpec::Group { topic, .. } => topic,
        }
    }
}

#[async_trait(?Send)]
pub trait BrokerClient {
    type Link: AdminLink;
    type Reader: MessageReader;
    type Writer: MessageWriter;

    /// Open one connection to one broker. Single attempt.
    async fn dial(&self, endpoint: &Endpoint) -> Result<Self::Link, ProtocolError>;

    /// Open a reader, bootstrapping its own connections from `bootstrap`.
    async fn open_reader(
        &self,
        bootstrap: &[Endpoint],
        spec: ReaderSpec,
    ) -> Result<Self::Reader, ProtocolError>;

    /// Open a writer for `topic`. Keyed writers place records by key hash,
    /// unkeyed writers spread records over the partitions.
    async fn open_writer(
        &self,
        bootstrap: &[Endpoint],
        topic: &str,
        keyed: bool,
    ) -> Result<Self::Writer, ProtocolError>;
}

#[async_trait(?Send)]
pub trait AdminLink {
    /// The endpoint of the cluster's current controller.
    async fn controller(&mut self) -> Result<Endpoint, ProtocolError>;

    /// One record per partition of every topic in the cluster.
    async fn read_partitions(&mut self) -> Result<Vec<PartitionRecord>, ProtocolError>;

    async fn create_topic(
        &mut self,
        name: &str,
        partitions: i32,
        replicas: i16,
    ) -> Result<(), ProtocolError>;

    async fn delete_topic(&mut self, name: &str) -> Result<(), ProtocolError>;

    async fn close(&mut self) -> Result<(), ProtocolError>;
}

#[async_trait(?Send)]
pub trait MessageReader {
    /// Wait for the next message.
    async fn next_message(&mut self) -> Result<Message, ProtocolError>;

    async fn close(&mut self) -> Result<(), ProtocolError>;
}

#[async_trait(?Send)]
pub trait MessageWriter {
    async fn write(&mut self, record: Record) -> Result<(), ProtocolError>;

    async fn close(&mut self) -> Result<(), ProtocolError>;
}
