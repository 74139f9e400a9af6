//! Bounded consumption of a topic.
//!
//! # Reader Module
//!
//! Four strategies share one shape: open a reader, establish its starting
//! position, then pull messages one at a time until the continuation predicate
//! rejects one, the caller asks to stop, or the reader fails.
//!
//! | Strategy | Scope | Start | Ends |
//! |---|---|---|---|
//! | [`ReadStrategy::OffsetRange`] | one partition | `from`, or earliest when `0` | after offset `to` |
//! | [`ReadStrategy::TimeRange`] | one partition | first offset at or after `from` | past time `to` |
//! | [`ReadStrategy::Group`] | all partitions | the group's committed offsets | caller or error |
//! | [`ReadStrategy::Exclusive`] | all partitions | offset 0, under a fresh group | caller or error |
//!
//! Without an upper bound, range reads tail the partition until the caller
//! stops.
//!
//! A failure from the underlying reader is reported once as a terminal
//! [`Error::ReadTerminated`] and nothing follows it.
//!
//! ### Example
//! ```rust,no_run
//! # use klient::prelude::*;
//! # async fn run(session: &Session<SamsaClient>) -> klient::Result<()> {
//! use futures::StreamExt;
//!
//! let read = session.open_read("purchases", ReadStrategy::Exclusive).await?;
//! println!("reading as {:?}", read.group());
//!
//! let stream = read.into_stream();
//! futures::pin_mut!(stream);
//! while let Some(result) = stream.next().await {
//!     let message = result?;
//!     println!("{}/{}", message.partition, message.offset);
//! }
//! # Ok(())
//! # }
//! ```
use std::{fmt, future::Future};

use chrono::{DateTime, Utc};
use futures::Stream;
use rand::Rng;

use crate::{
    client::{BrokerClient, Message, MessageReader, ReaderSpec, Seek},
    config::format_time,
    error::{Error, Result},
    session::Session,
};

pub type ReadResult = Result<Message>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadStrategy {
    /// Offsets `from..=to` of one partition. `from == 0` starts at the
    /// partition's earliest offset; `to == None` reads indefinitely.
    OffsetRange {
        partition: i32,
        from: i64,
        to: Option<i64>,
    },
    /// Messages of one partition stamped between `from` and `to` inclusive.
    TimeRange {
        partition: i32,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
    },
    /// All partitions as a member of a named, durable consumer group.
    Group { group: String },
    /// All partitions under a group name synthesized for this read alone.
    Exclusive,
}

impl fmt::Display for ReadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadStrategy::OffsetRange {
                partition,
                from,
                to,
            } => {
                write!(f, "partition {partition} offsets {from} to ")?;
                match to {
                    Some(to) => write!(f, "{to}"),
                    None => write!(f, "end"),
                }
            }
            ReadStrategy::TimeRange {
                partition,
                from,
                to,
            } => {
                write!(f, "partition {partition} time {} to ", format_time(from))?;
                match to {
                    Some(to) => write!(f, "{}", format_time(to)),
                    None => write!(f, "end"),
                }
            }
            ReadStrategy::Group { group } => write!(f, "consumer group {group}"),
            ReadStrategy::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// Upper bound a message must respect for the read to continue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Bound {
    Open,
    Offset(i64),
    Time(DateTime<Utc>),
}

impl Bound {
    fn of(strategy: &ReadStrategy) -> Self {
        match strategy {
            ReadStrategy::OffsetRange { to: Some(to), .. } => Bound::Offset(*to),
            ReadStrategy::TimeRange { to: Some(to), .. } => Bound::Time(*to),
            _ => Bound::Open,
        }
    }

    fn accepts(&self, message: &Message) -> bool {
        match self {
            Bound::Open => true,
            Bound::Offset(to) => message.offset <= *to,
            Bound::Time(to) => message.timestamp <= *to,
        }
    }

    /// Whether nothing after `message` can be accepted.
    fn reached(&self, message: &Message) -> bool {
        matches!(self, Bound::Offset(to) if message.offset >= *to)
    }
}

/// Group name for an exclusive read: unique per invocation, so this reader is
/// the group's only member and is assigned every partition.
pub fn exclusive_group_name() -> String {
    let suffix = rand::thread_rng().gen_range(0..i64::MAX);
    format!("klient-{}-{}-{}", hostname(), username(), suffix)
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|name| name.trim().to_owned())
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_owned())
}

fn username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}

/// An open read, positioned and bounded.
pub struct BoundedRead<R> {
    reader: R,
    topic: String,
    strategy: ReadStrategy,
    group: Option<String>,
    bound: Bound,
    /// Messages stamped before this are skipped until one reaches it.
    start: Option<DateTime<Utc>>,
    done: bool,
}

impl<R: MessageReader> BoundedRead<R> {
    pub fn new(reader: R, topic: impl Into<String>, strategy: ReadStrategy, group: Option<String>) -> Self {
        let bound = Bound::of(&strategy);
        let start = match &strategy {
            ReadStrategy::TimeRange { from, .. } => Some(*from),
            _ => None,
        };
        Self {
            reader,
            topic: topic.into(),
            strategy,
            group,
            bound,
            start,
            done: false,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn strategy(&self) -> &ReadStrategy {
        &self.strategy
    }

    /// Consumer group the read belongs to, if any.
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Pull the next message. `None` once the bound is passed or after a
    /// terminal error has been returned.
    pub async fn next(&mut self) -> Option<ReadResult> {
        if self.done {
            return None;
        }

        loop {
            match self.reader.next_message().await {
                Ok(message) if self.start.is_some_and(|from| message.timestamp < from) => {
                    tracing::trace!(
                        "Skipping offset {} of {}: stamped before the start of the read",
                        message.offset,
                        self.topic
                    );
                }
                Ok(message) => {
                    self.start = None;
                    return self.deliver(message);
                }
                Err(source) => {
                    self.done = true;
                    return Some(Err(Error::ReadTerminated {
                        topic: self.topic.clone(),
                        context: self.strategy.to_string(),
                        source,
                    }));
                }
            }
        }
    }

    fn deliver(&mut self, message: Message) -> Option<ReadResult> {
        if !self.bound.accepts(&message) {
            tracing::debug!(
                "Stopping read of {} at partition {} offset {}: past {}",
                self.topic,
                message.partition,
                message.offset,
                self.strategy
            );
            self.done = true;
            return None;
        }
        if self.bound.reached(&message) {
            self.done = true;
        }
        Some(Ok(message))
    }

    /// Close the underlying reader. Failures are logged.
    pub async fn close(mut self) {
        if let Err(err) = self.reader.close().await {
            tracing::warn!("error closing reader for topic {}: {}", self.topic, err);
        }
    }

    /// Hand each message to `callback` until it returns `false` or the read
    /// ends. The reader is closed on every path. Returns the number of
    /// messages delivered.
    pub async fn read_with<F>(self, callback: F) -> Result<usize>
    where
        F: FnMut(Message) -> bool,
    {
        self.read_until(std::future::pending(), callback).await
    }

    /// Like [`read_with`](Self::read_with), but also stops once `stop`
    /// completes, such as on an interrupt. A message being pulled when
    /// `stop` fires is abandoned. The reader is closed on every path.
    pub async fn read_until<S, F>(mut self, stop: S, mut callback: F) -> Result<usize>
    where
        S: Future<Output = ()>,
        F: FnMut(Message) -> bool,
    {
        tokio::pin!(stop);
        let mut delivered = 0;
        let outcome = loop {
            let next = tokio::select! {
                next = self.next() => Some(next),
                _ = &mut stop => None,
            };
            let Some(next) = next else {
                tracing::info!("read of topic '{}' interrupted", self.topic);
                break Ok(delivered);
            };
            match next {
                None => break Ok(delivered),
                Some(Err(err)) => break Err(err),
                Some(Ok(message)) => {
                    delivered += 1;
                    if !callback(message) {
                        break Ok(delivered);
                    }
                }
            }
        };

        self.close().await;
        outcome
    }

    /// Lazily yield messages as a stream. The reader is closed when the
    /// sequence ends on its own; dropping the stream early drops the reader.
    pub fn into_stream(self) -> impl Stream<Item = ReadResult> {
        async_stream::stream! {
            let mut read = self;
            while let Some(result) = read.next().await {
                yield result;
            }
            read.close().await;
        }
    }
}

impl<C: BrokerClient> Session<C> {
    /// Open a bounded read of `topic`.
    pub async fn open_read(
        &self,
        topic: &str,
        strategy: ReadStrategy,
    ) -> Result<BoundedRead<C::Reader>> {
        if topic.is_empty() {
            return Err(Error::invalid("topic name is required"));
        }

        let (spec, group) = match &strategy {
            ReadStrategy::OffsetRange {
                partition, from, ..
            } => {
                if *from < 0 {
                    return Err(Error::invalid(format!(
                        "offset to read from must not be negative, got {from}"
                    )));
                }
                let seek = if *from > 0 {
                    Seek::Offset(*from)
                } else {
                    Seek::Earliest
                };
                (partition_spec(topic, *partition, seek), None)
            }
            ReadStrategy::TimeRange {
                partition, from, ..
            } => (partition_spec(topic, *partition, Seek::Timestamp(*from)), None),
            ReadStrategy::Group { group } => {
                if group.is_empty() {
                    return Err(Error::invalid("group id is required"));
                }
                (group_spec(topic, group), Some(group.clone()))
            }
            ReadStrategy::Exclusive => {
                let group = exclusive_group_name();
                (group_spec(topic, &group), Some(group))
            }
        };

        tracing::info!("reading from topic '{}': {}", topic, strategy);
        let reader = self
            .client()
            .open_reader(self.bootstrap(), spec)
            .await
            .map_err(|source| Error::ReadTerminated {
                topic: topic.to_owned(),
                context: strategy.to_string(),
                source,
            })?;

        Ok(BoundedRead::new(reader, topic, strategy, group))
    }

    /// Open a bounded read and hand each message to `callback`. See
    /// [`BoundedRead::read_with`].
    pub async fn read<F>(&self, topic: &str, strategy: ReadStrategy, callback: F) -> Result<usize>
    where
        F: FnMut(Message) -> bool,
    {
        self.open_read(topic, strategy).await?.read_with(callback).await
    }
}

fn partition_spec(topic: &str, partition: i32, seek: Seek) -> ReaderSpec {
    ReaderSpec::Partition {
        topic: topic.to_owned(),
        partition,
        seek,
    }
}

fn group_spec(topic: &str, group: &str) -> ReaderSpec {
    ReaderSpec::Group {
        topic: topic.to_owned(),
        group: group.to_owned(),
    }
}
