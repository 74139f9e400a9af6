//! In-memory cluster implementing the broker client traits, plus helpers for
//! tests against a live cluster.
#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    env,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use klient::{driver::Partitioner, prelude::*};
use std::result::Result;

const KAFKA_BROKERS: &str = "KAFKA_BROKERS";

pub const CONTROLLER_ID: i32 = 1;

/// Bootstrap addresses for a live cluster, or `None` when `KAFKA_BROKERS` is
/// not set and the test should be skipped.
pub fn get_brokers() -> Option<Vec<Endpoint>> {
    match env::var(KAFKA_BROKERS) {
        Ok(brokers) => Some(
            config::parse_bootstrappers(&brokers).expect("KAFKA_BROKERS is not well formed"),
        ),
        Err(_) => {
            tracing::warn!("Skipping test because no {} is set", KAFKA_BROKERS);
            None
        }
    }
}

/// Time of the first message appended to a fake partition. Each following
/// message is one second later.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

#[derive(Debug, Default)]
struct FakePartition {
    leader: i32,
    replicas: usize,
    log: Vec<Message>,
}

#[derive(Debug, Default)]
struct State {
    brokers: BTreeMap<i32, Endpoint>,
    controller: i32,
    unreachable: HashSet<Endpoint>,
    topics: BTreeMap<String, Vec<FakePartition>>,

    controller_error: Option<ProtocolError>,
    metadata_error: Option<ProtocolError>,
    create_error: Option<ProtocolError>,
    delete_error: Option<ProtocolError>,
    open_reader_error: Option<ProtocolError>,
    /// Readers fail once this many messages have been pulled in total.
    read_error_after: Option<usize>,
    /// Writes fail once this many records have been written in total.
    write_error_after: Option<usize>,
    /// Fetches return whole batches of this many records, so a timestamp
    /// seek starts at the head of the batch holding the target offset.
    batch_size: Option<i64>,
    /// Readers wait for more messages at the end of the log instead of failing.
    wait_at_end: bool,

    dials: Vec<Endpoint>,
    creates: Vec<(String, i32, i16)>,
    deletes: Vec<String>,
    readers: Vec<ReaderSpec>,
    pulled: usize,
    reader_closes: usize,
    writes: Vec<(String, Record)>,
    writer_closes: usize,
    committed: HashMap<(String, String), HashMap<i32, i64>>,
}

impl State {
    fn append(&mut self, topic: &str, partition: i32, record: Record) -> Message {
        let log = &mut self
            .topics
            .get_mut(topic)
            .and_then(|partitions| partitions.get_mut(partition as usize))
            .expect("appending to an unknown partition")
            .log;
        let offset = log.len() as i64;
        let message = Message {
            partition,
            offset,
            key: record.key,
            value: record.value,
            headers: record.headers,
            timestamp: epoch() + Duration::seconds(offset),
        };
        log.push(message.clone());
        message
    }
}

/// A cluster of three brokers whose controller is broker 1.
#[derive(Clone, Debug)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        let brokers = (1..=3)
            .map(|id| (id, Endpoint::new(format!("broker-{id}"), 9092)))
            .collect();
        Self {
            state: Arc::new(Mutex::new(State {
                brokers,
                controller: CONTROLLER_ID,
                ..Default::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn bootstrap(&self) -> Vec<Endpoint> {
        vec![Endpoint::new("seed-a", 9092), Endpoint::new("seed-b", 9092)]
    }

    pub fn broker(&self, id: i32) -> Endpoint {
        self.state().brokers[&id].clone()
    }

    pub fn controller(&self) -> Endpoint {
        self.broker(CONTROLLER_ID)
    }

    pub fn set_unreachable(&self, endpoint: Endpoint) {
        self.state().unreachable.insert(endpoint);
    }

    pub fn fetch_whole_batches(&self, size: i64) {
        self.state().batch_size = Some(size);
    }

    /// Add a topic whose partitions are led by `leaders` in order. A leader
    /// of `-1` leaves the partition without one.
    pub fn add_topic(&self, name: &str, leaders: &[i32]) {
        let partitions = leaders
            .iter()
            .map(|leader| FakePartition {
                leader: *leader,
                replicas: 3,
                log: vec![],
            })
            .collect();
        self.state().topics.insert(name.to_owned(), partitions);
    }

    pub fn append(&self, topic: &str, partition: i32, key: &'static str, value: &'static str) {
        self.state()
            .append(topic, partition, Record::new(key, value));
    }

    /// Append `count` unkeyed values `v0..` to one partition.
    pub fn fill(&self, topic: &str, partition: i32, count: usize) {
        let mut state = self.state();
        for n in 0..count {
            state.append(topic, partition, Record::new("", format!("v{n}")));
        }
    }

    pub fn has_topic(&self, name: &str) -> bool {
        self.state().topics.contains_key(name)
    }

    pub fn log(&self, topic: &str, partition: i32) -> Vec<Message> {
        self.state().topics[topic][partition as usize].log.clone()
    }

    pub fn commit(&self, group: &str, topic: &str, partition: i32, offset: i64) {
        self.state()
            .committed
            .entry((group.to_owned(), topic.to_owned()))
            .or_default()
            .insert(partition, offset);
    }

    pub fn fail_controller_lookup(&self, err: ProtocolError) {
        self.state().controller_error = Some(err);
    }

    pub fn fail_metadata(&self, err: ProtocolError) {
        self.state().metadata_error = Some(err);
    }

    pub fn fail_creates(&self, err: ProtocolError) {
        self.state().create_error = Some(err);
    }

    pub fn fail_deletes(&self, err: ProtocolError) {
        self.state().delete_error = Some(err);
    }

    pub fn fail_open_reader(&self, err: ProtocolError) {
        self.state().open_reader_error = Some(err);
    }

    pub fn wait_at_end_of_log(&self) {
        self.state().wait_at_end = true;
    }

    pub fn fail_reads_after(&self, pulled: usize) {
        self.state().read_error_after = Some(pulled);
    }

    pub fn fail_writes_after(&self, written: usize) {
        self.state().write_error_after = Some(written);
    }

    pub fn dials(&self) -> Vec<Endpoint> {
        self.state().dials.clone()
    }

    pub fn creates(&self) -> Vec<(String, i32, i16)> {
        self.state().creates.clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.state().deletes.clone()
    }

    pub fn readers(&self) -> Vec<ReaderSpec> {
        self.state().readers.clone()
    }

    /// Messages handed out by every reader so far.
    pub fn pulled(&self) -> usize {
        self.state().pulled
    }

    pub fn reader_closes(&self) -> usize {
        self.state().reader_closes
    }

    pub fn writes(&self) -> Vec<(String, Record)> {
        self.state().writes.clone()
    }

    /// Key and value of every written record, as strings.
    pub fn written_pairs(&self) -> Vec<(String, String)> {
        self.state()
            .writes
            .iter()
            .map(|(_, record)| {
                (
                    String::from_utf8_lossy(&record.key).into_owned(),
                    String::from_utf8_lossy(&record.value).into_owned(),
                )
            })
            .collect()
    }

    pub fn writer_closes(&self) -> usize {
        self.state().writer_closes
    }
}

#[async_trait(?Send)]
impl BrokerClient for FakeCluster {
    type Link = FakeLink;
    type Reader = FakeReader;
    type Writer = FakeWriter;

    async fn dial(&self, endpoint: &Endpoint) -> Result<Self::Link, ProtocolError> {
        let mut state = self.state();
        state.dials.push(endpoint.clone());
        if state.unreachable.contains(endpoint) {
            return Err(ProtocolError::new(format!("connection refused by {endpoint}")));
        }
        Ok(FakeLink {
            cluster: self.clone(),
            closed: false,
        })
    }

    async fn open_reader(
        &self,
        _bootstrap: &[Endpoint],
        spec: ReaderSpec,
    ) -> Result<Self::Reader, ProtocolError> {
        let mut state = self.state();
        state.readers.push(spec.clone());
        if let Some(err) = state.open_reader_error.clone() {
            return Err(err);
        }

        let partitions = state
            .topics
            .get(spec.topic())
            .ok_or_else(|| ProtocolError::with_code(3, "Unknown Topic Or Partition"))?;

        let positions = match &spec {
            ReaderSpec::Partition {
                partition, seek, ..
            } => {
                let log = &partitions
                    .get(*partition as usize)
                    .ok_or_else(|| ProtocolError::with_code(3, "Unknown Topic Or Partition"))?
                    .log;
                let start = match seek {
                    Seek::Earliest => 0,
                    Seek::Offset(offset) => *offset,
                    Seek::Timestamp(time) => {
                        let found = log
                            .iter()
                            .find(|message| message.timestamp >= *time)
                            .map_or(log.len() as i64, |message| message.offset);
                        match state.batch_size {
                            Some(size) if found < log.len() as i64 => found - found % size,
                            _ => found,
                        }
                    }
                };
                vec![(*partition, start)]
            }
            ReaderSpec::Group { topic, group } => {
                let committed = state
                    .committed
                    .get(&(group.clone(), topic.clone()))
                    .cloned()
                    .unwrap_or_default();
                (0..partitions.len() as i32)
                    .map(|partition| (partition, committed.get(&partition).copied().unwrap_or(0)))
                    .collect()
            }
        };

        let group = match &spec {
            ReaderSpec::Group { group, .. } => Some(group.clone()),
            ReaderSpec::Partition { .. } => None,
        };

        Ok(FakeReader {
            cluster: self.clone(),
            topic: spec.topic().to_owned(),
            group,
            positions,
        })
    }

    async fn open_writer(
        &self,
        _bootstrap: &[Endpoint],
        topic: &str,
        keyed: bool,
    ) -> Result<Self::Writer, ProtocolError> {
        let state = self.state();
        let partitions = state
            .topics
            .get(topic)
            .map(|partitions| (0..partitions.len() as i32).collect())
            .ok_or_else(|| ProtocolError::with_code(3, "Unknown Topic Or Partition"))?;
        Ok(FakeWriter {
            cluster: self.clone(),
            topic: topic.to_owned(),
            partitions,
            partitioner: Partitioner::new(keyed),
        })
    }
}

#[derive(Debug)]
pub struct FakeLink {
    cluster: FakeCluster,
    closed: bool,
}

#[async_trait(?Send)]
impl AdminLink for FakeLink {
    async fn controller(&mut self) -> Result<Endpoint, ProtocolError> {
        let state = self.cluster.state();
        if let Some(err) = state.controller_error.clone() {
            return Err(err);
        }
        Ok(state.brokers[&state.controller].clone())
    }

    async fn read_partitions(&mut self) -> Result<Vec<PartitionRecord>, ProtocolError> {
        let state = self.cluster.state();
        if let Some(err) = state.metadata_error.clone() {
            return Err(err);
        }

        let mut records = vec![];
        for (name, partitions) in &state.topics {
            for (index, partition) in partitions.iter().enumerate() {
                records.push(PartitionRecord {
                    topic: name.clone(),
                    partition: index as i32,
                    replicas: partition.replicas,
                    leader_id: partition.leader,
                    leader: state.brokers.get(&partition.leader).cloned(),
                });
            }
        }
        Ok(records)
    }

    async fn create_topic(
        &mut self,
        name: &str,
        partitions: i32,
        replicas: i16,
    ) -> Result<(), ProtocolError> {
        let mut state = self.cluster.state();
        state.creates.push((name.to_owned(), partitions, replicas));
        if let Some(err) = state.create_error.clone() {
            return Err(err);
        }
        let controller = state.controller;
        let partitions = (0..partitions)
            .map(|_| FakePartition {
                leader: controller,
                replicas: replicas as usize,
                log: vec![],
            })
            .collect();
        state.topics.insert(name.to_owned(), partitions);
        Ok(())
    }

    async fn delete_topic(&mut self, name: &str) -> Result<(), ProtocolError> {
        let mut state = self.cluster.state();
        state.deletes.push(name.to_owned());
        if let Some(err) = state.delete_error.clone() {
            return Err(err);
        }
        state.topics.remove(name);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        self.closed = true;
        Ok(())
    }
}

/// Reads the fake logs. Once every assigned partition is exhausted the reader
/// fails instead of waiting, so an unbounded read in a test ends.
#[derive(Debug)]
pub struct FakeReader {
    cluster: FakeCluster,
    topic: String,
    group: Option<String>,
    /// Next offset per assigned partition.
    positions: Vec<(i32, i64)>,
}

#[async_trait(?Send)]
impl MessageReader for FakeReader {
    async fn next_message(&mut self) -> Result<Message, ProtocolError> {
        let mut state = self.cluster.state();
        if state.read_error_after.is_some_and(|limit| state.pulled >= limit) {
            return Err(ProtocolError::with_code(7, "Request Timed Out"));
        }

        let partitions = state
            .topics
            .get(&self.topic)
            .ok_or_else(|| ProtocolError::with_code(3, "Unknown Topic Or Partition"))?;

        let mut next = None;
        for (partition, position) in self.positions.iter_mut() {
            if let Some(message) = partitions[*partition as usize].log.get(*position as usize) {
                next = Some(message.clone());
                *position += 1;
                break;
            }
        }
        if next.is_none() && state.wait_at_end {
            drop(state);
            return std::future::pending().await;
        }
        let message = next.ok_or_else(|| ProtocolError::new("end of test log"))?;

        state.pulled += 1;
        if let Some(group) = &self.group {
            state
                .committed
                .entry((group.clone(), self.topic.clone()))
                .or_default()
                .insert(message.partition, message.offset + 1);
        }
        Ok(message)
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        self.cluster.state().reader_closes += 1;
        Ok(())
    }
}

#[derive(Debug)]
pub struct FakeWriter {
    cluster: FakeCluster,
    topic: String,
    partitions: Vec<i32>,
    partitioner: Partitioner,
}

#[async_trait(?Send)]
impl MessageWriter for FakeWriter {
    async fn write(&mut self, record: Record) -> Result<(), ProtocolError> {
        let mut state = self.cluster.state();
        if state
            .write_error_after
            .is_some_and(|limit| state.writes.len() >= limit)
        {
            return Err(ProtocolError::with_code(7, "Request Timed Out"));
        }

        let partition = self
            .partitioner
            .partition(&record.key, &self.partitions)
            .ok_or_else(|| ProtocolError::new("topic has no partitions"))?;
        state.writes.push((self.topic.clone(), record.clone()));
        state.append(&self.topic, partition, record);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        self.cluster.state().writer_closes += 1;
        Ok(())
    }
}

/// Prompts collected from an attended production loop.
#[derive(Debug, Default)]
pub struct RecordingPrompter {
    pub prompts: Vec<String>,
}

impl Prompter for RecordingPrompter {
    fn prompt(&mut self, prompt: Prompt<'_>) {
        self.prompts.push(format!("{prompt:?}"));
    }
}
