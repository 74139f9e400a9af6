//! The samsa backed broker client.
//!
//! # Driver Module
//!
//! [`SamsaClient`] implements the engine's [`BrokerClient`] on top of samsa:
//!
//! - admin links are single [`Transport`] connections speaking metadata,
//!   create topics and delete topics requests;
//! - partition readers are samsa consumers positioned by offset or by
//!   timestamp;
//! - group readers are samsa consumer groups over every partition of the
//!   topic;
//! - writers produce one record per request to the leader of the partition
//!   chosen by the [`Partitioner`].
//!
//! samsa does not surface record headers when fetching, so consumed messages
//! always carry an empty header list.
use std::{
    collections::{HashMap, VecDeque},
    pin::Pin,
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use samsa::prelude::{
    produce, protocol, BrokerAddress, BrokerConnection, ClusterMetadata, ConsumeMessage,
    ConsumerBuilder, ConsumerGroupBuilder, Error, Header, KafkaCode, ProduceMessage,
    TopicPartitionsBuilder,
};
use tokio_stream::StreamExt;

use crate::{
    client::{
        AdminLink, BrokerClient, Message, MessageReader, MessageWriter, ProtocolError, ReaderSpec,
        Record, Seek,
    },
    config::{ConnectConfig, Endpoint},
    topology::PartitionRecord,
};

mod admin;
mod partitioner;
mod transport;

pub use partitioner::{fnv1a, Partitioner};
pub use transport::{Transport, TransportConfig};

const CORRELATION_ID: i32 = 1;
/// Writes wait for the partition leader only.
const REQUIRED_ACKS: i16 = 1;
/// List offsets timestamp meaning the earliest retained offset.
const EARLIEST_OFFSET: i64 = -2;
const NO_LEADER: i32 = -1;

impl From<Error> for ProtocolError {
    fn from(err: Error) -> Self {
        match err {
            Error::KafkaError(code) => ProtocolError::with_code(code as i16, format!("{code:?}")),
            Error::SaslAuthFailed(message) => {
                ProtocolError::new(format!("sasl authentication failed: {message}"))
            }
            Error::IoError(kind) => ProtocolError::new(format!("io error: {kind}")),
            other => ProtocolError::new(other.to_string()),
        }
    }
}

impl From<&Endpoint> for BrokerAddress {
    fn from(endpoint: &Endpoint) -> Self {
        BrokerAddress {
            host: endpoint.host.clone(),
            port: endpoint.port,
        }
    }
}

/// Broker client speaking the Kafka protocol through samsa.
#[derive(Clone, Debug)]
pub struct SamsaClient {
    connect: Arc<ConnectConfig>,
}

impl SamsaClient {
    pub fn new(connect: ConnectConfig) -> Self {
        Self {
            connect: Arc::new(connect),
        }
    }

    pub fn connect_config(&self) -> &ConnectConfig {
        &self.connect
    }

    fn transport_config(&self, bootstrap: &[Endpoint]) -> TransportConfig {
        TransportConfig {
            addresses: bootstrap.iter().map(BrokerAddress::from).collect(),
            connect: self.connect.clone(),
            correlation_id: CORRELATION_ID,
        }
    }

    fn link(&self, conn: Transport) -> SamsaLink {
        SamsaLink {
            conn,
            client_id: self.connect.client_id.clone(),
            timeout_ms: self.connect.timeout_ms(),
        }
    }

    /// Partition ids of `topic`, read through the first reachable bootstrap
    /// address.
    async fn topic_partitions(
        &self,
        bootstrap: &[Endpoint],
        topic: &str,
    ) -> Result<Vec<i32>, ProtocolError> {
        let conn = Transport::new(self.transport_config(bootstrap)).await?;
        let mut link = self.link(conn);
        let metadata = link.metadata(&[topic]).await;
        link.close_quietly().await;

        let metadata = metadata?;
        let found = metadata
            .topics
            .iter()
            .find(|t| t.name.as_ref() == topic.as_bytes())
            .ok_or_else(|| ProtocolError::new(format!("topic '{topic}' not found")))?;
        if found.error_code != KafkaCode::None {
            return Err(Error::KafkaError(found.error_code).into());
        }

        let mut partitions: Vec<i32> = found.partitions.iter().map(|p| p.partition_index).collect();
        partitions.sort_unstable();
        Ok(partitions)
    }
}

#[async_trait(?Send)]
impl BrokerClient for SamsaClient {
    type Link = SamsaLink;
    type Reader = SamsaReader;
    type Writer = SamsaWriter;

    async fn dial(&self, endpoint: &Endpoint) -> Result<Self::Link, ProtocolError> {
        let config = self.transport_config(std::slice::from_ref(endpoint));
        let conn = Transport::connect(endpoint.into(), &config).await?;
        Ok(self.link(conn))
    }

    async fn open_reader(
        &self,
        bootstrap: &[Endpoint],
        spec: ReaderSpec,
    ) -> Result<Self::Reader, ProtocolError> {
        let config = self.transport_config(bootstrap);
        let client_id = self.connect.client_id.clone();

        match spec {
            ReaderSpec::Partition {
                topic,
                partition,
                seek,
            } => {
                let assignment = TopicPartitionsBuilder::new()
                    .assign(topic.clone(), vec![partition])
                    .build();
                let builder = ConsumerBuilder::<Transport>::new(config, assignment)
                    .await?
                    .client_id(client_id);

                let (builder, floor) = match seek {
                    Seek::Earliest => (builder.seek_to_timestamp(EARLIEST_OFFSET).await?, 0),
                    Seek::Offset(offset) => (
                        builder.seek(&HashMap::from([((topic.clone(), partition), offset)])),
                        offset,
                    ),
                    Seek::Timestamp(time) => {
                        (builder.seek_to_timestamp(time.timestamp_millis()).await?, 0)
                    }
                };

                tracing::debug!("Reading partition {} of topic {}", partition, topic);
                let stream = builder.build().into_stream();
                Ok(SamsaReader::new(stream, floor))
            }
            ReaderSpec::Group { topic, group } => {
                let partitions = self.topic_partitions(bootstrap, &topic).await?;
                let assignment = TopicPartitionsBuilder::new()
                    .assign(topic.clone(), partitions)
                    .build();
                let consumer_group =
                    ConsumerGroupBuilder::<Transport>::new(config, group.clone(), assignment)
                        .await?
                        .client_id(client_id)
                        .build()
                        .await?;

                tracing::debug!("Reading topic {} as group {}", topic, group);
                Ok(SamsaReader::new(consumer_group.into_stream(), 0))
            }
        }
    }

    async fn open_writer(
        &self,
        bootstrap: &[Endpoint],
        topic: &str,
        keyed: bool,
    ) -> Result<Self::Writer, ProtocolError> {
        let cluster = ClusterMetadata::<Transport>::new(
            self.transport_config(bootstrap),
            CORRELATION_ID,
            self.connect.client_id.clone(),
            vec![topic.to_owned()],
        )
        .await?;

        let mut partitions: Vec<i32> = cluster
            .topics
            .iter()
            .filter(|t| t.name.as_ref() == topic.as_bytes())
            .flat_map(|t| t.partitions.iter().map(|p| p.partition_index))
            .collect();
        partitions.sort_unstable();

        if partitions.is_empty() {
            return Err(ProtocolError::new(format!(
                "topic '{topic}' has no partitions"
            )));
        }

        Ok(SamsaWriter {
            topic: topic.to_owned(),
            cluster,
            partitions,
            partitioner: Partitioner::new(keyed),
            client_id: self.connect.client_id.clone(),
            timeout_ms: self.connect.timeout_ms(),
        })
    }
}

/// A single broker connection for metadata and topic administration.
#[derive(Debug)]
pub struct SamsaLink {
    conn: Transport,
    client_id: String,
    timeout_ms: i32,
}

impl SamsaLink {
    /// Metadata for `topics`, or for every topic when empty.
    async fn metadata(&mut self, topics: &[&str]) -> Result<protocol::MetadataResponse, ProtocolError> {
        let request = protocol::MetadataRequest::new(CORRELATION_ID, &self.client_id, topics);
        self.conn.send_request(&request).await?;
        let response = self.conn.receive_response().await?;
        Ok(protocol::MetadataResponse::try_from(response.freeze())?)
    }

    async fn close_quietly(&mut self) {
        if let Err(err) = self.conn.shutdown().await {
            tracing::debug!("Error shutting down connection to {:?}: {}", self.conn.peer(), err);
        }
    }
}

fn endpoint(host: &[u8], port: i32) -> Result<Endpoint, ProtocolError> {
    let port = u16::try_from(port)
        .map_err(|_| ProtocolError::new(format!("broker port {port} is out of range")))?;
    Ok(Endpoint::new(String::from_utf8_lossy(host), port))
}

#[async_trait(?Send)]
impl AdminLink for SamsaLink {
    async fn controller(&mut self) -> Result<Endpoint, ProtocolError> {
        let metadata = self.metadata(&[]).await?;
        let controller = metadata
            .brokers
            .iter()
            .find(|broker| broker.node_id == metadata.controller_id)
            .ok_or_else(|| {
                ProtocolError::new(format!(
                    "controller {} is not among the advertised brokers",
                    metadata.controller_id
                ))
            })?;
        endpoint(&controller.host, controller.port)
    }

    async fn read_partitions(&mut self) -> Result<Vec<PartitionRecord>, ProtocolError> {
        let metadata = self.metadata(&[]).await?;
        let leaders = metadata
            .brokers
            .iter()
            .map(|broker| Ok((broker.node_id, endpoint(&broker.host, broker.port)?)))
            .collect::<Result<HashMap<i32, Endpoint>, ProtocolError>>()?;

        let mut records = vec![];
        for topic in &metadata.topics {
            let name = String::from_utf8_lossy(&topic.name).into_owned();
            if topic.error_code != KafkaCode::None {
                tracing::warn!("Skipping topic {} with error {:?}", name, topic.error_code);
                continue;
            }
            for partition in &topic.partitions {
                let leader = match partition.leader_id {
                    NO_LEADER => None,
                    id => leaders.get(&id).cloned(),
                };
                records.push(PartitionRecord {
                    topic: name.clone(),
                    partition: partition.partition_index,
                    replicas: partition.replica_nodes.len(),
                    leader_id: partition.leader_id,
                    leader,
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
        let mut request =
            protocol::CreateTopicsRequest::new(CORRELATION_ID, &self.client_id, self.timeout_ms, false)?;
        request.add(name, partitions, replicas);
        self.conn.send_request(&request).await?;

        let response = self.conn.receive_response().await?;
        let outcomes = admin::parse_create_topics(response.freeze())?;
        admin::check(&outcomes, name)
    }

    async fn delete_topic(&mut self, name: &str) -> Result<(), ProtocolError> {
        let mut request =
            protocol::DeleteTopicsRequest::new(CORRELATION_ID, &self.client_id, self.timeout_ms)?;
        request.add(name);
        self.conn.send_request(&request).await?;

        let response = self.conn.receive_response().await?;
        let outcomes = admin::parse_delete_topics(response.freeze())?;
        admin::check(&outcomes, name)
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        self.conn
            .shutdown()
            .await
            .map_err(|err| ProtocolError::new(format!("error closing connection: {err}")))
    }
}

type Batches = Pin<Box<dyn Stream<Item = Result<Vec<ConsumeMessage>, ProtocolError>>>>;

/// Messages from a samsa consumer or consumer group stream.
pub struct SamsaReader {
    batches: Batches,
    pending: VecDeque<ConsumeMessage>,
    /// Fetches return whole record batches, which may start before the
    /// requested offset.
    floor: i64,
}

impl SamsaReader {
    fn new<S, I>(stream: S, floor: i64) -> Self
    where
        S: Stream<Item = samsa::prelude::Result<I>> + 'static,
        I: Iterator<Item = ConsumeMessage> + 'static,
    {
        let batches = stream.map(|batch| {
            batch
                .map(|messages| messages.collect::<Vec<_>>())
                .map_err(ProtocolError::from)
        });
        Self {
            batches: Box::pin(batches),
            pending: VecDeque::new(),
            floor,
        }
    }
}

fn message(consumed: ConsumeMessage) -> Message {
    let millis = i64::try_from(consumed.timestamp).unwrap_or(i64::MAX);
    Message {
        partition: consumed.partition_index,
        offset: i64::try_from(consumed.offset).unwrap_or(i64::MAX),
        key: consumed.key,
        value: consumed.value,
        headers: vec![],
        timestamp: DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default(),
    }
}

#[async_trait(?Send)]
impl MessageReader for SamsaReader {
    async fn next_message(&mut self) -> Result<Message, ProtocolError> {
        loop {
            if let Some(consumed) = self.pending.pop_front() {
                let consumed = message(consumed);
                if consumed.offset < self.floor {
                    continue;
                }
                return Ok(consumed);
            }

            match self.batches.next().await {
                Some(batch) => self.pending.extend(batch?),
                None => return Err(ProtocolError::new("message stream ended")),
            }
        }
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        self.pending.clear();
        self.batches = Box::pin(futures::stream::empty());
        Ok(())
    }
}

/// Produces to the partition leaders of one topic.
pub struct SamsaWriter {
    topic: String,
    cluster: ClusterMetadata<Transport>,
    partitions: Vec<i32>,
    partitioner: Partitioner,
    client_id: String,
    timeout_ms: i32,
}

#[async_trait(?Send)]
impl MessageWriter for SamsaWriter {
    async fn write(&mut self, record: Record) -> Result<(), ProtocolError> {
        let partition = self
            .partitioner
            .partition(&record.key, &self.partitions)
            .ok_or_else(|| ProtocolError::new(format!("topic '{}' has no partitions", self.topic)))?;
        let conn = self
            .cluster
            .get_leader_id_for_topic_partition(&self.topic, partition)
            .and_then(|leader| self.cluster.broker_connections.get(&leader))
            .cloned()
            .ok_or_else(|| {
                ProtocolError::new(format!(
                    "no leader for partition {} of topic '{}'",
                    partition, self.topic
                ))
            })?;

        let Record {
            key,
            value,
            headers,
        } = record;
        let messages = vec![ProduceMessage {
            key: (!key.is_empty()).then_some(key),
            value: Some(value),
            headers: headers
                .into_iter()
                .map(|(key, value)| Header::new(key, value))
                .collect(),
            topic: self.topic.clone(),
            partition_id: partition,
        }];

        tracing::trace!("Producing to partition {} of topic {}", partition, self.topic);
        let response = produce(
            conn,
            CORRELATION_ID,
            &self.client_id,
            REQUIRED_ACKS,
            self.timeout_ms,
            &messages,
            protocol::produce::request::Attributes::new(None),
        )
        .await?;

        let failed = response
            .iter()
            .flat_map(|response| response.responses.iter())
            .flat_map(|topic| topic.partition_responses.iter())
            .find(|partition| partition.error_code != KafkaCode::None);
        match failed {
            Some(partition) => Err(Error::KafkaError(partition.error_code).into()),
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        for (id, conn) in self.cluster.broker_connections.drain() {
            if let Err(err) = conn.shutdown().await {
                tracing::debug!("Error shutting down connection to broker {}: {}", id, err);
            }
        }
        Ok(())
    }
}
