//! Aggregation of partition metadata into broker and topic views.
//!
//! Every query re-reads the partition metadata from the controller. Nothing is
//! cached between calls.
use std::collections::BTreeMap;

use tracing::instrument;

use crate::{
    client::{AdminLink, BrokerClient},
    config::Endpoint,
    error::{Error, Result},
    session::Session,
};

/// One partition as reported by a metadata read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionRecord {
    pub topic: String,
    pub partition: i32,
    pub replicas: usize,
    /// Node id of the leader, `-1` when the partition has none.
    pub leader_id: i32,
    pub leader: Option<Endpoint>,
}

/// A broker that leads at least one partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Broker {
    pub host: String,
    pub port: u16,
    pub topics: BTreeMap<String, Topic>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topic {
    pub name: String,
    pub partitions: BTreeMap<i32, Partition>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Partition {
    pub id: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Leader {
    pub id: i32,
    pub host: String,
    pub port: u16,
}

/// Per topic summary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopicSummary {
    pub partitions: usize,
    pub replicas: usize,
    pub leader: Leader,
}

/// Count partitions per topic. Replica count and leader take the values of the
/// last record seen for the topic.
pub fn aggregate_topics(records: &[PartitionRecord]) -> BTreeMap<String, TopicSummary> {
    let mut topics: BTreeMap<String, TopicSummary> = BTreeMap::new();

    for record in records {
        let topic = topics.entry(record.topic.clone()).or_default();
        topic.partitions += 1;
        topic.replicas = record.replicas;
        topic.leader = match &record.leader {
            Some(leader) => Leader {
                id: record.leader_id,
                host: leader.host.clone(),
                port: leader.port,
            },
            None => Leader {
                id: record.leader_id,
                ..Default::default()
            },
        };
    }

    topics
}

/// Group partitions by leader host, then topic, then partition id.
///
/// Brokers only appear when they lead at least one partition; partitions
/// without a leader are left out.
pub fn aggregate_brokers(records: &[PartitionRecord]) -> BTreeMap<String, Broker> {
    let mut brokers: BTreeMap<String, Broker> = BTreeMap::new();

    for record in records {
        let Some(leader) = &record.leader else {
            tracing::debug!(
                "Partition {} of topic {} has no leader",
                record.partition,
                record.topic
            );
            continue;
        };

        let broker = brokers
            .entry(leader.host.clone())
            .or_insert_with(|| Broker {
                host: leader.host.clone(),
                port: leader.port,
                topics: BTreeMap::new(),
            });

        broker
            .topics
            .entry(record.topic.clone())
            .or_insert_with(|| Topic {
                name: record.topic.clone(),
                partitions: BTreeMap::new(),
            })
            .partitions
            .entry(record.partition)
            .or_insert(Partition {
                id: record.partition,
            });
    }

    brokers
}

impl<C: BrokerClient> Session<C> {
    /// Read the flat partition metadata from the controller.
    #[instrument(name = "topology-read", level = "debug", skip(self))]
    pub async fn partitions(&mut self) -> Result<Vec<PartitionRecord>> {
        let records = self
            .connection_mut()
            .link_mut()
            .read_partitions()
            .await
            .map_err(Error::Metadata)?;
        tracing::debug!("Read {} partition records", records.len());
        Ok(records)
    }

    /// Topic name to partition count, replica count and leader.
    pub async fn topics(&mut self) -> Result<BTreeMap<String, TopicSummary>> {
        let records = self.partitions().await?;
        Ok(aggregate_topics(&records))
    }

    /// Leader host to broker, topic and partition hierarchy.
    pub async fn describe(&mut self) -> Result<BTreeMap<String, Broker>> {
        let records = self.partitions().await?;
        Ok(aggregate_brokers(&records))
    }

    pub async fn topic_exists(&mut self, name: &str) -> Result<bool> {
        Ok(self.topics().await?.contains_key(name))
    }
}
