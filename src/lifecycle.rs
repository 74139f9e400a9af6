//! Existence checked topic creation and deletion.
//!
//! The existence check and the change itself are two separate round trips, so
//! a concurrent creator can still make the broker reject a creation as a
//! duplicate. That rejection is returned like any other failure.
use crate::{
    client::{AdminLink, BrokerClient, ProtocolError},
    error::{Error, Result, TopicOperation},
    session::Session,
};

const POLICY_VIOLATION: &str = "policy violation";

/// Whether broker error text points at a policy rejection, such as an invalid
/// replication factor or a quota.
pub fn is_policy_violation(text: &str) -> bool {
    text.to_lowercase().contains(POLICY_VIOLATION)
}

impl<C: BrokerClient> Session<C> {
    /// Create `name` unless it already exists.
    pub async fn create_topic(&mut self, name: &str, partitions: i32, replicas: i16) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid("topic name is required"));
        }
        if partitions < 1 {
            return Err(Error::invalid(format!(
                "topic '{name}' needs at least one partition, got {partitions}"
            )));
        }
        if replicas < 1 {
            return Err(Error::invalid(format!(
                "topic '{name}' needs at least one replica, got {replicas}"
            )));
        }

        if self.topic_exists(name).await? {
            return Err(Error::AlreadyExists(name.to_owned()));
        }

        tracing::info!(
            "creating topic '{}' with {} partitions and {} replicas",
            name,
            partitions,
            replicas
        );
        self.connection_mut()
            .link_mut()
            .create_topic(name, partitions, replicas)
            .await
            .map_err(|source| topic_error(TopicOperation::Create, name, source))
    }

    /// Delete `name` if it exists.
    pub async fn delete_topic(&mut self, name: &str) -> Result<()> {
        if !self.topic_exists(name).await? {
            return Err(Error::NotFound(name.to_owned()));
        }

        tracing::info!("deleting topic '{}'", name);
        self.connection_mut()
            .link_mut()
            .delete_topic(name)
            .await
            .map_err(|source| topic_error(TopicOperation::Delete, name, source))
    }
}

fn topic_error(operation: TopicOperation, topic: &str, source: ProtocolError) -> Error {
    let topic = topic.to_owned();
    if is_policy_violation(source.message()) {
        return Error::PolicyViolation {
            topic,
            operation,
            source,
        };
    }
    match operation {
        TopicOperation::Create => Error::CreateFailed { topic, source },
        TopicOperation::Delete => Error::DeleteFailed { topic, source },
    }
}
