//! Terminal and pipe formatting of command results.
use std::{collections::BTreeMap, io::Write};

use crate::{
    client::Message,
    config::{format_time, Endpoint},
    error::TopicOperation,
    producer::{Prompt, Prompter},
    reader::ReadStrategy,
    topology::{Broker, TopicSummary},
};

const UNSET_KEY: &str = "[unset]";

fn joined(endpoints: &[Endpoint]) -> String {
    endpoints
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Broker, topic and partition listing.
pub fn write_describe<W: Write>(
    out: &mut W,
    bootstrap: &[Endpoint],
    brokers: &BTreeMap<String, Broker>,
    unattended: bool,
) -> std::io::Result<()> {
    if unattended {
        writeln!(out, "broker topic partition")?;
        for (host, broker) in brokers {
            for (name, topic) in &broker.topics {
                for id in topic.partitions.keys() {
                    writeln!(out, "{}:{} {} {}", host, broker.port, name, id)?;
                }
            }
        }
        return Ok(());
    }

    write!(
        out,
        "describing cluster using bootstrappers: '{}'\n\n",
        joined(bootstrap)
    )?;

    if brokers.is_empty() {
        write!(
            out,
            "> no brokers found. (brokers not acting as leader for at least one partition are not listed)\n\n"
        )?;
    }

    for (host, broker) in brokers {
        writeln!(out, "broker: {}:{}", host, broker.port)?;
        for (name, topic) in &broker.topics {
            writeln!(out, "> topic: {name}")?;
            for id in topic.partitions.keys() {
                writeln!(out, "  > partition: {id}")?;
            }
        }
    }
    Ok(())
}

/// One line per topic with its partition count, replica count and leader.
pub fn write_topics<W: Write>(
    out: &mut W,
    topics: &BTreeMap<String, TopicSummary>,
) -> std::io::Result<()> {
    for (name, topic) in topics {
        writeln!(
            out,
            "topic: {} partitions: {} replicas: {} leader: {}@{}:{}",
            name,
            topic.partitions,
            topic.replicas,
            topic.leader.id,
            topic.leader.host,
            topic.leader.port
        )?;
    }
    Ok(())
}

/// Confirmation of a topic creation or deletion, printed in every mode.
pub fn topic_changed(operation: TopicOperation, topic: &str) -> String {
    match operation {
        TopicOperation::Create => format!("created topic '{topic}'\n"),
        TopicOperation::Delete => format!("deleted topic {topic}\n"),
    }
}

/// Banner printed before an attended read.
pub fn read_banner(topic: &str, strategy: &ReadStrategy, group: Option<&str>) -> String {
    match strategy {
        ReadStrategy::OffsetRange {
            partition,
            from,
            to,
        } => format!(
            "reading from partition {} of topic '{}' with from offset of {} to {}...\n\n",
            partition,
            topic,
            from,
            to.map_or_else(|| "end".to_owned(), |to| to.to_string())
        ),
        ReadStrategy::TimeRange {
            partition,
            from,
            to,
        } => format!(
            "reading from partition {} of topic '{}' for time range '{}' to '{}'...\n\n",
            partition,
            topic,
            format_time(from),
            to.as_ref().map_or_else(|| "end".to_owned(), format_time)
        ),
        ReadStrategy::Group { group } => format!(
            "reading from topic '{topic}' as part of consumer group '{group}'...\n\n"
        ),
        ReadStrategy::Exclusive => match group {
            Some(group) => format!(
                "reading exclusively from topic '{topic}' as consumer group '{group}'...\n\n"
            ),
            None => format!("reading exclusively from topic '{topic}'...\n\n"),
        },
    }
}

/// A consumed message. Unattended output is the raw value followed by the
/// delimiter.
pub fn write_message<W: Write>(
    out: &mut W,
    message: &Message,
    unattended: bool,
    delimiter: u8,
) -> std::io::Result<()> {
    if unattended {
        out.write_all(&message.value)?;
        return out.write_all(&[delimiter]);
    }

    let key = if message.key.is_empty() {
        UNSET_KEY.into()
    } else {
        String::from_utf8_lossy(&message.key)
    };
    write!(
        out,
        "[{}/{} @ {}]> {} : {}",
        message.partition,
        message.offset,
        format_time(&message.timestamp),
        key,
        String::from_utf8_lossy(&message.value)
    )?;

    if !message.headers.is_empty() {
        let headers = message
            .headers
            .iter()
            .map(|(key, value)| format!("{}={}", key, String::from_utf8_lossy(value)))
            .collect::<Vec<_>>()
            .join(", ");
        write!(out, " {{{headers}}}")?;
    }
    writeln!(out)
}

/// Attended prompts written to a terminal.
pub struct TerminalPrompter<W> {
    out: W,
}

impl<W: Write> TerminalPrompter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn render(&mut self, prompt: Prompt<'_>) -> std::io::Result<()> {
        match prompt {
            Prompt::Banner { topic } => write!(
                self.out,
                "enter data to publish to topic '{topic}'. enter X to exit:\n> "
            )?,
            Prompt::FirstKey => write!(self.out, "enter key (empty uses 'default')> ")?,
            Prompt::NextKey => write!(self.out, "enter key (empty uses previous) > ")?,
            Prompt::Wrote { value, topic } => write!(
                self.out,
                "wrote [{} > {}]\n> ",
                String::from_utf8_lossy(value),
                topic
            )?,
            Prompt::WriteFailed => writeln!(self.out, "error writing to topic. see log for details")?,
        }
        self.out.flush()
    }
}

impl<W: Write> Prompter for TerminalPrompter<W> {
    fn prompt(&mut self, prompt: Prompt<'_>) {
        if let Err(err) = self.render(prompt) {
            tracing::warn!("Error writing prompt to terminal: {}", err);
        }
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::topology::{Leader, Partition, Topic};

    fn brokers() -> BTreeMap<String, Broker> {
        let partitions = [0, 1]
            .into_iter()
            .map(|id| (id, Partition { id }))
            .collect();
        let topics = BTreeMap::from([(
            "orders".to_owned(),
            Topic {
                name: "orders".to_owned(),
                partitions,
            },
        )]);
        BTreeMap::from([(
            "a".to_owned(),
            Broker {
                host: "a".to_owned(),
                port: 9092,
                topics,
            },
        )])
    }

    fn message(key: &'static [u8]) -> Message {
        Message {
            partition: 1,
            offset: 7,
            key: Bytes::from_static(key),
            value: Bytes::from_static(b"hello"),
            headers: vec![],
            timestamp: Utc.with_ymd_and_hms(2024, 3, 5, 10, 20, 30).unwrap(),
        }
    }

    #[test]
    fn describes_attended() {
        let mut out = vec![];
        write_describe(&mut out, &[Endpoint::new("a", 9092)], &brokers(), false).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "describing cluster using bootstrappers: 'a:9092'\n\n\
             broker: a:9092\n\
             > topic: orders\n  \
             > partition: 0\n  \
             > partition: 1\n"
        );
    }

    #[test]
    fn describes_unattended() {
        let mut out = vec![];
        write_describe(&mut out, &[], &brokers(), true).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "broker topic partition\na:9092 orders 0\na:9092 orders 1\n"
        );
    }

    #[test]
    fn notes_an_empty_cluster() {
        let mut out = vec![];
        write_describe(&mut out, &[], &BTreeMap::new(), false).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("> no brokers found."));
    }

    #[test]
    fn lists_topic_summaries() {
        let topics = BTreeMap::from([(
            "orders".to_owned(),
            TopicSummary {
                partitions: 6,
                replicas: 3,
                leader: Leader {
                    id: 1,
                    host: "a".to_owned(),
                    port: 9092,
                },
            },
        )]);
        let mut out = vec![];
        write_topics(&mut out, &topics).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "topic: orders partitions: 6 replicas: 3 leader: 1@a:9092\n"
        );
    }

    #[test]
    fn formats_messages() {
        let mut out = vec![];
        write_message(&mut out, &message(b""), false, b'\n').unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "[1/7 @ 05-03-2024 10:20:30]> [unset] : hello\n"
        );

        let mut keyed = message(b"k1");
        keyed.headers = vec![("trace".to_owned(), Bytes::from_static(b"abc"))];
        let mut out = vec![];
        write_message(&mut out, &keyed, false, b'\n').unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "[1/7 @ 05-03-2024 10:20:30]> k1 : hello {trace=abc}\n"
        );

        let mut out = vec![];
        write_message(&mut out, &keyed, true, b'|').unwrap();
        assert_eq!(out, b"hello|");
    }

    #[test]
    fn renders_prompts() {
        let mut prompter = TerminalPrompter::new(vec![]);
        prompter.prompt(Prompt::Banner { topic: "t" });
        prompter.prompt(Prompt::FirstKey);
        prompter.prompt(Prompt::Wrote {
            value: b"v1",
            topic: "t",
        });
        assert_eq!(
            String::from_utf8(prompter.into_inner()).unwrap(),
            "enter data to publish to topic 't'. enter X to exit:\n> \
             enter key (empty uses 'default')> \
             wrote [v1 > t]\n> "
        );
    }

    #[test]
    fn banners_name_the_bounds() {
        let banner = read_banner(
            "orders",
            &ReadStrategy::OffsetRange {
                partition: 0,
                from: 0,
                to: None,
            },
            None,
        );
        assert_eq!(
            banner,
            "reading from partition 0 of topic 'orders' with from offset of 0 to end...\n\n"
        );
    }

    #[test]
    fn confirms_topic_changes() {
        assert_eq!(
            topic_changed(TopicOperation::Create, "orders"),
            "created topic 'orders'\n"
        );
        assert_eq!(
            topic_changed(TopicOperation::Delete, "orders"),
            "deleted topic orders\n"
        );
    }
}
