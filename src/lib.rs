//! Operator tooling for Kafka/Redpanda clusters.
//!
//! # Klient
//! Klient is the engine behind the `klient` command line tool. It resolves a
//! connection to a cluster's controller, aggregates partition metadata into
//! broker and topic views, creates and deletes topics, reads topics under four
//! bounded consumption strategies and drives an attended or unattended
//! production loop from a delimited input stream.
//!
//! The wire protocol is handled by [samsa](https://docs.rs/samsa). The engine
//! itself is written against the traits in [`client`], so any broker client can
//! be plugged in, including in-memory fakes for tests.
//!
//! ## Example
//! ```rust,no_run
//! use klient::prelude::*;
//!
//! # async fn run() -> klient::Result<()> {
//! let bootstrap = config::parse_bootstrappers("localhost:9092")?;
//! let client = SamsaClient::new(ConnectConfig::default());
//! let mut session = Session::open(client, bootstrap).await?;
//!
//! for (name, topic) in session.topics().await? {
//!     println!("{name}: {} partitions", topic.partitions);
//! }
//!
//! let strategy = ReadStrategy::OffsetRange {
//!     partition: 0,
//!     from: 0,
//!     to: Some(10),
//! };
//! session
//!     .read("purchases", strategy, |message| {
//!         println!("{:?}", message.value);
//!         true
//!     })
//!     .await?;
//!
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod driver;
mod error;
pub mod lifecycle;
pub mod present;
pub mod producer;
pub mod reader;
pub mod resolver;
pub mod session;
pub mod topology;

pub use error::{Error, ErrorKind, Result, TopicOperation};

pub mod prelude {
    //! Everything needed to open a session and run a command.
    pub use crate::client::{
        AdminLink, BrokerClient, Headers, Message, MessageReader, MessageWriter, ProtocolError,
        ReaderSpec, Record, Seek,
    };
    pub use crate::config::{self, ConnectConfig, Endpoint};
    pub use crate::driver::SamsaClient;
    pub use crate::error::{Error, ErrorKind, Result, TopicOperation};
    pub use crate::producer::{produce, Mode, ProduceOptions, ProduceSummary, Prompt, Prompter};
    pub use crate::reader::{BoundedRead, ReadResult, ReadStrategy};
    pub use crate::resolver::ClusterConnection;
    pub use crate::session::Session;
    pub use crate::topology::{Broker, Leader, Partition, PartitionRecord, Topic, TopicSummary};
}
