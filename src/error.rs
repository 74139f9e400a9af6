//! Crate level errors.
//!
use std::{fmt, io, result};

use thiserror::Error;

use crate::{client::ProtocolError, config::Endpoint};

pub type Result<T> = result::Result<T, Error>;

/// The administrative operation a topic error came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopicOperation {
    Create,
    Delete,
}

impl fmt::Display for TopicOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicOperation::Create => write!(f, "created"),
            TopicOperation::Delete => write!(f, "deleted"),
        }
    }
}

/// Coarse grouping of [`Error`] variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    ConnectionUnavailable,
    AlreadyExists,
    NotFound,
    InvalidArgument,
    PolicyViolation,
    ProtocolFailure,
    ReadTerminated,
    WriteFailed,
    Io,
}

#[derive(Debug, Error)]
pub enum Error {
    /// None of the bootstrap addresses accepted a connection.
    #[error("unable to connect to any of the specified bootstrappers [{}]: {source}", join(.attempted))]
    NoReachableBootstrap {
        attempted: Vec<Endpoint>,
        source: ProtocolError,
    },
    /// A bootstrap accepted the connection but could not name the controller.
    #[error("unable to ascertain the cluster controller: {0}")]
    ControllerUnknown(#[source] ProtocolError),
    /// The controller named by the bootstrap could not be dialed.
    #[error("unable to connect to the cluster controller at {controller}: {source}")]
    ControllerUnreachable {
        controller: Endpoint,
        source: ProtocolError,
    },
    #[error("cannot create topic '{0}'. topic already exists")]
    AlreadyExists(String),
    #[error("cannot delete topic '{0}'. topic does not exist")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The broker rejected a topic change on policy grounds.
    #[error("{}: {source}", policy_message(.operation, .topic))]
    PolicyViolation {
        topic: String,
        operation: TopicOperation,
        source: ProtocolError,
    },
    #[error("topic '{topic}' already exists or could not be created: {source}")]
    CreateFailed {
        topic: String,
        source: ProtocolError,
    },
    #[error("topic '{topic}' does not exist or could not be deleted: {source}")]
    DeleteFailed {
        topic: String,
        source: ProtocolError,
    },
    #[error("error reading cluster info: {0}")]
    Metadata(#[source] ProtocolError),
    /// A read sequence ended on a broker or transport failure.
    #[error("read of topic '{topic}' ({context}) terminated: {source}")]
    ReadTerminated {
        topic: String,
        context: String,
        source: ProtocolError,
    },
    #[error("error writing to topic '{topic}': {source}")]
    WriteFailed {
        topic: String,
        source: ProtocolError,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoReachableBootstrap { .. }
            | Error::ControllerUnknown(_)
            | Error::ControllerUnreachable { .. } => ErrorKind::ConnectionUnavailable,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::PolicyViolation { .. } => ErrorKind::PolicyViolation,
            Error::CreateFailed { .. } | Error::DeleteFailed { .. } | Error::Metadata(_) => {
                ErrorKind::ProtocolFailure
            }
            Error::ReadTerminated { .. } => ErrorKind::ReadTerminated,
            Error::WriteFailed { .. } => ErrorKind::WriteFailed,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }
}

fn join(endpoints: &[Endpoint]) -> String {
    endpoints
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn policy_message(operation: &TopicOperation, topic: &str) -> String {
    match operation {
        TopicOperation::Create => format!(
            "topic '{topic}' could not be created due to a policy violation. \
             this may be due to an invalid replication factor. \
             some container image instances used for development purposes require a value of 1 \
             whereas production instances often require a value of at least 3"
        ),
        TopicOperation::Delete => {
            format!("topic '{topic}' could not be {operation} due to a policy violation")
        }
    }
}
