//! A session is one command's worth of cluster access.
//!
//! It owns the broker client and the resolved controller connection. Topology,
//! lifecycle, read and write operations are implemented on it in their own
//! modules.
use crate::{
    client::BrokerClient,
    config::Endpoint,
    error::Result,
    resolver::{self, ClusterConnection},
};

pub struct Session<C: BrokerClient> {
    client: C,
    connection: ClusterConnection<C::Link>,
}

impl<C: BrokerClient> Session<C> {
    /// Resolve the controller through `bootstrap` and open a session on it.
    pub async fn open(client: C, bootstrap: Vec<Endpoint>) -> Result<Self> {
        let connection = resolver::connect(&client, &bootstrap).await?;
        Ok(Self { client, connection })
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn bootstrap(&self) -> &[Endpoint] {
        self.connection.bootstrap()
    }

    pub fn controller(&self) -> &Endpoint {
        self.connection.controller()
    }

    pub(crate) fn connection_mut(&mut self) -> &mut ClusterConnection<C::Link> {
        &mut self.connection
    }

    /// Close the controller connection, logging any failure.
    pub async fn close(self) {
        self.connection.close().await;
    }
}
