//! Resolution of a bootstrap list into a connection to the cluster controller.
//!
//! Bootstrap addresses are dialed in order and the first one that accepts a
//! connection is asked who the controller is. The controller is then dialed
//! directly. Both hops are single attempts: a failure surfaces immediately and
//! the caller decides whether to resolve again.
use tracing::instrument;

use crate::{
    client::{AdminLink, BrokerClient, ProtocolError},
    config::Endpoint,
    error::{Error, Result},
};

/// The one live link to the controller, plus the addresses used to find it.
#[derive(Debug)]
pub struct ClusterConnection<L> {
    link: L,
    controller: Endpoint,
    bootstrap: Vec<Endpoint>,
}

impl<L: AdminLink> ClusterConnection<L> {
    pub fn controller(&self) -> &Endpoint {
        &self.controller
    }

    pub fn bootstrap(&self) -> &[Endpoint] {
        &self.bootstrap
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Close the controller link. Failures are logged, never returned.
    pub async fn close(mut self) {
        if let Err(err) = self.link.close().await {
            tracing::warn!(
                "Error closing connection to controller {}: {}",
                self.controller,
                err
            );
        }
    }
}

/// Connect to the controller of the cluster reachable through `bootstrap`.
#[instrument(name = "resolve-controller", level = "debug", skip(client))]
pub async fn connect<C: BrokerClient>(
    client: &C,
    bootstrap: &[Endpoint],
) -> Result<ClusterConnection<C::Link>> {
    if bootstrap.is_empty() {
        return Err(Error::invalid("at least one bootstrap address is required"));
    }

    let mut bootstrap_link = dial_first(client, bootstrap).await?;

    let controller = match bootstrap_link.controller().await {
        Ok(controller) => controller,
        Err(err) => {
            close_quietly(&mut bootstrap_link).await;
            return Err(Error::ControllerUnknown(err));
        }
    };
    tracing::info!("Cluster controller is {}", controller);

    let link = client.dial(&controller).await;
    close_quietly(&mut bootstrap_link).await;
    let link = link.map_err(|source| Error::ControllerUnreachable {
        controller: controller.clone(),
        source,
    })?;

    Ok(ClusterConnection {
        link,
        controller,
        bootstrap: bootstrap.to_vec(),
    })
}

/// Dial the bootstrap addresses in order, stopping at the first success.
async fn dial_first<C: BrokerClient>(client: &C, bootstrap: &[Endpoint]) -> Result<C::Link> {
    let mut last_err = ProtocolError::new("no bootstrap address was attempted");
    for endpoint in bootstrap {
        tracing::debug!("Connecting to bootstrapper {}", endpoint);
        match client.dial(endpoint).await {
            Ok(link) => return Ok(link),
            Err(err) => {
                tracing::warn!("error connecting to bootstrapper [{}]: {}", endpoint, err);
                last_err = err;
            }
        }
    }

    Err(Error::NoReachableBootstrap {
        attempted: bootstrap.to_vec(),
        source: last_err,
    })
}

async fn close_quietly<L: AdminLink>(link: &mut L) {
    if let Err(err) = link.close().await {
        tracing::debug!("Error closing bootstrap connection: {}", err);
    }
}
