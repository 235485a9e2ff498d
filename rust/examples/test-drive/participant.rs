use std::{future::Future, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::time::delay_for;
use tracing::{debug, info};

use secagg_client::{ClientError, KeysBroadcast, Participant as Client};
use secagg_core::{ClientId, ProtocolId};
use secagg_server::{
    coordinator::{CoordinatorError, RoundCoordinator},
    storage::MemoryStore,
};

#[derive(Debug, Error)]
pub enum ParticipantError {
    #[error("client step failed: {0}")]
    Client(#[from] ClientError),
    #[error("coordinator rejected the request: {0}")]
    Coordinator(#[from] CoordinatorError),
}

/// A simulated client talking to an in-process coordinator.
pub struct Participant {
    client: Client<KeysBroadcast>,
    coordinator: Arc<RoundCoordinator<MemoryStore>>,
    protocol_id: ProtocolId,
    input: Vec<f64>,
    drops_out: bool,
    period: Duration,
}

impl Participant {
    pub async fn register(
        id: ClientId,
        threshold: u32,
        coordinator: Arc<RoundCoordinator<MemoryStore>>,
        protocol_id: ProtocolId,
        input: Vec<f64>,
        drops_out: bool,
        period: Duration,
    ) -> Result<Self, ParticipantError> {
        let (client, broadcast) = Client::new(id.clone(), threshold);
        let response = coordinator
            .process_registration(protocol_id, id, broadcast)
            .await?;
        info!(
            "registered to round {} as participant {}",
            response.round_number, response.registered
        );
        Ok(Self {
            client,
            coordinator,
            protocol_id,
            input,
            drops_out,
            period,
        })
    }

    /// Goes through the remaining steps of the round.
    pub async fn run(self) -> Result<(), ParticipantError> {
        let Self {
            client,
            coordinator,
            protocol_id,
            input,
            drops_out,
            period,
        } = self;

        let key_broadcast = poll(period, || coordinator.key_broadcast(protocol_id)).await?;
        let (client, message) = client.share_keys(key_broadcast)?;
        coordinator.submit_key_shares(protocol_id, &message).await?;
        debug!("key shares submitted");
        if drops_out {
            info!("dropping out");
            return Ok(());
        }

        let cipher_broadcast = poll(period, || {
            coordinator.cipher_broadcast(protocol_id, client.id())
        })
        .await?;
        let (client, masked) = client.mask_input(cipher_broadcast, &input)?;
        coordinator.submit_masked_input(protocol_id, &masked).await?;
        debug!("masked input submitted");

        let unmask_broadcast = poll(period, || coordinator.unmask_broadcast(protocol_id)).await?;
        let (_, shares) = client.unmask(&unmask_broadcast)?;
        coordinator.submit_unmask_shares(protocol_id, &shares).await?;
        info!(
            "revealed {} seed shares and {} key shares",
            shares.seed_shares.len(),
            shares.key_shares.len()
        );
        Ok(())
    }
}

/// Retries a broadcast request until the broadcast becomes available.
async fn poll<T, F, Fut>(period: Duration, mut request: F) -> Result<T, CoordinatorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoordinatorError>>,
{
    loop {
        match request().await {
            Err(CoordinatorError::BroadcastUnavailable(_)) => delay_for(period).await,
            result => return result,
        }
    }
}
