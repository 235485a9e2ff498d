//! Test-drive of a secure aggregation round with an in-process coordinator.
//!
//! Every client contributes a vector of ones, so the aggregate equals the number of clients which
//! did not drop out.

use std::{sync::Arc, time::Duration};

use structopt::StructOpt;
use thiserror::Error;
use tokio::{task::JoinHandle, time::delay_for};
use tracing::{error_span, info, warn};
use tracing_futures::Instrument;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use secagg_core::InitError;
use secagg_server::{
    coordinator::{state::RoundStep, CoordinatorError, RoundCoordinator},
    settings::SettingsError,
    storage::MemoryStore,
};

use self::participant::ParticipantError;

mod participant;
mod settings;

#[derive(Debug, Error)]
enum TestDriveError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Init(#[from] InitError),
    #[error(transparent)]
    Participant(#[from] ParticipantError),
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

#[tokio::main]
async fn main() -> Result<(), TestDriveError> {
    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(true)
        .init();

    let opt = settings::Opt::from_args();
    let protocol_settings = opt.protocol_settings()?;
    let period = Duration::from_millis(opt.period);

    secagg_core::init()?;
    let coordinator = Arc::new(RoundCoordinator::new(MemoryStore::new()));
    let protocol = coordinator.create_protocol(protocol_settings).await?;
    let threshold = protocol.settings.threshold;

    let mut participants = Vec::new();
    for id in 0..opt.nb_client {
        let participant = participant::Participant::register(
            format!("client-{}", id).into(),
            threshold,
            coordinator.clone(),
            protocol.id,
            vec![1.0; opt.len],
            id < opt.dropouts,
            period,
        )
        .instrument(error_span!("participant", id = id))
        .await?;
        participants.push(participant);
    }

    let handles = participants
        .into_iter()
        .enumerate()
        .map(|(id, participant)| {
            tokio::spawn(
                async move {
                    if let Err(err) = participant.run().await {
                        warn!("participant failed: {:?}", err);
                    }
                }
                .instrument(error_span!("participant", id = id)),
            )
        })
        .collect::<Vec<JoinHandle<()>>>();

    let survivors = opt.nb_client.saturating_sub(opt.dropouts);
    loop {
        let status = coordinator.protocol_status(protocol.id, None).await?;
        let round = match status.round {
            Some(round) => round,
            None => break,
        };
        let ready = match round.step {
            RoundStep::Registration => round.registered == opt.nb_client,
            RoundStep::KeySharing => round.key_shares == round.registered,
            RoundStep::Masking => round.masked_inputs == survivors,
            RoundStep::Unmasking => round.unmask_shares == round.masked_inputs,
        };
        if !ready {
            delay_for(period).await;
            continue;
        }
        if round.step == RoundStep::Unmasking {
            let aggregated = coordinator.aggregate_round(protocol.id).await?;
            info!("aggregated {:?}", aggregated.params);
            continue;
        }
        match coordinator.advance_round(protocol.id).await {
            Ok(_) | Err(CoordinatorError::Conflict(_)) => {}
            // a submission advanced the round in the meantime
            Err(CoordinatorError::RequirementsNotMet { step, .. }) if step != round.step => {}
            Err(err) => return Err(err.into()),
        }
    }

    for handle in handles {
        let _ = handle.await;
    }
    coordinator.finish_protocol(protocol.id).await?;
    Ok(())
}
