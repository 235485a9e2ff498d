use tracing_subscriber::{EnvFilter, FmtSubscriber};

use secagg_client::{KeysBroadcast, Participant};
use secagg_core::{testutils::client_ids, ClientId, ProtocolId};
use secagg_server::{
    coordinator::{state::RegistrationResponse, RoundCoordinator},
    settings::ProtocolSettings,
    storage::MemoryStore,
};

pub fn enable_logging() {
    let _ = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(true)
        .try_init();
}

pub fn settings(threshold: u32, min_participants: u32) -> ProtocolSettings {
    ProtocolSettings {
        threshold,
        min_participants,
        auto_advance: false,
        auto_advance_min: 0,
    }
}

pub async fn new_protocol(
    settings: ProtocolSettings,
) -> (RoundCoordinator<MemoryStore>, ProtocolId) {
    secagg_core::init().unwrap();
    let coordinator = RoundCoordinator::new(MemoryStore::new());
    let protocol = coordinator.create_protocol(settings).await.unwrap();
    (coordinator, protocol.id)
}

/// Registers `size` fresh clients named `client-0`, `client-1`, ...
pub async fn register_clients(
    coordinator: &RoundCoordinator<MemoryStore>,
    protocol_id: ProtocolId,
    size: usize,
    threshold: u32,
) -> Vec<(Participant<KeysBroadcast>, RegistrationResponse)> {
    let mut clients = Vec::with_capacity(size);
    for id in client_ids(size) {
        clients.push(register(coordinator, protocol_id, id, threshold).await);
    }
    clients
}

pub async fn register(
    coordinator: &RoundCoordinator<MemoryStore>,
    protocol_id: ProtocolId,
    id: ClientId,
    threshold: u32,
) -> (Participant<KeysBroadcast>, RegistrationResponse) {
    let (participant, broadcast) = Participant::new(id.clone(), threshold);
    let response = coordinator
        .process_registration(protocol_id, id, broadcast)
        .await
        .unwrap();
    (participant, response)
}
