mod common;

use secagg_core::testutils::assert_close;
use secagg_server::{
    coordinator::{state::RoundStep, CoordinatorError},
    settings::ProtocolSettings,
    storage::SubmissionAddError,
};

use crate::common::{enable_logging, new_protocol, register, register_clients, settings};

#[tokio::test]
async fn test_full_round_without_dropouts() {
    enable_logging();
    let (coordinator, protocol_id) = new_protocol(settings(2, 2)).await;
    let clients = register_clients(&coordinator, protocol_id, 3, 2).await;
    assert_eq!(clients[2].1.registered, 3);
    coordinator.advance_round(protocol_id).await.unwrap();

    let key_broadcast = coordinator.key_broadcast(protocol_id).await.unwrap();
    let mut sharing = Vec::new();
    for (client, _) in clients {
        let (client, message) = client.share_keys(key_broadcast.clone()).unwrap();
        coordinator
            .submit_key_shares(protocol_id, &message)
            .await
            .unwrap();
        sharing.push(client);
    }
    coordinator.advance_round(protocol_id).await.unwrap();

    let mut masking = Vec::new();
    for client in sharing {
        let ciphers = coordinator
            .cipher_broadcast(protocol_id, client.id())
            .await
            .unwrap();
        assert_eq!(ciphers.ciphers.len(), 2);
        let (client, masked) = client.mask_input(ciphers, &[0.0; 100]).unwrap();
        coordinator
            .submit_masked_input(protocol_id, &masked)
            .await
            .unwrap();
        masking.push(client);
    }
    coordinator.advance_round(protocol_id).await.unwrap();

    let unmask_broadcast = coordinator.unmask_broadcast(protocol_id).await.unwrap();
    assert_eq!(unmask_broadcast.participants.len(), 3);
    for client in masking {
        let (_, shares) = client.unmask(&unmask_broadcast).unwrap();
        assert!(shares.key_shares.is_empty());
        coordinator
            .submit_unmask_shares(protocol_id, &shares)
            .await
            .unwrap();
    }

    let aggregated = coordinator.aggregate_round(protocol_id).await.unwrap();
    assert_close(&aggregated.params, &[0.0; 100], 1e-9);

    let status = coordinator.protocol_status(protocol_id, None).await.unwrap();
    assert_eq!(status.active_round_id, None);
    assert_eq!(status.num_rounds, 1);
}

#[tokio::test]
async fn test_full_round_with_dropout() {
    enable_logging();
    let (coordinator, protocol_id) = new_protocol(settings(2, 3)).await;
    let clients = register_clients(&coordinator, protocol_id, 3, 2).await;
    coordinator.advance_round(protocol_id).await.unwrap();

    let key_broadcast = coordinator.key_broadcast(protocol_id).await.unwrap();
    let mut sharing = Vec::new();
    for (client, _) in clients {
        let (client, message) = client.share_keys(key_broadcast.clone()).unwrap();
        coordinator
            .submit_key_shares(protocol_id, &message)
            .await
            .unwrap();
        sharing.push(client);
    }
    coordinator.advance_round(protocol_id).await.unwrap();

    // the last client drops out after key sharing
    sharing.pop();
    let mut masking = Vec::new();
    for client in sharing {
        let ciphers = coordinator
            .cipher_broadcast(protocol_id, client.id())
            .await
            .unwrap();
        let (client, masked) = client.mask_input(ciphers, &[0.0; 1000]).unwrap();
        coordinator
            .submit_masked_input(protocol_id, &masked)
            .await
            .unwrap();
        masking.push(client);
    }
    coordinator.advance_round(protocol_id).await.unwrap();

    let unmask_broadcast = coordinator.unmask_broadcast(protocol_id).await.unwrap();
    assert_eq!(unmask_broadcast.participants.len(), 2);
    for client in masking {
        let (_, shares) = client.unmask(&unmask_broadcast).unwrap();
        assert_eq!(shares.key_shares.len(), 1);
        coordinator
            .submit_unmask_shares(protocol_id, &shares)
            .await
            .unwrap();
    }

    let aggregated = coordinator.aggregate_round(protocol_id).await.unwrap();
    assert_close(&aggregated.params, &[0.0; 1000], 1e-9);
}

#[tokio::test]
async fn test_registration_after_close() {
    enable_logging();
    let (coordinator, protocol_id) = new_protocol(settings(2, 5)).await;
    let clients = register_clients(&coordinator, protocol_id, 5, 2).await;
    let first_round = clients[0].1.round_id;
    assert!(clients.iter().all(|(_, response)| response.round_id == first_round));
    assert_eq!(clients[4].1.registered, 5);

    let round = coordinator.advance_round(protocol_id).await.unwrap();
    assert_eq!(round.step, RoundStep::KeySharing);

    let (_, late) = register(&coordinator, protocol_id, "client-5".into(), 2).await;
    assert_ne!(late.round_id, first_round);
    assert_eq!(late.round_number, 2);
    assert_eq!(late.registered, 1);
    assert_eq!(late.step, RoundStep::Registration);

    let status = coordinator
        .protocol_status(protocol_id, Some(late.round_id))
        .await
        .unwrap();
    assert_eq!(status.active_round_id, Some(first_round));
    assert_eq!(status.round.unwrap().registered, 1);
}

#[tokio::test]
async fn test_auto_advance_through_a_round() {
    enable_logging();
    let settings = ProtocolSettings {
        auto_advance: true,
        auto_advance_min: 3,
        ..settings(2, 3)
    };
    let (coordinator, protocol_id) = new_protocol(settings).await;
    let clients = register_clients(&coordinator, protocol_id, 3, 2).await;
    assert_eq!(clients[1].1.step, RoundStep::Registration);
    assert_eq!(clients[2].1.step, RoundStep::KeySharing);

    let key_broadcast = coordinator.key_broadcast(protocol_id).await.unwrap();
    let mut sharing = Vec::new();
    let mut steps = Vec::new();
    for (client, _) in clients {
        let (client, message) = client.share_keys(key_broadcast.clone()).unwrap();
        let response = coordinator
            .submit_key_shares(protocol_id, &message)
            .await
            .unwrap();
        steps.push(response.step);
        sharing.push(client);
    }
    assert_eq!(
        steps,
        vec![RoundStep::KeySharing, RoundStep::KeySharing, RoundStep::Masking]
    );

    let mut masking = Vec::new();
    let inputs = [vec![1.0; 10], vec![2.0; 10], vec![3.0; 10]];
    for (client, input) in sharing.into_iter().zip(&inputs) {
        let ciphers = coordinator
            .cipher_broadcast(protocol_id, client.id())
            .await
            .unwrap();
        let (client, masked) = client.mask_input(ciphers, input).unwrap();
        coordinator
            .submit_masked_input(protocol_id, &masked)
            .await
            .unwrap();
        masking.push(client);
    }
    let status = coordinator.protocol_status(protocol_id, None).await.unwrap();
    assert_eq!(status.round.unwrap().step, RoundStep::Unmasking);

    let unmask_broadcast = coordinator.unmask_broadcast(protocol_id).await.unwrap();
    for client in masking {
        let (_, shares) = client.unmask(&unmask_broadcast).unwrap();
        coordinator
            .submit_unmask_shares(protocol_id, &shares)
            .await
            .unwrap();
    }
    let aggregated = coordinator.aggregate_round(protocol_id).await.unwrap();
    assert_close(&aggregated.params, &[6.0; 10], 1e-9);
}

#[tokio::test]
async fn test_submissions_are_gated_by_step() {
    enable_logging();
    let (coordinator, protocol_id) = new_protocol(settings(2, 2)).await;
    let mut clients = register_clients(&coordinator, protocol_id, 2, 2).await;
    assert!(matches!(
        coordinator.aggregate_round(protocol_id).await,
        Err(CoordinatorError::WrongStep {
            expected: RoundStep::Unmasking,
            actual: RoundStep::Registration,
        })
    ));
    coordinator.advance_round(protocol_id).await.unwrap();

    let key_broadcast = coordinator.key_broadcast(protocol_id).await.unwrap();
    let (client, _) = clients.remove(0);
    let (_, message) = client.share_keys(key_broadcast).unwrap();
    coordinator
        .submit_key_shares(protocol_id, &message)
        .await
        .unwrap();
    assert!(matches!(
        coordinator.submit_key_shares(protocol_id, &message).await,
        Err(CoordinatorError::Submission(
            SubmissionAddError::AlreadySubmitted
        ))
    ));
    assert!(matches!(
        coordinator.cipher_broadcast(protocol_id, &message.user_id).await,
        Err(CoordinatorError::BroadcastUnavailable(RoundStep::Masking))
    ));

    // one of two minimal participants shared its keys
    assert!(matches!(
        coordinator.advance_round(protocol_id).await,
        Err(CoordinatorError::RequirementsNotMet {
            step: RoundStep::KeySharing,
            have: 1,
            need: 2,
        })
    ));
}
