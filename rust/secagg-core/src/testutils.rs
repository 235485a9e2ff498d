//! Helpers to set up groups of clients in tests.

use crate::{
    keys::ClientKeys,
    message::{Participant, ServerKeyBroadcast},
    ClientId,
    ProtocolId,
    RoundId,
};

/// Gets the ids `client-0`, `client-1`, ... for a group of the given size.
pub fn client_ids(size: usize) -> Vec<ClientId> {
    (0..size).map(|i| format!("client-{}", i).into()).collect()
}

/// Generates keys for every client and the key broadcast listing them in the given order.
pub fn key_broadcast(
    protocol_id: ProtocolId,
    round_id: RoundId,
    ids: &[ClientId],
) -> (Vec<ClientKeys>, ServerKeyBroadcast) {
    let keys = ids.iter().map(|_| ClientKeys::generate()).collect::<Vec<_>>();
    let participants = ids
        .iter()
        .zip(&keys)
        .map(|(client_id, keys)| Participant {
            client_id: client_id.clone(),
            broadcast: keys.public_broadcast(),
        })
        .collect();
    let broadcast = ServerKeyBroadcast {
        protocol_id,
        round_id,
        participants,
    };
    (keys, broadcast)
}

/// Asserts that two vectors agree element-wise up to `tolerance`.
pub fn assert_close(actual: &[f64], expected: &[f64], tolerance: f64) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() < tolerance,
            "element {} differs: {} vs {}",
            i,
            a,
            e
        );
    }
}
