//! The four client steps of the protocol.
//!
//! Each step is a pure function of the client's keys, the server broadcast of the step and the
//! state kept from earlier steps. The functions check the protocol preconditions before any
//! cryptography runs.

use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, warn};

use secagg_core::{
    cipher::{self, CipherError},
    keys::ClientKeys,
    mask::{self, MaskError},
    message::{
        EncryptedCipher,
        MaskedInput,
        PublicKeyBroadcast,
        ServerCipherBroadcast,
        ServerKeyBroadcast,
        ServerUnmaskBroadcast,
        ShareKeysMessage,
        UnmaskKeyShare,
        UnmaskSeedShare,
        UnmaskShares,
    },
    sharing::{self, SeedShare, SharingError},
    ClientId,
    MaskSeed,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
/// Errors of the client protocol steps.
pub enum ClientError {
    #[error("not enough participants: {required} required, {actual} available")]
    NotEnoughParticipants { required: usize, actual: usize },
    #[error("two participants announced the same public key")]
    DuplicateKeys,
    #[error("not enough ciphers: {required} required, {actual} received")]
    NotEnoughCiphers { required: usize, actual: usize },
    #[error("received a cipher from unknown sender {0}")]
    UnknownSender(ClientId),
    #[error("{0} is not a participant of the round")]
    NotAParticipant(ClientId),
    #[error("secret sharing failed: {0}")]
    Sharing(#[from] SharingError),
    #[error("cipher exchange failed: {0}")]
    Cipher(#[from] CipherError),
    #[error("masking failed: {0}")]
    Mask(#[from] MaskError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The mask seed of a client together with its own share of it.
///
/// The own share is revealed for unmasking if the client survives, so that its seed can be
/// recombined from the shares of any `k` survivors including itself.
pub struct LocalSeed {
    pub seed: MaskSeed,
    pub own_share: SeedShare,
}

/// Generates fresh keys and the public broadcast to register with.
pub fn setup() -> (ClientKeys, PublicKeyBroadcast) {
    let keys = ClientKeys::generate();
    let broadcast = keys.public_broadcast();
    (keys, broadcast)
}

/// Shares a fresh seed and the sharing key with every other participant.
///
/// Returns the seed, which is needed to mask the input, and one sealed cipher per peer.
///
/// # Errors
/// Fails with [`ClientError::NotEnoughParticipants`] if there are fewer participants than the
/// threshold, with [`ClientError::DuplicateKeys`] if two participants announced the same public
/// key and with [`ClientError::NotAParticipant`] if the client is not in the broadcast.
pub fn process_key_broadcast(
    user_id: &ClientId,
    keys: &ClientKeys,
    broadcast: &ServerKeyBroadcast,
    threshold: u32,
) -> Result<(LocalSeed, ShareKeysMessage), ClientError> {
    let n = broadcast.len();
    if n < threshold as usize {
        return Err(ClientError::NotEnoughParticipants {
            required: threshold as usize,
            actual: n,
        });
    }
    if broadcast.has_duplicate_keys() {
        return Err(ClientError::DuplicateKeys);
    }
    let position = broadcast
        .position(user_id)
        .ok_or_else(|| ClientError::NotAParticipant(user_id.clone()))?;

    let seed = mask::generate_seed();
    let mut seed_shares = sharing::create_seed_shares(seed, n as u32, threshold)?;
    let key_shares = sharing::create_key_shares(&keys.sharing.secret, n as u32, threshold)?;

    let mut ciphers = Vec::with_capacity(n - 1);
    for (index, (peer, key_share)) in broadcast.participants.iter().zip(key_shares).enumerate() {
        if index == position {
            continue;
        }
        let sealed = cipher::seal(
            user_id,
            &keys.cipher.secret,
            &peer.client_id,
            &peer.broadcast.cipher_public_key,
            key_share,
            seed_shares[index].clone(),
        )?;
        ciphers.push(EncryptedCipher {
            recipient: peer.client_id.clone(),
            cipher: sealed,
        });
    }
    debug!("{} sealed {} ciphers", user_id, ciphers.len());

    let local = LocalSeed {
        seed,
        own_share: seed_shares.swap_remove(position),
    };
    let message = ShareKeysMessage {
        user_id: user_id.clone(),
        ciphers,
    };
    Ok((local, message))
}

/// Masks the input.
///
/// The pairwise masks are formed with every peer that sent a cipher, in key broadcast order.
///
/// # Errors
/// Fails with [`ClientError::NotEnoughCiphers`] if fewer than `k - 1` ciphers arrived and with
/// [`ClientError::UnknownSender`] if a cipher comes from a client which is not in the broadcast.
pub fn process_cipher_broadcast(
    user_id: &ClientId,
    keys: &ClientKeys,
    cipher_broadcast: &ServerCipherBroadcast,
    key_broadcast: &ServerKeyBroadcast,
    input: &[f64],
    seed: MaskSeed,
    threshold: u32,
) -> Result<MaskedInput, ClientError> {
    let required = (threshold as usize).saturating_sub(1);
    let actual = cipher_broadcast.ciphers.len();
    if actual < required {
        return Err(ClientError::NotEnoughCiphers { required, actual });
    }
    if let Some(sender) = cipher_broadcast
        .senders()
        .find(|sender| key_broadcast.participant(sender).is_none())
    {
        return Err(ClientError::UnknownSender(sender.clone()));
    }

    let peers = key_broadcast.restricted_to(
        cipher_broadcast
            .senders()
            .chain(std::iter::once(user_id)),
    );
    let mask = mask::create_mask(user_id, &keys.sharing.secret, &peers, seed, input.len())?;
    let masked_input = mask::apply_mask(input, &mask)?;
    debug!("{} masked its input with {} peers", user_id, peers.len() - 1);

    Ok(MaskedInput {
        user_id: user_id.clone(),
        masked_input,
    })
}

/// Reveals the shares needed to unmask the aggregate.
///
/// For every peer which sent a cipher, the seed share is revealed if the peer survived and the
/// sharing key share otherwise. Never both for the same peer.
///
/// # Errors
/// Fails with [`ClientError::NotEnoughParticipants`] if fewer than `k` clients survived, with
/// [`ClientError::NotAParticipant`] if the client itself is not among them, with
/// [`ClientError::UnknownSender`] for ciphers of unregistered senders and with
/// [`ClientError::Cipher`] if a cipher cannot be opened.
pub fn process_unmask_broadcast(
    user_id: &ClientId,
    keys: &ClientKeys,
    cipher_broadcast: &ServerCipherBroadcast,
    unmask_broadcast: &ServerUnmaskBroadcast,
    key_broadcast: &ServerKeyBroadcast,
    local: &LocalSeed,
    threshold: u32,
) -> Result<UnmaskShares, ClientError> {
    let survivors = unmask_broadcast.participants.iter().collect::<HashSet<_>>();
    if survivors.len() < threshold as usize {
        return Err(ClientError::NotEnoughParticipants {
            required: threshold as usize,
            actual: survivors.len(),
        });
    }
    if !survivors.contains(user_id) {
        return Err(ClientError::NotAParticipant(user_id.clone()));
    }

    let mut key_shares = Vec::new();
    let mut seed_shares = vec![UnmaskSeedShare {
        peer: user_id.clone(),
        share: local.own_share.clone(),
    }];
    for addressed in &cipher_broadcast.ciphers {
        let sender = key_broadcast
            .participant(&addressed.sender)
            .ok_or_else(|| ClientError::UnknownSender(addressed.sender.clone()))?;
        let opened = cipher::open(
            user_id,
            &keys.cipher.secret,
            &sender.client_id,
            &sender.broadcast.cipher_public_key,
            &addressed.cipher,
        )
        .map_err(|err| {
            warn!("{} failed to open the cipher of {}: {}", user_id, sender.client_id, err);
            err
        })?;

        if survivors.contains(&sender.client_id) {
            seed_shares.push(UnmaskSeedShare {
                peer: sender.client_id.clone(),
                share: opened.seed_share,
            });
        } else {
            key_shares.push(UnmaskKeyShare {
                peer: sender.client_id.clone(),
                share: opened.key_share,
            });
        }
    }
    debug!(
        "{} reveals {} seed shares and {} key shares",
        user_id,
        seed_shares.len(),
        key_shares.len()
    );

    Ok(UnmaskShares {
        user_id: user_id.clone(),
        key_shares,
        seed_shares,
    })
}

#[cfg(test)]
mod tests {
    use secagg_core::{
        message::{AddressedCipher, Participant},
        sharing::combine_seed_shares,
    };

    use super::*;

    struct Client {
        id: ClientId,
        keys: ClientKeys,
    }

    fn clients(size: usize) -> (Vec<Client>, ServerKeyBroadcast) {
        let clients = (0..size)
            .map(|i| {
                let (keys, _) = setup();
                Client {
                    id: format!("client-{}", i).into(),
                    keys,
                }
            })
            .collect::<Vec<_>>();
        let broadcast = ServerKeyBroadcast {
            protocol_id: 1,
            round_id: 1,
            participants: clients
                .iter()
                .map(|client| Participant {
                    client_id: client.id.clone(),
                    broadcast: client.keys.public_broadcast(),
                })
                .collect(),
        };
        (clients, broadcast)
    }

    fn route(messages: &[ShareKeysMessage], recipient: &ClientId) -> ServerCipherBroadcast {
        ServerCipherBroadcast {
            recipient: recipient.clone(),
            ciphers: messages
                .iter()
                .filter(|message| &message.user_id != recipient)
                .flat_map(|message| {
                    message
                        .ciphers
                        .iter()
                        .filter(|cipher| &cipher.recipient == recipient)
                        .map(move |cipher| AddressedCipher {
                            sender: message.user_id.clone(),
                            cipher: cipher.cipher.clone(),
                        })
                })
                .collect(),
        }
    }

    #[test]
    fn test_not_enough_participants() {
        let (clients, broadcast) = clients(2);
        assert_eq!(
            process_key_broadcast(&clients[0].id, &clients[0].keys, &broadcast, 3),
            Err(ClientError::NotEnoughParticipants {
                required: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_duplicate_keys() {
        let (clients, mut broadcast) = clients(3);
        broadcast.participants[2].broadcast.cipher_public_key =
            broadcast.participants[1].broadcast.cipher_public_key;
        assert_eq!(
            process_key_broadcast(&clients[0].id, &clients[0].keys, &broadcast, 2),
            Err(ClientError::DuplicateKeys)
        );
    }

    #[test]
    fn test_not_a_participant() {
        let (_, broadcast) = clients(3);
        let (keys, _) = setup();
        assert_eq!(
            process_key_broadcast(&"stranger".into(), &keys, &broadcast, 2),
            Err(ClientError::NotAParticipant("stranger".into()))
        );
    }

    #[test]
    fn test_key_broadcast_produces_one_cipher_per_peer() {
        let (clients, broadcast) = clients(4);
        let (local, message) =
            process_key_broadcast(&clients[1].id, &clients[1].keys, &broadcast, 3).unwrap();
        assert_eq!(message.user_id, clients[1].id);
        let recipients = message
            .ciphers
            .iter()
            .map(|cipher| cipher.recipient.clone())
            .collect::<Vec<_>>();
        assert_eq!(
            recipients,
            vec![
                clients[0].id.clone(),
                clients[2].id.clone(),
                clients[3].id.clone()
            ]
        );
        assert_eq!(local.own_share.shamir_index, 2);

        // the own share and the shares of two peers recombine the seed
        let mut shares = vec![local.own_share.clone()];
        for (client, cipher) in clients[2..].iter().zip(&message.ciphers[1..]) {
            let opened = cipher::open(
                &client.id,
                &client.keys.cipher.secret,
                &clients[1].id,
                &clients[1].keys.cipher.public,
                &cipher.cipher,
            )
            .unwrap();
            shares.push(opened.seed_share);
        }
        assert_eq!(combine_seed_shares(&shares, 3).unwrap(), local.seed);
    }

    #[test]
    fn test_not_enough_ciphers() {
        let (clients, broadcast) = clients(3);
        let empty = ServerCipherBroadcast {
            recipient: clients[0].id.clone(),
            ciphers: Vec::new(),
        };
        assert_eq!(
            process_cipher_broadcast(
                &clients[0].id,
                &clients[0].keys,
                &empty,
                &broadcast,
                &[1.0; 5],
                7,
                3
            ),
            Err(ClientError::NotEnoughCiphers {
                required: 2,
                actual: 0
            })
        );
    }

    #[test]
    fn test_unknown_sender() {
        let (clients, broadcast) = clients(2);
        let forged = ServerCipherBroadcast {
            recipient: clients[0].id.clone(),
            ciphers: vec![AddressedCipher {
                sender: "mallory".into(),
                cipher: "00".to_string(),
            }],
        };
        assert_eq!(
            process_cipher_broadcast(
                &clients[0].id,
                &clients[0].keys,
                &forged,
                &broadcast,
                &[1.0; 5],
                7,
                2
            ),
            Err(ClientError::UnknownSender("mallory".into()))
        );
    }

    #[test]
    fn test_unmask_partitions_shares() {
        let (clients, broadcast) = clients(3);
        let shared = clients
            .iter()
            .map(|client| process_key_broadcast(&client.id, &client.keys, &broadcast, 2).unwrap())
            .collect::<Vec<_>>();
        let messages = shared
            .iter()
            .map(|(_, message)| message.clone())
            .collect::<Vec<_>>();

        // client-2 drops out after key sharing
        let unmask = ServerUnmaskBroadcast {
            participants: vec![clients[0].id.clone(), clients[1].id.clone()],
        };
        let shares = process_unmask_broadcast(
            &clients[0].id,
            &clients[0].keys,
            &route(&messages, &clients[0].id),
            &unmask,
            &broadcast,
            &shared[0].0,
            2,
        )
        .unwrap();

        let seed_peers = shares
            .seed_shares
            .iter()
            .map(|share| share.peer.clone())
            .collect::<Vec<_>>();
        assert_eq!(seed_peers, vec![clients[0].id.clone(), clients[1].id.clone()]);
        assert_eq!(shares.key_shares.len(), 1);
        assert_eq!(shares.key_shares[0].peer, clients[2].id);
    }

    #[test]
    fn test_unmask_tampered_cipher() {
        let (clients, broadcast) = clients(2);
        let shared = clients
            .iter()
            .map(|client| process_key_broadcast(&client.id, &client.keys, &broadcast, 2).unwrap())
            .collect::<Vec<_>>();
        let messages = shared
            .iter()
            .map(|(_, message)| message.clone())
            .collect::<Vec<_>>();
        let mut ciphers = route(&messages, &clients[0].id);
        let mut tampered = ciphers.ciphers[0].cipher.clone().into_bytes();
        tampered[0] = if tampered[0] == b'a' { b'b' } else { b'a' };
        ciphers.ciphers[0].cipher = String::from_utf8(tampered).unwrap();

        let unmask = ServerUnmaskBroadcast {
            participants: vec![clients[0].id.clone(), clients[1].id.clone()],
        };
        assert_eq!(
            process_unmask_broadcast(
                &clients[0].id,
                &clients[0].keys,
                &ciphers,
                &unmask,
                &broadcast,
                &shared[0].0,
                2,
            ),
            Err(ClientError::Cipher(CipherError::DecryptionFailed))
        );
    }

    #[test]
    fn test_unmask_not_enough_survivors() {
        let (clients, broadcast) = clients(3);
        let (local, _) = process_key_broadcast(&clients[0].id, &clients[0].keys, &broadcast, 2)
            .unwrap();
        let unmask = ServerUnmaskBroadcast {
            participants: vec![clients[0].id.clone()],
        };
        let no_ciphers = ServerCipherBroadcast {
            recipient: clients[0].id.clone(),
            ciphers: Vec::new(),
        };
        assert_eq!(
            process_unmask_broadcast(
                &clients[0].id,
                &clients[0].keys,
                &no_ciphers,
                &unmask,
                &broadcast,
                &local,
                2,
            ),
            Err(ClientError::NotEnoughParticipants {
                required: 2,
                actual: 1
            })
        );
    }
}
