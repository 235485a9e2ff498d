//! Messages exchanged between clients and the aggregator.
//!
//! All messages are plain serde structures. Binary values (keys, shares, signatures and sealed
//! ciphers) are hex encoded, so the JSON representation is the wire format:
//!
//! ```
//! # use secagg_core::message::MaskedInput;
//! let message = MaskedInput {
//!     user_id: "alice".into(),
//!     masked_input: vec![0.5, 1.5],
//! };
//! let json = serde_json::to_string(&message).unwrap();
//! assert_eq!(json, r#"{"user_id":"alice","masked_input":[0.5,1.5]}"#);
//! ```

use std::collections::HashSet;

use derive_more::{AsRef, Display, From, Into};

use crate::{
    crypto::{PublicAgreementKey, Signature},
    sharing::{KeyShare, SeedShare},
    ProtocolId,
    RoundId,
};

#[derive(
    AsRef,
    Display,
    From,
    Into,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
/// The identifier of a client.
pub struct ClientId(String);

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl ClientId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// The public keys a client announces when it registers for a round.
pub struct PublicKeyBroadcast {
    pub cipher_public_key: PublicAgreementKey,
    pub sharing_public_key: PublicAgreementKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// A registered client and its public keys.
pub struct Participant {
    pub client_id: ClientId,
    pub broadcast: PublicKeyBroadcast,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// The participants of a round, in registration order.
///
/// The order is canonical: it defines the signs of the pairwise masks.
pub struct ServerKeyBroadcast {
    pub protocol_id: ProtocolId,
    pub round_id: RoundId,
    pub participants: Vec<Participant>,
}

impl ServerKeyBroadcast {
    /// Gets the number of participants.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Gets a participant by its client id.
    pub fn participant(&self, client_id: &ClientId) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|participant| &participant.client_id == client_id)
    }

    /// Gets the position of a participant in the broadcast order.
    pub fn position(&self, client_id: &ClientId) -> Option<usize> {
        self.participants
            .iter()
            .position(|participant| &participant.client_id == client_id)
    }

    /// Checks whether two participants announced the same cipher or sharing public key.
    pub fn has_duplicate_keys(&self) -> bool {
        let mut keys = HashSet::with_capacity(2 * self.participants.len());
        !self.participants.iter().all(|participant| {
            keys.insert(participant.broadcast.cipher_public_key)
                && keys.insert(participant.broadcast.sharing_public_key)
        })
    }

    /// Gets the participants which are contained in `members`, keeping the broadcast order.
    pub fn restricted_to<'a, I>(&self, members: I) -> Vec<Participant>
    where
        I: IntoIterator<Item = &'a ClientId>,
    {
        let members = members.into_iter().collect::<HashSet<_>>();
        self.participants
            .iter()
            .filter(|participant| members.contains(&participant.client_id))
            .cloned()
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// A sealed cipher addressed to one recipient.
pub struct EncryptedCipher {
    pub recipient: ClientId,
    /// The hex encoded ciphertext.
    pub cipher: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// The ciphers a client addresses to each of its peers.
pub struct ShareKeysMessage {
    pub user_id: ClientId,
    pub ciphers: Vec<EncryptedCipher>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// A sealed cipher together with its sender.
pub struct AddressedCipher {
    pub sender: ClientId,
    /// The hex encoded ciphertext.
    pub cipher: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// The ciphers addressed to one recipient.
pub struct ServerCipherBroadcast {
    pub recipient: ClientId,
    pub ciphers: Vec<AddressedCipher>,
}

impl ServerCipherBroadcast {
    /// Gets the senders of the ciphers.
    pub fn senders(&self) -> impl Iterator<Item = &ClientId> {
        self.ciphers.iter().map(|cipher| &cipher.sender)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// A client's input vector with its mask applied.
pub struct MaskedInput {
    pub user_id: ClientId,
    pub masked_input: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// The clients which submitted a masked input.
pub struct ServerUnmaskBroadcast {
    pub participants: Vec<ClientId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// A seed share of a surviving peer.
pub struct UnmaskSeedShare {
    pub peer: ClientId,
    pub share: SeedShare,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// A sharing key share of a dropped peer.
pub struct UnmaskKeyShare {
    pub peer: ClientId,
    pub share: KeyShare,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// The shares a client reveals for unmasking.
pub struct UnmaskShares {
    pub user_id: ClientId,
    pub key_shares: Vec<UnmaskKeyShare>,
    pub seed_shares: Vec<UnmaskSeedShare>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// The unmasked sum of all submitted inputs.
pub struct AggregatedParameters {
    pub params: Vec<f64>,
}
