//! A client which carries its state through the protocol steps.
//!
//! ```text
//! KeysBroadcast --share_keys--> SharesSubmitted --mask_input--> InputMasked --unmask--> UnmaskSubmitted
//! ```
//!
//! Every transition consumes the participant, so a step can't be repeated and the keys can't
//! outlive the protocol iteration.

use tracing::info;

use secagg_core::{
    keys::ClientKeys,
    message::{
        MaskedInput,
        PublicKeyBroadcast,
        ServerCipherBroadcast,
        ServerKeyBroadcast,
        ServerUnmaskBroadcast,
        ShareKeysMessage,
        UnmaskShares,
    },
    ClientId,
};

use crate::protocol::{self, ClientError, LocalSeed};

/// State shared by all steps.
#[derive(Debug)]
pub struct SharedState {
    pub id: ClientId,
    pub keys: ClientKeys,
    pub threshold: u32,
}

/// The public keys were broadcast.
#[derive(Debug)]
pub struct KeysBroadcast;

/// The ciphers were submitted.
#[derive(Debug)]
pub struct SharesSubmitted {
    key_broadcast: ServerKeyBroadcast,
    local: LocalSeed,
}

/// The masked input was submitted.
#[derive(Debug)]
pub struct InputMasked {
    key_broadcast: ServerKeyBroadcast,
    cipher_broadcast: ServerCipherBroadcast,
    local: LocalSeed,
}

/// The unmask shares were submitted; nothing is left to do.
#[derive(Debug)]
pub struct UnmaskSubmitted;

#[derive(Debug)]
pub struct Participant<S> {
    private: S,
    shared: SharedState,
}

impl<S> Participant<S> {
    pub fn id(&self) -> &ClientId {
        &self.shared.id
    }

    pub fn threshold(&self) -> u32 {
        self.shared.threshold
    }
}

impl Participant<KeysBroadcast> {
    /// Generates fresh keys and returns the broadcast to register with.
    pub fn new(id: ClientId, threshold: u32) -> (Self, PublicKeyBroadcast) {
        let (keys, broadcast) = protocol::setup();
        (Self::with_keys(id, keys, threshold), broadcast)
    }

    /// Starts from existing keys, for instance loaded from a serialized form.
    pub fn with_keys(id: ClientId, keys: ClientKeys, threshold: u32) -> Self {
        Self {
            private: KeysBroadcast,
            shared: SharedState {
                id,
                keys,
                threshold,
            },
        }
    }

    /// Shares the seed and the sharing key with the peers announced in the key broadcast.
    pub fn share_keys(
        self,
        key_broadcast: ServerKeyBroadcast,
    ) -> Result<(Participant<SharesSubmitted>, ShareKeysMessage), ClientError> {
        let (local, message) = protocol::process_key_broadcast(
            &self.shared.id,
            &self.shared.keys,
            &key_broadcast,
            self.shared.threshold,
        )?;
        info!("{} shared its keys with {} peers", self.shared.id, message.ciphers.len());
        let participant = Participant {
            private: SharesSubmitted {
                key_broadcast,
                local,
            },
            shared: self.shared,
        };
        Ok((participant, message))
    }
}

impl Participant<SharesSubmitted> {
    /// Masks the input with the peers which sent a cipher.
    pub fn mask_input(
        self,
        cipher_broadcast: ServerCipherBroadcast,
        input: &[f64],
    ) -> Result<(Participant<InputMasked>, MaskedInput), ClientError> {
        let SharesSubmitted {
            key_broadcast,
            local,
        } = self.private;
        let masked = protocol::process_cipher_broadcast(
            &self.shared.id,
            &self.shared.keys,
            &cipher_broadcast,
            &key_broadcast,
            input,
            local.seed,
            self.shared.threshold,
        )?;
        let participant = Participant {
            private: InputMasked {
                key_broadcast,
                cipher_broadcast,
                local,
            },
            shared: self.shared,
        };
        Ok((participant, masked))
    }
}

impl Participant<InputMasked> {
    /// Reveals the shares the aggregator needs to unmask the sum.
    pub fn unmask(
        self,
        unmask_broadcast: &ServerUnmaskBroadcast,
    ) -> Result<(Participant<UnmaskSubmitted>, UnmaskShares), ClientError> {
        let shares = protocol::process_unmask_broadcast(
            &self.shared.id,
            &self.shared.keys,
            &self.private.cipher_broadcast,
            unmask_broadcast,
            &self.private.key_broadcast,
            &self.private.local,
            self.shared.threshold,
        )?;
        let participant = Participant {
            private: UnmaskSubmitted,
            shared: self.shared,
        };
        Ok((participant, shares))
    }
}
