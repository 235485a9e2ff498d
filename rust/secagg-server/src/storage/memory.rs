//! An in-memory [`RoundStore`].

use std::{collections::HashMap, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::{
    coordinator::{
        rules,
        state::{
            AggregationProtocol,
            ProtocolRound,
            ProtocolState,
            RoundStep,
            SubmissionCounts,
        },
    },
    settings::ProtocolSettings,
    storage::{Cas, Conflict, RoundStore, StorageResult, SubmissionAdd, SubmissionAddError},
};
use secagg_core::{
    message::{MaskedInput, Participant, ShareKeysMessage, UnmaskShares},
    ProtocolId,
    RoundId,
};

/// A round and everything submitted to it.
#[derive(Debug)]
struct RoundRecord {
    round: ProtocolRound,
    registrations: Vec<Participant>,
    key_shares: Vec<ShareKeysMessage>,
    masked_inputs: Vec<MaskedInput>,
    unmask_shares: Vec<UnmaskShares>,
}

impl RoundRecord {
    fn new(round: ProtocolRound) -> Self {
        Self {
            round,
            registrations: Vec::new(),
            key_shares: Vec::new(),
            masked_inputs: Vec::new(),
            unmask_shares: Vec::new(),
        }
    }

    fn counts(&self) -> SubmissionCounts {
        SubmissionCounts {
            registered: self.registrations.len() as u32,
            key_shares: self.key_shares.len() as u32,
            masked_inputs: self.masked_inputs.len() as u32,
            unmask_shares: self.unmask_shares.len() as u32,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    last_protocol_id: ProtocolId,
    last_round_id: RoundId,
    protocols: HashMap<ProtocolId, AggregationProtocol>,
    rounds: HashMap<RoundId, RoundRecord>,
}

impl Inner {
    /// Gets the stored protocol if it is still at the version of `protocol`.
    fn protocol_at_version(
        &mut self,
        protocol: &AggregationProtocol,
    ) -> StorageResult<Option<&mut AggregationProtocol>> {
        let stored = self
            .protocols
            .get_mut(&protocol.id)
            .ok_or_else(|| anyhow!("protocol {} does not exist", protocol.id))?;
        if stored.version == protocol.version {
            Ok(Some(stored))
        } else {
            Ok(None)
        }
    }

    /// Appends a submission to a round after the step and eligibility checks passed.
    fn append<F>(&mut self, round_id: RoundId, step: RoundStep, append: F) -> SubmissionAdd
    where
        F: FnOnce(&mut RoundRecord) -> Result<(), SubmissionAddError>,
    {
        let result = self
            .rounds
            .get_mut(&round_id)
            .ok_or(SubmissionAddError::UnknownRound)
            .and_then(|record| {
                rules::check_submission_step(&record.round, step)?;
                append(record)?;
                Ok(record.counts())
            });
        SubmissionAdd(result)
    }

    fn round_record(&self, round_id: RoundId) -> StorageResult<&RoundRecord> {
        self.rounds
            .get(&round_id)
            .ok_or_else(|| anyhow!("round {} does not exist", round_id))
    }
}

/// A [`RoundStore`] which keeps everything in memory.
///
/// Clones share the same state. Every operation holds a lock for its whole duration, which makes
/// the compare-and-swap updates and the appends atomic.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoundStore for MemoryStore {
    async fn create_protocol(
        &self,
        settings: ProtocolSettings,
    ) -> StorageResult<AggregationProtocol> {
        let mut inner = self.inner.lock().await;
        inner.last_protocol_id += 1;
        let now = Utc::now();
        let protocol = AggregationProtocol {
            id: inner.last_protocol_id,
            status: ProtocolState::Initialized,
            num_rounds: 0,
            active_round_id: None,
            next_round_id: None,
            settings,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        inner.protocols.insert(protocol.id, protocol.clone());
        Ok(protocol)
    }

    async fn protocol(&self, id: ProtocolId) -> StorageResult<Option<AggregationProtocol>> {
        Ok(self.inner.lock().await.protocols.get(&id).cloned())
    }

    async fn update_protocol(
        &self,
        protocol: &AggregationProtocol,
    ) -> StorageResult<Cas<AggregationProtocol>> {
        let mut inner = self.inner.lock().await;
        let stored = match inner.protocol_at_version(protocol)? {
            Some(stored) => stored,
            None => return Ok(Cas(Err(Conflict))),
        };
        *stored = AggregationProtocol {
            version: protocol.version + 1,
            updated_at: Utc::now(),
            ..protocol.clone()
        };
        Ok(Cas(Ok(stored.clone())))
    }

    async fn create_round(
        &self,
        protocol: &AggregationProtocol,
        activate: bool,
    ) -> StorageResult<Cas<(AggregationProtocol, ProtocolRound)>> {
        let mut inner = self.inner.lock().await;
        let round_id = inner.last_round_id + 1;
        let stored = match inner.protocol_at_version(protocol)? {
            Some(stored) => stored,
            None => return Ok(Cas(Err(Conflict))),
        };
        // a round is only queued behind an active round
        if !activate && stored.active_round_id.is_none() {
            return Ok(Cas(Err(Conflict)));
        }
        let slot = if activate {
            &mut stored.active_round_id
        } else {
            &mut stored.next_round_id
        };
        if slot.is_some() {
            return Ok(Cas(Err(Conflict)));
        }
        *slot = Some(round_id);

        let now = Utc::now();
        if activate {
            stored.status = ProtocolState::Active;
        }
        stored.num_rounds += 1;
        stored.version += 1;
        stored.updated_at = now;
        let round = ProtocolRound {
            id: round_id,
            protocol_id: stored.id,
            round_number: stored.num_rounds,
            step: RoundStep::Registration,
            closed: false,
            created_at: now,
            updated_at: now,
        };
        let protocol = stored.clone();

        inner.last_round_id = round_id;
        inner.rounds.insert(round_id, RoundRecord::new(round.clone()));
        Ok(Cas(Ok((protocol, round))))
    }

    async fn round(&self, id: RoundId) -> StorageResult<Option<ProtocolRound>> {
        let inner = self.inner.lock().await;
        Ok(inner.rounds.get(&id).map(|record| record.round.clone()))
    }

    async fn rounds(&self, protocol_id: ProtocolId) -> StorageResult<Vec<ProtocolRound>> {
        let inner = self.inner.lock().await;
        let mut rounds = inner
            .rounds
            .values()
            .filter(|record| record.round.protocol_id == protocol_id)
            .map(|record| record.round.clone())
            .collect::<Vec<_>>();
        rounds.sort_by_key(|round| round.round_number);
        Ok(rounds)
    }

    async fn update_round(
        &self,
        round: &ProtocolRound,
        expected_step: RoundStep,
    ) -> StorageResult<Cas<ProtocolRound>> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .rounds
            .get_mut(&round.id)
            .ok_or_else(|| anyhow!("round {} does not exist", round.id))?;
        if record.round.step != expected_step || record.round.closed {
            return Ok(Cas(Err(Conflict)));
        }
        record.round = ProtocolRound {
            updated_at: Utc::now(),
            ..round.clone()
        };
        Ok(Cas(Ok(record.round.clone())))
    }

    async fn complete_round(
        &self,
        protocol: &AggregationProtocol,
        round_id: RoundId,
    ) -> StorageResult<Cas<AggregationProtocol>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let stored = match inner.protocol_at_version(protocol)? {
            Some(stored) if stored.active_round_id == Some(round_id) => stored,
            _ => return Ok(Cas(Err(Conflict))),
        };
        stored.active_round_id = stored.next_round_id.take();
        stored.status = if stored.active_round_id.is_some() {
            ProtocolState::Active
        } else {
            ProtocolState::Inactive
        };
        stored.version += 1;
        stored.updated_at = now;
        let protocol = stored.clone();

        let record = inner
            .rounds
            .get_mut(&round_id)
            .ok_or_else(|| anyhow!("round {} does not exist", round_id))?;
        record.round.closed = true;
        record.round.updated_at = now;
        Ok(Cas(Ok(protocol)))
    }

    async fn append_key_broadcast(
        &self,
        round_id: RoundId,
        participant: &Participant,
    ) -> StorageResult<SubmissionAdd> {
        let mut inner = self.inner.lock().await;
        Ok(inner.append(round_id, RoundStep::Registration, |record| {
            rules::check_registration(&record.registrations, participant)?;
            record.registrations.push(participant.clone());
            Ok(())
        }))
    }

    async fn append_key_shares(
        &self,
        round_id: RoundId,
        message: &ShareKeysMessage,
    ) -> StorageResult<SubmissionAdd> {
        let mut inner = self.inner.lock().await;
        Ok(inner.append(round_id, RoundStep::KeySharing, |record| {
            rules::check_key_shares(&record.registrations, &record.key_shares, message)?;
            record.key_shares.push(message.clone());
            Ok(())
        }))
    }

    async fn append_masked_input(
        &self,
        round_id: RoundId,
        input: &MaskedInput,
    ) -> StorageResult<SubmissionAdd> {
        let mut inner = self.inner.lock().await;
        Ok(inner.append(round_id, RoundStep::Masking, |record| {
            rules::check_masked_input(&record.key_shares, &record.masked_inputs, input)?;
            record.masked_inputs.push(input.clone());
            Ok(())
        }))
    }

    async fn append_unmask_shares(
        &self,
        round_id: RoundId,
        shares: &UnmaskShares,
    ) -> StorageResult<SubmissionAdd> {
        let mut inner = self.inner.lock().await;
        Ok(inner.append(round_id, RoundStep::Unmasking, |record| {
            rules::check_unmask_shares(&record.masked_inputs, &record.unmask_shares, shares)?;
            record.unmask_shares.push(shares.clone());
            Ok(())
        }))
    }

    async fn list_key_broadcasts(&self, round_id: RoundId) -> StorageResult<Vec<Participant>> {
        let inner = self.inner.lock().await;
        Ok(inner.round_record(round_id)?.registrations.clone())
    }

    async fn list_key_shares(&self, round_id: RoundId) -> StorageResult<Vec<ShareKeysMessage>> {
        let inner = self.inner.lock().await;
        Ok(inner.round_record(round_id)?.key_shares.clone())
    }

    async fn list_masked_inputs(&self, round_id: RoundId) -> StorageResult<Vec<MaskedInput>> {
        let inner = self.inner.lock().await;
        Ok(inner.round_record(round_id)?.masked_inputs.clone())
    }

    async fn list_unmask_shares(&self, round_id: RoundId) -> StorageResult<Vec<UnmaskShares>> {
        let inner = self.inner.lock().await;
        Ok(inner.round_record(round_id)?.unmask_shares.clone())
    }

    async fn submission_counts(
        &self,
        round_id: RoundId,
    ) -> StorageResult<Option<SubmissionCounts>> {
        let inner = self.inner.lock().await;
        Ok(inner.rounds.get(&round_id).map(RoundRecord::counts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secagg_core::testutils::{client_ids, key_broadcast};

    fn settings() -> ProtocolSettings {
        ProtocolSettings {
            threshold: 2,
            min_participants: 2,
            auto_advance: false,
            auto_advance_min: 0,
        }
    }

    #[tokio::test]
    async fn test_create_protocol() {
        let store = MemoryStore::new();
        let first = store.create_protocol(settings()).await.unwrap();
        let second = store.create_protocol(settings()).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(first.status, ProtocolState::Initialized);
        assert_eq!(store.protocol(1).await.unwrap(), Some(first));
        assert_eq!(store.protocol(3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_protocol_conflict() {
        let store = MemoryStore::new();
        let protocol = store.create_protocol(settings()).await.unwrap();

        let mut cancelled = protocol.clone();
        cancelled.status = ProtocolState::Cancelled;
        let updated = store
            .update_protocol(&cancelled)
            .await
            .unwrap()
            .into_inner()
            .unwrap();
        assert_eq!(updated.version, 1);

        // the stale snapshot loses
        let cas = store.update_protocol(&protocol).await.unwrap();
        assert_eq!(cas.into_inner(), Err(Conflict));
    }

    #[tokio::test]
    async fn test_create_round_slots() {
        let store = MemoryStore::new();
        let protocol = store.create_protocol(settings()).await.unwrap();

        // no active round to queue behind
        assert!(store.create_round(&protocol, false).await.unwrap().is_err());
        let protocol = store.protocol(protocol.id).await.unwrap().unwrap();
        assert_eq!(protocol.next_round_id, None);
        assert_eq!(protocol.num_rounds, 0);

        let (protocol, active) = store
            .create_round(&protocol, true)
            .await
            .unwrap()
            .into_inner()
            .unwrap();
        assert_eq!(protocol.status, ProtocolState::Active);
        assert_eq!(protocol.active_round_id, Some(active.id));
        assert_eq!(active.round_number, 1);
        assert_eq!(active.step, RoundStep::Registration);

        // the active slot is taken
        assert!(store.create_round(&protocol, true).await.unwrap().is_err());

        let (protocol, queued) = store
            .create_round(&protocol, false)
            .await
            .unwrap()
            .into_inner()
            .unwrap();
        assert_eq!(protocol.next_round_id, Some(queued.id));
        assert_eq!(queued.round_number, 2);
        assert_eq!(protocol.num_rounds, 2);

        let rounds = store.rounds(protocol.id).await.unwrap();
        assert_eq!(rounds, vec![active, queued]);
    }

    #[tokio::test]
    async fn test_update_round_expected_step() {
        let store = MemoryStore::new();
        let protocol = store.create_protocol(settings()).await.unwrap();
        let (_, round) = store
            .create_round(&protocol, true)
            .await
            .unwrap()
            .into_inner()
            .unwrap();

        let mut advanced = round.clone();
        advanced.step = RoundStep::KeySharing;
        let stored = store
            .update_round(&advanced, RoundStep::Registration)
            .await
            .unwrap()
            .into_inner()
            .unwrap();
        assert_eq!(stored.step, RoundStep::KeySharing);

        // a second advance from the same snapshot is rejected
        let cas = store
            .update_round(&advanced, RoundStep::Registration)
            .await
            .unwrap();
        assert_eq!(cas.into_inner(), Err(Conflict));
    }

    #[tokio::test]
    async fn test_complete_round_activates_queued_round() {
        let store = MemoryStore::new();
        let protocol = store.create_protocol(settings()).await.unwrap();
        let (protocol, first) = store
            .create_round(&protocol, true)
            .await
            .unwrap()
            .into_inner()
            .unwrap();
        let (protocol, second) = store
            .create_round(&protocol, false)
            .await
            .unwrap()
            .into_inner()
            .unwrap();

        let protocol = store
            .complete_round(&protocol, first.id)
            .await
            .unwrap()
            .into_inner()
            .unwrap();
        assert_eq!(protocol.active_round_id, Some(second.id));
        assert_eq!(protocol.next_round_id, None);
        assert_eq!(protocol.status, ProtocolState::Active);
        assert!(store.round(first.id).await.unwrap().unwrap().closed);

        let protocol = store
            .complete_round(&protocol, second.id)
            .await
            .unwrap()
            .into_inner()
            .unwrap();
        assert_eq!(protocol.active_round_id, None);
        assert_eq!(protocol.status, ProtocolState::Inactive);
    }

    #[tokio::test]
    async fn test_append_checks_step_and_duplicates() {
        let store = MemoryStore::new();
        let protocol = store.create_protocol(settings()).await.unwrap();
        let (_, round) = store
            .create_round(&protocol, true)
            .await
            .unwrap()
            .into_inner()
            .unwrap();
        let (_, broadcast) = key_broadcast(protocol.id, round.id, &client_ids(2));

        let counts = store
            .append_key_broadcast(round.id, &broadcast.participants[0])
            .await
            .unwrap()
            .into_inner()
            .unwrap();
        assert_eq!(counts.registered, 1);
        let add = store
            .append_key_broadcast(round.id, &broadcast.participants[0])
            .await
            .unwrap();
        assert_eq!(add.into_inner(), Err(SubmissionAddError::AlreadySubmitted));

        let add = store
            .append_key_broadcast(round.id + 1, &broadcast.participants[1])
            .await
            .unwrap();
        assert_eq!(add.into_inner(), Err(SubmissionAddError::UnknownRound));

        let input = MaskedInput {
            user_id: broadcast.participants[0].client_id.clone(),
            masked_input: vec![1.0],
        };
        let add = store.append_masked_input(round.id, &input).await.unwrap();
        assert_eq!(add.into_inner(), Err(SubmissionAddError::StepMismatch));

        assert_eq!(
            store.list_key_broadcasts(round.id).await.unwrap(),
            broadcast.participants[..1].to_vec()
        );
        assert!(store.list_key_shares(round.id + 1).await.is_err());
        assert_eq!(store.submission_counts(round.id + 1).await.unwrap(), None);
    }
}
