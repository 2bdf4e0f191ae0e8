//! In-memory fakes for the two ports, shared by the reactor and purge tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

use crate::{
    domain::{
        Binding, ChannelId, ChannelKind, FetchedMessage, FlaggedBinding, MemberId, MessageId,
        TextChannelId, VoiceRoomId,
    },
    errors::Error,
    ports::{BindingStore, PlatformPort},
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Grant(TextChannelId, MemberId),
    Revoke(TextChannelId, MemberId),
    Send(TextChannelId, String),
    Fetch(TextChannelId),
    BulkDelete(TextChannelId, usize),
    Delete(TextChannelId, MessageId),
}

impl Call {
    pub fn channel(&self) -> TextChannelId {
        match self {
            Call::Grant(c, _)
            | Call::Revoke(c, _)
            | Call::Send(c, _)
            | Call::Fetch(c)
            | Call::BulkDelete(c, _)
            | Call::Delete(c, _) => *c,
        }
    }
}

#[derive(Default)]
pub struct FakePlatform {
    kinds: Mutex<HashMap<ChannelId, ChannelKind>>,
    occupancy: Mutex<HashMap<VoiceRoomId, usize>>,
    overwrites: Mutex<HashSet<(TextChannelId, MemberId)>>,
    // Oldest first.
    messages: Mutex<HashMap<TextChannelId, Vec<FetchedMessage>>>,
    next_message: Mutex<u64>,
    failing_deletes: Mutex<HashSet<TextChannelId>>,
    refilling: Mutex<HashSet<TextChannelId>>,
    reject_permissions: Mutex<bool>,
    fetch_gate: Mutex<Option<Arc<Semaphore>>>,
    pub calls: Mutex<Vec<Call>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(self, id: u64) -> Self {
        self.kinds
            .lock()
            .unwrap()
            .insert(ChannelId(id), ChannelKind::Text);
        self
    }

    pub fn with_voice(self, id: u64, occupants: usize) -> Self {
        self.kinds
            .lock()
            .unwrap()
            .insert(ChannelId(id), ChannelKind::Voice);
        self.occupancy
            .lock()
            .unwrap()
            .insert(VoiceRoomId(id), occupants);
        self
    }

    pub fn set_occupancy(&self, room: u64, occupants: usize) {
        self.occupancy
            .lock()
            .unwrap()
            .insert(VoiceRoomId(room), occupants);
    }

    pub fn remove_channel(&self, id: u64) {
        self.kinds.lock().unwrap().remove(&ChannelId(id));
        self.occupancy.lock().unwrap().remove(&VoiceRoomId(id));
    }

    pub fn add_overwrite(&self, channel: u64, member: u64) {
        self.overwrites
            .lock()
            .unwrap()
            .insert((TextChannelId(channel), MemberId(member)));
    }

    pub fn has_overwrite(&self, channel: u64, member: u64) -> bool {
        self.overwrites
            .lock()
            .unwrap()
            .contains(&(TextChannelId(channel), MemberId(member)))
    }

    pub fn seed_messages(&self, channel: u64, count: usize, created_at: DateTime<Utc>) {
        let mut next = self.next_message.lock().unwrap();
        let mut map = self.messages.lock().unwrap();
        let list = map.entry(TextChannelId(channel)).or_default();
        for _ in 0..count {
            *next += 1;
            list.push(FetchedMessage {
                id: MessageId(*next),
                created_at,
            });
        }
    }

    pub fn message_count(&self, channel: u64) -> usize {
        self.messages
            .lock()
            .unwrap()
            .get(&TextChannelId(channel))
            .map(|v| v.len())
            .unwrap_or(0)
    }

    pub fn fail_deletes(&self, channel: u64) {
        self.failing_deletes
            .lock()
            .unwrap()
            .insert(TextChannelId(channel));
    }

    /// Simulate a busy channel: every fetch sees a freshly posted message.
    pub fn keep_refilling(&self, channel: u64) {
        self.refilling.lock().unwrap().insert(TextChannelId(channel));
    }

    /// Park every fetch until the returned gate hands out permits.
    pub fn hold_fetches(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.fetch_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn reject_permissions(&self) {
        *self.reject_permissions.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, channel: u64) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.channel() == TextChannelId(channel))
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_kind(&self, id: ChannelId, expected: ChannelKind) -> Result<()> {
        match self.kinds.lock().unwrap().get(&id) {
            Some(k) if *k == expected => Ok(()),
            _ => Err(Error::Resolution {
                what: "channel",
                id: id.0,
            }),
        }
    }

    fn remove_messages(&self, channel: TextChannelId, ids: &[MessageId]) {
        let mut map = self.messages.lock().unwrap();
        if let Some(list) = map.get_mut(&channel) {
            list.retain(|m| !ids.contains(&m.id));
        }
    }
}

#[async_trait]
impl PlatformPort for FakePlatform {
    async fn channel_kind(&self, channel: ChannelId) -> Result<ChannelKind> {
        self.kinds
            .lock()
            .unwrap()
            .get(&channel)
            .copied()
            .ok_or(Error::Resolution {
                what: "channel",
                id: channel.0,
            })
    }

    async fn voice_occupancy(&self, room: VoiceRoomId) -> Result<usize> {
        self.check_kind(room.channel(), ChannelKind::Voice)?;
        Ok(self
            .occupancy
            .lock()
            .unwrap()
            .get(&room)
            .copied()
            .unwrap_or(0))
    }

    async fn grant_view(&self, channel: TextChannelId, member: MemberId) -> Result<()> {
        self.record(Call::Grant(channel, member));
        if *self.reject_permissions.lock().unwrap() {
            return Err(Error::Permission("missing MANAGE_ROLES".to_string()));
        }
        self.overwrites.lock().unwrap().insert((channel, member));
        Ok(())
    }

    async fn revoke_view(&self, channel: TextChannelId, member: MemberId) -> Result<()> {
        self.record(Call::Revoke(channel, member));
        if *self.reject_permissions.lock().unwrap() {
            return Err(Error::Permission("missing MANAGE_ROLES".to_string()));
        }
        self.overwrites.lock().unwrap().remove(&(channel, member));
        Ok(())
    }

    async fn send_message(&self, channel: TextChannelId, body: &str) -> Result<()> {
        self.record(Call::Send(channel, body.to_string()));
        Ok(())
    }

    async fn fetch_messages(
        &self,
        channel: TextChannelId,
        limit: u8,
    ) -> Result<Vec<FetchedMessage>> {
        let gate = self.fetch_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        self.record(Call::Fetch(channel));
        self.check_kind(channel.channel(), ChannelKind::Text)?;
        if self.refilling.lock().unwrap().contains(&channel) {
            self.seed_messages(channel.0, 1, Utc::now());
        }
        let map = self.messages.lock().unwrap();
        let Some(list) = map.get(&channel) else {
            return Ok(Vec::new());
        };
        Ok(list.iter().rev().take(limit as usize).copied().collect())
    }

    async fn bulk_delete(&self, channel: TextChannelId, ids: &[MessageId]) -> Result<()> {
        self.record(Call::BulkDelete(channel, ids.len()));
        if self.failing_deletes.lock().unwrap().contains(&channel) {
            return Err(Error::External("Missing Permissions".to_string()));
        }
        self.remove_messages(channel, ids);
        Ok(())
    }

    async fn delete_message(&self, channel: TextChannelId, id: MessageId) -> Result<()> {
        self.record(Call::Delete(channel, id));
        if self.failing_deletes.lock().unwrap().contains(&channel) {
            return Err(Error::External("Missing Permissions".to_string()));
        }
        self.remove_messages(channel, &[id]);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<Binding>>,
    unavailable: Mutex<bool>,
    pub flag_writes: Mutex<Vec<(VoiceRoomId, bool)>>,
    pub flagged_queries: Mutex<usize>,
}

impl MemoryStore {
    pub fn new(rows: &[(u64, u64, bool)]) -> Self {
        let rows = rows
            .iter()
            .map(|&(voice, text, purge_flag)| Binding {
                voice_id: VoiceRoomId(voice),
                text_id: TextChannelId(text),
                purge_flag,
            })
            .collect();
        Self {
            rows: Mutex::new(rows),
            ..Default::default()
        }
    }

    pub fn flag(&self, voice: u64) -> Option<bool> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.voice_id == VoiceRoomId(voice))
            .map(|b| b.purge_flag)
    }

    pub fn go_down(&self) {
        *self.unavailable.lock().unwrap() = true;
    }

    pub fn writes(&self) -> usize {
        self.flag_writes.lock().unwrap().len()
    }

    fn check_up(&self) -> Result<()> {
        if *self.unavailable.lock().unwrap() {
            return Err(Error::Store("database is locked".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BindingStore for MemoryStore {
    async fn list_bindings(&self) -> Result<Vec<Binding>> {
        self.check_up()?;
        Ok(self.rows.lock().unwrap().clone())
    }

    async fn list_flagged(&self) -> Result<Vec<FlaggedBinding>> {
        *self.flagged_queries.lock().unwrap() += 1;
        self.check_up()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.purge_flag)
            .map(|b| FlaggedBinding::from(*b))
            .collect())
    }

    async fn set_flag(&self, voice_id: VoiceRoomId, purge: bool) -> Result<()> {
        self.check_up()?;
        self.flag_writes.lock().unwrap().push((voice_id, purge));
        for row in self.rows.lock().unwrap().iter_mut() {
            if row.voice_id == voice_id {
                row.purge_flag = purge;
            }
        }
        Ok(())
    }
}
