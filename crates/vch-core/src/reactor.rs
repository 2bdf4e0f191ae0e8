//! Presence reactor: turns voice-room transitions into channel visibility and
//! purge-flag changes.
//!
//! Each transition is split into two independent halves:
//! - departure (previous room is bound): raise the purge flag if the room is
//!   now empty, revoke the member's overwrite, optionally post a notice
//! - arrival (next room is bound): clear the purge flag, grant the member an
//!   overwrite, optionally post a notice
//!
//! A member hopping between two bound rooms fires both halves. Occupancy is
//! always read from live platform state after the member has left, never from
//! the flag, so last-writer-wins on the flag is safe.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    domain::{
        arrival_notice, departure_notice, Binding, MemberId, PresenceTransition, TextChannelId,
        VoiceRoomId,
    },
    ports::{resolve_text, resolve_voice, BindingStore, PlatformPort},
    Result,
};

/// What happened to one half of a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HalfOutcome {
    /// The room involved is not bound (or absent).
    Skipped,
    Applied,
    Aborted(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionReport {
    pub departure: HalfOutcome,
    pub arrival: HalfOutcome,
}

impl TransitionReport {
    fn ignored() -> Self {
        Self {
            departure: HalfOutcome::Skipped,
            arrival: HalfOutcome::Skipped,
        }
    }
}

pub struct PresenceReactor {
    store: Arc<dyn BindingStore>,
    emit_log: bool,
}

impl PresenceReactor {
    pub fn new(store: Arc<dyn BindingStore>, emit_log: bool) -> Self {
        Self { store, emit_log }
    }

    /// Apply one transition. Never fails: every problem is logged and
    /// reflected in the report, and the next event starts from scratch.
    pub async fn handle(
        &self,
        platform: &dyn PlatformPort,
        transition: PresenceTransition,
    ) -> TransitionReport {
        if !transition.is_room_change() {
            return TransitionReport::ignored();
        }

        let bindings = match self.store.list_bindings().await {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    member = %transition.member,
                    error = %e,
                    "binding lookup failed, dropping transition"
                );
                let reason = e.to_string();
                return TransitionReport {
                    departure: transition
                        .previous
                        .map_or(HalfOutcome::Skipped, |_| HalfOutcome::Aborted(reason.clone())),
                    arrival: transition
                        .next
                        .map_or(HalfOutcome::Skipped, |_| HalfOutcome::Aborted(reason)),
                };
            }
        };

        let leaving = transition.previous.and_then(|room| bound(&bindings, room));
        let entering = transition.next.and_then(|room| bound(&bindings, room));

        let departure = match leaving {
            None => HalfOutcome::Skipped,
            Some(binding) => match self.depart(platform, binding, transition.member).await {
                Ok(()) => HalfOutcome::Applied,
                Err(e) => {
                    warn!(
                        voice = %binding.voice_id,
                        text = %binding.text_id,
                        member = %transition.member,
                        error = %e,
                        "departure aborted"
                    );
                    if e.is_store() {
                        let reason = e.to_string();
                        return TransitionReport {
                            departure: HalfOutcome::Aborted(reason.clone()),
                            arrival: entering
                                .map_or(HalfOutcome::Skipped, |_| HalfOutcome::Aborted(reason)),
                        };
                    }
                    HalfOutcome::Aborted(e.to_string())
                }
            },
        };

        let arrival = match entering {
            None => HalfOutcome::Skipped,
            Some(binding) => match self.arrive(platform, binding, transition.member).await {
                Ok(()) => HalfOutcome::Applied,
                Err(e) => {
                    warn!(
                        voice = %binding.voice_id,
                        text = %binding.text_id,
                        member = %transition.member,
                        error = %e,
                        "arrival aborted"
                    );
                    HalfOutcome::Aborted(e.to_string())
                }
            },
        };

        TransitionReport { departure, arrival }
    }

    async fn depart(
        &self,
        platform: &dyn PlatformPort,
        binding: Binding,
        member: MemberId,
    ) -> Result<()> {
        let text = resolve_text(platform, binding.text_id).await?;
        let voice = resolve_voice(platform, binding.voice_id).await?;

        // The gateway state is already post-transition: the leaving member is not counted.
        let occupants = platform.voice_occupancy(voice).await?;
        if occupants == 0 {
            self.store.set_flag(voice, true).await?;
            info!(voice = %voice, text = %text, "voice room empty, text channel flagged for purge");
        } else {
            debug!(voice = %voice, occupants, "voice room still occupied");
        }

        if let Err(e) = platform.revoke_view(text, member).await {
            warn!(text = %text, member = %member, error = %e, "failed to revoke view overwrite");
        }

        if self.emit_log {
            self.notify(platform, text, &departure_notice(member)).await;
        }

        Ok(())
    }

    async fn arrive(
        &self,
        platform: &dyn PlatformPort,
        binding: Binding,
        member: MemberId,
    ) -> Result<()> {
        let text = resolve_text(platform, binding.text_id).await?;

        // Unconditional write: the flag in `binding` may already be stale.
        self.store.set_flag(binding.voice_id, false).await?;

        if let Err(e) = platform.grant_view(text, member).await {
            warn!(text = %text, member = %member, error = %e, "failed to grant view overwrite");
        }

        if self.emit_log {
            self.notify(platform, text, &arrival_notice(member)).await;
        }

        Ok(())
    }

    async fn notify(&self, platform: &dyn PlatformPort, text: TextChannelId, body: &str) {
        if let Err(e) = platform.send_message(text, body).await {
            warn!(text = %text, error = %e, "failed to post presence notice");
        }
    }
}

fn bound(bindings: &[Binding], room: VoiceRoomId) -> Option<Binding> {
    bindings.iter().find(|b| b.voice_id == room).copied()
}
