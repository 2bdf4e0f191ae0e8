use std::fmt;

use chrono::{DateTime, Utc};

/// Any Discord channel id (snowflake), before its kind has been checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

/// A channel id that has been bound as a voice room.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceRoomId(pub u64);

/// A channel id that has been bound as a companion text channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextChannelId(pub u64);

/// Guild member (user) id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(pub u64);

/// Message id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl VoiceRoomId {
    pub fn channel(self) -> ChannelId {
        ChannelId(self.0)
    }
}

impl TextChannelId {
    pub fn channel(self) -> ChannelId {
        ChannelId(self.0)
    }
}

impl MemberId {
    /// Chat mention markup for this member.
    pub fn mention(self) -> String {
        format!("<@{}>", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for VoiceRoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for TextChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A standing pairing of one voice room to one text channel.
///
/// Rows are provisioned out-of-band. The bot only ever writes `purge_flag`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Binding {
    pub voice_id: VoiceRoomId,
    pub text_id: TextChannelId,
    pub purge_flag: bool,
}

/// A binding whose text channel is due for a purge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlaggedBinding {
    pub voice_id: VoiceRoomId,
    pub text_id: TextChannelId,
}

impl From<Binding> for FlaggedBinding {
    fn from(b: Binding) -> Self {
        Self {
            voice_id: b.voice_id,
            text_id: b.text_id,
        }
    }
}

/// A member's voice location change, as delivered by the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresenceTransition {
    pub member: MemberId,
    pub previous: Option<VoiceRoomId>,
    pub next: Option<VoiceRoomId>,
}

impl PresenceTransition {
    pub fn new(member: MemberId, previous: Option<VoiceRoomId>, next: Option<VoiceRoomId>) -> Self {
        Self {
            member,
            previous,
            next,
        }
    }

    /// Mute/deafen toggles arrive as transitions with the same room on both sides.
    pub fn is_room_change(&self) -> bool {
        self.previous != self.next
    }
}

/// What the platform says a channel id refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    Text,
    Voice,
    Other,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelKind::Text => "text",
            ChannelKind::Voice => "voice",
            ChannelKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// A message as seen by the purge loop: only the id and its age matter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchedMessage {
    pub id: MessageId,
    pub created_at: DateTime<Utc>,
}

pub fn arrival_notice(member: MemberId) -> String {
    format!("{} has entered the voice channel.", member.mention())
}

pub fn departure_notice(member: MemberId) -> String {
    format!("{} has left the voice channel.", member.mention())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_room_is_not_a_change() {
        let m = MemberId(7);
        let room = |id| Some(VoiceRoomId(id));
        assert!(!PresenceTransition::new(m, room(1), room(1)).is_room_change());
        assert!(!PresenceTransition::new(m, None, None).is_room_change());
        assert!(PresenceTransition::new(m, None, room(1)).is_room_change());
        assert!(PresenceTransition::new(m, room(1), room(2)).is_room_change());
    }

    #[test]
    fn notices_mention_the_member() {
        assert_eq!(
            arrival_notice(MemberId(42)),
            "<@42> has entered the voice channel."
        );
        assert_eq!(departure_notice(MemberId(42)), "<@42> has left the voice channel.");
    }
}
