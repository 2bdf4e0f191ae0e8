use std::sync::Arc;

use anyhow::Context as _;
use serenity::{
    all::{ChannelId, Context, EventHandler, GatewayIntents, Ready, UserId, VoiceState},
    async_trait, Client,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use vch_core::{
    config::Config,
    domain::{MemberId, PresenceTransition, VoiceRoomId},
    ports::{BindingStore, PlatformPort},
    purge::{PurgeScheduler, PurgeSettings},
    reactor::PresenceReactor,
};

use crate::DiscordPlatform;

pub struct Handler {
    reactor: Arc<PresenceReactor>,
    scheduler: PurgeScheduler,
    // One transition at a time, each to completion.
    sequencer: Mutex<()>,
}

impl Handler {
    pub fn new(reactor: Arc<PresenceReactor>, scheduler: PurgeScheduler) -> Self {
        Self {
            reactor,
            scheduler,
            sequencer: Mutex::new(()),
        }
    }
}

fn transition_of(old: Option<&VoiceState>, new: &VoiceState) -> PresenceTransition {
    transition(new.user_id, old.and_then(|s| s.channel_id), new.channel_id)
}

fn transition(
    user: UserId,
    previous: Option<ChannelId>,
    next: Option<ChannelId>,
) -> PresenceTransition {
    PresenceTransition::new(
        MemberId(user.get()),
        previous.map(|c| VoiceRoomId(c.get())),
        next.map(|c| VoiceRoomId(c.get())),
    )
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, guilds = ready.guilds.len(), "connected to discord");

        let platform: Arc<dyn PlatformPort> = Arc::new(DiscordPlatform::from_context(&ctx));
        if !self.scheduler.start(platform).await {
            debug!("READY after reconnect, purge scheduler left as is");
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let transition = transition_of(old.as_ref(), &new);
        if !transition.is_room_change() {
            return;
        }

        let platform = DiscordPlatform::from_context(&ctx);
        let _guard = self.sequencer.lock().await;
        let report = self.reactor.handle(&platform, transition).await;
        debug!(
            member = %transition.member,
            departure = ?report.departure,
            arrival = ?report.arrival,
            "presence transition handled"
        );
    }
}

pub fn intents() -> GatewayIntents {
    // Voice states feed the reactor; GUILDS keeps channels and voice states cached.
    GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES
}

pub async fn run(cfg: Arc<Config>, store: Arc<dyn BindingStore>) -> anyhow::Result<()> {
    info!(
        database = %cfg.database_path.display(),
        emit_log = cfg.emit_log,
        purge_interval_ms = cfg.purge_interval.as_millis() as u64,
        "starting voice channel helper"
    );

    let reactor = Arc::new(PresenceReactor::new(store.clone(), cfg.emit_log));
    let scheduler = PurgeScheduler::new(store, PurgeSettings::from(cfg.as_ref()));

    let mut client = Client::builder(&cfg.discord_token, intents())
        .event_handler(Handler::new(reactor, scheduler.clone()))
        .await
        .context("failed to build discord client")?;

    let res = client.start().await;
    scheduler.stop().await;
    if let Err(e) = &res {
        error!(error = %e, "discord gateway stopped");
    }
    res.context("discord gateway stopped")?;

    Ok(())
}
