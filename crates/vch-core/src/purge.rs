//! Purge scheduler: periodically drains the history of every text channel
//! whose voice room was left empty.
//!
//! - First sweep fires one interval after `start()`, then every interval
//! - Each flagged channel is drained independently; one failure never stops
//!   the rest of the sweep and leaves that channel's flag set for next time
//! - Draining is capped at `max_rounds` fetch/delete cycles per channel so a
//!   busy channel cannot hold the sweep forever

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    domain::{FetchedMessage, FlaggedBinding, MessageId, TextChannelId},
    ports::{resolve_text, BindingStore, PlatformPort},
    Result,
};

/// Most messages a single fetch (and a single bulk delete) may cover.
pub const FETCH_LIMIT: u8 = 100;

/// Bulk deletion refuses batches smaller than this.
const BULK_DELETE_MIN: usize = 2;

#[derive(Clone, Copy, Debug)]
pub struct PurgeSettings {
    pub interval: Duration,
    pub max_rounds: u32,
    pub fetch_limit: u8,
    /// Messages older than this cannot be bulk-deleted and go one by one.
    pub bulk_delete_max_age: Duration,
}

impl Default for PurgeSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            max_rounds: 50,
            fetch_limit: FETCH_LIMIT,
            bulk_delete_max_age: Duration::from_secs(14 * 24 * 60 * 60),
        }
    }
}

impl From<&Config> for PurgeSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            interval: cfg.purge_interval,
            max_rounds: cfg.purge_max_rounds,
            fetch_limit: FETCH_LIMIT,
            bulk_delete_max_age: cfg.bulk_delete_max_age,
        }
    }
}

/// How draining one channel ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// A fetch came back empty. `rounds` counts fetch/delete cycles before it.
    Emptied { rounds: u32, deleted: usize },
    /// Gave up after `rounds` cycles with messages still present.
    RoundLimit { rounds: u32, deleted: usize },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub purged: Vec<TextChannelId>,
    pub unconverged: Vec<TextChannelId>,
    pub failed: Vec<(TextChannelId, String)>,
    /// Set when the store could not be queried or updated; the sweep stopped there.
    pub store_error: Option<String>,
}

impl SweepReport {
    pub fn is_idle(&self) -> bool {
        self.purged.is_empty()
            && self.unconverged.is_empty()
            && self.failed.is_empty()
            && self.store_error.is_none()
    }
}

/// Messages split by which delete call can remove them.
#[derive(Debug, Default, PartialEq, Eq)]
struct DeletePlan {
    bulk: Vec<MessageId>,
    single: Vec<MessageId>,
}

fn plan_deletes(batch: &[FetchedMessage], now: DateTime<Utc>, max_age: Duration) -> DeletePlan {
    let cutoff = chrono::Duration::from_std(max_age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age));

    let mut plan = DeletePlan::default();
    for msg in batch {
        let young = cutoff.map_or(true, |c| msg.created_at > c);
        if young {
            plan.bulk.push(msg.id);
        } else {
            plan.single.push(msg.id);
        }
    }

    if plan.bulk.len() < BULK_DELETE_MIN {
        plan.single.append(&mut plan.bulk);
    }
    plan
}

#[derive(Clone)]
pub struct PurgeScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    store: Arc<dyn BindingStore>,
    settings: PurgeSettings,
    state: tokio::sync::Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    task: Option<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
}

impl PurgeScheduler {
    pub fn new(store: Arc<dyn BindingStore>, settings: PurgeSettings) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                settings,
                state: tokio::sync::Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// Start the recurring sweep. Returns `false` if it is already running
    /// (the gateway re-sends READY after reconnects).
    pub async fn start(&self, platform: Arc<dyn PlatformPort>) -> bool {
        let mut st = self.inner.state.lock().await;
        if st.task.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("purge scheduler already running");
            return false;
        }

        let tok = CancellationToken::new();
        let scheduler = self.clone();
        let cancel = tok.clone();
        let handle = tokio::spawn(async move {
            scheduler.run(platform, cancel).await;
        });

        st.task = Some(handle);
        st.cancel = Some(tok);
        info!(
            interval_ms = self.inner.settings.interval.as_millis() as u64,
            "purge scheduler started"
        );
        true
    }

    /// Stop scheduling new sweeps and wait for the loop to exit. A sweep
    /// already in progress runs to completion first.
    pub async fn stop(&self) {
        let mut st = self.inner.state.lock().await;
        if let Some(tok) = st.cancel.take() {
            tok.cancel();
        }
        // The loop never takes the state lock, so holding it here keeps a
        // concurrent start() from spawning a second loop before this one exits.
        if let Some(handle) = st.task.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "purge scheduler task ended abnormally");
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        let st = self.inner.state.lock().await;
        st.task.as_ref().is_some_and(|h| !h.is_finished())
    }

    async fn run(&self, platform: Arc<dyn PlatformPort>, cancel: CancellationToken) {
        let period = self.inner.settings.interval;
        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
              _ = cancel.cancelled() => break,
              _ = tick.tick() => {
                let report = self.sweep(platform.as_ref()).await;
                log_report(&report);
              }
            }
        }
        debug!("purge scheduler stopped");
    }

    pub async fn sweep(&self, platform: &dyn PlatformPort) -> SweepReport {
        self.sweep_at(platform, Utc::now()).await
    }

    /// One pass over every flagged binding, judging message age against `now`.
    pub async fn sweep_at(&self, platform: &dyn PlatformPort, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        let flagged = match self.inner.store.list_flagged().await {
            Ok(v) => v,
            Err(e) => {
                report.store_error = Some(e.to_string());
                return report;
            }
        };

        for binding in flagged {
            match self.drain_channel(platform, binding, now).await {
                Ok(DrainOutcome::Emptied { rounds, deleted }) => {
                    if let Err(e) = self.inner.store.set_flag(binding.voice_id, false).await {
                        report.failed.push((binding.text_id, e.to_string()));
                        report.store_error = Some(e.to_string());
                        break;
                    }
                    debug!(text = %binding.text_id, rounds, deleted, "text channel purged");
                    report.purged.push(binding.text_id);
                }
                Ok(DrainOutcome::RoundLimit { rounds, deleted }) => {
                    warn!(
                        text = %binding.text_id,
                        rounds,
                        deleted,
                        "purge did not converge, will retry next sweep"
                    );
                    report.unconverged.push(binding.text_id);
                }
                Err(e) => {
                    warn!(
                        text = %binding.text_id,
                        error = %e,
                        "purge failed, will retry next sweep"
                    );
                    report.failed.push((binding.text_id, e.to_string()));
                }
            }
        }

        report
    }

    /// Fetch and delete until a fetch comes back empty or the round cap is hit.
    pub async fn drain_channel(
        &self,
        platform: &dyn PlatformPort,
        binding: FlaggedBinding,
        now: DateTime<Utc>,
    ) -> Result<DrainOutcome> {
        let settings = self.inner.settings;
        let text = resolve_text(platform, binding.text_id).await?;

        let mut rounds = 0u32;
        let mut deleted = 0usize;
        loop {
            let batch = platform.fetch_messages(text, settings.fetch_limit).await?;
            if batch.is_empty() {
                return Ok(DrainOutcome::Emptied { rounds, deleted });
            }
            if rounds >= settings.max_rounds {
                return Ok(DrainOutcome::RoundLimit { rounds, deleted });
            }

            let plan = plan_deletes(&batch, now, settings.bulk_delete_max_age);
            if !plan.bulk.is_empty() {
                platform.bulk_delete(text, &plan.bulk).await?;
            }
            for id in &plan.single {
                platform.delete_message(text, *id).await?;
            }

            deleted += batch.len();
            rounds += 1;

            // Let gateway events run between rounds on a shared runtime.
            tokio::task::yield_now().await;
        }
    }
}

fn log_report(report: &SweepReport) {
    if let Some(e) = &report.store_error {
        warn!(error = %e, "purge sweep cut short by store failure");
    }
    if report.is_idle() {
        debug!("purge sweep: nothing flagged");
        return;
    }
    info!(
        purged = report.purged.len(),
        unconverged = report.unconverged.len(),
        failed = report.failed.len(),
        "purge sweep finished"
    );
}
