//! Periodic idle-channel scan that lets the bot speak up unprompted.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::config::IdleBucket;
use crate::engine::{Engine, ProactiveOutcome};
use crate::history::ChannelId;

/// Per-tick trigger probability for a channel idle for `idle`.
///
/// Buckets must be sorted by `below_secs`; anything past the last bucket
/// never triggers.
pub fn trigger_probability(idle: ChronoDuration, buckets: &[IdleBucket]) -> f64 {
    let idle_secs = idle.num_seconds().max(0) as u64;
    buckets
        .iter()
        .find(|bucket| idle_secs < bucket.below_secs)
        .map(|bucket| bucket.probability)
        .unwrap_or(0.0)
}

pub struct ProactiveScheduler {
    engine: Arc<Engine>,
    in_flight: JoinSet<()>,
}

impl ProactiveScheduler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            in_flight: JoinSet::new(),
        }
    }

    /// Start the scheduler loop on the current runtime.
    pub fn spawn(engine: Arc<Engine>) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let scheduler = Self::new(engine);
        let join = tokio::spawn(scheduler.run(stop_rx));
        SchedulerHandle { stop_tx, join }
    }

    async fn run(mut self, mut stop_rx: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.engine.config().proactive.tick_secs.max(1));
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!("Proactive scheduler started (tick every {:?})", period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.reap();
                    let triggered = self.tick(Utc::now());
                    if !triggered.is_empty() {
                        tracing::debug!("Proactive trigger for {:?}", triggered);
                    }
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.in_flight.shutdown().await;
        tracing::info!("Proactive scheduler stopped");
    }

    /// Evaluate every known channel once and launch a proactive turn where
    /// the draw succeeds. Channels with a turn already running are skipped.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<ChannelId> {
        let config = self.engine.config();
        let mut triggered = Vec::new();

        for channel_id in self.engine.history().channels() {
            if !config.allows_channel(channel_id) {
                continue;
            }
            let Some(last_active) = self.engine.history().last_active(channel_id) else {
                continue;
            };

            let probability = trigger_probability(now - last_active, &config.proactive.buckets);
            if probability <= 0.0 || self.engine.rng().next_f64() >= probability {
                continue;
            }

            let Some(guard) = self.engine.try_claim(channel_id) else {
                tracing::debug!("Channel {} busy, skipping proactive turn", channel_id);
                continue;
            };

            let engine = self.engine.clone();
            self.in_flight.spawn(async move {
                let _guard = guard;
                match engine.run_proactive(channel_id).await {
                    Ok(ProactiveOutcome::Spoke { sent }) => {
                        tracing::info!("Spoke up in channel {} ({} message(s))", channel_id, sent)
                    }
                    Ok(outcome) => tracing::debug!("Channel {}: {:?}", channel_id, outcome),
                    Err(e) => tracing::error!("Proactive turn in channel {} failed: {}", channel_id, e),
                }
            });
            triggered.push(channel_id);
        }

        triggered
    }

    /// Wait for every launched turn to finish.
    pub async fn drain(&mut self) {
        while self.in_flight.join_next().await.is_some() {}
    }

    fn reap(&mut self) {
        while let Some(result) = self.in_flight.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!("Proactive task panicked: {}", e);
                }
            }
        }
    }
}

/// Owner handle for a spawned scheduler.
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the loop to stop and wait for it. Turns still running are aborted.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.join.await {
            tracing::warn!("Proactive scheduler ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::history::{ChatMessage, UserId};
    use crate::rng::SequenceRandom;
    use crate::testing::{RecordingTransport, ScriptedModel};

    fn buckets() -> Vec<IdleBucket> {
        crate::config::ProactiveConfig::default().buckets
    }

    #[test]
    fn probability_follows_idle_buckets() {
        let buckets = buckets();
        let p = |secs: i64| trigger_probability(ChronoDuration::seconds(secs), &buckets);
        assert_eq!(p(0), 0.20);
        assert_eq!(p(179), 0.20);
        assert_eq!(p(180), 0.10);
        assert_eq!(p(599), 0.10);
        assert_eq!(p(600), 0.05);
        assert_eq!(p(1799), 0.05);
        assert_eq!(p(1800), 0.0);
        assert_eq!(p(86_400), 0.0);
        // clock skew counts as just active
        assert_eq!(p(-30), 0.20);
    }

    fn engine(model: ScriptedModel, transport: Arc<RecordingTransport>, draw: f64) -> Arc<Engine> {
        let mut config = EngineConfig::default();
        config.enabled = true;
        config.bot.self_id = 99;
        Arc::new(Engine::new(
            config,
            Arc::new(model),
            transport,
            Arc::new(SequenceRandom::constant(draw)),
        ))
    }

    fn seed(engine: &Engine, channel: i64, idle_minutes: i64) {
        engine.history().record(ChatMessage {
            channel_id: ChannelId(channel),
            author_id: UserId(5),
            content: format!("last words in {}", channel),
            timestamp: Utc::now() - ChronoDuration::minutes(idle_minutes),
            is_from_bot: false,
            reference_id: None,
        });
    }

    #[tokio::test(start_paused = true)]
    async fn tick_skips_long_idle_channels() {
        let transport = Arc::new(RecordingTransport::new());
        let model = ScriptedModel::new()
            .with_answer("yes")
            .with_stream(&["so what's everyone up to"]);
        let engine = engine(model, transport.clone(), 0.0);
        seed(&engine, 1, 5);
        seed(&engine, 2, 45);

        let mut scheduler = ProactiveScheduler::new(engine.clone());
        let triggered = scheduler.tick(Utc::now());
        scheduler.drain().await;

        assert_eq!(triggered, vec![ChannelId(1)]);
        assert_eq!(transport.sent(), vec![(ChannelId(1), "so what's everyone up to".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_draw_or_busy_channel_does_nothing() {
        let transport = Arc::new(RecordingTransport::new());
        let quiet = engine(ScriptedModel::new(), transport.clone(), 0.5);
        seed(&quiet, 1, 1);
        let mut scheduler = ProactiveScheduler::new(quiet);
        assert!(scheduler.tick(Utc::now()).is_empty());

        let busy = engine(ScriptedModel::new(), transport.clone(), 0.0);
        seed(&busy, 1, 1);
        let _guard = busy.try_claim(ChannelId(1)).unwrap();
        let mut scheduler = ProactiveScheduler::new(busy.clone());
        assert!(scheduler.tick(Utc::now()).is_empty());
        scheduler.drain().await;

        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn whitelist_filters_channels() {
        let transport = Arc::new(RecordingTransport::new());
        let mut config = EngineConfig::default();
        config.behavior.whitelist_enabled = true;
        config.behavior.whitelist = vec![ChannelId(2)];
        let engine = Arc::new(Engine::new(
            config,
            Arc::new(ScriptedModel::new().with_answer("no")),
            transport.clone(),
            Arc::new(SequenceRandom::constant(0.0)),
        ));
        seed(&engine, 1, 1);
        seed(&engine, 2, 1);

        let mut scheduler = ProactiveScheduler::new(engine);
        assert_eq!(scheduler.tick(Utc::now()), vec![ChannelId(2)]);
        scheduler.drain().await;
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_scheduler_stops_on_shutdown() {
        let transport = Arc::new(RecordingTransport::new());
        let engine = engine(ScriptedModel::new(), transport, 0.99);
        let handle = ProactiveScheduler::spawn(engine);

        tokio::time::sleep(Duration::from_secs(150)).await;
        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("scheduler did not stop");
    }
}
