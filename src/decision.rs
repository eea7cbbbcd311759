//! Decision Engine: the tick-based orchestrator. Owns its member tracks
//! exclusively and is the only caller of `Controller::switch`.
//!
//! Cooldown checks compare elapsed time against the last switch; candidates
//! are ranked and filtered before one is selected; events are emitted
//! through an owned store rather than a channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::{Event, EventKind, Grade, MemberState, Score};
use crate::predictive::{cellular, starlink, trend};
use crate::ports::Controller;
use crate::scoring;
use crate::telemetry::TelemetryStore;
use crate::weight::WeightManager;

/// Fixed lookback for the per-tick sample window. Not
/// operator-configurable; distinct from `DecisionPolicy::history_window`,
/// which sizes the EWMA time constant.
const TICK_LOOKBACK: Duration = Duration::from_secs(120);

/// Raw-score threshold below which a member counts as "failing" for dwell
/// purposes. Reuses `CellularThresholds::unhealthy_score` across all member
/// classes rather than introducing a second tunable (DESIGN.md Open
/// Questions).
const FAILING_SCORE: f64 = 50.0;

#[derive(Debug, Clone)]
struct MemberTrack {
    ewma: Option<f64>,
    healthy_since: Option<Instant>,
    failing_since: Option<Instant>,
    state: MemberState,
}

impl MemberTrack {
    fn new(now: Instant) -> Self {
        Self { ewma: None, healthy_since: None, failing_since: Some(now), state: MemberState::Unknown }
    }

    fn observe(&mut self, now: Instant, final_score: f64, insufficient: bool) {
        if insufficient {
            self.state = MemberState::Unknown;
            if self.failing_since.is_none() {
                self.failing_since = Some(now);
            }
            self.healthy_since = None;
            return;
        }

        self.state = match Grade::from_final(final_score) {
            Grade::F | Grade::D => MemberState::Failed,
            Grade::C | Grade::CPlus => MemberState::Degraded,
            _ => MemberState::Healthy,
        };

        if final_score < FAILING_SCORE {
            if self.failing_since.is_none() {
                self.failing_since = Some(now);
            }
            self.healthy_since = None;
        } else {
            if self.healthy_since.is_none() {
                self.healthy_since = Some(now);
            }
            self.failing_since = None;
        }
    }

    fn healthy_duration(&self, now: Instant) -> Duration {
        self.healthy_since.map(|since| now.saturating_duration_since(since)).unwrap_or(Duration::ZERO)
    }

    fn failing_duration(&self, now: Instant) -> Duration {
        self.failing_since.map(|since| now.saturating_duration_since(since)).unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub current: Option<String>,
    pub last_switch_at: Option<Instant>,
    pub scores: HashMap<String, Score>,
    pub member_state: HashMap<String, MemberState>,
}

struct Candidate {
    name: String,
    value: f64,
    class_priority: u8,
    reason: String,
}

pub struct DecisionEngine<C: Controller + 'static> {
    config: Config,
    telemetry: TelemetryStore,
    weights: Arc<WeightManager>,
    controller: Arc<C>,
    tracks: RwLock<HashMap<String, MemberTrack>>,
    last_scores: RwLock<HashMap<String, Score>>,
    current: RwLock<Option<String>>,
    last_switch_at: RwLock<Option<Instant>>,
}

impl<C: Controller + 'static> DecisionEngine<C> {
    pub fn new(config: Config, telemetry: TelemetryStore, weights: Arc<WeightManager>, controller: Arc<C>) -> Self {
        let initial_current = controller.get_current_member();
        Self {
            config,
            telemetry,
            weights,
            controller,
            tracks: RwLock::new(HashMap::new()),
            last_scores: RwLock::new(HashMap::new()),
            current: RwLock::new(initial_current),
            last_switch_at: RwLock::new(None),
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            current: self.current.read().clone(),
            last_switch_at: *self.last_switch_at.read(),
            scores: self.last_scores.read().clone(),
            member_state: self.tracks.read().iter().map(|(k, v)| (k.clone(), v.state)).collect(),
        }
    }

    /// Run one tick. `now` is injectable for
    /// deterministic tests; production callers pass `Instant::now()`.
    pub async fn tick(&self, now: Instant) {
        // Demote a current that no longer exists in configuration, bypassing
        // cooldown on the next selection.
        {
            let mut current = self.current.write();
            if let Some(name) = current.clone() {
                if !self.config.members.iter().any(|m| m.name == name) {
                    *current = None;
                    *self.last_switch_at.write() = None;
                }
            }
        }

        let alpha = self.config.ewma_alpha();
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut scores_this_tick = HashMap::new();
        let mut forced_failover_now: HashMap<String, bool> = HashMap::new();

        // A lone configured member has no alternative to fail over to, so it
        // must remain selectable even while its own data is insufficient
        // (spec.md §4.7 failure semantics: "never selected unless it is the
        // only member").
        let only_member = self.config.members.len() == 1;

        for member in &self.config.members {
            let samples = self.telemetry.get_samples(&member.name, now - TICK_LOOKBACK);
            let insufficient = samples.len() < self.config.decision.min_samples;

            let mut track_entry = self.tracks.write();
            let track = track_entry.entry(member.name.clone()).or_insert_with(|| MemberTrack::new(now));

            if insufficient {
                track.observe(now, 0.0, true);
                self.telemetry.add_event(
                    Event::new(EventKind::InsufficientData, Some(member.name.clone()), format!("insufficient_data:{}", member.name))
                        .with_detail(if only_member { "selected anyway: only configured member" } else { "excluded from selection" }),
                );
                if !only_member {
                    drop(track_entry);
                    continue;
                }
            }

            let synthetic;
            let latest = match samples.last() {
                Some(s) => s,
                None => {
                    synthetic = crate::domain::Sample {
                        member: member.name.clone(),
                        timestamp: now,
                        metrics: crate::domain::Metrics::default(),
                        score: None,
                    };
                    &synthetic
                }
            };
            let trend_state = trend::analyse(&samples, now);
            let direction = trend::classify(&trend_state);
            let predictive_risk = match direction {
                crate::domain::TrendDirection::Degrading => 0.6,
                crate::domain::TrendDirection::InsufficientData => 0.3,
                crate::domain::TrendDirection::Stable => 0.2,
                crate::domain::TrendDirection::Improving => 0.0,
            };

            let score = scoring::score(&latest.metrics, &self.config.scoring, track.ewma, alpha);
            track.ewma = Some(score.ewma);
            track.observe(now, score.r#final, false);

            let assessment = cellular::assess(&latest.metrics, score.r#final, predictive_risk, &self.config.cellular);

            // A predictive trigger while `prepare_failover` is standing
            // escalates to `failover_now` and bypasses the dwell
            // requirement below — the whole point of acting predictively is
            // to not wait out the window a reactive failure would.
            let mut recommend_action = assessment.recommend_action;
            if recommend_action == crate::domain::RecommendAction::PrepareFailover
                && cellular::predictive_failover_fires(&latest.metrics, &assessment, &self.config.cellular)
            {
                recommend_action = crate::domain::RecommendAction::FailoverNow;
            }

            // A sustained obstruction trend on a Starlink member is this
            // class's equivalent of a cellular predictive trigger (spec.md
            // §8 S1: "Starlink obstruction acceleration triggers predictive
            // failover") — it forces the member's value to zero and bypasses
            // its own dwell requirement, the same as `failover_now` does.
            let starlink_obstruction_trigger = member.class == crate::domain::MemberClass::Starlink
                && direction == crate::domain::TrendDirection::Degrading
                && latest
                    .metrics
                    .obstruction_pct
                    .map(|o| o > self.config.starlink.obstruction_pct_alarm)
                    .unwrap_or(false);

            // Roaming is a standing demotion trigger (spec.md §8 S2) even
            // though it only costs the member a weight penalty rather than
            // zeroing its value outright — the point is that the router
            // must not have to wait out a dwell window before failing a
            // roaming cellular link back to a healthy alternative.
            let roaming_trigger = latest.metrics.roaming == Some(true);
            if roaming_trigger {
                self.weights.apply_temporary_adjustment(
                    &member.name,
                    self.config.cellular.roaming_penalty,
                    "cellular roaming detected",
                    crate::domain::AdjustmentType::Penalty,
                    self.config.cellular.roaming_duration,
                );
            }

            forced_failover_now.insert(
                member.name.clone(),
                recommend_action == crate::domain::RecommendAction::FailoverNow
                    || starlink_obstruction_trigger
                    || roaming_trigger,
            );

            if member.class == crate::domain::MemberClass::Starlink {
                for adjustment in starlink::assess(&member.name, &latest.metrics, &self.config.starlink) {
                    self.weights.apply_temporary_adjustment(
                        &adjustment.member,
                        adjustment.amount,
                        adjustment.reason,
                        adjustment.kind,
                        adjustment.expires_at.saturating_duration_since(now),
                    );
                }
            }

            let effective_weight = self.weights.get_effective_weight(&member.name);
            let mut value = score.r#final * effective_weight as f64 / 100.0;

            // The engine aggregates per-member reasons (spec.md §7
            // "Propagation") onto one chained `anyhow::Error` rather than
            // flat string concatenation, so each contributing cause stays a
            // distinct link in the chain.
            let mut reason_chain =
                anyhow::Error::msg(format!("score={:.1} weight={}", score.r#final, effective_weight));

            match recommend_action {
                crate::domain::RecommendAction::FailoverNow => {
                    value = 0.0;
                    reason_chain = anyhow::Error::msg(format!("failover_now: {}", assessment.reasoning.join("; ")));
                }
                crate::domain::RecommendAction::PrepareFailover => {
                    value -= self.config.decision.prepare_failover_penalty;
                    reason_chain = anyhow::Error::msg(format!("prepare_failover: {}", assessment.reasoning.join("; ")));
                }
                _ => {}
            }
            if starlink_obstruction_trigger {
                value = 0.0;
                reason_chain = anyhow::Error::msg("obstruction trend exceeds alarm threshold");
            }
            if direction == crate::domain::TrendDirection::Degrading {
                reason_chain = reason_chain.context("obstruction trend");
            }
            if roaming_trigger {
                reason_chain = reason_chain.context("roaming");
            }
            // `{:?}` (not `{}`) is the form that walks `reason_chain`'s
            // `.context()` links into a "Caused by:" section; the plain
            // Display only ever shows the outermost message.
            let reason = format!("{reason_chain:?}");

            candidates.push(Candidate {
                name: member.name.clone(),
                value,
                class_priority: self.config.class_priority(member.class),
                reason,
            });

            scores_this_tick.insert(member.name.clone(), score);
            drop(track_entry);
        }

        *self.last_scores.write() = scores_this_tick;

        if candidates.is_empty() {
            return;
        }

        // Tie-break: highest value, then class priority ascending, then
        // stable name order.
        candidates.sort_by(|a, b| {
            b.value
                .partial_cmp(&a.value)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.class_priority.cmp(&b.class_priority))
                .then(a.name.cmp(&b.name))
        });

        let proposed = &candidates[0];
        let current = self.current.read().clone();

        if current.as_deref() == Some(proposed.name.as_str()) {
            return;
        }

        // First pick (no current yet): initialize without margin/dwell/cooldown.
        if current.is_none() {
            self.perform_switch(None, proposed, None, now).await;
            return;
        }

        let current_name = current.clone().unwrap();
        let current_value = candidates.iter().find(|c| c.name == current_name).map(|c| c.value).unwrap_or(0.0);
        let margin_ok = proposed.value - current_value >= self.config.decision.switch_margin;

        let tracks = self.tracks.read();
        let current_failing = tracks
            .get(&current_name)
            .map(|t| t.failing_duration(now) >= self.config.decision.fail_min_duration)
            .unwrap_or(true);
        let proposed_healthy = tracks
            .get(&proposed.name)
            .map(|t| t.healthy_duration(now) >= self.config.decision.restore_min_duration)
            .unwrap_or(false);
        drop(tracks);

        let current_forced_now = forced_failover_now.get(&current_name).copied().unwrap_or(false);
        let dwell_ok = current_failing || proposed_healthy || current_forced_now;
        let last_switch_at = *self.last_switch_at.read();
        let cooldown_ok = last_switch_at.map(|t| now.saturating_duration_since(t) >= self.config.decision.cooldown).unwrap_or(true);

        if margin_ok && dwell_ok && cooldown_ok {
            let demotion_reason = candidates.iter().find(|c| c.name == current_name).map(|c| c.reason.clone());
            self.perform_switch(Some(current_name), proposed, demotion_reason, now).await;
        } else {
            let reasons = [
                (!margin_ok).then_some("margin not met"),
                (!dwell_ok).then_some("dwell not satisfied"),
                (!cooldown_ok).then_some("cooldown active"),
            ];
            let reason = reasons.into_iter().flatten().collect::<Vec<_>>().join(", ");
            self.telemetry.add_event(
                Event::new(EventKind::SwitchSuppressed, Some(proposed.name.clone()), reason)
                    .with_detail(format!("from={:?} to={}", current_name, proposed.name)),
            );
        }
    }

    async fn perform_switch(&self, from: Option<String>, proposed: &Candidate, demotion_reason: Option<String>, now: Instant) {
        match self.controller.switch(from.as_deref(), &proposed.name).await {
            Ok(()) => {
                *self.current.write() = Some(proposed.name.clone());
                *self.last_switch_at.write() = Some(now);
                info!(from = ?from, to = %proposed.name, "switched active member");
                // The reason a switch happened is better told by why the
                // outgoing member was demoted than by why the incoming one
                // was chosen — fall back to the proposed member's own
                // reason only when there was no current member to demote.
                let reason = demotion_reason.unwrap_or_else(|| proposed.reason.clone());
                self.telemetry.add_event(
                    Event::new(EventKind::Switch, Some(proposed.name.clone()), reason).with_detail(format!("from={:?}", from)),
                );
            }
            Err(e) => {
                warn!(to = %proposed.name, error = %e, "switch failed");
                self.telemetry.add_event(Event::new(EventKind::SwitchFailed, Some(proposed.name.clone()), e.to_string()));
            }
        }
    }

    /// Daemon loop entry point. Runs until `cancel` reports
    /// `true`; in-flight ticks complete, then a final telemetry cleanup runs
    /// before returning.
    pub async fn run(self, mut cancel: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.decision.tick_period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Instant::now()).await;
                }
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        break;
                    }
                }
            }
        }
        self.telemetry.cleanup();
    }
}
