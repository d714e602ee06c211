//! Match coordinator: round lifecycle state machine and its event loop
//!
//! A single task owns every combatant, the scoreboard and the phase. All
//! mutations arrive through one queue and are applied in receipt order;
//! delayed phase changes are kept in the coordinator's own timer list and
//! re-checked against the current phase when they fire.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MatchSettings;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, Envelope, MatchSummary, ServerMsg};

use super::combat::{HitArbiter, HitClaim};
use super::combatant::{CombatantId, CombatantState, Team};
use super::events::{EventBus, StateEvent, Subscription, Topic};
use super::loadout::{PrimaryVariant, WeaponSlot};
use super::scoreboard::Scoreboard;
use super::snapshot::SnapshotBuilder;

/// Capacity of the coordinator's inbound queue
const EVENT_QUEUE_CAPACITY: usize = 256;
/// Capacity of the outbound broadcast channel. A round start emits two
/// messages per combatant; receivers that fall behind are resynced.
pub const OUTBOUND_CAPACITY: usize = 1024;
/// Client messages queued longer than this are logged as slow
const SLOW_QUEUE_WARN_MS: u64 = 250;

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Server up, first round not started yet
    WaitingToStart,
    /// Eliminations count
    RoundActive,
    /// Round decided, next round pending
    RoundEnding,
    /// Terminal
    MatchEnded,
}

/// Delayed phase change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    StartRound,
    ReturnToLobby,
}

#[derive(Debug, Clone, Copy)]
struct ScheduledTransition {
    due: Instant,
    transition: Transition,
}

/// Input to the coordinator queue
#[derive(Debug)]
pub enum CoordinatorEvent {
    Join {
        reply: oneshot::Sender<CombatantId>,
    },
    Leave {
        combatant_id: CombatantId,
    },
    Client {
        combatant_id: CombatantId,
        msg: ClientMsg,
        received_at: u64,
    },
    Summary {
        reply: oneshot::Sender<MatchSummary>,
    },
    /// Connection missed outbound messages and needs the full state again
    Resync {
        combatant_id: CombatantId,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("A match coordinator is already running")]
    AlreadyRunning,

    #[error("No match coordinator is running")]
    NotRunning,

    #[error("Match coordinator has stopped")]
    Stopped,
}

/// Cloneable handle used by connections to talk to the coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    pub match_id: Uuid,
    events_tx: mpsc::Sender<CoordinatorEvent>,
    outbound_tx: broadcast::Sender<Envelope>,
}

impl CoordinatorHandle {
    /// Receive outbound messages. Subscribe before joining so nothing is missed.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.outbound_tx.subscribe()
    }

    pub async fn join(&self) -> Result<CombatantId, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.send(CoordinatorEvent::Join { reply }).await?;
        rx.await.map_err(|_| CoordinatorError::Stopped)
    }

    pub async fn leave(&self, combatant_id: CombatantId) -> Result<(), CoordinatorError> {
        self.send(CoordinatorEvent::Leave { combatant_id }).await
    }

    pub async fn submit(
        &self,
        combatant_id: CombatantId,
        msg: ClientMsg,
    ) -> Result<(), CoordinatorError> {
        self.send(CoordinatorEvent::Client {
            combatant_id,
            msg,
            received_at: unix_millis(),
        })
        .await
    }

    pub async fn resync(&self, combatant_id: CombatantId) -> Result<(), CoordinatorError> {
        self.send(CoordinatorEvent::Resync { combatant_id }).await
    }

    pub async fn summary(&self) -> Result<MatchSummary, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.send(CoordinatorEvent::Summary { reply }).await?;
        rx.await.map_err(|_| CoordinatorError::Stopped)
    }

    async fn send(&self, event: CoordinatorEvent) -> Result<(), CoordinatorError> {
        self.events_tx
            .send(event)
            .await
            .map_err(|_| CoordinatorError::Stopped)
    }
}

/// The authoritative match
pub struct MatchCoordinator {
    match_id: Uuid,
    settings: MatchSettings,
    phase: MatchPhase,
    round: u32,
    roster: BTreeMap<CombatantId, CombatantState>,
    scoreboard: Scoreboard,
    arbiter: HitArbiter,
    winner: Option<Team>,
    next_ordinal: u64,
    /// Next spawn slot per team, reset every round
    spawn_slots: [u32; 2],
    /// Sorted by due time
    timers: Vec<ScheduledTransition>,
    /// Start timer fired below the minimum player count
    awaiting_players: bool,
    finished: bool,
    bus: Arc<EventBus>,
    outbound_tx: broadcast::Sender<Envelope>,
    relay: Option<Subscription>,
}

impl MatchCoordinator {
    /// Create a coordinator and its handle. Nothing runs until [`run`](Self::run).
    pub fn new(
        match_id: Uuid,
        settings: MatchSettings,
        bus: Arc<EventBus>,
    ) -> (Self, CoordinatorHandle, mpsc::Receiver<CoordinatorEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (outbound_tx, _) = broadcast::channel(OUTBOUND_CAPACITY);

        // Every published state change goes out to all connections
        let relay_tx = outbound_tx.clone();
        let relay = bus.subscribe(Topic::All, move |event| {
            let _ = relay_tx.send(Envelope::all(ServerMsg::from(event)));
        });

        let handle = CoordinatorHandle {
            match_id,
            events_tx,
            outbound_tx: outbound_tx.clone(),
        };

        let mut coordinator = Self {
            match_id,
            arbiter: HitArbiter::new(settings.hit_policy),
            settings,
            phase: MatchPhase::WaitingToStart,
            round: 0,
            roster: BTreeMap::new(),
            scoreboard: Scoreboard::default(),
            winner: None,
            next_ordinal: 0,
            spawn_slots: [0; 2],
            timers: Vec::new(),
            awaiting_players: false,
            finished: false,
            bus,
            outbound_tx,
            relay: Some(relay),
        };

        let settle = coordinator.settings.join_settle_delay;
        coordinator.schedule(Transition::StartRound, settle);

        (coordinator, handle, events_rx)
    }

    /// Run the event loop until the match hands everyone back to the lobby
    /// or every handle is dropped.
    pub async fn run(mut self, mut events_rx: mpsc::Receiver<CoordinatorEvent>) {
        info!(match_id = %self.match_id, "Match coordinator started");

        while !self.finished {
            let next_due = self.next_due();

            tokio::select! {
                event = events_rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        info!(match_id = %self.match_id, "All handles dropped, stopping coordinator");
                        break;
                    }
                },
                _ = sleep_until_due(next_due) => {
                    self.fire_due(Instant::now());
                }
            }
        }

        info!(
            match_id = %self.match_id,
            rounds = self.round,
            team_a_wins = self.scoreboard.team_a_wins(),
            team_b_wins = self.scoreboard.team_b_wins(),
            "Match coordinator stopped"
        );
    }

    pub fn handle_event(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Join { reply } => {
                let id = self.handle_join();
                if reply.send(id).is_err() {
                    // Connection vanished before the ack; drop the combatant again
                    self.handle_leave(id);
                }
            }
            CoordinatorEvent::Leave { combatant_id } => self.handle_leave(combatant_id),
            CoordinatorEvent::Client {
                combatant_id,
                msg,
                received_at,
            } => {
                let queued_ms = unix_millis().saturating_sub(received_at);
                if queued_ms > SLOW_QUEUE_WARN_MS {
                    warn!(combatant_id = %combatant_id, queued_ms, ?msg, "Client message waited in queue");
                } else {
                    debug!(combatant_id = %combatant_id, queued_ms, ?msg, "Client message");
                }
                self.handle_client_msg(combatant_id, msg);
            }
            CoordinatorEvent::Summary { reply } => {
                let _ = reply.send(self.summary());
            }
            CoordinatorEvent::Resync { combatant_id } => self.send_state_sync(combatant_id),
        }
    }

    /// Full mirror for one connection, replacing whatever it has
    pub fn send_state_sync(&self, combatant_id: CombatantId) {
        if !self.roster.contains_key(&combatant_id) {
            return;
        }

        debug!(combatant_id = %combatant_id, round = self.round, "Resyncing client mirror");
        let _ = self.outbound_tx.send(Envelope::to(
            combatant_id,
            ServerMsg::StateSync {
                phase: self.phase,
                round: self.round,
                score: SnapshotBuilder::score(&self.scoreboard),
                winner_team: self.winner,
                combatants: SnapshotBuilder::roster(&self.roster),
            },
        ));
    }

    /// Add a combatant: team by join order, placed at its team's next spawn slot
    pub fn handle_join(&mut self) -> CombatantId {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;

        let id = CombatantId(ordinal);
        let team = Team::from_join_order(ordinal);
        let mut combatant = CombatantState::new(id, self.settings.max_health);

        let mut events = vec![StateEvent::CombatantJoined { combatant_id: id }];
        events.extend(combatant.assign_team(team));
        let slot = self.take_spawn_slot(team);
        events.extend(combatant.respawn(slot, self.settings.spawn.position(team, slot)));

        self.roster.insert(id, combatant);
        self.publish_all(&events);

        let _ = self.outbound_tx.send(Envelope::to(
            id,
            ServerMsg::MatchJoined {
                match_id: self.match_id,
                combatant_id: id,
                team: Some(team),
                phase: self.phase,
                round: self.round,
                score: SnapshotBuilder::score(&self.scoreboard),
                combatants: SnapshotBuilder::roster(&self.roster),
            },
        ));

        info!(
            match_id = %self.match_id,
            combatant_id = %id,
            team = %team,
            player_count = self.roster.len(),
            "Combatant joined"
        );

        if self.awaiting_players && self.roster.len() >= self.settings.min_players_to_start {
            self.awaiting_players = false;
            let settle = self.settings.join_settle_delay;
            self.schedule(Transition::StartRound, settle);
        }

        id
    }

    pub fn handle_leave(&mut self, combatant_id: CombatantId) {
        let Some(combatant) = self.roster.remove(&combatant_id) else {
            return;
        };

        let dropped = self.bus.clear_topic(Topic::Combatant(combatant_id));
        self.bus
            .publish(&StateEvent::CombatantLeft { combatant_id });

        info!(
            match_id = %self.match_id,
            combatant_id = %combatant_id,
            dropped_handlers = dropped,
            player_count = self.roster.len(),
            "Combatant left"
        );

        // A departure can leave a team with nobody standing
        if self.phase == MatchPhase::RoundActive {
            if let Some(team) = combatant.team() {
                if self.team_wiped_out(team) && !self.team_wiped_out(team.opponent()) {
                    self.end_round(team.opponent());
                }
            }
        }
    }

    pub fn handle_client_msg(&mut self, combatant_id: CombatantId, msg: ClientMsg) {
        match msg {
            ClientMsg::RequestHit {
                target_id,
                declared_damage,
            } => self.submit_hit_claim(HitClaim {
                attacker: combatant_id,
                target: target_id,
                declared_damage,
            }),
            ClientMsg::RequestWeaponSlot { slot } => match WeaponSlot::from_index(slot) {
                Some(slot) => self.select_weapon_slot(combatant_id, slot),
                None => debug!(combatant_id = %combatant_id, slot, "Dropping out-of-range slot"),
            },
            ClientMsg::RequestPrimaryVariant { variant } => {
                match PrimaryVariant::from_index(variant) {
                    Some(variant) => self.select_primary_variant(combatant_id, variant),
                    None => {
                        debug!(combatant_id = %combatant_id, variant, "Dropping out-of-range variant")
                    }
                }
            }
            ClientMsg::Ping { t } => {
                let _ = self
                    .outbound_tx
                    .send(Envelope::to(combatant_id, ServerMsg::Pong { t }));
            }
        }
    }

    /// Hit claims only count while a round is live; invalid claims are dropped quietly
    pub fn submit_hit_claim(&mut self, claim: HitClaim) {
        if self.phase != MatchPhase::RoundActive {
            debug!(?claim, phase = ?self.phase, "Dropping hit claim outside active round");
            return;
        }

        let events = match self
            .arbiter
            .submit(claim, &mut self.roster, &self.settings.weapons)
        {
            Ok(events) => events,
            Err(reason) => {
                debug!(?claim, %reason, "Dropping hit claim");
                return;
            }
        };

        // Publish first: the death must be visible before the wipe-out scan
        self.publish_all(&events);

        for event in &events {
            if let StateEvent::Died {
                combatant_id,
                team,
                killer_id,
            } = event
            {
                info!(
                    match_id = %self.match_id,
                    combatant_id = %combatant_id,
                    killer_id = ?killer_id,
                    "Combatant eliminated"
                );
                if let Some(team) = team {
                    self.on_combatant_died(*team);
                }
            }
        }
    }

    pub fn select_weapon_slot(&mut self, combatant_id: CombatantId, slot: WeaponSlot) {
        let event = self
            .roster
            .get_mut(&combatant_id)
            .and_then(|c| c.select_slot(slot));
        if let Some(event) = event {
            self.bus.publish(&event);
        }
    }

    pub fn select_primary_variant(&mut self, combatant_id: CombatantId, variant: PrimaryVariant) {
        let event = self
            .roster
            .get_mut(&combatant_id)
            .and_then(|c| c.select_primary(variant));
        if let Some(event) = event {
            self.bus.publish(&event);
        }
    }

    /// Elimination check for the dead combatant's team
    pub fn on_combatant_died(&mut self, dead_team: Team) {
        if self.phase != MatchPhase::RoundActive {
            return;
        }

        if self.team_wiped_out(dead_team) {
            self.end_round(dead_team.opponent());
        }
    }

    /// True iff no connected combatant of `team` is alive. Full scan on purpose.
    pub fn team_wiped_out(&self, team: Team) -> bool {
        !self
            .roster
            .values()
            .any(|c| c.team() == Some(team) && c.is_alive())
    }

    /// Fire every transition whose deadline has passed, earliest first
    pub fn fire_due(&mut self, now: Instant) {
        while self.timers.first().is_some_and(|t| t.due <= now) {
            let scheduled = self.timers.remove(0);
            self.fire(scheduled.transition);
        }
    }

    /// Apply a delayed transition if it still makes sense in the current phase
    pub fn fire(&mut self, transition: Transition) {
        match (transition, self.phase) {
            (Transition::StartRound, MatchPhase::WaitingToStart) => {
                if self.roster.len() < self.settings.min_players_to_start {
                    info!(
                        match_id = %self.match_id,
                        player_count = self.roster.len(),
                        min_players = self.settings.min_players_to_start,
                        "Not enough combatants, waiting for more"
                    );
                    self.awaiting_players = true;
                    return;
                }
                self.start_round();
            }
            (Transition::StartRound, MatchPhase::RoundEnding) => self.start_round(),
            (Transition::ReturnToLobby, MatchPhase::MatchEnded) if !self.finished => {
                self.return_to_lobby()
            }
            (transition, phase) => {
                debug!(?transition, ?phase, "Ignoring stale transition");
            }
        }
    }

    fn start_round(&mut self) {
        self.round += 1;
        self.spawn_slots = [0; 2];

        let mut events = Vec::new();
        for combatant in self.roster.values_mut() {
            let Some(team) = combatant.team() else {
                warn!(combatant_id = %combatant.id(), "Combatant without team skipped at round start");
                continue;
            };
            let slot = self.spawn_slots[team.index()];
            self.spawn_slots[team.index()] += 1;
            events.extend(combatant.respawn(slot, self.settings.spawn.position(team, slot)));
        }

        self.phase = MatchPhase::RoundActive;
        self.publish_all(&events);
        self.bus
            .publish(&StateEvent::RoundStarted { round: self.round });

        info!(
            match_id = %self.match_id,
            round = self.round,
            player_count = self.roster.len(),
            "Round started"
        );
    }

    fn end_round(&mut self, winner: Team) {
        self.phase = MatchPhase::RoundEnding;
        let wins = self.scoreboard.record_round_win(winner);

        self.bus.publish(&self.scoreboard.changed_event());
        self.bus.publish(&StateEvent::RoundEnded {
            round: self.round,
            winner,
        });

        info!(
            match_id = %self.match_id,
            round = self.round,
            winner = %winner,
            team_a_wins = self.scoreboard.team_a_wins(),
            team_b_wins = self.scoreboard.team_b_wins(),
            "Round ended"
        );

        if wins >= self.settings.target_round_wins {
            self.end_match(winner);
        } else {
            let delay = self.settings.inter_round_delay;
            self.schedule(Transition::StartRound, delay);
        }
    }

    fn end_match(&mut self, winner: Team) {
        self.phase = MatchPhase::MatchEnded;
        self.winner = Some(winner);

        self.bus.publish(&StateEvent::MatchEnded {
            winner,
            team_a_wins: self.scoreboard.team_a_wins(),
            team_b_wins: self.scoreboard.team_b_wins(),
        });

        info!(match_id = %self.match_id, winner = %winner, "Match ended");

        let delay = self.settings.match_end_display;
        self.schedule(Transition::ReturnToLobby, delay);
    }

    /// One broadcast moves every connected client at once
    fn return_to_lobby(&mut self) {
        self.bus.publish(&StateEvent::ReturnToLobby {
            destination: self.settings.lobby_destination.clone(),
        });
        self.finished = true;

        info!(
            match_id = %self.match_id,
            destination = %self.settings.lobby_destination,
            player_count = self.roster.len(),
            "Sending all combatants to lobby"
        );
    }

    fn schedule(&mut self, transition: Transition, delay: Duration) {
        let due = Instant::now() + delay;
        let pos = self.timers.partition_point(|t| t.due <= due);
        self.timers
            .insert(pos, ScheduledTransition { due, transition });
    }

    fn take_spawn_slot(&mut self, team: Team) -> u32 {
        let slot = self.spawn_slots[team.index()];
        self.spawn_slots[team.index()] += 1;
        slot
    }

    fn publish_all(&self, events: &[StateEvent]) {
        for event in events {
            self.bus.publish(event);
        }
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.timers.first().map(|t| t.due)
    }

    pub fn pending_transitions(&self) -> Vec<Transition> {
        self.timers.iter().map(|t| t.transition).collect()
    }

    pub fn summary(&self) -> MatchSummary {
        SnapshotBuilder::summary(
            self.match_id,
            self.phase,
            self.round,
            &self.scoreboard,
            self.winner,
            &self.roster,
        )
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn scoreboard(&self) -> &Scoreboard {
        &self.scoreboard
    }

    pub fn winner(&self) -> Option<Team> {
        self.winner
    }

    pub fn combatant(&self, id: CombatantId) -> Option<&CombatantState> {
        self.roster.get(&id)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[cfg(test)]
    fn combatant_mut(&mut self, id: CombatantId) -> Option<&mut CombatantState> {
        self.roster.get_mut(&id)
    }
}

impl Drop for MatchCoordinator {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.take() {
            self.bus.unsubscribe(relay);
        }
    }
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(due) => sleep_until(due).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        coordinator: MatchCoordinator,
        outbound: broadcast::Receiver<Envelope>,
        bus: Arc<EventBus>,
        // Keeps the queue open
        _handle: CoordinatorHandle,
    }

    impl Harness {
        fn new(settings: MatchSettings) -> Self {
            let bus = Arc::new(EventBus::new());
            let (mut coordinator, handle, _rx) =
                MatchCoordinator::new(Uuid::new_v4(), settings, bus.clone());
            // Transitions are fired by hand
            coordinator.timers.clear();
            let outbound = handle.subscribe();
            Self {
                coordinator,
                outbound,
                bus,
                _handle: handle,
            }
        }

        fn with_players(settings: MatchSettings, count: usize) -> Self {
            let mut harness = Self::new(settings);
            for _ in 0..count {
                harness.coordinator.handle_join();
            }
            harness.drain();
            harness
        }

        fn drain(&mut self) -> Vec<ServerMsg> {
            let mut msgs = Vec::new();
            while let Ok(envelope) = self.outbound.try_recv() {
                msgs.push(envelope.msg);
            }
            msgs
        }

        fn hit(&mut self, attacker: u64, target: u64, damage: u32) {
            self.coordinator.handle_client_msg(
                CombatantId(attacker),
                ClientMsg::RequestHit {
                    target_id: CombatantId(target),
                    declared_damage: damage,
                },
            );
        }

        fn health(&self, id: u64) -> i32 {
            self.coordinator.combatant(CombatantId(id)).unwrap().health()
        }
    }

    fn count<F: Fn(&ServerMsg) -> bool>(msgs: &[ServerMsg], pred: F) -> usize {
        msgs.iter().filter(|m| pred(m)).count()
    }

    fn started(harness: &mut Harness) {
        harness.coordinator.fire(Transition::StartRound);
        assert_eq!(harness.coordinator.phase(), MatchPhase::RoundActive);
        harness.drain();
    }

    async fn wait_for(rx: &mut broadcast::Receiver<Envelope>, wanted: ServerMsg) {
        loop {
            let envelope = rx.recv().await.unwrap();
            if envelope.msg == wanted {
                return;
            }
        }
    }

    #[test]
    fn settle_delay_schedules_first_round() {
        let (coordinator, _handle, _rx) = MatchCoordinator::new(
            Uuid::new_v4(),
            MatchSettings::default(),
            Arc::new(EventBus::new()),
        );
        assert_eq!(coordinator.phase(), MatchPhase::WaitingToStart);
        assert_eq!(
            coordinator.pending_transitions(),
            vec![Transition::StartRound]
        );
    }

    #[test]
    fn joins_alternate_teams_and_get_a_private_roster() {
        let mut harness = Harness::new(MatchSettings::default());
        let first = harness.coordinator.handle_join();
        let second = harness.coordinator.handle_join();

        let a = harness.coordinator.combatant(first).unwrap();
        let b = harness.coordinator.combatant(second).unwrap();
        assert_eq!(a.team(), Some(Team::A));
        assert_eq!(b.team(), Some(Team::B));
        assert_eq!(a.health(), 100);

        let mut joined_for_second = None;
        while let Ok(envelope) = harness.outbound.try_recv() {
            if let ServerMsg::MatchJoined { combatants, .. } = &envelope.msg {
                if envelope.is_for(second) && !envelope.is_for(first) {
                    joined_for_second = Some(combatants.len());
                }
            }
        }
        assert_eq!(joined_for_second, Some(2));
    }

    #[test]
    fn round_start_respawns_everyone_on_distinct_slots() {
        let mut harness = Harness::with_players(MatchSettings::default(), 4);
        harness.coordinator.fire(Transition::StartRound);
        let msgs = harness.drain();

        let mut slots: Vec<(CombatantId, u32)> = msgs
            .iter()
            .filter_map(|m| match m {
                ServerMsg::Respawned {
                    combatant_id,
                    spawn_slot,
                    ..
                } => Some((*combatant_id, *spawn_slot)),
                _ => None,
            })
            .collect();
        slots.sort();
        assert_eq!(
            slots,
            vec![
                (CombatantId(0), 0),
                (CombatantId(1), 0),
                (CombatantId(2), 1),
                (CombatantId(3), 1),
            ]
        );
        assert_eq!(msgs.last(), Some(&ServerMsg::RoundStarted { round: 1 }));
    }

    #[test]
    fn scenario_one_shot_wins_round_then_next_round_respawns() {
        let mut harness = Harness::with_players(MatchSettings::default(), 2);
        started(&mut harness);

        harness.hit(0, 1, 100);
        let msgs = harness.drain();

        assert_eq!(harness.coordinator.phase(), MatchPhase::RoundEnding);
        assert_eq!(harness.coordinator.scoreboard().team_a_wins(), 1);
        assert_eq!(harness.coordinator.scoreboard().team_b_wins(), 0);
        assert!(msgs.contains(&ServerMsg::RoundEnded {
            round: 1,
            winner_team: Team::A
        }));
        assert!(msgs.contains(&ServerMsg::ScoreChanged {
            team_a_wins: 1,
            team_b_wins: 0
        }));
        assert_eq!(
            harness.coordinator.pending_transitions(),
            vec![Transition::StartRound]
        );

        harness.coordinator.fire(Transition::StartRound);
        assert_eq!(harness.coordinator.phase(), MatchPhase::RoundActive);
        assert_eq!(harness.coordinator.round(), 2);
        assert_eq!(harness.health(0), 100);
        assert_eq!(harness.health(1), 100);
        assert!(harness.coordinator.combatant(CombatantId(1)).unwrap().is_alive());
    }

    #[test]
    fn scenario_hit_on_dead_target_changes_nothing() {
        let mut harness = Harness::with_players(MatchSettings::default(), 4);
        started(&mut harness);

        harness.hit(0, 1, 100);
        let first = harness.drain();
        assert_eq!(count(&first, |m| matches!(m, ServerMsg::Died { .. })), 1);

        harness.hit(2, 1, 100);
        let second = harness.drain();
        assert!(second.is_empty());
        assert_eq!(harness.health(1), 0);
        assert_eq!(harness.coordinator.phase(), MatchPhase::RoundActive);
    }

    #[test]
    fn scenario_single_round_match_ends_immediately() {
        let settings = MatchSettings {
            target_round_wins: 1,
            ..MatchSettings::default()
        };
        let mut harness = Harness::with_players(settings, 2);
        started(&mut harness);

        harness.hit(1, 0, 100);
        let msgs = harness.drain();

        assert_eq!(harness.coordinator.phase(), MatchPhase::MatchEnded);
        assert_eq!(harness.coordinator.winner(), Some(Team::B));
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMsg::MatchEnded {
                winner_team: Team::B,
                ..
            }
        )));
        assert_eq!(
            harness.coordinator.pending_transitions(),
            vec![Transition::ReturnToLobby]
        );

        // A stale round start does nothing
        harness.coordinator.fire(Transition::StartRound);
        assert_eq!(harness.coordinator.round(), 1);
        assert!(harness.drain().is_empty());
    }

    #[test]
    fn first_to_target_wins_and_no_round_follows() {
        let mut harness = Harness::with_players(MatchSettings::default(), 2);
        let mut round_starts = 0;

        // B takes one round, A takes three
        for attacker in [1u64, 0, 0, 0] {
            harness.coordinator.fire(Transition::StartRound);
            let target = 1 - attacker;
            harness.hit(attacker, target, 100);
            round_starts += count(&harness.drain(), |m| {
                matches!(m, ServerMsg::RoundStarted { .. })
            });
        }

        assert_eq!(round_starts, 4);
        assert_eq!(harness.coordinator.phase(), MatchPhase::MatchEnded);
        assert_eq!(harness.coordinator.winner(), Some(Team::A));
        assert_eq!(harness.coordinator.scoreboard().wins(Team::A), 3);
        assert_eq!(harness.coordinator.scoreboard().wins(Team::B), 1);

        harness.coordinator.fire(Transition::StartRound);
        harness.coordinator.fire(Transition::ReturnToLobby);
        let tail = harness.drain();
        assert_eq!(count(&tail, |m| matches!(m, ServerMsg::RoundStarted { .. })), 0);
        assert_eq!(
            tail,
            vec![ServerMsg::ReturnToLobby {
                destination: "lobby".to_string()
            }]
        );
        assert!(harness.coordinator.is_finished());

        // Only once
        harness.coordinator.fire(Transition::ReturnToLobby);
        assert!(harness.drain().is_empty());
    }

    #[test]
    fn wipe_out_check_matches_living_count_for_small_rosters() {
        // (joins, leavers) -> 1v1, 2v2, 3v1
        let rosters: [(usize, &[u64]); 3] = [(2, &[]), (4, &[]), (6, &[3, 5])];

        for (joins, leavers) in rosters {
            let mut harness = Harness::with_players(MatchSettings::default(), joins);
            for id in leavers {
                harness.coordinator.handle_leave(CombatantId(*id));
            }
            let ids: Vec<CombatantId> = harness.coordinator.roster.keys().copied().collect();

            for mask in 0u32..(1 << ids.len()) {
                for (bit, id) in ids.iter().enumerate() {
                    let c = harness.coordinator.combatant_mut(*id).unwrap();
                    c.respawn(0, Default::default());
                    if mask & (1 << bit) != 0 {
                        c.apply_damage(1000, None);
                    }
                }

                for team in Team::ALL {
                    let alive = harness
                        .coordinator
                        .roster
                        .values()
                        .filter(|c| c.team() == Some(team) && c.is_alive())
                        .count();
                    assert_eq!(
                        harness.coordinator.team_wiped_out(team),
                        alive == 0,
                        "joins={joins} mask={mask:b} team={team}"
                    );
                }
            }
        }
    }

    #[test]
    fn round_continues_while_a_teammate_lives() {
        let mut harness = Harness::with_players(MatchSettings::default(), 4);
        started(&mut harness);

        harness.hit(0, 1, 100);
        assert_eq!(harness.coordinator.phase(), MatchPhase::RoundActive);
        harness.hit(2, 3, 60);
        assert_eq!(harness.coordinator.phase(), MatchPhase::RoundActive);
        harness.hit(0, 3, 40);
        assert_eq!(harness.coordinator.phase(), MatchPhase::RoundEnding);
        assert_eq!(harness.coordinator.scoreboard().wins(Team::A), 1);
    }

    #[test]
    fn friendly_and_dead_attacker_hits_are_dropped() {
        let mut harness = Harness::with_players(MatchSettings::default(), 4);
        started(&mut harness);

        harness.hit(0, 2, 50);
        assert_eq!(harness.health(2), 100);

        harness.hit(1, 0, 100);
        harness.hit(0, 1, 100);
        assert_eq!(harness.health(1), 100);
    }

    #[test]
    fn hits_outside_active_round_are_dropped() {
        let mut harness = Harness::with_players(MatchSettings::default(), 2);
        harness.hit(0, 1, 100);
        assert_eq!(harness.health(1), 100);

        started(&mut harness);
        harness.hit(0, 1, 100);
        assert_eq!(harness.coordinator.phase(), MatchPhase::RoundEnding);

        // Survivor cannot be damaged between rounds
        harness.hit(1, 0, 100);
        assert_eq!(harness.health(0), 100);
    }

    #[test]
    fn weapon_requests_are_broadcast_and_bad_indices_dropped() {
        let mut harness = Harness::with_players(MatchSettings::default(), 2);
        let id = CombatantId(0);

        harness
            .coordinator
            .handle_client_msg(id, ClientMsg::RequestPrimaryVariant { variant: 1 });
        // Holding the pistol, so the primary choice changes nothing visible
        assert!(harness.drain().is_empty());

        harness
            .coordinator
            .handle_client_msg(id, ClientMsg::RequestWeaponSlot { slot: 0 });
        assert_eq!(
            harness.drain(),
            vec![ServerMsg::WeaponEquipChanged {
                combatant_id: id,
                weapon: crate::game::loadout::WeaponKind::Sniper
            }]
        );

        harness
            .coordinator
            .handle_client_msg(id, ClientMsg::RequestWeaponSlot { slot: 7 });
        harness
            .coordinator
            .handle_client_msg(id, ClientMsg::RequestPrimaryVariant { variant: 9 });
        assert!(harness.drain().is_empty());
    }

    #[test]
    fn leaving_last_living_member_ends_the_round() {
        let mut harness = Harness::with_players(MatchSettings::default(), 4);
        started(&mut harness);

        harness.hit(0, 1, 100);
        harness.coordinator.handle_leave(CombatantId(3));

        assert_eq!(harness.coordinator.phase(), MatchPhase::RoundEnding);
        assert_eq!(harness.coordinator.scoreboard().wins(Team::A), 1);
        assert!(harness.drain().contains(&ServerMsg::CombatantLeft {
            combatant_id: CombatantId(3)
        }));
    }

    #[test]
    fn minimum_player_guard_holds_the_first_round() {
        let settings = MatchSettings {
            min_players_to_start: 2,
            ..MatchSettings::default()
        };
        let mut harness = Harness::with_players(settings, 1);

        harness.coordinator.fire(Transition::StartRound);
        assert_eq!(harness.coordinator.phase(), MatchPhase::WaitingToStart);

        harness.coordinator.handle_join();
        assert_eq!(
            harness.coordinator.pending_transitions(),
            vec![Transition::StartRound]
        );

        harness.coordinator.fire(Transition::StartRound);
        assert_eq!(harness.coordinator.phase(), MatchPhase::RoundActive);
    }

    #[test]
    fn leaving_tears_down_combatant_subscriptions() {
        let mut harness = Harness::with_players(MatchSettings::default(), 2);
        let _sub = harness
            .bus
            .subscribe(Topic::Combatant(CombatantId(1)), |_| {});

        harness.coordinator.handle_leave(CombatantId(1));
        assert_eq!(
            harness.bus.subscriber_count(Topic::Combatant(CombatantId(1))),
            0
        );
    }

    #[test]
    fn lagging_receiver_gets_full_state_on_resync() {
        let mut harness = Harness::with_players(MatchSettings::default(), 4);
        let mut slow = harness.coordinator.outbound_tx.subscribe();

        started(&mut harness);
        harness.hit(0, 1, 60);
        for _ in 0..OUTBOUND_CAPACITY {
            harness
                .coordinator
                .handle_client_msg(CombatantId(2), ClientMsg::Ping { t: 0 });
        }

        assert!(matches!(
            slow.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));

        harness.coordinator.handle_event(CoordinatorEvent::Resync {
            combatant_id: CombatantId(0),
        });

        let mut sync = None;
        while let Ok(envelope) = slow.try_recv() {
            if let ServerMsg::StateSync { .. } = envelope.msg {
                assert!(envelope.is_for(CombatantId(0)));
                assert!(!envelope.is_for(CombatantId(1)));
                sync = Some(envelope.msg);
            }
        }

        let Some(ServerMsg::StateSync {
            phase,
            round,
            combatants,
            ..
        }) = sync
        else {
            panic!("no state sync after resync request");
        };
        assert_eq!(phase, MatchPhase::RoundActive);
        assert_eq!(round, 1);
        assert_eq!(combatants.len(), 4);
        assert_eq!(combatants[1].health, 40);
    }

    #[test]
    fn resync_for_unknown_combatant_sends_nothing() {
        let mut harness = Harness::with_players(MatchSettings::default(), 2);
        harness.coordinator.handle_event(CoordinatorEvent::Resync {
            combatant_id: CombatantId(9),
        });
        assert!(harness.drain().is_empty());
    }

    #[test]
    fn stale_client_messages_are_still_applied() {
        let mut harness = Harness::with_players(MatchSettings::default(), 2);
        harness.coordinator.handle_event(CoordinatorEvent::Client {
            combatant_id: CombatantId(0),
            msg: ClientMsg::Ping { t: 7 },
            received_at: 0,
        });
        assert_eq!(harness.drain(), vec![ServerMsg::Pong { t: 7 }]);
    }

    #[test]
    fn dropping_the_coordinator_removes_its_relay() {
        let harness = Harness::new(MatchSettings::default());
        let bus = harness.bus.clone();
        assert_eq!(bus.subscriber_count(Topic::All), 1);

        drop(harness);
        assert_eq!(bus.subscriber_count(Topic::All), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn event_loop_drives_rounds_on_timers() {
        let settings = MatchSettings {
            target_round_wins: 2,
            ..MatchSettings::default()
        };
        let bus = Arc::new(EventBus::new());
        let (coordinator, handle, events_rx) =
            MatchCoordinator::new(Uuid::new_v4(), settings, bus);
        let mut outbound = handle.subscribe();
        let task = tokio::spawn(coordinator.run(events_rx));

        let red = handle.join().await.unwrap();
        let blue = handle.join().await.unwrap();

        wait_for(&mut outbound, ServerMsg::RoundStarted { round: 1 }).await;
        handle
            .submit(
                red,
                ClientMsg::RequestHit {
                    target_id: blue,
                    declared_damage: 100,
                },
            )
            .await
            .unwrap();
        wait_for(&mut outbound, ServerMsg::RoundStarted { round: 2 }).await;

        let summary = handle.summary().await.unwrap();
        assert_eq!(summary.phase, MatchPhase::RoundActive);
        assert_eq!(summary.score.team_a_wins, 1);
        assert!(summary.combatants.iter().all(|c| c.health == 100));

        handle
            .submit(
                red,
                ClientMsg::RequestHit {
                    target_id: blue,
                    declared_damage: 100,
                },
            )
            .await
            .unwrap();
        wait_for(
            &mut outbound,
            ServerMsg::ReturnToLobby {
                destination: "lobby".to_string(),
            },
        )
        .await;

        tokio_test::assert_ok!(task.await);
        assert!(handle.summary().await.is_err());
    }
}
