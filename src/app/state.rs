//! Application state shared across routes

use std::sync::{Arc, OnceLock};

use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::game::events::{EventBus, StateEvent, Subscription, Topic};
use crate::game::{CoordinatorError, CoordinatorHandle, MatchCoordinator};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub bus: Arc<EventBus>,
    coordinator: Arc<OnceLock<CoordinatorHandle>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            bus: Arc::new(EventBus::new()),
            coordinator: Arc::new(OnceLock::new()),
        }
    }

    /// Spawn the match coordinator. Only one may run per process; a second
    /// attempt is refused and the duplicate is discarded before it starts.
    pub fn start_coordinator(&self) -> Result<JoinHandle<()>, CoordinatorError> {
        if self.coordinator.get().is_some() {
            return Err(CoordinatorError::AlreadyRunning);
        }

        let match_id = Uuid::new_v4();
        let (coordinator, handle, events_rx) = MatchCoordinator::new(
            match_id,
            self.config.match_settings.clone(),
            self.bus.clone(),
        );

        // Lost a race with another starter: dropping `coordinator` removes its relay
        if self.coordinator.set(handle).is_err() {
            return Err(CoordinatorError::AlreadyRunning);
        }

        info!(match_id = %match_id, "Spawning match coordinator");
        Ok(tokio::spawn(coordinator.run(events_rx)))
    }

    pub fn coordinator(&self) -> Result<&CoordinatorHandle, CoordinatorError> {
        self.coordinator.get().ok_or(CoordinatorError::NotRunning)
    }

    /// Server-side score feed: logs every match-level change
    pub fn install_scoreboard_feed(&self) -> Subscription {
        self.bus.subscribe(Topic::Match, |event| match event {
            StateEvent::RoundStarted { round } => info!(round, "[feed] Round started"),
            StateEvent::ScoreChanged {
                team_a_wins,
                team_b_wins,
            } => info!(team_a_wins, team_b_wins, "[feed] Score"),
            StateEvent::RoundEnded { round, winner } => {
                info!(round, winner = %winner, "[feed] Round won")
            }
            StateEvent::MatchEnded { winner, .. } => {
                info!(winner = %winner, "[feed] Match won")
            }
            StateEvent::ReturnToLobby { destination } => {
                info!(destination = %destination, "[feed] Returning to lobby")
            }
            _ => {}
        })
    }
}
