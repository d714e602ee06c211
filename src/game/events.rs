//! Typed state-change events and the subscription bus that fans them out.
//!
//! Every authoritative mutation returns the events it caused; the coordinator
//! publishes them here. Subscribers register per topic and keep the returned
//! [`Subscription`] token, which is the only way to remove that handler.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::combatant::{CombatantId, SpawnPoint, Team};
use super::loadout::WeaponKind;

/// Something that changed in authoritative state
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    CombatantJoined {
        combatant_id: CombatantId,
    },
    CombatantLeft {
        combatant_id: CombatantId,
    },
    TeamAssigned {
        combatant_id: CombatantId,
        team: Team,
    },
    HealthChanged {
        combatant_id: CombatantId,
        health: i32,
    },
    Died {
        combatant_id: CombatantId,
        team: Option<Team>,
        killer_id: Option<CombatantId>,
    },
    Respawned {
        combatant_id: CombatantId,
        spawn_slot: u32,
        position: SpawnPoint,
    },
    WeaponEquipChanged {
        combatant_id: CombatantId,
        weapon: WeaponKind,
    },
    RoundStarted {
        round: u32,
    },
    RoundEnded {
        round: u32,
        winner: Team,
    },
    ScoreChanged {
        team_a_wins: u32,
        team_b_wins: u32,
    },
    MatchEnded {
        winner: Team,
        team_a_wins: u32,
        team_b_wins: u32,
    },
    ReturnToLobby {
        destination: String,
    },
}

impl StateEvent {
    pub fn topic(&self) -> Topic {
        match self {
            StateEvent::CombatantJoined { combatant_id }
            | StateEvent::CombatantLeft { combatant_id }
            | StateEvent::TeamAssigned { combatant_id, .. }
            | StateEvent::HealthChanged { combatant_id, .. }
            | StateEvent::Died { combatant_id, .. }
            | StateEvent::Respawned { combatant_id, .. }
            | StateEvent::WeaponEquipChanged { combatant_id, .. } => {
                Topic::Combatant(*combatant_id)
            }
            StateEvent::RoundStarted { .. }
            | StateEvent::RoundEnded { .. }
            | StateEvent::ScoreChanged { .. }
            | StateEvent::MatchEnded { .. }
            | StateEvent::ReturnToLobby { .. } => Topic::Match,
        }
    }
}

/// Subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Events about one combatant
    Combatant(CombatantId),
    /// Round / score / match lifecycle
    Match,
    /// Everything
    All,
}

pub type Handler = Arc<dyn Fn(&StateEvent) + Send + Sync>;

/// Token returned by [`EventBus::subscribe`]
#[derive(Debug, PartialEq, Eq)]
#[must_use = "dropping the token makes the handler impossible to unsubscribe"]
pub struct Subscription {
    id: u64,
    topic: Topic,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[derive(Default)]
pub struct EventBus {
    handlers: DashMap<Topic, Vec<(u64, Handler)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&StateEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .entry(topic)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription { id, topic }
    }

    /// Remove exactly the handler registered under `subscription`
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut removed = false;
        if let Some(mut entry) = self.handlers.get_mut(&subscription.topic) {
            let before = entry.len();
            entry.retain(|(id, _)| *id != subscription.id);
            removed = entry.len() != before;
        }
        self.handlers
            .remove_if(&subscription.topic, |_, handlers| handlers.is_empty());
        removed
    }

    /// Drop every handler on a topic (combatant teardown)
    pub fn clear_topic(&self, topic: Topic) -> usize {
        self.handlers
            .remove(&topic)
            .map(|(_, handlers)| handlers.len())
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.handlers.get(&topic).map(|h| h.len()).unwrap_or(0)
    }

    /// Deliver to the event's own topic, then to `Topic::All`.
    /// Topics without subscribers are skipped silently.
    pub fn publish(&self, event: &StateEvent) {
        // Clone handlers out so no shard lock is held while they run
        let mut targets: Vec<Handler> = Vec::new();
        for topic in [event.topic(), Topic::All] {
            if let Some(entry) = self.handlers.get(&topic) {
                targets.extend(entry.iter().map(|(_, h)| h.clone()));
            }
        }

        if targets.is_empty() {
            debug!(?event, "No subscribers for event");
            return;
        }

        for handler in targets {
            handler(event);
        }
    }
}
