//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::combatant::{CombatantId, SpawnPoint, Team};
use crate::game::events::StateEvent;
use crate::game::loadout::{PrimaryVariant, WeaponKind, WeaponSlot};
use crate::game::MatchPhase;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Claim a landed shot
    RequestHit {
        target_id: CombatantId,
        /// Damage of the weapon the client believes it fired
        declared_damage: u32,
    },

    /// Switch held slot (0 = primary, 1 = secondary, 2 = melee)
    RequestWeaponSlot { slot: u8 },

    /// Choose primary weapon (0 = rifle, 1 = sniper)
    RequestPrimaryVariant { variant: u8 },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        combatant_id: CombatantId,
        server_time: u64,
    },

    /// Full mirror for a newly joined combatant (sent only to them)
    MatchJoined {
        match_id: Uuid,
        combatant_id: CombatantId,
        team: Option<Team>,
        phase: MatchPhase,
        round: u32,
        score: ScoreSnapshot,
        combatants: Vec<CombatantSnapshot>,
    },

    /// Full mirror replacing the client's state after it missed updates
    StateSync {
        phase: MatchPhase,
        round: u32,
        score: ScoreSnapshot,
        winner_team: Option<Team>,
        combatants: Vec<CombatantSnapshot>,
    },

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
        /// Never negative
        health: i32,
    },

    Died {
        combatant_id: CombatantId,
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
        winner_team: Team,
    },

    ScoreChanged {
        team_a_wins: u32,
        team_b_wins: u32,
    },

    MatchEnded {
        winner_team: Team,
        score: ScoreSnapshot,
    },

    /// Everyone moves to the post-match destination together
    ReturnToLobby {
        destination: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl From<&StateEvent> for ServerMsg {
    fn from(event: &StateEvent) -> Self {
        match event {
            StateEvent::CombatantJoined { combatant_id } => ServerMsg::CombatantJoined {
                combatant_id: *combatant_id,
            },
            StateEvent::CombatantLeft { combatant_id } => ServerMsg::CombatantLeft {
                combatant_id: *combatant_id,
            },
            StateEvent::TeamAssigned { combatant_id, team } => ServerMsg::TeamAssigned {
                combatant_id: *combatant_id,
                team: *team,
            },
            StateEvent::HealthChanged {
                combatant_id,
                health,
            } => ServerMsg::HealthChanged {
                combatant_id: *combatant_id,
                health: (*health).max(0),
            },
            StateEvent::Died {
                combatant_id,
                killer_id,
                ..
            } => ServerMsg::Died {
                combatant_id: *combatant_id,
                killer_id: *killer_id,
            },
            StateEvent::Respawned {
                combatant_id,
                spawn_slot,
                position,
            } => ServerMsg::Respawned {
                combatant_id: *combatant_id,
                spawn_slot: *spawn_slot,
                position: *position,
            },
            StateEvent::WeaponEquipChanged {
                combatant_id,
                weapon,
            } => ServerMsg::WeaponEquipChanged {
                combatant_id: *combatant_id,
                weapon: *weapon,
            },
            StateEvent::RoundStarted { round } => ServerMsg::RoundStarted { round: *round },
            StateEvent::RoundEnded { round, winner } => ServerMsg::RoundEnded {
                round: *round,
                winner_team: *winner,
            },
            StateEvent::ScoreChanged {
                team_a_wins,
                team_b_wins,
            } => ServerMsg::ScoreChanged {
                team_a_wins: *team_a_wins,
                team_b_wins: *team_b_wins,
            },
            StateEvent::MatchEnded {
                winner,
                team_a_wins,
                team_b_wins,
            } => ServerMsg::MatchEnded {
                winner_team: *winner,
                score: ScoreSnapshot {
                    team_a_wins: *team_a_wins,
                    team_b_wins: *team_b_wins,
                },
            },
            StateEvent::ReturnToLobby { destination } => ServerMsg::ReturnToLobby {
                destination: destination.clone(),
            },
        }
    }
}

/// Who an outbound message is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    All,
    Only(CombatantId),
}

/// Outbound message on the shared broadcast channel
#[derive(Debug, Clone)]
pub struct Envelope {
    pub recipient: Recipient,
    pub msg: ServerMsg,
}

impl Envelope {
    pub fn all(msg: ServerMsg) -> Self {
        Self {
            recipient: Recipient::All,
            msg,
        }
    }

    pub fn to(combatant_id: CombatantId, msg: ServerMsg) -> Self {
        Self {
            recipient: Recipient::Only(combatant_id),
            msg,
        }
    }

    pub fn is_for(&self, combatant_id: CombatantId) -> bool {
        match self.recipient {
            Recipient::All => true,
            Recipient::Only(id) => id == combatant_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub team_a_wins: u32,
    pub team_b_wins: u32,
}

/// Combatant state as mirrored by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatantSnapshot {
    pub combatant_id: CombatantId,
    pub team: Option<Team>,
    /// Health (0-max)
    pub health: i32,
    pub alive: bool,
    pub slot: WeaponSlot,
    pub primary: PrimaryVariant,
    pub weapon: WeaponKind,
    pub kills: u32,
    pub deaths: u32,
}

/// Read-only view of the match, served over HTTP
#[derive(Debug, Clone, Serialize)]
pub struct MatchSummary {
    pub match_id: Uuid,
    pub phase: MatchPhase,
    pub round: u32,
    pub score: ScoreSnapshot,
    pub winner_team: Option<Team>,
    pub combatants: Vec<CombatantSnapshot>,
}
