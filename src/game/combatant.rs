//! Authoritative per-combatant state: team, health, loadout, respawn

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use super::events::StateEvent;
use super::loadout::{Loadout, PrimaryVariant, WeaponSlot};

/// Stable identity of a connected combatant (assigned by the coordinator on join)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CombatantId(pub u64);

impl fmt::Display for CombatantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two sides of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    /// Red side
    A,
    /// Blue side
    B,
}

impl Team {
    pub const ALL: [Team; 2] = [Team::A, Team::B];

    /// Deterministic assignment: even join ordinals go to A, odd to B
    pub fn from_join_order(ordinal: u64) -> Self {
        if ordinal % 2 == 0 {
            Team::A
        } else {
            Team::B
        }
    }

    pub fn opponent(self) -> Self {
        match self {
            Team::A => Team::B,
            Team::B => Team::A,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Team::A => 0,
            Team::B => 1,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Team::A => f.write_str("red"),
            Team::B => f.write_str("blue"),
        }
    }
}

/// World position handed to clients on respawn
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Per-team spawn anchors; slots fan out sideways from the anchor
#[derive(Debug, Clone)]
pub struct SpawnLayout {
    pub team_a_anchor: SpawnPoint,
    pub team_b_anchor: SpawnPoint,
    /// Distance between neighbouring spawn slots along x
    pub lateral_offset: f32,
}

impl SpawnLayout {
    pub fn anchor(&self, team: Team) -> SpawnPoint {
        match team {
            Team::A => self.team_a_anchor,
            Team::B => self.team_b_anchor,
        }
    }

    /// Spawn position = anchor + lateral offset * slot
    pub fn position(&self, team: Team, slot: u32) -> SpawnPoint {
        let anchor = self.anchor(team);
        SpawnPoint {
            x: anchor.x + self.lateral_offset * slot as f32,
            ..anchor
        }
    }
}

impl Default for SpawnLayout {
    fn default() -> Self {
        Self {
            team_a_anchor: SpawnPoint {
                x: -20.0,
                y: 0.0,
                z: 0.0,
            },
            team_b_anchor: SpawnPoint {
                x: 20.0,
                y: 0.0,
                z: 0.0,
            },
            lateral_offset: 2.0,
        }
    }
}

/// Per-match combat statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CombatStats {
    pub kills: u32,
    pub deaths: u32,
    pub damage_dealt: u64,
    pub damage_taken: u64,
}

/// Combatant state (authoritative, owned by the coordinator)
#[derive(Debug, Clone)]
pub struct CombatantState {
    id: CombatantId,
    team: Option<Team>,
    health: i32,
    max_health: i32,
    loadout: Loadout,
    spawn: Option<SpawnPoint>,
    stats: CombatStats,
}

impl CombatantState {
    /// Fresh combatant at full health with no team yet
    pub fn new(id: CombatantId, max_health: i32) -> Self {
        Self {
            id,
            team: None,
            health: max_health,
            max_health,
            loadout: Loadout::default(),
            spawn: None,
            stats: CombatStats::default(),
        }
    }

    pub fn id(&self) -> CombatantId {
        self.id
    }

    pub fn team(&self) -> Option<Team> {
        self.team
    }

    /// Raw health; negative after overkill damage
    pub fn health(&self) -> i32 {
        self.health
    }

    /// Health as clients see it, clamped at 0
    pub fn reported_health(&self) -> i32 {
        self.health.max(0)
    }

    pub fn max_health(&self) -> i32 {
        self.max_health
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0
    }

    pub fn loadout(&self) -> &Loadout {
        &self.loadout
    }

    pub fn spawn(&self) -> Option<SpawnPoint> {
        self.spawn
    }

    pub fn stats(&self) -> &CombatStats {
        &self.stats
    }

    /// First assignment only; the team never changes afterwards
    pub fn assign_team(&mut self, team: Team) -> Option<StateEvent> {
        if let Some(current) = self.team {
            debug!(
                combatant_id = %self.id,
                current = %current,
                requested = %team,
                "Team already assigned, ignoring"
            );
            return None;
        }

        self.team = Some(team);
        Some(StateEvent::TeamAssigned {
            combatant_id: self.id,
            team,
        })
    }

    /// Apply damage. Returns no events when the combatant is already dead.
    /// Emits `Died` exactly once, on the alive -> dead crossing.
    pub fn apply_damage(&mut self, amount: u32, attacker: Option<CombatantId>) -> Vec<StateEvent> {
        if !self.is_alive() || amount == 0 {
            return Vec::new();
        }

        let amount = i32::try_from(amount).unwrap_or(i32::MAX);
        self.health = self.health.saturating_sub(amount);
        self.stats.damage_taken += amount as u64;

        let mut events = vec![StateEvent::HealthChanged {
            combatant_id: self.id,
            health: self.reported_health(),
        }];

        if !self.is_alive() {
            self.stats.deaths += 1;
            events.push(StateEvent::Died {
                combatant_id: self.id,
                team: self.team,
                killer_id: attacker,
            });
        }

        events
    }

    /// Unconditional reset to full health at the given spawn slot
    pub fn respawn(&mut self, spawn_slot: u32, position: SpawnPoint) -> Vec<StateEvent> {
        self.health = self.max_health;
        self.spawn = Some(position);

        vec![
            StateEvent::HealthChanged {
                combatant_id: self.id,
                health: self.health,
            },
            StateEvent::Respawned {
                combatant_id: self.id,
                spawn_slot,
                position,
            },
        ]
    }

    pub fn select_slot(&mut self, slot: WeaponSlot) -> Option<StateEvent> {
        self.loadout
            .select_slot(slot)
            .map(|weapon| StateEvent::WeaponEquipChanged {
                combatant_id: self.id,
                weapon,
            })
    }

    pub fn select_primary(&mut self, variant: PrimaryVariant) -> Option<StateEvent> {
        self.loadout
            .select_primary(variant)
            .map(|weapon| StateEvent::WeaponEquipChanged {
                combatant_id: self.id,
                weapon,
            })
    }

    pub(crate) fn record_hit_dealt(&mut self, damage: u32, killed: bool) {
        self.stats.damage_dealt += damage as u64;
        if killed {
            self.stats.kills += 1;
        }
    }
}
