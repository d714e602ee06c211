//! Read-only views of coordinator state for clients and the HTTP surface

use std::collections::BTreeMap;
use uuid::Uuid;

use crate::ws::protocol::{CombatantSnapshot, MatchSummary, ScoreSnapshot};

use super::combatant::{CombatantId, CombatantState, Team};
use super::scoreboard::Scoreboard;
use super::MatchPhase;

/// Builds mirror snapshots from authoritative state
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    pub fn combatant(c: &CombatantState) -> CombatantSnapshot {
        let loadout = c.loadout();
        CombatantSnapshot {
            combatant_id: c.id(),
            team: c.team(),
            health: c.reported_health(),
            alive: c.is_alive(),
            slot: loadout.slot,
            primary: loadout.primary,
            weapon: loadout.equipped(),
            kills: c.stats().kills,
            deaths: c.stats().deaths,
        }
    }

    /// Roster in id order
    pub fn roster(combatants: &BTreeMap<CombatantId, CombatantState>) -> Vec<CombatantSnapshot> {
        combatants.values().map(Self::combatant).collect()
    }

    pub fn score(scoreboard: &Scoreboard) -> ScoreSnapshot {
        ScoreSnapshot {
            team_a_wins: scoreboard.team_a_wins(),
            team_b_wins: scoreboard.team_b_wins(),
        }
    }

    pub fn summary(
        match_id: Uuid,
        phase: MatchPhase,
        round: u32,
        scoreboard: &Scoreboard,
        winner: Option<Team>,
        combatants: &BTreeMap<CombatantId, CombatantState>,
    ) -> MatchSummary {
        MatchSummary {
            match_id,
            phase,
            round,
            score: Self::score(scoreboard),
            winner_team: winner,
            combatants: Self::roster(combatants),
        }
    }
}
