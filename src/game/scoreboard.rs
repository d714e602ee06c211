//! Team round-win counters

use super::combatant::Team;
use super::events::StateEvent;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scoreboard {
    team_a_wins: u32,
    team_b_wins: u32,
}

impl Scoreboard {
    pub fn wins(&self, team: Team) -> u32 {
        match team {
            Team::A => self.team_a_wins,
            Team::B => self.team_b_wins,
        }
    }

    pub fn team_a_wins(&self) -> u32 {
        self.team_a_wins
    }

    pub fn team_b_wins(&self) -> u32 {
        self.team_b_wins
    }

    /// Add one round win, returns the team's new total
    pub fn record_round_win(&mut self, team: Team) -> u32 {
        let wins = match team {
            Team::A => &mut self.team_a_wins,
            Team::B => &mut self.team_b_wins,
        };
        *wins = wins.saturating_add(1);
        *wins
    }

    pub fn changed_event(&self) -> StateEvent {
        StateEvent::ScoreChanged {
            team_a_wins: self.team_a_wins,
            team_b_wins: self.team_b_wins,
        }
    }
}
