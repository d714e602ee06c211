//! Match simulation modules

pub mod combat;
pub mod combatant;
pub mod events;
pub mod loadout;
pub mod r#match;
pub mod scoreboard;
pub mod snapshot;

pub use r#match::{
    CoordinatorError, CoordinatorEvent, CoordinatorHandle, MatchCoordinator, MatchPhase,
};
