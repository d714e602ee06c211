//! # Team Arena Server
//!
//! Server-authoritative two-team elimination match, first to N round wins.
//!
//! ```text
//! game/      - match state (no I/O)
//! ├── combatant.rs  - per-combatant health, team, loadout
//! ├── loadout.rs    - weapon table, slot resolution, client fire gate
//! ├── combat.rs     - hit claim validation
//! ├── scoreboard.rs - round wins per team
//! ├── events.rs     - topic-keyed state change bus
//! ├── snapshot.rs   - client mirror views
//! └── match.rs      - coordinator state machine + event loop
//!
//! ws/        - WebSocket protocol and connection handling
//! http/      - health, match status, upgrade route
//! app/       - shared state, single-coordinator guard
//! ```

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;
