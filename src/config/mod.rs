//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::combat::HitPolicy;
use crate::game::combatant::{SpawnLayout, SpawnPoint};
use crate::game::loadout::{AmmoCapacity, WeaponKind, WeaponTable};
use crate::util::time::duration_from_secs;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma-separated), permissive when unset
    pub client_origin: Option<String>,
    /// Match rules
    pub match_settings: MatchSettings,
}

/// Match rules and timings
#[derive(Clone, Debug)]
pub struct MatchSettings {
    pub max_health: i32,
    /// Round wins needed to take the match
    pub target_round_wins: u32,
    /// Wait after server start before the first round
    pub join_settle_delay: Duration,
    /// Pause between a round result and the next round
    pub inter_round_delay: Duration,
    /// How long the final result is shown before everyone leaves
    pub match_end_display: Duration,
    /// Rounds do not start below this many connected combatants (0 = always start)
    pub min_players_to_start: usize,
    /// Where clients go after the match
    pub lobby_destination: String,
    pub hit_policy: HitPolicy,
    pub spawn: SpawnLayout,
    pub weapons: WeaponTable,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            max_health: 100,
            target_round_wins: 3,
            join_settle_delay: Duration::from_secs(2),
            inter_round_delay: Duration::from_secs(3),
            match_end_display: Duration::from_secs(5),
            min_players_to_start: 0,
            lobby_destination: "lobby".to_string(),
            hit_policy: HitPolicy::Trusting,
            spawn: SpawnLayout::default(),
            weapons: WeaponTable::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            client_origin: lookup("CLIENT_ORIGIN").filter(|s| !s.trim().is_empty()),
            match_settings: MatchSettings::from_lookup(&lookup)?,
        })
    }
}

impl MatchSettings {
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let max_health: i32 = parse_or(lookup, "MAX_HEALTH", defaults.max_health)?;
        if max_health <= 0 {
            return Err(ConfigError::invalid("MAX_HEALTH", max_health));
        }

        let target_round_wins: u32 =
            parse_or(lookup, "TARGET_ROUND_WINS", defaults.target_round_wins)?;
        if target_round_wins == 0 {
            return Err(ConfigError::invalid("TARGET_ROUND_WINS", target_round_wins));
        }

        let mut spawn = defaults.spawn;
        spawn.lateral_offset = parse_or(lookup, "SPAWN_LATERAL_OFFSET", spawn.lateral_offset)?;
        spawn.team_a_anchor = parse_point(lookup, "SPAWN_TEAM_A", spawn.team_a_anchor)?;
        spawn.team_b_anchor = parse_point(lookup, "SPAWN_TEAM_B", spawn.team_b_anchor)?;

        let mut weapons = defaults.weapons;
        for kind in WeaponKind::ALL {
            let name = kind.config_name();
            let stats = weapons.stats_mut(kind);

            stats.damage = parse_or(lookup, &format!("WEAPON_{}_DAMAGE", name), stats.damage)?;
            stats.range = parse_or(lookup, &format!("WEAPON_{}_RANGE", name), stats.range)?;

            let interval_key = format!("WEAPON_{}_FIRE_INTERVAL", name);
            stats.fire_interval_secs = parse_or(lookup, &interval_key, stats.fire_interval_secs)?;
            if duration_from_secs(f64::from(stats.fire_interval_secs)).is_none() {
                return Err(ConfigError::invalid(&interval_key, stats.fire_interval_secs));
            }

            let ammo_key = format!("WEAPON_{}_MAX_AMMO", name);
            if let Some(raw) = lookup(&ammo_key) {
                let raw: i64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::invalid(&ammo_key, &raw))?;
                stats.max_ammo = AmmoCapacity::from_raw(raw);
            }
        }

        Ok(Self {
            max_health,
            target_round_wins,
            join_settle_delay: parse_delay(lookup, "JOIN_SETTLE_DELAY_SECS", defaults.join_settle_delay)?,
            inter_round_delay: parse_delay(lookup, "INTER_ROUND_DELAY_SECS", defaults.inter_round_delay)?,
            match_end_display: parse_delay(lookup, "MATCH_END_DISPLAY_SECS", defaults.match_end_display)?,
            min_players_to_start: parse_or(lookup, "MIN_PLAYERS_TO_START", defaults.min_players_to_start)?,
            lobby_destination: lookup("LOBBY_DESTINATION").unwrap_or(defaults.lobby_destination),
            hit_policy: parse_or(lookup, "HIT_POLICY", defaults.hit_policy)?,
            spawn,
            weapons,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid(key, &raw)),
        None => Ok(default),
    }
}

fn parse_delay<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(duration_from_secs)
            .ok_or_else(|| ConfigError::invalid(key, &raw)),
        None => Ok(default),
    }
}

/// `x,y,z`
fn parse_point<F>(lookup: &F, key: &str, default: SpawnPoint) -> Result<SpawnPoint, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };

    let coords: Vec<f32> = raw
        .split(',')
        .map(|part| part.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .map_err(|_| ConfigError::invalid(key, &raw))?;

    match coords.as_slice() {
        [x, y, z] => Ok(SpawnPoint {
            x: *x,
            y: *y,
            z: *z,
        }),
        _ => Err(ConfigError::invalid(key, raw)),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },

    #[error("Invalid server address format")]
    InvalidAddress,
}

impl ConfigError {
    fn invalid(key: &str, value: impl ToString) -> Self {
        Self::Invalid {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}
