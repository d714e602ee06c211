//! Weapon loadout: slot resolution, weapon stats, client-side fire gate

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Equipment slot a combatant is holding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaponSlot {
    Primary,
    Secondary,
    Melee,
}

impl WeaponSlot {
    /// Wire index: 0 = primary, 1 = secondary, 2 = melee
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Primary),
            1 => Some(Self::Secondary),
            2 => Some(Self::Melee),
            _ => None,
        }
    }
}

/// Which rifle occupies the primary slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryVariant {
    Rifle,
    Sniper,
}

impl PrimaryVariant {
    /// Wire index: 0 = rifle, 1 = sniper
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Rifle),
            1 => Some(Self::Sniper),
            _ => None,
        }
    }
}

/// The four weapon identities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaponKind {
    Rifle,
    Sniper,
    Pistol,
    Knife,
}

impl WeaponKind {
    pub const ALL: [WeaponKind; 4] = [
        WeaponKind::Rifle,
        WeaponKind::Sniper,
        WeaponKind::Pistol,
        WeaponKind::Knife,
    ];

    /// Prefix used for `WEAPON_<NAME>_*` configuration keys
    pub fn config_name(self) -> &'static str {
        match self {
            WeaponKind::Rifle => "RIFLE",
            WeaponKind::Sniper => "SNIPER",
            WeaponKind::Pistol => "PISTOL",
            WeaponKind::Knife => "KNIFE",
        }
    }
}

/// Resolve the equipped weapon from slot and primary choice
pub fn resolve(slot: WeaponSlot, primary: PrimaryVariant) -> WeaponKind {
    match (slot, primary) {
        (WeaponSlot::Primary, PrimaryVariant::Rifle) => WeaponKind::Rifle,
        (WeaponSlot::Primary, PrimaryVariant::Sniper) => WeaponKind::Sniper,
        (WeaponSlot::Secondary, _) => WeaponKind::Pistol,
        (WeaponSlot::Melee, _) => WeaponKind::Knife,
    }
}

/// Magazine size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmmoCapacity {
    Limited(u32),
    /// Never decremented (melee)
    Unlimited,
}

impl AmmoCapacity {
    /// Negative values mean unlimited
    pub fn from_raw(raw: i64) -> Self {
        if raw < 0 {
            Self::Unlimited
        } else {
            Self::Limited(u32::try_from(raw).unwrap_or(u32::MAX))
        }
    }
}

/// Fixed stats of one weapon identity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeaponStats {
    /// Damage per hit
    pub damage: u32,
    /// Effective range (world units)
    pub range: f32,
    /// Minimum time between shots (seconds)
    pub fire_interval_secs: f32,
    pub max_ammo: AmmoCapacity,
}

impl WeaponStats {
    /// `None` when the interval does not fit a `Duration`
    pub fn fire_interval(&self) -> Option<Duration> {
        Duration::try_from_secs_f32(self.fire_interval_secs.max(0.0)).ok()
    }
}

/// Stats for all four weapons
#[derive(Debug, Clone, PartialEq)]
pub struct WeaponTable {
    pub rifle: WeaponStats,
    pub sniper: WeaponStats,
    pub pistol: WeaponStats,
    pub knife: WeaponStats,
}

impl WeaponTable {
    pub fn stats(&self, kind: WeaponKind) -> &WeaponStats {
        match kind {
            WeaponKind::Rifle => &self.rifle,
            WeaponKind::Sniper => &self.sniper,
            WeaponKind::Pistol => &self.pistol,
            WeaponKind::Knife => &self.knife,
        }
    }

    pub fn stats_mut(&mut self, kind: WeaponKind) -> &mut WeaponStats {
        match kind {
            WeaponKind::Rifle => &mut self.rifle,
            WeaponKind::Sniper => &mut self.sniper,
            WeaponKind::Pistol => &mut self.pistol,
            WeaponKind::Knife => &mut self.knife,
        }
    }
}

impl Default for WeaponTable {
    fn default() -> Self {
        Self {
            pistol: WeaponStats {
                damage: 20,
                range: 50.0,
                fire_interval_secs: 0.3,
                max_ammo: AmmoCapacity::Limited(12),
            },
            rifle: WeaponStats {
                damage: 25,
                range: 100.0,
                fire_interval_secs: 0.1,
                max_ammo: AmmoCapacity::Limited(30),
            },
            sniper: WeaponStats {
                damage: 100,
                range: 500.0,
                fire_interval_secs: 1.5,
                max_ammo: AmmoCapacity::Limited(5),
            },
            knife: WeaponStats {
                damage: 50,
                range: 2.0,
                fire_interval_secs: 0.5,
                max_ammo: AmmoCapacity::Unlimited,
            },
        }
    }
}

/// Server-authoritative slot + primary selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loadout {
    pub slot: WeaponSlot,
    pub primary: PrimaryVariant,
}

impl Loadout {
    pub fn equipped(&self) -> WeaponKind {
        resolve(self.slot, self.primary)
    }

    /// Returns the newly equipped weapon if the identity changed
    pub fn select_slot(&mut self, slot: WeaponSlot) -> Option<WeaponKind> {
        let before = self.equipped();
        self.slot = slot;
        self.changed_from(before)
    }

    /// Returns the newly equipped weapon if the identity changed
    pub fn select_primary(&mut self, primary: PrimaryVariant) -> Option<WeaponKind> {
        let before = self.equipped();
        self.primary = primary;
        self.changed_from(before)
    }

    fn changed_from(&self, before: WeaponKind) -> Option<WeaponKind> {
        let after = self.equipped();
        (after != before).then_some(after)
    }
}

impl Default for Loadout {
    fn default() -> Self {
        // Everyone spawns holding the sidearm
        Self {
            slot: WeaponSlot::Secondary,
            primary: PrimaryVariant::Rifle,
        }
    }
}

/// Client-local cooldown and ammo gate.
///
/// Only decides whether a shot may be attempted at all; the server never
/// re-validates cadence or ammo.
#[derive(Debug, Clone)]
pub struct FireGate {
    weapon: WeaponKind,
    stats: WeaponStats,
    /// `None` for unlimited weapons
    ammo: Option<u32>,
    next_fire_at: Option<Instant>,
}

impl FireGate {
    pub fn new(weapon: WeaponKind, table: &WeaponTable) -> Self {
        let stats = *table.stats(weapon);
        Self {
            weapon,
            stats,
            ammo: Self::full_magazine(&stats),
            next_fire_at: None,
        }
    }

    /// Switch weapons; the magazine is refilled
    pub fn equip(&mut self, weapon: WeaponKind, table: &WeaponTable) {
        *self = Self::new(weapon, table);
    }

    pub fn weapon(&self) -> WeaponKind {
        self.weapon
    }

    pub fn ammo_remaining(&self) -> Option<u32> {
        self.ammo
    }

    /// Damage to declare in a hit claim for the current weapon
    pub fn damage(&self) -> u32 {
        self.stats.damage
    }

    pub fn try_shoot(&mut self) -> bool {
        self.try_shoot_at(Instant::now())
    }

    pub fn try_shoot_at(&mut self, now: Instant) -> bool {
        if self.next_fire_at.is_some_and(|next| now < next) {
            return false;
        }

        // A cooldown past the clock's range never elapses
        let Some(next) = self
            .stats
            .fire_interval()
            .and_then(|interval| now.checked_add(interval))
        else {
            return false;
        };

        if let Some(ammo) = self.ammo.as_mut() {
            if *ammo == 0 {
                return false;
            }
            *ammo -= 1;
        }

        self.next_fire_at = Some(next);
        true
    }

    fn full_magazine(stats: &WeaponStats) -> Option<u32> {
        match stats.max_ammo {
            AmmoCapacity::Limited(n) => Some(n),
            AmmoCapacity::Unlimited => None,
        }
    }
}
