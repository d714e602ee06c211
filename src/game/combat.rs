//! Hit arbitration: validates client hit claims and applies damage

use std::collections::BTreeMap;
use std::str::FromStr;

use super::combatant::{CombatantId, CombatantState};
use super::events::StateEvent;
use super::loadout::WeaponTable;

/// How much the server trusts attacker-declared damage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HitPolicy {
    /// Declared damage is applied as-is
    #[default]
    Trusting,
    /// Declared damage may not exceed the attacker's equipped weapon damage
    LoadoutChecked,
}

impl FromStr for HitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trusting" => Ok(Self::Trusting),
            "loadout_checked" => Ok(Self::LoadoutChecked),
            other => Err(format!("unknown hit policy '{}'", other)),
        }
    }
}

/// A client's assertion that it landed a shot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitClaim {
    pub attacker: CombatantId,
    pub target: CombatantId,
    pub declared_damage: u32,
}

/// Why a claim was dropped. Never sent to the requester.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HitRejection {
    #[error("target is not connected")]
    UnknownTarget,

    #[error("target is already dead")]
    TargetDead,

    #[error("attacker is not connected")]
    UnknownAttacker,

    #[error("attacker is dead")]
    AttackerDead,

    #[error("attacker or target has no team")]
    Unassigned,

    #[error("attacker and target are on the same team")]
    FriendlyFire,

    #[error("declared damage {declared} exceeds equipped weapon damage {max}")]
    ImplausibleDamage { declared: u32, max: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct HitArbiter {
    policy: HitPolicy,
}

impl HitArbiter {
    pub fn new(policy: HitPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> HitPolicy {
        self.policy
    }

    /// Check a claim against current roster state without mutating anything
    pub fn validate(
        &self,
        claim: &HitClaim,
        roster: &BTreeMap<CombatantId, CombatantState>,
        weapons: &WeaponTable,
    ) -> Result<(), HitRejection> {
        let target = roster.get(&claim.target).ok_or(HitRejection::UnknownTarget)?;
        if !target.is_alive() {
            return Err(HitRejection::TargetDead);
        }

        let attacker = roster
            .get(&claim.attacker)
            .ok_or(HitRejection::UnknownAttacker)?;
        if !attacker.is_alive() {
            return Err(HitRejection::AttackerDead);
        }

        match (attacker.team(), target.team()) {
            (Some(a), Some(t)) if a == t => return Err(HitRejection::FriendlyFire),
            (Some(_), Some(_)) => {}
            _ => return Err(HitRejection::Unassigned),
        }

        if self.policy == HitPolicy::LoadoutChecked {
            let max = weapons.stats(attacker.loadout().equipped()).damage;
            if claim.declared_damage > max {
                return Err(HitRejection::ImplausibleDamage {
                    declared: claim.declared_damage,
                    max,
                });
            }
        }

        Ok(())
    }

    /// Validate and apply. Returns the events caused by the hit.
    pub fn submit(
        &self,
        claim: HitClaim,
        roster: &mut BTreeMap<CombatantId, CombatantState>,
        weapons: &WeaponTable,
    ) -> Result<Vec<StateEvent>, HitRejection> {
        self.validate(&claim, roster, weapons)?;

        let target = roster
            .get_mut(&claim.target)
            .ok_or(HitRejection::UnknownTarget)?;
        let events = target.apply_damage(claim.declared_damage, Some(claim.attacker));
        let killed = events
            .iter()
            .any(|e| matches!(e, StateEvent::Died { .. }));

        if let Some(attacker) = roster.get_mut(&claim.attacker) {
            attacker.record_hit_dealt(claim.declared_damage, killed);
        }

        Ok(events)
    }
}
