use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::types::Address;

/// A permissioned block producer. Loaded from genesis config, adjusted by
/// stake/unstake operations, persisted under `consensus/validators`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    pub address: Address,
    #[serde(with = "codec::b64")]
    pub public_key: Vec<u8>,
    pub voting_power: u64,
    pub active: bool,
}

impl Validator {
    pub fn is_active(&self) -> bool {
        self.active && self.voting_power > 0
    }
}

/// Address-keyed validator map with the aggregate voting power cached.
/// The BTreeMap keeps iteration address-sorted, which proposer rotation
/// depends on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: BTreeMap<Address, Validator>,
    total_voting_power: u64,
}

impl ValidatorSet {
    pub fn new(validators: Vec<Validator>) -> Self {
        let mut set = Self::default();
        for v in validators {
            set.upsert(v);
        }
        set
    }

    pub fn upsert(&mut self, validator: Validator) {
        self.validators.insert(validator.address, validator);
        self.recompute_total();
    }

    pub fn remove(&mut self, address: &Address) {
        self.validators.remove(address);
        self.recompute_total();
    }

    pub fn get(&self, address: &Address) -> Option<&Validator> {
        self.validators.get(address)
    }

    pub fn is_active(&self, address: &Address) -> bool {
        self.get(address).map(Validator::is_active).unwrap_or(false)
    }

    pub fn voting_power(&self, address: &Address) -> u64 {
        self.get(address)
            .filter(|v| v.is_active())
            .map(|v| v.voting_power)
            .unwrap_or(0)
    }

    /// Active validators in address order.
    pub fn active(&self) -> Vec<&Validator> {
        self.validators.values().filter(|v| v.is_active()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.validators.values().filter(|v| v.is_active()).count()
    }

    /// Aggregate power of active validators.
    pub fn total_voting_power(&self) -> u64 {
        self.total_voting_power
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Adds `delta` voting power to the validator at `address`, if present.
    /// Used by stake outputs at block commit.
    pub fn add_power(&mut self, address: &Address, delta: u64) {
        if let Some(v) = self.validators.get_mut(address) {
            v.voting_power = v.voting_power.saturating_add(delta);
        }
        self.recompute_total();
    }

    /// Removes `delta` voting power; a validator drained to zero stops
    /// counting as active.
    pub fn sub_power(&mut self, address: &Address, delta: u64) {
        if let Some(v) = self.validators.get_mut(address) {
            v.voting_power = v.voting_power.saturating_sub(delta);
        }
        self.recompute_total();
    }

    fn recompute_total(&mut self) {
        self.total_voting_power = self
            .validators
            .values()
            .filter(|v| v.is_active())
            .map(|v| v.voting_power)
            .sum();
    }
}

/// Deterministic round-robin rotation: validators sorted by address,
/// `index = (height + round) mod active_count`. Round advancement on
/// timeout therefore hands the slot to the next validator.
pub fn select_proposer(set: &ValidatorSet, height: u64, round: u32) -> Option<Address> {
    let active = set.active();
    if active.is_empty() {
        return None;
    }
    let index = ((height + round as u64) % active.len() as u64) as usize;
    Some(active[index].address)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(tag: u8, power: u64, active: bool) -> Validator {
        Validator {
            address: Address([tag; 20]),
            public_key: vec![tag],
            voting_power: power,
            active,
        }
    }

    fn set_of_four() -> ValidatorSet {
        ValidatorSet::new(vec![
            validator(4, 10, true),
            validator(1, 10, true),
            validator(3, 10, true),
            validator(2, 10, true),
        ])
    }

    #[test]
    fn total_counts_only_active_power() {
        let mut set = set_of_four();
        assert_eq!(set.total_voting_power(), 40);
        set.upsert(validator(5, 100, false));
        assert_eq!(set.total_voting_power(), 40);
        assert_eq!(set.active_count(), 4);
    }

    #[test]
    fn proposer_rotation_is_address_sorted() {
        let set = set_of_four();
        // Height 1, round 0 -> index 1 of the address-sorted actives.
        assert_eq!(select_proposer(&set, 1, 0), Some(Address([2u8; 20])));
        // Round advancement moves to the next validator.
        assert_eq!(select_proposer(&set, 1, 1), Some(Address([3u8; 20])));
        assert_eq!(select_proposer(&set, 1, 3), Some(Address([1u8; 20])));
    }

    #[test]
    fn proposer_none_without_active_validators() {
        let set = ValidatorSet::new(vec![validator(1, 0, true), validator(2, 5, false)]);
        assert_eq!(select_proposer(&set, 1, 0), None);
    }

    #[test]
    fn stake_power_adjustments() {
        let mut set = set_of_four();
        let addr = Address([1u8; 20]);
        set.add_power(&addr, 5);
        assert_eq!(set.voting_power(&addr), 15);
        assert_eq!(set.total_voting_power(), 45);
        set.sub_power(&addr, 15);
        assert_eq!(set.voting_power(&addr), 0);
        assert_eq!(set.active_count(), 3);
    }
}
