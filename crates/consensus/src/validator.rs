//! Validator records and the registry that orders them.

use std::collections::HashMap;

use veil_types::{Address, PublicKeyBytes};

use crate::ConsensusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorState {
    Active,
    /// Registered but carrying no stake.
    Waiting,
    Jailed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Validator {
    pub address: Address,
    pub public_key: PublicKeyBytes,
    pub stake: u64,
    pub state: ValidatorState,
    pub last_proposed_height: u64,
    /// Informational only; never consulted by proposer selection.
    pub uptime: f64,
}

impl Validator {
    /// A validator with stake starts `Active`, one without starts `Waiting`.
    pub fn new(address: Address, public_key: PublicKeyBytes, stake: u64) -> Self {
        Self {
            address,
            public_key,
            stake,
            state: if stake > 0 {
                ValidatorState::Active
            } else {
                ValidatorState::Waiting
            },
            last_proposed_height: 0,
            uptime: 1.0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ValidatorState::Active
    }

    /// Add `delta` to the stake, saturating at zero and `u64::MAX`.
    ///
    /// Dropping to zero moves an active validator to `Waiting`; regaining
    /// stake moves a waiting one back. A jailed validator stays jailed.
    pub fn update_stake(&mut self, delta: i64) {
        self.stake = if delta >= 0 {
            self.stake.saturating_add(delta.unsigned_abs())
        } else {
            self.stake.saturating_sub(delta.unsigned_abs())
        };

        self.state = match (self.state, self.stake) {
            (ValidatorState::Jailed, _) => ValidatorState::Jailed,
            (_, 0) => ValidatorState::Waiting,
            _ => ValidatorState::Active,
        };
    }

    pub fn jail(&mut self) {
        self.state = ValidatorState::Jailed;
    }
}

/// Validators in registration order, indexed by address.
///
/// Registration order is what proposer rotation walks over, so it is never
/// reshuffled.
#[derive(Debug, Clone, Default)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
    index: HashMap<Address, usize>,
}

impl ValidatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, validator: Validator) -> Result<(), ConsensusError> {
        if self.index.contains_key(&validator.address) {
            return Err(ConsensusError::DuplicateValidator);
        }
        self.index.insert(validator.address, self.validators.len());
        self.validators.push(validator);
        Ok(())
    }

    pub fn get(&self, address: &Address) -> Option<&Validator> {
        self.index.get(address).map(|&i| &self.validators[i])
    }

    pub fn get_mut(&mut self, address: &Address) -> Option<&mut Validator> {
        self.index.get(address).map(|&i| &mut self.validators[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Validator> {
        self.validators.iter()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Active validators with their stake, in registration order.
    pub fn active_snapshot(&self) -> Vec<(Address, u64)> {
        self.validators
            .iter()
            .filter(|v| v.is_active())
            .map(|v| (v.address, v.stake))
            .collect()
    }
}
