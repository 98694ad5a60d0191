//! Authorization capability injected into the protocol at construction.

use std::collections::BTreeSet;

use solana_program::pubkey::Pubkey;

pub trait Authority {
    fn is_authorized(&self, caller: &Pubkey) -> bool;
}

/// One admin key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleAdmin {
    pub admin: Pubkey,
}

impl Authority for SingleAdmin {
    fn is_authorized(&self, caller: &Pubkey) -> bool {
        *caller == self.admin
    }
}

/// Any member of a fixed set (e.g. operator keys of a role contract).
#[derive(Debug, Clone, Default)]
pub struct AdminSet {
    members: BTreeSet<Pubkey>,
}

impl AdminSet {
    pub fn new<I: IntoIterator<Item = Pubkey>>(members: I) -> Self {
        Self { members: members.into_iter().collect() }
    }
}

impl Authority for AdminSet {
    fn is_authorized(&self, caller: &Pubkey) -> bool {
        self.members.contains(caller)
    }
}
