use bytemuck::{Pod, Zeroable};
use solana_program::pubkey::Pubkey;

/// Insurance policy record — one per `insure()` call.
///
/// Fixed layout so a pool's policy book can be persisted as an array of
/// records. `status` holds a `PolicyStatus` discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Policy {
    /// Sequential id within the pool
    pub id: u64,

    /// Insured amount (locked capacity)
    pub amount: u64,

    /// Upper bound on any payout for this policy
    pub payout_max: u64,

    /// Premium paid at purchase (gross, before protocol fee)
    pub premium: u64,

    /// Coverage start (unix seconds)
    pub start_time: i64,

    /// Coverage end (unix seconds)
    pub end_time: i64,

    /// Current beneficiary
    pub insured: [u8; 32],

    /// Opaque target identifier supplied by the buyer
    pub target: [u8; 32],

    /// PolicyStatus discriminant
    pub status: u8,

    /// Padding for alignment
    pub _padding: [u8; 7],
}

pub const POLICY_SIZE: usize = core::mem::size_of::<Policy>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PolicyStatus {
    Active = 1,
    Redeemed = 2,
    Unlocked = 3,
}

/// Lazily derived view of a policy at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyState {
    Active,
    /// Expired and past the unlock grace period, still holding capacity
    Unlockable,
    Redeemed,
    Unlocked,
}

impl Policy {
    pub fn insured_pubkey(&self) -> Pubkey {
        Pubkey::new_from_array(self.insured)
    }

    pub fn status(&self) -> PolicyStatus {
        match self.status {
            2 => PolicyStatus::Redeemed,
            3 => PolicyStatus::Unlocked,
            _ => PolicyStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status() == PolicyStatus::Active
    }

    /// Whether the coverage window contains `incident_timestamp` (inclusive).
    pub fn covers(&self, incident_timestamp: i64) -> bool {
        self.start_time <= incident_timestamp && incident_timestamp <= self.end_time
    }

    pub fn state(&self, now: i64, unlock_grace_period: i64) -> PolicyState {
        match self.status() {
            PolicyStatus::Redeemed => PolicyState::Redeemed,
            PolicyStatus::Unlocked => PolicyState::Unlocked,
            PolicyStatus::Active => {
                if now > self.end_time.saturating_add(unlock_grace_period) {
                    PolicyState::Unlockable
                } else {
                    PolicyState::Active
                }
            }
        }
    }
}

/// Pending withdrawal for one LP share holder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct WithdrawalRequest {
    /// When the request was made (lockup counts from here)
    pub timestamp: i64,

    /// Shares still withdrawable under this request
    pub amount: u64,
}

pub const WITHDRAWAL_REQUEST_SIZE: usize = core::mem::size_of::<WithdrawalRequest>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Nothing requested (or fully consumed)
    Empty,
    /// Inside the lockup
    Pending,
    /// Inside `[timestamp + lockup, timestamp + lockup + window]`
    Executable,
    /// Window closed; a new request is needed
    Expired,
}

impl WithdrawalRequest {
    pub fn new(timestamp: i64, amount: u64) -> Self {
        Self { timestamp, amount }
    }

    pub fn state(&self, now: i64, lockup: i64, withdrawable_duration: i64) -> RequestState {
        if self.amount == 0 {
            return RequestState::Empty;
        }
        let opens = self.timestamp.saturating_add(lockup);
        let closes = opens.saturating_add(withdrawable_duration);
        if now < opens {
            RequestState::Pending
        } else if now <= closes {
            RequestState::Executable
        } else {
            RequestState::Expired
        }
    }
}

/// Index-side allocation record for one constituent pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct AllocationRecord {
    /// Pool market id
    pub pool: u32,

    /// Padding for alignment
    pub _padding: [u8; 4],

    /// Configured weight
    pub allocation_points: u64,

    /// Credit currently pushed into the pool
    pub allocated_credit: u64,
}

pub const ALLOCATION_RECORD_SIZE: usize = core::mem::size_of::<AllocationRecord>();

/// Pool-side view of the credit one index supplies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct CreditLine {
    /// Index market id
    pub index: u32,

    /// Padding for alignment
    pub _padding: [u8; 4],

    /// Credit (capacity) granted by the index
    pub credit: u64,

    /// Accumulator snapshot: rewards already accounted for this credit
    pub reward_debt: u64,
}

pub const CREDIT_LINE_SIZE: usize = core::mem::size_of::<CreditLine>();

/// Derive a market's address.
/// Seeds: [b"market", kind_seed, id_le]
pub fn derive_market_address(program_id: &Pubkey, kind_seed: &[u8], id: u32) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[b"market", kind_seed, &id.to_le_bytes()], program_id)
}

/// Derive the vault's custody address.
pub fn derive_vault_address(program_id: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[b"vault"], program_id)
}
