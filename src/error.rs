use solana_program::program_error::ProgramError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CapitalError {
    /// Caller is not authorized for this admin operation
    Unauthorized = 0,
    /// Zero amount
    ZeroAmount = 1,
    /// Arithmetic overflow
    Overflow = 2,
    /// Market id does not exist or has the wrong kind
    InvalidMarket = 3,
    /// Market is paused — no new deposits or policies
    MarketPaused = 4,
    /// Market is locked by a pending cover claim
    MarketLocked = 5,
    /// Deposit would dilute an orphaned or valueless share supply
    DepositBlocked = 6,
    /// Not enough LP shares
    InsufficientShares = 7,
    /// Withdrawal request missing, pending or expired
    WithdrawalNotReady = 8,
    /// Withdrawal larger than the outstanding request
    WithdrawalExceedsRequest = 9,
    /// Amount exceeds available (unlocked) balance
    InsufficientCapacity = 10,
    /// Insurance span outside [min, max]
    SpanOutOfRange = 11,
    /// Computed premium exceeds caller's max cost
    PremiumExceedsMax = 12,
    /// Token allowance too small for transfer_from
    InsufficientAllowance = 13,
    /// Token balance too small
    InsufficientFunds = 14,
    /// Holder attribution too small
    InsufficientAttribution = 15,
    /// Vault token balance cannot cover the transfer
    InsufficientVaultBalance = 16,
    /// Unknown policy id
    UnknownPolicy = 17,
    /// Policy is not active or does not cover the incident
    PolicyNotActive = 18,
    /// Policy is not in the cover's target list
    PolicyNotTargeted = 19,
    /// No cover claim is open for redemption
    NoApplicableIncident = 20,
    /// Policy cannot be unlocked yet
    UnlockNotReady = 21,
    /// Claim processing for the incident is not finished
    ResumeNotReady = 22,
    /// Payout ratio is zero or above 1
    InvalidPayoutRatio = 23,
    /// Allocation position out of range
    InvalidPosition = 24,
    /// Pool already allocated in another slot
    DuplicatePool = 25,
    /// Allocation list is at max length
    AllocationListFull = 26,
    /// Parameters failed validation
    InvalidParameters = 27,
    /// Unknown premium model id
    UnknownPremiumModel = 28,
    /// Internal accounting invariant broken
    AccountingInvariant = 29,
}

impl From<CapitalError> for ProgramError {
    fn from(e: CapitalError) -> Self {
        ProgramError::Custom(e as u32)
    }
}
