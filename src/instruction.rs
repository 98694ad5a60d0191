use bytemuck::{Pod, Zeroable};
use solana_program::{program_error::ProgramError, pubkey::Pubkey};

use crate::parameters::ParameterUpdate;

/// Fixed payload of `Insure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct InsureArgs {
    pub amount: u64,
    pub max_cost: u64,
    pub span: i64,
    pub target: [u8; 32],
}

pub const INSURE_ARGS_SIZE: usize = core::mem::size_of::<InsureArgs>();

/// Fixed payload of `ApplyCover`; the target list follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct CoverArgs {
    pub grace_period: i64,
    pub payout_numerator: u64,
    pub payout_denominator: u64,
    pub incident_timestamp: i64,
    pub metadata: [u8; 32],
}

pub const COVER_ARGS_SIZE: usize = core::mem::size_of::<CoverArgs>();

/// Instructions of the capital program.
///
/// Wire format: one tag byte, then little-endian fields in declaration order.
/// Market ids are `u32`, booleans one byte, optional fields a `has` byte
/// followed by the value (always present on the wire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapitalInstruction {
    /// Deposit underlying into a pool, index or CDS and receive LP shares.
    Deposit { market: u32, amount: u64 },

    /// Start the lockup for withdrawing `shares`.
    RequestWithdraw { market: u32, shares: u64 },

    /// Burn shares inside the request's window.
    Withdraw { market: u32, shares: u64 },

    /// Move LP shares; the withdrawal lock travels with them.
    TransferShares { market: u32, to: Pubkey, shares: u64 },

    /// Buy cover from a pool.
    Insure { pool: u32, args: InsureArgs },

    /// Claim a policy against the pool's live incident.
    Redeem { pool: u32, policy: u64 },

    /// Release an expired policy (permissionless).
    Unlock { pool: u32, policy: u64 },

    /// Reassign a policy to a new insured.
    TransferPolicy { pool: u32, policy: u64, to: Pubkey },

    /// (admin) Freeze a pool and open redemptions.
    /// Payload: `CoverArgs`, `u16` target count, then that many `u64` policy ids.
    ApplyCover { pool: u32, args: CoverArgs, targets: Vec<u64> },

    /// (admin) Close a finished claim and reopen the pool.
    Resume { pool: u32 },

    /// (admin) Upsert an index allocation slot.
    SetAllocation { index: u32, position: u32, pool: u32, points: u64, additional_slot: bool },

    /// (admin) Change an index's target leverage (1e3 scale).
    SetLeverage { index: u32, leverage: u64 },

    /// (admin)
    SetPaused { market: u32, paused: bool },

    /// Re-run an index's credit allocation (permissionless).
    AdjustAlloc { index: u32 },

    /// (admin) Route a market's unabsorbed losses; `None` sets the default route.
    SetCds { market: Option<u32>, cds: u32 },

    /// (admin) Update the defaults (`market == None`) or one market's parameters.
    UpdateParameters { market: Option<u32>, update: ParameterUpdate },

    /// Repay vault debt booked against a market (permissionless).
    RepayDebt { market: u32, amount: u64 },

    /// (admin) Pay a treasury's fee attribution out.
    CollectFees { treasury: Pubkey, to: Pubkey },
}

/// Little-endian field cursor over an instruction payload.
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ProgramError> {
        if self.data.len() < n {
            return Err(ProgramError::InvalidInstructionData);
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ProgramError> {
        self.take(N)?
            .try_into()
            .map_err(|_| ProgramError::InvalidInstructionData)
    }

    fn u8(&mut self) -> Result<u8, ProgramError> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> Result<bool, ProgramError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ProgramError::InvalidInstructionData),
        }
    }

    fn u16(&mut self) -> Result<u16, ProgramError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, ProgramError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, ProgramError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, ProgramError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn pubkey(&mut self) -> Result<Pubkey, ProgramError> {
        Ok(Pubkey::new_from_array(self.array()?))
    }

    fn pod<T: Pod>(&mut self) -> Result<T, ProgramError> {
        bytemuck::try_pod_read_unaligned(self.take(core::mem::size_of::<T>())?)
            .map_err(|_| ProgramError::InvalidInstructionData)
    }

    /// `has` byte + value; the value bytes are consumed either way.
    fn opt<T>(&mut self, read: impl FnOnce(&mut Self) -> Result<T, ProgramError>) -> Result<Option<T>, ProgramError> {
        let has = self.bool()?;
        let value = read(self)?;
        Ok(if has { Some(value) } else { None })
    }
}

impl CapitalInstruction {
    pub fn unpack(input: &[u8]) -> Result<Self, ProgramError> {
        let (&tag, rest) = input
            .split_first()
            .ok_or(ProgramError::InvalidInstructionData)?;
        let mut r = Reader { data: rest };

        match tag {
            0 => Ok(Self::Deposit { market: r.u32()?, amount: r.u64()? }),
            1 => Ok(Self::RequestWithdraw { market: r.u32()?, shares: r.u64()? }),
            2 => Ok(Self::Withdraw { market: r.u32()?, shares: r.u64()? }),
            3 => Ok(Self::TransferShares { market: r.u32()?, to: r.pubkey()?, shares: r.u64()? }),
            4 => Ok(Self::Insure { pool: r.u32()?, args: r.pod()? }),
            5 => Ok(Self::Redeem { pool: r.u32()?, policy: r.u64()? }),
            6 => Ok(Self::Unlock { pool: r.u32()?, policy: r.u64()? }),
            7 => Ok(Self::TransferPolicy { pool: r.u32()?, policy: r.u64()?, to: r.pubkey()? }),
            8 => {
                let pool = r.u32()?;
                let args = r.pod()?;
                let count = r.u16()?;
                let targets = (0..count).map(|_| r.u64()).collect::<Result<Vec<_>, _>>()?;
                Ok(Self::ApplyCover { pool, args, targets })
            }
            9 => Ok(Self::Resume { pool: r.u32()? }),
            10 => Ok(Self::SetAllocation {
                index: r.u32()?,
                position: r.u32()?,
                pool: r.u32()?,
                points: r.u64()?,
                additional_slot: r.bool()?,
            }),
            11 => Ok(Self::SetLeverage { index: r.u32()?, leverage: r.u64()? }),
            12 => Ok(Self::SetPaused { market: r.u32()?, paused: r.bool()? }),
            13 => Ok(Self::AdjustAlloc { index: r.u32()? }),
            14 => Ok(Self::SetCds { market: r.opt(Reader::u32)?, cds: r.u32()? }),
            15 => {
                let market = r.opt(Reader::u32)?;
                let update = ParameterUpdate {
                    fee_rate: r.opt(Reader::u64)?,
                    unlock_grace_period: r.opt(Reader::i64)?,
                    lockup: r.opt(Reader::i64)?,
                    withdrawable_duration: r.opt(Reader::i64)?,
                    min_insure_span: r.opt(Reader::i64)?,
                    max_insure_span: r.opt(Reader::i64)?,
                    max_list: r.opt(Reader::u32)?,
                    premium_model: r.opt(Reader::u32)?,
                    treasury: r.opt(Reader::pubkey)?,
                };
                Ok(Self::UpdateParameters { market, update })
            }
            16 => Ok(Self::RepayDebt { market: r.u32()?, amount: r.u64()? }),
            17 => Ok(Self::CollectFees { treasury: r.pubkey()?, to: r.pubkey()? }),
            _ => Err(ProgramError::InvalidInstructionData),
        }
    }
}
