//! Result taxonomy shared by every diagnostic.
//!
//! Codes are chosen with a minimum pairwise Hamming distance of four, so a
//! single (or double, or triple) flipped bit in a persisted verdict never
//! yields another valid verdict.

use platform::{NvmError, PersistentCode};

/// Outcome of one diagnostic call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Verdict {
    /// No fault found.
    Pass = 0x81,
    /// The hardware under test misbehaved.
    Fail = 0x42,
    /// Caller precondition violated; a configuration or programming error.
    InvalidArgument = 0x24,
    /// No synchronous verdict; fetch it from persisted storage later.
    Undefined = 0x7E,
    /// A non-volatile erase/write failed or did not verify.
    NonVolatileStoreError = 0xBD,
}

impl Verdict {
    /// Every verdict, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Pass,
        Self::Fail,
        Self::InvalidArgument,
        Self::Undefined,
        Self::NonVolatileStoreError,
    ];

    /// Raw code.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decode a raw code; `None` for anything that is not exactly one of the
    /// five codes.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x81 => Some(Self::Pass),
            0x42 => Some(Self::Fail),
            0x24 => Some(Self::InvalidArgument),
            0x7E => Some(Self::Undefined),
            0xBD => Some(Self::NonVolatileStoreError),
            _ => None,
        }
    }

    /// `true` only for [`Verdict::Pass`].
    pub const fn is_pass(self) -> bool {
        matches!(self, Self::Pass)
    }

    /// Short name for log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::InvalidArgument => "invalid-argument",
            Self::Undefined => "undefined",
            Self::NonVolatileStoreError => "nvm-store-error",
        }
    }
}

impl core::fmt::Display for Verdict {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<NvmError> for Verdict {
    fn from(_: NvmError) -> Self {
        Self::NonVolatileStoreError
    }
}

impl PersistentCode for Verdict {
    type Raw = u8;

    fn encode(self) -> u8 {
        self.code()
    }

    fn decode(raw: u8) -> Option<Self> {
        Self::from_code(raw)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;
    use platform::Duplicated;

    #[test]
    fn codes_are_at_least_four_bits_apart() {
        for (i, a) in Verdict::ALL.iter().enumerate() {
            for b in &Verdict::ALL[i + 1..] {
                let distance = (a.code() ^ b.code()).count_ones();
                assert!(
                    distance >= 4,
                    "{} vs {} differ in {} bits",
                    a.as_str(),
                    b.as_str(),
                    distance
                );
            }
        }
    }

    #[test]
    fn every_code_round_trips() {
        for v in Verdict::ALL {
            assert_eq!(Verdict::from_code(v.code()), Some(v));
        }
    }

    #[test]
    fn single_bit_flip_never_decodes() {
        for v in Verdict::ALL {
            for bit in 0..8 {
                assert_eq!(Verdict::from_code(v.code() ^ (1 << bit)), None);
            }
        }
    }

    #[test]
    fn nvm_errors_map_to_store_error() {
        let v: Verdict = NvmError::Controller { addr: 0x1400 }.into();
        assert_eq!(v, Verdict::NonVolatileStoreError);
    }

    #[test]
    fn duplicated_verdict_rejects_corruption() {
        let mut cell = Duplicated::new(Verdict::Pass);
        assert_eq!(cell.read(), Some(Verdict::Pass));
        cell.corrupt_value(0x01);
        assert_eq!(cell.read(), None);
        assert_eq!(cell.read_or_commit(Verdict::Fail), Verdict::Fail);
    }
}
