//! The closed opcode inventory recognised by the core.
//!
//! Classification only looks at `payload[0]`; the rest of the payload stays
//! opaque bytes for forwarding.

/// A recognised SSH agent protocol opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    SshAgentcRequestRsaIdentities = 1,
    SshAgentRsaIdentitiesAnswer = 2,
    SshAgentcRsaChallenge = 3,
    SshAgentRsaResponse = 4,
    SshAgentFailure = 5,
    SshAgentSuccess = 6,
    SshAgentcAddRsaIdentity = 7,
    SshAgentcRemoveRsaIdentity = 8,
    SshAgentcRemoveAllRsaIdentities = 9,
    Ssh2AgentcRequestIdentities = 11,
    Ssh2AgentIdentitiesAnswer = 12,
    Ssh2AgentcSignRequest = 13,
    Ssh2AgentSignResponse = 14,
    Ssh2AgentcAddIdentity = 17,
    Ssh2AgentcRemoveIdentity = 18,
    Ssh2AgentcRemoveAllIdentities = 19,
    SshAgentcAddSmartcardKey = 20,
    SshAgentcRemoveSmartcardKey = 21,
    SshAgentcLock = 22,
    SshAgentcUnlock = 23,
    SshAgentcAddRsaIdConstrained = 24,
    Ssh2AgentcAddIdConstrained = 25,
    SshAgentcAddSmartcardKeyConstrained = 26,
}

impl Opcode {
    /// Classify a raw opcode byte. Returns `None` for anything outside the
    /// closed inventory — the caller turns that into `MessageInvalid`.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Self::SshAgentcRequestRsaIdentities,
            2 => Self::SshAgentRsaIdentitiesAnswer,
            3 => Self::SshAgentcRsaChallenge,
            4 => Self::SshAgentRsaResponse,
            5 => Self::SshAgentFailure,
            6 => Self::SshAgentSuccess,
            7 => Self::SshAgentcAddRsaIdentity,
            8 => Self::SshAgentcRemoveRsaIdentity,
            9 => Self::SshAgentcRemoveAllRsaIdentities,
            11 => Self::Ssh2AgentcRequestIdentities,
            12 => Self::Ssh2AgentIdentitiesAnswer,
            13 => Self::Ssh2AgentcSignRequest,
            14 => Self::Ssh2AgentSignResponse,
            17 => Self::Ssh2AgentcAddIdentity,
            18 => Self::Ssh2AgentcRemoveIdentity,
            19 => Self::Ssh2AgentcRemoveAllIdentities,
            20 => Self::SshAgentcAddSmartcardKey,
            21 => Self::SshAgentcRemoveSmartcardKey,
            22 => Self::SshAgentcLock,
            23 => Self::SshAgentcUnlock,
            24 => Self::SshAgentcAddRsaIdConstrained,
            25 => Self::Ssh2AgentcAddIdConstrained,
            26 => Self::SshAgentcAddSmartcardKeyConstrained,
            _ => return None,
        })
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_recognised_bytes() {
        for byte in [
            1, 2, 3, 4, 5, 6, 7, 8, 9, 11, 12, 13, 14, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26,
        ] {
            let op = Opcode::from_byte(byte).expect("byte should be recognised");
            assert_eq!(op.as_byte(), byte);
        }
    }

    #[test]
    fn rejects_unrecognised_bytes() {
        for byte in [0u8, 10, 15, 16, 27, 100, 127, 255] {
            assert!(Opcode::from_byte(byte).is_none(), "byte {byte} should be unrecognised");
        }
    }
}
