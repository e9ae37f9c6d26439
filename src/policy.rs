//! The policy engine (C3): a pure function from a client message to an
//! [`Action`], plus the [`Responder`] values actions produce.
//!
//! The engine is intentionally not a trait object hierarchy — there are
//! exactly six actions and two responder shapes, all known up front, so a
//! tagged enum and a `match` is simpler than runtime polymorphism.

use crate::proto::message::{empty_rsa_identities_answer, generic_failure};
use crate::proto::{AgentMessage, Opcode};

/// Describes how one pending reply to the client will eventually be
/// produced. Single-shot: executing a responder consumes it.
#[derive(Debug, Clone)]
pub enum Responder {
    /// A fully-formed message, ready to send without waiting on upstream.
    Fixed(AgentMessage),
    /// Consumes the next upstream reply when executed. `Plain` forwards it
    /// verbatim; `FilterIdentities` passes it through the identity filter
    /// hook first (the extension point for `SSH2_AGENTC_REQUEST_IDENTITIES`).
    Upstream(UpstreamKind),
}

/// Distinguishes the two `Upstream` responder shapes so the pipeline knows
/// whether to run the filter hook on the paired reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamKind {
    /// Forward the paired upstream reply to the client unmodified.
    Plain,
    /// Run the paired upstream reply through the identity filter hook
    /// before forwarding.
    FilterIdentities,
}

/// The policy engine's per-message decision.
///
/// Executing an action has two effects: an optional verbatim write to the
/// upstream writer, and an optional responder pushed onto `pending`. Both
/// effects are derived purely from the message's opcode — the engine holds
/// no state.
#[derive(Debug, Clone)]
pub enum Action {
    /// `SSH_AGENTC_REQUEST_RSA_IDENTITIES` → pretend no SSH1 keys exist.
    SynthEmptyRsaIdentities,
    /// `SSH2_AGENTC_REQUEST_IDENTITIES` → forward, filter the reply.
    FilterIdentities(AgentMessage),
    /// `SSH2_AGENTC_SIGN_REQUEST` → forward, reply verbatim (extension
    /// point for a future interactive confirmation prompt).
    CheckSign(AgentMessage),
    /// `SSH_AGENT_FAILURE` / `SSH_AGENT_SUCCESS` from a client → discard.
    /// Clients MUST NOT send these.
    Drop,
    /// Key-management opcodes → forward verbatim, reply verbatim.
    ProxyVerbatim(AgentMessage),
    /// Any other recognised opcode → synthesise a generic failure.
    SynthFailure,
}

impl Action {
    /// Classify a client message into the action that governs it.
    ///
    /// Pure function of the message's opcode.
    pub fn classify(message: &AgentMessage) -> Self {
        match message.opcode() {
            Opcode::SshAgentcRequestRsaIdentities => Self::SynthEmptyRsaIdentities,
            Opcode::Ssh2AgentcRequestIdentities => Self::FilterIdentities(message.clone()),
            Opcode::Ssh2AgentcSignRequest => Self::CheckSign(message.clone()),
            Opcode::SshAgentFailure | Opcode::SshAgentSuccess => Self::Drop,
            Opcode::Ssh2AgentcAddIdentity
            | Opcode::Ssh2AgentcRemoveIdentity
            | Opcode::Ssh2AgentcRemoveAllIdentities
            | Opcode::Ssh2AgentcAddIdConstrained => Self::ProxyVerbatim(message.clone()),
            // SSH1 challenge/response, RSA key management, smartcard,
            // lock/unlock and any other recognised-but-unhandled opcode.
            _ => Self::SynthFailure,
        }
    }

    /// The message this action forwards upstream verbatim, if any.
    pub fn upstream_write(&self) -> Option<&AgentMessage> {
        match self {
            Self::FilterIdentities(m) | Self::CheckSign(m) | Self::ProxyVerbatim(m) => Some(m),
            Self::SynthEmptyRsaIdentities | Self::Drop | Self::SynthFailure => None,
        }
    }

    /// The responder this action yields, if any.
    pub fn responder(&self) -> Option<Responder> {
        match self {
            Self::SynthEmptyRsaIdentities => {
                Some(Responder::Fixed(empty_rsa_identities_answer()))
            }
            Self::FilterIdentities(_) => Some(Responder::Upstream(UpstreamKind::FilterIdentities)),
            Self::CheckSign(_) | Self::ProxyVerbatim(_) => {
                Some(Responder::Upstream(UpstreamKind::Plain))
            }
            Self::Drop => None,
            Self::SynthFailure => Some(Responder::Fixed(generic_failure())),
        }
    }
}
