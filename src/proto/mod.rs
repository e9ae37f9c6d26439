//! Agent-protocol wire format: framing (C1), opcode classification (C2),
//! and the message bodies the policy layer needs to build or inspect.
//!
//! # Wire Protocol
//!
//! `[u32 BE length][payload: length bytes]`, `payload[0]` is the opcode.
//! See [`frame`] for the codec and [`opcode`] for the closed opcode
//! inventory.

pub mod frame;
pub mod message;
pub mod opcode;

pub use frame::AgentMessage;
pub use opcode::Opcode;
