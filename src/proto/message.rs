//! Synthetic message builders and the `SSH2_AGENT_IDENTITIES_ANSWER` body
//! layout needed by the identity filter hook.

use crate::proto::frame::AgentMessage;
use crate::proto::opcode::Opcode;

/// Build the synthetic "no SSH1 identities" reply: opcode 2, body `u32be 0`.
pub fn empty_rsa_identities_answer() -> AgentMessage {
    AgentMessage::new(Opcode::SshAgentRsaIdentitiesAnswer, &0u32.to_be_bytes())
}

/// Build the synthetic generic failure reply: opcode 5, no body.
pub fn generic_failure() -> AgentMessage {
    AgentMessage::new(Opcode::SshAgentFailure, &[])
}

/// One entry in an `SSH2_AGENT_IDENTITIES_ANSWER` body: a key blob and its
/// comment, each length-prefixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityEntry {
    pub blob: Vec<u8>,
    pub comment: Vec<u8>,
}

/// A parsed `SSH2_AGENT_IDENTITIES_ANSWER` body: `u32be num_keys` followed
/// by that many `(blob, comment)` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdentitiesAnswer {
    pub entries: Vec<IdentityEntry>,
}

impl IdentitiesAnswer {
    /// Parse the body of an `SSH2_AGENT_IDENTITIES_ANSWER` message.
    ///
    /// Returns `None` if the body is malformed (too short, or length
    /// prefixes run past the end of the body) — callers should fall back to
    /// forwarding the reply unfiltered rather than tearing the connection
    /// down, since this is a reply *from* the trusted upstream agent, not
    /// untrusted client input.
    pub fn parse(body: &[u8]) -> Option<Self> {
        if body.len() < 4 {
            return None;
        }
        let num_keys = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
        let mut rest = &body[4..];
        let mut entries = Vec::with_capacity(num_keys);
        for _ in 0..num_keys {
            let (blob, next) = take_length_prefixed(rest)?;
            rest = next;
            let (comment, next) = take_length_prefixed(rest)?;
            rest = next;
            entries.push(IdentityEntry {
                blob: blob.to_vec(),
                comment: comment.to_vec(),
            });
        }
        Some(Self { entries })
    }

    /// Reconstruct the wire body, recomputing `num_keys` from
    /// `self.entries.len()` — a filter hook that drops entries must not
    /// leave the old count in place.
    pub fn to_body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for entry in &self.entries {
            body.extend_from_slice(&(entry.blob.len() as u32).to_be_bytes());
            body.extend_from_slice(&entry.blob);
            body.extend_from_slice(&(entry.comment.len() as u32).to_be_bytes());
            body.extend_from_slice(&entry.comment);
        }
        body
    }

    /// Re-encode this answer as a full agent message.
    pub fn to_message(&self) -> AgentMessage {
        AgentMessage::new(Opcode::Ssh2AgentIdentitiesAnswer, &self.to_body())
    }
}

fn take_length_prefixed(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    if bytes.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let rest = &bytes[4..];
    if rest.len() < len {
        return None;
    }
    Some((&rest[..len], &rest[len..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_rsa_identities_answer_has_expected_bytes() {
        let msg = empty_rsa_identities_answer();
        assert_eq!(msg.payload(), &[2, 0, 0, 0, 0]);
    }

    #[test]
    fn generic_failure_has_expected_bytes() {
        let msg = generic_failure();
        assert_eq!(msg.payload(), &[5]);
    }

    #[test]
    fn identities_answer_round_trips() {
        let answer = IdentitiesAnswer {
            entries: vec![
                IdentityEntry { blob: b"key-one".to_vec(), comment: b"alice@host".to_vec() },
                IdentityEntry { blob: b"key-two".to_vec(), comment: b"".to_vec() },
            ],
        };
        let body = answer.to_body();
        let parsed = IdentitiesAnswer::parse(&body).unwrap();
        assert_eq!(parsed, answer);
    }

    #[test]
    fn identities_answer_with_zero_keys() {
        let answer = IdentitiesAnswer::default();
        let body = answer.to_body();
        assert_eq!(body, 0u32.to_be_bytes());
        assert_eq!(IdentitiesAnswer::parse(&body).unwrap(), answer);
    }

    #[test]
    fn filtering_recomputes_num_keys() {
        let answer = IdentitiesAnswer {
            entries: vec![
                IdentityEntry { blob: b"a".to_vec(), comment: b"one".to_vec() },
                IdentityEntry { blob: b"b".to_vec(), comment: b"two".to_vec() },
            ],
        };
        let filtered = IdentitiesAnswer { entries: answer.entries[..1].to_vec() };
        let body = filtered.to_body();
        let num_keys = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        assert_eq!(num_keys, 1);
    }

    #[test]
    fn parse_rejects_truncated_body() {
        let body = [0, 0, 0, 1]; // claims one key, provides none
        assert!(IdentitiesAnswer::parse(&body).is_none());
    }
}
