//! Socket patterns: which direction the poll step may use right now.

use std::str::FromStr;

use serde::Deserialize;

use crate::error::Error;

/// Which end of the connection this socket is. Server binds, client connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

/// Turn-taking discipline of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pattern {
    /// Exclusive pair: both directions open on every poll step.
    Pair,
    /// Request/reply: strict send/receive alternation.
    #[serde(alias = "req_rep", alias = "req-rep")]
    ReqRep,
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(Role::Server),
            "client" => Ok(Role::Client),
            _ => Err(Error::Configuration(format!("unknown role '{s}'"))),
        }
    }
}

impl FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pair" => Ok(Pattern::Pair),
            "reqrep" | "req_rep" | "req-rep" => Ok(Pattern::ReqRep),
            _ => Err(Error::Configuration(format!("unknown pattern '{s}'"))),
        }
    }
}

impl Pattern {
    /// Build the policy for this pattern. The turn-based policy starts from `role`:
    /// a server waits for a request, a client speaks first.
    pub fn policy(self, role: Role) -> Box<dyn SocketPatternPolicy> {
        match self {
            Pattern::Pair => Box::new(FullDuplexPolicy),
            Pattern::ReqRep => Box::new(TurnBasedPolicy::for_role(role)),
        }
    }
}

/// Capability hooks consulted by the poll step.
pub trait SocketPatternPolicy: Send {
    fn can_send(&self) -> bool;
    fn can_recv(&self) -> bool;
    /// Called after the transport accepted a send.
    fn did_send(&mut self);
    /// Called after the transport delivered a receive.
    fn did_recv(&mut self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FullDuplexPolicy;

impl SocketPatternPolicy for FullDuplexPolicy {
    fn can_send(&self) -> bool {
        true
    }

    fn can_recv(&self) -> bool {
        true
    }

    fn did_send(&mut self) {}

    fn did_recv(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    Receiving,
    Sending,
}

/// Strict alternation between one send and one receive.
#[derive(Debug, Clone, Copy)]
pub struct TurnBasedPolicy {
    turn: Turn,
}

impl TurnBasedPolicy {
    pub fn new(turn: Turn) -> Self {
        Self { turn }
    }

    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Server => Self::new(Turn::Receiving),
            Role::Client => Self::new(Turn::Sending),
        }
    }

    pub fn turn(&self) -> Turn {
        self.turn
    }
}

impl SocketPatternPolicy for TurnBasedPolicy {
    fn can_send(&self) -> bool {
        self.turn == Turn::Sending
    }

    fn can_recv(&self) -> bool {
        self.turn == Turn::Receiving
    }

    fn did_send(&mut self) {
        if self.turn == Turn::Sending {
            self.turn = Turn::Receiving;
        }
    }

    fn did_recv(&mut self) {
        if self.turn == Turn::Receiving {
            self.turn = Turn::Sending;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_duplex_always_open() {
        let mut p = FullDuplexPolicy;
        for i in 0..10 {
            if i % 3 == 0 {
                p.did_send();
            } else {
                p.did_recv();
            }
            assert!(p.can_send());
            assert!(p.can_recv());
        }
    }

    #[test]
    fn initial_turn_by_role() {
        assert_eq!(TurnBasedPolicy::for_role(Role::Server).turn(), Turn::Receiving);
        assert_eq!(TurnBasedPolicy::for_role(Role::Client).turn(), Turn::Sending);
    }

    #[test]
    fn turn_based_exactly_one_direction_open() {
        let mut p = TurnBasedPolicy::for_role(Role::Client);
        for _ in 0..5 {
            assert!(p.can_send() ^ p.can_recv());
            assert!(p.can_send());
            p.did_send();
            assert!(p.can_send() ^ p.can_recv());
            assert!(p.can_recv());
            p.did_recv();
        }
    }

    #[test]
    fn out_of_turn_hooks_do_not_flip() {
        let mut p = TurnBasedPolicy::for_role(Role::Server);
        p.did_send();
        assert_eq!(p.turn(), Turn::Receiving);
        p.did_recv();
        assert_eq!(p.turn(), Turn::Sending);
        p.did_recv();
        assert_eq!(p.turn(), Turn::Sending);
    }

    #[test]
    fn parse_names() {
        assert_eq!("Server".parse::<Role>().unwrap(), Role::Server);
        assert_eq!("client".parse::<Role>().unwrap(), Role::Client);
        assert_eq!("req-rep".parse::<Pattern>().unwrap(), Pattern::ReqRep);
        assert_eq!("pair".parse::<Pattern>().unwrap(), Pattern::Pair);
        assert!("dealer".parse::<Pattern>().is_err());
        assert!("peer".parse::<Role>().is_err());
    }

    #[test]
    fn pattern_builds_matching_policy() {
        let server = Pattern::ReqRep.policy(Role::Server);
        assert!(!server.can_send());
        assert!(server.can_recv());
        let client = Pattern::ReqRep.policy(Role::Client);
        assert!(client.can_send());
        assert!(!client.can_recv());
        let pair = Pattern::Pair.policy(Role::Server);
        assert!(pair.can_send() && pair.can_recv());
    }
}
