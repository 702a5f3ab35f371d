// Wire Protocol
//
// Line-oriented message codec for the membership protocol. A message is a
// type line followed by zero or more member lines:
//
//   <type>\n
//   <id> <address> <pings_dropped>\n
//   ...
//
// Everything fits in one UDP datagram; the port field never travels because
// the cluster runs a uniform port.

use crate::error::{Result, RingError};
use crate::membership::Member;

/// Message kinds, with their on-wire discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Join = 1,
    JoinAck = 2,
    Introduce = 3,
    Ping = 4,
    Ack = 5,
    Leave = 6,
}

impl MessageType {
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(MessageType::Join),
            2 => Some(MessageType::JoinAck),
            3 => Some(MessageType::Introduce),
            4 => Some(MessageType::Ping),
            5 => Some(MessageType::Ack),
            6 => Some(MessageType::Leave),
            _ => None,
        }
    }

    pub fn as_wire(self) -> u32 {
        self as u32
    }
}

/// One protocol message: a kind plus its member payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageType,
    pub members: Vec<Member>,
}

impl Message {
    pub fn new(kind: MessageType, members: Vec<Member>) -> Self {
        Self { kind, members }
    }

    /// Serializes to the line-oriented wire form.
    pub fn encode(&self) -> String {
        let mut out = format!("{}\n", self.kind.as_wire());
        for member in &self.members {
            out.push_str(&format!(
                "{} {} {}\n",
                member.id, member.address, member.pings_dropped
            ));
        }
        out
    }

    /// Parses the wire form. `default_port` is the receiver's own listening
    /// port, stamped onto every decoded member.
    pub fn decode(input: &str, default_port: u16) -> Result<Message> {
        let mut lines = input.lines();

        let type_line = lines
            .next()
            .ok_or_else(|| RingError::MalformedMessage("empty payload".to_string()))?;
        let type_number: u32 = type_line.trim().parse().map_err(|_| {
            RingError::MalformedMessage(format!("type line is not an integer: {:?}", type_line))
        })?;
        let kind =
            MessageType::from_wire(type_number).ok_or(RingError::UnknownType(type_number))?;

        let mut members = Vec::new();
        for line in lines {
            let tokens: Vec<&str> = line.split(' ').collect();
            if tokens.len() != 3 || tokens.iter().any(|t| t.is_empty()) {
                return Err(RingError::MalformedMessage(format!(
                    "member line must have three tokens: {:?}",
                    line
                )));
            }
            let pings_dropped: u32 = tokens[2].parse().map_err(|_| {
                RingError::MalformedMessage(format!("bad drop counter: {:?}", tokens[2]))
            })?;
            members.push(Member {
                id: tokens[0].to_string(),
                address: tokens[1].to_string(),
                pings_dropped,
                port: default_port,
            });
        }

        Ok(Message { kind, members })
    }
}
