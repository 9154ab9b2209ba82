//! Per-node lifecycle payloads.

use serde::{Deserialize, Serialize};

use crate::message::CommandType;
use crate::node::NodeId;
use crate::protocol::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInit {
    pub node_id: NodeId,
    pub init_id: u32,
}

impl Payload for NodeInit {
    const COMMAND: CommandType = CommandType::NodeInit;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInitReply {
    pub node_id: NodeId,
    pub result: bool,
    pub error: Option<String>,
}

impl Payload for NodeInitReply {
    const COMMAND: CommandType = CommandType::NodeInitReply;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeExit {
    pub node_id: NodeId,
}

impl Payload for NodeExit {
    const COMMAND: CommandType = CommandType::NodeExit;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeExitReply {
    pub node_id: NodeId,
    pub result: bool,
}

impl Payload for NodeExitReply {
    const COMMAND: CommandType = CommandType::NodeExitReply;
}

/// Terminate the worker process serving this node. Never answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStop {
    pub node_id: NodeId,
}

impl Payload for NodeStop {
    const COMMAND: CommandType = CommandType::NodeStop;
}
