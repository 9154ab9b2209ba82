//! Coordinator ⇄ worker frame pipeline payloads.
//!
//! # Wire Protocol
//!
//! ```text
//! Worker      ──[Hello]──────────────────────────► Coordinator
//!
//! Coordinator ──[StartInit / FinishInit / Exit]──► every worker
//! Worker      ──[*Reply {result, error}]─────────► Coordinator   (same request id)
//!
//! Coordinator ──[StartFrame]─────────────────────► every worker
//! Worker      ──[StartFrameReply]────────────────► Coordinator
//! Worker      ──[FrameReleased]──────────────────► Coordinator   (inputs consumed)
//! Worker      ──[FinishFrameReply]───────────────► Coordinator   (frame rendered)
//!
//! Coordinator ──[ObjectDelta]────────────────────► every worker
//! Worker      ──[Event]──────────────────────────► Coordinator
//! ```

use serde::{Deserialize, Serialize};

use crate::message::CommandType;
use crate::protocol::Payload;

/// First packet a worker sends once its link is up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub name: String,
    pub version: u16,
}

impl Payload for Hello {
    const COMMAND: CommandType = CommandType::Hello;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartInit {
    pub init_id: u32,
    pub latency: u32,
}

impl Payload for StartInit {
    const COMMAND: CommandType = CommandType::StartInit;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartInitReply {
    pub result: bool,
    pub error: Option<String>,
}

impl Payload for StartInitReply {
    const COMMAND: CommandType = CommandType::StartInitReply;
}

/// Completes initialisation and publishes the head object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishInit {
    pub head_id: u32,
    /// Full instance data of the head object.
    pub head: Vec<u8>,
}

impl Payload for FinishInit {
    const COMMAND: CommandType = CommandType::FinishInit;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishInitReply {
    pub result: bool,
    pub error: Option<String>,
}

impl Payload for FinishInitReply {
    const COMMAND: CommandType = CommandType::FinishInitReply;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exit;

impl Payload for Exit {
    const COMMAND: CommandType = CommandType::Exit;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitReply {
    pub result: bool,
    pub error: Option<String>,
}

impl Payload for ExitReply {
    const COMMAND: CommandType = CommandType::ExitReply;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartFrame {
    pub frame_number: u32,
    /// Application-chosen tag passed through to the renderers.
    pub frame_id: u32,
    pub data: Vec<u8>,
}

impl Payload for StartFrame {
    const COMMAND: CommandType = CommandType::StartFrame;
}

/// Echoes the frame number so the coordinator can check its bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartFrameReply {
    pub frame_number: u32,
}

impl Payload for StartFrameReply {
    const COMMAND: CommandType = CommandType::StartFrameReply;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishFrame {
    pub frame_number: u32,
}

impl Payload for FinishFrame {
    const COMMAND: CommandType = CommandType::FinishFrame;
}

/// Highest frame the worker has completely rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishFrameReply {
    pub frame_number: u32,
}

impl Payload for FinishFrameReply {
    const COMMAND: CommandType = CommandType::FinishFrameReply;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishAllFrames {
    pub frame_number: u32,
}

impl Payload for FinishAllFrames {
    const COMMAND: CommandType = CommandType::FinishAllFrames;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishAllFramesReply {
    pub frame_number: u32,
}

impl Payload for FinishAllFramesReply {
    const COMMAND: CommandType = CommandType::FinishAllFramesReply;
}

/// The worker no longer needs the inputs of this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameReleased {
    pub frame_number: u32,
}

impl Payload for FrameReleased {
    const COMMAND: CommandType = CommandType::FrameReleased;
}

/// Changed fields of a distributed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDelta {
    pub object_id: u32,
    /// Raw `DirtyBits` describing which fields `data` carries.
    pub dirty: u64,
    pub data: Vec<u8>,
}

impl Payload for ObjectDelta {
    const COMMAND: CommandType = CommandType::ObjectDelta;
}
