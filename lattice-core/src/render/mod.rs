//! Render-side extension points used by the worker runtime.

mod cache;

pub use cache::{IdCache, ResourceCache};

use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::event::ConfigEvent;
use crate::node::NodeId;
use crate::object::HeadMatrix;
use crate::protocol::StartFrame;

/// Application code that draws frames on a worker.
///
/// Errors are reported as strings because they travel back to the
/// coordinator inside reply payloads.
#[async_trait]
pub trait FrameRenderer: Send {
    async fn init(&mut self, init_id: u32) -> Result<(), String>;

    async fn init_node(&mut self, _node: NodeId) -> Result<(), String> {
        Ok(())
    }

    async fn exit_node(&mut self, _node: NodeId) -> bool {
        true
    }

    /// Draw one frame. Returned events are forwarded to the coordinator.
    async fn render(&mut self, frame: &StartFrame, head: Option<&HeadMatrix>) -> Vec<ConfigEvent>;

    async fn exit(&mut self) -> bool;
}

/// Renderer that draws nothing, optionally taking a fixed time per frame.
///
/// Each frame allocates a buffer object keyed by its frame id, so the
/// cache reflects the distinct frame ids seen since init.
#[derive(Debug, Default)]
pub struct NullRenderer {
    cache: IdCache,
    frame_cost: Duration,
    frames: u32,
}

impl NullRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame_cost(frame_cost: Duration) -> Self {
        Self {
            frame_cost,
            ..Self::default()
        }
    }

    pub fn cache(&self) -> &IdCache {
        &self.cache
    }

    pub fn frames_rendered(&self) -> u32 {
        self.frames
    }
}

#[async_trait]
impl FrameRenderer for NullRenderer {
    async fn init(&mut self, init_id: u32) -> Result<(), String> {
        trace!("null renderer init {init_id}");
        self.frames = 0;
        Ok(())
    }

    async fn render(&mut self, frame: &StartFrame, _head: Option<&HeadMatrix>) -> Vec<ConfigEvent> {
        let key = u64::from(frame.frame_id);
        if self.cache.buffer_object(key).is_none() {
            self.cache.new_buffer_object(key);
        }
        if !self.frame_cost.is_zero() {
            tokio::time::sleep(self.frame_cost).await;
        }
        self.frames += 1;
        Vec::new()
    }

    async fn exit(&mut self) -> bool {
        self.cache.delete_all();
        true
    }
}
