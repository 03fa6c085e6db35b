//! Frame tracing hooks.
//!
//! A [`FrameTracer`] receives every frame the client sends or receives,
//! after encoding and before decoding respectively. One tracer instance is
//! installed per cluster via `ClusterOptions::log_frames`; there is no
//! global state.

use std::sync::Mutex;

use crate::frame::Frame;

/// Direction of a traced frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

/// Observer for wire traffic, used for debugging and tests.
pub trait FrameTracer: Send + Sync {
    fn frame_sent(&self, frame: &Frame);
    fn frame_received(&self, frame: &Frame);
}

/// Tracer that emits every frame through the `log` facade at debug level.
#[derive(Debug, Default)]
pub struct LogFrameTracer;

impl FrameTracer for LogFrameTracer {
    fn frame_sent(&self, frame: &Frame) {
        log::debug!("sent ch={} {:?}", frame.channel, frame.payload);
    }

    fn frame_received(&self, frame: &Frame) {
        log::debug!("recv ch={} {:?}", frame.channel, frame.payload);
    }
}

/// Tracer that retains every traced frame in memory. Intended for tests
/// that assert on observed traffic.
#[derive(Debug, Default)]
pub struct HoldingFrameTracer {
    frames: Mutex<Vec<(Direction, Frame)>>,
}

impl HoldingFrameTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of everything traced so far.
    pub fn frames(&self) -> Vec<(Direction, Frame)> {
        self.frames.lock().expect("tracer lock poisoned").clone()
    }

    /// Number of frames traced so far.
    pub fn len(&self) -> usize {
        self.frames.lock().expect("tracer lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything recorded.
    pub fn clear(&self) {
        self.frames.lock().expect("tracer lock poisoned").clear();
    }
}

impl FrameTracer for HoldingFrameTracer {
    fn frame_sent(&self, frame: &Frame) {
        self.frames
            .lock()
            .expect("tracer lock poisoned")
            .push((Direction::Sent, frame.clone()));
    }

    fn frame_received(&self, frame: &Frame) {
        self.frames
            .lock()
            .expect("tracer lock poisoned")
            .push((Direction::Received, frame.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holding_tracer_records_both_directions() {
        let tracer = HoldingFrameTracer::new();
        assert!(tracer.is_empty());

        tracer.frame_sent(&Frame::heartbeat());
        tracer.frame_received(&Frame::heartbeat());

        let frames = tracer.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0, Direction::Sent);
        assert_eq!(frames[1].0, Direction::Received);

        tracer.clear();
        assert!(tracer.is_empty());
    }
}
