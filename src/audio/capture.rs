//! Local microphone collaborator
//!
//! Capture plumbing (device selection, echo cancellation, raw frames) lives
//! outside this crate. The mesh only needs a mute toggle and a stream handle
//! to hand to remote peers.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::audio::backend::StreamHandle;

/// Minimal interface the coordinator needs from a capture source
pub trait CaptureSource: Send + Sync {
    fn set_muted(&self, muted: bool);
    fn is_muted(&self) -> bool;
    fn stream(&self) -> StreamHandle;
}

/// In-process capture source backed by a mute flag
pub struct LocalMicrophone {
    muted: AtomicBool,
    stream: StreamHandle,
}

impl LocalMicrophone {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            muted: AtomicBool::new(false),
            stream: StreamHandle::new(label),
        }
    }

    /// Flip the mute flag, returning the new muted state
    pub fn toggle(&self) -> bool {
        // fetch_xor flips and returns the previous value
        !self.muted.fetch_xor(true, Ordering::AcqRel)
    }
}

impl CaptureSource for LocalMicrophone {
    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    fn stream(&self) -> StreamHandle {
        self.stream.clone()
    }
}
