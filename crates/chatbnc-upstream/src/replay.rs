//! Replay buffer: recent message traffic for newly attached clients.
//!
//! A client that attaches mid-conversation gets the session snapshot and
//! then whatever messages arrived since someone last spoke. The buffer
//! only ever holds complete upstream frames, verbatim, in arrival order.
//!
//! Two things shrink it:
//!
//! - any attached client sending a message clears it (that client has
//!   obviously seen the conversation up to now);
//! - an optional cap evicts the oldest frame once the limit is reached.

use std::collections::VecDeque;

/// Ordered store of replayable frames for one session.
#[derive(Debug, Default)]
pub struct ReplayBuffer {
    frames: VecDeque<String>,
    /// Maximum number of frames kept. `0` means unbounded.
    limit: usize,
}

impl ReplayBuffer {
    /// Creates an empty buffer holding at most `limit` frames
    /// (`0` = unbounded).
    pub fn new(limit: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            limit,
        }
    }

    /// Appends a frame, evicting the oldest one if the cap is reached.
    pub fn push(&mut self, frame: impl Into<String>) {
        if self.limit > 0 && self.frames.len() >= self.limit {
            self.frames.pop_front();
        }
        self.frames.push_back(frame.into());
    }

    /// Drops every buffered frame.
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Buffered frames, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.frames.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}
