//! Circular reference detection.
//!
//! Tracks the chain of references currently being followed. A target that
//! is an ancestor of, or equal to, any location in the chain (within the
//! same document) can never finish resolving.

use std::ops::{Deref, DerefMut};

use crate::types::Location;

/// Stack of reference locations currently being resolved.
#[derive(Debug, Default)]
pub struct InFlight {
    frames: Vec<Location>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// True if following a reference to `target` would revisit a location
    /// already on the stack.
    pub fn is_circular(&self, target: &Location) -> bool {
        self.frames.iter().any(|frame| {
            frame.document == target.document && target.pointer.is_prefix_of(&frame.pointer)
        })
    }

    /// Push `frame`; it is popped when the returned guard drops, on every
    /// exit path.
    pub fn enter(&mut self, frame: Location) -> Frame<'_> {
        self.frames.push(frame);
        Frame { stack: self }
    }
}

/// A pushed stack frame. Derefs to the stack so nested resolution can keep
/// pushing.
#[derive(Debug)]
pub struct Frame<'a> {
    stack: &'a mut InFlight,
}

impl Deref for Frame<'_> {
    type Target = InFlight;

    fn deref(&self) -> &InFlight {
        self.stack
    }
}

impl DerefMut for Frame<'_> {
    fn deref_mut(&mut self) -> &mut InFlight {
        self.stack
    }
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        self.stack.frames.pop();
    }
}
