// src/patch.rs

use std::collections::HashSet;

use crate::arena::{ArenaLayout, Generation};
use crate::voice::{BoundProducer, Label};

/// The complete result of one recompilation pass.
///
/// A patch is built on the control thread and applied by the engine in one
/// step between two frames, so a frame sees either none or all of it.
#[derive(Debug)]
pub struct Patch {
    pub generation: Generation,

    /// Slot regions claimed by this pass.
    pub layout: ArenaLayout,

    /// Freshly compiled producers, in source order.
    pub updates: Vec<Update>,

    /// Every label the source defines, including labels whose compile
    /// failed. Voices outside this set are removed.
    pub desired: HashSet<Label>,
}

/// One compiled label.
#[derive(Debug)]
pub struct Update {
    pub label: Label,
    pub producer: BoundProducer,

    /// The definition and its slot region are identical to the previous
    /// pass. An existing voice keeps running its producer and does not
    /// crossfade.
    pub unchanged: bool,
}

impl Patch {
    pub fn new(generation: Generation, layout: ArenaLayout) -> Self {
        Self {
            generation,
            layout,
            updates: Vec::new(),
            desired: HashSet::new(),
        }
    }
}
