// src/event.rs

use crate::arena::Generation;
use crate::patch::Patch;
use crate::producer::RuntimeError;
use crate::voice::{BoundProducer, Label, Voice};

/// ===============================
/// Control -> engine
/// ===============================

/// A request for the engine, applied at the next frame boundary.
#[derive(Debug)]
pub enum Command {
    /// Install the result of a recompilation.
    Apply(Box<Patch>),

    /// Remove one voice immediately.
    Remove(Label),

    /// Change the crossfade length used by later updates.
    SetCrossfade { frames: u32 },
}

/// ===============================
/// Engine -> control
/// ===============================

/// Something the engine wants the control thread to know about.
///
/// These events:
/// - are produced on the audio thread without allocating
/// - carry anything that must be freed back to the control thread
#[derive(Debug)]
pub enum EngineEvent {
    PatchApplied {
        generation: Generation,
        voices: usize,
    },

    /// A generation's handover layer was copied back into the primary arena.
    HandoverCommitted { generation: Generation },

    /// A voice produced an error and was removed.
    VoiceFailed { label: Label, error: RuntimeError },

    Retired(Retired),
}

/// Heap-owning values the engine is done with.
#[derive(Debug)]
pub enum Retired {
    Producer(BoundProducer),
    Voice(Voice),
    Patch(Box<Patch>),
    Label(Label),
}
