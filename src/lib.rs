// src/lib.rs
//
// Library entry point for Rust, FFI (iOS/Swift) and WebAssembly consumers.

mod arena;
mod bridge;
mod compile;
mod config;
mod diagnostics;
mod engine;
mod event;
mod patch;
mod pipeline;
mod producer;
mod registry;
mod script;
mod voice;

#[cfg(feature = "ios")]
pub mod ffi;

#[cfg(feature = "web")]
mod wasm;

// Re-export key types for Rust consumers
pub use arena::{
    ARENA_SLOTS, ArenaExhausted, ArenaLayout, Generation, HANDOVER_LAYERS, SlotAllocator, StateArena,
};
pub use bridge::{
    EngineHandle, EngineReadback, LiveSession, SubmitError, create_bridge, create_bridge_with_sink,
};
pub use compile::{CompileError, Compiler};
pub use config::{ConfigError, EngineConfig};
pub use diagnostics::{DiagnosticSink, LogSink};
pub use engine::Engine;
pub use event::{Command, EngineEvent, Retired};
pub use patch::{Patch, Update};
pub use pipeline::{LabelError, Pipeline, Recompiled, SubmitReport};
pub use producer::{Producer, RuntimeError};
pub use registry::{Registry, Upsert};
pub use script::{Definition, ParseError, ParseErrorKind, Position, Script, Signal, parse};
pub use voice::{BoundProducer, Displaced, FadeCurve, Label, Voice};
