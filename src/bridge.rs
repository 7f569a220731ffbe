//! Thread-safe bridge between the control side and the audio engine.
//!
//! This module provides the communication layer that lets the thread
//! receiving edited source text drive the real-time engine without ever
//! making it wait.
//!
//! # Architecture
//!
//! - **Control thread** owns [`LiveSession`] with the recompilation
//!   [`Pipeline`]
//! - **Audio thread** owns [`EngineHandle`] with the [`Engine`]
//! - Communication uses wait-free SPSC ring buffers for commands and
//!   events and atomics for readback
//!
//! # Usage
//!
//! ```ignore
//! let (mut session, mut engine) = create_bridge(&EngineConfig::default())?;
//!
//! // Control thread: submit definitions whenever the file changes
//! session.submit_definitions("wave('tone', pipe(sin(440), gain(0.3)))")?;
//!
//! // Audio thread: render a block
//! engine.process_block(&mut out);
//!
//! // Control thread: collect reports and free retired producers
//! session.poll_events();
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering},
};

use rtrb::{Consumer, Producer, RingBuffer};

use crate::arena::Generation;
use crate::config::{ConfigError, EngineConfig, frames_for};
use crate::diagnostics::{DiagnosticSink, LogSink};
use crate::engine::Engine;
use crate::event::{Command, EngineEvent};
use crate::pipeline::{Pipeline, Recompiled, SubmitReport};
use crate::script::ParseError;

/// Why a submission was not applied.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SubmitError {
    #[error("parse error at {0}")]
    Parse(#[from] ParseError),

    /// The engine has not caught up with earlier commands. Nothing from
    /// this submission was applied.
    #[error("engine command queue is full")]
    QueueFull,
}

/// Handle for the control thread to communicate with the engine.
///
/// All methods may block, allocate and log; none of them waits on the
/// audio thread.
pub struct LiveSession {
    pipeline: Pipeline,

    sample_rate: f64,

    /// Ring to send commands to the engine.
    command_tx: Producer<Command>,

    /// Ring to receive events (and retired values) from the engine.
    event_rx: Consumer<EngineEvent>,

    /// Shared readback state (updated by engine, read here).
    readback: Arc<SharedReadback>,

    sink: Box<dyn DiagnosticSink>,

    /// Events collected but not yet handed out by `poll_events`.
    pending: Vec<EngineEvent>,
}

/// Handle for the audio thread containing the engine and communication
/// rings.
///
/// This is the primary interface for the audio callback. It owns the
/// Engine and provides methods to process commands and audio.
pub struct EngineHandle {
    /// The mixing engine (owned by audio thread).
    engine: Engine,

    /// Ring to receive commands from the control thread.
    command_rx: Consumer<Command>,

    /// Ring to send events back.
    event_tx: Producer<EngineEvent>,

    /// Shared readback state (written by engine).
    readback: Arc<SharedReadback>,

    channels: usize,
}

/// Lock-free shared state for engine -> control readback.
///
/// Uses atomics for frequently updated values.
struct SharedReadback {
    frames_rendered: AtomicU64,
    active_voices: AtomicUsize,
    fading_voices: AtomicUsize,
    /// Last applied generation plus one; zero means none yet.
    applied_generation: AtomicU64,
    /// Peak level of the last block, stored as f32 bits.
    peak_bits: AtomicU32,
    dropped_events: AtomicU64,
}

impl SharedReadback {
    fn new() -> Self {
        Self {
            frames_rendered: AtomicU64::new(0),
            active_voices: AtomicUsize::new(0),
            fading_voices: AtomicUsize::new(0),
            applied_generation: AtomicU64::new(0),
            peak_bits: AtomicU32::new(0.0_f32.to_bits()),
            dropped_events: AtomicU64::new(0),
        }
    }
}

/// Snapshot of the engine's state as seen from the control thread.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EngineReadback {
    pub frames_rendered: u64,
    pub active_voices: usize,
    pub fading_voices: usize,
    pub applied_generation: Option<Generation>,
    pub peak: f32,
    pub dropped_events: u64,
}

/// Create a linked pair of handles reporting diagnostics through `log`.
pub fn create_bridge(config: &EngineConfig) -> Result<(LiveSession, EngineHandle), ConfigError> {
    create_bridge_with_sink(config, Box::new(LogSink))
}

/// Create a linked pair of handles for control and engine communication.
///
/// The `EngineHandle` is meant to be moved to the audio thread.
pub fn create_bridge_with_sink(
    config: &EngineConfig,
    sink: Box<dyn DiagnosticSink>,
) -> Result<(LiveSession, EngineHandle), ConfigError> {
    config.validate()?;

    let (command_tx, command_rx) = RingBuffer::new(config.command_capacity);
    let (event_tx, event_rx) = RingBuffer::new(config.event_capacity);
    let readback = Arc::new(SharedReadback::new());

    let session = LiveSession {
        pipeline: Pipeline::new(config),
        sample_rate: config.sample_rate,
        command_tx,
        event_rx,
        readback: Arc::clone(&readback),
        sink,
        pending: Vec::new(),
    };

    let engine = EngineHandle {
        engine: Engine::new(config),
        command_rx,
        event_tx,
        readback,
        channels: config.channels,
    };

    Ok((session, engine))
}

// ═══════════════════════════════════════════════════════════════════
// LiveSession - Control Thread API
// ═══════════════════════════════════════════════════════════════════

impl LiveSession {
    /// Parse, compile and send a complete definition file.
    ///
    /// A parse error rejects the whole submission and leaves the engine
    /// untouched. Compile errors are per label and listed in the report;
    /// the rest of the file is still applied.
    pub fn submit_definitions(&mut self, source: &str) -> Result<SubmitReport, SubmitError> {
        // Voices that failed since the last poll must not be mistaken for
        // unchanged ones.
        self.collect_events();

        let Recompiled { patch, report } = match self.pipeline.recompile(source) {
            Ok(recompiled) => recompiled,
            Err(e) => {
                self.sink.report_error(&format!("parse error at {e}"));
                return Err(e.into());
            }
        };

        if self.command_tx.push(Command::Apply(patch)).is_err() {
            self.pipeline.revert();
            self.sink.report_error(&format!(
                "generation {} dropped: engine command queue is full",
                report.generation
            ));
            return Err(SubmitError::QueueFull);
        }

        for label in &report.redefined {
            self.sink
                .report_log(&format!("'{label}' is defined more than once; the last definition wins"));
        }
        for error in &report.errors {
            self.sink.report_error(&format!("compile error in {error}"));
        }
        self.sink.report_log(&format!(
            "generation {}: {} applied ({} unchanged), {} failed",
            report.generation,
            report.applied.len(),
            report.unchanged.len(),
            report.errors.len()
        ));

        Ok(report)
    }

    /// Remove one voice without a recompilation.
    pub fn remove(&mut self, label: &str) -> Result<(), SubmitError> {
        self.command_tx
            .push(Command::Remove(label.into()))
            .map_err(|_| SubmitError::QueueFull)?;
        self.pipeline.forget(label);
        Ok(())
    }

    /// Change the crossfade length used by later updates.
    pub fn set_crossfade_ms(&mut self, millis: f64) -> Result<(), SubmitError> {
        let frames = frames_for(millis, self.sample_rate);
        self.command_tx
            .push(Command::SetCrossfade { frames })
            .map_err(|_| SubmitError::QueueFull)
    }

    /// Collect everything the engine reported since the last call.
    ///
    /// Retired producers, voices and patches are dropped here, off the
    /// audio thread, and not returned. Voice failures are also forwarded
    /// to the diagnostic sink.
    pub fn poll_events(&mut self) -> Vec<EngineEvent> {
        self.collect_events();
        std::mem::take(&mut self.pending)
    }

    fn collect_events(&mut self) {
        while let Ok(event) = self.event_rx.pop() {
            match event {
                EngineEvent::Retired(_) => {}
                EngineEvent::VoiceFailed { ref label, error } => {
                    self.pipeline.forget(label);
                    self.sink
                        .report_error(&format!("runtime error in '{label}': {error}; voice removed"));
                    self.pending.push(event);
                }
                other => self.pending.push(other),
            }
        }
    }

    /// Get the current engine readback state.
    pub fn readback(&self) -> EngineReadback {
        let generation = self.readback.applied_generation.load(Ordering::Acquire);
        EngineReadback {
            frames_rendered: self.readback.frames_rendered.load(Ordering::Relaxed),
            active_voices: self.readback.active_voices.load(Ordering::Relaxed),
            fading_voices: self.readback.fading_voices.load(Ordering::Relaxed),
            applied_generation: generation.checked_sub(1),
            peak: f32::from_bits(self.readback.peak_bits.load(Ordering::Relaxed)),
            dropped_events: self.readback.dropped_events.load(Ordering::Relaxed),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

// ═══════════════════════════════════════════════════════════════════
// EngineHandle - Audio Thread API
// ═══════════════════════════════════════════════════════════════════

impl EngineHandle {
    // ───────────────────────────────────────────────────────────────
    // Command Processing
    // ───────────────────────────────────────────────────────────────

    /// Apply pending commands from the control thread.
    ///
    /// Call this at a frame boundary, normally the start of each block.
    /// A command whose retirements would not fit the engine's outbox stays
    /// queued until the control side has polled. Returns the number of
    /// commands applied.
    pub fn process_commands(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(command) = self.command_rx.peek() {
            if !self.engine.can_accept(command) {
                break;
            }
            let Ok(command) = self.command_rx.pop() else {
                break;
            };
            self.engine.handle_command(command);
            applied += 1;
        }
        applied
    }

    // ───────────────────────────────────────────────────────────────
    // Audio Processing (delegates to Engine)
    // ───────────────────────────────────────────────────────────────

    /// Render one interleaved block.
    ///
    /// Applies pending commands first, then ships events back and
    /// refreshes the readback.
    pub fn process_block(&mut self, out: &mut [f32]) {
        self.process_commands();
        self.engine.render_interleaved(out, self.channels);
        self.flush_events();
        self.sync_readback();
    }

    /// Render one block of mono frames, regardless of the channel count.
    pub fn render_mono(&mut self, out: &mut [f32]) {
        self.process_commands();
        self.engine.render(out);
        self.flush_events();
        self.sync_readback();
    }

    /// Move as many queued engine events to the control side as the ring
    /// has room for. The rest stay queued for the next block.
    pub fn flush_events(&mut self) {
        let room = self.event_tx.slots();
        for event in self.engine.drain_events(room) {
            // Cannot fail: at most `room` events are drained.
            let _ = self.event_tx.push(event);
        }
    }

    /// Sync readback state from engine.
    ///
    /// Call this at the end of each audio block to update control-visible
    /// state.
    pub fn sync_readback(&mut self) {
        let readback = &self.readback;
        readback
            .frames_rendered
            .store(self.engine.frames_rendered(), Ordering::Relaxed);
        readback
            .active_voices
            .store(self.engine.active_voices(), Ordering::Relaxed);
        readback
            .fading_voices
            .store(self.engine.registry().fading_count(), Ordering::Relaxed);
        readback
            .peak_bits
            .store(self.engine.take_peak().to_bits(), Ordering::Relaxed);
        readback
            .dropped_events
            .store(self.engine.dropped_events(), Ordering::Relaxed);
        if let Some(generation) = self.engine.applied_generation() {
            readback
                .applied_generation
                .store(generation + 1, Ordering::Release);
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Engine State Access
    // ───────────────────────────────────────────────────────────────

    #[inline]
    pub fn active_voices(&self) -> usize {
        self.engine.active_voices()
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Get a reference to the engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Get a mutable reference to the engine.
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default, Clone)]
    struct Recorder {
        errors: Arc<Mutex<Vec<String>>>,
    }

    impl DiagnosticSink for Recorder {
        fn report_log(&self, _: &str) {}

        fn report_error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig {
            channels: 0,
            ..Default::default()
        };
        assert!(matches!(
            create_bridge(&config),
            Err(ConfigError::Zero("channels"))
        ));
    }

    #[test]
    fn submission_reaches_the_engine_at_the_next_block() {
        let (mut session, mut engine) = create_bridge(&EngineConfig::default()).unwrap();
        let report = session
            .submit_definitions("wave('tone', pipe(sin(440), gain(0.3)))")
            .unwrap();
        assert_eq!(report.generation, 0);
        assert_eq!(engine.active_voices(), 0);

        let mut block = [0.0f32; 64];
        engine.process_block(&mut block);
        assert_eq!(engine.active_voices(), 1);
        assert!(block.iter().any(|s| *s != 0.0));

        let readback = session.readback();
        assert_eq!(readback.frames_rendered, 64);
        assert_eq!(readback.applied_generation, Some(0));
        assert!(readback.peak > 0.0 && readback.peak <= 0.3);

        let events = session.poll_events();
        assert!(events.iter().any(|e| matches!(
            e,
            EngineEvent::PatchApplied {
                generation: 0,
                voices: 1
            }
        )));
    }

    #[test]
    fn parse_error_sends_nothing() {
        let recorder = Recorder::default();
        let (mut session, mut engine) =
            create_bridge_with_sink(&EngineConfig::default(), Box::new(recorder.clone())).unwrap();

        let err = session.submit_definitions("wave('x', sin(440)").unwrap_err();
        assert!(matches!(err, SubmitError::Parse(_)));
        assert_eq!(engine.process_commands(), 0);
        assert_eq!(recorder.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn full_command_queue_is_reported() {
        let config = EngineConfig {
            command_capacity: 1,
            ..Default::default()
        };
        let (mut session, _engine) = create_bridge(&config).unwrap();
        session.submit_definitions("wave('a', sin(1))").unwrap();
        assert_eq!(
            session.submit_definitions("wave('a', sin(2))"),
            Err(SubmitError::QueueFull)
        );
    }

    #[test]
    fn stereo_blocks_duplicate_the_mix() {
        let config = EngineConfig {
            channels: 2,
            ..Default::default()
        };
        let (mut session, mut engine) = create_bridge(&config).unwrap();
        session.submit_definitions("wave('a', saw(100) * 0.5)").unwrap();

        let mut block = [0.0f32; 32];
        engine.process_block(&mut block);
        for frame in block.chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }
        assert_eq!(session.readback().frames_rendered, 16);
    }

    #[test]
    fn runtime_failure_is_reported_on_poll() {
        let recorder = Recorder::default();
        let (mut session, mut engine) =
            create_bridge_with_sink(&EngineConfig::default(), Box::new(recorder.clone())).unwrap();
        session
            .submit_definitions("wave('ok', sin(100) * 0.1) wave('bad', 1 / (saw(1) * 0))")
            .unwrap();

        let mut block = [0.0f32; 8];
        engine.process_block(&mut block);
        let events = session.poll_events();

        assert_eq!(engine.active_voices(), 1);
        assert!(events.iter().any(
            |e| matches!(e, EngineEvent::VoiceFailed { label, .. } if &**label == "bad")
        ));
        assert!(recorder.errors.lock().unwrap()[0].contains("'bad'"));
    }
}
