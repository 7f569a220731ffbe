//! WebAssembly bindings via wasm-bindgen for browser integration.
//!
//! This module is only compiled when the `web` feature is enabled.
//!
//! # Usage
//!
//! Build with wasm-pack:
//! ```bash
//! wasm-pack build --target web --features web
//! ```
//!
//! # JavaScript Example
//!
//! ```javascript
//! import init, { wavelive_init, WaveliveEngine } from './wavelive.js';
//!
//! await init();
//! wavelive_init();
//!
//! // Inside the AudioWorkletProcessor
//! const engine = new WaveliveEngine(sampleRate);
//! this.port.onmessage = (e) => {
//!     const errors = engine.submit(e.data.source);
//!     this.port.postMessage({ errors });
//! };
//!
//! process(inputs, outputs) {
//!     engine.process(outputs[0][0]);
//!     return true;
//! }
//! ```
//!
//! An AudioWorklet runs the control and audio work on one thread, so both
//! halves of the bridge live inside a single `WaveliveEngine`.

use wasm_bindgen::prelude::*;

use crate::bridge::{EngineHandle, EngineReadback, LiveSession, SubmitError, create_bridge};
use crate::config::EngineConfig;
use crate::event::EngineEvent;
use crate::voice::FadeCurve;

// ═══════════════════════════════════════════════════════════════════════════
// Initialization
// ═══════════════════════════════════════════════════════════════════════════

/// Initialize the wasm module. Call this once before using any other functions.
/// Sets up panic hooks and console logging.
#[wasm_bindgen]
pub fn wavelive_init() {
    console_error_panic_hook::set_once();
    console_log::init_with_level(log::Level::Debug).ok();
}

// ═══════════════════════════════════════════════════════════════════════════
// Readback Data
// ═══════════════════════════════════════════════════════════════════════════

/// Readback data from the engine (for meters and status displays).
#[wasm_bindgen]
#[derive(Clone, Copy, Default)]
pub struct WaveliveReadback {
    /// Frames rendered since the engine was created.
    pub frames_rendered: u64,
    /// Number of currently active voices.
    pub active_voices: u32,
    /// Voices currently crossfading.
    pub fading_voices: u32,
    /// Last applied generation, or -1 before the first.
    pub applied_generation: f64,
    /// Peak level of the last block.
    pub peak: f32,
    /// Engine events lost because the outbox was full.
    pub dropped_events: u64,
}

impl From<EngineReadback> for WaveliveReadback {
    fn from(r: EngineReadback) -> Self {
        Self {
            frames_rendered: r.frames_rendered,
            active_voices: r.active_voices as u32,
            fading_voices: r.fading_voices as u32,
            applied_generation: r.applied_generation.map_or(-1.0, |g| g as f64),
            peak: r.peak,
            dropped_events: r.dropped_events,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════

/// A live-coding engine for use inside an AudioWorklet.
#[wasm_bindgen]
pub struct WaveliveEngine {
    session: LiveSession,
    engine: EngineHandle,
    /// Runtime errors collected while processing, until polled.
    errors: Vec<String>,
}

#[wasm_bindgen]
impl WaveliveEngine {
    /// Create an engine with the default configuration at `sample_rate`.
    #[wasm_bindgen(constructor)]
    pub fn new(sample_rate: f64) -> Result<WaveliveEngine, JsError> {
        Self::with_config(sample_rate, 50.0, false)
    }

    /// Create an engine with a custom crossfade length and curve.
    pub fn with_config(
        sample_rate: f64,
        crossfade_ms: f64,
        linear_fades: bool,
    ) -> Result<WaveliveEngine, JsError> {
        let config = EngineConfig {
            sample_rate,
            crossfade_ms,
            curve: if linear_fades {
                FadeCurve::Linear
            } else {
                FadeCurve::EqualPower
            },
            ..Default::default()
        };
        let (session, engine) = create_bridge(&config)?;
        Ok(WaveliveEngine {
            session,
            engine,
            errors: Vec::new(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Control
    // ─────────────────────────────────────────────────────────────────────────

    /// Submit a complete definition file.
    ///
    /// Returns one message per label that failed to compile; those labels
    /// keep their previous sound. Throws on a parse error, in which case
    /// nothing changed.
    pub fn submit(&mut self, source: &str) -> Result<Vec<String>, JsError> {
        match self.session.submit_definitions(source) {
            Ok(report) => Ok(report.errors.iter().map(ToString::to_string).collect()),
            Err(SubmitError::QueueFull) => {
                // Nothing drains the queue but `process`; apply what is
                // pending now and try once more.
                self.engine.process_commands();
                let report = self.session.submit_definitions(source)?;
                Ok(report.errors.iter().map(ToString::to_string).collect())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove one voice immediately.
    pub fn remove(&mut self, label: &str) -> Result<(), JsError> {
        Ok(self.session.remove(label)?)
    }

    /// Change the crossfade length used by later updates.
    pub fn set_crossfade_ms(&mut self, millis: f64) -> Result<(), JsError> {
        Ok(self.session.set_crossfade_ms(millis)?)
    }

    /// Collect runtime errors reported since the last call, as
    /// `"label: message"` strings. Also frees retired producers.
    pub fn poll_errors(&mut self) -> Vec<String> {
        self.collect_events();
        std::mem::take(&mut self.errors)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Audio
    // ─────────────────────────────────────────────────────────────────────────

    /// Render one mono block into `output` (one sample per frame).
    pub fn process(&mut self, output: &mut [f32]) {
        self.engine.render_mono(output);
        self.collect_events();
    }

    /// Get the number of active voices.
    pub fn active_voices(&self) -> u32 {
        self.engine.active_voices() as u32
    }

    pub fn readback(&self) -> WaveliveReadback {
        self.session.readback().into()
    }
}

impl WaveliveEngine {
    fn collect_events(&mut self) {
        for event in self.session.poll_events() {
            if let EngineEvent::VoiceFailed { label, error } = event {
                self.errors.push(format!("{label}: {error}"));
            }
        }
    }
}
