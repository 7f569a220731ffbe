// C-compatible FFI bindings for Swift/iOS integration.
//
// Safety requirements:
// - All pointers must be non-null unless documented otherwise
// - All handles must be created by this module and not fabricated
// - String parameters must be valid UTF-8 (Swift strings are always valid)
// - Caller must call the corresponding _destroy function for each _create
// - `session_*` functions belong to the control thread, `engine_*`
//   functions to the audio thread

use std::ffi::{CStr, c_char};

use crate::bridge::{EngineHandle, EngineReadback, LiveSession, SubmitError, create_bridge};
use crate::config::EngineConfig;
use crate::event::EngineEvent;
use crate::voice::FadeCurve;

use log::{LevelFilter, error, warn};
use oslog::OsLogger;

// Logger subsystem identifier
const LOG_SUBSYSTEM: &str = "com.wavelive.engine";

/// `session_submit` result: the source did not parse (or was not valid
/// UTF-8). Nothing changed.
pub const WAVELIVE_PARSE_ERROR: i32 = -1;

/// `session_submit` result: the engine has not drained earlier commands.
pub const WAVELIVE_QUEUE_FULL: i32 = -2;

/// `session_submit` result: a required pointer was null.
pub const WAVELIVE_INVALID_ARGUMENT: i32 = -3;

// ═══════════════════════════════════════════════════════════════════════════
// Logger Initialization
// ═══════════════════════════════════════════════════════════════════════════

/// Initialize the oslog logger.
///
/// This should be called once at application startup before using any other
/// FFI functions. Diagnostics from submissions (parse errors, per-label
/// compile errors, runtime failures) are logged through it and appear in
/// Console.app and Xcode's debug console.
#[unsafe(no_mangle)]
pub extern "C" fn wavelive_init_logger() {
    OsLogger::new(LOG_SUBSYSTEM)
        .level_filter(LevelFilter::Debug)
        .init()
        .ok();
}

// ═══════════════════════════════════════════════════════════════════════════
// Opaque Handle Types
// ═══════════════════════════════════════════════════════════════════════════

/// Opaque handle to the LiveSession (control side).
pub struct WaveliveSession {
    inner: LiveSession,
}

/// Opaque handle to the EngineHandle (audio side).
pub struct WaveliveEngine {
    inner: EngineHandle,
}

// ═══════════════════════════════════════════════════════════════════════════
// FFI Result Types
// ═══════════════════════════════════════════════════════════════════════════

/// Readback data from the engine (for UI meters/displays).
#[repr(C)]
#[derive(Default)]
pub struct WaveliveReadback {
    pub frames_rendered: u64,
    pub active_voices: u32,
    pub fading_voices: u32,
    /// Last applied generation, valid only when `has_generation` is set.
    pub applied_generation: u64,
    pub has_generation: bool,
    pub peak: f32,
    pub dropped_events: u64,
}

impl From<EngineReadback> for WaveliveReadback {
    fn from(r: EngineReadback) -> Self {
        Self {
            frames_rendered: r.frames_rendered,
            active_voices: r.active_voices as u32,
            fading_voices: r.fading_voices as u32,
            applied_generation: r.applied_generation.unwrap_or(0),
            has_generation: r.applied_generation.is_some(),
            peak: r.peak,
            dropped_events: r.dropped_events,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Configuration & Lifecycle
// ═══════════════════════════════════════════════════════════════════════════

/// Configuration for creating a session and engine.
#[repr(C)]
pub struct WaveliveConfig {
    /// Sample rate in Hz (e.g., 44100.0, 48000.0).
    pub sample_rate: f64,
    /// Crossfade length for updated voices, in milliseconds.
    pub crossfade_ms: f64,
    /// Maximum number of simultaneously defined labels.
    pub max_voices: u32,
    /// Interleaved output channels for `engine_render_interleaved`.
    pub channels: u32,
    /// Use linear instead of equal-power crossfades.
    pub linear_fades: bool,
}

impl Default for WaveliveConfig {
    fn default() -> Self {
        let defaults = EngineConfig::default();
        Self {
            sample_rate: defaults.sample_rate,
            crossfade_ms: defaults.crossfade_ms,
            max_voices: defaults.max_voices as u32,
            channels: defaults.channels as u32,
            linear_fades: defaults.curve == FadeCurve::Linear,
        }
    }
}

impl From<&WaveliveConfig> for EngineConfig {
    fn from(c: &WaveliveConfig) -> Self {
        Self {
            sample_rate: c.sample_rate,
            crossfade_ms: c.crossfade_ms,
            curve: if c.linear_fades {
                FadeCurve::Linear
            } else {
                FadeCurve::EqualPower
            },
            max_voices: c.max_voices as usize,
            channels: c.channels as usize,
            ..Default::default()
        }
    }
}

/// Get the default configuration values.
#[unsafe(no_mangle)]
pub extern "C" fn wavelive_default_config() -> WaveliveConfig {
    WaveliveConfig::default()
}

/// Create a new session and engine pair with default configuration.
///
/// # Safety
/// `out_engine` must be a valid pointer to store the engine handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_create(out_engine: *mut *mut WaveliveEngine) -> *mut WaveliveSession {
    let config = WaveliveConfig::default();
    unsafe { session_create_with_config(&config, out_engine) }
}

/// Create a new session and engine pair with custom configuration.
///
/// Returns a session handle. The engine handle is returned via `out_engine`.
/// Both handles must be destroyed with their respective destroy functions.
/// Returns NULL (and leaves `out_engine` untouched) when the configuration
/// is invalid.
///
/// # Safety
/// - `config` must be a valid pointer to a WaveliveConfig struct or NULL
/// - `out_engine` must be a valid pointer to store the engine handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_create_with_config(
    config: *const WaveliveConfig,
    out_engine: *mut *mut WaveliveEngine,
) -> *mut WaveliveSession {
    if out_engine.is_null() {
        warn!("session_create_with_config: out_engine is null");
        return std::ptr::null_mut();
    }

    // Use provided config or defaults
    let cfg = if config.is_null() {
        WaveliveConfig::default()
    } else {
        unsafe { std::ptr::read(config) }
    };

    let (session, engine) = match create_bridge(&EngineConfig::from(&cfg)) {
        Ok(pair) => pair,
        Err(e) => {
            error!("invalid engine configuration: {e}");
            return std::ptr::null_mut();
        }
    };

    unsafe {
        *out_engine = Box::into_raw(Box::new(WaveliveEngine { inner: engine }));
    }
    Box::into_raw(Box::new(WaveliveSession { inner: session }))
}

/// Destroy a session handle.
///
/// # Safety
/// `session` must be a valid pointer returned by `session_create`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_destroy(session: *mut WaveliveSession) {
    if !session.is_null() {
        unsafe { drop(Box::from_raw(session)) };
    }
}

/// Destroy an engine handle.
///
/// # Safety
/// `engine` must be a valid pointer returned via `session_create`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn engine_destroy(engine: *mut WaveliveEngine) {
    if !engine.is_null() {
        unsafe { drop(Box::from_raw(engine)) };
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Session - Live Editing
// ═══════════════════════════════════════════════════════════════════════════

unsafe fn str_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Submit a complete definition file.
///
/// Returns the number of labels that failed to compile (zero on full
/// success), or one of the negative `WAVELIVE_*` codes. Details are logged.
///
/// # Safety
/// `source` must be a valid null-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_submit(session: *mut WaveliveSession, source: *const c_char) -> i32 {
    if session.is_null() || source.is_null() {
        return WAVELIVE_INVALID_ARGUMENT;
    }
    let Some(source) = (unsafe { str_arg(source) }) else {
        error!("submitted source is not valid UTF-8");
        return WAVELIVE_PARSE_ERROR;
    };

    match unsafe { (*session).inner.submit_definitions(source) } {
        Ok(report) => report.errors.len().min(i32::MAX as usize) as i32,
        Err(SubmitError::Parse(_)) => WAVELIVE_PARSE_ERROR,
        Err(SubmitError::QueueFull) => WAVELIVE_QUEUE_FULL,
    }
}

/// Remove one voice immediately. Returns `false` if the command queue is
/// full or an argument is invalid.
///
/// # Safety
/// `label` must be a valid null-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_remove(session: *mut WaveliveSession, label: *const c_char) -> bool {
    if session.is_null() {
        return false;
    }
    match unsafe { str_arg(label) } {
        Some(label) => unsafe { (*session).inner.remove(label).is_ok() },
        None => false,
    }
}

/// Change the crossfade length used by later updates.
///
/// # Safety
/// `session` must be a valid pointer returned by `session_create` or NULL.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_set_crossfade_ms(session: *mut WaveliveSession, millis: f64) -> bool {
    if session.is_null() {
        return false;
    }
    unsafe { (*session).inner.set_crossfade_ms(millis).is_ok() }
}

/// Drain events from the engine, freeing retired producers.
///
/// Call this periodically from the control thread. Returns the number of
/// voices removed by runtime errors since the last call.
///
/// # Safety
/// Must be called from the control thread. `session` must be a valid
/// pointer returned by `session_create` or NULL.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_poll_events(session: *mut WaveliveSession) -> u32 {
    if session.is_null() {
        return 0;
    }
    let events = unsafe { (*session).inner.poll_events() };
    events
        .iter()
        .filter(|e| matches!(e, EngineEvent::VoiceFailed { .. }))
        .count() as u32
}

/// Get the current readback state.
///
/// # Safety
/// `session` must be a valid pointer returned by `session_create` or NULL.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_get_readback(session: *const WaveliveSession) -> WaveliveReadback {
    if session.is_null() {
        return WaveliveReadback::default();
    }
    unsafe { (*session).inner.readback().into() }
}

// ═══════════════════════════════════════════════════════════════════════════
// Engine - Audio Thread
// ═══════════════════════════════════════════════════════════════════════════

/// Apply all pending commands from the control thread.
///
/// The render functions do this themselves; this is for hosts that want
/// to apply edits without rendering. Returns the number applied.
///
/// # Safety
/// Must be called from the audio thread. `engine` must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn engine_process_commands(engine: *mut WaveliveEngine) -> u32 {
    if engine.is_null() {
        return 0;
    }
    unsafe { (*engine).inner.process_commands() as u32 }
}

/// Render audio frames to the provided planar output buffers.
///
/// Both buffers receive the same mono mix. If the engine handle is invalid
/// the buffers are filled with silence.
///
/// # Safety
/// - Must be called from the audio thread
/// - Output buffers must be valid and have space for `frames` samples
#[unsafe(no_mangle)]
pub unsafe extern "C" fn engine_render(
    engine: *mut WaveliveEngine,
    frames: u32,
    output_left: *mut f32,
    output_right: *mut f32,
) {
    let total_frames = frames as usize;

    // Fill with silence if invalid
    if engine.is_null() || output_left.is_null() {
        if !output_left.is_null() {
            unsafe { std::ptr::write_bytes(output_left, 0, total_frames) };
        }
        if !output_right.is_null() {
            unsafe { std::ptr::write_bytes(output_right, 0, total_frames) };
        }
        return;
    }

    let out_left = unsafe { std::slice::from_raw_parts_mut(output_left, total_frames) };
    unsafe { (*engine).inner.render_mono(out_left) };

    if !output_right.is_null() {
        let out_right = unsafe { std::slice::from_raw_parts_mut(output_right, total_frames) };
        out_right.copy_from_slice(out_left);
    }
}

/// Render audio to an interleaved buffer with the configured channel count.
///
/// Output format: [C0F0, C1F0, ..., C0F1, C1F1, ...]
///
/// # Safety
/// - `output` must have space for `frames * channels` floats
#[unsafe(no_mangle)]
pub unsafe extern "C" fn engine_render_interleaved(
    engine: *mut WaveliveEngine,
    frames: u32,
    output: *mut f32,
) {
    if engine.is_null() || output.is_null() {
        return;
    }

    let engine = unsafe { &mut (*engine).inner };
    let len = frames as usize * engine.channels();
    let out = unsafe { std::slice::from_raw_parts_mut(output, len) };
    engine.process_block(out);
}

/// Get the number of active voices.
///
/// # Safety
/// `engine` must be a valid pointer returned via `session_create` or NULL.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn engine_active_voices(engine: *const WaveliveEngine) -> u32 {
    if engine.is_null() {
        return 0;
    }
    unsafe { (*engine).inner.active_voices() as u32 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn create_submit_render_destroy() {
        let mut engine = std::ptr::null_mut();
        let session = unsafe { session_create(&mut engine) };
        assert!(!session.is_null() && !engine.is_null());

        let source = CString::new("wave('tone', sin(440) * 0.3)").unwrap();
        assert_eq!(unsafe { session_submit(session, source.as_ptr()) }, 0);

        let mut left = [0.0f32; 32];
        let mut right = [1.0f32; 32];
        unsafe { engine_render(engine, 32, left.as_mut_ptr(), right.as_mut_ptr()) };
        assert_eq!(left, right);
        assert_eq!(unsafe { engine_active_voices(engine) }, 1);

        let readback = unsafe { session_get_readback(session) };
        assert!(readback.has_generation);
        assert_eq!(readback.frames_rendered, 32);

        unsafe {
            session_destroy(session);
            engine_destroy(engine);
        }
    }

    #[test]
    fn submit_reports_parse_errors_and_null_arguments() {
        let mut engine = std::ptr::null_mut();
        let session = unsafe { session_create(&mut engine) };
        let broken = CString::new("wave('x', sin(").unwrap();

        assert_eq!(unsafe { session_submit(session, broken.as_ptr()) }, WAVELIVE_PARSE_ERROR);
        assert_eq!(
            unsafe { session_submit(session, std::ptr::null()) },
            WAVELIVE_INVALID_ARGUMENT
        );

        unsafe {
            session_destroy(session);
            engine_destroy(engine);
        }
    }

    #[test]
    fn null_handles_are_tolerated() {
        unsafe {
            assert!(!session_set_crossfade_ms(std::ptr::null_mut(), 10.0));
            assert_eq!(session_poll_events(std::ptr::null_mut()), 0);
            assert!(!session_get_readback(std::ptr::null()).has_generation);
            assert_eq!(engine_active_voices(std::ptr::null()), 0);
        }
    }

    #[test]
    fn invalid_config_yields_null() {
        let config = WaveliveConfig {
            sample_rate: 0.0,
            ..Default::default()
        };
        let mut engine = std::ptr::null_mut();
        let session = unsafe { session_create_with_config(&config, &mut engine) };
        assert!(session.is_null());
        assert!(engine.is_null());
    }
}
