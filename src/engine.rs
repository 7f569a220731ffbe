// src/engine.rs

use crate::arena::{Generation, StateArena};
use crate::config::EngineConfig;
use crate::event::{Command, EngineEvent, Retired};
use crate::patch::{Patch, Update};
use crate::producer::RuntimeError;
use crate::registry::{Registry, Upsert};
use crate::voice::{BoundProducer, FadeCurve, Voice};

/// Real-time mixing engine.
///
/// This struct runs exclusively on the audio thread.
/// It must be deterministic, allocation-free, and lock-free.
/// It does not parse or compile anything; it only installs patches built
/// elsewhere and mixes the voices it holds.
pub struct Engine {
    /// Active voices
    registry: Registry,

    /// Most voices the registry holds at once
    voice_capacity: usize,

    /// Persistent producer state
    arena: StateArena,

    /// Crossfade length for updates, in frames
    fade_frames: u32,

    curve: FadeCurve,

    outbox: Outbox,

    frames_rendered: u64,

    /// Largest absolute output sample since the last `take_peak`
    peak: f32,

    applied_generation: Option<Generation>,
}

/// Preallocated queues of values waiting to be shipped to the control side.
///
/// Notifications are dropped and counted when their queue is full.
/// Retired values have a queue of their own that the engine keeps room in
/// (see [`Engine::can_accept`]), so they are freed on the control thread.
struct Outbox {
    events: Vec<EngineEvent>,
    retired: Vec<Retired>,
    dropped: u64,
}

impl Outbox {
    fn new(events: usize, retired: usize) -> Self {
        Self {
            events: Vec::with_capacity(events),
            retired: Vec::with_capacity(retired),
            dropped: 0,
        }
    }

    /// Queue an event; when the outbox is full the event is dropped in
    /// place and counted.
    #[inline]
    fn push(&mut self, event: EngineEvent) {
        if self.events.len() < self.events.capacity() {
            self.events.push(event);
        } else {
            self.dropped += 1;
        }
    }

    #[inline]
    fn retire(&mut self, retired: Retired) {
        if self.retired.len() < self.retired.capacity() {
            self.retired.push(retired);
        } else {
            // Only reachable when `apply` is driven without `can_accept`.
            self.dropped += 1;
        }
    }

    #[inline]
    fn headroom(&self) -> usize {
        self.retired.capacity() - self.retired.len()
    }
}

impl Engine {
    pub fn new(config: &EngineConfig) -> Self {
        // Room for a full set of old voices plus a full set of new ones
        // while a patch is being applied.
        let voice_capacity = config.max_voices * 2;
        Self {
            registry: Registry::with_capacity(voice_capacity),
            voice_capacity,
            arena: StateArena::new(),
            fade_frames: config.crossfade_frames(),
            curve: config.curve,
            // One full patch worth of retirements on top of every live
            // producer retiring at once.
            outbox: Outbox::new(config.event_capacity, voice_capacity * 4 + 8),
            frames_rendered: 0,
            peak: 0.0,
            applied_generation: None,
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Commands
    // ───────────────────────────────────────────────────────────────

    /// Whether `command` can be handled now without overflowing the
    /// retirement queue, counting everything it may displace plus every
    /// producer that is still alive afterwards.
    pub fn can_accept(&self, command: &Command) -> bool {
        let cost = match command {
            Command::Apply(patch) => 2 * patch.updates.len() + self.registry.len() + 1,
            Command::Remove(_) => 2,
            Command::SetCrossfade { .. } => 0,
        };
        self.outbox.retired.is_empty() || self.outbox.headroom() >= cost + 2 * self.voice_capacity
    }

    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::Apply(patch) => self.apply(patch),
            Command::Remove(label) => {
                self.remove(&label);
                self.outbox.retire(Retired::Label(label));
            }
            Command::SetCrossfade { frames } => self.set_crossfade(frames),
        }
    }

    /// Install a recompilation result.
    ///
    /// 1. Upserts every compiled label. Each new producer runs in this
    ///    generation's handover layer, starting from the state of the
    ///    producer it replaces, even when the label's region moved
    /// 2. Removes voices whose label the patch no longer defines
    /// 3. Commits every layer no older crossfade still overlaps
    ///
    /// Crossfades already in flight keep running unless the patch
    /// replaces their voice again.
    pub fn apply(&mut self, mut patch: Box<Patch>) {
        let generation = patch.generation;
        let mut layered = false;

        for update in patch.updates.drain(..) {
            let Update {
                label,
                producer,
                unchanged,
            } = update;

            let running = self
                .registry
                .get(&label)
                .map(|v| (v.current().generation(), v.current().slots()));

            if unchanged && running.is_some() {
                // The patch's label set still references `label`, so
                // dropping it here only decrements a count.
                self.outbox.retire(Retired::Producer(producer));
                continue;
            }

            if !layered {
                self.open_layer(generation);
                layered = true;
            }
            self.arena.seed(generation, producer.slots(), running);

            if let Upsert::Updated(displaced) = self.registry.upsert(label, producer, self.fade_frames) {
                for producer in displaced.into_producers() {
                    self.outbox.retire(Retired::Producer(producer));
                }
            }
        }

        let outbox = &mut self.outbox;
        self.registry
            .reconcile(&patch.desired, |voice| outbox.retire(Retired::Voice(voice)));

        self.applied_generation = Some(generation);
        self.outbox.push(EngineEvent::PatchApplied {
            generation,
            voices: self.registry.len(),
        });
        self.outbox.retire(Retired::Patch(patch));

        self.settle();
    }

    /// Remove one voice immediately.
    pub fn remove(&mut self, label: &str) -> bool {
        match self.registry.remove(label) {
            Some(voice) => {
                self.outbox.retire(Retired::Voice(voice));
                self.settle();
                true
            }
            None => false,
        }
    }

    /// Crossfade length for later updates. Fades in flight keep their
    /// duration.
    pub fn set_crossfade(&mut self, frames: u32) {
        self.fade_frames = frames;
    }

    /// Claim a handover layer for `generation`.
    ///
    /// With every layer taken, the fades holding back the oldest layer are
    /// ended early so it can commit.
    fn open_layer(&mut self, generation: Generation) {
        if self.arena.open_layer(generation) {
            return;
        }
        if let Some(oldest) = self.arena.oldest_layer() {
            for voice in self.registry.voices_mut() {
                if voice.previous().is_some_and(|p| p.generation() < oldest)
                    && let Some(previous) = voice.finish_fade()
                {
                    self.outbox.retire(Retired::Producer(previous));
                }
            }
        }
        self.settle();
        self.arena.open_layer(generation);
    }

    fn settle(&mut self) {
        if self.arena.has_open_layers() {
            let oldest = self.oldest_fading();
            self.commit_layers(oldest);
        }
    }

    /// Generation of the oldest producer still fading out.
    fn oldest_fading(&self) -> Option<Generation> {
        self.registry
            .iter()
            .filter_map(|v| v.previous().map(BoundProducer::generation))
            .min()
    }

    /// Copy back every layer, oldest first, that no producer of an older
    /// generation is still fading out of. Such a producer may run in the
    /// same slots of the primary arena.
    fn commit_layers(&mut self, oldest_fading: Option<Generation>) {
        while let Some(generation) = self.arena.oldest_layer() {
            if oldest_fading.is_some_and(|fading| fading < generation) {
                return;
            }
            for voice in self.registry.iter() {
                for producer in std::iter::once(voice.current()).chain(voice.previous()) {
                    if producer.generation() == generation {
                        self.arena.commit_region(generation, producer.slots());
                    }
                }
            }
            self.arena.close_layer(generation);
            self.outbox
                .push(EngineEvent::HandoverCommitted { generation });
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Mixing
    // ───────────────────────────────────────────────────────────────

    /// Produce one output sample.
    ///
    /// Voices that fail are removed and reported; the frame still
    /// completes with whatever the remaining voices produced.
    pub fn process_frame(&mut self) -> f64 {
        let layered = self.arena.has_open_layers();
        let curve = self.curve;
        let mut mixed = 0.0;
        let mut oldest_fading: Option<Generation> = None;

        let mut index = 0;
        while index < self.registry.len() {
            let voice = &mut self.registry.voices_mut()[index];

            match render_voice(voice, &mut self.arena, curve) {
                Ok(sample) => {
                    mixed += sample;
                    if let Some(previous) = voice.advance_fade() {
                        self.outbox.retire(Retired::Producer(previous));
                    } else if let Some(previous) = voice.previous() {
                        let generation = previous.generation();
                        oldest_fading = Some(oldest_fading.map_or(generation, |g| g.min(generation)));
                    }
                    index += 1;
                }
                Err(error) => {
                    let voice = self.registry.remove_at(index);
                    self.outbox.push(EngineEvent::VoiceFailed {
                        label: voice.label().clone(),
                        error,
                    });
                    self.outbox.retire(Retired::Voice(voice));
                }
            }
        }

        if layered {
            self.commit_layers(oldest_fading);
        }

        let out = if mixed.is_nan() {
            0.0
        } else {
            mixed.clamp(-1.0, 1.0)
        };

        self.frames_rendered += 1;
        self.peak = self.peak.max(out.abs() as f32);
        out
    }

    /// Fill `out` with consecutive mono frames.
    pub fn render(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            *sample = self.process_frame() as f32;
        }
    }

    /// Fill an interleaved buffer, copying the mono mix to every channel.
    pub fn render_interleaved(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        for frame in out.chunks_mut(channels) {
            let sample = self.process_frame() as f32;
            frame.fill(sample);
        }
    }

    // ───────────────────────────────────────────────────────────────
    // State access
    // ───────────────────────────────────────────────────────────────

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn arena(&self) -> &StateArena {
        &self.arena
    }

    pub fn active_voices(&self) -> usize {
        self.registry.len()
    }

    /// Whether some generation still runs against its handover layer.
    pub fn is_handover_active(&self) -> bool {
        self.arena.has_open_layers()
    }

    pub fn crossfade_frames(&self) -> u32 {
        self.fade_frames
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn applied_generation(&self) -> Option<Generation> {
        self.applied_generation
    }

    /// Peak output level since the last call.
    pub fn take_peak(&mut self) -> f32 {
        std::mem::take(&mut self.peak)
    }

    /// Events that could not be queued because the outbox was full.
    pub fn dropped_events(&self) -> u64 {
        self.outbox.dropped
    }

    pub fn pending_events(&self) -> usize {
        self.outbox.events.len()
    }

    pub fn pending_retirements(&self) -> usize {
        self.outbox.retired.len()
    }

    /// Take up to `max` queued events, oldest first, followed by retired
    /// values.
    pub fn drain_events(&mut self, max: usize) -> impl Iterator<Item = EngineEvent> + '_ {
        let Outbox {
            events, retired, ..
        } = &mut self.outbox;
        let notices = max.min(events.len());
        let retirements = (max - notices).min(retired.len());
        events
            .drain(..notices)
            .chain(retired.drain(..retirements).map(EngineEvent::Retired))
    }
}

/// Evaluate one voice for the current frame.
///
/// Each producer runs against the handover layer of its generation while
/// that layer is open, otherwise against the primary arena.
#[inline]
fn render_voice(voice: &mut Voice, arena: &mut StateArena, curve: FadeCurve) -> Result<f64, RuntimeError> {
    let position = voice.fade_position();
    let (current, previous) = voice.producers_mut();

    let new = run(current, arena)?;
    match previous {
        None => Ok(new),
        Some(previous) => {
            let old = run(previous, arena)?;
            let (old_gain, new_gain) = curve.gains(position);
            Ok(new * new_gain + old * old_gain)
        }
    }
}

#[inline]
fn run(producer: &mut BoundProducer, arena: &mut StateArena) -> Result<f64, RuntimeError> {
    let buffer = arena.buffer_mut(producer.generation());
    producer.next(buffer)
}
