// src/voice.rs

use std::f64::consts::FRAC_PI_2;
use std::mem;
use std::ops::Range;
use std::sync::Arc;

use crate::arena::Generation;
use crate::producer::{Producer, RuntimeError};

/// Name a voice is registered under, e.g. `"tone"` in `wave("tone", …)`.
pub type Label = Arc<str>;

/// A producer together with the recompilation pass it was compiled in and
/// the arena slots it owns.
///
/// The generation decides which arena buffer the producer runs against
/// while a handover is in progress; `slots` is what gets copied back when
/// the handover ends.
pub struct BoundProducer {
    producer: Box<dyn Producer>,
    generation: Generation,
    slots: Range<usize>,
}

impl BoundProducer {
    pub fn new(producer: Box<dyn Producer>, generation: Generation, slots: Range<usize>) -> Self {
        Self {
            producer,
            generation,
            slots,
        }
    }

    #[inline]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    #[inline]
    pub fn slots(&self) -> Range<usize> {
        self.slots.clone()
    }

    #[inline]
    pub fn next(&mut self, arena: &mut [f64]) -> Result<f64, RuntimeError> {
        self.producer.next(arena)
    }
}

impl std::fmt::Debug for BoundProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundProducer")
            .field("generation", &self.generation)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

/// Gain law used while a voice crossfades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FadeCurve {
    /// `sin θ · new + cos θ · old`; keeps the summed power of
    /// uncorrelated signals constant.
    #[default]
    EqualPower,

    /// `t · new + (1 - t) · old`.
    Linear,
}

impl FadeCurve {
    /// `(old_gain, new_gain)` at fade position `t` in `0..=1`.
    #[inline]
    pub fn gains(self, t: f64) -> (f64, f64) {
        match self {
            FadeCurve::EqualPower => {
                let theta = t * FRAC_PI_2;
                (theta.cos(), theta.sin())
            }
            FadeCurve::Linear => (1.0 - t, t),
        }
    }
}

/// Producers pushed out of a voice by [`Voice::replace`].
#[derive(Debug, Default)]
pub struct Displaced {
    producers: [Option<BoundProducer>; 2],
}

impl Displaced {
    pub fn is_empty(&self) -> bool {
        self.producers.iter().all(Option::is_none)
    }

    pub fn into_producers(self) -> impl Iterator<Item = BoundProducer> {
        self.producers.into_iter().flatten()
    }
}

/// A named generator and its crossfade state.
///
/// Voices do NOT own DSP state.
/// DSP state lives in the arena slots their producers were compiled for.
///
/// `previous` is present exactly while a crossfade is in flight; when it
/// is absent `fade_progress == fade_duration`.
#[derive(Debug)]
pub struct Voice {
    label: Label,
    current: BoundProducer,
    previous: Option<BoundProducer>,
    fade_progress: u32,
    fade_duration: u32,
}

impl Voice {
    #[inline]
    pub fn new(label: Label, producer: BoundProducer) -> Self {
        Self {
            label,
            current: producer,
            previous: None,
            fade_progress: 0,
            fade_duration: 0,
        }
    }

    #[inline]
    pub fn label(&self) -> &Label {
        &self.label
    }

    #[inline]
    pub fn current(&self) -> &BoundProducer {
        &self.current
    }

    #[inline]
    pub fn previous(&self) -> Option<&BoundProducer> {
        self.previous.as_ref()
    }

    #[inline]
    pub fn is_fading(&self) -> bool {
        self.previous.is_some()
    }

    #[inline]
    pub fn fade_progress(&self) -> u32 {
        self.fade_progress
    }

    #[inline]
    pub fn fade_duration(&self) -> u32 {
        self.fade_duration
    }

    /// Fraction of the crossfade completed, `1.0` when not fading.
    #[inline]
    pub fn fade_position(&self) -> f64 {
        if self.previous.is_none() || self.fade_duration == 0 {
            1.0
        } else {
            f64::from(self.fade_progress) / f64::from(self.fade_duration)
        }
    }

    /// Install `producer` as the new current one.
    ///
    /// With `fade_frames > 0` the old current producer becomes `previous`
    /// and a crossfade of that length starts. A crossfade already in flight
    /// is restarted: its `previous` is displaced. With `fade_frames == 0`
    /// the switch is a hard cut and nothing is kept.
    pub fn replace(&mut self, producer: BoundProducer, fade_frames: u32) -> Displaced {
        let old_current = mem::replace(&mut self.current, producer);
        let old_previous = self.previous.take();

        if fade_frames == 0 {
            self.fade_progress = 0;
            self.fade_duration = 0;
            Displaced {
                producers: [Some(old_current), old_previous],
            }
        } else {
            self.previous = Some(old_current);
            self.fade_progress = 0;
            self.fade_duration = fade_frames;
            Displaced {
                producers: [old_previous, None],
            }
        }
    }

    /// Step the crossfade by one frame, handing back the previous producer
    /// once the fade is complete.
    #[inline]
    pub fn advance_fade(&mut self) -> Option<BoundProducer> {
        self.previous.as_ref()?;
        self.fade_progress += 1;
        if self.fade_progress >= self.fade_duration {
            self.finish_fade()
        } else {
            None
        }
    }

    /// End any crossfade immediately.
    #[inline]
    pub fn finish_fade(&mut self) -> Option<BoundProducer> {
        self.fade_progress = self.fade_duration;
        self.previous.take()
    }

    #[inline]
    pub(crate) fn producers_mut(&mut self) -> (&mut BoundProducer, Option<&mut BoundProducer>) {
        (&mut self.current, self.previous.as_mut())
    }
}
