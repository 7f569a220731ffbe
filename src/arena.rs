// src/arena.rs
//
// Shared state memory for sample producers.
//
// Producers keep everything that must survive a recompilation (oscillator
// phase, filter history, slew targets) in numbered slots of one fixed-size
// buffer. The buffer lives for the whole process and is never resized,
// cleared or reordered. Slot numbering is a convention established by the
// compiler's `SlotAllocator`, not something the engine enforces.

use std::ops::Range;

use crate::voice::Label;

/// Number of `f64` slots in the state arena.
pub const ARENA_SLOTS: usize = 128;

/// First slot handed out by a freshly reset allocator.
pub const ARENA_BASE: usize = 0;

/// Handover buffers available to generations still waiting to commit.
pub const HANDOVER_LAYERS: usize = 8;

/// Identifier of one recompilation pass.
///
/// Every producer compiled in the same pass shares the same generation, and
/// with it the same arena layout.
pub type Generation = u64;

// ═══════════════════════════════════════════════════════════════════
// State arena
// ═══════════════════════════════════════════════════════════════════

/// A private copy of the arena owned by one generation until it commits.
struct Layer {
    generation: Option<Generation>,
    slots: [f64; ARENA_SLOTS],
}

/// The primary arena and its handover layers.
///
/// Each generation that installs producers gets a layer of its own. Its
/// producers run against that layer, seeded from the state of the voices
/// they replace, while older producers keep reading and writing `primary`.
/// Once no older producer can touch the same slots the layer's regions are
/// copied back and the layer is released.
pub struct StateArena {
    primary: [f64; ARENA_SLOTS],
    layers: [Layer; HANDOVER_LAYERS],
}

impl StateArena {
    pub fn new() -> Self {
        Self {
            primary: [0.0; ARENA_SLOTS],
            layers: std::array::from_fn(|_| Layer {
                generation: None,
                slots: [0.0; ARENA_SLOTS],
            }),
        }
    }

    #[inline]
    pub fn primary(&self) -> &[f64] {
        &self.primary
    }

    /// Read a primary slot, `None` when out of range.
    #[inline]
    pub fn read(&self, slot: usize) -> Option<f64> {
        self.primary.get(slot).copied()
    }

    /// The handover layer of `generation`, if it has not committed yet.
    pub fn handover(&self, generation: Generation) -> Option<&[f64]> {
        self.layers
            .iter()
            .find(|l| l.generation == Some(generation))
            .map(|l| &l.slots[..])
    }

    /// Whether any generation is still running against its own layer.
    #[inline]
    pub fn has_open_layers(&self) -> bool {
        self.layers.iter().any(|l| l.generation.is_some())
    }

    /// Oldest generation that still owns a layer.
    pub fn oldest_layer(&self) -> Option<Generation> {
        self.layers.iter().filter_map(|l| l.generation).min()
    }

    /// The buffer producers of `generation` run against: its layer while
    /// one is open, otherwise the primary arena.
    #[inline]
    pub fn buffer_mut(&mut self, generation: Generation) -> &mut [f64] {
        match self
            .layers
            .iter()
            .position(|l| l.generation == Some(generation))
        {
            Some(index) => &mut self.layers[index].slots,
            None => &mut self.primary,
        }
    }

    #[inline]
    fn buffer(&self, generation: Generation) -> &[f64] {
        self.handover(generation).unwrap_or(&self.primary)
    }

    /// Claim a cleared layer for `generation`. Returns `false` when every
    /// layer is in use.
    pub fn open_layer(&mut self, generation: Generation) -> bool {
        if self.handover(generation).is_some() {
            return true;
        }
        match self.layers.iter_mut().find(|l| l.generation.is_none()) {
            Some(layer) => {
                layer.generation = Some(generation);
                layer.slots.fill(0.0);
                true
            }
            None => false,
        }
    }

    /// Prepare `region` of the layer of `generation` for a producer taking
    /// over from one that ran in `from` (its generation and slots).
    ///
    /// The old state is carried slot by slot from the start of both
    /// regions, so a label keeps its state when its region moves. Slots
    /// with nothing to carry, and regions of new labels, start at zero.
    pub fn seed(
        &mut self,
        generation: Generation,
        region: Range<usize>,
        from: Option<(Generation, Range<usize>)>,
    ) {
        let region = clip(region);
        let mut carried = [0.0; ARENA_SLOTS];
        let mut count = 0;
        if let Some((source, slots)) = from {
            let slots = clip(slots);
            count = slots.len().min(region.len());
            carried[..count].copy_from_slice(&self.buffer(source)[slots.start..slots.start + count]);
        }

        let Some(layer) = self
            .layers
            .iter_mut()
            .find(|l| l.generation == Some(generation))
        else {
            return;
        };
        layer.slots[region.start..region.start + count].copy_from_slice(&carried[..count]);
        layer.slots[region.start + count..region.end].fill(0.0);
    }

    /// Copy `region` from the layer of `generation` back into the primary
    /// arena.
    ///
    /// This is the moment state ownership passes from the old producers to
    /// the new ones. Slots outside the committed regions keep whatever the
    /// primary arena holds.
    pub fn commit_region(&mut self, generation: Generation, region: Range<usize>) {
        let region = clip(region);
        if let Some(layer) = self
            .layers
            .iter()
            .find(|l| l.generation == Some(generation))
        {
            self.primary[region.clone()].copy_from_slice(&layer.slots[region]);
        }
    }

    /// Release the layer of `generation`; its producers run against the
    /// primary arena from now on.
    pub fn close_layer(&mut self, generation: Generation) {
        for layer in &mut self.layers {
            if layer.generation == Some(generation) {
                layer.generation = None;
            }
        }
    }
}

impl Default for StateArena {
    fn default() -> Self {
        Self::new()
    }
}

fn clip(region: Range<usize>) -> Range<usize> {
    let end = region.end.min(ARENA_SLOTS);
    region.start.min(end)..end
}

// ═══════════════════════════════════════════════════════════════════
// Slot allocation
// ═══════════════════════════════════════════════════════════════════

/// Raised when a graph asks for more slots than the arena has left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("state arena exhausted: {requested} slot(s) requested, {available} left")]
pub struct ArenaExhausted {
    pub requested: usize,
    pub available: usize,
}

/// Deterministic bump allocator over arena slots.
///
/// One allocator is threaded through a whole recompilation pass and reset
/// to `ARENA_BASE` at the start of every pass, so the same source text
/// always lands on the same slots.
#[derive(Debug, Clone)]
pub struct SlotAllocator {
    next: usize,
}

impl SlotAllocator {
    pub fn new() -> Self {
        Self { next: ARENA_BASE }
    }

    /// Rewind to the fixed base slot.
    pub fn reset(&mut self) {
        self.next = ARENA_BASE;
    }

    /// Claim `count` consecutive slots, returning the first one.
    pub fn claim(&mut self, count: usize) -> Result<usize, ArenaExhausted> {
        let available = ARENA_SLOTS - self.next;
        if count > available {
            return Err(ArenaExhausted {
                requested: count,
                available,
            });
        }
        let first = self.next;
        self.next += count;
        Ok(first)
    }

    /// Current position, usable with [`SlotAllocator::rollback`].
    #[inline]
    pub fn mark(&self) -> usize {
        self.next
    }

    /// Release everything claimed since `mark`.
    pub fn rollback(&mut self, mark: usize) {
        debug_assert!(mark <= self.next);
        self.next = mark.min(self.next);
    }

    /// One past the last claimed slot.
    #[inline]
    pub fn claimed(&self) -> usize {
        self.next
    }
}

impl Default for SlotAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the allocator at the end of a recompilation pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArenaLayout {
    /// One past the highest slot claimed by the pass.
    pub extent: usize,

    /// Slots claimed by each successfully compiled label, in source order.
    pub regions: Vec<(Label, Range<usize>)>,
}

impl ArenaLayout {
    pub fn region(&self, label: &str) -> Option<Range<usize>> {
        self.regions
            .iter()
            .find(|(l, _)| &**l == label)
            .map(|(_, r)| r.clone())
    }
}
