// src/producer.rs

use std::f64::consts::TAU;

/// Failure raised by a producer while rendering a frame.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("produced a non-finite sample ({0})")]
    NonFinite(f64),

    #[error("arena slot {0} is out of range")]
    SlotOutOfRange(usize),

    #[error("evaluation stack underflow")]
    StackUnderflow,
}

/// A compiled unit that yields one sample per call.
///
/// Producers:
/// - do NOT own persistent state; it lives in the arena they are handed
/// - do NOT allocate
/// - ONLY compute the next sample
///
/// The arena is passed on every call so the engine decides which buffer a
/// producer sees (primary or handover).
pub trait Producer: Send {
    fn next(&mut self, arena: &mut [f64]) -> Result<f64, RuntimeError>;
}

/// Closures make convenient ad-hoc producers.
impl<F> Producer for F
where
    F: FnMut(&mut [f64]) -> Result<f64, RuntimeError> + Send,
{
    #[inline]
    fn next(&mut self, arena: &mut [f64]) -> Result<f64, RuntimeError> {
        self(arena)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Compiled programs
// ═══════════════════════════════════════════════════════════════════

/// Seed used when a noise slot still holds zero.
const NOISE_SEED: u32 = 0x9E37_79B9;

/// One instruction of a compiled signal graph.
///
/// Programs are postfix: operands are pushed before the operator that
/// consumes them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    Const(f64),

    /// Pops frequency, pushes `sin(phase)`.
    Sine { phase: usize },

    /// Pops frequency, pushes the phase itself (0..1).
    Phasor { phase: usize },

    /// Pops frequency, pushes 1 while `phase <= 0.5`, else 0.
    Square { phase: usize },

    /// Pushes uniform noise in 0..1 (xorshift32 state in `seed`).
    Noise { seed: usize },

    /// Pops cutoff then input, pushes the one-pole lowpass output.
    Lowpass { history: usize },

    /// Pops a target, pushes the value slewed toward it.
    Slew { value: usize, coeff: f64 },

    Add,
    Sub,
    Mul,
    Div,
}

/// A producer backed by a flat instruction tape.
pub struct Program {
    ops: Box<[Op]>,
    stack: Vec<f64>,
    depth: usize,
    inv_sample_rate: f64,
}

impl Program {
    /// `depth` is the maximum stack height the tape reaches; the stack is
    /// preallocated so evaluation never grows it.
    pub fn new(ops: Vec<Op>, depth: usize, sample_rate: f64) -> Self {
        Self {
            ops: ops.into_boxed_slice(),
            stack: Vec::with_capacity(depth),
            depth,
            inv_sample_rate: 1.0 / sample_rate,
        }
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("ops", &self.ops)
            .field("depth", &self.depth)
            .finish()
    }
}

#[inline]
fn pop(stack: &mut Vec<f64>) -> Result<f64, RuntimeError> {
    stack.pop().ok_or(RuntimeError::StackUnderflow)
}

#[inline]
fn slot(arena: &mut [f64], index: usize) -> Result<&mut f64, RuntimeError> {
    arena
        .get_mut(index)
        .ok_or(RuntimeError::SlotOutOfRange(index))
}

/// Advance a 0..1 phase in place, returning the value before the step.
#[inline]
fn step_phase(phase: &mut f64, increment: f64) -> f64 {
    let current = *phase;
    *phase = (current + increment).rem_euclid(1.0);
    current
}

impl Producer for Program {
    fn next(&mut self, arena: &mut [f64]) -> Result<f64, RuntimeError> {
        let stack = &mut self.stack;
        stack.clear();

        for op in self.ops.iter() {
            let value = match *op {
                Op::Const(v) => v,
                Op::Sine { phase } => {
                    let inc = pop(stack)? * self.inv_sample_rate;
                    (step_phase(slot(arena, phase)?, inc) * TAU).sin()
                }
                Op::Phasor { phase } => {
                    let inc = pop(stack)? * self.inv_sample_rate;
                    step_phase(slot(arena, phase)?, inc)
                }
                Op::Square { phase } => {
                    let inc = pop(stack)? * self.inv_sample_rate;
                    if step_phase(slot(arena, phase)?, inc) <= 0.5 {
                        1.0
                    } else {
                        0.0
                    }
                }
                Op::Noise { seed } => {
                    let state = slot(arena, seed)?;
                    let mut x = *state as u32;
                    if x == 0 {
                        x = NOISE_SEED;
                    }
                    x ^= x << 13;
                    x ^= x >> 17;
                    x ^= x << 5;
                    *state = f64::from(x);
                    f64::from(x) / f64::from(u32::MAX)
                }
                Op::Lowpass { history } => {
                    let cutoff = pop(stack)?.max(0.0);
                    let input = pop(stack)?;
                    let a = 1.0 - (-TAU * cutoff * self.inv_sample_rate).exp();
                    let y = slot(arena, history)?;
                    *y += a * (input - *y);
                    *y
                }
                Op::Slew { value, coeff } => {
                    let target = pop(stack)?;
                    let y = slot(arena, value)?;
                    *y += coeff * (target - *y);
                    *y
                }
                Op::Add => {
                    let rhs = pop(stack)?;
                    pop(stack)? + rhs
                }
                Op::Sub => {
                    let rhs = pop(stack)?;
                    pop(stack)? - rhs
                }
                Op::Mul => {
                    let rhs = pop(stack)?;
                    pop(stack)? * rhs
                }
                Op::Div => {
                    let rhs = pop(stack)?;
                    pop(stack)? / rhs
                }
            };
            stack.push(value);
        }

        let sample = pop(stack)?;
        if sample.is_finite() {
            Ok(sample)
        } else {
            Err(RuntimeError::NonFinite(sample))
        }
    }
}
