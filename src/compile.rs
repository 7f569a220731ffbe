// src/compile.rs
//
// Compiles Signal (declarative) into Program (runtime).
//
// This is the bridge between the definition language and the engine's
// executable producers. Every piece of persistent state a signal needs is
// placed in arena slots claimed from the pass-wide `SlotAllocator`.

use crate::arena::{ArenaExhausted, SlotAllocator};
use crate::producer::{Op, Producer, Program};
use crate::script::{BinaryOp, Signal};

/// Deepest evaluation stack a compiled program may need.
pub const MAX_STACK_DEPTH: usize = 64;

/// Error during signal compilation. Scoped to the label being compiled.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("frequency {freq} Hz is outside 0..={nyquist} Hz")]
    FrequencyOutOfRange { freq: f64, nyquist: f64 },

    #[error("lowpass cutoff {cutoff} Hz must be above 0 and below {nyquist} Hz")]
    CutoffOutOfRange { cutoff: f64, nyquist: f64 },

    #[error("slew time must be a positive number of milliseconds, got {0}")]
    InvalidSlewTime(f64),

    #[error("constant expression evaluates to {0}")]
    NonFiniteConstant(f64),

    #[error("division by constant zero")]
    DivisionByZero,

    #[error("expression needs more than {limit} stack entries")]
    TooDeep { limit: usize },

    #[error(transparent)]
    Arena(#[from] ArenaExhausted),

    #[error("more than {limit} voices defined")]
    TooManyVoices { limit: usize },
}

/// Result of signal compilation.
pub type CompileResult<T> = Result<T, CompileError>;

/// Turns signal descriptions into producers for one sample rate.
#[derive(Debug, Clone, Copy)]
pub struct Compiler {
    sample_rate: f64,
}

impl Compiler {
    pub fn new(sample_rate: f64) -> Self {
        Self { sample_rate }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Compile `signal` into a boxed producer.
    pub fn compile(
        &self,
        signal: &Signal,
        slots: &mut SlotAllocator,
    ) -> CompileResult<Box<dyn Producer>> {
        Ok(Box::new(self.compile_program(signal, slots)?))
    }

    /// Compile `signal` into a postfix program.
    ///
    /// This function:
    /// 1. Claims every state slot the signal needs as one region
    /// 2. Validates constant parameters (frequencies, cutoffs, slew times)
    /// 3. Emits the instruction tape, folding constant subtrees
    ///
    /// On failure the allocator is rolled back to where it was, so a broken
    /// label does not shift the slots of the labels after it.
    pub fn compile_program(
        &self,
        signal: &Signal,
        slots: &mut SlotAllocator,
    ) -> CompileResult<Program> {
        let mark = slots.mark();
        let base = slots.claim(signal.state_slots())?;

        let mut emitter = Emitter {
            ops: Vec::new(),
            depth: 0,
            max_depth: 0,
            next_slot: base,
            sample_rate: self.sample_rate,
            nyquist: self.sample_rate / 2.0,
        };

        if let Err(e) = emitter.emit(signal) {
            slots.rollback(mark);
            return Err(e);
        }
        debug_assert_eq!(emitter.next_slot, slots.claimed());

        Ok(Program::new(emitter.ops, emitter.max_depth, self.sample_rate))
    }
}

/// Slew coefficient for a time constant of `millis` at `sample_rate`.
pub fn slew_coefficient(millis: f64, sample_rate: f64) -> f64 {
    1.0 - (-1.0 / (millis * 0.001 * sample_rate)).exp()
}

struct Emitter {
    ops: Vec<Op>,
    depth: usize,
    max_depth: usize,
    next_slot: usize,
    sample_rate: f64,
    nyquist: f64,
}

impl Emitter {
    fn slot(&mut self) -> usize {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    fn push(&mut self, op: Op) -> CompileResult<()> {
        // Net stack effect of each instruction.
        match op {
            Op::Const(_) | Op::Noise { .. } => {
                self.depth += 1;
                if self.depth > MAX_STACK_DEPTH {
                    return Err(CompileError::TooDeep {
                        limit: MAX_STACK_DEPTH,
                    });
                }
                self.max_depth = self.max_depth.max(self.depth);
            }
            Op::Sine { .. } | Op::Phasor { .. } | Op::Square { .. } | Op::Slew { .. } => {}
            Op::Lowpass { .. } | Op::Add | Op::Sub | Op::Mul | Op::Div => self.depth -= 1,
        }
        self.ops.push(op);
        Ok(())
    }

    fn frequency(&self, freq: &Signal) -> CompileResult<()> {
        if let Some(freq) = freq.constant_value() {
            if !(0.0..=self.nyquist).contains(&freq) {
                return Err(CompileError::FrequencyOutOfRange {
                    freq,
                    nyquist: self.nyquist,
                });
            }
        }
        Ok(())
    }

    fn emit(&mut self, signal: &Signal) -> CompileResult<()> {
        if let Some(value) = signal.constant_value() {
            if !value.is_finite() {
                return Err(CompileError::NonFiniteConstant(value));
            }
            return self.push(Op::Const(value));
        }

        match signal {
            Signal::Constant(v) => self.push(Op::Const(*v)),
            Signal::Sine(freq) | Signal::Saw(freq) | Signal::Square(freq) => {
                self.frequency(freq)?;
                let phase = self.slot();
                self.emit(freq)?;
                self.push(match signal {
                    Signal::Sine(_) => Op::Sine { phase },
                    Signal::Saw(_) => Op::Phasor { phase },
                    _ => Op::Square { phase },
                })
            }
            Signal::Noise => {
                let seed = self.slot();
                self.push(Op::Noise { seed })
            }
            Signal::Lowpass { input, cutoff } => {
                if let Some(c) = cutoff.constant_value() {
                    if !(c > 0.0 && c < self.nyquist) {
                        return Err(CompileError::CutoffOutOfRange {
                            cutoff: c,
                            nyquist: self.nyquist,
                        });
                    }
                }
                let history = self.slot();
                self.emit(input)?;
                self.emit(cutoff)?;
                self.push(Op::Lowpass { history })
            }
            Signal::Slew { input, millis } => {
                if !(millis.is_finite() && *millis > 0.0) {
                    return Err(CompileError::InvalidSlewTime(*millis));
                }
                let value = self.slot();
                self.emit(input)?;
                let coeff = slew_coefficient(*millis, self.sample_rate);
                self.push(Op::Slew { value, coeff })
            }
            Signal::Binary { op, lhs, rhs } => {
                if *op == BinaryOp::Div && rhs.constant_value() == Some(0.0) {
                    return Err(CompileError::DivisionByZero);
                }
                self.emit(lhs)?;
                self.emit(rhs)?;
                self.push(match op {
                    BinaryOp::Add => Op::Add,
                    BinaryOp::Sub => Op::Sub,
                    BinaryOp::Mul => Op::Mul,
                    BinaryOp::Div => Op::Div,
                })
            }
            Signal::Mix(inputs) => {
                let Some((first, rest)) = inputs.split_first() else {
                    return self.push(Op::Const(0.0));
                };
                self.emit(first)?;
                for input in rest {
                    self.emit(input)?;
                    self.push(Op::Add)?;
                }
                Ok(())
            }
        }
    }
}
