// Declarative signal graph descriptions.
//
// A `Signal` is pure data: it says what to compute, not how. The compiler
// turns it into a `Program` bound to arena slots.

/// Arithmetic combining two signals sample by sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    #[inline]
    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Constant(f64),

    /// Sine oscillator driven by a frequency signal (Hz).
    Sine(Box<Signal>),

    /// Rising phasor 0..1.
    Saw(Box<Signal>),

    /// 1 for the first half of each period, 0 for the second.
    Square(Box<Signal>),

    /// Uniform noise 0..1.
    Noise,

    /// One-pole lowpass.
    Lowpass {
        input: Box<Signal>,
        cutoff: Box<Signal>,
    },

    /// Exponential approach toward `input` with a time constant in ms.
    Slew { input: Box<Signal>, millis: f64 },

    Binary {
        op: BinaryOp,
        lhs: Box<Signal>,
        rhs: Box<Signal>,
    },

    /// Sum of all inputs.
    Mix(Vec<Signal>),
}

impl Signal {
    pub fn binary(op: BinaryOp, lhs: Signal, rhs: Signal) -> Self {
        Signal::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// The value of this signal if it does not vary over time.
    pub fn constant_value(&self) -> Option<f64> {
        match self {
            Signal::Constant(v) => Some(*v),
            Signal::Binary { op, lhs, rhs } => {
                Some(op.apply(lhs.constant_value()?, rhs.constant_value()?))
            }
            Signal::Mix(inputs) => inputs
                .iter()
                .try_fold(0.0, |acc, s| Some(acc + s.constant_value()?)),
            _ => None,
        }
    }

    /// Number of nodes in the description tree.
    pub fn node_count(&self) -> usize {
        1 + match self {
            Signal::Constant(_) | Signal::Noise => 0,
            Signal::Sine(freq) | Signal::Saw(freq) | Signal::Square(freq) => freq.node_count(),
            Signal::Lowpass { input, cutoff } => input.node_count() + cutoff.node_count(),
            Signal::Slew { input, .. } => input.node_count(),
            Signal::Binary { lhs, rhs, .. } => lhs.node_count() + rhs.node_count(),
            Signal::Mix(inputs) => inputs.iter().map(Signal::node_count).sum(),
        }
    }

    /// Number of arena slots the compiled form of this signal claims.
    pub fn state_slots(&self) -> usize {
        match self {
            Signal::Constant(_) => 0,
            Signal::Noise => 1,
            Signal::Sine(freq) | Signal::Saw(freq) | Signal::Square(freq) => {
                1 + freq.state_slots()
            }
            Signal::Lowpass { input, cutoff } => 1 + input.state_slots() + cutoff.state_slots(),
            Signal::Slew { input, .. } => 1 + input.state_slots(),
            Signal::Binary { lhs, rhs, .. } => lhs.state_slots() + rhs.state_slots(),
            Signal::Mix(inputs) => inputs.iter().map(Signal::state_slots).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_constant_arithmetic() {
        let s = Signal::binary(
            BinaryOp::Mul,
            Signal::Constant(220.0),
            Signal::Mix(vec![Signal::Constant(1.0), Signal::Constant(0.5)]),
        );
        assert_eq!(s.constant_value(), Some(330.0));
        assert_eq!(Signal::Noise.constant_value(), None);
    }

    #[test]
    fn counts_state_slots() {
        let s = Signal::Lowpass {
            input: Box::new(Signal::Sine(Box::new(Signal::Slew {
                input: Box::new(Signal::Constant(440.0)),
                millis: 20.0,
            }))),
            cutoff: Box::new(Signal::Constant(800.0)),
        };
        assert_eq!(s.state_slots(), 3);
        assert_eq!(s.node_count(), 5);
    }
}
