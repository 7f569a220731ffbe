// src/pipeline.rs
//
// Recompilation pipeline: source text -> Patch.
//
// Runs on the control thread and may take as long as it needs. Every pass
//
// 1. parses the whole source (any error rejects the submission),
// 2. compiles every definition against one freshly reset slot allocator,
//    isolating failures to their label (a failed label is rebuilt from its
//    last good definition so it still owns slots of the new layout; one
//    that cannot be rebuilt is dropped),
// 3. captures the resulting layout and generation id,
// 4. packages everything into a single `Patch` for the engine.

use std::collections::HashMap;
use std::ops::Range;

use crate::arena::{ArenaLayout, Generation, SlotAllocator};
use crate::compile::{CompileError, Compiler};
use crate::config::EngineConfig;
use crate::patch::{Patch, Update};
use crate::producer::Producer;
use crate::script::{self, ParseError, Signal};
use crate::voice::{BoundProducer, Label};

/// A label that failed to compile. Its existing voice, if any, keeps
/// playing.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelError {
    pub label: Label,
    pub line: usize,
    pub error: CompileError,
}

impl std::fmt::Display for LabelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}' (line {}): {}", self.label, self.line, self.error)
    }
}

/// What one submission did.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubmitReport {
    pub generation: Generation,

    /// Labels compiled in this pass, in source order.
    pub applied: Vec<Label>,

    /// Labels whose compiled form is identical to the previous pass.
    pub unchanged: Vec<Label>,

    pub errors: Vec<LabelError>,

    /// Labels defined more than once; the last definition won.
    pub redefined: Vec<Label>,

    pub layout: ArenaLayout,
}

/// A compiled pass, ready to hand to the engine.
#[derive(Debug)]
pub struct Recompiled {
    pub patch: Box<Patch>,
    pub report: SubmitReport,
}

pub struct Pipeline {
    compiler: Compiler,
    slots: SlotAllocator,
    next_generation: Generation,
    max_voices: usize,

    /// Definitions and regions of the last pass, for change detection.
    history: HashMap<Label, (Signal, Range<usize>)>,

    /// `history` as it was before the last pass, until the next one.
    superseded: Option<HashMap<Label, (Signal, Range<usize>)>>,
}

impl Pipeline {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            compiler: Compiler::new(config.sample_rate),
            slots: SlotAllocator::new(),
            next_generation: 0,
            max_voices: config.max_voices,
            history: HashMap::new(),
            superseded: None,
        }
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// Generation id the next successful pass will get.
    pub fn next_generation(&self) -> Generation {
        self.next_generation
    }

    /// Go back to the records of the pass before the last one. Use this
    /// when the last patch never reached the engine, so change detection
    /// and fallbacks keep matching what the engine actually runs.
    pub fn revert(&mut self) {
        if let Some(previous) = self.superseded.take() {
            self.history = previous;
        }
    }

    /// Forget one label, e.g. after its voice was removed by the engine.
    pub fn forget(&mut self, label: &str) {
        self.history.remove(label);
        if let Some(previous) = self.superseded.as_mut() {
            previous.remove(label);
        }
    }

    pub fn recompile(&mut self, source: &str) -> Result<Recompiled, ParseError> {
        let script = script::parse(source)?;

        let generation = self.next_generation;
        self.next_generation += 1;
        self.slots.reset();

        let mut patch = Box::new(Patch::new(generation, ArenaLayout::default()));
        let mut report = SubmitReport {
            generation,
            redefined: script.redefined.clone(),
            ..Default::default()
        };
        let mut history = HashMap::with_capacity(script.definitions.len());

        for (index, def) in script.definitions.into_iter().enumerate() {
            // Labels beyond the cap are not desired: their voices are
            // removed rather than left in slots the new layout reassigns.
            if index >= self.max_voices {
                report.errors.push(LabelError {
                    label: def.label,
                    line: def.line,
                    error: CompileError::TooManyVoices {
                        limit: self.max_voices,
                    },
                });
                continue;
            }

            let start = self.slots.mark();
            let (producer, signal, failed) = match self.compiler.compile(&def.signal, &mut self.slots) {
                Ok(producer) => (producer, def.signal, false),
                Err(error) => {
                    log::debug!("generation {generation}: '{}' failed: {error}", def.label);
                    report.errors.push(LabelError {
                        label: def.label.clone(),
                        line: def.line,
                        error,
                    });
                    // Without a fallback the label owns no slots, so a voice
                    // still running for it is dropped with it.
                    match self.fallback(&def.label) {
                        Some((producer, signal)) => (producer, signal, true),
                        None => continue,
                    }
                }
            };
            let region = start..self.slots.claimed();

            let unchanged = self
                .history
                .get(&def.label)
                .is_some_and(|(previous, slots)| *previous == signal && *slots == region);
            if !failed {
                report.applied.push(def.label.clone());
                if unchanged {
                    report.unchanged.push(def.label.clone());
                }
            }

            report.layout.regions.push((def.label.clone(), region.clone()));
            patch.desired.insert(def.label.clone());
            patch.updates.push(Update {
                label: def.label.clone(),
                producer: BoundProducer::new(producer, generation, region.clone()),
                unchanged,
            });
            history.insert(def.label, (signal, region));
        }

        report.layout.extent = self.slots.claimed();
        patch.layout = report.layout.clone();
        self.superseded = Some(std::mem::replace(&mut self.history, history));

        log::debug!(
            "generation {generation}: {} compiled, {} failed, {} of {} slots",
            report.applied.len(),
            report.errors.len(),
            report.layout.extent,
            crate::arena::ARENA_SLOTS,
        );

        Ok(Recompiled { patch, report })
    }

    /// Recompile the last good definition of a label that failed in this
    /// pass, so its voice keeps sounding the same while owning slots of the
    /// new layout.
    fn fallback(&mut self, label: &Label) -> Option<(Box<dyn Producer>, Signal)> {
        let (signal, _) = self.history.get(label)?;
        let producer = self.compiler.compile(signal, &mut self.slots).ok()?;
        Some((producer, signal.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pipeline() -> Pipeline {
        Pipeline::new(&EngineConfig::default())
    }

    fn names(labels: &[Label]) -> Vec<&str> {
        labels.iter().map(|l| &**l).collect()
    }

    const SOURCE: &str = "
        wave('a', sin(220) |> lowpass(900));
        wave('b', noise() * 0.1);
        wave('c', saw(110) + square(55));
    ";

    #[test]
    fn same_text_yields_the_same_layout() {
        let mut first = pipeline();
        let mut second = pipeline();
        let a = first.recompile(SOURCE).unwrap().report;
        let again = first.recompile(SOURCE).unwrap().report;
        let fresh = second.recompile(SOURCE).unwrap().report;

        assert_eq!(a.layout, again.layout);
        assert_eq!(a.layout, fresh.layout);
        assert_eq!(a.layout.region("a"), Some(0..2));
        assert_eq!(a.layout.region("b"), Some(2..3));
        assert_eq!(a.layout.region("c"), Some(3..5));
        assert_eq!(a.layout.extent, 5);
        assert_eq!(again.generation, a.generation + 1);
    }

    #[test]
    fn compile_error_is_isolated_to_its_label() {
        let mut pipeline = pipeline();
        let Recompiled { patch, report } = pipeline
            .recompile("wave('a', sin(1)); wave('b', sin(1e9)); wave('c', sin(3));")
            .unwrap();

        assert_eq!(names(&report.applied), vec!["a", "c"]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(&*report.errors[0].label, "b");
        assert_eq!(report.errors[0].line, 1);
        assert!(matches!(
            report.errors[0].error,
            CompileError::FrequencyOutOfRange { .. }
        ));

        // With no earlier definition to fall back on, `b` owns nothing and
        // its rolled-back claims do not shift `c`.
        assert!(!patch.desired.contains("b"));
        assert_eq!(report.layout.region("c"), Some(1..2));
        assert_eq!(patch.updates.len(), 2);
    }

    #[test]
    fn failed_label_falls_back_to_its_last_good_definition() {
        let mut pipeline = pipeline();
        pipeline
            .recompile("wave('a', sin(1)); wave('b', sin(2)); wave('c', sin(3));")
            .unwrap();

        let Recompiled { patch, report } = pipeline
            .recompile("wave('a', sin(1)); wave('b', sin(1e9)); wave('c', sin(4));")
            .unwrap();

        assert_eq!(names(&report.applied), vec!["a", "c"]);
        assert_eq!(report.layout.region("b"), Some(1..2));
        assert_eq!(report.layout.region("c"), Some(2..3));

        let b = patch.updates.iter().find(|u| &*u.label == "b").unwrap();
        assert!(b.unchanged);
        assert_eq!(b.producer.slots(), 1..2);
        assert!(patch.desired.contains("b"));

        // Fixing `b` later is a change against the fallback, not a no-op.
        let report = pipeline
            .recompile("wave('a', sin(1)); wave('b', sin(5)); wave('c', sin(4));")
            .unwrap()
            .report;
        assert_eq!(names(&report.unchanged), vec!["a", "c"]);
    }

    #[test]
    fn parse_error_produces_no_patch_and_no_generation() {
        let mut pipeline = pipeline();
        assert!(pipeline.recompile("wave('a', sin(1)").is_err());
        assert_eq!(pipeline.next_generation(), 0);
    }

    #[test]
    fn labels_beyond_the_voice_limit_are_rejected() {
        let mut pipeline = Pipeline::new(&EngineConfig {
            max_voices: 2,
            ..Default::default()
        });
        let report = pipeline
            .recompile("wave('a', 0.1) wave('b', 0.1) wave('c', 0.1)")
            .unwrap()
            .report;
        assert_eq!(names(&report.applied), vec!["a", "b"]);
        assert_eq!(
            report.errors[0].error,
            CompileError::TooManyVoices { limit: 2 }
        );
    }

    #[test]
    fn unchanged_definitions_are_flagged() {
        let mut pipeline = pipeline();
        pipeline.recompile(SOURCE).unwrap();

        let edited = SOURCE.replace("noise() * 0.1", "noise() * 0.2");
        let Recompiled { patch, report } = pipeline.recompile(&edited).unwrap();
        assert_eq!(names(&report.unchanged), vec!["a", "c"]);
        let flags: Vec<bool> = patch.updates.iter().map(|u| u.unchanged).collect();
        assert_eq!(flags, vec![true, false, true]);

        pipeline.forget("a");
        let report = pipeline.recompile(&edited).unwrap().report;
        assert_eq!(names(&report.unchanged), vec!["b", "c"]);
    }

    #[test]
    fn revert_restores_the_records_the_engine_runs() {
        let mut pipeline = pipeline();
        pipeline
            .recompile("wave('a', sin(1)); wave('b', sin(2)); wave('c', sin(3));")
            .unwrap();
        // This pass is never delivered.
        pipeline
            .recompile("wave('a', sin(1)); wave('b', sin(7)); wave('c', sin(3));")
            .unwrap();
        pipeline.revert();

        let Recompiled { patch, report } = pipeline
            .recompile("wave('a', sin(1)); wave('b', sin(1e9)); wave('c', sin(4));")
            .unwrap();
        assert_eq!(report.layout.region("b"), Some(1..2));
        assert_eq!(report.layout.region("c"), Some(2..3));
        // `b` falls back to what the engine still plays, not the lost edit.
        let b = patch.updates.iter().find(|u| &*u.label == "b").unwrap();
        assert!(b.unchanged);
    }

    #[test]
    fn labels_beyond_the_cap_are_dropped() {
        let mut pipeline = Pipeline::new(&EngineConfig {
            max_voices: 2,
            ..Default::default()
        });
        pipeline.recompile("wave('a', sin(1)) wave('b', sin(2))").unwrap();
        let Recompiled { patch, report } = pipeline
            .recompile("wave('z', sin(9)) wave('a', sin(1)) wave('b', sin(2))")
            .unwrap();
        assert_eq!(report.layout.region("a"), Some(1..2));
        // `b`'s old slot now belongs to `a`, so `b` cannot keep playing.
        assert!(!patch.desired.contains("b"));
        assert_eq!(report.errors[0].error, CompileError::TooManyVoices { limit: 2 });
    }

    #[test]
    fn shifted_regions_count_as_changed() {
        let mut pipeline = pipeline();
        pipeline.recompile("wave('a', 0.5) wave('b', sin(100))").unwrap();
        let report = pipeline
            .recompile("wave('a', sin(50)) wave('b', sin(100))")
            .unwrap()
            .report;
        assert!(report.unchanged.is_empty());
    }
}
