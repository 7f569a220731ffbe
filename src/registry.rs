// src/registry.rs

use std::collections::HashSet;

use crate::voice::{BoundProducer, Displaced, Label, Voice};

/// Outcome of [`Registry::upsert`].
#[derive(Debug)]
pub enum Upsert {
    /// A new voice was created.
    Inserted,

    /// An existing voice got a new producer. Anything it no longer needs
    /// is handed back so it can be dropped off the audio thread.
    Updated(Displaced),
}

/// The set of active voices, keyed by label.
///
/// Responsibilities:
/// - keep at most one voice per label
/// - install new producers (with crossfade) on existing voices
/// - drop voices that a recompilation no longer defines
///
/// Does NOT:
/// - compile anything
/// - allocate during processing, as long as it stays within the capacity
///   it was created with
///
/// Iteration order is unspecified.
pub struct Registry {
    voices: Vec<Voice>,
}

impl Registry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            voices: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.voices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.voices.capacity()
    }

    pub fn get(&self, label: &str) -> Option<&Voice> {
        self.voices.iter().find(|v| &**v.label() == label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.get(label).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Voice> {
        self.voices.iter()
    }

    /// Number of voices currently crossfading.
    pub fn fading_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_fading()).count()
    }

    /// Insert a voice for `label`, or replace the producer of the existing
    /// one with a crossfade of `fade_frames`.
    pub fn upsert(&mut self, label: Label, producer: BoundProducer, fade_frames: u32) -> Upsert {
        match self.voices.iter_mut().find(|v| *v.label() == label) {
            Some(voice) => Upsert::Updated(voice.replace(producer, fade_frames)),
            None => {
                self.voices.push(Voice::new(label, producer));
                Upsert::Inserted
            }
        }
    }

    /// Remove a voice immediately, abandoning any crossfade in flight.
    pub fn remove(&mut self, label: &str) -> Option<Voice> {
        let index = self.voices.iter().position(|v| &**v.label() == label)?;
        Some(self.voices.swap_remove(index))
    }

    /// Remove every voice whose label is not in `desired`, passing each
    /// removed voice to `retire`.
    pub fn reconcile<F>(&mut self, desired: &HashSet<Label>, mut retire: F)
    where
        F: FnMut(Voice),
    {
        let mut index = self.voices.len();
        while index > 0 {
            index -= 1;
            if !desired.contains(&**self.voices[index].label()) {
                retire(self.voices.swap_remove(index));
            }
        }
    }

    #[inline]
    pub(crate) fn voices_mut(&mut self) -> &mut [Voice] {
        &mut self.voices
    }

    #[inline]
    pub(crate) fn remove_at(&mut self, index: usize) -> Voice {
        self.voices.swap_remove(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::RuntimeError;
    use std::sync::Arc;

    fn constant(value: f64, generation: u64) -> BoundProducer {
        BoundProducer::new(
            Box::new(move |_: &mut [f64]| Ok::<f64, RuntimeError>(value)),
            generation,
            0..0,
        )
    }

    fn labels(registry: &Registry) -> Vec<String> {
        let mut labels: Vec<String> = registry.iter().map(|v| v.label().to_string()).collect();
        labels.sort();
        labels
    }

    fn set(labels: &[&str]) -> HashSet<Label> {
        labels.iter().map(|l| Arc::from(*l)).collect()
    }

    #[test]
    fn upsert_then_reconcile_keeps_exactly_that_voice() {
        let mut registry = Registry::with_capacity(4);
        assert!(matches!(
            registry.upsert("tone".into(), constant(0.5, 7), 100),
            Upsert::Inserted
        ));

        let mut retired = 0;
        registry.reconcile(&set(&["tone"]), |_| retired += 1);

        assert_eq!(retired, 0);
        assert_eq!(registry.len(), 1);
        let voice = registry.get("tone").unwrap();
        assert_eq!(voice.current().generation(), 7);
        assert!(!voice.is_fading());
    }

    #[test]
    fn upsert_on_existing_label_crossfades() {
        let mut registry = Registry::with_capacity(4);
        registry.upsert("tone".into(), constant(0.5, 0), 100);
        let outcome = registry.upsert("tone".into(), constant(0.7, 1), 100);

        assert!(matches!(outcome, Upsert::Updated(ref d) if d.is_empty()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.fading_count(), 1);
        assert_eq!(registry.get("tone").unwrap().fade_duration(), 100);
    }

    #[test]
    fn reconcile_drops_labels_outside_the_desired_set() {
        let mut registry = Registry::with_capacity(4);
        for label in ["a", "b", "c"] {
            registry.upsert(label.into(), constant(0.1, 0), 10);
        }

        let mut retired = Vec::new();
        registry.reconcile(&set(&["a", "c"]), |voice| retired.push(voice.label().to_string()));

        assert_eq!(labels(&registry), vec!["a", "c"]);
        assert_eq!(retired, vec!["b"]);
    }

    #[test]
    fn remove_abandons_a_crossfade() {
        let mut registry = Registry::with_capacity(4);
        registry.upsert("a".into(), constant(0.1, 0), 10);
        registry.upsert("a".into(), constant(0.2, 1), 10);

        let removed = registry.remove("a").unwrap();
        assert!(removed.is_fading());
        assert!(registry.is_empty());
        assert!(registry.remove("a").is_none());
    }

    #[test]
    fn upserts_within_capacity_do_not_reallocate() {
        let mut registry = Registry::with_capacity(8);
        let capacity = registry.capacity();
        for i in 0..8 {
            registry.upsert(Arc::from(format!("v{i}")), constant(0.0, 0), 10);
        }
        assert_eq!(registry.capacity(), capacity);
    }
}
