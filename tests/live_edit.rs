// tests/live_edit.rs
//
// End-to-end edits through the bridge: submit on the control side, render
// on the audio side, observe through readback and the engine.

use std::f64::consts::TAU;

use pretty_assertions::assert_eq;
use wavelive::{
    EngineConfig, EngineEvent, EngineHandle, LiveSession, SubmitError, create_bridge,
};

const SR: f64 = 44_100.0;

fn bridge(crossfade_ms: f64) -> (LiveSession, EngineHandle) {
    create_bridge(&EngineConfig {
        sample_rate: SR,
        crossfade_ms,
        ..Default::default()
    })
    .unwrap()
}

fn render(engine: &mut EngineHandle, frames: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; frames];
    for block in out.chunks_mut(128) {
        engine.process_block(block);
    }
    out
}

fn generation_of(engine: &EngineHandle, label: &str) -> Option<u64> {
    engine
        .engine()
        .registry()
        .get(label)
        .map(|v| v.current().generation())
}

#[test]
fn tone_renders_a_440_hz_sine() {
    let (mut session, mut engine) = bridge(50.0);
    session
        .submit_definitions(r#"wave("tone", pipe(sin(440), gain(0.3)))"#)
        .unwrap();

    let out = render(&mut engine, 100);
    for (n, sample) in out.iter().enumerate() {
        let expected = 0.3 * (TAU * 440.0 * n as f64 / SR).sin();
        assert!(
            (f64::from(*sample) - expected).abs() < 1e-6,
            "frame {n}: {sample} != {expected}"
        );
    }
}

#[test]
fn edited_gain_crossfades_without_a_click() {
    let (mut session, mut engine) = bridge(50.0);
    session
        .submit_definitions("wave('tone', pipe(sin(440), gain(0.3)))")
        .unwrap();
    let before = render(&mut engine, 1000);

    session
        .submit_definitions("wave('tone', pipe(sin(440), gain(0.5)))")
        .unwrap();
    let fade_frames = EngineConfig::default().crossfade_frames() as usize;

    // The patch is applied at the next block boundary.
    let mut during = render(&mut engine, 1);
    assert!(engine.engine().registry().get("tone").unwrap().is_fading());
    during.extend(render(&mut engine, fade_frames - 2));
    assert!(engine.engine().registry().get("tone").unwrap().is_fading());
    during.extend(render(&mut engine, 1));
    assert!(!engine.engine().registry().get("tone").unwrap().is_fading());
    let after = render(&mut engine, 1000);

    let all: Vec<f32> = [before, during, after].concat();
    let max_step = all
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(0.0f32, f32::max);
    assert!(max_step < 0.05, "step of {max_step} between frames");

    let peak = all[all.len() - 200..]
        .iter()
        .fold(0.0f32, |p, s| p.max(s.abs()));
    assert!((peak - 0.5).abs() < 0.01);
}

#[test]
fn compile_error_leaves_other_labels_applied() {
    let (mut session, mut engine) = bridge(0.0);
    session
        .submit_definitions("wave('a', sin(100) * 0.1) wave('b', sin(200) * 0.1) wave('c', sin(300) * 0.1)")
        .unwrap();
    render(&mut engine, 16);

    let report = session
        .submit_definitions("wave('a', sin(110) * 0.1) wave('b', sin(1e9)) wave('c', sin(330) * 0.1)")
        .unwrap();
    render(&mut engine, 16);

    assert_eq!(report.errors.len(), 1);
    assert_eq!(&*report.errors[0].label, "b");
    // `b` keeps its slot; `c` does not slide into it.
    assert_eq!(report.layout.region("b"), Some(1..2));
    assert_eq!(report.layout.region("c"), Some(2..3));
    assert_eq!(generation_of(&engine, "a"), Some(1));
    assert_eq!(generation_of(&engine, "b"), Some(0));
    assert_eq!(generation_of(&engine, "c"), Some(1));
    assert_eq!(engine.active_voices(), 3);
}

#[test]
fn omitted_label_stops_sounding() {
    let (mut session, mut engine) = bridge(0.0);
    session
        .submit_definitions("wave('a', 0.25) wave('b', 0.5)")
        .unwrap();
    assert_eq!(render(&mut engine, 4), vec![0.75; 4]);

    session.submit_definitions("wave('a', 0.25)").unwrap();
    assert_eq!(render(&mut engine, 4), vec![0.25; 4]);
    assert_eq!(session.readback().active_voices, 1);
}

#[test]
fn parse_error_leaves_everything_running() {
    let (mut session, mut engine) = bridge(50.0);
    session.submit_definitions("wave('a', 0.25)").unwrap();
    render(&mut engine, 4);

    let err = session.submit_definitions("wave('a', 0.5").unwrap_err();
    assert!(matches!(err, SubmitError::Parse(_)));
    assert_eq!(render(&mut engine, 4), vec![0.25; 4]);
    assert_eq!(session.readback().applied_generation, Some(0));
}

#[test]
fn unchanged_voices_keep_running_through_an_edit() {
    let (mut session, mut engine) = bridge(50.0);
    session
        .submit_definitions("wave('a', saw(3)) wave('b', 0.1)")
        .unwrap();
    render(&mut engine, 64);

    let report = session
        .submit_definitions("wave('a', saw(3)) wave('b', 0.2)")
        .unwrap();
    assert_eq!(report.unchanged.len(), 1);
    render(&mut engine, 1);

    let a = engine.engine().registry().get("a").unwrap();
    assert!(!a.is_fading());
    assert_eq!(a.current().generation(), 0);
    assert!(engine.engine().registry().get("b").unwrap().is_fading());
}

#[test]
fn slew_glides_to_an_edited_target() {
    let (mut session, mut engine) = bridge(50.0);
    session
        .submit_definitions("wave('s', sin(slew(440, 50)) * 0.5)")
        .unwrap();
    render(&mut engine, SR as usize);

    // Slot 0 is the sine phase, slot 1 the slewed frequency.
    let settled = engine.engine().arena().read(1).unwrap();
    assert!((settled - 440.0).abs() < 1e-3);

    session
        .submit_definitions("wave('s', sin(slew(660, 50)) * 0.5)")
        .unwrap();
    let fade_frames = EngineConfig::default().crossfade_frames() as usize;
    render(&mut engine, fade_frames + 1);
    assert!(!engine.engine().is_handover_active());

    // One time constant in: about 63% of the way from 440 to 660.
    let gliding = engine.engine().arena().read(1).unwrap();
    assert!((560.0..600.0).contains(&gliding), "slewed to {gliding}");
}

#[test]
fn removed_voice_is_forgotten() {
    let (mut session, mut engine) = bridge(0.0);
    session.submit_definitions("wave('a', 0.5)").unwrap();
    render(&mut engine, 4);

    session.remove("a").unwrap();
    assert_eq!(render(&mut engine, 4), vec![0.0; 4]);

    // Resubmitting the same text brings the voice back.
    let report = session.submit_definitions("wave('a', 0.5)").unwrap();
    assert!(report.unchanged.is_empty());
    assert_eq!(render(&mut engine, 4), vec![0.5; 4]);
}

#[test]
fn events_report_each_applied_generation() {
    let (mut session, mut engine) = bridge(1.0);
    session.submit_definitions("wave('a', sin(100))").unwrap();
    render(&mut engine, 8);
    session.submit_definitions("wave('a', sin(200))").unwrap();
    render(&mut engine, 128);

    let events = session.poll_events();
    let applied: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::PatchApplied { generation, .. } => Some(*generation),
            _ => None,
        })
        .collect();
    assert_eq!(applied, vec![0, 1]);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, EngineEvent::HandoverCommitted { generation: 1 }))
    );
    assert!(!events.iter().any(|e| matches!(e, EngineEvent::Retired(_))));
}

#[test]
fn edit_during_a_fade_does_not_click() {
    let (mut session, mut engine) = bridge(50.0);
    session.submit_definitions("wave('tone', 0.1)").unwrap();
    render(&mut engine, 128);
    session.submit_definitions("wave('tone', 0.9)").unwrap();
    let mut out = render(&mut engine, 512);

    // Only `other` is new; the fade on `tone` must run to completion.
    let report = session
        .submit_definitions("wave('tone', 0.9) wave('other', 0)")
        .unwrap();
    assert_eq!(report.unchanged.len(), 1);
    out.extend(render(&mut engine, 4096));

    let max_step = out
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(0.0f32, f32::max);
    assert!(max_step < 0.01, "step of {max_step} between frames");
    assert!((out[out.len() - 1] - 0.9).abs() < 1e-6);
}

#[test]
fn inserting_a_label_ahead_keeps_slew_state() {
    let (mut session, mut engine) = bridge(50.0);
    session
        .submit_definitions("wave('s', slew(440, 5) * 0)")
        .unwrap();
    render(&mut engine, 4410);

    session
        .submit_definitions("wave('z', saw(3) * 0) wave('s', slew(440, 5) * 0)")
        .unwrap();
    render(&mut engine, 1);

    // `s` moved from slot 0 to slot 1 and picked up its settled value.
    let seen = engine.engine().arena().handover(1).unwrap()[1];
    assert!((seen - 440.0).abs() < 0.01, "slew restarted from {seen}");
}

#[test]
fn failed_label_after_a_full_queue_keeps_its_own_slots() {
    let (mut session, mut engine) = create_bridge(&EngineConfig {
        sample_rate: SR,
        command_capacity: 1,
        ..Default::default()
    })
    .unwrap();
    session
        .submit_definitions("wave('a', sin(100) * 0.1) wave('b', sin(200) * 0.1) wave('c', sin(300) * 0.1)")
        .unwrap();
    render(&mut engine, 16);

    session
        .submit_definitions("wave('a', sin(110) * 0.1) wave('b', sin(200) * 0.1) wave('c', sin(300) * 0.1)")
        .unwrap();
    let err = session
        .submit_definitions("wave('a', sin(120) * 0.1) wave('b', sin(200) * 0.1) wave('c', sin(300) * 0.1)")
        .unwrap_err();
    assert_eq!(err, SubmitError::QueueFull);
    render(&mut engine, 16);

    session
        .submit_definitions("wave('a', sin(110) * 0.1) wave('b', sin(1e9)) wave('c', sin(330) * 0.1)")
        .unwrap();
    render(&mut engine, 16);

    let mut regions: Vec<(String, std::ops::Range<usize>)> = engine
        .engine()
        .registry()
        .iter()
        .map(|v| (v.label().to_string(), v.current().slots()))
        .collect();
    regions.sort_by_key(|(_, r)| r.start);
    assert_eq!(regions.len(), 3);
    for pair in regions.windows(2) {
        assert!(pair[0].1.end <= pair[1].1.start, "{pair:?} share slots");
    }
}
