use std::sync::Arc;

use rstest::rstest;

use pest_watch::alert::{MemoryPin, PinProbe};
use pest_watch::{
    AlertActuator, AlertPolicy, AlertState, BoundingBox, DetectionResult, LabelScore,
    ManualClock, ResultDispatcher,
};

fn grasshopper_policy() -> AlertPolicy {
    AlertPolicy {
        target_label: "Grasshopper".to_string(),
        confidence_threshold: 0.70,
        hold_duration_ms: 5_000,
    }
}

fn rig(start_ms: u64) -> (ResultDispatcher, AlertActuator, PinProbe, Arc<ManualClock>) {
    let policy = grasshopper_policy();
    let clock = Arc::new(ManualClock::new(start_ms));
    let (pin, probe) = MemoryPin::new(27);
    let actuator =
        AlertActuator::new(Box::new(pin), clock.clone(), policy.hold_duration_ms).unwrap();
    (ResultDispatcher::new(policy), actuator, probe, clock)
}

fn boxes(found: &[(&str, f32)]) -> DetectionResult {
    DetectionResult::Detections(
        found
            .iter()
            .map(|(label, confidence)| BoundingBox {
                label: label.to_string(),
                confidence: *confidence,
                x: 100,
                y: 80,
                width: 24,
                height: 16,
            })
            .collect(),
    )
}

#[rstest]
#[case::well_above("Grasshopper", 0.99, true)]
#[case::just_above("Grasshopper", 0.72, true)]
#[case::at_threshold("Grasshopper", 0.70, true)]
#[case::just_below("Grasshopper", 0.69, false)]
#[case::below("Grasshopper", 0.65, false)]
#[case::wrong_label("Beetle", 0.99, false)]
#[case::case_sensitive("grasshopper", 0.99, false)]
fn activation_matches_label_and_inclusive_threshold(
    #[case] label: &str,
    #[case] confidence: f32,
    #[case] expected: bool,
) {
    let (dispatcher, mut actuator, probe, _) = rig(0);
    dispatcher
        .dispatch(boxes(&[(label, confidence)]), &mut actuator)
        .unwrap();
    assert_eq!(actuator.is_asserted(), expected);
    assert_eq!(probe.is_high(), expected);
}

#[test]
fn grasshopper_at_1000_holds_until_6000() {
    let (dispatcher, mut actuator, probe, clock) = rig(1_000);
    let summary = dispatcher
        .dispatch(boxes(&[("Grasshopper", 0.72)]), &mut actuator)
        .unwrap();
    assert!(summary.alert_raised());
    assert_eq!(actuator.state(), AlertState::Active { until_ms: 6_000 });

    // Non-qualifying detections during the window change nothing.
    for t in [1_000, 2_500, 4_000, 5_999] {
        clock.set(t);
        actuator.refresh().unwrap();
        dispatcher
            .dispatch(boxes(&[("Grasshopper", 0.40), ("Beetle", 0.95)]), &mut actuator)
            .unwrap();
        assert!(probe.is_high(), "line dropped early at {}ms", t);
    }

    clock.set(6_000);
    actuator.refresh().unwrap();
    assert!(!probe.is_high());
    assert_eq!(actuator.state(), AlertState::Idle);
}

#[test]
fn low_confidence_grasshopper_keeps_line_low() {
    let (dispatcher, mut actuator, probe, _) = rig(1_000);
    let summary = dispatcher
        .dispatch(boxes(&[("Grasshopper", 0.65)]), &mut actuator)
        .unwrap();
    assert!(!summary.alert_raised());
    assert_eq!(actuator.state(), AlertState::Idle);
    assert_eq!(probe.writes(), vec![false]);
}

#[test]
fn repeated_detections_do_not_extend_hold() {
    let (dispatcher, mut actuator, probe, clock) = rig(1_000);
    dispatcher
        .dispatch(boxes(&[("Grasshopper", 0.9)]), &mut actuator)
        .unwrap();
    clock.set(5_500);
    let summary = dispatcher
        .dispatch(boxes(&[("Grasshopper", 0.95), ("Grasshopper", 0.8)]), &mut actuator)
        .unwrap();
    assert!(!summary.alert_raised());
    assert_eq!(summary.qualifying(), 2);
    assert_eq!(actuator.state(), AlertState::Active { until_ms: 6_000 });
    assert_eq!(probe.writes(), vec![false, true]);
}

#[test]
fn classification_never_alerts_regardless_of_score() {
    let (dispatcher, mut actuator, probe, _) = rig(0);
    let result = DetectionResult::Classification(vec![LabelScore {
        label: "Grasshopper".to_string(),
        score: 1.0,
    }]);
    dispatcher.dispatch(result, &mut actuator).unwrap();
    assert_eq!(actuator.state(), AlertState::Idle);
    assert!(!probe.is_high());
}

#[test]
fn no_qualifying_frames_never_leave_idle() {
    let (dispatcher, mut actuator, probe, clock) = rig(0);
    for i in 0..50u64 {
        clock.set(i * 100);
        dispatcher
            .dispatch(boxes(&[("Beetle", 0.99), ("Aphid", 0.8)]), &mut actuator)
            .unwrap();
        dispatcher
            .dispatch(DetectionResult::Detections(vec![]), &mut actuator)
            .unwrap();
        assert_eq!(actuator.state(), AlertState::Idle);
    }
    assert_eq!(probe.writes(), vec![false]);
}

#[test]
fn deactivate_forces_low_mid_hold() {
    let (dispatcher, mut actuator, probe, clock) = rig(0);
    dispatcher
        .dispatch(boxes(&[("Grasshopper", 0.9)]), &mut actuator)
        .unwrap();
    clock.set(10);
    actuator.deactivate().unwrap();
    assert_eq!(actuator.state(), AlertState::Idle);
    assert!(!probe.is_high());
}
