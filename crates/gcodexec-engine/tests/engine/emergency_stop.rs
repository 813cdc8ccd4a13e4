use crate::common::Rig;
use gcodexec_core::{EngineEvent, MachineEvent, PrintEvent, StopReason, TriggerEvent};
use gcodexec_engine::{ChannelId, HeaterController, Resource};

fn emergency_stops(rig: &Rig) -> usize {
    rig.events()
        .iter()
        .filter(|e| matches!(e, EngineEvent::Machine(MachineEvent::EmergencyStop)))
        .count()
}

#[test]
fn test_emergency_stop_is_idempotent() {
    let mut rig = Rig::homed();
    rig.engine.submit(ChannelId::Http, "M112");
    rig.run();
    assert!(rig.engine.is_emergency_stopped());
    assert_eq!(rig.machine.motion.emergency_stops(), 1);
    assert!(rig.engine.axes_homed().is_empty());

    // A second stop while already stopped changes nothing visible
    rig.engine.signals().request_emergency_stop();
    assert!(rig.engine.spin());
    assert_eq!(rig.machine.motion.emergency_stops(), 2);
    assert_eq!(emergency_stops(&rig), 1);

    // Nothing runs until reset
    rig.engine.submit(ChannelId::Http, "M105");
    for _ in 0..10 {
        assert!(!rig.engine.spin());
    }
    assert!(rig.engine.take_output(ChannelId::Http).is_empty());

    rig.engine.reset_after_emergency_stop();
    assert!(!rig.engine.is_emergency_stopped());
    assert_eq!(
        rig.send(ChannelId::Http, "M105"),
        vec!["B:20.0 /0.0 T:20.0 /0.0".to_string()]
    );
}

#[test]
fn test_emergency_stop_aborts_print() {
    let mut rig = Rig::homed();
    rig.send(ChannelId::Http, "M140 S60");
    assert_eq!(rig.machine.heaters.target_temperature(0), 60.0);
    rig.file("sys/resurrect.g", "; from an earlier pause\n");
    rig.file("gcodes/job.g", "G1 X10 F6000\nG1 X20\nG1 X30\n");
    rig.machine.motion.set_auto_execute(false);
    rig.engine.submit(ChannelId::Http, "M32 \"job.g\"");
    rig.spin_until(100, |_, m| m.motion.queued() >= 2);

    rig.engine.raise_trigger(0);
    assert!(rig.engine.spin());
    assert!(rig.engine.is_emergency_stopped());
    assert!(!rig.engine.is_printing());
    assert_eq!(rig.machine.motion.queued(), 0);
    assert_eq!(rig.engine.lock_owner(Resource::Movement), None);
    assert_eq!(rig.machine.heaters.target_temperature(0), 0.0);
    assert_eq!(rig.engine.pending_triggers(), 0);

    let events = rig.events();
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::Trigger(TriggerEvent::Fired { number: 0 })
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::Print(PrintEvent::Stopped {
            reason: StopReason::Abort,
            ..
        })
    )));
    // An aborted print keeps its resume file
    assert!(rig.machine.files.contents("sys/resurrect.g").is_some());
}
