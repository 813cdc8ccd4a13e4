use crate::common::Rig;
use gcodexec_core::{EngineEvent, PauseReason, PrintEvent, StopReason, TriggerEvent};
use gcodexec_engine::{ChannelId, PauseState, Resource, ToolRegistry};

fn fired(rig: &Rig) -> Vec<usize> {
    rig.events()
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::Trigger(TriggerEvent::Fired { number }) => Some(number),
            _ => None,
        })
        .collect()
}

/// Poll at least once, then until every pending trigger has run
fn settle(rig: &mut Rig) {
    rig.engine.spin();
    rig.spin_until(1000, |e, _| e.pending_triggers() == 0 && e.is_idle());
}

#[test]
fn test_lowest_trigger_runs_first() {
    let mut rig = Rig::new();
    rig.file("sys/trigger3.g", "M106 P1 S0.3\n");
    rig.file("sys/trigger5.g", "M106 P1 S0.5\n");

    rig.engine.raise_trigger(5);
    rig.engine.raise_trigger(3);
    rig.engine.raise_trigger(1);
    assert_eq!(rig.engine.pending_triggers(), 0b10_1010);

    // Nothing is printing, so the pause trigger is dropped
    assert!(!rig.engine.spin());
    assert_eq!(rig.engine.pending_triggers(), 0b10_1000);
    assert!(rig.events().iter().any(|e| matches!(
        e,
        EngineEvent::Trigger(TriggerEvent::Discarded { number: 1 })
    )));

    settle(&mut rig);
    assert_eq!(fired(&rig), vec![3, 5]);
    assert_eq!(rig.machine.tools.fan_speed(1), 0.5);
    assert!(rig.engine.take_output(ChannelId::Trigger).is_empty());
}

#[test]
fn test_triggers_wait_while_movement_is_held() {
    let mut rig = Rig::homed();
    rig.file("sys/trigger3.g", "M106 P1 S0.3\n");
    rig.file("sys/trigger5.g", "M106 P1 S0.5\n");
    rig.file("gcodes/held.g", "M291 P\"Check the bed\" S2\nG1 X30 F6000\n");
    rig.engine.submit(ChannelId::Http, "M32 \"held.g\"");
    rig.spin_until(100, |e, _| {
        e.channel(ChannelId::File).latest().waiting_for_acknowledgement
    });
    assert!(rig.engine.is_printing());

    rig.machine.motion.set_auto_execute(false);
    rig.engine.submit(ChannelId::Http, "G1 X10 F6000");
    rig.engine.submit(ChannelId::Http, "M400");
    for _ in 0..5 {
        rig.engine.spin();
    }
    assert_eq!(rig.engine.lock_owner(Resource::Movement), Some(ChannelId::Http));

    rig.engine.raise_trigger(5);
    rig.engine.raise_trigger(3);
    rig.engine.raise_trigger(1);
    for _ in 0..10 {
        rig.engine.spin();
    }
    // The pause trigger cannot take the movement lock, so nothing behind it runs either
    assert_eq!(rig.engine.pending_triggers(), 0b10_1010);
    assert!(fired(&rig).is_empty());

    rig.machine.motion.set_auto_execute(true);
    rig.spin_until(1000, |e, _| e.pending_triggers() & 0b10 == 0);
    assert_eq!(fired(&rig), vec![1]);
    assert_eq!(rig.engine.pending_triggers(), 0b10_1000);
}

#[test]
fn test_trigger_on_input_edge() {
    let mut rig = Rig::new();
    rig.file("sys/trigger2.g", "M106 P1 S0.6\n");
    assert_eq!(rig.send(ChannelId::Http, "M581 T2 P3 S1"), vec![String::new()]);
    assert_eq!(
        rig.send(ChannelId::Http, "M581 T2"),
        vec!["Trigger 2 fires on rising inputs 0x8, falling inputs 0x0".to_string()]
    );
    assert_eq!(
        rig.send(ChannelId::Http, "M581 T6"),
        vec!["Trigger 6 is not configured".to_string()]
    );

    // A falling edge on a rising-edge input does nothing
    rig.engine.signals().set_input(3, true);
    settle(&mut rig);
    assert_eq!(fired(&rig), vec![2]);
    assert_eq!(rig.machine.tools.fan_speed(1), 0.6);

    rig.machine.tools.set_fan_speed(1, 0.0);
    rig.engine.signals().set_input(3, false);
    settle(&mut rig);
    assert_eq!(fired(&rig), vec![2]);
    assert_eq!(rig.machine.tools.fan_speed(1), 0.0);
}

#[test]
fn test_check_trigger_level() {
    let mut rig = Rig::new();
    rig.file("sys/trigger4.g", "M106 P1 S0.4\n");
    rig.engine.signals().set_input(1, true);
    // The input is already high when the trigger is set up, so no edge is seen
    rig.send(ChannelId::Http, "M581 T4 P1 S1");
    settle(&mut rig);
    assert!(fired(&rig).is_empty());

    rig.send(ChannelId::Http, "M582 T4");
    settle(&mut rig);
    assert_eq!(fired(&rig), vec![4]);
    assert_eq!(rig.machine.tools.fan_speed(1), 0.4);
}

#[test]
fn test_pause_trigger_then_cancel() {
    let mut rig = Rig::homed();
    let lines: String = (1..=40).map(|x| format!("G1 X{} F6000\n", x)).collect();
    rig.file("gcodes/long.g", &lines);
    rig.engine.submit(ChannelId::Http, "M32 \"long.g\"");
    rig.spin_until(200, |_, m| m.motion.head_position()[0] >= 3.0);

    rig.engine.raise_trigger(1);
    rig.spin_until(1000, |e, _| e.pause_state() == PauseState::Paused);
    assert!(rig.engine.is_printing());
    assert!(rig.head()[0] < 40.0);
    assert!(rig.events().iter().any(|e| matches!(
        e,
        EngineEvent::Print(PrintEvent::Pausing {
            reason: PauseReason::Trigger,
            ..
        })
    )));

    assert_eq!(rig.send(ChannelId::Http, "M0"), vec![String::new()]);
    assert!(!rig.engine.is_printing());
    assert!(rig.events().iter().any(|e| matches!(
        e,
        EngineEvent::Print(PrintEvent::Stopped {
            reason: StopReason::UserCancelled,
            ..
        })
    )));
}
