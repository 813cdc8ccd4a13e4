use crate::common::{assert_near, Rig};
use gcodexec_core::{EngineEvent, MachineEvent};
use gcodexec_engine::{ChannelId, HeaterController, Resource, ToolRegistry};

const HTTP: ChannelId = ChannelId::Http;

fn tool_changes(rig: &Rig) -> Vec<Option<u32>> {
    rig.events()
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::Machine(MachineEvent::ToolChanged { tool }) => Some(tool),
            _ => None,
        })
        .collect()
}

#[test]
fn test_tool_change_runs_macros() {
    let mut rig = Rig::new();
    rig.file("sys/tpre0.g", "M106 P1 S0.1\n");
    rig.file("sys/tpost0.g", "M106 P2 S0.2\n");
    rig.file("sys/tfree0.g", "M106 P3 S0.3\n");

    assert_eq!(rig.send(HTTP, "T"), vec!["No tool is selected".to_string()]);
    assert_eq!(rig.send(HTTP, "T0"), vec![String::new()]);
    assert_eq!(rig.machine.tools.current_tool(), Some(0));
    assert_eq!(rig.machine.tools.fan_speed(1), 0.1);
    assert_eq!(rig.machine.tools.fan_speed(2), 0.2);
    assert_eq!(rig.machine.tools.fan_speed(3), 0.0);
    assert_eq!(rig.send(HTTP, "T"), vec!["Tool 0 is selected".to_string()]);

    // Selecting the current tool again does nothing
    rig.send(HTTP, "T0");
    assert_eq!(tool_changes(&rig), vec![Some(0)]);

    rig.send(HTTP, "T-1");
    assert_eq!(rig.machine.tools.current_tool(), None);
    assert_eq!(rig.machine.tools.fan_speed(3), 0.3);
    assert_eq!(tool_changes(&rig), vec![Some(0), None]);
}

#[test]
fn test_tool_change_without_macros() {
    let mut rig = Rig::new();
    rig.file("sys/tpre0.g", "M106 P1 S0.1\n");
    rig.send(HTTP, "T0 P0");
    assert_eq!(rig.machine.tools.current_tool(), Some(0));
    assert_eq!(rig.machine.tools.fan_speed(1), 0.0);
}

#[test]
fn test_unknown_tool() {
    let mut rig = Rig::new();
    assert_eq!(
        rig.send(HTTP, "T5"),
        vec!["Error: Invalid tool number 5".to_string()]
    );
    assert!(tool_changes(&rig).is_empty());
}

#[test]
fn test_wait_for_tool_heater_holds_its_lock() {
    let mut rig = Rig::new();
    rig.machine.heaters.set_instant(false);
    rig.engine.submit(HTTP, "M109 S200 T0");
    for _ in 0..10 {
        rig.engine.spin();
    }
    assert_eq!(rig.engine.lock_owner(Resource::Heater(1)), Some(HTTP));
    assert_eq!(rig.machine.heaters.target_temperature(1), 200.0);
    assert!(rig.engine.take_output(HTTP).is_empty());

    // Another channel can still use other resources meanwhile
    rig.engine.submit(ChannelId::Telnet, "M105");
    for _ in 0..4 {
        rig.engine.spin();
    }
    assert_eq!(
        rig.engine.take_output(ChannelId::Telnet),
        vec!["B:20.0 /0.0 T:20.0 /200.0".to_string()]
    );

    rig.machine.heaters.settle();
    rig.run();
    assert_eq!(rig.engine.take_output(HTTP), vec![String::new()]);
    assert_eq!(rig.engine.lock_owner(Resource::Heater(1)), None);
}

#[test]
fn test_heater_commands() {
    let mut rig = Rig::new();
    assert_eq!(
        rig.send(HTTP, "M104 S200"),
        vec!["Error: M104: no tool selected".to_string()]
    );
    rig.send(HTTP, "M104 S210 T0");
    assert_eq!(rig.machine.heaters.target_temperature(1), 210.0);
    rig.send(HTTP, "M190 S60");
    assert_eq!(rig.machine.heaters.target_temperature(0), 60.0);
    assert_eq!(
        rig.send(HTTP, "M105"),
        vec!["B:60.0 /60.0 T:210.0 /210.0".to_string()]
    );
}

#[test]
fn test_volumetric_extrusion() {
    let mut rig = Rig::homed();
    rig.send(HTTP, "T0 P0");
    assert_eq!(rig.send(HTTP, "M200"), vec!["Volumetric extrusion is disabled".to_string()]);
    assert_eq!(rig.send(HTTP, "M200 D1.75"), vec![String::new()]);
    assert_eq!(rig.send(HTTP, "M200"), vec!["Filament diameters: 1.75".to_string()]);
    rig.machine.motion.take_executed();

    rig.send(HTTP, "G1 X10 E1 F600");
    let extruded: f64 = rig
        .machine
        .motion
        .take_executed()
        .iter()
        .map(|seg| seg.extrusion[0])
        .sum();
    assert_near(extruded, 4.0 / (std::f64::consts::PI * 1.75 * 1.75));

    // D0 goes back to plain filament lengths
    rig.send(HTTP, "M200 D0");
    rig.send(HTTP, "G1 X20 E2");
    let extruded: f64 = rig
        .machine
        .motion
        .take_executed()
        .iter()
        .map(|seg| seg.extrusion[0])
        .sum();
    assert_near(extruded, 1.0);
}

#[test]
fn test_bad_filament_diameter() {
    let mut rig = Rig::new();
    let out = rig.send(HTTP, "M200 D-1");
    assert_eq!(out, vec!["Error: M200: bad filament diameter".to_string()]);
}
