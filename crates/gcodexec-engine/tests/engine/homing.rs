use crate::common::{assert_at, config, Rig};
use gcodexec_core::{AxesBitmap, EngineEvent, MachineEvent};
use gcodexec_engine::{ChannelId, Resource};

#[test]
fn test_home_all_runs_homeall_macro() {
    let mut rig = Rig::new();
    assert!(rig.engine.axes_homed().is_empty());

    rig.home();
    assert_eq!(rig.engine.axes_homed(), AxesBitmap::lowest(3));
    assert_at(rig.engine.user_position(), 0.0, 0.0, 0.0);
    assert_at(rig.head(), 0.0, 0.0, 0.0);
    assert_eq!(rig.engine.lock_owner(Resource::Movement), None);

    let homed: Vec<String> = rig
        .events()
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::Machine(MachineEvent::Homed { axes }) => Some(axes),
            _ => None,
        })
        .collect();
    assert_eq!(homed, vec!["XY".to_string(), "Z".to_string()]);
}

#[test]
fn test_home_single_axis_without_macro() {
    let mut rig = Rig::new();
    let out = rig.send(ChannelId::Http, "G28 X");
    assert_eq!(out, vec!["Error: Homing file homex.g not found".to_string()]);
    assert!(rig.engine.axes_homed().is_empty());
    assert_eq!(rig.engine.lock_owner(Resource::Movement), None);
}

#[test]
fn test_home_single_axis_with_macro() {
    let mut rig = Rig::new();
    rig.file("sys/homez.g", "G91\nG1 H1 Z-240 F600\nG90\n");
    let out = rig.send(ChannelId::Http, "G28 Z");
    assert_eq!(out, vec![String::new()]);
    assert_eq!(rig.engine.axes_homed(), AxesBitmap::single(2));
}

#[test]
fn test_home_towards_max_ends_at_axis_max() {
    let mut rig = Rig::new();
    rig.file("sys/homez.g", "G91\nG1 H1 Z240 F600\nG90\n");
    rig.send(ChannelId::Http, "G28 Z");
    assert_eq!(rig.engine.axes_homed(), AxesBitmap::single(2));
    assert_eq!(rig.engine.user_position()[2], 200.0);
}

#[test]
fn test_moves_need_homed_axes() {
    let mut rig = Rig::new();
    let out = rig.send(ChannelId::Http, "G1 X10 F6000");
    assert_eq!(out, vec!["Error: G1: insufficient axes homed".to_string()]);
    assert!(rig.machine.motion.executed().is_empty());
}

#[test]
fn test_moves_allowed_before_homing() {
    let mut config = config();
    config.machine.allow_moves_before_homing = true;
    let mut rig = Rig::with_config(config);

    let out = rig.send(ChannelId::Http, "G1 X10 Y5 F6000");
    assert_eq!(out, vec![String::new()]);
    assert_at(rig.head(), 10.0, 5.0, 0.0);
}

#[test]
fn test_set_position_marks_axes_homed() {
    let mut rig = Rig::new();
    rig.send(ChannelId::Http, "G92 X50 Y60");
    assert!(rig.engine.axes_homed().is_set(0));
    assert!(rig.engine.axes_homed().is_set(1));
    assert!(!rig.engine.axes_homed().is_set(2));
    assert_at(rig.engine.user_position(), 50.0, 60.0, 0.0);

    // Z is still unhomed
    let out = rig.send(ChannelId::Http, "G1 Z5");
    assert_eq!(out, vec!["Error: G1: insufficient axes homed".to_string()]);
    let out = rig.send(ChannelId::Http, "G1 X40");
    assert_eq!(out, vec![String::new()]);
    assert_at(rig.head(), 40.0, 60.0, 0.0);
}
