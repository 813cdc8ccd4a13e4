use crate::common::{assert_at, config, Rig};
use gcodexec_core::{EngineEvent, MachineEvent, MessageLevel};
use gcodexec_engine::{ChannelId, ToolRegistry, MAX_QUEUED_OUTPUT};

const HTTP: ChannelId = ChannelId::Http;

#[test]
fn test_nested_macros_stop_at_stack_limit() {
    let mut rig = Rig::new();
    rig.file("sys/loop.g", "M98 P\"loop.g\"\n");
    let out = rig.send(HTTP, "M98 P\"loop.g\"");
    assert_eq!(out, vec!["Error: Push(): stack overflow".to_string()]);
    assert_eq!(rig.engine.channel(HTTP).depth(), 1);
    assert!(rig.events().iter().any(|e| matches!(
        e,
        EngineEvent::Message(m) if m.level == MessageLevel::Error
    )));

    // The channel still works afterwards
    assert_eq!(rig.send(HTTP, "G90"), vec![String::new()]);
}

#[test]
fn test_missing_macro_is_a_warning() {
    let mut rig = Rig::new();
    assert_eq!(rig.send(HTTP, "M98 P\"nothere.g\""), vec![String::new()]);
    assert!(rig.events().iter().any(|e| matches!(
        e,
        EngineEvent::Message(m)
            if m.level == MessageLevel::Warning && m.text == "Macro file nothere.g not found"
    )));
}

#[test]
fn test_early_return_from_macro() {
    let mut rig = Rig::new();
    rig.file("sys/early.g", "M106 P0 S0.2\nM99\nM106 P0 S0.9\n");
    assert_eq!(rig.send(HTTP, "M98 P\"early.g\""), vec![String::new()]);
    assert_eq!(rig.machine.tools.fan_speed(0), 0.2);
    assert_eq!(rig.engine.channel(HTTP).depth(), 1);
}

#[test]
fn test_macro_settings_do_not_leak() {
    let mut rig = Rig::homed();
    rig.file("sys/relative.g", "G91\nG1 X5 F6000\n");
    rig.send(HTTP, "M98 P\"relative.g\"");
    assert!(!rig.engine.channel(HTTP).latest().axes_relative);

    rig.send(HTTP, "G1 X20");
    assert_at(rig.head(), 20.0, 0.0, 0.0);
}

#[test]
fn test_blocking_message_waits_for_acknowledgement() {
    let mut rig = Rig::new();
    rig.engine.submit(HTTP, "M291 P\"Load filament\" R\"Filament\" S2");
    rig.engine.submit(HTTP, "M105");
    for _ in 0..20 {
        rig.engine.spin();
    }
    assert_eq!(rig.engine.take_output(HTTP), vec![String::new()]);
    assert!(rig.engine.channel(HTTP).latest().waiting_for_acknowledgement);
    assert!(rig.events().iter().any(|e| matches!(
        e,
        EngineEvent::Machine(MachineEvent::MessageBoxShown { text, .. })
            if text == "Filament: Load filament"
    )));

    // Any channel may acknowledge
    assert_eq!(rig.send(ChannelId::Telnet, "M292"), vec![String::new()]);
    assert_eq!(
        rig.engine.take_output(HTTP),
        vec!["B:20.0 /0.0 T:20.0 /0.0".to_string()]
    );
}

#[test]
fn test_non_blocking_message() {
    let mut rig = Rig::new();
    assert_eq!(rig.send(HTTP, "M291 P\"Hello\" S1"), vec![String::new()]);
    assert!(rig.events().iter().any(|e| matches!(
        e,
        EngineEvent::Message(m) if m.text == "Hello"
    )));
}

#[test]
fn test_cancelled_message_returns_from_macro() {
    let mut rig = Rig::new();
    rig.file("sys/ask.g", "M291 P\"Continue?\" S3\nM106 P0 S0.7\n");
    rig.engine.submit(HTTP, "M98 P\"ask.g\"");
    for _ in 0..20 {
        rig.engine.spin();
    }
    assert_eq!(rig.engine.channel(HTTP).depth(), 2);

    rig.send(ChannelId::Telnet, "M292 P1");
    assert_eq!(rig.engine.take_output(HTTP), vec![String::new()]);
    assert_eq!(rig.engine.channel(HTTP).depth(), 1);
    assert_eq!(rig.machine.tools.fan_speed(0), 0.0);
}

#[test]
fn test_config_file_settings_reach_every_channel() {
    let mut rig = Rig::homed();
    rig.file("sys/config.g", "G91\nM83\n");
    assert!(rig.engine.run_config_file());
    rig.run();

    for id in [HTTP, ChannelId::Telnet, ChannelId::Usb, ChannelId::File] {
        let frame = rig.engine.channel(id).latest();
        assert!(frame.axes_relative, "{} is not relative", id);
        assert!(frame.drives_relative);
    }

    rig.send(HTTP, "G1 X5 F6000");
    rig.send(HTTP, "G1 X5");
    assert_at(rig.head(), 10.0, 0.0, 0.0);
}

#[test]
fn test_missing_config_file() {
    let mut rig = Rig::new();
    assert!(!rig.engine.run_config_file());
    assert!(rig.engine.is_idle());
}

#[test]
fn test_daemon_runs_repeatedly() {
    let mut config = config();
    config.channels.daemon_interval_ms = 0;
    let mut rig = Rig::with_config(config);
    rig.file("sys/daemon.g", "M106 P2 S0.25\n");
    for _ in 0..5 {
        rig.engine.spin();
    }
    assert_eq!(rig.machine.tools.fan_speed(2), 0.25);

    // It goes round again after finishing
    rig.machine.tools.set_fan_speed(2, 0.0);
    for _ in 0..5 {
        rig.engine.spin();
    }
    assert_eq!(rig.machine.tools.fan_speed(2), 0.25);
}

#[test]
fn test_daemon_replies_do_not_pile_up() {
    let mut config = config();
    config.channels.daemon_interval_ms = 0;
    let mut rig = Rig::with_config(config);
    rig.file("sys/daemon.g", "M105\n");
    for _ in 0..3000 {
        rig.engine.spin();
    }
    let out = rig.engine.take_output(ChannelId::Daemon);
    assert!(!out.is_empty());
    assert!(out.len() <= MAX_QUEUED_OUTPUT);
}
