use crate::common::Rig;
use gcodexec_core::Compatibility;
use gcodexec_engine::ChannelId;

fn lines(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_marlin_host_gets_ok() {
    let mut rig = Rig::new();
    assert_eq!(rig.engine.channel(ChannelId::Usb).compatibility(), Compatibility::Marlin);
    assert_eq!(rig.send(ChannelId::Usb, "G90"), lines(&["ok"]));
    assert_eq!(
        rig.send(ChannelId::Usb, "M105"),
        lines(&["ok B:20.0 /0.0 T:20.0 /0.0"])
    );
    assert_eq!(
        rig.send(ChannelId::Usb, "M220"),
        lines(&["Speed factor: 100.0%\nok"])
    );
}

#[test]
fn test_native_replies() {
    let mut rig = Rig::new();
    assert_eq!(rig.send(ChannelId::Http, "G90"), lines(&[""]));
    assert_eq!(
        rig.send(ChannelId::Http, "M105"),
        lines(&["B:20.0 /0.0 T:20.0 /0.0"])
    );
    assert_eq!(
        rig.send(ChannelId::Telnet, "M9999"),
        lines(&["Error: unsupported command M9999"])
    );
}

#[test]
fn test_bad_lines() {
    let mut rig = Rig::new();
    assert_eq!(
        rig.send(ChannelId::Http, "X10"),
        lines(&["Error: Bad command: X10"])
    );
    assert_eq!(
        rig.send(ChannelId::Usb, "X10"),
        lines(&["Error: Bad command: X10\nok"])
    );
    // Blank lines and comments are not commands
    assert!(rig.send(ChannelId::Http, "; just a comment").is_empty());
    // Line numbers are skipped
    assert_eq!(rig.send(ChannelId::Http, "N10 G90"), lines(&[""]));
}

#[test]
fn test_switch_dialect() {
    let mut rig = Rig::new();
    assert_eq!(rig.send(ChannelId::Http, "M555 P2"), lines(&["ok"]));
    assert_eq!(rig.send(ChannelId::Http, "G91"), lines(&["ok"]));
    assert_eq!(
        rig.send(ChannelId::Http, "M555"),
        lines(&["Output mode: Marlin\nok"])
    );
    assert_eq!(rig.send(ChannelId::Http, "M555 P1"), lines(&[""]));
}

#[test]
fn test_marlin_file_list() {
    let mut rig = Rig::new();
    rig.file("gcodes/a.g", "G1 X1\n");
    rig.file("gcodes/b.g", "G1 X2\n");
    assert_eq!(
        rig.send(ChannelId::Usb, "M20"),
        lines(&["Begin file list", "a.g", "b.g", "End file list", "ok"])
    );
    assert_eq!(rig.send(ChannelId::Http, "M20"), lines(&["a.g", "b.g"]));
    assert_eq!(
        rig.send(ChannelId::Http, "M20 P\"nowhere\""),
        lines(&["Error: M20: directory nowhere not found"])
    );
}

#[test]
fn test_diagnostics_are_split_into_lines() {
    let mut rig = Rig::new();
    let out = rig.send(ChannelId::Http, "M122");
    assert!(out.len() > 5);
    assert_eq!(out[0], "=== Engine ===");
    assert!(out.iter().any(|l| l == "Pause state: notPaused"));
    assert!(out.iter().any(|l| l == "Movement locked by: nobody"));
    assert!(out.iter().all(|l| !l.contains('\n')));
}

#[test]
fn test_replies_from_file_channel_are_not_echoed() {
    let mut rig = Rig::homed();
    rig.file("gcodes/job.g", "G1 X5 F6000\nM105\n");
    assert_eq!(rig.send(ChannelId::Http, "M32 \"job.g\""), lines(&[""]));
    let out = rig.engine.take_output(ChannelId::File);
    // Empty replies vanish; text replies are kept
    assert_eq!(out, lines(&["B:20.0 /0.0 T:20.0 /0.0"]));
}
