use crate::common::{assert_at, assert_near, config, Rig};
use gcodexec_core::{EngineEvent, MessageLevel, PauseReason, PrintEvent, StopReason};
use gcodexec_engine::{ChannelId, Engine, PauseState, PAUSE_RESTORE_POINT};

const HTTP: ChannelId = ChannelId::Http;
const USB: ChannelId = ChannelId::Usb;
const RESURRECT: &str = "sys/resurrect.g";

// Line offsets: 0, 17, 24, 29, 36
const FILE_WITH_PAUSE: &str = "G1 X10 Y10 F6000\nG1 X20\nM226\nG1 X30\nG1 X40\n";
const FOUR_MOVES: &str = "G1 X10 Y10 F6000\nG1 X20\nG1 X30\nG1 X40\n";

fn pauses(rig: &Rig) -> Vec<(PauseReason, u64)> {
    rig.events()
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::Print(PrintEvent::Pausing {
                reason,
                file_position,
            }) => Some((reason, file_position)),
            _ => None,
        })
        .collect()
}

fn stops(events: &[EngineEvent]) -> Vec<StopReason> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Print(PrintEvent::Stopped { reason, .. }) => Some(*reason),
            _ => None,
        })
        .collect()
}

fn error_messages(rig: &Rig) -> Vec<String> {
    rig.events()
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::Message(m) if m.level == MessageLevel::Error => Some(m.text),
            _ => None,
        })
        .collect()
}

/// Start a print with motion held back until at least `queued` segments wait
fn start_held_print(rig: &mut Rig, contents: &str, queued: usize) {
    rig.file("gcodes/job.g", contents);
    rig.machine.motion.set_auto_execute(false);
    rig.engine.submit(HTTP, "M32 \"job.g\"");
    rig.spin_until(200, |_, m| m.motion.queued() >= queued);
}

#[test]
fn test_pause_from_print_file_and_resume() {
    let mut rig = Rig::homed();
    rig.file("gcodes/job.g", FILE_WITH_PAUSE);
    rig.engine.submit(HTTP, "M32 \"job.g\"");
    rig.spin_until(1000, |e, _| e.pause_state() == PauseState::Paused);

    assert!(rig.engine.is_printing());
    assert_eq!(pauses(&rig), vec![(PauseReason::GCode, 29)]);
    let rp = rig.engine.restore_point(PAUSE_RESTORE_POINT).unwrap();
    assert_eq!(rp.file_pos, Some(29));
    assert_at(rp.move_coords, 20.0, 10.0, 0.0);
    // pause.g lifted the head
    assert_at(rig.head(), 20.0, 10.0, 5.0);
    assert_eq!(
        rig.engine.take_output(ChannelId::File),
        vec!["Printing paused at X20.0 Y10.0 Z0.0".to_string()]
    );

    let saved = rig.machine.files.contents(RESURRECT).unwrap();
    assert!(saved.starts_with("; File \"job.g\" resume print after print paused at "));
    assert!(saved.contains("\nG92 X20.000 Y10.000 Z0.000\nG60 S1\n"));
    assert!(saved.contains("\nM23 \"job.g\"\nM26 S29\n"));
    assert!(saved.contains("\nG0 F6000 Z2.000\nG0 F6000 X20.000 Y10.000\nG0 F6000 Z0.000\n"));
    assert!(saved.ends_with("G1 F6000.0 P0\nG21\nM24\n"));

    // Nothing from the print runs while paused
    for _ in 0..20 {
        rig.engine.spin();
    }
    assert_at(rig.head(), 20.0, 10.0, 5.0);

    rig.machine.motion.take_executed();
    assert_eq!(rig.send(HTTP, "M24"), vec!["Printing resumed".to_string()]);
    let executed = rig.machine.motion.take_executed();
    let path: Vec<(f64, f64, f64)> = executed
        .iter()
        .map(|s| (s.coords[0], s.coords[1], s.coords[2]))
        .collect();
    assert_eq!(
        path,
        vec![
            (20.0, 10.0, 2.0), // resume.g
            (20.0, 10.0, 2.0), // over the restore point
            (20.0, 10.0, 0.0), // down onto it
            (30.0, 10.0, 0.0),
            (40.0, 10.0, 0.0),
        ]
    );
    assert!(!rig.engine.is_printing());
    assert_eq!(rig.engine.pause_state(), PauseState::NotPaused);
    assert!(rig.machine.files.contents(RESURRECT).is_none());
    assert_eq!(stops(&rig.events()), vec![StopReason::NormalCompletion]);
}

#[test]
fn test_pause_mid_move_and_resume_part_way() {
    let mut config = config();
    config.segmentation.enabled = true;
    let mut rig = Rig::with_config(config);
    rig.home();

    // 100 mm at 100 mm/s: 100 segments of 1 mm
    start_held_print(&mut rig, "G1 X100 F6000\nG1 Y20\n", 8);
    assert_eq!(rig.machine.motion.execute(3), 3);
    assert_at(rig.head(), 3.0, 0.0, 0.0);

    rig.engine.submit(USB, "M25");
    rig.spin_until(10, |e, _| e.pause_state() != PauseState::NotPaused);
    rig.machine.motion.set_auto_execute(true);
    rig.spin_until(1000, |e, _| e.pause_state() == PauseState::Paused);

    assert_eq!(pauses(&rig), vec![(PauseReason::User, 0)]);
    let rp = rig.engine.restore_point(PAUSE_RESTORE_POINT).unwrap().clone();
    assert_at(rp.move_coords, 3.0, 0.0, 0.0);
    assert_near(rp.proportion_done, 0.03);
    assert_near(rp.feed_rate, 6000.0);
    let usb = rig.engine.take_output(USB);
    assert!(
        usb.iter().any(|l| l == "Printing paused at X3.0 Y0.0 Z0.0\nok"),
        "{:?}",
        usb
    );

    let saved = rig.machine.files.contents(RESURRECT).unwrap();
    assert!(saved.contains("\nM26 S0 P0.030 X0.000 Y0.000\n"), "{}", saved);
    assert!(saved.contains("\nG92 X3.000 Y0.000 Z0.000\n"));

    rig.machine.motion.take_executed();
    rig.engine.submit(USB, "M24");
    rig.run();
    assert!(rig
        .engine
        .take_output(USB)
        .contains(&"Printing resumed\nok".to_string()));

    // The interrupted move carries on from the first segment not yet done
    let executed = rig.machine.motion.take_executed();
    let along_x: Vec<f64> = executed
        .iter()
        .filter(|s| s.coords[1] == 0.0 && s.coords[2] == 0.0 && s.coords[0] > 3.0 + 1e-9)
        .map(|s| s.coords[0])
        .collect();
    assert_eq!(along_x.len(), 97);
    assert_near(along_x[0], 4.0);
    assert_near(along_x[96], 100.0);
    assert_at(rig.head(), 100.0, 20.0, 0.0);
    assert!(rig.machine.files.contents(RESURRECT).is_none());
}

#[test]
fn test_pause_deferred_until_macro_returns() {
    let mut rig = Rig::homed();
    rig.file("sys/slow.g", "G1 X10 F6000\nG1 X20\nG1 X30\n");
    // Line offsets: 0, 14
    rig.file("gcodes/job.g", "M98 P\"slow.g\"\nG1 X50\n");
    rig.engine.submit(HTTP, "M32 \"job.g\"");
    rig.spin_until(100, |e, _| e.channel(ChannelId::File).is_doing_file_macro());

    rig.engine.submit(USB, "M25");
    rig.spin_until(1000, |e, _| e.pause_state() == PauseState::Paused);
    assert_eq!(rig.engine.take_output(USB)[0], "ok");
    assert_eq!(pauses(&rig), vec![(PauseReason::GCode, 14)]);
    let rp = rig.engine.restore_point(PAUSE_RESTORE_POINT).unwrap();
    assert_at(rp.move_coords, 30.0, 0.0, 0.0);

    rig.send(HTTP, "M24");
    assert_at(rig.head(), 50.0, 0.0, 0.0);
    assert!(!rig.engine.is_printing());
}

#[test]
fn test_power_failure_then_resurrect() {
    let mut rig = Rig::homed();
    rig.send(HTTP, "M140 S60");
    start_held_print(&mut rig, FOUR_MOVES, 2);
    assert_eq!(rig.machine.motion.execute(1), 1);
    assert_at(rig.head(), 10.0, 10.0, 0.0);

    rig.engine.signals().report_power_failure();
    rig.spin_until(10, |_, m| m.files.contents(RESURRECT).is_some());
    assert_eq!(rig.engine.pause_state(), PauseState::Paused);
    assert_eq!(pauses(&rig), vec![(PauseReason::LowVoltage, 17)]);

    let saved = rig.machine.files.contents(RESURRECT).unwrap();
    assert!(saved.starts_with("; File \"job.g\" resume print after power failure at "));
    // Heaters were off before the state was saved
    assert!(saved.contains("\nG21\nM140 S0.0\n"));
    assert!(saved.contains("\nG92 X10.000 Y10.000 Z0.000\n"));
    assert!(saved.contains("\nM26 S17\n"));
    assert!(saved.contains("\nG10 L2 P9 X0.00 Y0.00 Z0.00\nG54\n"));

    // Power comes back: a fresh engine on the same machine picks the print up
    let machine = rig.machine.clone();
    machine.motion.set_auto_execute(true);
    let mut engine = Engine::new(config(), machine.collaborators()).unwrap();
    engine.submit(HTTP, "M916");
    assert!(engine.run_until_idle(10_000));

    let out = engine.take_output(HTTP);
    assert!(out.contains(&"File job.g selected for printing".to_string()));
    assert_eq!(out.last(), Some(&String::new()));
    assert!(!engine.is_printing());
    let head = machine.motion.head_position();
    assert_at(head, 40.0, 10.0, 0.0);
    assert!(machine.files.contents(RESURRECT).is_none());
    assert_eq!(stops(&engine.events().history(None)), vec![StopReason::NormalCompletion]);
}

#[test]
fn test_stall_pause_and_cancel() {
    let mut rig = Rig::homed();
    start_held_print(&mut rig, FOUR_MOVES, 2);
    rig.machine.motion.execute(1);

    rig.engine.signals().report_stall();
    rig.engine.spin();
    assert_eq!(rig.engine.pause_state(), PauseState::Paused);
    assert_eq!(pauses(&rig), vec![(PauseReason::Stall, 17)]);
    let saved = rig.machine.files.contents(RESURRECT).unwrap();
    assert!(saved.contains("resume print after print paused at "));

    rig.machine.motion.set_auto_execute(true);
    assert_eq!(rig.send(HTTP, "M0"), vec![String::new()]);
    assert!(!rig.engine.is_printing());
    assert_eq!(rig.engine.pause_state(), PauseState::NotPaused);
    assert!(rig.machine.files.contents(RESURRECT).is_none());
    assert_eq!(stops(&rig.events()), vec![StopReason::UserCancelled]);
    assert_at(rig.head(), 10.0, 10.0, 0.0);
}

#[test]
fn test_failed_resume_write_removes_stale_file() {
    let mut rig = Rig::homed();
    rig.file(RESURRECT, "; stale\n");
    rig.machine.files.set_fail_writes(true);
    rig.file("gcodes/job.g", FILE_WITH_PAUSE);
    rig.engine.submit(HTTP, "M32 \"job.g\"");
    rig.spin_until(1000, |e, _| e.pause_state() == PauseState::Paused);

    assert!(rig.machine.files.contents(RESURRECT).is_none());
    assert!(error_messages(&rig)
        .contains(&"Failed to write or close file sys/resurrect.g".to_string()));
}

#[test]
fn test_heater_settings_failure_discards_resume_file() {
    let mut rig = Rig::homed();
    rig.machine.heaters.set_resume_write_fails(true);
    rig.file("gcodes/job.g", FILE_WITH_PAUSE);
    rig.engine.submit(HTTP, "M32 \"job.g\"");
    rig.spin_until(1000, |e, _| e.pause_state() == PauseState::Paused);

    assert!(rig.machine.files.contents(RESURRECT).is_none());
    assert_eq!(
        error_messages(&rig),
        vec!["Failed to write or close file sys/resurrect.g".to_string()]
    );
}

#[test]
fn test_pause_and_resume_need_a_print() {
    let mut rig = Rig::homed();
    assert_eq!(
        rig.send(HTTP, "M25"),
        vec!["Error: Cannot pause print, because no file is being printed!".to_string()]
    );
    assert_eq!(
        rig.send(HTTP, "M24"),
        vec!["Error: Cannot print, because no file is selected!".to_string()]
    );
    assert_eq!(
        rig.send(HTTP, "M23 missing.g"),
        vec!["Error: Failed to open file missing.g".to_string()]
    );
}
