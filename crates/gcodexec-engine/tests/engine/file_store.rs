use crate::common::{assert_at, config, HOMEALL, PAUSE, RESUME};
use gcodexec_engine::sim::SimMachine;
use gcodexec_engine::{ChannelId, Collaborators, DirFileStore, Engine, PauseState};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

const HTTP: ChannelId = ChannelId::Http;

/// An engine whose files live in a temporary directory
fn disk_engine(dir: &TempDir) -> (Engine, SimMachine) {
    let sys = dir.path().join("sys");
    fs::create_dir_all(&sys).unwrap();
    fs::create_dir_all(dir.path().join("gcodes")).unwrap();
    fs::write(sys.join("homeall.g"), HOMEALL).unwrap();
    fs::write(sys.join("pause.g"), PAUSE).unwrap();
    fs::write(sys.join("resume.g"), RESUME).unwrap();

    let config = config();
    let machine = SimMachine::new(&config);
    let collab = Collaborators {
        files: Arc::new(DirFileStore::new(dir.path())),
        ..machine.collaborators()
    };
    (Engine::new(config, collab).unwrap(), machine)
}

fn send(engine: &mut Engine, line: &str) -> Vec<String> {
    engine.submit(HTTP, line);
    assert!(engine.run_until_idle(10_000));
    engine.take_output(HTTP)
}

#[test]
fn test_print_list_and_delete_on_disk() {
    let dir = TempDir::new().unwrap();
    let (mut engine, machine) = disk_engine(&dir);
    fs::write(dir.path().join("gcodes/cube.g"), "G1 X10 Y10 F6000\nG1 Z5\n").unwrap();
    fs::write(dir.path().join("gcodes/cone.g"), "G1 X1\n").unwrap();

    assert_eq!(send(&mut engine, "G28"), vec![String::new()]);
    assert_eq!(send(&mut engine, "M20"), vec!["cone.g".to_string(), "cube.g".to_string()]);
    assert_eq!(send(&mut engine, "M32 \"cube.g\""), vec![String::new()]);
    assert_at(machine.motion.head_position(), 10.0, 10.0, 5.0);

    assert_eq!(send(&mut engine, "M30 \"cone.g\""), vec![String::new()]);
    assert!(!dir.path().join("gcodes/cone.g").exists());
    assert_eq!(
        send(&mut engine, "M30 \"cone.g\""),
        vec!["Error: Failed to delete file cone.g".to_string()]
    );
}

#[test]
fn test_resume_state_written_to_disk() {
    let dir = TempDir::new().unwrap();
    let (mut engine, _machine) = disk_engine(&dir);
    fs::write(
        dir.path().join("gcodes/job.g"),
        "G1 X10 F6000\nM226\nG1 X20\n",
    )
    .unwrap();

    send(&mut engine, "G28");
    engine.submit(HTTP, "M32 \"job.g\"");
    for _ in 0..1000 {
        if engine.pause_state() == PauseState::Paused {
            break;
        }
        engine.spin();
    }
    assert_eq!(engine.pause_state(), PauseState::Paused);

    let resurrect = dir.path().join("sys/resurrect.g");
    let saved = fs::read_to_string(&resurrect).unwrap();
    assert!(saved.contains("\nM23 \"job.g\"\nM26 S18\n"), "{}", saved);

    send(&mut engine, "M24");
    assert!(!engine.is_printing());
    assert!(!resurrect.exists());
}
