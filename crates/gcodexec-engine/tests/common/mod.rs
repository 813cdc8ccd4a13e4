#![allow(dead_code)]

use gcodexec_core::{EngineEvent, Coords};
use gcodexec_engine::sim::SimMachine;
use gcodexec_engine::{ChannelId, Engine};
use gcodexec_settings::EngineConfig;

pub const HOMEALL: &str = "G91\nG1 H1 X-240 Y-240 F6000\nG1 H1 Z-240 F600\nG90\n";
pub const PAUSE: &str = "G91\nG1 Z5 F6000\nG90\n";
pub const RESUME: &str = "G1 R1 X0 Y0 Z2 F6000\n";

/// Settings used by most tests: defaults plus event history
pub fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.events.enable_history = true;
    config
}

/// An engine driving a simulated machine
pub struct Rig {
    pub engine: Engine,
    pub machine: SimMachine,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let machine = SimMachine::new(&config);
        machine.files.insert("sys/homeall.g", HOMEALL);
        machine.files.insert("sys/pause.g", PAUSE);
        machine.files.insert("sys/resume.g", RESUME);
        let engine = Engine::new(config, machine.collaborators()).unwrap();
        Self { engine, machine }
    }

    /// A rig whose axes have all been homed with G28
    pub fn homed() -> Self {
        let mut rig = Self::new();
        rig.home();
        rig
    }

    pub fn home(&mut self) {
        let out = self.send(ChannelId::Http, "G28");
        assert_eq!(out, vec![String::new()], "G28 failed");
        self.machine.motion.take_executed();
    }

    /// Add a file below the store root
    pub fn file(&self, path: &str, contents: &str) {
        self.machine.files.insert(path, contents);
    }

    pub fn run(&mut self) {
        assert!(self.engine.run_until_idle(10_000), "engine did not go idle");
    }

    /// Send one line, run until idle and collect the channel's replies
    pub fn send(&mut self, id: ChannelId, line: &str) -> Vec<String> {
        self.engine.submit(id, line);
        self.run();
        self.engine.take_output(id)
    }

    /// Spin until `done` holds, failing after `max` polls
    pub fn spin_until(&mut self, max: usize, mut done: impl FnMut(&Engine, &SimMachine) -> bool) {
        for _ in 0..max {
            if done(&self.engine, &self.machine) {
                return;
            }
            self.engine.spin();
        }
        assert!(done(&self.engine, &self.machine), "condition not met after {} polls", max);
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.engine.events().history(None)
    }

    pub fn head(&self) -> Coords {
        self.machine.motion.head_position()
    }
}

pub fn assert_near(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {} but got {}",
        expected,
        actual
    );
}

/// Check the head is at X, Y, Z
pub fn assert_at(coords: Coords, x: f64, y: f64, z: f64) {
    assert_near(coords[0], x);
    assert_near(coords[1], y);
    assert_near(coords[2], z);
}
