use crate::common::{config, Rig};
use gcodexec_engine::sim::SimMachine;
use gcodexec_engine::{ChannelId, Engine, Resource};
use gcodexec_settings::ConfigError;

#[test]
fn test_channels_take_turns() {
    let mut rig = Rig::new();
    for _ in 0..3 {
        rig.engine.submit(ChannelId::Http, "M105");
        rig.engine.submit(ChannelId::Telnet, "M105");
    }

    for round in 0..3 {
        assert!(rig.engine.spin());
        let http = rig.engine.take_output(ChannelId::Http);
        let telnet = rig.engine.take_output(ChannelId::Telnet);
        assert_eq!((http.len(), telnet.len()), (1, 0), "round {}", round);

        assert!(rig.engine.spin());
        let http = rig.engine.take_output(ChannelId::Http);
        let telnet = rig.engine.take_output(ChannelId::Telnet);
        assert_eq!((http.len(), telnet.len()), (0, 1), "round {}", round);
    }
    assert!(!rig.engine.spin());
    assert!(rig.engine.is_idle());
}

#[test]
fn test_movement_is_held_by_one_channel_at_a_time() {
    let mut rig = Rig::homed();
    rig.machine.motion.set_auto_execute(false);
    rig.engine.submit(ChannelId::Http, "G1 X10 F6000");
    rig.engine.submit(ChannelId::Http, "M400");
    for _ in 0..5 {
        rig.engine.spin();
    }
    // Http waits for its move to finish and keeps the lock meanwhile
    assert_eq!(rig.engine.lock_owner(Resource::Movement), Some(ChannelId::Http));

    rig.engine.submit(ChannelId::Telnet, "G1 Y10 F6000");
    for _ in 0..10 {
        rig.engine.spin();
    }
    assert_eq!(rig.engine.lock_owner(Resource::Movement), Some(ChannelId::Http));
    assert_eq!(rig.machine.motion.queued(), 1);
    assert!(rig.engine.take_output(ChannelId::Telnet).is_empty());

    rig.machine.motion.set_auto_execute(true);
    rig.run();
    let executed = rig.machine.motion.take_executed();
    let ends: Vec<(f64, f64)> = executed.iter().map(|s| (s.coords[0], s.coords[1])).collect();
    assert_eq!(ends, vec![(10.0, 0.0), (10.0, 10.0)]);
    assert_eq!(rig.engine.lock_owner(Resource::Movement), None);
}

#[test]
fn test_cancelled_object_moves_are_skipped() {
    let mut rig = Rig::homed();
    rig.file(
        "gcodes/objects.g",
        "M486 P2\nM486 S1\nG1 X10 F6000\nM486 S2\nG1 X50\nM486 S1\nG1 X20\n",
    );
    rig.send(ChannelId::Http, "M32 \"objects.g\"");
    let executed = rig.machine.motion.take_executed();
    let xs: Vec<f64> = executed.iter().map(|s| s.coords[0]).collect();
    assert_eq!(xs, vec![10.0, 20.0]);
    assert!(!rig.engine.is_printing());
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = config();
    config.machine.visible_axes = 0;
    let machine = SimMachine::new(&config);
    let result = Engine::new(config, machine.collaborators());
    assert!(matches!(result, Err(ConfigError::ValueOutOfRange { .. })));
}
