use crate::common::{assert_at, assert_near, config, Rig};
use gcodexec_engine::ChannelId;

const HTTP: ChannelId = ChannelId::Http;

#[test]
fn test_absolute_and_relative_moves() {
    let mut rig = Rig::homed();
    rig.send(HTTP, "G1 X10 Y20 F6000");
    assert_at(rig.head(), 10.0, 20.0, 0.0);

    rig.send(HTTP, "G91");
    rig.send(HTTP, "G1 X5 Z1");
    rig.send(HTTP, "G1 X5");
    assert_at(rig.head(), 20.0, 20.0, 1.0);
    assert_at(rig.engine.user_position(), 20.0, 20.0, 1.0);

    let executed = rig.machine.motion.executed();
    assert_eq!(executed.len(), 3);
    assert_near(executed[0].feed_rate, 100.0);
}

#[test]
fn test_target_outside_limits_is_clamped() {
    let mut rig = Rig::homed();
    let out = rig.send(HTTP, "G1 X500 F6000");
    assert_eq!(out, vec![String::new()]);
    assert_at(rig.head(), 230.0, 0.0, 0.0);
    assert_at(rig.engine.user_position(), 230.0, 0.0, 0.0);
}

#[test]
fn test_workplace_offsets() {
    let mut rig = Rig::homed();
    rig.send(HTTP, "G10 L2 P2 X10 Y5");
    let out = rig.send(HTTP, "G10 L2 P2");
    assert_eq!(out, vec!["Origin of workplace 2: X10.00 Y5.00 Z0.00".to_string()]);

    rig.send(HTTP, "G55");
    rig.send(HTTP, "G1 X0 Y0 F6000");
    assert_at(rig.head(), 10.0, 5.0, 0.0);

    // G53 ignores the workplace for one command
    rig.send(HTTP, "G53 G1 X0 Y0");
    assert_at(rig.head(), 0.0, 0.0, 0.0);

    rig.send(HTTP, "G54");
    rig.send(HTTP, "G1 X1 Y1");
    assert_at(rig.head(), 1.0, 1.0, 0.0);
}

#[test]
fn test_inch_units() {
    let mut rig = Rig::homed();
    rig.send(HTTP, "G20");
    rig.send(HTTP, "G1 X1 Y2 F100");
    assert_at(rig.head(), 25.4, 50.8, 0.0);
    rig.send(HTTP, "G21");
    rig.send(HTTP, "G1 X1");
    assert_at(rig.head(), 1.0, 50.8, 0.0);
}

#[test]
fn test_segmented_straight_move() {
    let mut config = config();
    config.segmentation.enabled = true;
    let mut rig = Rig::with_config(config);
    rig.home();

    rig.send(HTTP, "G1 X10 F600");
    let executed = rig.machine.motion.take_executed();
    // 0.2 mm minimum segment length beats 100 segments per second at 10 mm/s
    assert_eq!(executed.len(), 50);
    for (i, segment) in executed.iter().enumerate() {
        assert_near(segment.coords[0], 0.2 * (i as f64 + 1.0));
        assert_near(segment.proportion_done, (i as f64 + 1.0) / 50.0);
    }
    assert!(executed.iter().all(|s| s.can_pause_after));
}

#[test]
fn test_clockwise_arc() {
    let mut rig = Rig::homed();
    rig.send(HTTP, "G2 X20 Y0 I10 J0 F6000");
    let executed = rig.machine.motion.executed();
    assert!(executed.len() > 4, "arc was not segmented");

    for segment in &executed {
        let (x, y) = (segment.coords[0], segment.coords[1]);
        assert!(y >= 0.0, "clockwise arc from the left went below the centre: {}", y);
        assert!(((x - 10.0).hypot(y) - 10.0).abs() < 1e-3);
    }
    // Only the last segment of an arc lets a pause in
    assert!(executed.last().is_some_and(|s| s.can_pause_after));
    assert!(!executed[0].can_pause_after);
    assert_at(rig.head(), 20.0, 0.0, 0.0);
}

#[test]
fn test_arc_without_centre_is_rejected() {
    let mut rig = Rig::homed();
    let out = rig.send(HTTP, "G2 X20 Y0");
    assert_eq!(out, vec!["Error: G2/G3: no I J K or R parameter".to_string()]);
    assert!(rig.machine.motion.executed().is_empty());
}

#[test]
fn test_babystepping_leaves_user_position() {
    let mut rig = Rig::homed();
    rig.send(HTTP, "M290 Z0.2");
    assert_at(rig.head(), 0.0, 0.0, 0.2);
    assert_at(rig.engine.user_position(), 0.0, 0.0, 0.0);

    let out = rig.send(HTTP, "M290");
    assert_eq!(
        out,
        vec!["Baby stepping offsets (mm): X0.000 Y0.000 Z0.200".to_string()]
    );

    rig.send(HTTP, "G1 X10 F6000");
    assert_at(rig.head(), 10.0, 0.0, 0.2);
}

#[test]
fn test_speed_factor_scales_printing_moves() {
    let mut rig = Rig::homed();
    rig.send(HTTP, "M220 S50");
    let out = rig.send(HTTP, "M220");
    assert_eq!(out, vec!["Speed factor: 50.0%".to_string()]);

    rig.send(HTTP, "G1 X10 F6000");
    let executed = rig.machine.motion.take_executed();
    assert_near(executed[0].feed_rate, 50.0);

    let out = rig.send(HTTP, "M220 S0");
    assert_eq!(out, vec!["Error: M220: invalid speed factor 0.0%".to_string()]);
}

#[test]
fn test_restore_point_move() {
    let mut rig = Rig::homed();
    rig.send(HTTP, "G1 X30 Y40 F6000");
    rig.send(HTTP, "G60 S2");
    rig.send(HTTP, "G1 X0 Y0");
    rig.send(HTTP, "G1 R2 X0 Y0 Z3");
    assert_at(rig.head(), 30.0, 40.0, 3.0);
    let rp = rig.engine.restore_point(2).unwrap();
    assert_at(rp.move_coords, 30.0, 40.0, 0.0);
}

#[test]
fn test_axis_scale_factors() {
    let mut rig = Rig::homed();
    assert_eq!(rig.send(HTTP, "M579 X2"), vec![String::new()]);
    assert_eq!(
        rig.send(HTTP, "M579"),
        vec!["Axis scale factors: X2.000 Y1.000 Z1.000".to_string()]
    );
    rig.send(HTTP, "G1 X5 Y5 Z1 F6000");
    assert_at(rig.head(), 10.0, 5.0, 1.0);
    assert_eq!(
        rig.send(HTTP, "M579 Y0"),
        vec!["Error: M579: invalid scale factor for Y".to_string()]
    );
}

#[test]
fn test_arc_with_zero_centre_offset() {
    let mut rig = Rig::homed();
    let out = rig.send(HTTP, "G2 X20 Y0 I0 J0");
    assert_eq!(out, vec!["Error: G2/G3: arc radius is zero".to_string()]);

    // A centre on one axis only is enough
    let out = rig.send(HTTP, "G2 X20 Y0 I10");
    assert_eq!(out, vec![String::new()]);
    assert_at(rig.head(), 20.0, 0.0, 0.0);
}
