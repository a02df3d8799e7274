use firebeat_core::{
    ArmState, ChannelState, InterlockConfig, InterlockError, InterlockNotice, SafetyInterlock,
};
use firebeat_infra_sim::SimulatedOutput;
use firebeat_ports::hardware::HardwareError;
use firebeat_ports::types::{ChannelMap, CoilAddress};
use pretty_assertions::assert_eq;
use std::sync::{mpsc, Arc};
use std::time::Duration;

const GATE: CoilAddress = CoilAddress(8);

fn config() -> InterlockConfig {
    InterlockConfig {
        arm_required: true,
        max_hold: None,
        igniter_shutoff: Some(GATE),
    }
}

fn interlock_with(config: InterlockConfig) -> (SafetyInterlock, Arc<SimulatedOutput>) {
    let output = Arc::new(SimulatedOutput::new());
    let interlock = SafetyInterlock::new(ChannelMap::default(), config, output.clone());
    (interlock, output)
}

#[test]
fn starts_disarmed_and_all_off() {
    let (interlock, output) = interlock_with(config());
    let snapshot = interlock.snapshot();
    assert_eq!(snapshot.arm, ArmState::Disarmed);
    assert_eq!(snapshot.channels, vec![ChannelState::Off; 4]);
    assert!(output.writes().is_empty());
}

#[test]
fn firing_while_disarmed_is_refused_and_leaves_channel_off() {
    let (interlock, output) = interlock_with(config());

    let err = interlock.set_channel(2, true).unwrap_err();
    assert_eq!(err, InterlockError::NotArmed);
    assert_eq!(interlock.channel_state(2), Some(ChannelState::Off));
    assert!(output.writes().is_empty());

    // Switching off never needs the arm.
    interlock.set_channel(2, false).unwrap();
}

#[test]
fn arm_and_disarm_drive_the_igniter_gate() {
    let (interlock, output) = interlock_with(config());

    interlock.arm().unwrap();
    assert!(interlock.is_armed());
    assert!(!output.coil(GATE));

    interlock.set_channel(0, true).unwrap();
    assert!(output.coil(CoilAddress(0)));

    interlock.disarm().unwrap();
    assert_eq!(interlock.arm_state(), ArmState::Disarmed);
    assert!(output.coil(GATE));
    // Disarm alone does not clear channels.
    assert_eq!(interlock.channel_state(0), Some(ChannelState::On));
}

#[test]
fn failed_arm_write_stays_disarmed() {
    let output = Arc::new(SimulatedOutput::failing([GATE]));
    let interlock = SafetyInterlock::new(ChannelMap::default(), config(), output.clone());

    let err = interlock.arm().unwrap_err();
    assert!(matches!(err, InterlockError::Hardware(HardwareError::Write { .. })));
    assert_eq!(interlock.arm_state(), ArmState::Disarmed);
}

#[test]
fn failed_disarm_write_still_disarms() {
    let (interlock, output) = interlock_with(config());
    interlock.arm().unwrap();
    output.set_failing(GATE, true);

    assert!(interlock.disarm().is_err());
    assert_eq!(interlock.arm_state(), ArmState::Disarmed);
}

#[test]
fn channel_index_checks() {
    let output = Arc::new(SimulatedOutput::new());
    let map = ChannelMap::from_raw(&[Some(0), None, Some(2)]);
    let interlock = SafetyInterlock::new(map, config(), output);
    interlock.arm().unwrap();

    assert_eq!(
        interlock.set_channel(1, true).unwrap_err(),
        InterlockError::Unmapped(1)
    );
    assert_eq!(
        interlock.set_channel(3, true).unwrap_err(),
        InterlockError::InvalidChannel(3)
    );
    interlock.set_channel(2, true).unwrap();
}

#[test]
fn arm_not_required_allows_firing_while_disarmed() {
    let (interlock, output) = interlock_with(InterlockConfig {
        arm_required: false,
        ..config()
    });
    interlock.set_channel(1, true).unwrap();
    assert!(output.coil(CoilAddress(1)));
    assert_eq!(interlock.arm_state(), ArmState::Disarmed);
}

#[test]
fn all_off_and_disarm_secures_remaining_channels_when_one_write_fails() {
    let (interlock, output) = interlock_with(config());
    interlock.arm().unwrap();
    for channel in 0..4 {
        interlock.set_channel(channel, true).unwrap();
    }
    output.set_failing(CoilAddress(1), true);

    let report = interlock.all_off_and_disarm();

    assert_eq!(report.channel_failures.len(), 1);
    assert_eq!(report.channel_failures[0].0, 1);
    assert_eq!(report.disarm_failure, None);
    assert!(!report.is_clean());

    let snapshot = interlock.snapshot();
    assert_eq!(snapshot.arm, ArmState::Disarmed);
    assert!(snapshot.all_off());
    for coil in [0, 2, 3] {
        assert!(!output.coil(CoilAddress(coil)), "coil {coil} left on");
    }
    assert!(output.coil(GATE));
}

#[test]
fn hold_timer_releases_and_notifies() {
    let (interlock, output) = interlock_with(InterlockConfig {
        max_hold: Some(Duration::from_millis(30)),
        ..config()
    });
    let (tx, rx) = mpsc::channel();
    let tx = std::sync::Mutex::new(tx);
    interlock.set_notifier(Arc::new(move |notice| {
        let _ = tx.lock().unwrap().send(notice);
    }));
    interlock.arm().unwrap();
    interlock.set_channel(3, true).unwrap();

    let notice = rx.recv_timeout(Duration::from_secs(2)).expect("auto release");
    assert_eq!(
        notice,
        InterlockNotice::AutoReleased {
            channel: 3,
            after_s: 0.03
        }
    );
    assert_eq!(interlock.channel_state(3), Some(ChannelState::Off));
    assert!(!output.coil(CoilAddress(3)));
    // Auto-release leaves the arm alone.
    assert!(interlock.is_armed());
}

#[test]
fn hold_timer_ignores_channel_switched_off_in_time() {
    let (interlock, _output) = interlock_with(InterlockConfig {
        max_hold: Some(Duration::from_millis(30)),
        ..config()
    });
    let (tx, rx) = mpsc::channel();
    let tx = std::sync::Mutex::new(tx);
    interlock.set_notifier(Arc::new(move |notice| {
        let _ = tx.lock().unwrap().send(notice);
    }));
    interlock.arm().unwrap();
    interlock.set_channel(0, true).unwrap();
    interlock.set_channel(0, false).unwrap();

    assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
}

#[test]
fn replace_output_sweeps_the_old_output() {
    let (interlock, old) = interlock_with(config());
    interlock.arm().unwrap();
    interlock.set_channel(0, true).unwrap();

    let new = Arc::new(SimulatedOutput::new());
    let report = interlock.replace_output(new.clone());

    assert!(report.is_clean());
    assert!(!old.coil(CoilAddress(0)));
    assert!(old.coil(GATE));
    assert_eq!(interlock.arm_state(), ArmState::Disarmed);

    interlock.arm().unwrap();
    interlock.set_channel(2, true).unwrap();
    assert!(new.coil(CoilAddress(2)));
    assert!(!old.coil(CoilAddress(2)));
}

#[test]
fn dropping_an_armed_interlock_sweeps() {
    let (interlock, output) = interlock_with(config());
    interlock.arm().unwrap();
    interlock.set_channel(1, true).unwrap();

    drop(interlock);

    assert!(!output.coil(CoilAddress(1)));
    assert!(output.coil(GATE));
}

#[test]
fn settings_with_out_of_range_hold_disable_the_timer() {
    use firebeat_ports::storage::SettingsDto;

    for max_hold_s in [1e300, f64::INFINITY, f64::NAN, -1.0, 0.0] {
        let settings = SettingsDto {
            max_hold_s,
            ..SettingsDto::default()
        };
        assert_eq!(InterlockConfig::from_settings(&settings).max_hold, None);
    }
    let settings = SettingsDto {
        max_hold_s: 2.5,
        ..SettingsDto::default()
    };
    assert_eq!(
        InterlockConfig::from_settings(&settings).max_hold,
        Some(Duration::from_millis(2500))
    );
}
