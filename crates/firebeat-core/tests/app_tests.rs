use firebeat_core::{
    AppCore, AppError, ArmState, ChannelState, Command, Event, InterlockError, OutputFactory,
    ShowError, ShowStatus,
};
use firebeat_domain_chart::{ChannelPolicyError, PackageError, ScheduleError};
use firebeat_infra_sim::{SilentPlayback, SimulatedOutput};
use firebeat_ports::audio::{AudioError, AudioPlaybackPort, PlaybackHandle, SongFile};
use firebeat_ports::hardware::HardwareOutputPort;
use firebeat_ports::storage::{SettingsDto, StorageError, StoragePort};
use firebeat_ports::types::CoilAddress;
use pretty_assertions::assert_eq;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use zip::write::FileOptions;
use zip::ZipWriter;

static ARCHIVE_SEQ: AtomicUsize = AtomicUsize::new(0);

fn write_archive(info: &str, maps: &[(&str, String)]) -> PathBuf {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.start_file("Info.dat", FileOptions::default()).unwrap();
    writer.write_all(info.as_bytes()).unwrap();
    for (name, body) in maps {
        writer.start_file(*name, FileOptions::default()).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.start_file("song.wav", FileOptions::default()).unwrap();
    writer.write_all(b"RIFF").unwrap();
    let bytes = writer.finish().unwrap().into_inner();

    let path = std::env::temp_dir().join(format!(
        "firebeat-app-{}-{}.zip",
        std::process::id(),
        ARCHIVE_SEQ.fetch_add(1, Ordering::SeqCst)
    ));
    std::fs::write(&path, bytes).unwrap();
    path
}

fn info(bpm: f64) -> String {
    format!(r#"{{"_version":"2.0.0","_beatsPerMinute":{bpm},"_songFilename":"song.wav"}}"#)
}

fn legacy_map(beats: &[f64]) -> String {
    let notes: Vec<String> = beats
        .iter()
        .map(|beat| format!(r#"{{"_time":{beat},"_lineIndex":0}}"#))
        .collect();
    format!(r#"{{"_version":"2.0.0","_notes":[{}]}}"#, notes.join(","))
}

struct Rig {
    core: AppCore,
    dry: Arc<SimulatedOutput>,
    live: Arc<SimulatedOutput>,
}

fn rig(rate: f64) -> Rig {
    rig_with_audio(Arc::new(SilentPlayback::with_rate(rate)))
}

fn rig_with_audio(audio: Arc<dyn AudioPlaybackPort>) -> Rig {
    let dry = Arc::new(SimulatedOutput::new());
    let live = Arc::new(SimulatedOutput::new());
    let outputs: OutputFactory = {
        let dry = dry.clone();
        let live = live.clone();
        Box::new(move |dry_run| {
            let output: Arc<dyn HardwareOutputPort> =
                if dry_run { dry.clone() } else { live.clone() };
            Ok(output)
        })
    };
    let settings = SettingsDto {
        igniter_arm_delay_s: 0.0,
        poll_interval_ms: 5,
        ..SettingsDto::default()
    };
    let core = AppCore::with_settings(
        settings,
        audio,
        outputs,
        None,
    )
    .unwrap();
    Rig { core, dry, live }
}

fn statuses(events: &[Event]) -> Vec<ShowStatus> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::ShowStatusUpdated { status, .. } => Some(*status),
            _ => None,
        })
        .collect()
}

#[test]
fn show_runs_to_done_and_leaves_everything_off() {
    let mut rig = rig(20.0);
    let archive = write_archive(&info(120.0), &[("Easy.dat", legacy_map(&[0.0, 1.0, 2.0, 3.0]))]);

    let show_id = rig
        .core
        .start_show(&archive, "Easy.dat", Some("modulus"))
        .unwrap();
    assert_eq!(show_id, "show-1");
    assert_eq!(rig.core.wait_show(&show_id), Some(ShowStatus::Done));

    let events = rig.core.drain_events();
    assert_eq!(
        statuses(&events),
        vec![ShowStatus::Queued, ShowStatus::Running, ShowStatus::Done]
    );
    for coil in 0..4 {
        let fired = rig
            .dry
            .writes()
            .iter()
            .any(|write| write.coil == CoilAddress(coil) && write.on);
        assert!(fired, "coil {coil} never fired");
        assert!(!rig.dry.coil(CoilAddress(coil)));
    }
    assert!(rig.dry.coil(CoilAddress(8)), "igniter gate left open");
    assert_eq!(rig.core.interlock().arm_state(), ArmState::Disarmed);
    assert!(rig.live.writes().is_empty());

    let summaries = rig.core.show_summaries();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].message, "Completed successfully");
    assert!(summaries[0].elapsed_s.is_some());
    assert_eq!(rig.core.running_show(), None);
}

#[test]
fn stop_show_ends_as_stopped() {
    let mut rig = rig(1.0);
    let archive = write_archive(&info(60.0), &[("Long.dat", legacy_map(&[30.0, 60.0, 90.0]))]);

    let show_id = rig.core.start_show(&archive, "Long.dat", None).unwrap();
    assert_eq!(rig.core.running_show(), Some(show_id.clone()));

    let second = rig.core.start_show(&archive, "Long.dat", None);
    assert!(matches!(second, Err(AppError::ShowRunning(id)) if id == show_id));
    assert!(matches!(
        rig.core.set_dry_run(false),
        Err(AppError::ShowRunning(_))
    ));

    rig.core
        .handle_command(Command::StopShow {
            show_id: show_id.clone(),
        })
        .unwrap();
    assert_eq!(rig.core.wait_show(&show_id), Some(ShowStatus::Stopped));
    assert!(rig.core.interlock().snapshot().all_off());
    assert_eq!(rig.core.interlock().arm_state(), ArmState::Disarmed);

    // Stopping a finished show is a no-op.
    rig.core.stop_show(&show_id).unwrap();
    assert!(matches!(
        rig.core.stop_show("show-99"),
        Err(AppError::UnknownShow(_))
    ));
}

#[test]
fn configuration_errors_reject_before_any_hardware_action() {
    let mut rig = rig(20.0);
    let good = write_archive(&info(120.0), &[("Easy.dat", legacy_map(&[0.0]))]);
    let zero_bpm = write_archive(&info(0.0), &[("Easy.dat", legacy_map(&[0.0]))]);
    let empty = write_archive(&info(120.0), &[("Easy.dat", legacy_map(&[]))]);

    let err = rig.core.start_show(&good, "Easy.dat", Some("random")).unwrap_err();
    assert!(matches!(err, AppError::Policy(ChannelPolicyError::Unknown(name)) if name == "random"));

    let err = rig.core.start_show(&good, "Hard.dat", None).unwrap_err();
    assert!(matches!(
        err,
        AppError::Show(ShowError::Package(PackageError::MissingEntry(_)))
    ));

    let err = rig.core.start_show(&zero_bpm, "Easy.dat", None).unwrap_err();
    assert!(matches!(
        err,
        AppError::Show(ShowError::Schedule(ScheduleError::InvalidBpm(_)))
    ));

    let err = rig.core.start_show(&empty, "Easy.dat", None).unwrap_err();
    assert!(matches!(
        err,
        AppError::Show(ShowError::Schedule(ScheduleError::EmptySchedule))
    ));

    assert!(rig.core.show_summaries().is_empty());
    assert!(rig.dry.writes().is_empty());
}

#[test]
fn manual_channel_control_requires_arm() {
    let mut rig = rig(1.0);

    let err = rig
        .core
        .handle_command(Command::SetChannel { channel: 1, on: true })
        .unwrap_err();
    assert!(matches!(err, AppError::Interlock(InterlockError::NotArmed)));

    rig.core
        .handle_command(Command::SetArmed { armed: true })
        .unwrap();
    rig.core
        .handle_command(Command::SetChannel { channel: 1, on: true })
        .unwrap();
    assert!(rig.dry.coil(CoilAddress(1)));

    rig.core.handle_command(Command::AllOff).unwrap();
    assert!(!rig.dry.coil(CoilAddress(1)));

    let events = rig.core.drain_events();
    assert_eq!(
        events[..2].to_vec(),
        vec![
            Event::InterlockUpdated {
                arm: ArmState::Armed
            },
            Event::ChannelStateUpdated {
                channel: 1,
                state: ChannelState::On
            },
        ]
    );
    assert_eq!(
        events[2],
        Event::InterlockUpdated {
            arm: ArmState::Disarmed
        }
    );
    assert_eq!(events.len(), 7);
}

#[test]
fn switching_to_live_sweeps_the_dry_output() {
    let mut rig = rig(1.0);
    assert!(rig.core.is_dry_run());
    rig.core
        .handle_command(Command::SetArmed { armed: true })
        .unwrap();
    rig.core.set_channel(0, true).unwrap();

    rig.core
        .handle_command(Command::SetDryRun { on: false })
        .unwrap();

    assert!(!rig.core.is_dry_run());
    assert!(!rig.dry.coil(CoilAddress(0)));
    assert!(rig.dry.coil(CoilAddress(8)));
    assert_eq!(rig.core.interlock().arm_state(), ArmState::Disarmed);
    assert!(rig.core.drain_events().contains(&Event::DryRunUpdated {
        on: false,
        output: "simulated".to_string(),
    }));

    rig.core.interlock().arm().unwrap();
    rig.core.set_channel(3, true).unwrap();
    assert!(rig.live.coil(CoilAddress(3)));
}

#[test]
fn query_status_reports_interlock_and_shows() {
    let mut rig = rig(1.0);
    rig.core.handle_command(Command::QueryStatus).unwrap();
    let events = rig.core.drain_events();
    match &events[..] {
        [Event::StatusReport {
            interlock,
            dry_run,
            shows,
            settings,
        }] => {
            assert_eq!(interlock.arm, ArmState::Disarmed);
            assert!(*dry_run);
            assert!(shows.is_empty());
            assert_eq!(settings.poll_interval_ms, 5);
        }
        other => panic!("unexpected events {other:?}"),
    }
}

#[test]
fn commands_round_trip_through_json() {
    let cmd: Command = serde_json::from_str(
        r#"{"type":"StartShow","payload":{"archive":"a.zip","map_file":"Easy.dat","method":"position"}}"#,
    )
    .unwrap();
    assert_eq!(
        cmd,
        Command::StartShow {
            archive: "a.zip".to_string(),
            map_file: "Easy.dat".to_string(),
            method: Some("position".to_string()),
        }
    );

    let event = Event::ShowStatusUpdated {
        show_id: "show-1".to_string(),
        status: ShowStatus::Done,
        message: "ok".to_string(),
    };
    assert_eq!(
        serde_json::to_value(&event).unwrap(),
        serde_json::json!({
            "type": "ShowStatusUpdated",
            "payload": {"show_id": "show-1", "status": "done", "message": "ok"}
        })
    );
}

struct PanickingAudio;

impl AudioPlaybackPort for PanickingAudio {
    fn start(&self, _song: &SongFile) -> Result<Box<dyn PlaybackHandle>, AudioError> {
        panic!("audio backend blew up");
    }
}

fn wait_for_terminal(core: &AppCore, show_id: &str) -> Option<ShowStatus> {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let status = core.show_status(show_id);
        if status.is_some_and(ShowStatus::is_terminal) || Instant::now() > deadline {
            return status;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn far_future_beat_keeps_waiting_until_stopped() {
    let mut rig = rig(20.0);
    let archive = write_archive(&info(120.0), &[("Far.dat", legacy_map(&[0.0, 1e300]))]);

    let show_id = rig.core.start_show(&archive, "Far.dat", None).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(rig.core.show_status(&show_id), Some(ShowStatus::Running));
    assert!(rig
        .dry
        .writes()
        .iter()
        .any(|write| write.coil == CoilAddress(0) && write.on));

    rig.core.stop_show(&show_id).unwrap();
    assert_eq!(wait_for_terminal(&rig.core, &show_id), Some(ShowStatus::Stopped));
    assert_eq!(rig.core.running_show(), None);
    assert!(rig.core.interlock().snapshot().all_off());
}

#[test]
fn beat_that_overflows_to_infinity_is_rejected_at_start() {
    let mut rig = rig(20.0);
    let archive = write_archive(&info(1e-300), &[("Slow.dat", legacy_map(&[0.0, 1e10]))]);

    let err = rig.core.start_show(&archive, "Slow.dat", None).unwrap_err();
    assert!(matches!(
        err,
        AppError::Show(ShowError::Schedule(ScheduleError::NonFiniteTime { .. }))
    ));
    assert!(rig.core.show_summaries().is_empty());
    assert!(rig.dry.writes().is_empty());
}

#[test]
fn panicking_worker_ends_as_error_without_wait_show() {
    let mut rig = rig_with_audio(Arc::new(PanickingAudio));
    let archive = write_archive(&info(120.0), &[("Easy.dat", legacy_map(&[0.0, 1.0]))]);

    let show_id = rig.core.start_show(&archive, "Easy.dat", None).unwrap();
    assert_eq!(wait_for_terminal(&rig.core, &show_id), Some(ShowStatus::Error));
    assert_eq!(rig.core.running_show(), None);
    assert_eq!(rig.core.interlock().arm_state(), ArmState::Disarmed);
    assert!(rig.core.interlock().snapshot().all_off());

    let next = rig.core.start_show(&archive, "Easy.dat", None);
    assert!(!matches!(next, Err(AppError::ShowRunning(_))));
}

struct CorruptStorage {
    saves: AtomicUsize,
}

impl StoragePort for CorruptStorage {
    fn load_settings(&self) -> Result<SettingsDto, StorageError> {
        Err(StorageError::Serde("expected value at line 1 column 1".to_string()))
    }

    fn save_settings(&self, _settings: &SettingsDto) -> Result<(), StorageError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn unreadable_settings_fall_back_to_defaults() {
    let outputs: OutputFactory = Box::new(|_| {
        let output: Arc<dyn HardwareOutputPort> = Arc::new(SimulatedOutput::new());
        Ok(output)
    });
    let storage = Box::new(CorruptStorage {
        saves: AtomicUsize::new(0),
    });
    let core = AppCore::new(Arc::new(SilentPlayback::new()), outputs, Some(storage)).unwrap();

    assert_eq!(core.settings(), &SettingsDto::default());
    assert!(core.is_dry_run());
}
