use firebeat_domain_chart::{
    select_reader, ChannelPolicy, ChannelPolicyError, Pulse, ScheduleBuilder, ScheduleError,
};
use pretty_assertions::assert_eq;

fn starts(pulses: &[Pulse]) -> Vec<f64> {
    pulses.iter().map(|pulse| pulse.start_s).collect()
}

fn channels(pulses: &[Pulse]) -> Vec<usize> {
    pulses.iter().map(|pulse| pulse.channel).collect()
}

#[test]
fn legacy_chart_at_120_bpm_round_robins_four_channels() {
    let chart = br#"{
        "_version": "2.0.0",
        "_notes": [
            {"_time": 0, "_lineIndex": 3, "_lineLayer": 0, "_type": 0, "_cutDirection": 1},
            {"_time": 1, "_lineIndex": 2, "_lineLayer": 0, "_type": 1, "_cutDirection": 1},
            {"_time": 2, "_lineIndex": 1, "_lineLayer": 0, "_type": 0, "_cutDirection": 1},
            {"_time": 3, "_lineIndex": 0, "_lineLayer": 0, "_type": 1, "_cutDirection": 1}
        ]
    }"#;
    let bound = select_reader(chart).expect("valid chart");
    let builder = ScheduleBuilder::new(120.0, 0.1, ChannelPolicy::Modulus, 4);
    let extraction = bound.extract_notes(&builder).expect("schedule");
    let pulses = extraction.schedule.pulses();

    assert_eq!(starts(pulses), vec![0.0, 0.5, 1.0, 1.5]);
    assert_eq!(channels(pulses), vec![0, 1, 2, 3]);
    assert!(pulses
        .iter()
        .all(|pulse| (pulse.end_s - pulse.start_s - 0.1).abs() < 1e-12));
    assert_eq!(extraction.report.skipped, 0);
}

#[test]
fn modern_chart_falls_back_to_events_when_color_notes_empty() {
    let chart = br#"{
        "version": "3.2.0",
        "colorNotes": [],
        "basicBeatmapEvents": [
            {"b": 0, "et": 1, "i": 3, "f": 1},
            {"b": 4, "et": 1, "i": 0, "f": 1}
        ]
    }"#;
    let bound = select_reader(chart).expect("valid chart");
    let builder = ScheduleBuilder::new(60.0, 0.1, ChannelPolicy::Modulus, 4);
    let extraction = bound.extract_notes(&builder).expect("schedule");

    assert_eq!(starts(extraction.schedule.pulses()), vec![0.0, 4.0]);
    assert_eq!(
        extraction.report.source.as_deref(),
        Some("basicBeatmapEvents")
    );
}

#[test]
fn modern_chart_prefers_color_notes() {
    let chart = br#"{
        "version": "3.0.0",
        "colorNotes": [{"b": 2, "x": 1, "y": 0, "c": 0, "d": 1, "a": 0}],
        "basicBeatmapEvents": [{"b": 0}, {"b": 1}]
    }"#;
    let bound = select_reader(chart).expect("valid chart");
    let builder = ScheduleBuilder::new(60.0, 0.1, ChannelPolicy::Modulus, 4);
    let extraction = bound.extract_notes(&builder).expect("schedule");

    assert_eq!(starts(extraction.schedule.pulses()), vec![2.0]);
    assert_eq!(extraction.report.source.as_deref(), Some("colorNotes"));
}

#[test]
fn zero_bpm_is_rejected_before_any_pulse() {
    let chart = br#"{"_version":"2.0.0","_notes":[{"_time":0},{"_time":1}]}"#;
    let bound = select_reader(chart).expect("valid chart");
    let builder = ScheduleBuilder::new(0.0, 0.1, ChannelPolicy::Modulus, 4);

    let result = bound.extract_notes(&builder);
    assert_eq!(result, Err(ScheduleError::InvalidBpm(0.0)));

    let negative = ScheduleBuilder::new(-90.0, 0.1, ChannelPolicy::Modulus, 4);
    assert!(matches!(
        bound.extract_notes(&negative),
        Err(ScheduleError::InvalidBpm(_))
    ));
}

#[test]
fn malformed_legacy_records_are_skipped_and_counted() {
    let chart = br#"{
        "_version": "2.2.0",
        "_notes": [
            {"_time": 0},
            {"_lineIndex": 1},
            {"_time": "soon"},
            42,
            {"_time": -1},
            {"_time": 2}
        ]
    }"#;
    let bound = select_reader(chart).expect("valid chart");
    let builder = ScheduleBuilder::new(60.0, 0.1, ChannelPolicy::Modulus, 4);
    let extraction = bound.extract_notes(&builder).expect("partial schedule");

    assert_eq!(starts(extraction.schedule.pulses()), vec![0.0, 2.0]);
    assert_eq!(channels(extraction.schedule.pulses()), vec![0, 1]);
    assert_eq!(extraction.report.total_records, 6);
    assert_eq!(extraction.report.skipped, 4);
    assert_eq!(extraction.report.warnings.len(), 4);
    assert!(extraction.report.warnings[0].contains("_time"));
}

#[test]
fn all_records_malformed_is_an_empty_schedule() {
    let chart = br#"{"_version":"2.0.0","_notes":[{"_lineIndex":1}]}"#;
    let bound = select_reader(chart).expect("valid chart");
    let builder = ScheduleBuilder::new(60.0, 0.1, ChannelPolicy::Modulus, 4);
    assert_eq!(
        bound.extract_notes(&builder),
        Err(ScheduleError::EmptySchedule)
    );
}

#[test]
fn chart_without_notes_is_an_empty_schedule() {
    let builder = ScheduleBuilder::new(60.0, 0.1, ChannelPolicy::Modulus, 4);

    let legacy = select_reader(br#"{"_version":"2.0.0"}"#).expect("valid chart");
    assert_eq!(
        legacy.extract_notes(&builder),
        Err(ScheduleError::EmptySchedule)
    );

    let modern =
        select_reader(br#"{"version":"3.0.0","colorNotes":null}"#).expect("valid chart");
    assert_eq!(
        modern.extract_notes(&builder),
        Err(ScheduleError::EmptySchedule)
    );
}

#[test]
fn position_policy_follows_lane_hint() {
    let chart = br#"{
        "version": "3.2.0",
        "colorNotes": [
            {"b": 0, "x": 3},
            {"b": 1, "x": 3},
            {"b": 2, "x": 0},
            {"b": 3, "x": 5},
            {"b": 4}
        ]
    }"#;
    let bound = select_reader(chart).expect("valid chart");
    let builder = ScheduleBuilder::new(60.0, 0.1, ChannelPolicy::Position, 4);
    let extraction = bound.extract_notes(&builder).expect("schedule");

    assert_eq!(channels(extraction.schedule.pulses()), vec![3, 3, 0, 1, 0]);
}

#[test]
fn channel_policy_names_are_strict() {
    assert_eq!("modulus".parse(), Ok(ChannelPolicy::Modulus));
    assert_eq!("normal".parse(), Ok(ChannelPolicy::Modulus));
    assert_eq!("Position".parse(), Ok(ChannelPolicy::Position));
    assert_eq!(
        "random".parse::<ChannelPolicy>(),
        Err(ChannelPolicyError::Unknown("random".to_string()))
    );
    assert!("".parse::<ChannelPolicy>().is_err());
}
