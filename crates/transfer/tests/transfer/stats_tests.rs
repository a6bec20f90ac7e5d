use super::*;

#[test]
fn record_should_hold_samples_until_interval_passes() {
    let start = Instant::now();
    let mut meter = TransferMeter::new(4 * 1024 * 1024, start);

    assert_eq!(meter.record(1024, start + Duration::from_millis(100)), None);
    assert_eq!(meter.record(1024, start + Duration::from_millis(499)), None);
    assert!(meter.record(0, start + Duration::from_millis(500)).is_some());
    assert_eq!(meter.transferred(), 2048);
}

#[test]
fn sample_should_report_rate_since_previous_sample() {
    let start = Instant::now();
    let total = 10 * 1024 * 1024;
    let mut meter = TransferMeter::new(total, start);

    let first = meter
        .record(1024 * 1024, start + Duration::from_secs(1))
        .expect("first sample");
    assert!((first.speed_mbps - 1.0).abs() < 1e-9);
    let eta = first.eta_seconds.expect("eta");
    assert!((eta - 9.0).abs() < 1e-9);
    assert!((first.elapsed_seconds - 1.0).abs() < 1e-9);

    let second = meter
        .record(2 * 1024 * 1024, start + Duration::from_secs(2))
        .expect("second sample");
    assert!((second.speed_mbps - 2.0).abs() < 1e-9);
    assert!((second.eta_seconds.expect("eta") - 3.5).abs() < 1e-9);
}

#[test]
fn stalled_transfer_should_have_no_eta() {
    let start = Instant::now();
    let mut meter = TransferMeter::new(100, start);

    let sample = meter
        .record(0, start + Duration::from_secs(1))
        .expect("sample");
    assert_eq!(sample.speed_mbps, 0.0);
    assert_eq!(sample.eta_seconds, None);
}

#[test]
fn percent_should_clamp_and_treat_empty_total_as_done() {
    assert_eq!(percent(0, 30), 0);
    assert_eq!(percent(10, 30), 33);
    assert_eq!(percent(30, 30), 100);
    assert_eq!(percent(64, 30), 100);
    assert_eq!(percent(0, 0), 100);
    assert_eq!(percent(u64::MAX, u64::MAX), 100);
}
