//! 实验台端到端场景测试
//!
//! 使用 MockTransport 驱动完整的 Rig（采集线程 + 状态机 + 编码器），
//! 不需要硬件。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use whisker_sdk::prelude::*;
use whisker_sdk::serial::mock::MockTransport;

const WAIT: Duration = Duration::from_secs(5);

fn config(channels_per_actuator: u32) -> RigConfig {
    let text = format!(
        r#"
[timing]
calibration_settle_ms = 20
startup_delay_ms = 0

[log]
enabled = false

[[topology]]
address = 0
channels_per_actuator = {}
actuators = [{{ motor = 1, side = "right" }}, {{ motor = 2, side = "left" }}]
"#,
        channels_per_actuator
    );
    RigConfig::from_toml_str(&text).unwrap()
}

fn start(config: RigConfig) -> (Rig, MockTransport) {
    let probe = MockTransport::new();
    let rig = RigBuilder::new(config).build(probe.clone()).unwrap();
    probe.clear_written();
    (rig, probe)
}

fn line(ts: u64, channel: u32, actuator: u32, moving: bool, steps: i64, sensor: u32) -> String {
    format!(
        "{} {} {} {} {} {}",
        ts, channel, actuator, moving as u8, steps, sensor
    )
}

/// 等待采集线程消费完所有已注入的行
///
/// 请求在读完一轮数据后才会被处理，因此应答返回时前面的行都已应用。
fn settle(rig: &Rig, probe: &MockTransport) {
    let deadline = Instant::now() + WAIT;
    while probe.pending_lines() > 0 {
        assert!(Instant::now() < deadline, "ingestion thread stalled");
        thread::sleep(Duration::from_millis(1));
    }
    rig.set_contact_behavior(rig.motion_status().behavior).unwrap();
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

/// 持续输出静止帧的模拟设备
///
/// 每帧先单独输出第一条记录（帧边界），稍后再输出其余通道，
/// 给等待 `frame_ready` 的线程留出观察窗口。
struct Feeder {
    running: Arc<AtomicBool>,
    sensors: Arc<Vec<AtomicU32>>,
    handle: Option<JoinHandle<()>>,
}

impl Feeder {
    fn start(probe: &MockTransport, channels_per_actuator: u32, sensors: &[u32]) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let sensors: Arc<Vec<AtomicU32>> =
            Arc::new(sensors.iter().map(|&v| AtomicU32::new(v)).collect());

        let handle = {
            let probe = probe.clone();
            let running = running.clone();
            let sensors = sensors.clone();
            thread::spawn(move || {
                let mut ts = 1u64;
                while running.load(Ordering::Acquire) {
                    let lines: Vec<String> = sensors
                        .iter()
                        .enumerate()
                        .map(|(channel, sensor)| {
                            let channel = channel as u32;
                            line(
                                ts,
                                channel,
                                channel / channels_per_actuator,
                                false,
                                50,
                                sensor.load(Ordering::Relaxed),
                            )
                        })
                        .collect();
                    probe.push_line(&lines[0]);
                    thread::sleep(Duration::from_millis(1));
                    probe.push_lines(&lines[1..]);
                    thread::sleep(Duration::from_millis(1));
                    ts += 1;
                }
            })
        };

        Self {
            running,
            sensors,
            handle: Some(handle),
        }
    }

    fn set_sensor(&self, channel: usize, value: u32) {
        self.sensors[channel].store(value, Ordering::Relaxed);
    }
}

impl Drop for Feeder {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// 在 `haystack` 中按顺序查找 `needles`，返回是否全部找到
fn contains_in_order(haystack: &[String], needles: &[&str]) -> bool {
    let mut rest = haystack.iter();
    needles
        .iter()
        .all(|needle| rest.by_ref().any(|item| item == needle))
}

#[test]
fn test_three_frames_yield_two_decisions() {
    let (rig, probe) = start(config(2));

    for ts in 0..3u64 {
        for channel in 0..4u32 {
            probe.push_line(line(ts, channel, channel / 2, false, ts as i64, 0));
        }
    }
    settle(&rig, &probe);

    let metrics = rig.metrics();
    assert_eq!(metrics.decisions, 2);
    assert_eq!(metrics.frames, 2);
    assert_eq!(metrics.records_valid, 12);

    let snapshot = rig.snapshot();
    assert_eq!(snapshot.frame_timestamp, 1);
    assert!(snapshot.channels.iter().all(|c| c.position_steps == 1));
    rig.shutdown().unwrap();
}

#[test]
fn test_sweep_complete_waits_out_grace_frames() {
    let (rig, probe) = start(config(1));

    rig.sweep(ActuatorTarget::All).unwrap();
    assert!(!rig.signals().sweep_complete.is_set());
    assert_eq!(rig.motion_status().grace, 4);

    // 设备刚收到命令时仍报告静止：4 个帧内不宣告完成
    for ts in 1..=4u64 {
        probe.push_lines([line(ts, 0, 0, false, 22, 0), line(ts, 1, 1, false, 22, 0)]);
    }
    settle(&rig, &probe);
    assert!(!rig.signals().sweep_complete.is_set());
    assert_eq!(rig.motion_status().grace, 0);

    probe.push_line(line(5, 0, 0, false, 22, 0));
    settle(&rig, &probe);
    assert!(rig.signals().sweep_complete.is_set());
    rig.shutdown().unwrap();
}

#[test]
fn test_motion_resets_grace_and_blocks_completion() {
    let (rig, probe) = start(config(1));

    rig.sweep(ActuatorTarget::All).unwrap();
    probe.push_lines([line(1, 0, 0, false, 22, 0), line(1, 1, 1, false, 22, 0)]);
    // 设备开始运动：宽限计数清零，仍未完成
    probe.push_lines([line(2, 0, 0, true, 60, 0), line(2, 1, 1, true, 60, 0)]);
    probe.push_line(line(3, 0, 0, false, 133, 0));
    settle(&rig, &probe);
    assert_eq!(rig.motion_status().grace, 0);
    assert!(!rig.signals().sweep_complete.is_set());

    // 运动结束后的第一个静止帧即宣告完成
    probe.push_line(line(3, 1, 1, false, 133, 0));
    probe.push_line(line(4, 0, 0, false, 133, 0));
    settle(&rig, &probe);
    assert!(rig.signals().sweep_complete.is_set());
    rig.shutdown().unwrap();
}

#[test]
fn test_sweep_command_bytes_are_paced() {
    let (rig, probe) = start(config(1));

    rig.sweep(ActuatorTarget::All).unwrap();
    rig.retract(ActuatorTarget::Single(1)).unwrap();

    let log = probe.written_log();
    let bytes: Vec<u8> = log.iter().map(|w| w.byte).collect();
    assert_eq!(bytes, b"whisk 999\rretract 1\r".to_vec());

    for pair in log[..10].windows(2) {
        assert!(pair[1].at.duration_since(pair[0].at) >= Duration::from_micros(10));
    }
    // 终止符之后至少等待 10ms 才发送下一条命令
    assert!(log[10].at.duration_since(log[9].at) >= Duration::from_millis(10));
    rig.shutdown().unwrap();
}

#[test]
fn test_malformed_lines_do_not_touch_registry() {
    let (rig, probe) = start(config(1));

    probe.push_lines([
        "",
        "garbage",
        "1 0 0 2 5 5",
        "1 0 0 0 5",
        "1 0 0 0 5 5 5",
        "1 0 0 0 x 5",
    ]);
    settle(&rig, &probe);

    let metrics = rig.metrics();
    assert_eq!(metrics.lines_total, 6);
    assert_eq!(metrics.malformed, 6);
    assert_eq!(metrics.records_valid, 0);
    assert_eq!(metrics.frames, 0);

    let snapshot = rig.snapshot();
    assert!(
        snapshot
            .channels
            .iter()
            .all(|c| c.position_steps == 0 && c.sensor_value == 0)
    );
    rig.shutdown().unwrap();
}

#[test]
fn test_out_of_range_channel_is_discarded() {
    let (rig, probe) = start(config(1));

    probe.push_lines([
        line(1, 0, 0, false, 10, 100),
        line(1, 7, 3, false, 10, 100),
        line(1, 1, 1, false, 10, 100),
        line(2, 0, 0, false, 10, 100),
    ]);
    settle(&rig, &probe);

    let metrics = rig.metrics();
    assert_eq!(metrics.out_of_range, 1);
    assert_eq!(metrics.records_valid, 3);
    assert_eq!(rig.snapshot().channels.len(), 2);
    rig.shutdown().unwrap();
}

#[test]
fn test_transport_failure_surfaces_to_caller() {
    let (rig, probe) = start(config(1));

    probe.set_fail_writes(true);
    let err = rig.sweep(ActuatorTarget::All).unwrap_err();
    assert!(matches!(err, DriverError::Transport(_)));

    let err = rig.start_sweeping().unwrap_err();
    assert!(matches!(err, DriverError::Transport(_)));

    // 写失败的命令不产生任何副作用
    let status = rig.motion_status();
    assert_eq!(status.grace, 0);
    assert!(!status.continuous);
    assert_eq!(rig.metrics().command_failures, 2);

    probe.set_fail_writes(false);
    rig.shutdown().unwrap();
}

#[test]
fn test_target_commands_update_snapshot() {
    let (rig, probe) = start(config(1));

    rig.set_protraction(ActuatorTarget::Single(1), 150).unwrap();
    rig.set_retraction(ActuatorTarget::All, 30).unwrap();
    assert_eq!(
        probe.written_commands(),
        vec!["set_prot 1 150", "set_ret 999 30"]
    );

    // 目标值随下一次发布的快照可见
    probe.push_lines([line(1, 0, 0, false, 0, 0), line(2, 0, 0, false, 0, 0)]);
    settle(&rig, &probe);
    let snapshot = rig.snapshot();
    assert_eq!(snapshot.actuators[0].protraction_target_steps, 133);
    assert_eq!(snapshot.actuators[1].protraction_target_steps, 150);
    assert!(snapshot.actuators.iter().all(|a| a.retraction_target_steps == 30));
    rig.shutdown().unwrap();
}

#[test]
fn test_channel_history_is_exported_on_request() {
    let (rig, probe) = start(config(1));

    probe.push_lines([
        line(1, 0, 0, true, 10, 100),
        line(1, 1, 1, true, 11, 200),
        line(2, 0, 0, false, 12, 105),
        "noise".to_string(),
        line(2, 5, 2, false, 99, 999),
    ]);
    settle(&rig, &probe);

    let history = rig.channel_history(0).unwrap();
    let pairs: Vec<_> = history
        .iter()
        .map(|h| (h.position_steps, h.sensor_value))
        .collect();
    assert_eq!(pairs, vec![(10, 100), (12, 105)]);
    assert_eq!(rig.channel_history(1).unwrap().len(), 1);

    let err = rig.channel_history(5).unwrap_err();
    assert!(matches!(err, DriverError::ChannelOutOfRange { .. }));
    rig.shutdown().unwrap();
}

#[test]
fn test_calibration_sets_thresholds_from_resting_values() {
    let (rig, probe) = start(config(2));
    let _feeder = Feeder::start(&probe, 2, &[300, 310, 320, 330]);

    let started = Instant::now();
    let snapshot = rig.calibrate().unwrap();
    // 阈值在静置等待之后才采集
    assert!(started.elapsed() >= Duration::from_millis(20));
    let thresholds: Vec<_> = snapshot
        .channels
        .iter()
        .map(|c| c.contact_threshold)
        .collect();
    assert_eq!(thresholds, vec![Some(400), Some(410), Some(420), Some(430)]);
    assert!(snapshot.is_calibrated());

    assert!(contains_in_order(&probe.written_commands(), &["retract 999"]));
    assert!(!rig.motion_status().suspended);
    rig.shutdown().unwrap();
}

#[test]
fn test_contact_triggers_palpation_and_restores_targets() {
    let (rig, probe) = start(config(1));
    let feeder = Feeder::start(&probe, 1, &[300, 300]);

    rig.calibrate().unwrap();
    rig.start_sweeping().unwrap();
    assert!(rig.motion_status().continuous);

    // 连续扫动：每次扫动完成都会重新扫动
    wait_until(|| {
        probe
            .written_commands()
            .iter()
            .filter(|c| *c == "whisk 999")
            .count()
            >= 2
    });

    feeder.set_sensor(0, 500);
    wait_until(|| rig.metrics().contacts >= 1);
    feeder.set_sensor(0, 300);
    wait_until(|| rig.metrics().palpations_completed >= 1);
    rig.stop_sweeping().unwrap();

    // 中心 50 步：收回目标 50-6 并拉回，伸出目标 50+22；三次触探后恢复默认并收回
    let commands = probe.written_commands();
    assert!(contains_in_order(
        &commands,
        &[
            "set_ret 999 44",
            "retract 999",
            "set_prot 999 72",
            "whisk 999",
            "whisk 999",
            "whisk 999",
            "set_ret 999 22",
            "set_prot 999 133",
            "retract 999",
        ]
    ));

    let status = rig.motion_status();
    assert!(!status.palpation.active);
    assert_eq!(status.palpation.probe_count, 3);
    assert_eq!(status.palpation.center_steps, 50);

    let snapshot = rig.snapshot();
    assert!(snapshot.actuators.iter().all(|a| {
        a.protraction_target_steps == 133 && a.retraction_target_steps == 22
    }));
    drop(feeder);
    rig.shutdown().unwrap();
}

#[test]
fn test_ignore_behavior_keeps_sweeping_through_contact() {
    let (rig, probe) = start(config(1));
    let feeder = Feeder::start(&probe, 1, &[300, 300]);

    rig.calibrate().unwrap();
    rig.set_contact_behavior(ContactBehavior::Ignore).unwrap();
    feeder.set_sensor(1, 900);
    rig.start_sweeping().unwrap();

    wait_until(|| {
        probe
            .written_commands()
            .iter()
            .filter(|c| *c == "whisk 999")
            .count()
            >= 3
    });
    rig.stop_sweeping().unwrap();

    assert_eq!(rig.metrics().contacts, 0);
    assert!(!rig.motion_status().palpation.active);
    assert!(
        !probe
            .written_commands()
            .iter()
            .any(|c| c.starts_with("set_ret"))
    );
    drop(feeder);
    rig.shutdown().unwrap();
}

#[test]
fn test_wait_helpers_time_out_without_telemetry() {
    let (rig, _probe) = start(config(1));

    rig.sweep(ActuatorTarget::All).unwrap();
    let err = rig
        .wait_sweep_complete_timeout(Duration::from_millis(50))
        .unwrap_err();
    assert!(matches!(err, DriverError::Timeout));
    rig.shutdown().unwrap();
}

#[test]
fn test_shutdown_persists_telemetry_csv() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(1);
    config.log.enabled = true;
    config.log.directory = dir.path().to_path_buf();
    config.log.title = Some("trial".to_string());

    let (rig, probe) = start(config);
    let path = rig.log_path().unwrap().to_path_buf();
    probe.push_lines([
        line(1, 0, 0, false, 22, 301),
        line(1, 1, 1, false, 22, 302),
        "corrupt".to_string(),
        line(2, 0, 0, true, 40, 303),
    ]);
    settle(&rig, &probe);
    rig.shutdown().unwrap();

    let text = std::fs::read_to_string(path).unwrap();
    let rows: Vec<&str> = text.lines().collect();
    assert_eq!(
        rows,
        vec![
            "timestamp,channel_id,actuator_id,is_moving,position_steps,sensor_value",
            "1,0,0,0,22,301",
            "1,1,1,0,22,302",
            "2,0,0,1,40,303",
        ]
    );
}

#[test]
fn test_shutdown_stops_sampling() {
    let (rig, probe) = start(config(1));
    assert!(rig.is_healthy());
    rig.shutdown().unwrap();
    assert_eq!(probe.written_commands(), vec!["set_sampling 0"]);
}
