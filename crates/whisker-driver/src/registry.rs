//! 通道注册表
//!
//! 保存每个通道、每个执行器的配置与最新状态。注册表只由采集线程持有和修改；
//! 其他线程通过帧边界发布的 [`RegistrySnapshot`] 读取。

use crate::error::DriverError;
use serde::Serialize;
use std::cmp::Ordering;
use std::ops::Range;
use whisker_protocol::{ActuatorTarget, Side, TelemetryRecord};

/// 通道历史中的一条记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub position_steps: i64,
    pub sensor_value: u32,
}

/// 单个传感通道
#[derive(Debug, Clone)]
pub struct Channel {
    /// 通道 ID（从 0 开始连续编号）
    pub id: u32,
    /// 所属执行器
    pub actuator_id: u32,
    /// 最近一次报告的位置（步）
    pub position_steps: i64,
    /// 最近一次报告的传感器读数
    pub sensor_value: u32,
    /// 执行器是否在运动
    pub is_moving: bool,
    /// 接触阈值（标定前为 `None`，不会触发接触）
    pub contact_threshold: Option<u32>,
    /// 最近一次决策时是否处于接触
    pub in_contact: bool,
    history: Vec<HistoryEntry>,
}

impl Channel {
    fn new(id: u32, actuator_id: u32) -> Self {
        Self {
            id,
            actuator_id,
            position_steps: 0,
            sensor_value: 0,
            is_moving: false,
            contact_threshold: None,
            in_contact: false,
            history: Vec::new(),
        }
    }

    /// 读数是否超过接触阈值
    pub fn exceeds_threshold(&self) -> bool {
        self.contact_threshold
            .is_some_and(|threshold| self.sensor_value > threshold)
    }

    /// 追加式历史（仅用于事后导出）
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }
}

/// 单个执行器（一个步进电机，可带多个通道）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Actuator {
    pub id: u32,
    pub side: Side,
    /// 当前伸出目标（步）
    pub protraction_target_steps: i64,
    /// 当前收回目标（步）
    pub retraction_target_steps: i64,
    /// 配置的默认伸出目标
    pub default_protraction_steps: i64,
    /// 配置的默认收回目标
    pub default_retraction_steps: i64,
    /// 最近一次报告的位置（步）
    pub position_steps: i64,
    /// 本执行器拥有的通道 ID 范围
    pub channels: Range<u32>,
}

/// 通道状态快照（不含历史）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelState {
    pub id: u32,
    pub actuator_id: u32,
    pub position_steps: i64,
    pub sensor_value: u32,
    pub is_moving: bool,
    pub contact_threshold: Option<u32>,
    pub in_contact: bool,
}

impl From<&Channel> for ChannelState {
    fn from(channel: &Channel) -> Self {
        Self {
            id: channel.id,
            actuator_id: channel.actuator_id,
            position_steps: channel.position_steps,
            sensor_value: channel.sensor_value,
            is_moving: channel.is_moving,
            contact_threshold: channel.contact_threshold,
            in_contact: channel.in_contact,
        }
    }
}

/// 注册表的不可变快照
///
/// 在帧边界（决策完成、`frame_ready` 置位之前）发布，下一帧开始后即可能过时。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    /// 快照对应帧的设备时间戳
    pub frame_timestamp: u64,
    /// 已完成的帧数
    pub frame_count: u64,
    pub channels: Vec<ChannelState>,
    pub actuators: Vec<Actuator>,
}

impl RegistrySnapshot {
    /// 是否所有通道都已标定
    pub fn is_calibrated(&self) -> bool {
        !self.channels.is_empty() && self.channels.iter().all(|c| c.contact_threshold.is_some())
    }

    /// 当前处于接触的通道
    pub fn contacts(&self) -> impl Iterator<Item = &ChannelState> {
        self.channels.iter().filter(|c| c.in_contact)
    }
}

/// 通道注册表
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: Vec<Channel>,
    actuators: Vec<Actuator>,
    mutations: u64,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个执行器及其通道
    ///
    /// 执行器与通道 ID 按注册顺序连续分配，返回新执行器的 ID。
    /// 只能在采集开始前调用。
    pub fn register_actuator(
        &mut self,
        side: Side,
        channels: u32,
        protraction_steps: i64,
        retraction_steps: i64,
    ) -> u32 {
        let actuator_id = self.actuators.len() as u32;
        let first = self.channels.len() as u32;
        let range = first..first + channels;

        self.channels
            .extend(range.clone().map(|id| Channel::new(id, actuator_id)));
        self.actuators.push(Actuator {
            id: actuator_id,
            side,
            protraction_target_steps: protraction_steps,
            retraction_target_steps: retraction_steps,
            default_protraction_steps: protraction_steps,
            default_retraction_steps: retraction_steps,
            position_steps: 0,
            channels: range,
        });
        actuator_id
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_actuators(&self) -> usize {
        self.actuators.len()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, id: u32) -> Option<&Channel> {
        self.channels.get(id as usize)
    }

    pub fn actuators(&self) -> &[Actuator] {
        &self.actuators
    }

    pub fn actuator(&self, id: u32) -> Option<&Actuator> {
        self.actuators.get(id as usize)
    }

    /// 已应用的遥测记录数
    pub fn mutation_count(&self) -> u64 {
        self.mutations
    }

    /// 应用一条有效遥测记录
    ///
    /// 更新通道的位置、读数和运动状态，并追加一条历史。
    /// 执行器位置取自其通道的最新报告。
    ///
    /// # 错误
    /// - `DriverError::ChannelOutOfRange`: 通道 ID 未注册（不修改任何状态）
    pub fn apply(&mut self, record: &TelemetryRecord) -> Result<(), DriverError> {
        let num_channels = self.channels.len();
        let channel = self
            .channels
            .get_mut(record.channel_id as usize)
            .ok_or(DriverError::ChannelOutOfRange {
                channel_id: record.channel_id,
                num_channels,
            })?;

        channel.position_steps = record.position_steps;
        channel.sensor_value = record.sensor_value;
        channel.is_moving = record.is_moving;
        channel.history.push(HistoryEntry {
            position_steps: record.position_steps,
            sensor_value: record.sensor_value,
        });

        if let Some(actuator) = self.actuators.get_mut(channel.actuator_id as usize) {
            actuator.position_steps = record.position_steps;
        }

        self.mutations += 1;
        Ok(())
    }

    /// 是否有任何通道报告运动中
    pub fn any_moving(&self) -> bool {
        self.channels.iter().any(|c| c.is_moving)
    }

    /// 按当前读数刷新每个通道的接触标志，返回是否有接触
    pub fn update_contacts(&mut self) -> bool {
        let mut any = false;
        for channel in &mut self.channels {
            channel.in_contact = channel.exceeds_threshold();
            any |= channel.in_contact;
        }
        any
    }

    /// 所有执行器最新位置的均值（四舍六入五取偶）
    ///
    /// 在 `i128` 中求和，任意 `i64` 位置都不会溢出。
    pub fn mean_actuator_position(&self) -> i64 {
        if self.actuators.is_empty() {
            return 0;
        }
        let sum: i128 = self
            .actuators
            .iter()
            .map(|a| i128::from(a.position_steps))
            .sum();
        let count = self.actuators.len() as i128;
        let (quotient, remainder) = (sum.div_euclid(count), sum.rem_euclid(count));
        let mean = match (2 * remainder).cmp(&count) {
            Ordering::Less => quotient,
            Ordering::Greater => quotient + 1,
            Ordering::Equal => quotient + (quotient & 1),
        };
        // 均值必然落在 i64 范围内
        mean.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }

    fn targets_mut(&mut self, target: ActuatorTarget) -> impl Iterator<Item = &mut Actuator> {
        self.actuators
            .iter_mut()
            .filter(move |a| match target {
                ActuatorTarget::All => true,
                ActuatorTarget::Single(id) => a.id == id,
            })
    }

    /// 记录已下发的伸出目标
    pub fn set_protraction_target(&mut self, target: ActuatorTarget, steps: i64) {
        for actuator in self.targets_mut(target) {
            actuator.protraction_target_steps = steps;
        }
    }

    /// 记录已下发的收回目标
    pub fn set_retraction_target(&mut self, target: ActuatorTarget, steps: i64) {
        for actuator in self.targets_mut(target) {
            actuator.retraction_target_steps = steps;
        }
    }

    /// 是否所有执行器共享同一组默认目标
    pub fn shared_defaults(&self) -> Option<(i64, i64)> {
        let first = self.actuators.first()?;
        let defaults = (
            first.default_protraction_steps,
            first.default_retraction_steps,
        );
        self.actuators
            .iter()
            .all(|a| (a.default_protraction_steps, a.default_retraction_steps) == defaults)
            .then_some(defaults)
    }

    /// 以当前读数为静息值设置接触阈值
    ///
    /// `threshold[i] = sensor_value[i] + offset`，同时清除接触标志。
    pub fn capture_thresholds(&mut self, offset: u32) {
        for channel in &mut self.channels {
            channel.contact_threshold = Some(channel.sensor_value.saturating_add(offset));
            channel.in_contact = false;
        }
    }

    /// 生成快照
    pub fn snapshot(&self, frame_timestamp: u64, frame_count: u64) -> RegistrySnapshot {
        RegistrySnapshot {
            frame_timestamp,
            frame_count,
            channels: self.channels.iter().map(ChannelState::from).collect(),
            actuators: self.actuators.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_2x2() -> ChannelRegistry {
        let mut registry = ChannelRegistry::new();
        registry.register_actuator(Side::Right, 2, 133, 22);
        registry.register_actuator(Side::Left, 2, 133, 22);
        registry
    }

    fn record(channel_id: u32, moving: bool, steps: i64, sensor: u32) -> TelemetryRecord {
        TelemetryRecord {
            timestamp: 1,
            channel_id,
            actuator_id: channel_id / 2,
            is_moving: moving,
            position_steps: steps,
            sensor_value: sensor,
        }
    }

    #[test]
    fn test_dense_registration() {
        let registry = registry_2x2();
        assert_eq!(registry.num_channels(), 4);
        assert_eq!(registry.actuator(1).unwrap().channels, 2..4);
        assert_eq!(registry.channel(3).unwrap().actuator_id, 1);
        assert!(registry.channel(4).is_none());
    }

    #[test]
    fn test_apply_updates_state_and_history() {
        let mut registry = registry_2x2();
        registry.apply(&record(2, true, 40, 300)).unwrap();
        registry.apply(&record(2, false, 42, 310)).unwrap();

        let channel = registry.channel(2).unwrap();
        assert_eq!(channel.position_steps, 42);
        assert_eq!(channel.sensor_value, 310);
        assert!(!channel.is_moving);
        assert_eq!(channel.history().len(), 2);
        assert_eq!(registry.actuator(1).unwrap().position_steps, 42);
        assert_eq!(registry.mutation_count(), 2);
    }

    #[test]
    fn test_apply_out_of_range_leaves_state() {
        let mut registry = registry_2x2();
        let err = registry.apply(&record(7, true, 1, 1)).unwrap_err();
        assert!(matches!(
            err,
            DriverError::ChannelOutOfRange {
                channel_id: 7,
                num_channels: 4
            }
        ));
        assert_eq!(registry.mutation_count(), 0);
        assert!(!registry.any_moving());
    }

    #[test]
    fn test_contacts_require_calibration() {
        let mut registry = registry_2x2();
        registry.apply(&record(0, false, 10, 5000)).unwrap();
        assert!(!registry.update_contacts());

        registry.capture_thresholds(100);
        assert_eq!(registry.channel(0).unwrap().contact_threshold, Some(5100));
        assert_eq!(registry.channel(1).unwrap().contact_threshold, Some(100));

        registry.apply(&record(1, false, 10, 101)).unwrap();
        assert!(registry.update_contacts());
        assert!(registry.channel(1).unwrap().in_contact);
        assert!(!registry.channel(0).unwrap().in_contact);
    }

    #[test]
    fn test_mean_position_and_targets() {
        let mut registry = registry_2x2();
        registry.apply(&record(0, false, 50, 0)).unwrap();
        registry.apply(&record(2, false, 61, 0)).unwrap();
        assert_eq!(registry.mean_actuator_position(), 56);

        registry.set_retraction_target(ActuatorTarget::All, 50);
        registry.set_protraction_target(ActuatorTarget::Single(1), 78);
        assert_eq!(registry.actuator(0).unwrap().retraction_target_steps, 50);
        assert_eq!(registry.actuator(0).unwrap().protraction_target_steps, 133);
        assert_eq!(registry.actuator(1).unwrap().protraction_target_steps, 78);
        assert_eq!(registry.shared_defaults(), Some((133, 22)));
    }

    #[test]
    fn test_mean_position_rounds_half_to_even() {
        let mut registry = registry_2x2();
        registry.apply(&record(0, false, 2, 0)).unwrap();
        registry.apply(&record(2, false, 3, 0)).unwrap();
        assert_eq!(registry.mean_actuator_position(), 2);

        registry.apply(&record(0, false, 3, 0)).unwrap();
        registry.apply(&record(2, false, 4, 0)).unwrap();
        assert_eq!(registry.mean_actuator_position(), 4);

        registry.apply(&record(0, false, -3, 0)).unwrap();
        registry.apply(&record(2, false, -2, 0)).unwrap();
        assert_eq!(registry.mean_actuator_position(), -2);
    }

    #[test]
    fn test_mean_position_at_extremes() {
        let mut registry = registry_2x2();
        registry.apply(&record(0, false, i64::MAX, 0)).unwrap();
        registry.apply(&record(2, false, i64::MAX, 0)).unwrap();
        assert_eq!(registry.mean_actuator_position(), i64::MAX);

        registry.apply(&record(0, false, i64::MIN, 0)).unwrap();
        registry.apply(&record(2, false, i64::MIN, 0)).unwrap();
        assert_eq!(registry.mean_actuator_position(), i64::MIN);
    }

    #[test]
    fn test_shared_defaults_differ() {
        let mut registry = ChannelRegistry::new();
        registry.register_actuator(Side::Right, 1, 133, 22);
        registry.register_actuator(Side::Right, 1, 150, 22);
        assert_eq!(registry.shared_defaults(), None);
    }

    #[test]
    fn test_snapshot() {
        let mut registry = registry_2x2();
        registry.apply(&record(0, true, 7, 9)).unwrap();
        let snapshot = registry.snapshot(1, 3);
        assert_eq!(snapshot.frame_timestamp, 1);
        assert_eq!(snapshot.frame_count, 3);
        assert_eq!(snapshot.channels.len(), 4);
        assert!(snapshot.channels[0].is_moving);
        assert!(!snapshot.is_calibrated());
        assert_eq!(snapshot.contacts().count(), 0);
    }
}
