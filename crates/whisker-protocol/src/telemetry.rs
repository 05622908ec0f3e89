//! 遥测记录解析
//!
//! 设备在采样开启后，每个采样周期为每个通道输出一行记录：
//!
//! ```text
//! timestamp channel_id actuator_id is_moving position_steps sensor_value\n
//! ```
//!
//! 所有字段均为非负十进制整数，`is_moving` 只能为 `0` 或 `1`。
//! 任何不符合该格式的行都视为损坏记录（由上层丢弃并记录日志）。

use crate::{ProtocolError, TELEMETRY_FIELD_COUNT, TELEMETRY_FIELDS};
use std::fmt;
use std::str::FromStr;

/// 单条遥测记录（一个通道在一个采样时刻的状态）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TelemetryRecord {
    /// 设备时间戳（同一帧内所有通道共享）
    pub timestamp: u64,
    /// 通道 ID（从 0 开始的连续编号）
    pub channel_id: u32,
    /// 所属执行器 ID
    pub actuator_id: u32,
    /// 执行器是否处于运动中
    pub is_moving: bool,
    /// 当前位置（步）
    pub position_steps: i64,
    /// 传感器读数
    pub sensor_value: u32,
}

impl TelemetryRecord {
    /// 从原始字节行解析
    ///
    /// 行尾的 `\r`/`\n` 会被忽略。非 UTF-8 字节返回 [`ProtocolError::Encoding`]。
    pub fn parse_line(line: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(line).map_err(|_| ProtocolError::Encoding)?;
        text.parse()
    }

    /// 按线路字段顺序渲染为 CSV 行（不含换行）
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{}",
            self.timestamp,
            self.channel_id,
            self.actuator_id,
            u8::from(self.is_moving),
            self.position_steps,
            self.sensor_value
        )
    }
}

/// 解析单个非负整数字段
///
/// 只接受纯 ASCII 数字（拒绝 `+`、`-`、空串），溢出同样视为非法。
fn parse_field<T: FromStr>(index: usize, raw: &str) -> Result<T, ProtocolError> {
    let not_numeric = || ProtocolError::NotNumeric {
        field: TELEMETRY_FIELDS[index],
        value: raw.to_string(),
    };

    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(not_numeric());
    }
    raw.parse::<T>().map_err(|_| not_numeric())
}

impl FromStr for TelemetryRecord {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        let fields: Vec<&str> = line.split_ascii_whitespace().collect();

        if fields.len() != TELEMETRY_FIELD_COUNT {
            return Err(ProtocolError::FieldCount {
                expected: TELEMETRY_FIELD_COUNT,
                actual: fields.len(),
            });
        }

        let timestamp: u64 = parse_field(0, fields[0])?;
        let channel_id: u32 = parse_field(1, fields[1])?;
        let actuator_id: u32 = parse_field(2, fields[2])?;
        let status: u64 = parse_field(3, fields[3])?;
        let position_steps: i64 = parse_field(4, fields[4])?;
        let sensor_value: u32 = parse_field(5, fields[5])?;

        let is_moving = match status {
            0 => false,
            1 => true,
            other => return Err(ProtocolError::InvalidStatus(other)),
        };

        Ok(Self {
            timestamp,
            channel_id,
            actuator_id,
            is_moving,
            position_steps,
            sensor_value,
        })
    }
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.timestamp,
            self.channel_id,
            self.actuator_id,
            u8::from(self.is_moving),
            self.position_steps,
            self.sensor_value
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_valid_line() {
        let record = TelemetryRecord::parse_line(b"1200 3 1 1 57 412\n").unwrap();
        assert_eq!(record.timestamp, 1200);
        assert_eq!(record.channel_id, 3);
        assert_eq!(record.actuator_id, 1);
        assert!(record.is_moving);
        assert_eq!(record.position_steps, 57);
        assert_eq!(record.sensor_value, 412);
    }

    #[test]
    fn test_parse_tolerates_crlf_and_repeated_spaces() {
        let record: TelemetryRecord = "7  0 0 0 22   88\r\n".parse().unwrap();
        assert_eq!(record.timestamp, 7);
        assert!(!record.is_moving);
        assert_eq!(record.sensor_value, 88);
    }

    #[test]
    fn test_wrong_field_count() {
        let err = TelemetryRecord::parse_line(b"1 2 3 4 5").unwrap_err();
        assert_eq!(
            err,
            ProtocolError::FieldCount {
                expected: 6,
                actual: 5
            }
        );

        let err = TelemetryRecord::parse_line(b"1 2 3 4 5 6 7").unwrap_err();
        assert!(matches!(err, ProtocolError::FieldCount { actual: 7, .. }));

        let err = TelemetryRecord::parse_line(b"").unwrap_err();
        assert!(matches!(err, ProtocolError::FieldCount { actual: 0, .. }));
    }

    #[test]
    fn test_non_numeric_fields_rejected() {
        for line in [
            "1 2 3 0 -5 6",
            "1 2 3 0 +5 6",
            "1 2 x 0 5 6",
            "1.0 2 3 0 5 6",
            "1 2 3 0 5 0x10",
        ] {
            let err = line.parse::<TelemetryRecord>().unwrap_err();
            assert!(
                matches!(err, ProtocolError::NotNumeric { .. }),
                "line {:?} gave {:?}",
                line,
                err
            );
        }
    }

    #[test]
    fn test_overflow_rejected() {
        let err = "1 99999999999 0 0 0 0".parse::<TelemetryRecord>().unwrap_err();
        assert_eq!(
            err,
            ProtocolError::NotNumeric {
                field: "channel_id",
                value: "99999999999".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_status() {
        let err = "1 0 0 2 0 0".parse::<TelemetryRecord>().unwrap_err();
        assert_eq!(err, ProtocolError::InvalidStatus(2));
    }

    #[test]
    fn test_invalid_utf8() {
        let err = TelemetryRecord::parse_line(&[0x31, 0x20, 0xFF, 0xFE]).unwrap_err();
        assert_eq!(err, ProtocolError::Encoding);
    }

    #[test]
    fn test_csv_row_and_display() {
        let record: TelemetryRecord = "10 1 0 1 30 500".parse().unwrap();
        assert_eq!(record.to_csv_row(), "10,1,0,1,30,500");
        assert_eq!(record.to_string(), "10 1 0 1 30 500");
    }

    proptest! {
        #[test]
        fn prop_display_parses_back(
            timestamp in any::<u64>(),
            channel_id in any::<u32>(),
            actuator_id in any::<u32>(),
            is_moving in any::<bool>(),
            position_steps in 0i64..i64::MAX,
            sensor_value in any::<u32>(),
        ) {
            let record = TelemetryRecord {
                timestamp, channel_id, actuator_id, is_moving, position_steps, sensor_value,
            };
            let parsed: TelemetryRecord = record.to_string().parse().unwrap();
            prop_assert_eq!(parsed, record);
        }

        #[test]
        fn prop_garbage_never_panics(line in "\\PC{0,64}") {
            let _ = line.parse::<TelemetryRecord>();
        }
    }
}
