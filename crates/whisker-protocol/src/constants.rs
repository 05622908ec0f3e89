//! 协议常量定义

/// 广播执行器 ID：命令作用于所有执行器
pub const ALL_ACTUATORS: u32 = 999;

/// 每条遥测记录的字段数
pub const TELEMETRY_FIELD_COUNT: usize = 6;

/// 遥测记录字段名（按线路顺序），同时用作 CSV 表头
pub const TELEMETRY_FIELDS: [&str; TELEMETRY_FIELD_COUNT] = [
    "timestamp",
    "channel_id",
    "actuator_id",
    "is_moving",
    "position_steps",
    "sensor_value",
];

/// 命令终止符（回车，0x0D）
pub const COMMAND_TERMINATOR: u8 = b'\r';

/// 遥测记录终止符
pub const LINE_TERMINATOR: u8 = b'\n';

/// 设备启动完成后发送的握手字节
pub const HANDSHAKE_BYTE: u8 = b'!';

/// 默认串口波特率（需与固件一致）
pub const DEFAULT_BIT_RATE: u32 = 921_600;

/// 步进电机每转步数
pub const DEFAULT_STEPS_PER_REVOLUTION: u32 = 400;

/// 默认采样周期（微秒），50Hz
pub const DEFAULT_SAMPLING_PERIOD_US: u32 = 20_000;
