//! 步数与角度换算

/// 步数转角度（度）
pub fn steps_to_degrees(steps: i64, steps_per_revolution: u32) -> f64 {
    (360.0 / steps_per_revolution as f64) * steps as f64
}

/// 角度（度）转步数，四舍五入到最近的整步
pub fn degrees_to_steps(degrees: f64, steps_per_revolution: u32) -> i64 {
    ((steps_per_revolution as f64 / 360.0) * degrees).round() as i64
}
