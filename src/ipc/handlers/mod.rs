pub mod attendance;
pub mod classes;
pub mod core;
pub mod qr;
pub mod reports;
pub mod students;
pub mod sync;

use serde_json::Value;

pub(crate) fn param_str(params: &Value, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

pub(crate) fn param_i64(params: &Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

/// `(year, month0)` pair used by every calendar-scoped method; month0 is
/// zero-based like the original frontend's month state.
pub(crate) fn param_month(params: &Value) -> Option<(i32, u32)> {
    let year = params.get("year").and_then(|v| v.as_i64())? as i32;
    let month0 = params.get("month0").and_then(|v| v.as_u64())?;
    if month0 > 11 {
        return None;
    }
    Some((year, month0 as u32))
}
