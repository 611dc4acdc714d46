use crate::model::AttendanceStatus;

/// Successor of a day's marking: Unmarked -> Present -> Absent -> Late -> Unmarked.
/// Total and pure; four applications return the input.
pub fn next_status(current: Option<AttendanceStatus>) -> Option<AttendanceStatus> {
    use AttendanceStatus::{Absent, Late, Present};
    match current {
        None => Some(Present),
        Some(Present) => Some(Absent),
        Some(Absent) => Some(Late),
        Some(Late) => None,
    }
}
