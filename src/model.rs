use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

pub type ClassId = i64;
pub type StudentId = i64;

/// Wire codes match what the class service stores: P / A / L.
/// Unmarked is the absence of a map entry, never a fourth code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    #[serde(rename = "P")]
    Present,
    #[serde(rename = "A")]
    Absent,
    #[serde(rename = "L")]
    Late,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Number,
    Select,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomColumn {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// Ascending percentage cut-points: atRisk <= moderate <= good <= excellent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceThresholds {
    pub excellent: f64,
    pub good: f64,
    pub moderate: f64,
    pub at_risk: f64,
}

impl Default for AttendanceThresholds {
    fn default() -> Self {
        AttendanceThresholds {
            excellent: 95.0,
            good: 90.0,
            moderate: 85.0,
            at_risk: 85.0,
        }
    }
}

impl AttendanceThresholds {
    pub fn is_ordered(&self) -> bool {
        self.at_risk <= self.moderate && self.moderate <= self.good && self.good <= self.excellent
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: StudentId,
    pub roll_no: String,
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_attendance")]
    pub attendance: BTreeMap<String, AttendanceStatus>,
    /// Custom-column values keyed by column id. Open bag on the wire.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Student {
    pub fn blank(id: StudentId) -> Self {
        Student {
            id,
            roll_no: String::new(),
            name: String::new(),
            attendance: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

/// Snapshots written by older frontends may carry explicit nulls for
/// unmarked days. Drop them so the in-memory map stays minimal; a null
/// value and a missing key must read the same.
fn deserialize_attendance<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, AttendanceStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, Option<AttendanceStatus>>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(key, status)| status.map(|s| (key, s)))
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: ClassId,
    pub name: String,
    #[serde(default)]
    pub students: Vec<Student>,
    #[serde(default)]
    pub custom_columns: Vec<CustomColumn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<AttendanceThresholds>,
}

/// The one place attendance-map keys are spelled. `month0` is zero-based;
/// the stored format is un-padded (`2025-3-7`), matching existing data.
/// The two separators keep keys unambiguous, so padding is not needed for
/// uniqueness.
pub fn date_key(year: i32, month0: u32, day: u32) -> String {
    format!("{}-{}-{}", year, month0 + 1, day)
}

pub mod ids {
    use uuid::Uuid;

    /// Random 63-bit id. Keeps the wire type integer while removing the
    /// collision window a clock-based source has within one session.
    pub fn numeric() -> i64 {
        let (hi, _) = Uuid::new_v4().as_u64_pair();
        (hi & i64::MAX as u64) as i64
    }

    pub fn column() -> String {
        format!("col-{}", Uuid::new_v4().simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_key_is_unpadded_and_one_based() {
        assert_eq!(date_key(2025, 0, 7), "2025-1-7");
        assert_eq!(date_key(2025, 10, 2), "2025-11-2");
        assert_eq!(date_key(2024, 11, 31), "2024-12-31");
    }

    #[test]
    fn explicit_null_attendance_reads_as_unmarked() {
        let student: Student = serde_json::from_str(
            r#"{"id":1,"rollNo":"7","name":"Ada","attendance":{"2025-1-5":"P","2025-1-6":null}}"#,
        )
        .expect("parse student");
        assert_eq!(
            student.attendance.get("2025-1-5"),
            Some(&AttendanceStatus::Present)
        );
        assert!(!student.attendance.contains_key("2025-1-6"));
    }

    #[test]
    fn custom_column_values_flatten_into_bag() {
        let student: Student = serde_json::from_str(
            r#"{"id":1,"rollNo":"","name":"","attendance":{},"col-abc":"blue"}"#,
        )
        .expect("parse student");
        assert_eq!(
            student.extra.get("col-abc"),
            Some(&serde_json::Value::String("blue".into()))
        );

        let back = serde_json::to_value(&student).expect("serialize student");
        assert_eq!(back.get("col-abc").and_then(|v| v.as_str()), Some("blue"));
    }

    #[test]
    fn class_without_students_field_gets_empty_roster() {
        let class: Class =
            serde_json::from_str(r#"{"id":5,"name":"Physics","customColumns":[]}"#).expect("parse");
        assert!(class.students.is_empty());
        assert!(class.thresholds.is_none());
    }

    #[test]
    fn generated_ids_are_distinct() {
        let a = ids::numeric();
        let b = ids::numeric();
        assert!(a >= 0);
        assert_ne!(a, b);
        assert_ne!(ids::column(), ids::column());
    }
}
