use std::cmp::Ordering;

use serde::Serialize;

use crate::model::{date_key, AttendanceStatus, AttendanceThresholds, Class, Student, StudentId};

pub fn days_in_month(year: i32, month0: u32) -> u32 {
    let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    match month0 + 1 {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if leap => 29,
        2 => 28,
        _ => 30,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Excellent,
    Good,
    Moderate,
    Risk,
}

impl Band {
    pub fn classify(percentage: f64, thresholds: &AttendanceThresholds) -> Band {
        if percentage >= thresholds.excellent {
            Band::Excellent
        } else if percentage >= thresholds.good {
            Band::Good
        } else if percentage >= thresholds.moderate {
            Band::Moderate
        } else {
            Band::Risk
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentMonthStats {
    pub student_id: StudentId,
    pub roll_no: String,
    pub name: String,
    /// Days marked P or L.
    pub present: u32,
    /// Days carrying any mark; unmarked days do not count against a student.
    pub marked: u32,
    pub percentage: f64,
    pub band: Band,
}

pub fn student_month(
    student: &Student,
    year: i32,
    month0: u32,
    thresholds: &AttendanceThresholds,
) -> StudentMonthStats {
    let mut present = 0u32;
    let mut marked = 0u32;
    for day in 1..=days_in_month(year, month0) {
        if let Some(status) = student.attendance.get(&date_key(year, month0, day)) {
            marked += 1;
            if matches!(status, AttendanceStatus::Present | AttendanceStatus::Late) {
                present += 1;
            }
        }
    }
    let percentage = if marked > 0 {
        f64::from(present) / f64::from(marked) * 100.0
    } else {
        0.0
    };
    StudentMonthStats {
        student_id: student.id,
        roll_no: student.roll_no.clone(),
        name: student.name.clone(),
        present,
        marked,
        percentage,
        band: Band::classify(percentage, thresholds),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassMonthStats {
    pub class_id: i64,
    pub student_count: usize,
    pub avg_attendance: f64,
    pub at_risk_count: usize,
    pub excellent_count: usize,
    /// Sorted by percentage, best first.
    pub students: Vec<StudentMonthStats>,
}

pub fn class_month(
    class: &Class,
    year: i32,
    month0: u32,
    default_thresholds: &AttendanceThresholds,
) -> ClassMonthStats {
    let thresholds = class.thresholds.as_ref().unwrap_or(default_thresholds);
    let mut total_present = 0u32;
    let mut total_marked = 0u32;
    let mut students: Vec<StudentMonthStats> = class
        .students
        .iter()
        .map(|s| {
            let row = student_month(s, year, month0, thresholds);
            total_present += row.present;
            total_marked += row.marked;
            row
        })
        .collect();
    students.sort_by(|a, b| {
        b.percentage
            .partial_cmp(&a.percentage)
            .unwrap_or(Ordering::Equal)
    });
    let avg_attendance = if total_marked > 0 {
        f64::from(total_present) / f64::from(total_marked) * 100.0
    } else {
        0.0
    };
    ClassMonthStats {
        class_id: class.id,
        student_count: class.students.len(),
        avg_attendance,
        at_risk_count: students.iter().filter(|s| s.band == Band::Risk).count(),
        excellent_count: students
            .iter()
            .filter(|s| s.band == Band::Excellent)
            .count(),
        students,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewStats {
    pub total_classes: usize,
    pub total_students: usize,
    pub overall_attendance: f64,
    pub at_risk_count: usize,
    pub excellent_count: usize,
}

pub fn overview(
    classes: &[Class],
    year: i32,
    month0: u32,
    default_thresholds: &AttendanceThresholds,
) -> OverviewStats {
    let mut total_students = 0usize;
    let mut total_present = 0u32;
    let mut total_marked = 0u32;
    let mut at_risk_count = 0usize;
    let mut excellent_count = 0usize;
    for class in classes {
        let thresholds = class.thresholds.as_ref().unwrap_or(default_thresholds);
        total_students += class.students.len();
        for student in &class.students {
            let row = student_month(student, year, month0, thresholds);
            total_present += row.present;
            total_marked += row.marked;
            match row.band {
                Band::Risk => at_risk_count += 1,
                Band::Excellent => excellent_count += 1,
                _ => {}
            }
        }
    }
    let overall_attendance = if total_marked > 0 {
        f64::from(total_present) / f64::from(total_marked) * 100.0
    } else {
        0.0
    };
    OverviewStats {
        total_classes: classes.len(),
        total_students,
        overall_attendance,
        at_risk_count,
        excellent_count,
    }
}
