//! Roster rows returned by the directory procedures
//!
//! Each procedure names its columns differently (`teacher_name`, `studentName`,
//! plain `name`, ...); rows are normalized once here so callers never probe
//! for alternative keys.

use serde::{Deserialize, Serialize};

/// One teacher in a school roster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawTeacher")]
pub struct TeacherSummary {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub is_supervisor: bool,
}

#[derive(Deserialize)]
struct RawTeacher {
    id: Option<String>,
    teacher_id: Option<String>,
    user_id: Option<String>,
    teacher_name: Option<String>,
    #[serde(rename = "teacherName")]
    teacher_name_camel: Option<String>,
    full_name: Option<String>,
    name: Option<String>,
    email: Option<String>,
    is_supervisor: Option<bool>,
    #[serde(rename = "isSupervisor")]
    is_supervisor_camel: Option<bool>,
}

impl From<RawTeacher> for TeacherSummary {
    fn from(raw: RawTeacher) -> Self {
        Self {
            id: raw.id.or(raw.teacher_id).or(raw.user_id).unwrap_or_default(),
            name: raw
                .teacher_name
                .or(raw.teacher_name_camel)
                .or(raw.full_name)
                .or(raw.name)
                .unwrap_or_else(|| "Unnamed teacher".to_string()),
            email: raw.email,
            is_supervisor: raw.is_supervisor.or(raw.is_supervisor_camel).unwrap_or(false),
        }
    }
}

/// One student in a school or class listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawStudent")]
pub struct StudentSummary {
    pub id: String,
    pub name: String,
    pub grade_level: Option<String>,
    pub class_name: Option<String>,
}

#[derive(Deserialize)]
struct RawStudent {
    id: Option<String>,
    student_id: Option<String>,
    #[serde(rename = "studentId")]
    student_id_camel: Option<String>,
    student_name: Option<String>,
    #[serde(rename = "studentName")]
    student_name_camel: Option<String>,
    full_name: Option<String>,
    name: Option<String>,
    grade_level: Option<String>,
    #[serde(rename = "gradeLevel")]
    grade_level_camel: Option<String>,
    grade: Option<String>,
    class_name: Option<String>,
    #[serde(rename = "className")]
    class_name_camel: Option<String>,
}

impl From<RawStudent> for StudentSummary {
    fn from(raw: RawStudent) -> Self {
        Self {
            id: raw
                .id
                .or(raw.student_id)
                .or(raw.student_id_camel)
                .unwrap_or_default(),
            name: raw
                .student_name
                .or(raw.student_name_camel)
                .or(raw.full_name)
                .or(raw.name)
                .unwrap_or_else(|| "Unnamed student".to_string()),
            grade_level: raw.grade_level.or(raw.grade_level_camel).or(raw.grade),
            class_name: raw.class_name.or(raw.class_name_camel),
        }
    }
}
