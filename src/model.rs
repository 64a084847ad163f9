use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Teacher,
    Student,
    Director,
    Proctor,
    Tutor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Teacher => "TEACHER",
            Role::Student => "STUDENT",
            Role::Director => "DIRECTOR",
            Role::Proctor => "PROCTOR",
            Role::Tutor => "TUTOR",
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Director | Role::Proctor)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    /// Accepts the canonical names and the legacy Spanish role labels
    /// that existing account exports still carry.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "TEACHER" | "DOCENTE" => Ok(Role::Teacher),
            "STUDENT" | "ESTUDIANTE" => Ok(Role::Student),
            "DIRECTOR" | "DIRECTIVO" => Ok(Role::Director),
            "PROCTOR" | "PRECEPTOR" => Ok(Role::Proctor),
            "TUTOR" => Ok(Role::Tutor),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(de)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Patch fields: an absent key stays `None`, an explicit `null` becomes
/// `Some(None)`.
pub(crate) fn double_option<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PromotionStatus {
    #[default]
    Pending,
    Promoted,
    Repeating,
}

impl PromotionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionStatus::Pending => "Pending",
            PromotionStatus::Promoted => "Promoted",
            PromotionStatus::Repeating => "Repeating",
        }
    }
}

impl FromStr for PromotionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(PromotionStatus::Pending),
            "Promoted" => Ok(PromotionStatus::Promoted),
            "Repeating" => Ok(PromotionStatus::Repeating),
            other => Err(format!("unknown promotion status: {}", other)),
        }
    }
}

/// One of the three grading periods of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "u8")]
pub struct Trimester(u8);

impl Trimester {
    pub const ALL: [Trimester; 3] = [Trimester(1), Trimester(2), Trimester(3)];

    pub fn new(n: i64) -> Option<Self> {
        if (1..=3).contains(&n) {
            Some(Trimester(n as u8))
        } else {
            None
        }
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl From<Trimester> for u8 {
    fn from(t: Trimester) -> u8 {
        t.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub id: String,
    pub name: String,
    pub email: String,
    pub national_id: String,
    pub phone: Option<String>,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tutor_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children_ids: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicCycle {
    pub id: String,
    pub name: String,
    pub start_date: String,
    pub end_date: String,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classroom {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub lead_staff_id: Option<String>,
    pub substitute_staff_id: Option<String>,
    pub aide_staff_id: Option<String>,
}

impl Subject {
    pub fn has_staff(&self, teacher_id: &str) -> bool {
        [
            &self.lead_staff_id,
            &self.substitute_staff_id,
            &self.aide_staff_id,
        ]
        .iter()
        .any(|s| s.as_deref() == Some(teacher_id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub classroom_id: String,
    pub academic_cycle_id: String,
    pub enrolled_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRecord {
    pub id: String,
    pub student_id: String,
    pub subject_id: String,
    pub academic_cycle_id: String,
    pub trimester: Trimester,
    pub grade: f64,
    pub teacher_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A teacher's syllabus for one subject in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub id: String,
    pub teacher_id: String,
    pub subject_id: String,
    pub academic_cycle_id: String,
    pub title: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_accepts_legacy_labels() {
        assert_eq!("docente".parse::<Role>(), Ok(Role::Teacher));
        assert_eq!(" ESTUDIANTE ".parse::<Role>(), Ok(Role::Student));
        assert_eq!("Directivo".parse::<Role>(), Ok(Role::Director));
        assert_eq!("preceptor".parse::<Role>(), Ok(Role::Proctor));
        assert!("janitor".parse::<Role>().is_err());
    }

    #[test]
    fn role_deserializes_through_labels() {
        let r: Role = serde_json::from_value(serde_json::json!("tutor")).expect("role");
        assert_eq!(r, Role::Tutor);
        assert_eq!(serde_json::to_value(Role::Proctor).expect("json"), "PROCTOR");
    }

    #[test]
    fn trimester_bounds() {
        assert!(Trimester::new(0).is_none());
        assert_eq!(Trimester::new(2).map(|t| t.get()), Some(2));
        assert!(Trimester::new(4).is_none());
    }

    #[test]
    fn subject_staff_match_covers_all_three_roles() {
        let s = Subject {
            id: "s".into(),
            name: "Math".into(),
            description: None,
            lead_staff_id: Some("t1".into()),
            substitute_staff_id: None,
            aide_staff_id: Some("t3".into()),
        };
        assert!(s.has_staff("t1"));
        assert!(s.has_staff("t3"));
        assert!(!s.has_staff("t2"));
    }
}
