use serde::Deserialize;
use std::fmt;

use crate::error::{CoreError, CoreResult};
use crate::model::Role;

/// The authenticated caller, as supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateCycle,
    ActivateCycle,
    ReadCycles,
    ManageAccounts,
    ReadAccounts,
    ManageClassrooms,
    ReadClassrooms,
    Enroll,
    Unenroll,
    ReadEnrollments,
    ManageSubjects,
    ReadSubjects,
    RecordGrades,
    ReadGrades,
    SetPromotion,
    ReadPromotion,
    LinkGuardian,
    ReadGuardians,
    ReconcileGuardians,
    ImportAccounts,
    ReadAnalytics,
    WritePrograms,
    ReadPrograms,
    ManageSettings,
    ReadSettings,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateCycle => "createCycle",
            Operation::ActivateCycle => "activateCycle",
            Operation::ReadCycles => "readCycles",
            Operation::ManageAccounts => "manageAccounts",
            Operation::ReadAccounts => "readAccounts",
            Operation::ManageClassrooms => "manageClassrooms",
            Operation::ReadClassrooms => "readClassrooms",
            Operation::Enroll => "enroll",
            Operation::Unenroll => "unenroll",
            Operation::ReadEnrollments => "readEnrollments",
            Operation::ManageSubjects => "manageSubjects",
            Operation::ReadSubjects => "readSubjects",
            Operation::RecordGrades => "recordGrades",
            Operation::ReadGrades => "readGrades",
            Operation::SetPromotion => "setPromotion",
            Operation::ReadPromotion => "readPromotion",
            Operation::LinkGuardian => "linkGuardian",
            Operation::ReadGuardians => "readGuardians",
            Operation::ReconcileGuardians => "reconcileGuardians",
            Operation::ImportAccounts => "importAccounts",
            Operation::ReadAnalytics => "readAnalytics",
            Operation::WritePrograms => "writePrograms",
            Operation::ReadPrograms => "readPrograms",
            Operation::ManageSettings => "manageSettings",
            Operation::ReadSettings => "readSettings",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role capability table. Ownership rules (a teacher's own subjects, a
/// tutor's own children) are checked by the owning component after this.
pub fn allows(role: Role, op: Operation) -> bool {
    use Operation::*;
    match role {
        Role::Admin => true,
        Role::Director => !matches!(op, ManageSettings),
        Role::Proctor => matches!(
            op,
            ReadCycles
                | ManageAccounts
                | ReadAccounts
                | ManageClassrooms
                | ReadClassrooms
                | Enroll
                | Unenroll
                | ReadEnrollments
                | ManageSubjects
                | ReadSubjects
                | ReadGrades
                | ReadPromotion
                | LinkGuardian
                | ReadGuardians
                | ReconcileGuardians
                | ReadAnalytics
                | ReadPrograms
                | ReadSettings
        ),
        Role::Teacher => matches!(
            op,
            ReadCycles
                | ReadAccounts
                | ReadClassrooms
                | ReadEnrollments
                | ReadSubjects
                | RecordGrades
                | ReadGrades
                | ReadAnalytics
                | WritePrograms
                | ReadPrograms
                | ReadSettings
        ),
        Role::Tutor => matches!(
            op,
            ReadCycles | ReadSubjects | ReadGrades | ReadPromotion | LinkGuardian | ReadGuardians
        ),
        Role::Student => matches!(op, ReadCycles | ReadSubjects | ReadGrades | ReadPromotion),
    }
}

pub fn authorize(principal: &Principal, op: Operation) -> CoreResult<()> {
    if allows(principal.role, op) {
        Ok(())
    } else {
        tracing::warn!(actor = %principal.id, role = %principal.role, operation = %op, "denied");
        Err(CoreError::Permission {
            role: principal.role,
            operation: op,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_admin_and_director_touch_cycles_and_promotion() {
        for role in [Role::Admin, Role::Director] {
            assert!(allows(role, Operation::CreateCycle));
            assert!(allows(role, Operation::ActivateCycle));
            assert!(allows(role, Operation::SetPromotion));
        }
        for role in [Role::Proctor, Role::Teacher, Role::Tutor, Role::Student] {
            assert!(!allows(role, Operation::CreateCycle));
            assert!(!allows(role, Operation::ActivateCycle));
            assert!(!allows(role, Operation::SetPromotion));
        }
    }

    #[test]
    fn proctor_enrolls_but_does_not_grade() {
        assert!(allows(Role::Proctor, Operation::Enroll));
        assert!(allows(Role::Proctor, Operation::Unenroll));
        assert!(!allows(Role::Proctor, Operation::RecordGrades));
        assert!(allows(Role::Teacher, Operation::RecordGrades));
        assert!(!allows(Role::Teacher, Operation::Enroll));
    }

    #[test]
    fn settings_are_admin_only() {
        assert!(allows(Role::Admin, Operation::ManageSettings));
        assert!(!allows(Role::Director, Operation::ManageSettings));
    }

    #[test]
    fn settings_are_readable_by_staff_and_teachers_only() {
        for role in [Role::Admin, Role::Director, Role::Proctor, Role::Teacher] {
            assert!(allows(role, Operation::ReadSettings), "{role}");
        }
        assert!(!allows(Role::Student, Operation::ReadSettings));
        assert!(!allows(Role::Tutor, Operation::ReadSettings));
    }

    #[test]
    fn programs_are_written_by_teachers_and_read_by_staff() {
        assert!(allows(Role::Teacher, Operation::WritePrograms));
        assert!(allows(Role::Director, Operation::WritePrograms));
        assert!(!allows(Role::Proctor, Operation::WritePrograms));
        assert!(allows(Role::Proctor, Operation::ReadPrograms));
        assert!(!allows(Role::Student, Operation::ReadPrograms));
    }

    #[test]
    fn authorize_reports_role_and_operation() {
        let p = Principal::new("s1", Role::Student);
        let e = authorize(&p, Operation::Enroll).unwrap_err();
        assert_eq!(e.code(), "permission_denied");
        let d = e.details().unwrap();
        assert_eq!(d["role"], "STUDENT");
        assert_eq!(d["operation"], "enroll");
    }
}
