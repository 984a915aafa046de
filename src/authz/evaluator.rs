//! Role and permission checks.
//!
//! Everything here is a pure function of the current role, so the checks can
//! be exercised without a backend or a session.

use crate::models::Role;

/// Wildcard permission: a role holding it satisfies every permission check.
pub const MANAGE_ALL: &str = "manage_all";

const ADMIN_PERMISSIONS: &[&str] = &[MANAGE_ALL];

const TEACHER_PERMISSIONS: &[&str] = &[
    "view_dashboard",
    "view_courses",
    "view_subjects",
    "view_students",
    "manage_grades",
    "manage_research",
    "view_events",
    "view_news",
    "view_announcements",
];

const STUDENT_PERMISSIONS: &[&str] = &[
    "view_courses",
    "view_subjects",
    "view_events",
    "view_news",
    "view_announcements",
    "submit_feedback",
];

const COMMITTEE_PERMISSIONS: &[&str] = &[
    "view_dashboard",
    "view_feedback",
    "manage_quality_assurance",
    "view_reports",
    "view_announcements",
];

/// The fixed permission set of a role. Unrecognized roles get nothing.
pub fn permissions_for(role: &Role) -> &'static [&'static str] {
    match role {
        Role::Admin => ADMIN_PERMISSIONS,
        Role::Teacher => TEACHER_PERMISSIONS,
        Role::Student => STUDENT_PERMISSIONS,
        Role::Committee => COMMITTEE_PERMISSIONS,
        Role::Other(_) => &[],
    }
}

pub fn has_role(current: Option<&Role>, role: &Role) -> bool {
    current == Some(role)
}

/// False for an empty `roles` slice, whatever the current role.
pub fn has_any_role(current: Option<&Role>, roles: &[Role]) -> bool {
    current.map_or(false, |current| roles.contains(current))
}

pub fn has_permission(current: Option<&Role>, permission: &str) -> bool {
    let Some(role) = current else {
        return false;
    };
    permissions_for(role)
        .iter()
        .any(|granted| *granted == MANAGE_ALL || *granted == permission)
}

/// False for an empty `permissions` slice.
pub fn has_any_permission<S: AsRef<str>>(current: Option<&Role>, permissions: &[S]) -> bool {
    permissions
        .iter()
        .any(|permission| has_permission(current, permission.as_ref()))
}
