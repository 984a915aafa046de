pub mod evaluator;

pub use evaluator::{has_any_permission, has_any_role, has_permission, has_role, permissions_for, MANAGE_ALL};
