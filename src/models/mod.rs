pub mod forms;
pub mod role;
pub mod user;

pub use forms::{AvatarUpload, LoginCredentials, ProfileForm, RegistrationForm};
pub use role::Role;
pub use user::User;
