//! Data model shared by the backend client, resolver and portal

mod directory;
mod profile;
mod role;
mod session;

pub use directory::{StudentSummary, TeacherSummary};
pub use profile::{Organization, Profile, RoleAssignment};
pub use role::Role;
pub use session::{AuthEvent, Session, SignUpRequest, User, UserMetadata};
