/// Authentication core: credential hashing, access token codec, refresh
/// token store, and session orchestration.
mod claims;
mod jwt;
mod password;
pub mod refresh_token;
pub mod session;

pub use claims::Claims;
pub use jwt::generate_access_token;
pub use jwt::validate_access_token;
pub use password::hash_password;
pub use password::verify_password;
