//! Authentication and authorization module

pub mod cookie;
pub mod jwt;
pub mod middleware;
pub mod password;

pub use jwt::{Claims, JwtService, TokenError, TokenPair};
pub use middleware::{
    ensure_role, extract_token, jwt_auth_middleware, require_roles, verify_request, AuthContext,
};
pub use password::PasswordHasher;
