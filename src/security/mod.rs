//! 安全层：会话、CSRF、认证器、防火墙与访问控制

pub mod access;
pub mod authenticator;
pub mod csrf;
mod error;
mod extract;
pub mod firewall;
pub mod jwt;
mod middleware;
mod passport;
mod password;
mod service;
pub mod session;
mod throttle;
pub mod user;

pub use access::{AccessControl, AccessDecision, IS_AUTHENTICATED, PUBLIC_ACCESS, RoleHierarchy};
pub use authenticator::{AuthRequest, Authenticator};
pub use csrf::{csrf_token, verify_csrf};
pub use error::AuthError;
pub use extract::{CurrentUser, OptionalUser};
pub use firewall::{Firewall, FirewallMap};
pub use jwt::{Claims, JwtManager};
pub use middleware::security_middleware;
pub use passport::{AuthenticatedUser, Credentials, Passport};
pub use password::PasswordHasher;
pub use service::{Security, SecurityExtensions};
pub use session::{Session, SessionStore};
pub use throttle::LoginThrottle;
pub use user::{EntityUserProvider, MemoryUserProvider, SecurityUser, UserProvider};

