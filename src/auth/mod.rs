//! Authentication: password accounts, tokens, request middleware.

pub mod middleware;
pub mod service;
pub mod token;

pub use middleware::AuthUser;
pub use service::{AuthError, AuthService};
pub use token::{JwtTokenizer, TokenError, Tokenizer};
