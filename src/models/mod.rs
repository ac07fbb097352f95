mod api;
mod movie;
mod password;
mod permission;
mod query;
mod token;
mod user;

pub use api::{
    AuthenticationTokenResponse, HealthResponse, IssuedToken, MovieListResponse, MovieResponse,
    SystemInfo, UserResponse,
};
pub use movie::Movie;
pub use password::{HashedPassword, PasswordError};
pub use permission::{Permission, PermissionSet, UnknownPermission};
pub use query::{ListQuery, Metadata, SortDirection};
pub use token::{Scope, TOKEN_PLAINTEXT_LEN, Token, TokenDigest, is_token_shaped, token_digest};
pub use user::{Identity, NewUser, User, UserAccount};
