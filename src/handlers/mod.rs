mod health;
mod json;
mod movies;
mod tokens;
mod users;

pub use health::healthcheck;
pub use json::ValidatedJson;
pub use movies::{list_movies, show_movie};
pub use tokens::{CredentialsRequest, create_authentication_token};
pub use users::{ActivateUserRequest, RegisterUserRequest, activate_user, register_user};
