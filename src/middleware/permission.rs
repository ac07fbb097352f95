//! Route-level authorization.
//!
//! Runs after authentication, on the routes that need it, via
//! `axum::middleware::from_fn_with_state`:
//!
//! ```rust,ignore
//! Router::new()
//!     .route("/v1/movies", get(list_movies))
//!     .route_layer(from_fn_with_state(
//!         PermissionGate::new(checker, Permission::MoviesRead),
//!         require_permission,
//!     ));
//! ```
//!
//! Checks are ordered: anonymous callers get 401, unactivated users 403
//! whatever permissions they hold, and only then is the permission set
//! fetched. Permissions are fetched per request and never cached, so a
//! revoked permission takes effect on the next request.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{Identity, Permission, User};
use crate::store::PermissionStore;

/// Activation and permission checks against the current identity.
#[derive(Clone)]
pub struct PermissionChecker {
    permissions: Arc<dyn PermissionStore>,
}

impl PermissionChecker {
    pub fn new(permissions: Arc<dyn PermissionStore>) -> Self {
        Self { permissions }
    }

    /// Only activated users pass.
    pub fn require_activated(identity: &Identity) -> AppResult<&User> {
        match identity {
            Identity::Anonymous => Err(AppError::AuthenticationRequired),
            Identity::User(user) if !user.activated => Err(AppError::NotActivated),
            Identity::User(user) => Ok(user),
        }
    }

    /// Activated users holding `permission` pass.
    pub async fn require_permission(
        &self,
        identity: &Identity,
        permission: Permission,
    ) -> AppResult<()> {
        let user = Self::require_activated(identity)?;
        let granted = self.permissions.get_all_for_user(user.id).await?;

        if !granted.includes(permission) {
            debug!(user_id = user.id, %permission, "Permission missing");
            return Err(AppError::MissingPermission(permission));
        }
        Ok(())
    }
}

/// State for [`require_permission`]: which permission a route group needs.
#[derive(Clone)]
pub struct PermissionGate {
    checker: PermissionChecker,
    permission: Permission,
}

impl PermissionGate {
    pub fn new(checker: PermissionChecker, permission: Permission) -> Self {
        Self {
            checker,
            permission,
        }
    }
}

/// Middleware rejecting anyone without the gate's permission.
pub async fn require_permission(
    State(gate): State<PermissionGate>,
    req: Request,
    next: Next,
) -> AppResult<Response> {
    // `Request` is not `Sync`; nothing may borrow it across the lookup
    let identity = current_identity(&req)?.clone();
    if let Err(err) = gate.checker.require_permission(&identity, gate.permission).await {
        if !err.is_server_fault() {
            metrics::record_access_denied(err.kind());
        }
        return Err(err);
    }
    Ok(next.run(req).await)
}

fn current_identity(req: &Request) -> AppResult<&Identity> {
    req.extensions()
        .get::<Identity>()
        .ok_or_else(|| AppError::Internal("permission check ran before authentication".to_string()))
}
