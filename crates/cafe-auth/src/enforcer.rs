//! Permission enforcement

use crate::claims::ClaimSet;
use crate::error::AuthFailure;

/// Confirm `claims` grant `required`, handing the claims back on success.
///
/// A token with no `permissions` claim at all is reported as
/// [`AuthFailure::PermissionsNotConfigured`], distinct from a claim that is
/// present but lacks the permission ([`AuthFailure::PermissionDenied`]).
///
/// # Errors
///
/// Returns a `403`-class [`AuthFailure`] when the permission is not granted.
pub fn authorize(claims: ClaimSet, required: &str) -> Result<ClaimSet, AuthFailure> {
    if !claims.has_permissions_claim() {
        return Err(AuthFailure::PermissionsNotConfigured);
    }
    if !claims.has_permission(required) {
        return Err(AuthFailure::PermissionDenied(required.to_string()));
    }
    Ok(claims)
}
