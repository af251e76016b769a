//! Authentication hook.
//!
//! roomsync does not verify identities itself. The server calls an
//! [`Authenticator`] during the handshake and only admits the client to the
//! room once it returns a [`UserId`]. Auth failures never reach the room
//! actor.

use roomsync_protocol::UserId;

use crate::SessionError;

/// Validates a client's auth token and returns their identity.
///
/// # Example
///
/// ```rust
/// use roomsync_protocol::UserId;
/// use roomsync_session::{Authenticator, SessionError};
///
/// /// Accepts any non-empty token as the user name. Development only.
/// struct DevAuthenticator;
///
/// impl Authenticator for DevAuthenticator {
///     async fn authenticate(&self, token: &str) -> Result<UserId, SessionError> {
///         if token.is_empty() {
///             return Err(SessionError::AuthFailed("empty token".into()));
///         }
///         Ok(UserId(token.to_owned()))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Validates `token` (JWT, API key, ...) and returns who it belongs to.
    ///
    /// # Errors
    /// [`SessionError::AuthFailed`] when the token is rejected.
    fn authenticate(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<UserId, SessionError>> + Send;
}
