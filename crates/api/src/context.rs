use polyform_core::UserId;

/// Authenticated identity for a request.
///
/// Token verification happens upstream; by the time a request reaches a
/// domain route the bearer value is a verified, opaque user id.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    user_id: UserId,
}

impl PrincipalContext {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}
