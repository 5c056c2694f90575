use crate::domain::UserId;

// ============== Authorization ==============

pub fn is_authorized(user_id: Option<UserId>, allowed_users: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    if allowed_users.is_empty() {
        return false;
    }
    allowed_users.contains(&user_id.0)
}

/// Who may issue commands to the bridge bot.
#[derive(Clone, Debug, Default)]
pub struct AccessPolicy {
    pub allowed_users: Vec<i64>,
    /// Open to everyone, allow-list or not.
    pub public_mode: bool,
}

impl AccessPolicy {
    pub fn new(allowed_users: Vec<i64>, public_mode: bool) -> Self {
        Self {
            allowed_users,
            public_mode,
        }
    }

    /// Gate for `/download`.
    pub fn allows(&self, user_id: Option<UserId>) -> bool {
        self.public_mode || is_authorized(user_id, &self.allowed_users)
    }

    /// Gate for admin commands such as `/status`; public mode does not apply.
    pub fn is_admin(&self, user_id: Option<UserId>) -> bool {
        is_authorized(user_id, &self.allowed_users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_only() {
        let p = AccessPolicy::new(vec![1, 2], false);
        assert!(p.allows(Some(UserId(1))));
        assert!(!p.allows(Some(UserId(3))));
        assert!(!p.allows(None));
    }

    #[test]
    fn public_mode_opens_downloads_but_not_admin() {
        let p = AccessPolicy::new(vec![1], true);
        assert!(p.allows(Some(UserId(99))));
        assert!(p.allows(None));
        assert!(!p.is_admin(Some(UserId(99))));
        assert!(p.is_admin(Some(UserId(1))));
    }

    #[test]
    fn empty_allow_list_denies_everyone() {
        let p = AccessPolicy::default();
        assert!(!p.allows(Some(UserId(1))));
    }
}
