//! Role resolution for a user against a pool.

use time::OffsetDateTime;

use crate::dao::models::{Membership, PoolEntity, UserEntity};

/// Role a user holds within one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// No relation to the pool.
    None,
    /// Joined through a password, invite, or open access.
    Member,
    /// Owner or flagged manager.
    PoolManager,
    /// Read-through visibility without membership.
    SiteAdmin,
}

impl Role {
    /// Resolve the role from the user, the pool and the user's membership row.
    ///
    /// A site admin who also owns or manages the pool is treated as a pool manager.
    pub fn resolve(user: &UserEntity, pool: &PoolEntity, membership: Option<Membership>) -> Self {
        let manages = user.id == pool.user_id || membership.is_some_and(|row| row.is_manager);
        if manages {
            Role::PoolManager
        } else if user.is_site_admin {
            Role::SiteAdmin
        } else if membership.is_some() {
            Role::Member
        } else {
            Role::None
        }
    }
}

/// Outcome of enforcing membership on a resolved role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Caller already has access.
    Granted,
    /// Caller is let in and must be recorded as a member first.
    AutoJoin,
    /// Caller must join with a credential first.
    Denied,
}

/// Decide whether `role` may access `pool` when membership is required.
pub fn admission(role: Role, pool: &PoolEntity, now: OffsetDateTime) -> Admission {
    match role {
        Role::Member | Role::PoolManager | Role::SiteAdmin => Admission::Granted,
        Role::None if pool.is_open_at(now) => Admission::AutoJoin,
        Role::None => Admission::Denied,
    }
}

/// Resolved `{user, pool, role}` carried by every pool-scoped request.
#[derive(Debug, Clone)]
pub struct PoolAccess {
    /// Authenticated caller.
    pub user: UserEntity,
    /// Pool snapshot loaded when the request was admitted.
    pub pool: PoolEntity,
    /// Caller's role in the pool.
    pub role: Role,
}

impl PoolAccess {
    /// Owner or flagged manager of the pool.
    pub fn is_pool_manager(&self) -> bool {
        self.role == Role::PoolManager
    }

    /// Managers and site admins may see management data.
    pub fn has_manager_visibility(&self) -> bool {
        matches!(self.role, Role::PoolManager | Role::SiteAdmin)
    }

    /// Site-wide administrator flag of the caller.
    pub fn is_site_admin(&self) -> bool {
        self.user.is_site_admin
    }

    /// Whether the caller is blocked by the pool lock for non-admin mutations.
    pub fn is_locked_out(&self, now: OffsetDateTime) -> bool {
        self.pool.is_locked_at(now) && !self.is_pool_manager()
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::dao::models::{GridType, IdentityKind, NumberSetConfig};

    fn user(id: i64, is_site_admin: bool) -> UserEntity {
        UserEntity {
            id,
            kind: IdentityKind::External,
            subject: format!("auth0|{id}"),
            email: None,
            is_site_admin,
            created: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn pool(owner: i64) -> PoolEntity {
        PoolEntity {
            id: 1,
            token: "pool".into(),
            user_id: owner,
            name: "Office".into(),
            grid_type: GridType::Std100,
            password_hash: None,
            password_required: true,
            open_access_on_lock: false,
            locks: None,
            check_id: 1,
            archived: false,
            number_set_config: NumberSetConfig::Standard,
            created: OffsetDateTime::UNIX_EPOCH,
            modified: OffsetDateTime::UNIX_EPOCH,
        }
    }

    const MEMBER: Option<Membership> = Some(Membership { is_manager: false });
    const MANAGER: Option<Membership> = Some(Membership { is_manager: true });

    #[test]
    fn roles_follow_ownership_and_membership() {
        let pool = pool(1);
        assert_eq!(Role::resolve(&user(1, false), &pool, None), Role::PoolManager);
        assert_eq!(Role::resolve(&user(2, false), &pool, MANAGER), Role::PoolManager);
        assert_eq!(Role::resolve(&user(2, false), &pool, MEMBER), Role::Member);
        assert_eq!(Role::resolve(&user(2, false), &pool, None), Role::None);
    }

    #[test]
    fn site_admin_resolves_to_manager_only_when_managing() {
        let pool = pool(1);
        assert_eq!(Role::resolve(&user(9, true), &pool, None), Role::SiteAdmin);
        assert_eq!(Role::resolve(&user(9, true), &pool, MEMBER), Role::SiteAdmin);
        assert_eq!(Role::resolve(&user(9, true), &pool, MANAGER), Role::PoolManager);
        assert_eq!(Role::resolve(&user(1, true), &pool, None), Role::PoolManager);
    }

    #[test]
    fn strangers_auto_join_only_open_pools() {
        let now = OffsetDateTime::now_utc();
        let mut pool = pool(1);
        assert_eq!(admission(Role::None, &pool, now), Admission::Denied);

        pool.password_required = false;
        assert_eq!(admission(Role::None, &pool, now), Admission::AutoJoin);

        pool.password_required = true;
        pool.open_access_on_lock = true;
        assert_eq!(admission(Role::None, &pool, now), Admission::Denied);

        pool.locks = Some(now - Duration::minutes(1));
        assert_eq!(admission(Role::None, &pool, now), Admission::AutoJoin);

        pool.locks = Some(now + Duration::minutes(1));
        assert_eq!(admission(Role::None, &pool, now), Admission::Denied);
    }

    #[test]
    fn site_admins_are_never_auto_joined() {
        let mut pool = pool(1);
        pool.password_required = false;
        let now = OffsetDateTime::now_utc();
        assert_eq!(admission(Role::SiteAdmin, &pool, now), Admission::Granted);
    }

    #[test]
    fn only_managers_bypass_the_lock() {
        let now = OffsetDateTime::now_utc();
        let mut locked = pool(1);
        locked.locks = Some(now - Duration::seconds(1));

        let manager = PoolAccess {
            user: user(1, false),
            pool: locked.clone(),
            role: Role::PoolManager,
        };
        let admin = PoolAccess {
            user: user(9, true),
            pool: locked.clone(),
            role: Role::SiteAdmin,
        };
        let member = PoolAccess {
            user: user(2, false),
            pool: locked,
            role: Role::Member,
        };

        assert!(!manager.is_locked_out(now));
        assert!(admin.is_locked_out(now));
        assert!(admin.has_manager_visibility());
        assert!(!admin.is_pool_manager());
        assert!(member.is_locked_out(now));
    }
}
