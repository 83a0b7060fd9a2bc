//! Access rules and the decision function every surface goes through.

use std::collections::BTreeSet;

use crate::error::AppError;
use crate::model::{Permission, Role, User};

/// The authenticated caller: the user row plus the permissions granted to it.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: User,
    pub permissions: BTreeSet<Permission>,
}

impl Principal {
    pub fn id(&self) -> i64 {
        self.user.id
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.user.role == role
    }

    /// Admins implicitly hold every named permission.
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.user.role == Role::Admin || self.permissions.contains(&permission)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    View,
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Public,
    Authenticated,
    /// Authenticated and recorded as the target's author.
    Owner,
    Permission(Permission),
    Role(Role),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub view: Rule,
    pub create: Rule,
    pub update: Rule,
    pub delete: Rule,
}

impl Policy {
    /// Reads are open, any signed-in user may write.
    pub const fn read_open_write_authenticated() -> Self {
        Policy {
            view: Rule::Public,
            create: Rule::Authenticated,
            update: Rule::Authenticated,
            delete: Rule::Authenticated,
        }
    }

    /// Reads are open, anyone signed in may create, only the author may change.
    pub const fn owner_writes() -> Self {
        Policy {
            view: Rule::Public,
            create: Rule::Authenticated,
            update: Rule::Owner,
            delete: Rule::Owner,
        }
    }

    pub const fn role_writes(role: Role) -> Self {
        Policy {
            view: Rule::Public,
            create: Rule::Role(role),
            update: Rule::Role(role),
            delete: Rule::Role(role),
        }
    }

    pub fn rule(&self, action: Action) -> Rule {
        match action {
            Action::View => self.view,
            Action::Create => self.create,
            Action::Update => self.update,
            Action::Delete => self.delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// No credentials were presented.
    Unauthenticated,
    Forbidden(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn into_result(self) -> Result<(), AppError> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Unauthenticated => Err(AppError::Unauthenticated),
            Decision::Forbidden(reason) => Err(AppError::Forbidden(reason)),
        }
    }
}

/// `owner` is the target's recorded author, when the rule needs one.
pub fn authorize(principal: Option<&Principal>, rule: Rule, owner: Option<i64>) -> Decision {
    if rule == Rule::Public {
        return Decision::Allow;
    }
    let Some(principal) = principal else {
        return Decision::Unauthenticated;
    };
    match rule {
        Rule::Public | Rule::Authenticated => Decision::Allow,
        Rule::Owner => match owner {
            Some(author) if author == principal.id() => Decision::Allow,
            _ => Decision::Forbidden("you are not the author of this object".to_owned()),
        },
        Rule::Permission(permission) => {
            if principal.has_permission(permission) {
                Decision::Allow
            } else {
                Decision::Forbidden(format!("missing permission {}", permission))
            }
        }
        Rule::Role(role) => {
            if principal.has_role(role) {
                Decision::Allow
            } else {
                Decision::Forbidden(format!("requires the {} role", role))
            }
        }
    }
}
