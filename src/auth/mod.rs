//! Authorization Gate
//!
//! External collaborator boundary: confirms the caller may debit the source
//! account. The engine consumes the answer as a boolean precondition and
//! never re-derives identity itself.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::AccountId;
use crate::store::{AccountStore, StoreError};

#[async_trait]
pub trait AuthorizationGate: Send + Sync {
    /// May `actor_id` debit `account_id`?
    async fn is_authorized(
        &self,
        actor_id: AccountId,
        account_id: AccountId,
    ) -> Result<bool, StoreError>;
}

/// Default policy: the account holder may debit their own account, and any
/// admin account may debit on behalf of others (admin approval workflows).
pub struct OwnerOrAdminGate {
    store: Arc<dyn AccountStore>,
}

impl OwnerOrAdminGate {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuthorizationGate for OwnerOrAdminGate {
    async fn is_authorized(
        &self,
        actor_id: AccountId,
        account_id: AccountId,
    ) -> Result<bool, StoreError> {
        if actor_id == account_id {
            return Ok(true);
        }

        match self.store.get(actor_id).await? {
            Some(actor) => Ok(actor.is_admin),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Account, AccountNumber, AccountStatus};
    use crate::store::MemoryStore;

    fn account(is_admin: bool) -> Account {
        Account::new(
            AccountId::new(),
            AccountNumber::new("1000000001"),
            0,
            AccountStatus::Active,
        )
        .unwrap()
        .with_admin(is_admin)
    }

    #[tokio::test]
    async fn test_holder_is_authorized() {
        let store = Arc::new(MemoryStore::new());
        let gate = OwnerOrAdminGate::new(store.clone());

        let holder = account(false);
        let id = holder.id;
        store.insert_account(holder);

        assert!(gate.is_authorized(id, id).await.unwrap());
    }

    #[tokio::test]
    async fn test_stranger_is_not_authorized() {
        let store = Arc::new(MemoryStore::new());
        let gate = OwnerOrAdminGate::new(store.clone());

        let stranger = account(false);
        let target = account(false);
        let (stranger_id, target_id) = (stranger.id, target.id);
        store.insert_account(stranger);
        store.insert_account(target);

        assert!(!gate.is_authorized(stranger_id, target_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_admin_is_authorized_for_others() {
        let store = Arc::new(MemoryStore::new());
        let gate = OwnerOrAdminGate::new(store.clone());

        let admin = account(true);
        let target = account(false);
        let (admin_id, target_id) = (admin.id, target.id);
        store.insert_account(admin);
        store.insert_account(target);

        assert!(gate.is_authorized(admin_id, target_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_actor_is_not_authorized() {
        let store = Arc::new(MemoryStore::new());
        let gate = OwnerOrAdminGate::new(store.clone());

        let target = account(false);
        let target_id = target.id;
        store.insert_account(target);

        assert!(!gate.is_authorized(AccountId::new(), target_id).await.unwrap());
    }
}
