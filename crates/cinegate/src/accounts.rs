//! User profiles kept alongside the gateway's user store.
//!
//! The gateway only knows user IDs and activation flags. Names and e-mail
//! addresses live here, keyed by the same [`UserId`].

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use cinegate_core::UserId;

use crate::error::{AppError, AppResult};

/// A registered user as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    /// User ID shared with the gateway store.
    pub id: UserId,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Display name.
    pub name: String,
    /// E-mail address as given.
    pub email: String,
    /// Whether the activation token was redeemed.
    pub activated: bool,
    /// Argon2id PHC string.
    #[serde(skip)]
    pub password_hash: String,
}

/// Concurrent account directory with unique e-mail addresses.
#[derive(Debug, Default)]
pub struct AccountDirectory {
    by_id: DashMap<UserId, Account>,
    emails: DashMap<String, UserId>,
}

impl AccountDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an inactive account.
    ///
    /// `create` runs only once the address is known to be free and must
    /// return the ID allocated in the gateway store.
    ///
    /// # Errors
    ///
    /// [`AppError::Validation`] on `email` if the address (compared
    /// case-insensitively) is already registered.
    pub fn register<F>(
        &self,
        name: &str,
        email: &str,
        password_hash: String,
        create: F,
    ) -> AppResult<Account>
    where
        F: FnOnce() -> UserId,
    {
        match self.emails.entry(email.to_lowercase()) {
            Entry::Occupied(_) => Err(AppError::invalid(
                "email",
                "a user with this email address already exists",
            )),
            Entry::Vacant(slot) => {
                let account = Account {
                    id: create(),
                    created_at: Utc::now(),
                    name: name.to_string(),
                    email: email.to_string(),
                    activated: false,
                    password_hash,
                };
                slot.insert(account.id);
                self.by_id.insert(account.id, account.clone());
                Ok(account)
            }
        }
    }

    /// Returns a copy of the account with `id`.
    pub fn get(&self, id: UserId) -> Option<Account> {
        self.by_id.get(&id).map(|a| a.value().clone())
    }

    /// Looks an account up by e-mail address, ignoring case.
    pub fn find_by_email(&self, email: &str) -> Option<Account> {
        let id = *self.emails.get(&email.to_lowercase())?;
        self.get(id)
    }

    /// Drops the account and frees its address. Returns the removed account.
    pub fn remove(&self, id: UserId) -> Option<Account> {
        let (_, account) = self.by_id.remove(&id)?;
        self.emails
            .remove_if(&account.email.to_lowercase(), |_, owner| *owner == id);
        Some(account)
    }

    /// Marks the account activated and returns the updated copy.
    pub fn activate(&self, id: UserId) -> Option<Account> {
        let mut account = self.by_id.get_mut(&id)?;
        account.activated = true;
        Some(account.clone())
    }

    /// Number of accounts.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns `true` if no account is registered.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_register_and_activate() {
        let directory = AccountDirectory::new();
        let account = directory
            .register("Alice", "alice@example.com", String::new(), || UserId::new(1))
            .unwrap();
        assert!(!account.activated);
        assert_eq!(directory.get(UserId::new(1)).unwrap().name, "Alice");

        let activated = directory.activate(UserId::new(1)).unwrap();
        assert!(activated.activated);
        assert!(directory.get(UserId::new(1)).unwrap().activated);
        assert!(directory.activate(UserId::new(2)).is_none());
    }

    #[test]
    fn test_duplicate_email_does_not_allocate() {
        let directory = AccountDirectory::new();
        directory
            .register("Alice", "alice@example.com", String::new(), || UserId::new(1))
            .unwrap();

        let err = directory
            .register("Impostor", "ALICE@example.com", String::new(), || {
                panic!("no ID should be allocated for a duplicate")
            })
            .unwrap_err();
        match err {
            AppError::Validation(fields) => assert_eq!(
                fields["email"],
                "a user with this email address already exists"
            ),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_lookup_by_email_ignores_case() {
        let directory = AccountDirectory::new();
        directory
            .register("Alice", "Alice@Example.com", "$argon2id$x".to_string(), || {
                UserId::new(1)
            })
            .unwrap();

        let found = directory.find_by_email("alice@example.com").unwrap();
        assert_eq!(found.id, UserId::new(1));
        assert_eq!(found.password_hash, "$argon2id$x");
        assert!(directory.find_by_email("bob@example.com").is_none());

        let json = serde_json::to_value(&found).unwrap();
        assert!(json.get("password_hash").is_none());
    }

    #[test]
    fn test_remove_frees_the_address() {
        let directory = AccountDirectory::new();
        directory
            .register("Alice", "alice@example.com", String::new(), || UserId::new(1))
            .unwrap();

        assert_eq!(directory.remove(UserId::new(1)).unwrap().name, "Alice");
        assert!(directory.is_empty());
        assert!(directory.find_by_email("alice@example.com").is_none());
        assert!(directory.remove(UserId::new(1)).is_none());

        let again = directory
            .register("Alice", "ALICE@example.com", String::new(), || UserId::new(2))
            .unwrap();
        assert_eq!(again.id, UserId::new(2));
    }

    #[test]
    fn test_concurrent_registration_of_one_address() {
        let directory = Arc::new(AccountDirectory::new());
        let next = Arc::new(AtomicI64::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let directory = Arc::clone(&directory);
                let next = Arc::clone(&next);
                std::thread::spawn(move || {
                    directory
                        .register("Bob", "bob@example.com", String::new(), || {
                            UserId::new(next.fetch_add(1, Ordering::SeqCst) + 1)
                        })
                        .is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(next.load(Ordering::SeqCst), 1);
    }
}
