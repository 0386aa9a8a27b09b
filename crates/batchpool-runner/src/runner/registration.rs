//! User registration work items.
//!
//! Each input record becomes one [`Registration`]: the record is checked for
//! the required fields and then handed to the [`UserStore`], which stands in
//! for the persistence layer and only assigns ids and logs the save.

use batchpool::{WorkContext, WorkItem};
use portable_atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A registration request as read from the input.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NewUser {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// A saved user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
}

#[derive(Clone, Copy, thiserror::Error, Debug, PartialEq, Eq)]
pub enum RegistrationErrorKind {
    #[error("name cannot be empty")]
    EmptyName,
    #[error("email cannot be empty")]
    EmptyEmail,
}

/// A rejected record, tagged with its input line so the failure can be
/// traced back once it reaches the output.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[error("line {line}: {kind}")]
pub struct RegistrationError {
    pub line: usize,
    pub kind: RegistrationErrorKind,
}

impl NewUser {
    pub fn validate(&self) -> Result<(), RegistrationErrorKind> {
        if self.name.is_empty() {
            return Err(RegistrationErrorKind::EmptyName);
        }
        if self.email.is_empty() {
            return Err(RegistrationErrorKind::EmptyEmail);
        }
        Ok(())
    }
}

/// Assigns ids to saved users.
#[derive(Debug, Default)]
pub struct UserStore {
    last_id: AtomicU64,
}

impl UserStore {
    pub fn save(&self, user: NewUser) -> User {
        let id = self.last_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(id, name = %user.name, email = %user.email, "Saving user");
        User {
            id,
            name: user.name,
            email: user.email,
        }
    }

    /// Number of users saved so far.
    pub fn saved(&self) -> u64 {
        self.last_id.load(Ordering::Relaxed)
    }
}

/// What a successful registration reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registered {
    pub line: usize,
    pub user: User,
}

/// Validates one record and saves it.
#[derive(Debug)]
pub struct Registration {
    line: usize,
    user: NewUser,
    store: Arc<UserStore>,
}

impl Registration {
    pub const fn new(line: usize, user: NewUser, store: Arc<UserStore>) -> Self {
        Self { line, user, store }
    }

    pub const fn line(&self) -> usize {
        self.line
    }
}

impl WorkItem for Registration {
    type Output = Registered;
    type Error = RegistrationError;

    fn execute(
        self,
        _ctx: WorkContext,
    ) -> impl Future<Output = Result<Registered, RegistrationError>> + Send {
        async move {
            let Self { line, user, store } = self;
            user.validate()
                .map_err(|kind| RegistrationError { line, kind })?;

            Ok(Registered {
                line,
                user: store.save(user),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchpool::{JobFailure, WorkerPool};

    fn new_user(name: &str, email: &str) -> NewUser {
        NewUser {
            name: name.to_string(),
            email: email.to_string(),
        }
    }

    #[test]
    fn validation_rejects_empty_name_then_empty_email() {
        assert_eq!(new_user("Ada", "ada@example.com").validate(), Ok(()));
        assert_eq!(
            new_user("", "").validate(),
            Err(RegistrationErrorKind::EmptyName)
        );
        // Only a missing value is rejected, whitespace is kept as given.
        assert_eq!(new_user("  ", "ada@example.com").validate(), Ok(()));
        assert_eq!(
            new_user("Ada", "").validate(),
            Err(RegistrationErrorKind::EmptyEmail)
        );
    }

    #[test]
    fn missing_fields_deserialize_as_empty() -> anyhow::Result<()> {
        let user: NewUser = serde_json::from_str(r#"{"name":"Ada"}"#)?;
        assert_eq!(user, new_user("Ada", ""));
        Ok(())
    }

    #[test]
    fn store_assigns_sequential_ids() {
        let store = UserStore::default();
        assert_eq!(store.save(new_user("Ada", "ada@example.com")).id, 1);
        assert_eq!(store.save(new_user("Alan", "alan@example.com")).id, 2);
        assert_eq!(store.saved(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn registrations_run_through_the_pool() -> anyhow::Result<()> {
        let store = Arc::new(UserStore::default());
        let pool = WorkerPool::<Registration>::new(2, 4, 4)?;
        pool.start()?;
        let mut results = pool.results()?;

        pool.submit(Registration::new(
            1,
            new_user("Ada", "ada@example.com"),
            Arc::clone(&store),
        ))
        .await?;
        pool.submit(Registration::new(2, new_user("Alan", ""), Arc::clone(&store)))
            .await?;
        pool.drain().await?;

        let mut registered = Vec::new();
        let mut failures = Vec::new();
        while let Some(outcome) = results.recv().await {
            match outcome.result {
                Ok(done) => registered.push(done),
                Err(failure) => failures.push(failure),
            }
        }

        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].line, 1);
        assert_eq!(registered[0].user.id, 1);
        assert_eq!(
            failures,
            vec![JobFailure::Failed {
                message: "line 2: email cannot be empty".to_string()
            }]
        );
        assert_eq!(store.saved(), 1);
        Ok(())
    }
}
