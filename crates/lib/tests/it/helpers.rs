use std::sync::Arc;

use tether::{
    FixedClock, SessionManager, SessionProvider, SessionSettings,
    constants::SYSTEM_GROUP_ID,
    provider::InMemoryProvider,
    security::{AdminPrivilege, Directory, DirectoryUser, PasswordStore, Permissions},
};

/// Midnight, 1 January 2024 UTC.
pub const START: u64 = 1_704_067_200_000;

pub const NODE: &str = "00000000-0000-4000-8000-000000000001";

/// Creates a test provider based on the TEST_PROVIDER env var.
///
/// Supported values:
/// - "inmemory" or unset: InMemoryProvider (default)
/// - "sqlite": SQLite in-memory provider (requires `sqlite` feature)
///
/// # Panics
/// Panics if TEST_PROVIDER=sqlite but the `sqlite` feature is not enabled.
///
/// # Example
/// ```bash
/// # Run tests with the in-memory provider (default)
/// cargo test
///
/// # Run tests with SQLite
/// TEST_PROVIDER=sqlite cargo test --features sqlite
/// ```
pub async fn test_provider(clock: Arc<FixedClock>) -> Arc<dyn SessionProvider> {
    match std::env::var("TEST_PROVIDER").as_deref() {
        Ok("sqlite") => {
            #[cfg(feature = "sqlite")]
            {
                use tether::provider::sql::SqlxProvider;
                Arc::new(
                    SqlxProvider::sqlite_in_memory(NODE)
                        .await
                        .expect("Failed to create SQLite provider")
                        .with_clock(clock),
                )
            }
            #[cfg(not(feature = "sqlite"))]
            {
                let _ = clock;
                panic!("TEST_PROVIDER=sqlite requires the 'sqlite' feature to be enabled")
            }
        }
        _ => Arc::new(InMemoryProvider::from_settings(&test_settings()).with_clock(clock)),
    }
}

/// A directory with two working groups.
///
/// - `lab` (10): alice (leader), bob
/// - `other` (11): carol
/// - `admin` holds Sudo and WriteSession in the system group
pub fn test_directory() -> Arc<Directory> {
    let directory = Arc::new(Directory::with_root());
    directory.add_group(10, "lab", Permissions::new("rwr---"));
    directory.add_group(11, "other", Permissions::private());
    directory.add_user(DirectoryUser::new(100, "alice", 10).leader(10));
    directory.add_user(DirectoryUser::new(101, "bob", 10));
    directory.add_user(DirectoryUser::new(102, "carol", 11));
    directory.add_user(
        DirectoryUser::new(103, "admin", SYSTEM_GROUP_ID)
            .privilege(AdminPrivilege::Sudo)
            .privilege(AdminPrivilege::WriteSession),
    );
    directory
}

/// Every test user has the password "secret".
pub fn test_passwords() -> Arc<PasswordStore> {
    let store = PasswordStore::new();
    for user in ["alice", "bob", "carol", "admin"] {
        store
            .set_password(user, "secret")
            .expect("Failed to hash password");
    }
    Arc::new(store)
}

/// Settings with a one second idle limit and no time-to-live.
pub fn test_settings() -> SessionSettings {
    SessionSettings {
        default_ttl_ms: 0,
        default_tti_ms: 1_000,
        node_uuid: NODE.to_string(),
        ..SessionSettings::default()
    }
}

/// A manager over the configured test provider with a controllable clock.
pub async fn test_manager() -> (Arc<FixedClock>, Arc<SessionManager>) {
    let clock = Arc::new(FixedClock::new(START));
    let provider = test_provider(clock.clone()).await;
    let manager =
        SessionManager::with_clock(provider, test_directory(), test_settings(), clock.clone());
    (clock, Arc::new(manager))
}
