// Shared fixtures for the test modules

use crate::storage::{Storage, UserId, UserProfile};
use std::sync::Arc;
use tokio::sync::Mutex;

/// In-memory store with the given users registered in the directory
pub fn store_with_users(names: &[&str]) -> (Storage, Vec<UserProfile>) {
    let store = Storage::new_in_memory().expect("Failed to create store");
    let users = names
        .iter()
        .map(|name| {
            let profile = UserProfile::new(UserId::new(), *name, name.to_uppercase());
            store.upsert_user(&profile).expect("Failed to add user");
            profile
        })
        .collect();
    (store, users)
}

/// Same as `store_with_users`, wrapped for sharing between tasks
pub fn shared_store_with_users(names: &[&str]) -> (Arc<Mutex<Storage>>, Vec<UserProfile>) {
    let (store, users) = store_with_users(names);
    (Arc::new(Mutex::new(store)), users)
}
