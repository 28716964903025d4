//! User directory and product-activity collaborators.
//!
//! Both are external systems; components depend on the traits and receive
//! concrete clients from the process entry point.

use crate::error::EngineResult;
use crate::types::{Recipient, UserActivity};
use async_trait::async_trait;

/// Page size used when draining the directory.
pub const DIRECTORY_PAGE_SIZE: usize = 1000;

/// Paginated read access to the account directory. Pages are 1-indexed.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn list_page(&self, page: usize, per_page: usize) -> EngineResult<Vec<Recipient>>;
}

/// Drain the whole directory, 1000 users per page. A short page signals the
/// end of the listing.
pub async fn fetch_all_recipients(directory: &dyn UserDirectory) -> EngineResult<Vec<Recipient>> {
    let mut all = Vec::new();
    let mut page = 1;
    loop {
        let users = directory.list_page(page, DIRECTORY_PAGE_SIZE).await?;
        let count = users.len();
        all.extend(users);
        if count < DIRECTORY_PAGE_SIZE {
            break;
        }
        page += 1;
    }
    Ok(all)
}

/// Did this user return to the product? Probe failures report inactive
/// rather than erroring; reconciliation treats the probe as best-effort.
#[async_trait]
pub trait ActivityProbe: Send + Sync {
    async fn check_activity(&self, user_id: &str) -> UserActivity;
}

/// Fixed in-memory directory for development and testing.
#[derive(Default)]
pub struct MemoryDirectory {
    users: Vec<Recipient>,
}

impl MemoryDirectory {
    pub fn new(users: Vec<Recipient>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn list_page(&self, page: usize, per_page: usize) -> EngineResult<Vec<Recipient>> {
        let start = (page.saturating_sub(1)) * per_page;
        Ok(self
            .users
            .iter()
            .skip(start)
            .take(per_page)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipients(n: usize) -> Vec<Recipient> {
        (0..n)
            .map(|i| Recipient {
                email: format!("user{i}@test.com"),
                user_id: format!("u{i}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_fetch_all_pages_through_directory() {
        let directory = MemoryDirectory::new(recipients(2500));
        let all = fetch_all_recipients(&directory).await.unwrap();
        assert_eq!(all.len(), 2500);
        assert_eq!(all[0].email, "user0@test.com");
        assert_eq!(all[2499].email, "user2499@test.com");
    }

    #[tokio::test]
    async fn test_fetch_all_empty_directory() {
        let directory = MemoryDirectory::default();
        let all = fetch_all_recipients(&directory).await.unwrap();
        assert!(all.is_empty());
    }
}
