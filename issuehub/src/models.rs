//! Domain Models
//!
//! Business entities that represent the core domain.
//! These are independent of the database layer.

use crate::database::{CategoryRow, FlashRow, IssueRow, RepositoryRow, StatusRow, UserRow};

/// A user as seen by handlers and templates. The password hash stays in the row.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub about_me: Option<String>,
    pub location: Option<String>,
    pub created_at: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            about_me: row.about_me,
            location: row.location,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Repository {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: i64,
    pub created_at: String,
}

impl Repository {
    pub fn is_owned_by(&self, user_id: i64) -> bool {
        self.owner_id == user_id
    }
}

impl From<RepositoryRow> for Repository {
    fn from(row: RepositoryRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            owner_id: row.owner_id,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Issue {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub repository_id: i64,
    pub status_id: i64,
    pub status: String,
    pub category_id: i64,
    pub category: String,
    pub created_by_id: i64,
    pub author: String,
    pub created_at: String,
}

impl From<IssueRow> for Issue {
    fn from(row: IssueRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            description: row.description,
            repository_id: row.repository_id,
            status_id: row.status_id,
            status: row.status_title,
            category_id: row.category_id,
            category: row.category_title,
            created_by_id: row.created_by_id,
            author: row.author_username,
            created_at: row.created_at,
        }
    }
}

/// One selectable option of a status or category dropdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub id: i64,
    pub title: String,
}

impl From<StatusRow> for Choice {
    fn from(row: StatusRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
        }
    }
}

impl From<CategoryRow> for Choice {
    fn from(row: CategoryRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Flash {
    pub category: String,
    pub message: String,
}

impl From<FlashRow> for Flash {
    fn from(row: FlashRow) -> Self {
        Self {
            category: row.category,
            message: row.message,
        }
    }
}
