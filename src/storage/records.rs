//! User and post records: thin create/read pass-throughs over the two pools.

use serde::{Deserialize, Serialize};

use super::pool::Store;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPost {
    pub user_id: i64,
    pub title: String,
    pub content: String,
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

pub async fn create_user(store: &Store, new: &NewUser) -> Result<User> {
    require("username", &new.username)?;
    require("email", &new.email)?;

    let mut tx = store.begin_write().await?;
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (username, email) VALUES (?, ?) \
         RETURNING id, username, email, created_at",
    )
    .bind(&new.username)
    .bind(&new.email)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| Error::from_insert(e, "user"))?;
    tx.commit().await?;
    Ok(user)
}

pub async fn list_users(store: &Store) -> Result<Vec<User>> {
    let mut conn = store.acquire_read().await?;
    Ok(sqlx::query_as::<_, User>(
        "SELECT id, username, email, created_at FROM users ORDER BY id",
    )
    .fetch_all(&mut *conn)
    .await?)
}

/// Look up one user by a whitelisted column.
async fn user_by(store: &Store, column: &'static str, value: &str) -> Result<User> {
    let sql = match column {
        "username" => "SELECT id, username, email, created_at FROM users WHERE username = ?",
        "email" => "SELECT id, username, email, created_at FROM users WHERE email = ?",
        _ => return Err(Error::Internal(format!("unsupported user column '{}'", column))),
    };
    let mut conn = store.acquire_read().await?;
    sqlx::query_as::<_, User>(sql)
        .bind(value)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user with {} '{}'", column, value)))
}

pub async fn user_by_id(store: &Store, id: i64) -> Result<User> {
    let mut conn = store.acquire_read().await?;
    sqlx::query_as::<_, User>("SELECT id, username, email, created_at FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user with id '{}'", id)))
}

pub async fn user_by_username(store: &Store, username: &str) -> Result<User> {
    user_by(store, "username", username).await
}

pub async fn user_by_email(store: &Store, email: &str) -> Result<User> {
    user_by(store, "email", email).await
}

pub async fn create_post(store: &Store, new: &NewPost) -> Result<Post> {
    require("title", &new.title)?;
    require("content", &new.content)?;

    let mut tx = store.begin_write().await?;
    let post = sqlx::query_as::<_, Post>(
        "INSERT INTO posts (user_id, title, content) VALUES (?, ?, ?) \
         RETURNING id, user_id, title, content, created_at",
    )
    .bind(new.user_id)
    .bind(&new.title)
    .bind(&new.content)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| Error::from_insert(e, "post"))?;
    tx.commit().await?;
    Ok(post)
}

pub async fn list_posts(store: &Store) -> Result<Vec<Post>> {
    let mut conn = store.acquire_read().await?;
    Ok(sqlx::query_as::<_, Post>(
        "SELECT id, user_id, title, content, created_at FROM posts ORDER BY id",
    )
    .fetch_all(&mut *conn)
    .await?)
}

pub async fn post_by_id(store: &Store, id: i64) -> Result<Post> {
    let mut conn = store.acquire_read().await?;
    sqlx::query_as::<_, Post>(
        "SELECT id, user_id, title, content, created_at FROM posts WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| Error::NotFound(format!("post with id '{}'", id)))
}

pub async fn posts_by_user(store: &Store, user_id: i64) -> Result<Vec<Post>> {
    let mut conn = store.acquire_read().await?;
    Ok(sqlx::query_as::<_, Post>(
        "SELECT id, user_id, title, content, created_at FROM posts WHERE user_id = ? ORDER BY id",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?)
}
