//! User and post handlers.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};

use super::app::AppState;
use crate::error::Error;
use crate::storage::records::{self, NewPost, NewUser, Post, User};

/// Parse a path identifier before it reaches the store.
fn parse_id(name: &str, raw: &str) -> Result<i64, Error> {
    raw.parse::<i64>()
        .map_err(|_| Error::Validation(format!("Invalid {} '{}': expected an integer", name, raw)))
}

/// Unwrap a JSON body, reporting malformed input as a validation error.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, Error> {
    body.map(|Json(value)| value)
        .map_err(|rejection| Error::Validation(rejection.body_text()))
}

/// Handle POST /users
pub async fn create_user(
    State(state): State<AppState>,
    body: Result<Json<NewUser>, JsonRejection>,
) -> Result<(StatusCode, Json<User>), Error> {
    let new = json_body(body)?;
    let user = records::create_user(&state.store, &new).await?;
    tracing::debug!(user_id = user.id, "User created");
    Ok((StatusCode::CREATED, Json(user)))
}

/// Handle GET /users
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, Error> {
    Ok(Json(records::list_users(&state.store).await?))
}

/// Handle GET /users/id/:id
pub async fn user_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<User>, Error> {
    let id = parse_id("id", &id)?;
    Ok(Json(records::user_by_id(&state.store, id).await?))
}

/// Handle GET /users/username/:username
pub async fn user_by_username(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<User>, Error> {
    Ok(Json(records::user_by_username(&state.store, &username).await?))
}

/// Handle GET /users/email/:email
pub async fn user_by_email(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<User>, Error> {
    Ok(Json(records::user_by_email(&state.store, &email).await?))
}

/// Handle POST /posts
pub async fn create_post(
    State(state): State<AppState>,
    body: Result<Json<NewPost>, JsonRejection>,
) -> Result<(StatusCode, Json<Post>), Error> {
    let new = json_body(body)?;
    let post = records::create_post(&state.store, &new).await?;
    tracing::debug!(post_id = post.id, user_id = post.user_id, "Post created");
    Ok((StatusCode::CREATED, Json(post)))
}

/// Handle GET /posts
pub async fn list_posts(State(state): State<AppState>) -> Result<Json<Vec<Post>>, Error> {
    Ok(Json(records::list_posts(&state.store).await?))
}

/// Handle GET /posts/id/:id
pub async fn post_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Post>, Error> {
    let id = parse_id("id", &id)?;
    Ok(Json(records::post_by_id(&state.store, id).await?))
}

/// Handle GET /posts/userid/:userid
pub async fn posts_by_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Post>>, Error> {
    let user_id = parse_id("userid", &user_id)?;
    Ok(Json(records::posts_by_user(&state.store, user_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("id", "42").unwrap(), 42);
        assert!(matches!(parse_id("id", "abc"), Err(Error::Validation(_))));
        assert!(matches!(parse_id("id", "1.5"), Err(Error::Validation(_))));
    }
}
