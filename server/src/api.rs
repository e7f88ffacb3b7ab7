use crate::{
    auth, candidates, comments,
    config::Config,
    db::{self, DbPool},
    error::{ApiError, ApiResult},
    files, housekeeping, images, landing,
    model::{ImageStatus, PostDetail, POST_ACTIVE, POST_DELETED},
    posts::{self, NewPost, PostFilter, PostPatch},
    reconcile,
    scanner::ContentScanner,
    users::{self, UserError, UserPatch},
};
use anyhow::Result;
use axum::{
    async_trait,
    body::StreamBody,
    extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{net::SocketAddr, path::PathBuf};
use time::OffsetDateTime;
use tokio_util::io::ReaderStream;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Config,
    pub scanner: ContentScanner,
    pub upload_dir: PathBuf,
    pub login_limiter: auth::LoginRateLimiter,
}

impl AppState {
    pub async fn new(mut config: Config) -> Result<Self> {
        if config.ensure_jwt_secret() {
            warn!("no jwt_secret configured; sessions will not survive a restart");
        }
        let upload_dir = config.upload_dir();
        tokio::fs::create_dir_all(&upload_dir).await?;
        let pool = db::open_pool(
            config.db_path(),
            std::time::Duration::from_secs(config.db_timeout_secs),
        )?;
        let scanner = ContentScanner::new(&config.base_url)?;
        Ok(Self {
            pool,
            config,
            scanner,
            upload_dir,
            login_limiter: auth::LoginRateLimiter::new(5, std::time::Duration::from_secs(60)),
        })
    }

    /// Public URL of a stored upload. This is also its registry key, so it
    /// must come from the same scanner that reads post content.
    pub fn upload_url(&self, filename: &str) -> String {
        self.scanner.url_for(filename)
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
        .route("/auth/logout", post(logout))
        .route("/users", get(list_users))
        .route("/users/:id", get(get_user))
        .route("/users/:id/update", post(update_user))
        .route("/users/:id/deactivate", post(deactivate_user))
        .route("/users/:id/reactivate", post(reactivate_user))
        .route("/posts", get(list_posts).post(create_post))
        .route("/posts/:id", get(get_post))
        .route("/posts/:id/images", get(post_images))
        .route("/posts/:id/update", post(update_post))
        .route("/posts/:id/delete", post(delete_post))
        .route("/posts/:id/recover", post(recover_post))
        .route("/categories/:category/posts", get(category_posts))
        .route("/categories/:category/latest", get(latest_post))
        .route("/images", get(list_images))
        .route("/images/upload", post(upload_image))
        .route("/candidates", get(list_candidates).post(create_candidate))
        .route("/candidates/:id", get(get_candidate))
        .route("/candidates/:id/update", post(update_candidate))
        .route("/candidates/:id/delete", post(delete_candidate))
        .route("/candidates/:id/recover", post(recover_candidate))
        .route("/comments", get(list_comments).post(create_comment))
        .route("/comments/:id/update", post(update_comment))
        .route("/comments/:id/delete", post(delete_comment))
        .route("/landing-page", get(get_landing).post(put_landing));
    let limit = DefaultBodyLimit::max(state.config.max_upload_bytes() as usize);
    Router::new()
        .nest("/api/v1", api)
        .route("/uploads/:filename", get(serve_upload))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(limit),
        )
        .with_state(state)
}

/// Run the HTTP server and the daily image cleanup until the server stops.
pub async fn run_http_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config.bind.parse()?;
    let state = AppState::new(config).await?;
    let _cleanup = housekeeping::run_housekeeping(&state);
    info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .await?;
    Ok(())
}

/// Claims of an authenticated caller, taken from the session cookie or a
/// bearer token. Handlers that take this reject anonymous requests with 401.
pub struct Session(pub auth::Claims);

#[async_trait]
impl FromRequestParts<AppState> for Session {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> ApiResult<Self> {
        let token =
            auth::token_from_headers(&parts.headers).ok_or(ApiError::Unauthorized("unauthorized"))?;
        let claims = auth::verify_jwt(state.config.jwt_secret.as_bytes(), &token)
            .map_err(|_| ApiError::Unauthorized("invalid_session"))?;
        Ok(Session(claims))
    }
}

/// A session whose role is [`users::ADMIN_ROLE`]. Other signed-in users get 403.
pub struct Admin(pub auth::Claims);

#[async_trait]
impl FromRequestParts<AppState> for Admin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> ApiResult<Self> {
        let Session(claims) = Session::from_request_parts(parts, state).await?;
        if claims.role != users::ADMIN_ROLE {
            return Err(ApiError::Forbidden("admin_only"));
        }
        Ok(Admin(claims))
    }
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterReq {
    username: String,
    password: String,
    #[serde(alias = "confirm_password")]
    confirm_password: String,
    #[serde(default)]
    name: String,
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterReq>,
) -> ApiResult<impl IntoResponse> {
    let username = req.username.trim();
    if !users::valid_username(username) {
        return Err(ApiError::bad_request("invalid username"));
    }
    if req.password.chars().count() < 6 {
        return Err(ApiError::bad_request("password must be at least 6 characters"));
    }
    if req.password != req.confirm_password {
        return Err(ApiError::bad_request("passwords do not match"));
    }
    let hash = auth::hash_password(&req.password)?;
    let name = if req.name.trim().is_empty() {
        username
    } else {
        req.name.trim()
    };
    let conn = state.pool.get()?;
    let role = if users::count_users(&conn)? == 0 {
        users::ADMIN_ROLE
    } else {
        users::DEFAULT_ROLE
    };
    let user = users::create_user(&conn, username, &hash, name, role).map_err(
        |e| match e.downcast_ref::<UserError>() {
            Some(UserError::Duplicate) => ApiError::Conflict("duplicate_user"),
            None => ApiError::Internal(e),
        },
    )?;
    info!(username = %user.username, role = %user.role, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Deserialize)]
struct LoginReq {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResp {
    token: String,
    user: users::User,
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginReq>,
) -> ApiResult<impl IntoResponse> {
    if !state.login_limiter.check(&req.username) {
        return Err(ApiError::RateLimited);
    }
    let user = {
        let conn = state.pool.get()?;
        users::find_by_username(&conn, req.username.trim())?
    };
    let user = user
        .filter(|u| auth::verify_password(&req.password, &u.password_hash))
        .ok_or(ApiError::Unauthorized("invalid_credentials"))?;
    if !user.is_active {
        return Err(ApiError::Unauthorized("account_disabled"));
    }
    let token = auth::issue_jwt(state.config.jwt_secret.as_bytes(), &user, auth::SESSION_TTL)?;
    let cookie = auth::session_cookie(&token, auth::SESSION_TTL, state.config.cookie_secure);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(LoginResp { token, user }),
    ))
}

async fn me(Session(claims): Session) -> Json<auth::Claims> {
    Json(claims)
}

async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(
            header::SET_COOKIE,
            auth::clear_session_cookie(state.config.cookie_secure),
        )],
        StatusCode::NO_CONTENT,
    )
}

async fn list_users(State(state): State<AppState>, _: Admin) -> ApiResult<impl IntoResponse> {
    let conn = state.pool.get()?;
    Ok(Json(users::list_users(&conn)?))
}

async fn get_user(
    State(state): State<AppState>,
    _: Admin,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.pool.get()?;
    let user = users::get_user(&conn, &id)?.ok_or(ApiError::NotFound("user"))?;
    Ok(Json(user))
}

async fn update_user(
    State(state): State<AppState>,
    _: Admin,
    Path(id): Path<Uuid>,
    Json(patch): Json<UserPatch>,
) -> ApiResult<impl IntoResponse> {
    if patch.name.is_none() && patch.role.is_none() {
        return Err(ApiError::bad_request("no update data provided"));
    }
    let conn = state.pool.get()?;
    let user = users::update_user(&conn, &id, &patch)?.ok_or(ApiError::NotFound("user"))?;
    Ok(Json(user))
}

fn set_user_active(state: &AppState, id: &Uuid, active: bool) -> ApiResult<Json<users::User>> {
    let conn = state.pool.get()?;
    if !users::set_active(&conn, id, active)? {
        return Err(ApiError::NotFound("user"));
    }
    let user = users::get_user(&conn, id)?.ok_or(ApiError::NotFound("user"))?;
    info!(username = %user.username, active, "user activation changed");
    Ok(Json(user))
}

async fn deactivate_user(
    State(state): State<AppState>,
    _: Admin,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<users::User>> {
    set_user_active(&state, &id, false)
}

async fn reactivate_user(
    State(state): State<AppState>,
    _: Admin,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<users::User>> {
    set_user_active(&state, &id, true)
}

#[derive(Deserialize)]
struct StatusQuery {
    status: Option<String>,
}

async fn list_posts(
    State(state): State<AppState>,
    Query(q): Query<StatusQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = match q.status {
        Some(status) => PostFilter::Status(status),
        None => PostFilter::All,
    };
    let conn = state.pool.get()?;
    Ok(Json(posts::list_posts(&conn, &filter)?))
}

async fn category_posts(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.pool.get()?;
    Ok(Json(posts::list_posts(&conn, &PostFilter::Category(category))?))
}

async fn latest_post(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.pool.get()?;
    let post = posts::latest_in_category(&conn, &category)?.ok_or(ApiError::NotFound("post"))?;
    Ok(Json(post))
}

async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.pool.get()?;
    let post = posts::get_post(&conn, &id)?.ok_or(ApiError::NotFound("post"))?;
    Ok(Json(post))
}

async fn post_images(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PostDetail>> {
    let conn = state.pool.get()?;
    let post = posts::get_post(&conn, &id)?.ok_or(ApiError::NotFound("post"))?;
    let refs = state.scanner.scan(&post.content);
    let images = images::find_by_urls(&conn, &refs)?;
    Ok(Json(PostDetail { post, images }))
}

/// Remove a file saved for a request that then failed. The request error
/// wins; a leftover file is only logged.
async fn discard_upload(path: &std::path::Path) {
    if let Err(e) = files::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "failed to remove unregistered upload");
    }
}

/// Pull a file part out of a multipart form, rejecting anything that does not
/// sniff as an image.
async fn image_bytes(field: axum::extract::multipart::Field<'_>) -> ApiResult<(String, Bytes)> {
    let name = field.file_name().unwrap_or("image").to_string();
    let data = field
        .bytes()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    if data.is_empty() {
        return Err(ApiError::bad_request("empty file"));
    }
    if !infer::is_image(&data) {
        return Err(ApiError::bad_request("not_an_image"));
    }
    Ok((name, data))
}

async fn create_post(
    State(state): State<AppState>,
    Admin(claims): Admin,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut new = NewPost::default();
    let mut header_file: Option<PathBuf> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        // browsers send an empty, unnamed file part when nothing was picked
        let has_file = field.file_name().map_or(false, |f| !f.is_empty());
        if name == "headerImage" && has_file {
            let (original, data) = image_bytes(field).await?;
            let (filename, path) = files::save_upload(&state.upload_dir, &original, data).await?;
            new.header_image = Some(state.upload_url(&filename));
            header_file = Some(path);
            continue;
        }
        let value = field
            .text()
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        match name.as_str() {
            "title" => new.title = value,
            "content" => new.content = value,
            "category" => new.category = value,
            "author" => new.author = value,
            "headerImage" if !value.is_empty() => new.header_image = Some(value),
            _ => {}
        }
    }
    if new.title.trim().is_empty() || new.content.trim().is_empty() {
        if let Some(path) = header_file {
            discard_upload(&path).await;
        }
        return Err(ApiError::bad_request("missing_title_or_content"));
    }
    if new.author.trim().is_empty() {
        new.author = claims.username;
    }

    let created = state
        .pool
        .get()
        .map_err(anyhow::Error::from)
        .and_then(|conn| {
            let post = posts::create_post(&conn, new)?;
            reconcile::on_created(&conn, &state.scanner, &post.content);
            Ok(post)
        });
    match created {
        Ok(post) => {
            info!(id = %post.id, "post created");
            Ok((StatusCode::CREATED, Json(post)))
        }
        Err(e) => {
            if let Some(path) = header_file {
                discard_upload(&path).await;
            }
            Err(e.into())
        }
    }
}

async fn update_post(
    State(state): State<AppState>,
    _: Admin,
    Path(id): Path<Uuid>,
    Json(patch): Json<PostPatch>,
) -> ApiResult<impl IntoResponse> {
    if patch.is_empty() {
        return Err(ApiError::bad_request("no update data provided"));
    }
    if matches!(&patch.title, Some(t) if t.trim().is_empty())
        || matches!(&patch.content, Some(c) if c.trim().is_empty())
    {
        return Err(ApiError::bad_request("missing_title_or_content"));
    }
    let conn = state.pool.get()?;
    let old = posts::get_post(&conn, &id)?.ok_or(ApiError::NotFound("post"))?;
    let new = posts::update_post(&conn, &id, &patch)?.ok_or(ApiError::NotFound("post"))?;
    reconcile::on_post_changed(&conn, &state.scanner, &old, &new);
    Ok(Json(new))
}

fn change_post_status(state: &AppState, id: &Uuid, status: &str) -> ApiResult<Json<posts::Post>> {
    let conn = state.pool.get()?;
    let old = posts::get_post(&conn, id)?.ok_or(ApiError::NotFound("post"))?;
    let new = posts::set_status(&conn, id, status)?.ok_or(ApiError::NotFound("post"))?;
    let outcome = reconcile::on_post_changed(&conn, &state.scanner, &old, &new);
    info!(
        %id,
        status,
        used = outcome.marked_used,
        pending = outcome.marked_pending,
        "post status changed"
    );
    Ok(Json(new))
}

async fn delete_post(
    State(state): State<AppState>,
    _: Admin,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<posts::Post>> {
    change_post_status(&state, &id, POST_DELETED)
}

async fn recover_post(
    State(state): State<AppState>,
    _: Admin,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<posts::Post>> {
    change_post_status(&state, &id, POST_ACTIVE)
}

async fn list_images(
    State(state): State<AppState>,
    _: Admin,
    Query(q): Query<StatusQuery>,
) -> ApiResult<impl IntoResponse> {
    let status = match q.status.as_deref() {
        Some(s) => Some(
            s.parse::<ImageStatus>()
                .map_err(|e| ApiError::bad_request(e.to_string()))?,
        ),
        None => None,
    };
    let conn = state.pool.get()?;
    Ok(Json(images::list_images(&conn, status)?))
}

#[derive(Serialize)]
struct UploadResp {
    url: String,
}

async fn upload_image(
    State(state): State<AppState>,
    _: Admin,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        if field.name() == Some("image") {
            upload = Some(image_bytes(field).await?);
            break;
        }
    }
    let (original, data) = upload.ok_or_else(|| ApiError::bad_request("no image uploaded"))?;
    let (filename, path) = files::save_upload(&state.upload_dir, &original, data).await?;
    let url = state.upload_url(&filename);
    let stored = path.to_string_lossy().into_owned();
    let inserted = {
        let conn = state.pool.get()?;
        images::insert_image(
            &conn,
            &filename,
            &stored,
            &url,
            OffsetDateTime::now_utc().unix_timestamp(),
        )
    };
    if let Err(e) = inserted {
        discard_upload(&path).await;
        return Err(e.into());
    }
    info!(%filename, "image uploaded");
    Ok((StatusCode::CREATED, Json(UploadResp { url })))
}

async fn serve_upload(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let path = files::upload_path(&state.upload_dir, &filename).ok_or(ApiError::NotFound("file"))?;
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| ApiError::NotFound("file"))?;
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.as_ref()).map_err(anyhow::Error::from)?,
    );
    Ok((headers, StreamBody::new(ReaderStream::new(file))))
}

async fn list_candidates(
    State(state): State<AppState>,
    _: Admin,
    Query(q): Query<StatusQuery>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.pool.get()?;
    Ok(Json(candidates::list_candidates(&conn, q.status.as_deref())?))
}

async fn get_candidate(
    State(state): State<AppState>,
    _: Admin,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.pool.get()?;
    let c = candidates::get_candidate(&conn, &id)?.ok_or(ApiError::NotFound("candidate"))?;
    Ok(Json(c))
}

async fn create_candidate(
    State(state): State<AppState>,
    Json(new): Json<candidates::NewCandidate>,
) -> ApiResult<impl IntoResponse> {
    if new.student_name.trim().is_empty() {
        return Err(ApiError::bad_request("student_name is required"));
    }
    let conn = state.pool.get()?;
    let c = candidates::create_candidate(&conn, new)?;
    info!(id = %c.id, "candidate submitted");
    Ok((StatusCode::CREATED, Json(c)))
}

async fn update_candidate(
    State(state): State<AppState>,
    _: Admin,
    Path(id): Path<Uuid>,
    Json(patch): Json<candidates::CandidatePatch>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.pool.get()?;
    let c = candidates::update_candidate(&conn, &id, &patch)?
        .ok_or(ApiError::NotFound("candidate"))?;
    Ok(Json(c))
}

async fn delete_candidate(
    State(state): State<AppState>,
    _: Admin,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.pool.get()?;
    let c = candidates::set_status(&conn, &id, candidates::STATUS_DELETED)?
        .ok_or(ApiError::NotFound("candidate"))?;
    Ok(Json(c))
}

async fn recover_candidate(
    State(state): State<AppState>,
    _: Admin,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.pool.get()?;
    let c = candidates::set_status(&conn, &id, candidates::STATUS_RECOVERED)?
        .ok_or(ApiError::NotFound("candidate"))?;
    Ok(Json(c))
}

#[derive(Deserialize)]
struct CommentsQuery {
    #[serde(rename = "postId")]
    post_id: Option<String>,
}

async fn list_comments(
    State(state): State<AppState>,
    Query(q): Query<CommentsQuery>,
) -> ApiResult<impl IntoResponse> {
    let post_id = q
        .post_id
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("postId is required"))?;
    let conn = state.pool.get()?;
    Ok(Json(comments::list_for_post(&conn, &post_id)?))
}

async fn create_comment(
    State(state): State<AppState>,
    Json(new): Json<comments::NewComment>,
) -> ApiResult<impl IntoResponse> {
    if new.post_id.trim().is_empty()
        || new.author_name.trim().is_empty()
        || new.content.trim().is_empty()
    {
        return Err(ApiError::bad_request(
            "postId, authorName and content are required",
        ));
    }
    let conn = state.pool.get()?;
    let c = comments::create_comment(&conn, new)?;
    Ok((StatusCode::CREATED, Json(c)))
}

#[derive(Deserialize)]
struct CommentUpdate {
    content: String,
}

async fn update_comment(
    State(state): State<AppState>,
    _: Admin,
    Path(id): Path<Uuid>,
    Json(req): Json<CommentUpdate>,
) -> ApiResult<StatusCode> {
    if req.content.trim().is_empty() {
        return Err(ApiError::bad_request("content is required"));
    }
    let conn = state.pool.get()?;
    if !comments::update_content(&conn, &id, &req.content)? {
        return Err(ApiError::NotFound("comment"));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_comment(
    State(state): State<AppState>,
    _: Admin,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let conn = state.pool.get()?;
    if !comments::soft_delete(&conn, &id)? {
        return Err(ApiError::NotFound("comment"));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn get_landing(State(state): State<AppState>) -> ApiResult<Json<Map<String, Value>>> {
    let conn = state.pool.get()?;
    let content = landing::get_content(&conn)?.ok_or(ApiError::NotFound("landing page"))?;
    Ok(Json(content))
}

async fn put_landing(
    State(state): State<AppState>,
    _: Admin,
    Json(content): Json<Map<String, Value>>,
) -> ApiResult<Json<Map<String, Value>>> {
    if content.is_empty() {
        return Err(ApiError::bad_request("no update data provided"));
    }
    let conn = state.pool.get()?;
    landing::put_content(&conn, &content)?;
    Ok(Json(content))
}
