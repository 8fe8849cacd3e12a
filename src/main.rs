use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State, multipart::Field},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, fmt};
use yuedu::config::AppConfig;
use yuedu::services::fetch::{ChapterFetcher, HttpChapterFetcher, SpanFetcher};
use yuedu::services::library::{DocumentWriter, Library};
use yuedu::services::reader::FileChunkReader;
use yuedu::services::session::{SessionOptions, segment_document};
use yuedu::services::settings::{MAX_FONT_SIZE, MIN_FONT_SIZE};
use yuedu::services::store::FileStore;
use yuedu::{
    ChapterCache, Chapter, ContentNormalizer, LayoutConfig, NormalizerConfig, ReaderError,
    ReadingSession, ReadingSettings, ReplaceRule, Viewport,
};

type Session = ReadingSession<FileStore, SpanFetcher<FileChunkReader>>;
type SharedSession = Arc<Mutex<Session>>;

#[derive(Clone)]
struct AppState {
    config: Arc<AppConfig>,
    store: FileStore,
    library: Library,
    catalog: Option<Arc<HttpChapterFetcher>>,
    sessions: Arc<Mutex<HashMap<String, SharedSession>>>,
}

#[derive(Debug)]
struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

impl From<ReaderError> for ApiError {
    fn from(err: ReaderError) -> Self {
        let status = match err {
            ReaderError::ChapterOutOfRange(_) => StatusCode::NOT_FOUND,
            ReaderError::FetchFailed { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, err.to_string())
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        ApiError(err.status(), err.body_text())
    }
}

fn not_found(id: &str) -> ApiError {
    ApiError(StatusCode::NOT_FOUND, format!("unknown document {id}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = AppConfig::from_env();
    let library = Library::open(&config.library_dir).await?;
    let store = FileStore::open(&config.store_dir)?;
    let catalog = HttpChapterFetcher::from_config(&config).map(Arc::new);
    if let Some(url) = &config.catalog_url {
        tracing::info!(%url, "remote catalog enabled");
    }

    let app_state = AppState {
        config: Arc::new(config.clone()),
        store,
        library,
        catalog,
        sessions: Arc::new(Mutex::new(HashMap::new())),
    };

    let app = Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/upload", post(upload_file))
        .route("/rules", get(list_rules).post(add_rule))
        .route("/settings", get(get_settings).put(put_settings))
        .route("/documents/:id", axum::routing::delete(delete_document))
        .route("/documents/:id/chapters", get(list_chapters))
        .route("/documents/:id/chapters/:index", get(read_chapter))
        .route("/documents/:id/layout", post(refine_layout))
        .route("/documents/:id/font-size/:direction", post(step_font_size))
        .route("/documents/:id/bookmarks", get(list_bookmarks).post(toggle_bookmark))
        .route("/catalog/:book/chapters/:index", get(read_catalog_chapter))
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(tower_http::cors::Any)
                        .allow_methods(tower_http::cors::AllowMethods::any())
                        .allow_headers(tower_http::cors::AllowHeaders::any()),
                ),
        );

    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head><title>yuedu</title><meta charset="utf-8"></head>
<body>
    <h1>yuedu reading engine</h1>
    <ul>
        <li>GET /health</li>
        <li>POST /upload (multipart field <code>text_file</code>, any common encoding)</li>
        <li>GET /documents/{id}/chapters</li>
        <li>GET /documents/{id}/chapters/{index}?width=&amp;height=&amp;font_size=&amp;page=</li>
        <li>POST /documents/{id}/layout {"measured_height": 1234.0}</li>
        <li>POST /documents/{id}/font-size/{increase|decrease}</li>
        <li>GET /documents/{id}/bookmarks, POST /documents/{id}/bookmarks</li>
        <li>DELETE /documents/{id}</li>
        <li>GET /rules, POST /rules</li>
        <li>GET /settings, PUT /settings</li>
        <li>GET /catalog/{book}/chapters/{index}</li>
    </ul>
</body>
</html>"#,
    )
}

async fn health_check() -> &'static str {
    "OK"
}

fn build_session(
    state: &AppState,
    document_id: &str,
    reader: FileChunkReader,
    chapters: Vec<Chapter>,
) -> Session {
    ReadingSession::new(
        document_id,
        chapters.clone(),
        ContentNormalizer::load(NormalizerConfig::default(), &state.store),
        ChapterCache::new(state.store.clone()),
        SpanFetcher::new(reader, chapters),
        SessionOptions {
            viewport: Viewport::new(375.0, 667.0),
            font_size: state.config.default_font_size,
            layout: LayoutConfig::default(),
            preload_count: state.config.preload_count,
        },
    )
}

/// Open session for `id`, reopening a document stored before a restart.
async fn session_for(state: &AppState, id: &str) -> Result<SharedSession, ApiError> {
    let mut sessions = state.sessions.lock().await;
    if let Some(session) = sessions.get(id) {
        return Ok(session.clone());
    }

    let chapters = ChapterCache::new(state.store.clone())
        .chapter_list(id)
        .ok_or_else(|| not_found(id))?;
    if !state.library.contains(id).await {
        return Err(not_found(id));
    }
    let path = state.library.document_path(id)?;
    let session = Arc::new(Mutex::new(build_session(
        state,
        id,
        FileChunkReader::new(path),
        chapters,
    )));
    sessions.insert(id.to_string(), session.clone());
    tracing::info!(document_id = id, "reopened stored document");
    Ok(session)
}

async fn copy_field(field: &mut Field<'_>, writer: &mut DocumentWriter) -> Result<(), ApiError> {
    while let Some(chunk) = field.chunk().await? {
        writer.write_chunk(&chunk).await?;
    }
    Ok(())
}

async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some("text_file") {
            continue;
        }
        let title = field
            .file_name()
            .and_then(|name| std::path::Path::new(name).file_stem())
            .and_then(|stem| stem.to_str())
            .unwrap_or("正文")
            .to_string();

        let mut writer = state.library.create().await?;
        let document_id = writer.document_id().to_string();
        if let Err(err) = copy_field(&mut field, &mut writer).await {
            drop(writer);
            if let Err(cleanup) = state.library.remove(&document_id).await {
                tracing::warn!(%document_id, error = %cleanup, "failed to remove partial upload");
            }
            return Err(err);
        }
        let stored = writer.finish().await?;

        let reader = FileChunkReader::new(&stored.path);
        let chapters = segment_document(&reader, &title, state.config.inline_limit, |percent| {
            tracing::debug!(%document_id, percent, "scanning document");
        })
        .await?;

        let mut session = build_session(&state, &document_id, reader, chapters.clone());
        session.persist_chapters()?;
        state
            .sessions
            .lock()
            .await
            .insert(document_id.clone(), Arc::new(Mutex::new(session)));
        tracing::info!(%document_id, chapters = chapters.len(), "document uploaded");

        return Ok(Json(serde_json::json!({
            "success": true,
            "document_id": document_id,
            "encoding": stored.encoding,
            "chapter_count": chapters.len(),
            "chapters": chapters,
        })));
    }

    Err(ApiError(
        StatusCode::BAD_REQUEST,
        "missing text_file field".to_string(),
    ))
}

async fn list_chapters(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = session_for(&state, &id).await?;
    let session = session.lock().await;
    Ok(Json(serde_json::json!({ "chapters": session.chapters() })))
}

#[derive(Debug, Deserialize)]
struct ReadQuery {
    width: Option<f32>,
    height: Option<f32>,
    font_size: Option<f32>,
    page: Option<usize>,
}

async fn read_chapter(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, usize)>,
    Query(query): Query<ReadQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = session_for(&state, &id).await?;
    let mut session = session.lock().await;

    if let (Some(width), Some(height)) = (query.width, query.height) {
        session.set_viewport(Viewport::new(width, height));
    }
    if let Some(font_size) = query.font_size {
        session.set_font_size(font_size);
    }

    session.open_chapter(index).await?;
    let layout = session.go_to_page(query.page.unwrap_or(0));
    session.save_progress();

    Ok(Json(serde_json::json!({
        "chapter": session.current_chapter(),
        "layout": layout,
        "text": session.page_text(),
        "progress": session.progress_percent(),
        "bookmarked": session.is_bookmarked(),
    })))
}

#[derive(Debug, Deserialize)]
struct RefineRequest {
    measured_height: f32,
}

async fn refine_layout(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RefineRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = session_for(&state, &id).await?;
    let mut session = session.lock().await;
    let layout = session.refine(request.measured_height);
    session.save_progress();
    Ok(Json(serde_json::json!({ "layout": layout })))
}

async fn step_font_size(
    State(state): State<AppState>,
    Path((id, direction)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = session_for(&state, &id).await?;
    let mut session = session.lock().await;
    let layout = match direction.as_str() {
        "increase" => session.increase_font_size(),
        "decrease" => session.decrease_font_size(),
        other => {
            return Err(ApiError(
                StatusCode::BAD_REQUEST,
                format!("unknown direction {other}"),
            ));
        }
    };
    Ok(Json(serde_json::json!({
        "settings": session.settings(),
        "layout": layout,
    })))
}

async fn list_bookmarks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = session_for(&state, &id).await?;
    let session = session.lock().await;
    Ok(Json(serde_json::json!({ "bookmarks": session.bookmarks() })))
}

async fn toggle_bookmark(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = session_for(&state, &id).await?;
    let mut session = session.lock().await;
    let added = session.toggle_bookmark();
    Ok(Json(serde_json::json!({
        "added": added,
        "bookmarks": session.bookmarks(),
    })))
}

async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session = session_for(&state, &id).await?;
    state.sessions.lock().await.remove(&id);
    session.lock().await.invalidate();

    if let Err(err) = state.library.remove(&id).await {
        tracing::warn!(document_id = %id, error = %err, "failed to remove document file");
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn open_sessions(state: &AppState) -> Vec<SharedSession> {
    state.sessions.lock().await.values().cloned().collect()
}

async fn list_rules(State(state): State<AppState>) -> Json<serde_json::Value> {
    let normalizer = ContentNormalizer::load(NormalizerConfig::default(), &state.store);
    Json(serde_json::json!({ "rules": normalizer.rules() }))
}

#[derive(Debug, Deserialize)]
struct NewRule {
    pattern: String,
    replacement: String,
    #[serde(default)]
    is_regex: bool,
}

async fn add_rule(
    State(mut state): State<AppState>,
    Json(request): Json<NewRule>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut normalizer = ContentNormalizer::load(NormalizerConfig::default(), &state.store);
    let rule = if request.is_regex {
        ReplaceRule::regex(request.pattern, request.replacement)
    } else {
        ReplaceRule::literal(request.pattern, request.replacement)
    };
    normalizer.add_rule(rule.clone());
    normalizer.save_rules(&mut state.store)?;

    // Open sessions only see the edit once told to reload
    for session in open_sessions(&state).await {
        session.lock().await.normalizer_mut().refresh(&state.store);
    }
    Ok(Json(serde_json::json!({ "rule": rule })))
}

async fn get_settings(State(state): State<AppState>) -> Json<ReadingSettings> {
    Json(ReadingSettings::load(&state.store))
}

async fn put_settings(
    State(mut state): State<AppState>,
    Json(mut settings): Json<ReadingSettings>,
) -> Result<Json<ReadingSettings>, ApiError> {
    if !settings.font_size.is_finite() {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            "font size must be a number".to_string(),
        ));
    }
    settings.font_size = settings.font_size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
    settings.save(&mut state.store)?;

    for session in open_sessions(&state).await {
        session.lock().await.apply_settings(settings.clone());
    }
    Ok(Json(settings))
}

async fn read_catalog_chapter(
    State(state): State<AppState>,
    Path((book, index)): Path<(String, usize)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let catalog = state.catalog.as_ref().ok_or_else(|| {
        ApiError(
            StatusCode::NOT_FOUND,
            "no remote catalog configured".to_string(),
        )
    })?;

    let document_id = format!("catalog:{book}");
    let mut cache = ChapterCache::new(state.store.clone());
    let content = match cache.get(&document_id, index) {
        Some(content) => content,
        None => {
            let raw = catalog.fetch_chapter_raw(&book, index).await?;
            let content = ContentNormalizer::load(NormalizerConfig::default(), &state.store)
                .process(&raw);
            cache.put(&document_id, index, &content);
            content
        }
    };
    Ok(Json(serde_json::json!({
        "book": book,
        "index": index,
        "content": content,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn test_state(dir: &std::path::Path) -> AppState {
        let config = AppConfig {
            library_dir: dir.join("library"),
            store_dir: dir.join("store"),
            ..AppConfig::default()
        };
        AppState {
            library: Library::open(&config.library_dir).await.unwrap(),
            store: FileStore::open(&config.store_dir).unwrap(),
            catalog: None,
            config: Arc::new(config),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[tokio::test]
    async fn busy_document_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        for id in ["a", "b"] {
            let reader = FileChunkReader::new(dir.path().join(id));
            let session = build_session(&state, id, reader, Vec::new());
            state
                .sessions
                .lock()
                .await
                .insert(id.to_string(), Arc::new(Mutex::new(session)));
        }

        let busy = session_for(&state, "a").await.unwrap();
        let _held = busy.lock().await;
        let other = tokio::time::timeout(Duration::from_millis(500), async {
            let session = session_for(&state, "b").await.unwrap();
            let guard = session.lock().await;
            guard.document_id().to_string()
        })
        .await;
        assert_eq!(other.unwrap(), "b");
    }

    #[tokio::test]
    async fn stored_documents_are_reopened_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let mut writer = state.library.create().await.unwrap();
        writer
            .write_chunk("第1章 甲\n内容\n第2章 乙\n内容\n".as_bytes())
            .await
            .unwrap();
        let stored = writer.finish().await.unwrap();
        let chapters = yuedu::segment(&std::fs::read_to_string(&stored.path).unwrap(), "书");
        ChapterCache::new(state.store.clone())
            .save_chapter_list(&stored.document_id, &chapters)
            .unwrap();

        let session = session_for(&state, &stored.document_id).await.unwrap();
        assert_eq!(session.lock().await.chapters(), chapters.as_slice());
        assert!(state.sessions.lock().await.contains_key(&stored.document_id));
        assert!(matches!(
            session_for(&state, "missing").await,
            Err(err) if err.0 == StatusCode::NOT_FOUND
        ));
    }
}
