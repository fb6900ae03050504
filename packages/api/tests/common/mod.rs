#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use actors::{AppContext, EngineError, EngineFuture, FarmConfig, RenderEngine};
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode, header};
use bytes::Bytes;
use db::{Database, DbConfig};
use http_body_util::BodyExt;
use render_core::DEFAULT_BATCH_SIZE;
use render_core::artifact::frame_name;
use storage::{Storage, StorageConfig};
use tower::ServiceExt;

/// Writes placeholder frames and composites instead of running real programs.
pub struct FakeEngine;

impl RenderEngine for FakeEngine {
    fn render<'a>(
        &'a self,
        _source: &'a Path,
        out_dir: &'a Path,
        stem: &'a str,
        range: render_core::FrameRange,
    ) -> EngineFuture<'a> {
        Box::pin(async move {
            for frame in range.frames() {
                tokio::fs::write(out_dir.join(frame_name(stem, frame)), b"png").await?;
            }
            Ok(())
        })
    }

    fn encode<'a>(
        &'a self,
        _frames_dir: &'a Path,
        _stem: &'a str,
        output: &'a Path,
    ) -> EngineFuture<'a> {
        Box::pin(async move {
            tokio::fs::write(output, b"mp4")
                .await
                .map_err(EngineError::from)
        })
    }
}

pub fn test_config() -> FarmConfig {
    FarmConfig::default()
        .with_batch_size(DEFAULT_BATCH_SIZE)
        .with_workers(2)
        .with_poll_backoff(Duration::from_millis(20))
}

/// A context over a fresh in-memory database and object store.
pub async fn setup() -> Result<AppContext, Box<dyn std::error::Error>> {
    let (_, ctx) = setup_with_db().await?;
    Ok(ctx)
}

/// Like [`setup`], also handing out the database behind the context.
pub async fn setup_with_db() -> Result<(Database, AppContext), Box<dyn std::error::Error>> {
    let db = db::init(DbConfig::memory()).await?;
    let storage = Storage::new(StorageConfig::memory()).await?;
    let ctx = AppContext::new(db.clone(), &storage, test_config());
    Ok((db, ctx))
}

/// Upload a placeholder source file to the render bucket.
pub async fn upload_source(
    ctx: &AppContext,
    file: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    ctx.renders
        .put_bytes(file, Bytes::from_static(b"BLENDER-v300"))
        .await?;
    Ok(())
}

pub async fn post_json(app: Router, uri: &str, json: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_text(response: Response<Body>) -> (StatusCode, String) {
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

/// Poll `check` until it holds or about ten seconds pass.
pub async fn wait_for<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
