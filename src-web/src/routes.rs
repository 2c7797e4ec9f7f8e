use std::{io::Cursor, sync::Arc};

use anyhow::{Context, bail};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::header,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use cloth_masker::ClothType;
use image::{ImageFormat, RgbImage};
use serde_json::{Value, json};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::{
    error::{ApiError, Result},
    state::AppState,
    tryon::{Inpainter, Masker, ShowType, TryOnRequest},
};

const INDEX_HTML: &str = include_str!("../assets/index.html");

/// Person photo, mask layer and garment travel in one request.
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

pub fn router<I, M>(state: AppState<I, M>) -> Router
where
    I: Inpainter + 'static,
    M: Masker + 'static,
{
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/tryon", post(tryon::<I, M>))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn tryon<I, M>(State(state): State<AppState<I, M>>, multipart: Multipart) -> Result<Response>
where
    I: Inpainter + 'static,
    M: Masker + 'static,
{
    let request = read_form(multipart).await.map_err(ApiError::bad_request)?;
    request.validate().map_err(ApiError::bad_request)?;

    let engine = Arc::clone(&state.engine);
    let png = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<u8>> {
        // one generation at a time, later requests wait here
        let mut engine = engine.blocking_lock();
        let output = engine.submit(&request, chrono::Local::now().naive_local())?;
        encode_png(&output.image)
    })
    .await
    .context("Try-on task failed")??;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

async fn read_form(mut multipart: Multipart) -> anyhow::Result<TryOnRequest> {
    let mut person = None;
    let mut mask = None;
    let mut cloth = None;
    let mut cloth_type = ClothType::default();
    let mut num_inference_steps = 50;
    let mut guidance_scale = 2.5;
    let mut seed = 42;
    let mut show_type = ShowType::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "person" => {
                let bytes = field.bytes().await?;
                person = Some(decode_image(&bytes, "person")?.to_rgb8());
            }
            "mask" => {
                let bytes = field.bytes().await?;
                // an unsent layer arrives as an empty part
                if !bytes.is_empty() {
                    mask = Some(decode_image(&bytes, "mask")?.to_luma8());
                }
            }
            "cloth" => {
                let bytes = field.bytes().await?;
                cloth = Some(decode_image(&bytes, "cloth")?.to_rgb8());
            }
            "cloth_type" => cloth_type = field.text().await?.trim().parse()?,
            "steps" => {
                num_inference_steps = field.text().await?.trim().parse().context("invalid steps")?
            }
            "guidance_scale" => {
                guidance_scale = field
                    .text()
                    .await?
                    .trim()
                    .parse()
                    .context("invalid guidance scale")?
            }
            "seed" => seed = field.text().await?.trim().parse().context("invalid seed")?,
            "show_type" => show_type = field.text().await?.trim().parse()?,
            other => tracing::debug!("Ignoring form field {other:?}"),
        }
    }

    let Some(person) = person else {
        bail!("Please upload a person image");
    };
    let Some(cloth) = cloth else {
        bail!("Please upload a cloth image");
    };

    Ok(TryOnRequest {
        person,
        mask,
        cloth,
        cloth_type,
        num_inference_steps,
        guidance_scale,
        seed,
        show_type,
    })
}

fn decode_image(bytes: &[u8], what: &str) -> anyhow::Result<image::DynamicImage> {
    image::load_from_memory(bytes).with_context(|| format!("Failed to decode {what} image"))
}

fn encode_png(image: &RgbImage) -> anyhow::Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .context("Failed to encode result")?;
    Ok(buf.into_inner())
}
