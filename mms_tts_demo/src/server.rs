//! HTTP server for the synthesis web UI.
//!
//! Three routes: the UI page, a JSON synthesis endpoint and a file route
//! serving generated WAVs out of a per-process temporary directory. The
//! model is behind a mutex, so synthesis requests run one at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::sync::Mutex;

use mms_tts::audio::{peak_normalize, write_wav};
use mms_tts::model::{Model, SynthesisOptions};

struct AppState {
    model: Mutex<Model>,
    options: SynthesisOptions,
    audio_dir: TempDir,
    counter: AtomicUsize,
}

#[derive(Deserialize)]
struct SynthesizeRequest {
    text: String,
}

#[derive(Serialize)]
struct SynthesizeResponse {
    /// URL of the generated WAV, absent when synthesis did not happen.
    audio_url: Option<String>,
    /// Status line shown to the user.
    message: String,
}

const INDEX_HTML: &str = include_str!("../assets/index.html");

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Response for input that is empty after trimming, or `None` when the text
/// should be synthesized.
fn reject_empty(text: &str) -> Option<SynthesizeResponse> {
    text.trim().is_empty().then(|| SynthesizeResponse {
        audio_url: None,
        message: "Please enter some text".to_string(),
    })
}

async fn synthesize(
    State(state): State<Arc<AppState>>,
    axum::Json(request): axum::Json<SynthesizeRequest>,
) -> axum::Json<SynthesizeResponse> {
    if let Some(response) = reject_empty(&request.text) {
        return axum::Json(response);
    }

    let model = state.model.lock().await;
    let generated = tokio::task::block_in_place(|| -> Result<(String, u32)> {
        let result = model.synthesize(&request.text, &state.options)?;
        let mut samples = result.samples()?;
        peak_normalize(&mut samples);

        let name = format!(
            "utterance_{}.wav",
            state.counter.fetch_add(1, Ordering::SeqCst)
        );
        write_wav(&state.audio_dir.path().join(&name), &samples, result.sample_rate)?;
        Ok((name, result.sample_rate))
    });

    match generated {
        Ok((name, sample_rate)) => {
            tracing::info!(file = %name, "Synthesized utterance");
            axum::Json(SynthesizeResponse {
                audio_url: Some(format!("/audio/{name}")),
                message: format!("Audio generated successfully! Sample rate: {sample_rate}Hz"),
            })
        }
        Err(e) => {
            tracing::error!(error = %e, "Synthesis failed");
            axum::Json(SynthesizeResponse {
                audio_url: None,
                message: format!("Error generating speech: {e}"),
            })
        }
    }
}

async fn audio(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    // Only names this server handed out are valid; anything path-like is not.
    if name.contains(['/', '\\']) || name.contains("..") {
        return Err(StatusCode::BAD_REQUEST);
    }
    let path = state.audio_dir.path().join(&name);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(([(header::CONTENT_TYPE, "audio/wav")], bytes))
}

/// Serve the UI until the process is stopped.
pub async fn serve(model: Model, options: SynthesisOptions, host: &str, port: u16) -> Result<()> {
    let audio_dir = TempDir::new().context("Failed to create temporary audio directory")?;
    let state = Arc::new(AppState {
        model: Mutex::new(model),
        options,
        audio_dir,
        counter: AtomicUsize::new(0),
    });

    let app = Router::new()
        .route("/", get(index))
        .route("/api/synthesize", post(synthesize))
        .route("/audio/{name}", get(audio))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind {host}:{port}"))?;
    tracing::info!("Serving on http://{host}:{port}");
    println!("Web UI listening on http://{host}:{port}");

    axum::serve(listener, app).await.context("Server error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_is_rejected_with_fixed_message() {
        for text in ["", "   ", "\n\t "] {
            let response = reject_empty(text).expect("empty input must be rejected");
            assert!(response.audio_url.is_none());
            assert_eq!(response.message, "Please enter some text");
        }
    }

    #[test]
    fn test_empty_input_response_shape() {
        let response = reject_empty("").unwrap();
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""audio_url":null"#), "unexpected JSON: {json}");
        assert!(json.contains("Please enter some text"));
    }

    #[test]
    fn test_nonempty_input_passes_through() {
        assert!(reject_empty("ہیلو").is_none());
        assert!(reject_empty("  a  ").is_none());
    }

    #[test]
    fn test_index_page_carries_urdu_examples() {
        let examples = [
            "سلام، میں ایک مصنوعی ذہانت ہوں۔",
            "آج موسم بہت اچھا ہے۔",
            "کیا آپ مجھے سن سکتے ہیں؟",
            "میں آپ سے محبت کرتا ہوں۔",
            "یہ ایک خوبصورت دن ہے۔",
        ];
        for example in examples {
            assert!(INDEX_HTML.contains(example), "missing example: {example}");
        }
        assert!(INDEX_HTML.contains("Generate Speech"));
    }
}
