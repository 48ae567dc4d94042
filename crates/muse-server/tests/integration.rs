//! End-to-end tests against a real listener using a `reqwest` client.

use std::sync::Arc;
use std::time::Duration;

use muse_classifier::testing::StaticLoader;
use muse_classifier::{ModelManager, ModelSpec, ModelState};
use muse_server::{MuseServer, StopOutcome};
use muse_settings::MuseSettings;
use reqwest::multipart::{Form, Part};
use serde_json::Value;

/// Boot a server on an ephemeral port and return its base URL.
async fn boot_server(loader: StaticLoader, load: bool) -> (String, Arc<MuseServer>) {
    let mut settings = MuseSettings::default();
    settings.server.host = "127.0.0.1".into();
    settings.server.port = 0;
    settings.model.name = "test/genre-model".into();

    let manager = ModelManager::new(ModelSpec::from(&settings.model), Arc::new(loader))
        .with_top_k(settings.model.top_k);
    if load {
        manager.load().await.unwrap();
    }
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .build_recorder()
        .handle();
    let server = Arc::new(MuseServer::new(settings, Arc::new(manager), metrics_handle));

    let (addr, _handle) = server.listen().await.unwrap();
    (format!("http://{addr}"), server)
}

/// Mono 16-bit PCM WAV of a 440 Hz tone.
fn tone_wav(sample_rate: u32, seconds: f32) -> Vec<u8> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let frames = (sample_rate as f32 * seconds) as u32;
    let data_len = frames * 2;
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..frames {
        #[allow(clippy::cast_precision_loss)]
        let t = i as f32 / sample_rate as f32;
        #[allow(clippy::cast_possible_truncation)]
        let v = ((t * 440.0 * std::f32::consts::TAU).sin() * 8000.0) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn file_part(name: &str, bytes: Vec<u8>) -> Part {
    Part::bytes(bytes).file_name(name.to_string())
}

#[tokio::test]
async fn classify_resampled_upload() {
    let (base, _server) = boot_server(StaticLoader::genres(), true).await;
    let form = Form::new().part("file", file_part("tone.wav", tone_wav(44_100, 2.0)));

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/v1/inference"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["status"], "success");
    assert_eq!(json["filename"], "tone.wav");
    assert_eq!(json["results"]["sample_rate"], 16_000);
    let duration = json["results"]["audio_duration"].as_f64().unwrap();
    assert!((duration - 2.0).abs() < 0.01, "duration {duration}");
    assert_eq!(json["results"]["predictions"][0]["label"], "jazz");
}

#[tokio::test]
async fn short_clip_is_padded_to_one_second() {
    let loader = StaticLoader::genres();
    let samples = loader.sample_counter();
    let (base, _server) = boot_server(loader, true).await;
    let form = Form::new().part("file", file_part("blip.wav", tone_wav(16_000, 0.25)));

    let json: Value = reqwest::Client::new()
        .post(format!("{base}/api/v1/inference"))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["results"]["audio_duration"], 1.0);
    assert_eq!(samples.get(), 16_000);
}

#[tokio::test]
async fn batch_reports_each_file() {
    let (base, _server) = boot_server(StaticLoader::genres(), true).await;
    let form = Form::new()
        .part("files", file_part("one.wav", tone_wav(16_000, 1.0)))
        .part("files", file_part("two.mp3", b"not really an mp3".to_vec()))
        .part("files", file_part("three.ogg", b"OggS".to_vec()));

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/v1/batch-inference"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["batch_size"], 3);
    let statuses: Vec<&str> = json["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, ["success", "error", "error"]);
}

#[tokio::test]
async fn unloaded_model_is_unavailable() {
    let loader = StaticLoader::genres();
    let samples = loader.sample_counter();
    let (base, _server) = boot_server(loader, false).await;
    let client = reqwest::Client::new();

    let ready = client.get(format!("{base}/api/v1/ready")).send().await.unwrap();
    assert_eq!(ready.status(), 503);

    let health = client.get(format!("{base}/api/v1/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);

    let form = Form::new().part("file", file_part("tone.wav", tone_wav(16_000, 1.0)));
    let resp = client
        .post(format!("{base}/api/v1/inference"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["detail"], "Model not loaded");
    assert_eq!(samples.get(), 0);
}

#[tokio::test]
async fn slow_inference_times_out() {
    let mut settings = MuseSettings::default();
    settings.server.host = "127.0.0.1".into();
    settings.server.port = 0;
    let loader = StaticLoader::genres().with_classify_delay(Duration::from_millis(500));
    let manager = ModelManager::new(ModelSpec::from(&settings.model), Arc::new(loader))
        .with_inference_timeout(Some(Duration::from_millis(50)));
    manager.load().await.unwrap();
    let server = MuseServer::new(settings, Arc::new(manager), muse_server::metrics::detached_handle());
    let (addr, _handle) = server.listen().await.unwrap();

    let form = Form::new().part("file", file_part("tone.wav", tone_wav(16_000, 1.0)));
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/inference"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let json: Value = resp.json().await.unwrap();
    assert!(json["detail"].as_str().unwrap().contains("timed out"));
}

#[tokio::test]
async fn shutdown_stops_accepting_connections() {
    let mut settings = MuseSettings::default();
    settings.server.host = "127.0.0.1".into();
    settings.server.port = 0;
    let manager = ModelManager::new(
        ModelSpec::from(&settings.model),
        Arc::new(StaticLoader::genres()),
    );
    let server = MuseServer::new(settings, Arc::new(manager), muse_server::metrics::detached_handle());
    let (addr, handle) = server.listen().await.unwrap();

    let ok = reqwest::get(format!("http://{addr}/api/v1/health")).await.unwrap();
    assert_eq!(ok.status(), 200);
    drop(ok);

    assert_eq!(server.stop(handle).await, StopOutcome::Drained);
    assert!(reqwest::get(format!("http://{addr}/api/v1/health")).await.is_err());
}

#[tokio::test]
async fn loading_model_is_not_ready() {
    let loader = StaticLoader::genres().with_load_delay(Duration::from_millis(400));
    let samples = loader.sample_counter();
    let (base, server) = boot_server(loader, false).await;
    let manager = Arc::clone(server.manager());
    let loading = tokio::spawn(async move { manager.load().await });
    while server.manager().state() != ModelState::Loading {
        tokio::task::yield_now().await;
    }

    let client = reqwest::Client::new();
    let ready = client.get(format!("{base}/api/v1/ready")).send().await.unwrap();
    assert_eq!(ready.status(), 503);
    let json: Value = ready.json().await.unwrap();
    assert_eq!(json["model_loaded"], false);

    let form = Form::new().part("file", file_part("tone.wav", tone_wav(16_000, 1.0)));
    let resp = client
        .post(format!("{base}/api/v1/inference"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    assert_eq!(samples.get(), 0);

    loading.await.unwrap().unwrap();
    let ready = client.get(format!("{base}/api/v1/ready")).send().await.unwrap();
    assert_eq!(ready.status(), 200);
}

#[tokio::test]
async fn every_supported_format_classifies() {
    let (base, _server) = boot_server(StaticLoader::genres(), true).await;
    let client = reqwest::Client::new();
    let fixtures: [(&str, Vec<u8>); 4] = [
        ("tone.wav", tone_wav(22_050, 0.5)),
        ("tone.flac", include_bytes!("../../muse-classifier/tests/fixtures/tone.flac").to_vec()),
        ("silence.mp3", include_bytes!("../../muse-classifier/tests/fixtures/silence.mp3").to_vec()),
        ("silence.m4a", include_bytes!("../../muse-classifier/tests/fixtures/silence.m4a").to_vec()),
    ];

    for (name, bytes) in fixtures {
        let form = Form::new().part("file", file_part(name, bytes));
        let resp = client
            .post(format!("{base}/api/v1/inference"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "{name}");
        let json: Value = resp.json().await.unwrap();
        assert_eq!(json["results"]["sample_rate"], 16_000, "{name}");
        assert_eq!(json["results"]["audio_duration"], 1.0, "{name}");
    }
}
