//! Batch integration tests with in-process collaborators.
//!
//! The generative service, the logo source and the renderer are replaced by
//! fakes so every phase of the per-company pipeline can be exercised without
//! network access or an API key.

use async_trait::async_trait;
use futures::StreamExt;
use profile_forge::{
    run_batch_stream_with_collaborators, run_batch_with, AssetReference, Collaborators,
    CompanyError, DocumentRenderer, FieldGenerator, FieldValues, LogoError, LogoOutcome,
    BatchProgressCallback, CompanyResult, LogoSource, Phase, ProfileConfig, ProfileError,
    RenderError, StopHandle, UnresolvedPolicy,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Returns a fixed mapping; fails for companies listed in `fail_for`.
struct FakeGenerator {
    values: FieldValues,
    fail_for: Vec<String>,
    calls: AtomicUsize,
    requested: Mutex<Vec<Vec<String>>>,
    stop_after_first: Option<StopHandle>,
}

impl FakeGenerator {
    fn new(values: FieldValues) -> Self {
        Self {
            values,
            fail_for: Vec::new(),
            calls: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
            stop_after_first: None,
        }
    }

    fn failing_for(mut self, company: &str) -> Self {
        self.fail_for.push(company.to_string());
        self
    }

    fn stopping(mut self, stop: StopHandle) -> Self {
        self.stop_after_first = Some(stop);
        self
    }
}

#[async_trait]
impl FieldGenerator for FakeGenerator {
    async fn generate(
        &self,
        company: &str,
        fields: &[String],
    ) -> Result<FieldValues, CompanyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(fields.to_vec());
        if let Some(ref stop) = self.stop_after_first {
            stop.stop();
        }
        if self.fail_for.iter().any(|c| c == company) {
            return Err(CompanyError::Generation {
                company: company.to_string(),
                retries: 2,
                detail: "HTTP 500 upstream".to_string(),
            });
        }
        Ok(self.values.clone())
    }
}

enum LogoBehaviour {
    Found,
    NotFound,
    Broken,
}

struct FakeLogos {
    behaviour: LogoBehaviour,
    calls: AtomicUsize,
}

impl FakeLogos {
    fn new(behaviour: LogoBehaviour) -> Self {
        Self {
            behaviour,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LogoSource for FakeLogos {
    async fn find_logo(
        &self,
        _company: &str,
        file_name: &str,
    ) -> Result<Option<AssetReference>, LogoError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            LogoBehaviour::Found => Ok(Some(AssetReference {
                file_name: file_name.to_string(),
                bytes: b"\x89PNG\r\n\x1a\nfake".to_vec(),
                content_type: "image/png".to_string(),
                source_url: Some("https://img.example/logo.png".to_string()),
            })),
            LogoBehaviour::NotFound => Ok(None),
            LogoBehaviour::Broken => Err(LogoError::Search("connection reset".to_string())),
        }
    }
}

/// Records what it was asked to render and emits a minimal PDF header.
#[derive(Default)]
struct FakeRenderer {
    fail: bool,
    hang: bool,
    seen_assets: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl DocumentRenderer for FakeRenderer {
    async fn render(&self, html: &str, assets: &[AssetReference]) -> Result<Vec<u8>, RenderError> {
        self.seen_assets
            .lock()
            .unwrap()
            .push(assets.iter().map(|a| a.file_name.clone()).collect());
        if self.fail {
            return Err(RenderError::Engine("unsupported CSS".to_string()));
        }
        if self.hang {
            return Err(RenderError::Timeout { secs: 120 });
        }
        Ok(format!("%PDF-1.7\n% {} bytes of html\n%%EOF", html.len()).into_bytes())
    }
}

/// Records every callback as a short event string.
#[derive(Default)]
struct EventLog(Mutex<Vec<String>>);

impl BatchProgressCallback for EventLog {
    fn on_batch_start(&self, total_companies: usize, field_count: usize) {
        self.0
            .lock()
            .unwrap()
            .push(format!("batch_start {total_companies} {field_count}"));
    }
    fn on_company_start(&self, index: usize, _total: usize, company: &str) {
        self.0.lock().unwrap().push(format!("start {index} {company}"));
    }
    fn on_phase(&self, _company: &str, phase: Phase) {
        self.0.lock().unwrap().push(format!("phase {phase}"));
    }
    fn on_company_complete(&self, index: usize, _total: usize, result: &CompanyResult) {
        self.0
            .lock()
            .unwrap()
            .push(format!("complete {index} {}", result.company));
    }
    fn on_company_error(&self, index: usize, _total: usize, company: &str, _error: &str) {
        self.0.lock().unwrap().push(format!("error {index} {company}"));
    }
    fn on_batch_complete(&self, total: usize, succeeded: usize) {
        self.0
            .lock()
            .unwrap()
            .push(format!("batch_complete {total} {succeeded}"));
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

struct Fixture {
    _dir: TempDir,
    template: PathBuf,
    out: PathBuf,
}

fn fixture(template_text: &str) -> Fixture {
    let dir = TempDir::new().unwrap();
    let template = dir.path().join("profile_template.html");
    std::fs::write(&template, template_text).unwrap();
    let out = dir.path().join("output");
    Fixture {
        template,
        out,
        _dir: dir,
    }
}

fn config(fx: &Fixture) -> ProfileConfig {
    ProfileConfig::builder()
        .template(fx.template.clone())
        .output_dir(fx.out.clone())
        .cooldown_secs(0)
        .build()
        .unwrap()
}

fn companies(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

fn values(pairs: &[(&str, serde_json::Value)]) -> FieldValues {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn template_without_placeholders_never_calls_generator() {
    let text = "<html><body><h1>Static brochure</h1></body></html>";
    let fx = fixture(text);
    let generator = Arc::new(FakeGenerator::new(FieldValues::new()));
    let collaborators = Collaborators {
        generator: Some(generator.clone()),
        logos: None,
        renderer: Arc::new(FakeRenderer::default()),
    };

    let output = run_batch_with(&config(&fx), &companies(&["Acme"]), collaborators)
        .await
        .unwrap();

    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    assert!(output.requested_fields.is_empty());
    let r = &output.companies[0];
    assert!(r.is_success());
    assert_eq!(read(r.artifacts.html.as_ref().unwrap()), text);
    assert_eq!(read(r.artifacts.data_json.as_ref().unwrap()).trim(), "{}");
    assert!(r.artifacts.pdf.as_ref().unwrap().exists());
    assert_eq!(r.logo, LogoOutcome::Disabled);
}

#[tokio::test]
async fn template_without_placeholders_needs_no_generator() {
    let fx = fixture("<p>no fields</p>");
    let collaborators = Collaborators {
        generator: None,
        logos: None,
        renderer: Arc::new(FakeRenderer::default()),
    };
    let output = run_batch_with(&config(&fx), &companies(&["Acme"]), collaborators)
        .await
        .unwrap();
    assert_eq!(output.stats.succeeded, 1);
}

#[tokio::test]
async fn fields_are_escaped_and_missing_ones_blanked() {
    let fx = fixture("<h1>${company_name}</h1><p>${ceo}</p><p>${founded}</p>");
    let generator = Arc::new(FakeGenerator::new(values(&[
        ("company_name", json!("Acme & Sons <Ltd>")),
        ("ceo", json!("Jane Doe")),
    ])));
    let collaborators = Collaborators {
        generator: Some(generator.clone()),
        logos: None,
        renderer: Arc::new(FakeRenderer::default()),
    };

    let output = run_batch_with(&config(&fx), &companies(&["Acme"]), collaborators)
        .await
        .unwrap();

    let r = &output.companies[0];
    assert!(r.is_success());
    assert_eq!(
        read(r.artifacts.html.as_ref().unwrap()),
        "<h1>Acme &amp; Sons &lt;Ltd&gt;</h1><p>Jane Doe</p><p></p>"
    );
    assert_eq!(r.missing_fields, vec!["founded".to_string()]);
    assert_eq!(
        generator.requested.lock().unwrap()[0],
        vec!["ceo".to_string(), "company_name".to_string(), "founded".to_string()]
    );

    let json: serde_json::Value =
        serde_json::from_str(&read(r.artifacts.data_json.as_ref().unwrap())).unwrap();
    assert_eq!(json["ceo"], "Jane Doe");
}

#[tokio::test]
async fn passthrough_keeps_unresolved_markers() {
    let fx = fixture("<p>${ceo}</p><p>${founded}</p>");
    let generator = Arc::new(FakeGenerator::new(values(&[("ceo", json!("Jane Doe"))])));
    let config = ProfileConfig::builder()
        .template(fx.template.clone())
        .output_dir(fx.out.clone())
        .cooldown_secs(0)
        .unresolved(UnresolvedPolicy::Passthrough)
        .build()
        .unwrap();
    let collaborators = Collaborators {
        generator: Some(generator),
        logos: None,
        renderer: Arc::new(FakeRenderer::default()),
    };

    let output = run_batch_with(&config, &companies(&["Acme"]), collaborators)
        .await
        .unwrap();
    assert_eq!(
        read(output.companies[0].artifacts.html.as_ref().unwrap()),
        "<p>Jane Doe</p><p>${founded}</p>"
    );
}

#[tokio::test]
async fn system_variables_are_not_requested() {
    let fx = fixture("<p>${case_number}</p><p>${timestamp}</p><p>${ceo}</p>");
    let generator = Arc::new(FakeGenerator::new(values(&[("ceo", json!("Jane Doe"))])));
    let collaborators = Collaborators {
        generator: Some(generator.clone()),
        logos: None,
        renderer: Arc::new(FakeRenderer::default()),
    };

    let output = run_batch_with(&config(&fx), &companies(&["Acme"]), collaborators)
        .await
        .unwrap();

    assert_eq!(output.requested_fields, vec!["ceo".to_string()]);
    let html = read(output.companies[0].artifacts.html.as_ref().unwrap());
    assert!(html.contains("<p>OP-D-V-"), "case number missing: {html}");
    assert!(!html.contains("${"));
}

#[tokio::test]
async fn generator_failure_does_not_stop_the_batch() {
    let fx = fixture("<h1>${company_name}</h1>");
    let generator = Arc::new(
        FakeGenerator::new(values(&[("company_name", json!("Someone"))])).failing_for("Bad Co"),
    );
    let collaborators = Collaborators {
        generator: Some(generator.clone()),
        logos: None,
        renderer: Arc::new(FakeRenderer::default()),
    };

    let output = run_batch_with(
        &config(&fx),
        &companies(&["Good One", "Bad Co", "Good Two"]),
        collaborators,
    )
    .await
    .unwrap();

    assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    assert_eq!(output.stats.total_companies, 3);
    assert_eq!(output.stats.succeeded, 2);
    assert_eq!(output.stats.failed, 1);

    let bad = &output.companies[1];
    let err = bad.error.as_ref().unwrap();
    assert_eq!(err.phase(), Phase::Generate);
    assert_eq!(err.company(), "Bad Co");
    assert!(bad.artifacts.pdf.is_none());
    assert!(!fx.out.join("Bad_Co_profile.pdf").exists());

    assert!(fx.out.join("Good_One_profile.pdf").exists());
    assert!(fx.out.join("Good_Two_profile.pdf").exists());

    assert!(matches!(
        output.into_result(),
        Err(ProfileError::PartialFailure { failed: 1, .. })
    ));
}

#[tokio::test]
async fn missing_logo_still_produces_pdf() {
    let fx = fixture(r#"<img src="${logo_filename}"><h1>${company_name}</h1>"#);
    let logos = Arc::new(FakeLogos::new(LogoBehaviour::NotFound));
    let renderer = Arc::new(FakeRenderer::default());
    let collaborators = Collaborators {
        generator: Some(Arc::new(FakeGenerator::new(values(&[(
            "company_name",
            json!("Obscure Oy"),
        )])))),
        logos: Some(logos.clone()),
        renderer: renderer.clone(),
    };

    let output = run_batch_with(&config(&fx), &companies(&["Obscure Oy"]), collaborators)
        .await
        .unwrap();

    let r = &output.companies[0];
    assert!(r.is_success());
    assert_eq!(r.logo, LogoOutcome::Missing);
    assert!(r.artifacts.logo.is_none());
    assert!(r.artifacts.pdf.as_ref().unwrap().exists());
    assert_eq!(
        read(r.artifacts.html.as_ref().unwrap()),
        r#"<img src=""><h1>Obscure Oy</h1>"#
    );
    assert!(renderer.seen_assets.lock().unwrap()[0].is_empty());
    assert_eq!(output.stats.logos_found, 0);
}

#[tokio::test]
async fn broken_logo_search_is_recorded_not_fatal() {
    let fx = fixture("<h1>Static</h1>");
    let collaborators = Collaborators {
        generator: None,
        logos: Some(Arc::new(FakeLogos::new(LogoBehaviour::Broken))),
        renderer: Arc::new(FakeRenderer::default()),
    };
    let output = run_batch_with(&config(&fx), &companies(&["Acme"]), collaborators)
        .await
        .unwrap();
    let r = &output.companies[0];
    assert!(r.is_success());
    assert!(matches!(r.logo, LogoOutcome::Failed { .. }));
}

#[tokio::test]
async fn found_logo_is_written_and_handed_to_renderer() {
    let fx = fixture(r#"<img src="${logo_filename}">"#);
    let renderer = Arc::new(FakeRenderer::default());
    let collaborators = Collaborators {
        generator: None,
        logos: Some(Arc::new(FakeLogos::new(LogoBehaviour::Found))),
        renderer: renderer.clone(),
    };

    let output = run_batch_with(&config(&fx), &companies(&["Acme Corp"]), collaborators)
        .await
        .unwrap();

    let r = &output.companies[0];
    assert_eq!(
        r.logo,
        LogoOutcome::Found {
            url: "https://img.example/logo.png".to_string()
        }
    );
    let logo_path = fx.out.join("Acme_Corp_logo.png");
    assert_eq!(r.artifacts.logo.as_ref(), Some(&logo_path));
    assert!(std::fs::read(&logo_path).unwrap().starts_with(b"\x89PNG"));
    assert_eq!(
        read(r.artifacts.html.as_ref().unwrap()),
        r#"<img src="Acme_Corp_logo.png">"#
    );
    assert_eq!(
        renderer.seen_assets.lock().unwrap()[0],
        vec!["Acme_Corp_logo.png".to_string()]
    );
    assert_eq!(output.stats.logos_found, 1);
}

#[tokio::test]
async fn existing_logo_is_reused_without_searching() {
    let fx = fixture(r#"<img src="${logo_filename}">"#);
    std::fs::create_dir_all(&fx.out).unwrap();
    std::fs::write(fx.out.join("Acme_logo.png"), b"\x89PNG\r\n\x1a\ncached").unwrap();
    let logos = Arc::new(FakeLogos::new(LogoBehaviour::Found));
    let collaborators = Collaborators {
        generator: None,
        logos: Some(logos.clone()),
        renderer: Arc::new(FakeRenderer::default()),
    };

    let output = run_batch_with(&config(&fx), &companies(&["Acme"]), collaborators)
        .await
        .unwrap();

    assert_eq!(logos.calls.load(Ordering::SeqCst), 0);
    assert_eq!(output.companies[0].logo, LogoOutcome::Reused);
    assert_eq!(
        std::fs::read(fx.out.join("Acme_logo.png")).unwrap(),
        b"\x89PNG\r\n\x1a\ncached"
    );
}

#[tokio::test]
async fn render_failure_keeps_earlier_artifacts() {
    let fx = fixture("<h1>${company_name}</h1>");
    let collaborators = Collaborators {
        generator: Some(Arc::new(FakeGenerator::new(values(&[(
            "company_name",
            json!("Acme"),
        )])))),
        logos: None,
        renderer: Arc::new(FakeRenderer {
            fail: true,
            ..Default::default()
        }),
    };

    let output = run_batch_with(&config(&fx), &companies(&["Acme", "Beta"]), collaborators)
        .await
        .unwrap();

    assert_eq!(output.stats.failed, 2);
    let r = &output.companies[0];
    assert_eq!(r.error.as_ref().unwrap().phase(), Phase::Render);
    assert!(r.artifacts.html.as_ref().unwrap().exists());
    assert!(r.artifacts.data_json.as_ref().unwrap().exists());
    assert!(r.artifacts.pdf.is_none());
}

#[tokio::test]
async fn render_timeout_is_reported_as_timeout() {
    let fx = fixture("<h1>${company_name}</h1>");
    let collaborators = Collaborators {
        generator: Some(Arc::new(FakeGenerator::new(values(&[(
            "company_name",
            json!("Acme"),
        )])))),
        logos: None,
        renderer: Arc::new(FakeRenderer {
            hang: true,
            ..Default::default()
        }),
    };

    let output = run_batch_with(&config(&fx), &companies(&["Acme"]), collaborators)
        .await
        .unwrap();

    let err = output.companies[0].error.as_ref().unwrap();
    assert!(matches!(
        err,
        CompanyError::Timeout { phase: Phase::Render, secs: 120, .. }
    ));
    assert!(output.companies[0].artifacts.pdf.is_none());
}

#[tokio::test]
async fn stop_request_skips_remaining_companies() {
    let fx = fixture("<h1>${company_name}</h1>");
    let stop = StopHandle::new();
    let config = ProfileConfig::builder()
        .template(fx.template.clone())
        .output_dir(fx.out.clone())
        .cooldown_secs(5)
        .stop_handle(stop.clone())
        .build()
        .unwrap();
    let generator = Arc::new(
        FakeGenerator::new(values(&[("company_name", json!("X"))])).stopping(stop.clone()),
    );
    let collaborators = Collaborators {
        generator: Some(generator.clone()),
        logos: None,
        renderer: Arc::new(FakeRenderer::default()),
    };

    let started = std::time::Instant::now();
    let output = run_batch_with(&config, &companies(&["One", "Two", "Three"]), collaborators)
        .await
        .unwrap();

    // The company in flight finishes; nothing else starts and the cooldown is skipped.
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert!(output.stopped);
    assert_eq!(output.companies.len(), 1);
    assert!(output.companies[0].is_success());
    assert_eq!(output.stats.skipped, 2);
}

#[tokio::test]
async fn blank_lines_and_duplicate_names_handled() {
    let fx = fixture("<p>static</p>");
    let collaborators = Collaborators {
        generator: None,
        logos: None,
        renderer: Arc::new(FakeRenderer::default()),
    };
    let output = run_batch_with(
        &config(&fx),
        &companies(&["  Acme  ", "", "   ", "Acme!"]),
        collaborators,
    )
    .await
    .unwrap();

    let names: Vec<_> = output.companies.iter().map(|r| r.safe_name.as_str()).collect();
    assert_eq!(names, vec!["Acme", "Acme_2"]);
    assert_eq!(output.companies[0].company, "Acme");
    assert!(fx.out.join("Acme_2_profile.pdf").exists());
}

#[tokio::test]
async fn missing_template_is_fatal() {
    let dir = TempDir::new().unwrap();
    let config = ProfileConfig::builder()
        .template(dir.path().join("absent.html"))
        .output_dir(dir.path().join("out"))
        .build()
        .unwrap();
    let collaborators = Collaborators {
        generator: None,
        logos: None,
        renderer: Arc::new(FakeRenderer::default()),
    };
    let err = run_batch_with(&config, &companies(&["Acme"]), collaborators)
        .await
        .unwrap_err();
    assert!(matches!(err, ProfileError::TemplateNotFound { .. }));
}

#[tokio::test]
async fn fields_without_generator_is_a_config_error() {
    let fx = fixture("<p>${ceo}</p>");
    let collaborators = Collaborators {
        generator: None,
        logos: None,
        renderer: Arc::new(FakeRenderer::default()),
    };
    let err = run_batch_with(&config(&fx), &companies(&["Acme"]), collaborators)
        .await
        .unwrap_err();
    assert!(matches!(err, ProfileError::InvalidConfig(_)));
}

#[tokio::test]
async fn stream_yields_results_in_input_order() {
    let fx = fixture("<h1>${company_name}</h1>");
    let collaborators = Collaborators {
        generator: Some(Arc::new(
            FakeGenerator::new(values(&[("company_name", json!("X"))])).failing_for("Beta"),
        )),
        logos: None,
        renderer: Arc::new(FakeRenderer::default()),
    };

    let stream = run_batch_stream_with_collaborators(
        &config(&fx),
        &companies(&["Alpha", "Beta", "Gamma"]),
        collaborators,
    )
    .await
    .unwrap();
    let results: Vec<_> = stream.collect().await;

    let order: Vec<_> = results.iter().map(|r| r.company.as_str()).collect();
    assert_eq!(order, vec!["Alpha", "Beta", "Gamma"]);
    assert!(results[0].is_success());
    assert!(!results[1].is_success());
    assert!(results[2].is_success());
}

#[tokio::test]
async fn progress_callback_sees_every_phase() {
    let fx = fixture("<h1>${company_name}</h1>");
    let log = Arc::new(EventLog::default());
    let config = ProfileConfig::builder()
        .template(fx.template.clone())
        .output_dir(fx.out.clone())
        .cooldown_secs(0)
        .progress_callback(log.clone())
        .build()
        .unwrap();
    let collaborators = Collaborators {
        generator: Some(Arc::new(
            FakeGenerator::new(values(&[("company_name", json!("X"))])).failing_for("Beta"),
        )),
        logos: None,
        renderer: Arc::new(FakeRenderer::default()),
    };

    run_batch_with(&config, &companies(&["Alpha", "Beta"]), collaborators)
        .await
        .unwrap();

    let events = log.0.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "batch_start 2 1",
            "start 1 Alpha",
            "phase generate",
            "phase logo",
            "phase merge",
            "phase render",
            "phase persist",
            "complete 1 Alpha",
            "start 2 Beta",
            "phase generate",
            "error 2 Beta",
            "batch_complete 2 1",
        ]
    );
}
