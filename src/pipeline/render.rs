//! PDF rendering: merged HTML → paginated PDF bytes.
//!
//! Layout is delegated to an installed HTML engine (WeasyPrint, wkhtmltopdf
//! or headless Chromium) run as a child process. Each render gets its own
//! temporary directory holding the document and every asset it references,
//! so `<img src="Acme_logo.png">` resolves next to the HTML exactly as it
//! does for the saved artifacts.
//!
//! ## Engine selection
//!
//! [`ExternalRenderer::detect`] runs `<binary> --version` for each engine
//! in [`RenderEngine::ALL`] order and keeps the first that answers. An
//! explicit binary path skips the check.

use crate::config::PageSize;
use crate::error::RenderError;
use crate::output::AssetReference;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

/// Converts a complete HTML document into PDF bytes.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Render `html`. `assets` are made available to `<img src="file_name">`.
    async fn render(&self, html: &str, assets: &[AssetReference]) -> Result<Vec<u8>, RenderError>;
}

/// Supported HTML-to-PDF engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderEngine {
    WeasyPrint,
    Wkhtmltopdf,
    Chromium,
}

impl RenderEngine {
    /// Detection order.
    pub const ALL: [RenderEngine; 3] =
        [RenderEngine::WeasyPrint, RenderEngine::Wkhtmltopdf, RenderEngine::Chromium];

    pub fn name(&self) -> &'static str {
        match self {
            RenderEngine::WeasyPrint => "weasyprint",
            RenderEngine::Wkhtmltopdf => "wkhtmltopdf",
            RenderEngine::Chromium => "chromium",
        }
    }

    /// Executable names looked up on `PATH`.
    pub fn binaries(&self) -> &'static [&'static str] {
        match self {
            RenderEngine::WeasyPrint => &["weasyprint"],
            RenderEngine::Wkhtmltopdf => &["wkhtmltopdf"],
            RenderEngine::Chromium => &[
                "chromium",
                "chromium-browser",
                "google-chrome",
                "google-chrome-stable",
            ],
        }
    }

    /// Guess the engine from an executable path, e.g. `/opt/bin/weasyprint`.
    pub fn from_binary(path: &Path) -> Option<Self> {
        let stem = path.file_stem()?.to_str()?.to_ascii_lowercase();
        if stem.contains("weasyprint") {
            Some(RenderEngine::WeasyPrint)
        } else if stem.contains("wkhtmltopdf") {
            Some(RenderEngine::Wkhtmltopdf)
        } else if stem.contains("chrom") {
            Some(RenderEngine::Chromium)
        } else {
            None
        }
    }

    /// Command-line arguments converting `html` into `pdf`.
    fn args(&self, html: &Path, pdf: &Path, base_dir: &Path, page_size: PageSize) -> Vec<String> {
        let html_s = html.display().to_string();
        let pdf_s = pdf.display().to_string();
        match self {
            RenderEngine::WeasyPrint => vec![
                "--base-url".to_string(),
                base_dir.display().to_string(),
                html_s,
                pdf_s,
            ],
            RenderEngine::Wkhtmltopdf => vec![
                "--quiet".to_string(),
                "--enable-local-file-access".to_string(),
                "--encoding".to_string(),
                "utf-8".to_string(),
                "--page-size".to_string(),
                page_size.css_name().to_string(),
                html_s,
                pdf_s,
            ],
            RenderEngine::Chromium => {
                let url = reqwest::Url::from_file_path(html)
                    .map(|u| u.to_string())
                    .unwrap_or_else(|_| format!("file://{html_s}"));
                vec![
                    "--headless".to_string(),
                    "--disable-gpu".to_string(),
                    "--no-sandbox".to_string(),
                    "--no-pdf-header-footer".to_string(),
                    "--print-to-pdf-no-header".to_string(),
                    format!("--print-to-pdf={pdf_s}"),
                    url,
                ]
            }
        }
    }
}

impl std::fmt::Display for RenderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// [`DocumentRenderer`] that shells out to an installed HTML engine.
#[derive(Debug, Clone)]
pub struct ExternalRenderer {
    engine: RenderEngine,
    binary: PathBuf,
    page_size: PageSize,
    timeout_secs: u64,
}

impl ExternalRenderer {
    /// Use `binary` as `engine` without checking it.
    pub fn new(
        engine: RenderEngine,
        binary: impl Into<PathBuf>,
        page_size: PageSize,
        timeout_secs: u64,
    ) -> Self {
        Self {
            engine,
            binary: binary.into(),
            page_size,
            timeout_secs,
        }
    }

    /// Find a usable engine.
    ///
    /// - `binary` given: used as-is; the engine comes from `engine` or is
    ///   guessed from the file name.
    /// - otherwise: each candidate executable of `engine` (or of every
    ///   engine) is tried with `--version`.
    pub fn detect(
        engine: Option<RenderEngine>,
        binary: Option<&Path>,
        page_size: PageSize,
        timeout_secs: u64,
    ) -> Result<Self, RenderError> {
        if let Some(path) = binary {
            let engine = engine.or_else(|| RenderEngine::from_binary(path)).ok_or_else(|| {
                RenderError::EngineNotFound(format!(
                    "cannot tell which engine '{}' is; pass the engine explicitly",
                    path.display()
                ))
            })?;
            return Ok(Self::new(engine, path, page_size, timeout_secs));
        }

        let candidates: Vec<RenderEngine> = match engine {
            Some(e) => vec![e],
            None => RenderEngine::ALL.to_vec(),
        };
        let mut tried = Vec::new();
        for engine in candidates {
            for bin in engine.binaries() {
                if answers_version(Path::new(bin)) {
                    debug!("Using {} at '{}'", engine, bin);
                    return Ok(Self::new(engine, *bin, page_size, timeout_secs));
                }
                tried.push(*bin);
            }
        }
        Err(RenderError::EngineNotFound(format!(
            "none of [{}] answered --version. Install WeasyPrint (pip install weasyprint), \
             wkhtmltopdf or Chromium, or point at one with --engine-path",
            tried.join(", ")
        )))
    }

    pub fn engine(&self) -> RenderEngine {
        self.engine
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

/// `true` when `<binary> --version` runs and exits successfully.
fn answers_version(binary: &Path) -> bool {
    std::process::Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[async_trait]
impl DocumentRenderer for ExternalRenderer {
    async fn render(&self, html: &str, assets: &[AssetReference]) -> Result<Vec<u8>, RenderError> {
        let work = tempfile::Builder::new()
            .prefix("profile-forge-")
            .tempdir()
            .map_err(|e| RenderError::Io(format!("temporary directory: {e}")))?;
        let html_path = work.path().join("profile.html");
        let pdf_path = work.path().join("profile.pdf");

        for asset in assets {
            if !is_plain_file_name(&asset.file_name) {
                warn!("Skipping asset with unsafe name '{}'", asset.file_name);
                continue;
            }
            tokio::fs::write(work.path().join(&asset.file_name), &asset.bytes)
                .await
                .map_err(|e| RenderError::Io(format!("asset '{}': {e}", asset.file_name)))?;
        }
        tokio::fs::write(&html_path, with_page_size(html, self.page_size))
            .await
            .map_err(|e| RenderError::Io(format!("document: {e}")))?;

        let args = self.engine.args(&html_path, &pdf_path, work.path(), self.page_size);
        debug!("Running {} {:?}", self.binary.display(), args);
        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .current_dir(work.path())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match timeout(Duration::from_secs(self.timeout_secs), cmd.output()).await {
            Err(_) => {
                return Err(RenderError::Timeout {
                    secs: self.timeout_secs,
                })
            }
            Ok(Err(e)) => {
                return Err(RenderError::Engine(format!(
                    "failed to start '{}': {e}",
                    self.binary.display()
                )))
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RenderError::Engine(format!(
                "{} exited with {}: {}",
                self.engine,
                output.status,
                tail(stderr.trim(), 500)
            )));
        }

        let bytes = tokio::fs::read(&pdf_path).await.map_err(|e| {
            RenderError::Engine(format!("{} wrote no PDF: {e}", self.engine))
        })?;
        if !bytes.starts_with(b"%PDF") {
            return Err(RenderError::NotAPdf);
        }
        debug!("Rendered {} bytes of PDF with {}", bytes.len(), self.engine);
        Ok(bytes)
    }
}

/// A bare file name with no directory part.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && Path::new(name).file_name().is_some_and(|n| n == name)
}

/// Add an `@page` size rule unless the document already declares one.
fn with_page_size(html: &str, page_size: PageSize) -> String {
    if html.contains("@page") {
        return html.to_string();
    }
    let rule = format!("<style>@page {{ size: {}; }}</style>", page_size.css_name());
    match html.to_ascii_lowercase().find("</head>") {
        Some(pos) => format!("{}{}{}", &html[..pos], rule, &html[pos..]),
        None => format!("{rule}{html}"),
    }
}

/// Last `max` bytes of `s`, on a char boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Render on its own task so a panicking renderer fails one company, not
/// the batch.
pub async fn render_pdf(
    renderer: Arc<dyn DocumentRenderer>,
    html: String,
    assets: Vec<AssetReference>,
) -> Result<Vec<u8>, RenderError> {
    tokio::spawn(async move { renderer.render(&html, &assets).await })
        .await
        .map_err(|e| RenderError::Panicked(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PanickingRenderer;

    #[async_trait]
    impl DocumentRenderer for PanickingRenderer {
        async fn render(
            &self,
            _html: &str,
            _assets: &[AssetReference],
        ) -> Result<Vec<u8>, RenderError> {
            panic!("engine crashed");
        }
    }

    fn logo_asset() -> AssetReference {
        AssetReference {
            file_name: "Acme_logo.png".to_string(),
            bytes: vec![0x89, b'P', b'N', b'G'],
            content_type: "image/png".to_string(),
            source_url: None,
        }
    }

    /// Write an executable shell script standing in for an engine binary.
    #[cfg(unix)]
    fn fake_engine(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn panics_become_render_errors() {
        let err = render_pdf(Arc::new(PanickingRenderer), String::new(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Panicked(_)));
    }

    #[test]
    fn page_rule_goes_into_head() {
        let html = "<html><head><title>t</title></head><body>x</body></html>";
        let out = with_page_size(html, PageSize::Letter);
        assert!(out.contains("<style>@page { size: Letter; }</style></head>"));
        assert!(out.ends_with("<body>x</body></html>"));
    }

    #[test]
    fn existing_page_rule_is_kept() {
        let html = "<html><head><style>@page { size: A5; }</style></head></html>";
        assert_eq!(with_page_size(html, PageSize::A4), html);
    }

    #[test]
    fn page_rule_prepended_without_head() {
        let out = with_page_size("<p>bare</p>", PageSize::A4);
        assert_eq!(out, "<style>@page { size: A4; }</style><p>bare</p>");
    }

    #[test]
    fn asset_names_must_be_plain() {
        assert!(is_plain_file_name("Acme_logo.png"));
        assert!(!is_plain_file_name("../escape.png"));
        assert!(!is_plain_file_name("sub/dir.png"));
        assert!(!is_plain_file_name(""));
    }

    #[test]
    fn engine_guessed_from_binary_name() {
        assert_eq!(
            RenderEngine::from_binary(Path::new("/usr/local/bin/weasyprint")),
            Some(RenderEngine::WeasyPrint)
        );
        assert_eq!(
            RenderEngine::from_binary(Path::new("wkhtmltopdf.exe")),
            Some(RenderEngine::Wkhtmltopdf)
        );
        assert_eq!(
            RenderEngine::from_binary(Path::new("/opt/google-chrome")),
            Some(RenderEngine::Chromium)
        );
        assert_eq!(RenderEngine::from_binary(Path::new("/bin/cat")), None);
    }

    #[test]
    fn unknown_binary_needs_explicit_engine() {
        let err = ExternalRenderer::detect(None, Some(Path::new("/bin/cat")), PageSize::A4, 5)
            .unwrap_err();
        assert!(matches!(err, RenderError::EngineNotFound(_)));
        let r = ExternalRenderer::detect(
            Some(RenderEngine::Chromium),
            Some(Path::new("/bin/cat")),
            PageSize::A4,
            5,
        )
        .unwrap();
        assert_eq!(r.engine(), RenderEngine::Chromium);
    }

    #[test]
    fn weasyprint_reads_assets_relative_to_work_dir() {
        let args = RenderEngine::WeasyPrint.args(
            Path::new("/w/profile.html"),
            Path::new("/w/profile.pdf"),
            Path::new("/w"),
            PageSize::A4,
        );
        assert_eq!(args, ["--base-url", "/w", "/w/profile.html", "/w/profile.pdf"]);
    }

    #[test]
    fn chromium_prints_a_file_url() {
        let args = RenderEngine::Chromium.args(
            Path::new("/w/profile.html"),
            Path::new("/w/profile.pdf"),
            Path::new("/w"),
            PageSize::A4,
        );
        assert!(args.contains(&"--headless".to_string()));
        assert!(args.contains(&"--print-to-pdf=/w/profile.pdf".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("file:///w/profile.html"));
    }

    #[test]
    fn wkhtmltopdf_gets_page_size_and_file_access() {
        let args = RenderEngine::Wkhtmltopdf.args(
            Path::new("/w/profile.html"),
            Path::new("/w/profile.pdf"),
            Path::new("/w"),
            PageSize::Letter,
        );
        assert!(args.contains(&"--enable-local-file-access".to_string()));
        let i = args.iter().position(|a| a == "--page-size").unwrap();
        assert_eq!(args[i + 1], "Letter");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn engine_sees_document_and_logo_side_by_side() {
        let bin_dir = tempfile::TempDir::new().unwrap();
        // Last two arguments are the input document and the output PDF.
        let script = r#"for a; do html=$out; out=$a; done
dir=$(dirname "$html")
[ -f "$dir/Acme_logo.png" ] || { echo "logo missing" >&2; exit 3; }
grep -q 'src="Acme_logo.png"' "$html" || { echo "img missing" >&2; exit 4; }
grep -q '@page { size: A4; }' "$html" || { echo "page rule missing" >&2; exit 5; }
printf '%%PDF-1.7 fake' > "$out""#;
        let bin = fake_engine(bin_dir.path(), "weasyprint", script);
        let renderer = ExternalRenderer::new(RenderEngine::WeasyPrint, bin, PageSize::A4, 10);

        let html = r#"<html><head></head><body><img src="Acme_logo.png"></body></html>"#;
        let bytes = renderer.render(html, &[logo_asset()]).await.unwrap();
        assert_eq!(bytes, b"%PDF-1.7 fake");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn engine_failure_carries_stderr() {
        let bin_dir = tempfile::TempDir::new().unwrap();
        let bin = fake_engine(bin_dir.path(), "weasyprint", "echo 'bad CSS at line 3' >&2; exit 1");
        let renderer = ExternalRenderer::new(RenderEngine::WeasyPrint, bin, PageSize::A4, 10);

        let err = renderer.render("<p>x</p>", &[]).await.unwrap_err();
        match err {
            RenderError::Engine(detail) => assert!(detail.contains("bad CSS at line 3"), "{detail}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_pdf_output_is_rejected() {
        let bin_dir = tempfile::TempDir::new().unwrap();
        let bin = fake_engine(bin_dir.path(), "weasyprint", r#"for a; do out=$a; done; echo '<html>' > "$out""#);
        let renderer = ExternalRenderer::new(RenderEngine::WeasyPrint, bin, PageSize::A4, 10);

        let err = renderer.render("<p>x</p>", &[]).await.unwrap_err();
        assert!(matches!(err, RenderError::NotAPdf));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_engine_times_out() {
        let bin_dir = tempfile::TempDir::new().unwrap();
        let bin = fake_engine(bin_dir.path(), "weasyprint", "sleep 30");
        let renderer = ExternalRenderer::new(RenderEngine::WeasyPrint, bin, PageSize::A4, 1);

        let err = renderer.render("<p>x</p>", &[]).await.unwrap_err();
        assert!(matches!(err, RenderError::Timeout { secs: 1 }));
    }

    #[tokio::test]
    async fn missing_binary_is_an_engine_error() {
        let renderer = ExternalRenderer::new(
            RenderEngine::WeasyPrint,
            "/nonexistent/weasyprint",
            PageSize::A4,
            5,
        );
        let err = renderer.render("<p>x</p>", &[]).await.unwrap_err();
        assert!(matches!(err, RenderError::Engine(_)));
    }
}
