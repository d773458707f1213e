//! Batch orchestration: one template, many companies.
//!
//! The template is loaded and scanned once; each company then runs
//! generate → logo → merge → render in sequence, writing its artifacts as it
//! goes. A company that fails in any phase is recorded in its
//! [`CompanyResult`] and the batch moves on. Only problems that make every
//! company impossible (no template, no provider, no output directory) are
//! returned as `Err`.

use crate::config::ProfileConfig;
use crate::error::{CompanyError, LogoError, Phase, ProfileError, RenderError};
use crate::output::{
    AssetReference, BatchOutput, BatchStats, CompanyArtifacts, CompanyResult, FieldValues,
    LogoOutcome,
};
use crate::pipeline::fields::{missing_fields, FieldGenerator, LlmFieldGenerator};
use crate::pipeline::logo::{LogoSource, WebLogoSource};
use crate::pipeline::merge::{merge, MergeContext};
use crate::pipeline::render::{render_pdf, DocumentRenderer, ExternalRenderer};
use crate::pipeline::scan::Template;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Cooperative stop flag shared between the caller and a running batch.
///
/// Stopping never interrupts a company mid-pipeline; it prevents the next
/// one from starting and cuts the cooldown short.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The external services a batch talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Required when the template has fields to request.
    pub generator: Option<Arc<dyn FieldGenerator>>,
    /// `None` disables logo lookup.
    pub logos: Option<Arc<dyn LogoSource>>,
    pub renderer: Arc<dyn DocumentRenderer>,
}

impl Collaborators {
    /// Production collaborators for `config`.
    ///
    /// The LLM provider is only resolved when `needs_generator` is true, so a
    /// template without fields runs without any API key. A missing PDF
    /// engine is fatal because every company would fail at the last step.
    pub fn from_config(config: &ProfileConfig, needs_generator: bool) -> Result<Self, ProfileError> {
        let renderer = ExternalRenderer::detect(
            config.render_engine,
            config.render_binary.as_deref(),
            config.page_size,
            config.render_timeout_secs,
        )
        .map_err(|e| ProfileError::RendererNotAvailable {
            hint: e.to_string(),
        })?;
        info!("Rendering PDFs with {} ('{}')", renderer.engine(), renderer.binary().display());

        let generator: Option<Arc<dyn FieldGenerator>> = if needs_generator {
            Some(Arc::new(LlmFieldGenerator::from_config(config)?))
        } else {
            None
        };

        let logos: Option<Arc<dyn LogoSource>> = if config.fetch_logos {
            match WebLogoSource::new(
                config.logo_search_url.clone(),
                config.http_timeout_secs,
                config.max_logo_candidates,
            ) {
                Ok(source) => Some(Arc::new(source)),
                Err(e) => {
                    warn!("Logo lookup disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            generator,
            logos,
            renderer: Arc::new(renderer),
        })
    }
}

/// Run the full pipeline for every company.
///
/// # Errors
/// Fatal only: invalid company list, unreadable template, output directory
/// not creatable, provider not configured. Per-company failures are in
/// `BatchOutput::companies[i].error`.
pub async fn run_batch(
    config: &ProfileConfig,
    companies: &[String],
) -> Result<BatchOutput, ProfileError> {
    let prepared = prepare(config, companies).await?;
    let collaborators =
        Collaborators::from_config(config, !prepared.requested_fields.is_empty())?;
    run_prepared(config, prepared, collaborators).await
}

/// Like [`run_batch`] with caller-supplied collaborators.
pub async fn run_batch_with(
    config: &ProfileConfig,
    companies: &[String],
    collaborators: Collaborators,
) -> Result<BatchOutput, ProfileError> {
    let prepared = prepare(config, companies).await?;
    run_prepared(config, prepared, collaborators).await
}

async fn run_prepared(
    config: &ProfileConfig,
    prepared: Prepared,
    collaborators: Collaborators,
) -> Result<BatchOutput, ProfileError> {
    let batch_start = Instant::now();
    let runner = BatchRunner::new(config.clone(), prepared, collaborators)?;
    let total = runner.companies.len();

    runner.notify_start();

    let mut results = Vec::with_capacity(total);
    let mut stopped = false;
    for index in 0..total {
        if config.stop.is_stopped() {
            info!("Stop requested; skipping {} remaining companies", total - index);
            stopped = true;
            break;
        }
        if index > 0 {
            runner.cooldown().await;
            if config.stop.is_stopped() {
                info!("Stop requested; skipping {} remaining companies", total - index);
                stopped = true;
                break;
            }
        }
        results.push(runner.run_company(index).await);
    }

    let output = runner.finish(results, stopped, batch_start);
    Ok(output)
}

// ── Preparation ──────────────────────────────────────────────────────────

/// Everything resolved once per batch.
pub(crate) struct Prepared {
    pub template: Template,
    pub placeholders: Vec<String>,
    pub requested_fields: Vec<String>,
    /// `(company, safe_name)`, blanks removed, safe names unique.
    pub companies: Vec<(String, String)>,
}

pub(crate) async fn prepare(
    config: &ProfileConfig,
    companies: &[String],
) -> Result<Prepared, ProfileError> {
    let companies: Vec<String> = companies
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if companies.is_empty() {
        return Err(ProfileError::InvalidConfig(
            "At least one company name is required".into(),
        ));
    }

    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .map_err(|e| ProfileError::OutputDirFailed {
            path: config.output_dir.clone(),
            source: e,
        })?;

    let template_path = config.template_path();
    info!("Analysing template {}", template_path.display());
    let template = Template::load(&template_path)?;
    let set = template.placeholders();
    if set.is_empty() {
        warn!("No placeholders found in template; every profile will be identical");
    } else {
        info!("Found {} placeholders", set.len());
    }
    let requested_fields = set.requested_fields();
    debug!("Requested fields: {:?}", requested_fields);

    Ok(Prepared {
        placeholders: set.to_vec(),
        requested_fields,
        companies: assign_safe_names(companies),
        template,
    })
}

fn assign_safe_names(companies: Vec<String>) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    companies
        .into_iter()
        .map(|company| {
            let base = safe_name(&company);
            let mut candidate = base.clone();
            let mut n = 2;
            while !seen.insert(candidate.clone()) {
                candidate = format!("{base}_{n}");
                n += 1;
            }
            (company, candidate)
        })
        .collect()
}

/// Filename-safe stem for a company name.
///
/// Keeps letters, digits, space, `-` and `_`, trims, and turns spaces into
/// underscores. A name with nothing left becomes `company`.
pub fn safe_name(company: &str) -> String {
    let kept: String = company
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let stem = kept.trim().replace(' ', "_");
    if stem.is_empty() {
        "company".to_string()
    } else {
        stem
    }
}

/// Split pasted text into company names: one per line, blanks dropped.
pub fn parse_company_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Per-company runner ───────────────────────────────────────────────────

pub(crate) struct BatchRunner {
    config: ProfileConfig,
    template: Template,
    placeholders: Vec<String>,
    requested_fields: Vec<String>,
    pub(crate) companies: Vec<(String, String)>,
    collaborators: Collaborators,
}

impl BatchRunner {
    pub(crate) fn new(
        config: ProfileConfig,
        prepared: Prepared,
        collaborators: Collaborators,
    ) -> Result<Self, ProfileError> {
        if !prepared.requested_fields.is_empty() && collaborators.generator.is_none() {
            return Err(ProfileError::InvalidConfig(format!(
                "Template requests {} fields but no field generator is configured",
                prepared.requested_fields.len()
            )));
        }
        Ok(Self {
            config,
            template: prepared.template,
            placeholders: prepared.placeholders,
            requested_fields: prepared.requested_fields,
            companies: prepared.companies,
            collaborators,
        })
    }

    pub(crate) fn notify_start(&self) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_start(self.companies.len(), self.requested_fields.len());
        }
    }

    pub(crate) fn notify_complete(&self, succeeded: usize) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_complete(self.companies.len(), succeeded);
        }
    }

    /// Wait out the inter-company cooldown in one-second slices.
    pub(crate) async fn cooldown(&self) {
        let secs = self.config.cooldown_secs;
        if secs == 0 {
            return;
        }
        debug!("Cooling down for {}s", secs);
        for _ in 0..secs {
            if self.config.stop.is_stopped() {
                return;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }

    fn phase(&self, company: &str, phase: Phase) {
        debug!("{}: {} phase", company, phase);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_phase(company, phase);
        }
    }

    /// Run every phase for the company at `index`. Never fails.
    pub(crate) async fn run_company(&self, index: usize) -> CompanyResult {
        let (company, safe) = &self.companies[index];
        let total = self.companies.len();
        let start = Instant::now();
        info!("Processing {} ({}/{})", company, index + 1, total);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_company_start(index + 1, total, company);
        }

        let mut result = CompanyResult {
            company: company.clone(),
            safe_name: safe.clone(),
            fields: FieldValues::new(),
            missing_fields: Vec::new(),
            logo: LogoOutcome::Disabled,
            artifacts: CompanyArtifacts::default(),
            duration_ms: 0,
            error: None,
        };

        if let Err(e) = self.run_phases(company, safe, &mut result).await {
            warn!("{}", e);
            result.error = Some(e);
        }
        result.duration_ms = start.elapsed().as_millis() as u64;

        if let Some(ref cb) = self.config.progress_callback {
            match &result.error {
                None => cb.on_company_complete(index + 1, total, &result),
                Some(e) => cb.on_company_error(index + 1, total, company, &e.to_string()),
            }
        }
        result
    }

    async fn run_phases(
        &self,
        company: &str,
        safe: &str,
        result: &mut CompanyResult,
    ) -> Result<(), CompanyError> {
        let out_dir = &self.config.output_dir;

        // ── Generate ─────────────────────────────────────────────────────
        self.phase(company, Phase::Generate);
        let fields = match self.collaborators.generator {
            Some(ref generator) if !self.requested_fields.is_empty() => {
                generator.generate(company, &self.requested_fields).await?
            }
            _ => FieldValues::new(),
        };
        result.missing_fields = missing_fields(&self.requested_fields, &fields);
        if !result.missing_fields.is_empty() {
            warn!(
                "{}: {} fields missing from response: {:?}",
                company,
                result.missing_fields.len(),
                result.missing_fields
            );
        }

        let json_path = out_dir.join(format!("{safe}_data.json"));
        let json = serde_json::to_vec_pretty(&fields).map_err(|e| CompanyError::ArtifactWrite {
            company: company.to_string(),
            path: json_path.clone(),
            detail: e.to_string(),
        })?;
        write_artifact(company, &json_path, &json).await?;
        result.artifacts.data_json = Some(json_path);
        result.fields = fields;

        // ── Logo ─────────────────────────────────────────────────────────
        self.phase(company, Phase::Logo);
        let logo_name = format!("{safe}_logo.png");
        let logo_path = out_dir.join(&logo_name);
        let (asset, outcome) = self.resolve_logo(company, &logo_name, &logo_path).await;
        if let (Some(asset), LogoOutcome::Found { .. }) = (&asset, &outcome) {
            write_artifact(company, &logo_path, &asset.bytes).await?;
        }
        if asset.is_some() {
            result.artifacts.logo = Some(logo_path);
        }
        result.logo = outcome;

        // ── Merge ────────────────────────────────────────────────────────
        self.phase(company, Phase::Merge);
        let ctx = MergeContext::for_company(&result.fields, asset.as_ref());
        let html = merge(self.template.text(), &ctx, self.config.unresolved);
        let html_path = out_dir.join(format!("{safe}_profile.html"));
        write_artifact(company, &html_path, html.as_bytes()).await?;
        result.artifacts.html = Some(html_path);

        // ── Render ───────────────────────────────────────────────────────
        self.phase(company, Phase::Render);
        let assets: Vec<AssetReference> = asset.into_iter().collect();
        let pdf = render_pdf(Arc::clone(&self.collaborators.renderer), html, assets)
            .await
            .map_err(|e| match e {
                RenderError::Timeout { secs } => CompanyError::Timeout {
                    company: company.to_string(),
                    phase: Phase::Render,
                    secs,
                },
                other => CompanyError::Render {
                    company: company.to_string(),
                    detail: other.to_string(),
                },
            })?;

        self.phase(company, Phase::Persist);
        let pdf_path = out_dir.join(format!("{safe}_profile.pdf"));
        write_artifact(company, &pdf_path, &pdf).await?;
        result.artifacts.pdf = Some(pdf_path);

        info!("{}: profile complete", company);
        Ok(())
    }

    async fn resolve_logo(
        &self,
        company: &str,
        logo_name: &str,
        logo_path: &Path,
    ) -> (Option<AssetReference>, LogoOutcome) {
        let Some(ref source) = self.collaborators.logos else {
            return (None, LogoOutcome::Disabled);
        };

        if self.config.reuse_existing_logos && tokio::fs::try_exists(logo_path).await.unwrap_or(false) {
            return match tokio::fs::read(logo_path).await {
                Ok(bytes) => {
                    info!("{}: reusing existing logo", company);
                    (
                        Some(AssetReference {
                            file_name: logo_name.to_string(),
                            bytes,
                            content_type: "image/png".to_string(),
                            source_url: None,
                        }),
                        LogoOutcome::Reused,
                    )
                }
                Err(e) => {
                    let err = LogoError::Io {
                        path: logo_path.to_path_buf(),
                        source: e,
                    };
                    warn!("{}: {}", company, err);
                    (None, LogoOutcome::Failed { reason: err.to_string() })
                }
            };
        }

        match source.find_logo(company, logo_name).await {
            Ok(Some(asset)) => {
                let url = asset.source_url.clone().unwrap_or_default();
                (Some(asset), LogoOutcome::Found { url })
            }
            Ok(None) => {
                info!("{}: no logo found; continuing without one", company);
                (None, LogoOutcome::Missing)
            }
            Err(e) => {
                warn!("{}: logo lookup failed: {}; continuing without one", company, e);
                (None, LogoOutcome::Failed { reason: e.to_string() })
            }
        }
    }

    pub(crate) fn finish(
        &self,
        results: Vec<CompanyResult>,
        stopped: bool,
        batch_start: Instant,
    ) -> BatchOutput {
        let total = self.companies.len();
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let failed = results.len() - succeeded;
        let stats = BatchStats {
            total_companies: total,
            succeeded,
            failed,
            skipped: total - results.len(),
            logos_found: results.iter().filter(|r| r.logo.has_logo()).count(),
            total_duration_ms: batch_start.elapsed().as_millis() as u64,
        };

        info!(
            "Batch complete: {}/{} succeeded, {} failed, {} skipped, {}ms",
            succeeded, total, failed, stats.skipped, stats.total_duration_ms
        );
        self.notify_complete(succeeded);

        BatchOutput {
            template: self.template.path().to_path_buf(),
            placeholders: self.placeholders.clone(),
            requested_fields: self.requested_fields.clone(),
            output_dir: self.config.output_dir.clone(),
            companies: results,
            stats,
            stopped,
        }
    }
}

/// Atomic write: temp file in the same directory, then rename.
async fn write_artifact(company: &str, path: &Path, bytes: &[u8]) -> Result<(), CompanyError> {
    let fail = |e: std::io::Error| CompanyError::ArtifactWrite {
        company: company.to_string(),
        path: path.to_path_buf(),
        detail: e.to_string(),
    };

    let tmp_path = tmp_path_for(path);
    tokio::fs::write(&tmp_path, bytes).await.map_err(fail)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(fail(e));
    }
    debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
