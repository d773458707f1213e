//! # profile-forge
//!
//! Generate corporate profile documents from an HTML template and a list of
//! company names, filling the template's fields with an LLM.
//!
//! ## Pipeline Overview
//!
//! ```text
//! template.html ── scan ──▶ requested fields (once per batch)
//!                               │
//! for each company:             ▼
//!  ├─ 1. Generate  one LLM call → JSON object of field values
//!  ├─ 2. Logo      best-effort image search, normalised to PNG
//!  ├─ 3. Merge     HTML-escaped `${name}` substitution
//!  ├─ 4. Render    HTML → A4 PDF via WeasyPrint / wkhtmltopdf / Chromium
//!  └─ 5. Persist   {name}_data.json, _logo.png, _profile.html, _profile.pdf
//! ```
//!
//! Companies run strictly one after another with a configurable cooldown
//! between them. A failure is recorded against its company and the batch
//! carries on.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use profile_forge::{run_batch, ProfileConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider resolved from GEMINI_API_KEY or EDGEQUAKE_LLM_PROVIDER/EDGEQUAKE_MODEL
//!     let config = ProfileConfig::builder()
//!         .template("profile_template.html")
//!         .output_dir("output")
//!         .build()?;
//!     let companies = vec!["Nokia".to_string(), "Rovio Entertainment".to_string()];
//!     let output = run_batch(&config, &companies).await?;
//!     for r in &output.companies {
//!         println!("{}: {}", r.company, if r.is_success() { "ok" } else { "failed" });
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `profile-forge` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{
    parse_company_list, run_batch, run_batch_with, safe_name, Collaborators, StopHandle,
};
pub use config::{PageSize, ProfileConfig, ProfileConfigBuilder, UnresolvedPolicy};
pub use error::{CompanyError, LogoError, Phase, ProfileError, RenderError};
pub use output::{
    AssetReference, BatchOutput, BatchStats, CompanyArtifacts, CompanyResult, FieldValues,
    LogoOutcome,
};
pub use pipeline::fields::{FieldGenerator, LlmFieldGenerator};
pub use pipeline::logo::{LogoSource, WebLogoSource};
pub use pipeline::merge::{merge, MergeContext};
pub use pipeline::render::{DocumentRenderer, ExternalRenderer, RenderEngine};
pub use pipeline::scan::{list_templates, scan_placeholders, PlaceholderSet, Template};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{run_batch_stream, run_batch_stream_with_collaborators, CompanyStream};
