//! Error types for the profile-forge library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ProfileError`] — **Fatal**: the batch cannot proceed at all
//!   (template missing, provider not configured, output directory not
//!   writable). Returned as `Err(ProfileError)` from [`crate::batch::run_batch`].
//!
//! * [`CompanyError`] — **Non-fatal**: one company failed in one phase
//!   (generation, rendering, writing an artifact) but the rest of the batch
//!   is fine. Stored inside [`crate::output::CompanyResult`] so callers can
//!   inspect partial success and retry by hand.
//!
//! Logo lookup has its own [`LogoError`]; a missing logo is never an error
//! at the batch level.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the profile-forge library.
#[derive(Debug, Error)]
pub enum ProfileError {
    // ── Template errors ───────────────────────────────────────────────────
    /// Template file was not found at the given path.
    #[error("Template not found: '{path}'\nList available templates with --list-templates.")]
    TemplateNotFound { path: PathBuf },

    /// Process does not have read permission on the template.
    #[error("Permission denied reading template '{path}'")]
    PermissionDenied { path: PathBuf },

    /// Template exists but could not be read (not UTF-8, I/O error).
    #[error("Failed to read template '{path}': {source}")]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Render errors ─────────────────────────────────────────────────────
    /// No HTML-to-PDF engine could be found.
    #[error("No PDF rendering engine available: {hint}")]
    RendererNotAvailable { hint: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The output directory could not be created.
    #[error("Failed to create output directory '{path}': {source}")]
    OutputDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// At least one company failed.
    ///
    /// Returned by [`crate::output::BatchOutput::into_result`] when the
    /// caller wants to treat any company failure as an error.
    #[error("{failed}/{total} companies failed")]
    PartialFailure {
        succeeded: usize,
        failed: usize,
        total: usize,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or input validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The stage of the per-company pipeline in which something happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Generate,
    Logo,
    Merge,
    Render,
    Persist,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Generate => "generate",
            Phase::Logo => "logo",
            Phase::Merge => "merge",
            Phase::Render => "render",
            Phase::Persist => "persist",
        };
        f.write_str(s)
    }
}

/// A non-fatal error for a single company.
///
/// Every variant names the company and, through [`CompanyError::phase`],
/// the failing phase, so the user can retry that company by hand.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum CompanyError {
    /// The generative service call failed after retries.
    #[error("{company}: generation failed after {retries} retries: {detail}")]
    Generation {
        company: String,
        retries: u32,
        detail: String,
    },

    /// A call timed out.
    #[error("{company}: {phase} timed out after {secs}s")]
    Timeout {
        company: String,
        phase: Phase,
        secs: u64,
    },

    /// The rendering engine rejected the merged document.
    #[error("{company}: PDF rendering failed: {detail}")]
    Render { company: String, detail: String },

    /// An artifact could not be written to the output directory.
    #[error("{company}: failed to write '{path}': {detail}")]
    ArtifactWrite {
        company: String,
        path: PathBuf,
        detail: String,
    },
}

impl CompanyError {
    /// The phase that failed.
    pub fn phase(&self) -> Phase {
        match self {
            CompanyError::Generation { .. } => Phase::Generate,
            CompanyError::Timeout { phase, .. } => *phase,
            CompanyError::Render { .. } => Phase::Render,
            CompanyError::ArtifactWrite { .. } => Phase::Persist,
        }
    }

    /// The company the error belongs to.
    pub fn company(&self) -> &str {
        match self {
            CompanyError::Generation { company, .. }
            | CompanyError::Timeout { company, .. }
            | CompanyError::Render { company, .. }
            | CompanyError::ArtifactWrite { company, .. } => company,
        }
    }
}

/// Logo lookup failure. Logged and recorded, never propagated.
#[derive(Debug, Error)]
pub enum LogoError {
    #[error("search request failed: {0}")]
    Search(String),

    #[error("download of '{url}' failed: {reason}")]
    Download { url: String, reason: String },

    #[error("'{url}' is not a decodable image: {reason}")]
    Decode { url: String, reason: String },

    #[error("failed to read existing logo '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure inside the rendering engine.
#[derive(Debug, Error)]
pub enum RenderError {
    /// No usable engine executable.
    #[error("{0}")]
    EngineNotFound(String),

    #[error("layout engine error: {0}")]
    Engine(String),

    #[error("engine produced output that is not a PDF")]
    NotAPdf,

    #[error("engine did not finish within {secs}s")]
    Timeout { secs: u64 },

    /// Preparing the work directory failed.
    #[error("render I/O error: {0}")]
    Io(String),

    #[error("render task panicked: {0}")]
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_failure_display() {
        let e = ProfileError::PartialFailure {
            succeeded: 3,
            failed: 1,
            total: 4,
        };
        assert!(e.to_string().contains("1/4"), "got: {e}");
    }

    #[test]
    fn company_error_names_company_and_phase() {
        let e = CompanyError::Timeout {
            company: "Kone".into(),
            phase: Phase::Generate,
            secs: 60,
        };
        let msg = e.to_string();
        assert!(msg.contains("Kone"));
        assert!(msg.contains("generate"));
        assert!(msg.contains("60s"));
        assert_eq!(e.phase(), Phase::Generate);
        assert_eq!(e.company(), "Kone");
    }

    #[test]
    fn artifact_write_is_persist_phase() {
        let e = CompanyError::ArtifactWrite {
            company: "Nokia".into(),
            path: PathBuf::from("out/Nokia_profile.pdf"),
            detail: "disk full".into(),
        };
        assert_eq!(e.phase(), Phase::Persist);
        assert!(e.to_string().contains("disk full"));
    }

    #[test]
    fn template_not_found_mentions_path() {
        let e = ProfileError::TemplateNotFound {
            path: PathBuf::from("templates/missing.html"),
        };
        assert!(e.to_string().contains("templates/missing.html"));
    }

    #[test]
    fn company_error_serialises() {
        let e = CompanyError::Render {
            company: "Supercell".into(),
            detail: "bad css".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("Supercell"));
    }
}
