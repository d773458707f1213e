//! Pipeline stages for profile generation.
//!
//! Each submodule implements exactly one step, so each is independently
//! testable and the network-bound ones sit behind a trait the orchestrator
//! can swap out.
//!
//! ## Data Flow
//!
//! ```text
//! scan ──▶ fields ──▶ logo ──▶ merge ──▶ render
//! (once)   (LLM)      (search)  (text)   (PDF)
//! ```
//!
//! 1. [`scan`]   — load the template and collect its `${name}` placeholders
//! 2. [`fields`] — ask the generative service for a value per field, with
//!    retry/backoff; tolerant JSON parsing of the reply
//! 3. [`logo`]   — best-effort image search and download, normalised to PNG
//! 4. [`merge`]  — escape and substitute values; never fails
//! 5. [`render`] — HTML → PDF through an installed engine (WeasyPrint,
//!    wkhtmltopdf or headless Chromium)

pub mod fields;
pub mod logo;
pub mod merge;
pub mod render;
pub mod scan;
