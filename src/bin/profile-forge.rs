//! CLI binary for profile-forge.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ProfileConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use profile_forge::{
    list_templates, parse_company_list, run_batch, BatchProgressCallback, CompanyResult,
    PageSize, Phase, ProfileConfig, ProgressCallback, RenderEngine, StopHandle,
    UnresolvedPolicy,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar for the batch, one log line per
/// company, and the current phase in the bar's message.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading template…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} companies  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Generating");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, company: &str) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(company))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_companies: usize, field_count: usize) {
        self.activate_bar(total_companies);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Generating {total_companies} profiles ({field_count} fields each)…"
            ))
        ));
    }

    fn on_company_start(&self, _index: usize, _total: usize, company: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(company.to_string(), Instant::now());
        }
        self.bar.set_message(company.to_string());
    }

    fn on_phase(&self, company: &str, phase: Phase) {
        self.bar.set_message(format!("{company} {}", dim(&phase.to_string())));
    }

    fn on_company_complete(&self, index: usize, total: usize, result: &CompanyResult) {
        let secs = self.elapsed_secs(&result.company);
        let logo = if result.logo.has_logo() {
            dim("logo")
        } else {
            yellow("no logo")
        };
        let missing = if result.missing_fields.is_empty() {
            String::new()
        } else {
            yellow(&format!("  {} fields missing", result.missing_fields.len()))
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<32}  {}{}  {}",
            green("✓"),
            index,
            total,
            result.company,
            logo,
            missing,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_company_error(&self, index: usize, total: usize, company: &str, error: &str) {
        let secs = self.elapsed_secs(company);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<32}  {}  {}",
            red("✗"),
            index,
            total,
            company,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, succeeded: usize) {
        let failed = self.errors.load(Ordering::SeqCst);
        self.bar.finish_and_clear();

        if failed == 0 && succeeded == total {
            eprintln!(
                "{} {} profiles generated successfully",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} profiles generated  ({} failed)",
                if succeeded == 0 { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One profile with the default template
  profile-forge "Rovio Entertainment"

  # A list of companies, one per line
  profile-forge --companies-file companies.txt -o profiles/

  # Pick a template from the templates directory
  profile-forge --list-templates
  profile-forge --template board_brief.html Nokia Kone

  # No image search, no cooldown, JSON summary on stdout
  profile-forge --no-logos --cooldown 0 --json Nokia > batch.json

OUTPUT (per company, in --output):
  {name}_data.json      generated field values
  {name}_logo.png       logo, when one was found
  {name}_profile.html   merged template
  {name}_profile.pdf    rendered A4 profile

TEMPLATE VARIABLES:
  ${field_name}   any identifier; requested from the LLM
  ${timestamp}    generation time, YYYY-MM-DD HH:MM
  ${case_number}  OP-D-V-HHMM
  ${logo_filename} logo file name (empty when no logo)

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (default provider)
  OPENAI_API_KEY          OpenAI key, read when the provider is openai
  ANTHROPIC_API_KEY       Anthropic key, read when the provider is anthropic
  EDGEQUAKE_LLM_PROVIDER  Provider when --provider is not given (needs EDGEQUAKE_MODEL)
  EDGEQUAKE_MODEL         Model ID
  RUST_LOG                Log filter, e.g. profile_forge=debug

PDF ENGINE:
  One of weasyprint, wkhtmltopdf or chromium must be installed. The first
  found on PATH is used unless --engine or --engine-path says otherwise.
"#;

/// Generate corporate profile PDFs from an HTML template using an LLM.
#[derive(Parser, Debug)]
#[command(
    name = "profile-forge",
    version,
    about = "Generate corporate profile PDFs from an HTML template using an LLM",
    long_about = "Fill the ${placeholders} of an HTML template with LLM-generated facts about \
each company, add a logo found by image search, and render the result to an A4 PDF. \
Companies are processed one at a time; a failure for one company does not stop the rest.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Company names to profile.
    companies: Vec<String>,

    /// Read company names from this file, one per line ("-" for stdin).
    #[arg(short = 'f', long, env = "PROFILE_FORGE_COMPANIES_FILE")]
    companies_file: Option<PathBuf>,

    /// Template file name (inside --template-dir) or path.
    #[arg(
        short,
        long,
        env = "PROFILE_FORGE_TEMPLATE",
        default_value = "profile_template.html"
    )]
    template: PathBuf,

    /// Directory holding the available templates.
    #[arg(long, env = "PROFILE_FORGE_TEMPLATE_DIR", default_value = "templates")]
    template_dir: PathBuf,

    /// List templates in --template-dir and exit.
    #[arg(long)]
    list_templates: bool,

    /// Directory for the generated artifacts.
    #[arg(short, long, env = "PROFILE_FORGE_OUTPUT", default_value = "output")]
    output: PathBuf,

    /// LLM provider: gemini, openai, anthropic, ollama.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID (default: gemini-2.5-flash).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// API key for the chosen provider. Without it each provider reads its
    /// own variable (GEMINI_API_KEY, OPENAI_API_KEY, ANTHROPIC_API_KEY).
    #[arg(long)]
    api_key: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PROFILE_FORGE_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PROFILE_FORGE_TEMPERATURE", default_value_t = 0.8)]
    temperature: f32,

    /// Max LLM output tokens per company.
    #[arg(long, env = "PROFILE_FORGE_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Retries per company on transient LLM failure.
    #[arg(long, env = "PROFILE_FORGE_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "PROFILE_FORGE_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Skip the logo search.
    #[arg(long, env = "PROFILE_FORGE_NO_LOGOS")]
    no_logos: bool,

    /// Leave unresolved ${name} markers in the output instead of blanking them.
    #[arg(long)]
    keep_unresolved: bool,

    /// PDF page size.
    #[arg(long, value_enum, default_value = "a4")]
    page_size: PageSizeArg,

    /// HTML-to-PDF engine (default: first installed of weasyprint,
    /// wkhtmltopdf, chromium).
    #[arg(long, value_enum, env = "PROFILE_FORGE_ENGINE")]
    engine: Option<EngineArg>,

    /// Path to the engine executable, skipping detection.
    #[arg(long, env = "PROFILE_FORGE_ENGINE_PATH")]
    engine_path: Option<PathBuf>,

    /// Per-company PDF render timeout in seconds.
    #[arg(long, env = "PROFILE_FORGE_RENDER_TIMEOUT", default_value_t = 120)]
    render_timeout: u64,

    /// Seconds to wait between companies.
    #[arg(long, env = "PROFILE_FORGE_COOLDOWN", default_value_t = 10)]
    cooldown: u64,

    /// Exit non-zero if any company fails (default: only if all fail).
    #[arg(long)]
    strict: bool,

    /// Print the batch summary (BatchOutput) as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PROFILE_FORGE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PROFILE_FORGE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PROFILE_FORGE_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PageSizeArg {
    A4,
    Letter,
}

impl From<PageSizeArg> for PageSize {
    fn from(v: PageSizeArg) -> Self {
        match v {
            PageSizeArg::A4 => PageSize::A4,
            PageSizeArg::Letter => PageSize::Letter,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum EngineArg {
    Weasyprint,
    Wkhtmltopdf,
    Chromium,
}

impl From<EngineArg> for RenderEngine {
    fn from(v: EngineArg) -> Self {
        match v {
            EngineArg::Weasyprint => RenderEngine::WeasyPrint,
            EngineArg::Wkhtmltopdf => RenderEngine::Wkhtmltopdf,
            EngineArg::Chromium => RenderEngine::Chromium,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── List-templates mode ──────────────────────────────────────────────
    if cli.list_templates {
        let templates = list_templates(&cli.template_dir).context("Failed to list templates")?;
        if templates.is_empty() {
            eprintln!("No templates found in {}", cli.template_dir.display());
        }
        for path in templates {
            if let Some(name) = path.file_name() {
                println!("{}", name.to_string_lossy());
            }
        }
        return Ok(());
    }

    // ── Companies ────────────────────────────────────────────────────────
    let mut companies = cli.companies.clone();
    if let Some(ref path) = cli.companies_file {
        companies.extend(read_companies(path).await?);
    }
    if companies.iter().all(|c| c.trim().is_empty()) {
        anyhow::bail!("No companies given. Pass names as arguments or use --companies-file.");
    }

    // ── Stop on Ctrl-C ───────────────────────────────────────────────────
    let stop = StopHandle::new();
    {
        let stop = stop.clone();
        let quiet = cli.quiet;
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                if !quiet {
                    eprintln!(
                        "{} finishing the current company, then stopping…",
                        yellow("⏸")
                    );
                }
                stop.stop();
            }
        });
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb, stop).await?;

    // ── Run ──────────────────────────────────────────────────────────────
    let output = run_batch(&config, &companies)
        .await
        .context("Profile generation failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if !cli.quiet {
        if !show_progress {
            for r in &output.companies {
                match r.error {
                    None => eprintln!("{} {}", green("✓"), r.company),
                    Some(ref e) => eprintln!("{} {}: {}", red("✗"), r.company, e),
                }
            }
        }
        if output.stopped {
            eprintln!(
                "{} stopped early: {} companies skipped",
                yellow("⏸"),
                output.stats.skipped
            );
        }
        eprintln!(
            "   {} logos  —  {}ms total  →  {}",
            dim(&output.stats.logos_found.to_string()),
            output.stats.total_duration_ms,
            bold(&output.output_dir.display().to_string()),
        );
    }

    let stats = output.stats.clone();
    if stats.succeeded == 0 && stats.failed > 0 {
        anyhow::bail!("All {} companies failed", stats.failed);
    }
    if cli.strict {
        output.into_result()?;
    }

    Ok(())
}

/// Read a company list from a file or stdin.
async fn read_companies(path: &Path) -> Result<Vec<String>> {
    let text = if path.to_str() == Some("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read companies from stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read companies from {:?}", path))?
    };
    Ok(parse_company_list(&text))
}

/// Map CLI args to `ProfileConfig`.
async fn build_config(
    cli: &Cli,
    progress: Option<ProgressCallback>,
    stop: StopHandle,
) -> Result<ProfileConfig> {
    let mut builder = ProfileConfig::builder()
        .template(cli.template.clone())
        .template_dir(cli.template_dir.clone())
        .output_dir(cli.output.clone())
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .fetch_logos(!cli.no_logos)
        .unresolved(if cli.keep_unresolved {
            UnresolvedPolicy::Passthrough
        } else {
            UnresolvedPolicy::Empty
        })
        .page_size(cli.page_size.into())
        .render_timeout_secs(cli.render_timeout)
        .cooldown_secs(cli.cooldown)
        .stop_handle(stop);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(key) = cli.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
        builder = builder.api_key(key.clone());
    }
    if let Some(ref name) = cli.provider {
        builder = builder.provider_name(name.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(engine) = cli.engine {
        builder = builder.render_engine(engine.into());
    }
    if let Some(ref path) = cli.engine_path {
        builder = builder.render_binary(path.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
