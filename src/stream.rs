//! Streaming batch API: emit each company's result as soon as it is done.
//!
//! [`crate::batch::run_batch`] returns only after the last company. A long
//! list with a cooldown between companies can take many minutes, so
//! [`run_batch_stream`] yields every [`CompanyResult`] as it completes. The
//! order always matches the input order because companies run one at a time.
//!
//! Dropping the stream abandons the remaining companies. The stop handle in
//! the config ends the stream early the same way it ends a batch.

use crate::batch::{prepare, BatchRunner, Collaborators};
use crate::config::ProfileConfig;
use crate::error::ProfileError;
use crate::output::CompanyResult;
use futures::stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of per-company results.
pub type CompanyStream = Pin<Box<dyn Stream<Item = CompanyResult> + Send>>;

/// Run the batch, streaming results in input order.
///
/// # Returns
/// - `Ok(CompanyStream)`: one item per company that was started
/// - `Err(ProfileError)`: fatal setup error (no companies, template missing,
///   provider not configured)
///
/// # Example
/// ```rust,no_run
/// use profile_forge::{run_batch_stream, ProfileConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ProfileConfig::builder().cooldown_secs(0).build()?;
/// let companies = vec!["Nokia".to_string(), "Kone".to_string()];
/// let mut results = run_batch_stream(&config, &companies).await?;
/// while let Some(r) = results.next().await {
///     match r.error {
///         None => println!("{}: {:?}", r.company, r.artifacts.pdf),
///         Some(e) => eprintln!("{}: {e}", r.company),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub async fn run_batch_stream(
    config: &ProfileConfig,
    companies: &[String],
) -> Result<CompanyStream, ProfileError> {
    let prepared = prepare(config, companies).await?;
    let collaborators =
        Collaborators::from_config(config, !prepared.requested_fields.is_empty())?;
    stream_prepared(config, prepared, collaborators)
}

fn stream_prepared(
    config: &ProfileConfig,
    prepared: crate::batch::Prepared,
    collaborators: Collaborators,
) -> Result<CompanyStream, ProfileError> {
    let runner = Arc::new(BatchRunner::new(config.clone(), prepared, collaborators)?);
    let total = runner.companies.len();
    let stop = config.stop.clone();
    info!("Starting streaming batch of {} companies", total);
    runner.notify_start();

    // State: (next index, companies succeeded so far).
    let s = stream::unfold((0usize, 0usize), move |(index, succeeded)| {
        let runner = Arc::clone(&runner);
        let stop = stop.clone();
        async move {
            if index >= total || stop.is_stopped() {
                runner.notify_complete(succeeded);
                return None;
            }
            if index > 0 {
                runner.cooldown().await;
                if stop.is_stopped() {
                    info!("Stop requested; skipping {} remaining companies", total - index);
                    runner.notify_complete(succeeded);
                    return None;
                }
            }
            let result = runner.run_company(index).await;
            let succeeded = succeeded + usize::from(result.is_success());
            Some((result, (index + 1, succeeded)))
        }
    });

    Ok(Box::pin(s))
}

/// Streaming counterpart of [`crate::batch::run_batch_with`].
pub async fn run_batch_stream_with_collaborators(
    config: &ProfileConfig,
    companies: &[String],
    collaborators: Collaborators,
) -> Result<CompanyStream, ProfileError> {
    let prepared = prepare(config, companies).await?;
    stream_prepared(config, prepared, collaborators)
}
