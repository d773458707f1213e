//! Prompts for the generative field-filling step.
//!
//! Callers can override the system prompt via
//! [`crate::config::ProfileConfig::system_prompt`]; the user prompt is always
//! built by [`field_request_prompt`] because it must list the template's
//! fields.

/// Default system prompt for field generation.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a corporate research assistant that writes structured company profiles.

Rules:
1. Reply with a single JSON object and nothing else.
2. Use exactly the keys you are asked for, spelled exactly as given.
3. Every value is a string, or a list of strings for plural fields.
4. Do NOT wrap the JSON in ``` fences and do NOT add commentary."#;

/// Build the user prompt asking for one value per field for `company`.
pub fn field_request_prompt(company: &str, fields: &[String]) -> String {
    let field_list = fields
        .iter()
        .map(|f| format!("- {f}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Generate a comprehensive, realistic corporate profile for a company named '{company}'.\n\
The output must be a single JSON object.\n\
\n\
Include exactly these JSON keys:\n\
{field_list}\n\
\n\
Guidelines:\n\
- Information must be realistic enough for training scenarios.\n\
- For address fields, provide full plausible addresses.\n\
- For lists (like key_technologies or aliases), provide 3-5 items.\n\
- If you cannot find real data, invent realistic details consistent with the company's industry.\n\
- Return ONLY the JSON object."
    )
}
