//! LLM summarization of a normalized product page into a [`MedicineRecord`].

pub mod backend;
pub mod parse;
pub mod retry;

use std::sync::Arc;

use tracing::{debug, error, info};

pub use backend::{GenerationConfig, GenerativeBackend, ImageInput};
pub use retry::RetryPolicy;

use crate::error::SummarizeError;
use crate::models::MedicineRecord;

/// Page text beyond this many characters is not sent to the model.
pub const MAX_CONTENT_CHARS: usize = 20_000;

/// Prefix `s` of at most `max` characters.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub fn build_prompt(markdown: &str, medicine_name: &str) -> String {
    format!(
        r#"You are a pharmaceutical data extraction specialist. I have markdown content about the medicine "{medicine_name}" from a pharmaceutical website.

Here is the markdown content to analyze:
```
{content}
```

Extract and provide the following information in JSON format:

1. Correct Medicine Name: The official or standard name of the medicine (if different from "{medicine_name}")
2. Description: A concise description of what this medicine is and what it treats
3. Key Benefits: Main benefits and uses of the medicine (list format)
4. Directions for Use: How to use this medicine properly
5. Safety Information: Important safety warnings, side effects, and contraindications
6. Relevant Information: Any other critical information about the medicine (dosage, storage, etc.)

Respond ONLY with a JSON object that has these keys: "medicine_name", "description", "key_benefits", "directions", "safety_info", and "relevant_info".
For any section where information is not available, use an empty string or empty list as appropriate."#,
        content = truncate_chars(markdown, MAX_CONTENT_CHARS),
    )
}

pub struct Summarizer {
    backend: Arc<dyn GenerativeBackend>,
    policy: RetryPolicy,
    config: GenerationConfig,
}

impl Summarizer {
    pub fn new(backend: Arc<dyn GenerativeBackend>) -> Self {
        Self {
            backend,
            policy: RetryPolicy::default(),
            config: GenerationConfig::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Summarize `markdown` about `medicine_name`.
    ///
    /// Never fails: once retries are exhausted the record's description
    /// carries the error and every other field is empty.
    pub async fn summarize(&self, markdown: &str, medicine_name: &str) -> MedicineRecord {
        let prompt = build_prompt(markdown, medicine_name);

        let result = self
            .policy
            .run(|attempt| {
                let prompt = &prompt;
                async move {
                    debug!(attempt, medicine = medicine_name, "Requesting summary");
                    let reply = self.backend.generate(prompt, &self.config).await?;
                    let fields = parse::parse_or_repair(&reply)?;
                    Ok::<_, SummarizeError>(parse::into_record(fields, medicine_name))
                }
            })
            .await;

        match result {
            Ok(record) => {
                info!("Extracted information for {}", record.medicine_name);
                record
            }
            Err(e) => {
                error!("Error extracting information for {}: {}", medicine_name, e);
                MedicineRecord::placeholder(
                    medicine_name,
                    format!("Error extracting information: {e}"),
                )
            }
        }
    }
}
