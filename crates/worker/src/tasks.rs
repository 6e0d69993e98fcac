//! Per-record prompt construction.
//!
//! | Task                | Call shape   | Input                                    |
//! |---------------------|--------------|------------------------------------------|
//! | `translate`         | prompt       | `SOURCE_COLUMN`                          |
//! | `describe-photo`    | conversation | `IMAGE_COLUMN`                           |
//! | `summarize-listing` | conversation | photo descriptions + [`LISTING_FIELDS`]  |

use std::collections::HashMap;

use immo_core::generation::{ChatMessage, GenerationOptions, GenerationRequest};
use immo_core::types::{Record, RecordId};

/// Closing instruction of the translation prompt. Models tend to echo
/// it once done, which is what the default stop phrase catches.
pub const TRANSLATION_STOP_INSTRUCTION: &str = "Stop when you finish the translation.";

pub const PHOTO_SYSTEM_PROMPT: &str = "You are an assistant for a real estate agency. \
You describe listing photos factually: the room or exterior shown, its layout, \
materials, light and notable features. Do not invent details that are not visible.";

pub const PHOTO_USER_PROMPT: &str = "Describe the scene depicted in this real estate photo.";

pub const SUMMARY_SYSTEM_PROMPT: &str = "You are a helpful assistant that summarizes \
descriptions of the rooms of a real estate property.";

/// Structured listing column rendered into the summary prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingField {
    pub label: &'static str,
    pub column: &'static str,
    pub unit: &'static str,
}

impl ListingField {
    const fn new(label: &'static str, column: &'static str, unit: &'static str) -> Self {
        Self { label, column, unit }
    }
}

/// Listing columns quoted in the summary prompt, in prompt order.
pub const LISTING_FIELDS: &[ListingField] = &[
    ListingField::new("Property type", "typedebien", ""),
    ListingField::new("Transaction type", "typedetransaction", ""),
    ListingField::new("Municipality", "ville", ""),
    ListingField::new("Property price", "prix_bien", " EUR"),
    ListingField::new("Price per m2", "prix_m_carre", " EUR"),
    ListingField::new("Surface area", "surface", " m²"),
    ListingField::new("Number of pieces", "nb_pieces", ""),
];

/// What to ask the model for each record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Translate a free-text column into `target_language`.
    Translate {
        source_column: String,
        target_language: String,
    },
    /// Describe the photo whose URL is in `image_column`.
    DescribePhoto { image_column: String },
    /// Summarize a listing from its photo descriptions and structured
    /// columns. Descriptions are read from `descriptions_source`, one
    /// per row in `description_column`, grouped by `group_column`.
    SummarizeListing {
        descriptions_source: String,
        group_column: String,
        description_column: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Record has no value in column {0:?}")]
    MissingField(String),

    #[error("Failed to fetch image {url}: {reason}")]
    ImageFetch { url: String, reason: String },

    #[error("No photo descriptions for listing {0}")]
    NoDescriptions(RecordId),
}

/// Build the translation prompt for one text.
pub fn translation_prompt(text: &str, target_language: &str) -> String {
    format!(
        "Translate this summary to {target_language}: {text}\n\n{TRANSLATION_STOP_INSTRUCTION}"
    )
}

/// Final turn of the listing summary conversation.
///
/// Blank structured columns are rendered as `unknown`.
pub fn listing_summary_prompt(record: &Record) -> String {
    let facts = LISTING_FIELDS
        .iter()
        .map(|f| match record.field(f.column) {
            Some(value) => format!("- {}: {value}{}", f.label, f.unit),
            None => format!("- {}: unknown", f.label),
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Below is information about a property.\n\
         Structured data:\n{facts}\n\
         Description: the room and space descriptions earlier in this conversation.\n\n\
         1. Summarize each room or space description.\n\
         2. Conclude with a bullet point summary of the whole property in this format:\n\
         - **Property type**: <Property type>\n\
         - **Transaction type**: <Transaction type>\n\
         - **Municipality**: <Municipality>\n\
         - **Property price**: <Property price>\n\
         - **Price per m2**: <Price per m2>\n\
         - **Surface area**: <Surface area>\n\
         - **Number of pieces**: <Pieces>\n\
         - **Key points**: <Key features, amenities and unique points>\n\
         3. Add a more detailed summary of the overall feel of the property, its design \
         style (minimalist, modern, classical...) and its state (finished, unfinished, \
         needs renovation). Keep it neutral, brief and informative.\n\n\
         Output:"
    )
}

/// Turns records into [`GenerationRequest`]s for a fixed task and model.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    task: Task,
    model: String,
    options: GenerationOptions,
    /// Photo descriptions per listing, for [`Task::SummarizeListing`].
    descriptions: HashMap<RecordId, Vec<String>>,
    http: reqwest::Client,
}

impl RequestBuilder {
    pub fn new(task: Task, model: impl Into<String>, options: GenerationOptions) -> Self {
        Self {
            task,
            model: model.into(),
            options,
            descriptions: HashMap::new(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_descriptions(mut self, descriptions: HashMap<RecordId, Vec<String>>) -> Self {
        self.descriptions = descriptions;
        self
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Build the request for `record`, fetching its image if needed.
    pub async fn build(&self, record: &Record) -> Result<GenerationRequest, TaskError> {
        let request = match &self.task {
            Task::Translate {
                source_column,
                target_language,
            } => {
                let text = record
                    .field(source_column)
                    .ok_or_else(|| TaskError::MissingField(source_column.clone()))?;
                GenerationRequest::prompt(&self.model, translation_prompt(text, target_language))
            }
            Task::DescribePhoto { image_column } => {
                let url = record
                    .field(image_column)
                    .ok_or_else(|| TaskError::MissingField(image_column.clone()))?;
                let image = self.fetch_image(url).await?;
                GenerationRequest::chat(
                    &self.model,
                    vec![
                        ChatMessage::system(PHOTO_SYSTEM_PROMPT),
                        ChatMessage::user(PHOTO_USER_PROMPT).with_image(image),
                    ],
                )
            }
            Task::SummarizeListing { .. } => {
                let descriptions = self
                    .descriptions
                    .get(&record.id)
                    .filter(|d| !d.is_empty())
                    .ok_or_else(|| TaskError::NoDescriptions(record.id.clone()))?;

                let mut messages = Vec::with_capacity(descriptions.len() + 2);
                messages.push(ChatMessage::system(SUMMARY_SYSTEM_PROMPT));
                messages.extend(descriptions.iter().map(|d| ChatMessage::user(d.as_str())));
                messages.push(ChatMessage::user(listing_summary_prompt(record)));
                GenerationRequest::chat(&self.model, messages)
            }
        };
        Ok(request.with_options(self.options.clone()))
    }

    // ---- private helpers ----

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, TaskError> {
        let fetch_error = |reason: String| TaskError::ImageFetch {
            url: url.to_string(),
            reason,
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP {status}")));
        }
        let bytes = response.bytes().await.map_err(|e| fetch_error(e.to_string()))?;
        tracing::debug!(url, bytes = bytes.len(), "Fetched image");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use assert_matches::assert_matches;
    use immo_core::generation::{GenerationInput, Role};

    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        let fields: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Record::new("42", fields)
    }

    fn translate() -> Task {
        Task::Translate {
            source_column: "resume".into(),
            target_language: "French".into(),
        }
    }

    #[test]
    fn translation_prompt_ends_with_stop_instruction() {
        assert_eq!(
            translation_prompt("Sunny flat", "French"),
            "Translate this summary to French: Sunny flat\n\nStop when you finish the translation."
        );
    }

    #[tokio::test]
    async fn translate_builds_prompt_with_options() {
        let options = GenerationOptions {
            temperature: 0.1,
            stop: vec!["---".into()],
            max_tokens: Some(2000),
        };
        let builder = RequestBuilder::new(translate(), "qwen2.5:7b", options.clone());

        let request = builder.build(&record(&[("resume", " Sunny flat ")])).await.unwrap();

        assert_eq!(request.model, "qwen2.5:7b");
        assert_eq!(request.options, options);
        assert_matches!(
            &request.input,
            GenerationInput::Prompt(p) if p.starts_with("Translate this summary to French: Sunny flat\n")
        );
    }

    #[tokio::test]
    async fn blank_source_is_missing_field() {
        let builder = RequestBuilder::new(translate(), "m", GenerationOptions::default());
        let err = builder.build(&record(&[("resume", "   ")])).await.unwrap_err();
        assert_matches!(err, TaskError::MissingField(col) if col == "resume");
    }

    fn summarize() -> Task {
        Task::SummarizeListing {
            descriptions_source: "descriptions.csv".into(),
            group_column: "idannonce".into(),
            description_column: "content".into(),
        }
    }

    #[test]
    fn summary_prompt_lists_structured_fields() {
        let prompt = listing_summary_prompt(&record(&[
            ("typedebien", "Appartement"),
            ("ville", "Lyon"),
            ("prix_bien", "250000"),
            ("surface", "54"),
        ]));

        assert!(prompt.contains("- Property type: Appartement\n- Transaction type: unknown\n"));
        assert!(prompt.contains("- Property price: 250000 EUR\n"));
        assert!(prompt.contains("- Surface area: 54 m²\n"));
        assert!(prompt.ends_with("Output:"));
    }

    #[tokio::test]
    async fn summary_turns_follow_photo_order() {
        let descriptions: HashMap<RecordId, Vec<String>> = [(
            "42".to_string(),
            vec!["Bright kitchen".to_string(), "Small bedroom".to_string()],
        )]
        .into_iter()
        .collect();
        let builder = RequestBuilder::new(summarize(), "qwen2.5:7b", GenerationOptions::default())
            .with_descriptions(descriptions);

        let request = builder.build(&record(&[("ville", "Lyon")])).await.unwrap();

        let GenerationInput::Chat(messages) = &request.input else {
            panic!("expected a conversation, got {:?}", request.input);
        };
        let turns: Vec<(Role, &str)> = messages.iter().map(|m| (m.role, m.content.as_str())).collect();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0], (Role::System, SUMMARY_SYSTEM_PROMPT));
        assert_eq!(turns[1], (Role::User, "Bright kitchen"));
        assert_eq!(turns[2], (Role::User, "Small bedroom"));
        assert_eq!(turns[3].0, Role::User);
        assert!(turns[3].1.contains("- Municipality: Lyon"));
    }

    #[tokio::test]
    async fn listing_without_descriptions_is_skipped() {
        let builder = RequestBuilder::new(summarize(), "m", GenerationOptions::default());
        let err = builder.build(&record(&[("ville", "Lyon")])).await.unwrap_err();
        assert_matches!(err, TaskError::NoDescriptions(id) if id == "42");
    }

    #[tokio::test]
    async fn unreachable_image_is_fetch_error() {
        let builder = RequestBuilder::new(
            Task::DescribePhoto {
                image_column: "url_img".into(),
            },
            "llava",
            GenerationOptions::default(),
        );
        let err = builder
            .build(&record(&[("url_img", "http://127.0.0.1:9/photo.jpg")]))
            .await
            .unwrap_err();
        assert_matches!(err, TaskError::ImageFetch { url, .. } if url.ends_with("photo.jpg"));
    }
}
