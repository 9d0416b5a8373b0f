//! Vaccination-card assistant: card extraction, precaution lookup and chat.
//!
//! Every backend call goes through the session's [`RetryPolicy`], and every
//! rate-limited attempt is counted in the session's [`RetryCounter`].

use crate::error::{ApiError, InvokeError};
use crate::generation::{strip_json_fence, GenerationRequest, GenerativeBackend};
use crate::retry::{RetryCounter, RetryNotice, RetryPolicy};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const SUPPORTED_CARD_TYPES: [&str; 2] = ["image/jpeg", "image/png"];

const CARD_PROMPT: &str = r#"You are a medical document specialist analyzing a vaccination card. Extract ALL details including:
1. PATIENT INFORMATION:
   - Full name (exact spelling)
   - Date of birth (YYYY-MM-DD format)
   - Patient ID/Health number if present

2. VACCINATION HISTORY:
   - For EACH vaccine entry:
     * Vaccine name (official name)
     * Date administered (YYYY-MM-DD)

3. UPCOMING VACCINES:
   - Any mentioned future vaccines
   - Recommended due dates

Return STRICT JSON format (don't include any other text) with this structure:
{
    "patient_info": {"name": "", "dob": "", "patient_id": ""},
    "vaccines_received": [{"name": "", "date": ""}],
    "due_vaccines": [{"name": "", "due_date": ""}]
}"#;

const ASSISTANT_INSTRUCTIONS: &str = "You are a Vaccination Expert Assistant with the following capabilities:

1. For GENERAL vaccination questions (without personal data):
- Provide accurate, up-to-date information about vaccines
- Explain vaccine schedules, side effects, precautions
- Offer travel vaccination advice
- Compare different vaccine brands
- Explain vaccine efficacy and duration

2. For PERSONALIZED questions (when vaccination card is uploaded):
- Answer based on the user's specific vaccination history
- Identify missing vaccines based on age/health conditions
- Calculate due dates for next doses
- Provide personalized precautions

3. Response Guidelines:
- Be concise but thorough (3-5 sentences for most answers)
- Use bullet points for lists of side effects/precautions
- Always cite reputable sources when possible
- If unsure, recommend consulting a healthcare provider
- For age/condition specific advice, ask for clarification if needed";

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientInfo {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub dob: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub patient_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceivedVaccine {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub date: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DueVaccine {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub due_date: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub precautions: Vec<String>,
}

impl DueVaccine {
    /// Due date parsed as `YYYY-MM-DD`, if the card gave one in that form.
    pub fn due_on(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(self.due_date.trim(), "%Y-%m-%d").ok()
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.due_on().is_some_and(|due| due < today)
    }
}

/// Structured contents of a vaccination card
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VaccinationRecord {
    #[serde(default)]
    pub patient_info: PatientInfo,
    #[serde(default)]
    pub vaccines_received: Vec<ReceivedVaccine>,
    #[serde(default)]
    pub due_vaccines: Vec<DueVaccine>,
}

impl VaccinationRecord {
    pub fn parse(model_output: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(strip_json_fence(model_output))
    }
}

#[derive(Debug, Error)]
pub enum CardError {
    #[error("Only JPEG/PNG images are supported (got {0})")]
    UnsupportedType(String),
    #[error("Error processing card: {0}")]
    Extraction(#[from] InvokeError<ApiError>),
    #[error("Failed to extract vaccination data: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardStatus {
    Processed,
    /// Same file as the last successfully processed card
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// State that lives for one user session.
#[derive(Debug, Default)]
pub struct Session {
    pub retries: RetryCounter,
    pub messages: Vec<ChatMessage>,
    pub record: Option<VaccinationRecord>,
    pub last_card: Option<String>,
}

impl Session {
    pub fn card_processed(&self) -> bool {
        self.record.is_some()
    }
}

/// Static precautions used when the model cannot be reached.
pub fn fallback_precautions(vaccine: &str) -> Vec<String> {
    let list: &[&str] = match vaccine {
        "COVID-19" => &[
            "Monitor for allergic reactions for 15-30 minutes after vaccination",
            "Inform your doctor about any history of blood clotting disorders",
            "Stay hydrated and rest after vaccination",
        ],
        "Flu" => &[
            "Inform your doctor if you have egg allergies",
            "Avoid vaccination if you currently have a fever",
            "Mild flu-like symptoms are common for 1-2 days after vaccination",
        ],
        _ => &[
            "Consult your doctor before vaccination",
            "Inform about any allergies or medical conditions",
            "Stay at the clinic for observation for 15-30 minutes after vaccination",
        ],
    };
    list.iter().map(|s| s.to_string()).collect()
}

type NoticeHandler = Box<dyn FnMut(&RetryNotice) + Send>;

pub struct Assistant<B> {
    backend: B,
    policy: RetryPolicy,
    session: Session,
    on_notice: NoticeHandler,
}

impl<B: GenerativeBackend> Assistant<B> {
    pub fn new(backend: B, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            session: Session::default(),
            on_notice: Box::new(|_| {}),
        }
    }

    /// Install a handler for user-visible retry notices.
    pub fn with_notice_handler(
        mut self,
        handler: impl FnMut(&RetryNotice) + Send + 'static,
    ) -> Self {
        self.on_notice = Box::new(handler);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    async fn generate(
        &mut self,
        request: &GenerationRequest,
    ) -> Result<String, InvokeError<ApiError>> {
        let backend = &self.backend;
        let on_notice = &mut self.on_notice;
        self.policy
            .invoke_with_notices(
                &mut self.session.retries,
                |notice| on_notice(notice),
                move || backend.generate(request),
            )
            .await
    }

    /// Extract a record from a card image and attach precautions to every
    /// due vaccine. Re-uploading the last processed file is a no-op.
    pub async fn process_card(
        &mut self,
        file_name: &str,
        mime_type: &str,
        image: Vec<u8>,
    ) -> Result<CardStatus, CardError> {
        if self.session.card_processed() && self.session.last_card.as_deref() == Some(file_name)
        {
            return Ok(CardStatus::Unchanged);
        }

        self.session.record = None;

        if !SUPPORTED_CARD_TYPES.contains(&mime_type) {
            return Err(CardError::UnsupportedType(mime_type.to_string()));
        }

        let request = GenerationRequest::text(CARD_PROMPT).with_image(mime_type, image);
        let output = self.generate(&request).await?;
        let mut record = VaccinationRecord::parse(&output)?;

        for vaccine in record.due_vaccines.iter_mut() {
            vaccine.precautions = self.precautions(&vaccine.name).await;
        }

        info!(
            "Processed card {}: {} received, {} due",
            file_name,
            record.vaccines_received.len(),
            record.due_vaccines.len()
        );
        self.session.record = Some(record);
        self.session.last_card = Some(file_name.to_string());
        Ok(CardStatus::Processed)
    }

    /// Two or three precautions for `vaccine`; falls back to a static list
    /// when generation or parsing fails.
    pub async fn precautions(&mut self, vaccine: &str) -> Vec<String> {
        #[derive(Deserialize)]
        struct Precautions {
            precautions: Vec<String>,
        }

        let prompt = format!(
            "Provide exactly 2-3 important precautions for someone about to receive a {} vaccine.\n\
             Return as a JSON object only:\n{{\"precautions\": []}}",
            vaccine
        );

        let parsed = match self.generate(&GenerationRequest::text(prompt)).await {
            Ok(output) => serde_json::from_str::<Precautions>(strip_json_fence(&output))
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match parsed {
            Ok(p) if !p.precautions.is_empty() => p.precautions,
            Ok(_) => fallback_precautions(vaccine),
            Err(e) => {
                warn!("Using fallback precautions for {}: {}", vaccine, e);
                fallback_precautions(vaccine)
            }
        }
    }

    /// Prompt for `question`, personalised when a card has been processed.
    pub fn compose_prompt(&self, question: &str, today: NaiveDate) -> String {
        let mut prompt = format!(
            "{}\n\nCurrent Date: {}",
            ASSISTANT_INSTRUCTIONS,
            today.format("%Y-%m-%d")
        );
        if let Some(record) = &self.session.record {
            let data = serde_json::to_string_pretty(record).unwrap_or_default();
            prompt.push_str(&format!("\n\nUser's Vaccination Data:\n{}", data));
        }
        prompt.push_str(&format!("\n\nQuestion: {}", question));
        prompt
    }

    /// Answer one chat turn. Failures become an apology reply rather than an
    /// error, so the conversation can continue.
    pub async fn ask(&mut self, question: &str) -> String {
        self.session.messages.push(ChatMessage {
            role: Role::User,
            content: question.to_string(),
        });

        let prompt = self.compose_prompt(question, Local::now().date_naive());
        let reply = match self.generate(&GenerationRequest::text(prompt)).await {
            Ok(answer) => answer,
            Err(e) => format!(
                "Sorry, I'm having trouble answering right now. Please try again later. (Error: {})",
                e
            ),
        };

        self.session.messages.push(ChatMessage {
            role: Role::Assistant,
            content: reply.clone(),
        });
        reply
    }

    pub fn retry_note(&self) -> Option<String> {
        let total = self.session.retries.total();
        (total > 0).then(|| {
            format!(
                "Note: Some requests required retries due to API limits. Total retries: {}",
                total
            )
        })
    }
}
