//! Voice-driven medical questionnaire.
//!
//! A fixed list of questions is answered one at a time: each recorded
//! utterance is transcribed, the model extracts the answer for the current
//! question, and the wizard advances.

use crate::error::{ApiError, InvokeError};
use crate::generation::{GenerationRequest, GenerativeBackend};
use crate::retry::{RetryCounter, RetryPolicy};
use crate::speech::{AudioClip, Transcriber};
use serde::Serialize;
use std::fmt;
use std::fmt::Write as _;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerKind {
    Text,
    Number,
}

impl fmt::Display for AnswerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerKind::Text => write!(f, "text"),
            AnswerKind::Number => write!(f, "number"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Question {
    pub label: &'static str,
    pub kind: AnswerKind,
}

pub static QUESTIONS: [Question; 9] = [
    Question {
        label: "Name",
        kind: AnswerKind::Text,
    },
    Question {
        label: "Age",
        kind: AnswerKind::Number,
    },
    Question {
        label: "Address",
        kind: AnswerKind::Text,
    },
    Question {
        label: "Contact number",
        kind: AnswerKind::Number,
    },
    Question {
        label: "Occupation",
        kind: AnswerKind::Text,
    },
    Question {
        label: "Socioeconomic status",
        kind: AnswerKind::Text,
    },
    Question {
        label: "Nearest health center",
        kind: AnswerKind::Text,
    },
    Question {
        label: "Time taken to reach health center",
        kind: AnswerKind::Number,
    },
    Question {
        label: "Means of transport to health center",
        kind: AnswerKind::Text,
    },
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Questionnaire {
    step: usize,
    answers: Vec<Option<String>>,
}

impl Default for Questionnaire {
    fn default() -> Self {
        Self::new()
    }
}

impl Questionnaire {
    pub fn new() -> Self {
        Self {
            step: 0,
            answers: vec![None; QUESTIONS.len()],
        }
    }

    pub fn current_step(&self) -> usize {
        self.step
    }

    pub fn current_question(&self) -> &'static Question {
        &QUESTIONS[self.step]
    }

    pub fn answer(&self, index: usize) -> Option<&str> {
        self.answers.get(index).and_then(|a| a.as_deref())
    }

    /// Fraction shown on the progress bar; never zero.
    pub fn progress(&self) -> f64 {
        (self.step + 1) as f64 / QUESTIONS.len() as f64
    }

    pub fn is_complete(&self) -> bool {
        self.answers.iter().all(Option::is_some)
    }

    /// Store `answer` for the current question and move to the next one.
    /// The last question stays current once answered.
    pub fn record_answer(&mut self, answer: impl Into<String>) {
        self.answers[self.step] = Some(answer.into());
        if self.step < QUESTIONS.len() - 1 {
            self.step += 1;
        }
    }

    /// Manual edit of the current answer without advancing.
    pub fn edit_current(&mut self, answer: impl Into<String>) {
        self.answers[self.step] = Some(answer.into());
    }

    pub fn extraction_prompt(&self, transcript: &str) -> String {
        let question = self.current_question();
        format!(
            "You are filling out a medical form. Extract the relevant answer for the question '{}' \
             which requires a {} response, from this text: {}",
            question.label, question.kind, transcript
        )
    }

    /// Plain-text rendering of the filled form.
    pub fn report(&self) -> String {
        let mut out = String::from("Medical Questionnaire Report\n\n");
        for (question, answer) in QUESTIONS.iter().zip(&self.answers) {
            let _ = writeln!(out, "{}: {}", question.label, answer.as_deref().unwrap_or(""));
        }
        out
    }

    /// Transcribe `clip`, extract the answer for the current question, and
    /// advance. Returns the stored answer.
    pub async fn fill_from_audio<T, B>(
        &mut self,
        transcriber: &T,
        backend: &B,
        policy: &RetryPolicy,
        counter: &mut RetryCounter,
        clip: &AudioClip,
    ) -> Result<String, InvokeError<ApiError>>
    where
        T: Transcriber,
        B: GenerativeBackend,
    {
        let transcript = policy
            .invoke(counter, move || transcriber.transcribe(clip))
            .await?;
        debug!("Transcript for step {}: {:?}", self.step, transcript);
        self.fill_from_transcript(backend, policy, counter, &transcript)
            .await
    }

    pub async fn fill_from_transcript<B: GenerativeBackend>(
        &mut self,
        backend: &B,
        policy: &RetryPolicy,
        counter: &mut RetryCounter,
        transcript: &str,
    ) -> Result<String, InvokeError<ApiError>> {
        let request = GenerationRequest::text(self.extraction_prompt(transcript));
        let request = &request;
        let answer = policy
            .invoke(counter, move || backend.generate(request))
            .await?;

        info!("{} -> {}", self.current_question().label, answer);
        self.record_answer(answer.clone());
        Ok(answer)
    }
}
