//! # vaxassist
//!
//! Client-side building blocks for a vaccination assistant, a voice-driven
//! medical questionnaire and a hospital locator, all sitting on top of
//! rate-limited third-party APIs.
//!
//! The centrepiece is [`RetryPolicy`]: it invokes a backend call, retries
//! rate-limited failures with exponential backoff and jitter, surfaces any
//! other failure immediately, and counts every retry in a caller-owned
//! [`RetryCounter`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use vaxassist::{Assistant, Config, GeminiClient};
//!
//! # async fn example() -> anyhow::Result<()> {
//! // Load configuration from config.toml
//! let config = Config::new()?;
//!
//! let backend = GeminiClient::new(config.gemini.clone());
//! let mut assistant = Assistant::new(backend, config.retry_policy()?)
//!     .with_notice_handler(|notice| eprintln!("{}", notice));
//!
//! let reply = assistant.ask("Which vaccines do I need for travel to Kenya?").await;
//! println!("{}", reply);
//!
//! if let Some(note) = assistant.retry_note() {
//!     println!("{}", note);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Retrying any operation
//!
//! ```no_run
//! use std::time::Duration;
//! use vaxassist::{InvokeError, RetryConfig, RetryCounter, RetryPolicy};
//! use vaxassist::error::ApiError;
//!
//! # async fn example() -> Result<(), InvokeError<ApiError>> {
//! let policy = RetryPolicy::new(RetryConfig {
//!     max_attempts: 5,
//!     initial_delay: Duration::from_millis(500),
//!     ..Default::default()
//! })
//! .expect("valid policy");
//!
//! let mut counter = RetryCounter::new();
//! let value = policy
//!     .invoke(&mut counter, || async { Ok::<_, ApiError>(42) })
//!     .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```toml
//! [gemini]
//! api_key = "your_api_key"
//! model = "gemini-1.5-pro-latest"
//! temperature = 0.3
//!
//! [retry]
//! max_attempts = 3
//! initial_delay_secs = 1.0
//! multiplier = 2.0
//! jitter_secs = 1.0
//!
//! [maps]
//! api_key = "your_maps_key"
//! radius_meters = 25000
//! ```

pub mod config;
pub mod error;
pub mod gemini;
pub mod generation;
pub mod hospital;
pub mod maps;
pub mod questionnaire;
pub mod retry;
pub mod speech;
pub mod vaccination;

// Re-export commonly used types at the crate root
pub use config::Config;
pub use error::{ApiError, InvokeError, RateLimited};
pub use gemini::GeminiClient;
pub use maps::MapsClient;
pub use generation::{GenerationRequest, GenerativeBackend};
pub use retry::{RetryConfig, RetryCounter, RetryNotice, RetryPolicy};
pub use speech::{AudioClip, SpeechClient, Transcriber};
pub use vaccination::Assistant;
