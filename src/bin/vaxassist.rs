use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vaxassist::hospital::{format_travel_time, partition, RankedHospital};
use vaxassist::maps::{decode_polyline, MapsClient};
use vaxassist::questionnaire::{Questionnaire, QUESTIONS};
use vaxassist::retry::RetryCounter;
use vaxassist::vaccination::CardStatus;
use vaxassist::{Assistant, AudioClip, Config, GeminiClient, SpeechClient, Transcriber};

#[derive(Parser)]
#[command(name = "vaxassist")]
#[command(about = "Vaccination assistant, questionnaire and hospital locator", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the vaccination assistant a question
    Ask {
        /// Vaccination card image to personalise the answer with
        #[arg(long)]
        card: Option<PathBuf>,
        #[arg(required = true)]
        question: Vec<String>,
    },
    /// Extract the record from a vaccination card image (JPEG/PNG)
    Card { path: PathBuf },
    /// List precautions for a vaccine
    Precautions { vaccine: String },
    /// Transcribe a raw 16 kHz mono 16-bit little-endian PCM file
    Transcribe { path: PathBuf },
    /// Fill the medical questionnaire from one PCM recording per question
    Form {
        #[arg(required = true)]
        recordings: Vec<PathBuf>,
    },
    /// Find hospitals reachable by car from an address
    Hospitals {
        /// Maximum travel time in minutes
        #[arg(long, default_value_t = 60)]
        max_minutes: u64,
        /// Also look up speed limits along the route to the nearest hospital
        #[arg(long)]
        speed_limits: bool,
        #[arg(required = true)]
        address: Vec<String>,
    },
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

fn speech_client(config: &Config) -> Result<SpeechClient> {
    let speech = config
        .speech
        .clone()
        .context("[speech] section missing from config")?;
    Ok(SpeechClient::new(speech))
}

async fn read_clip(path: &Path, config: &Config) -> Result<AudioClip> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let language = config
        .speech
        .as_ref()
        .map(|s| s.language.clone())
        .unwrap_or_else(|| "en-US".to_string());
    Ok(AudioClip::from_le_bytes(&bytes, language))
}

async fn load_card(assistant: &mut Assistant<GeminiClient>, path: &Path) -> Result<()> {
    let image = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let name = path.display().to_string();
    if assistant.process_card(&name, mime_for(path), image).await? == CardStatus::Processed {
        info!("Vaccination card processed successfully!");
    }
    Ok(())
}

fn print_group(title: &str, hospitals: &[&RankedHospital]) {
    if hospitals.is_empty() {
        return;
    }
    println!("{} ({})", title, hospitals.len());
    for h in hospitals {
        println!(
            "  {} - {} ({:.1} km){}",
            h.hospital.name,
            format_travel_time(h.travel.duration_secs),
            h.travel.distance_meters as f64 / 1000.0,
            h.hospital
                .rating
                .map(|r| format!(", rated {:.1}", r))
                .unwrap_or_default()
        );
        if let Some(vicinity) = &h.hospital.vicinity {
            println!("    {}", vicinity);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_path(&cli.config)?;
    let policy = config.retry_policy()?;
    let backend = GeminiClient::new(config.gemini.clone());

    match cli.command {
        Commands::Ask { card, question } => {
            let mut assistant = Assistant::new(backend, policy)
                .with_notice_handler(|notice| eprintln!("{}", notice));
            if let Some(path) = card {
                load_card(&mut assistant, &path).await?;
            }
            println!("{}", assistant.ask(&question.join(" ")).await);
            if let Some(note) = assistant.retry_note() {
                eprintln!("{}", note);
            }
        }
        Commands::Card { path } => {
            let mut assistant = Assistant::new(backend, policy)
                .with_notice_handler(|notice| eprintln!("{}", notice));
            load_card(&mut assistant, &path).await?;
            if let Some(record) = &assistant.session().record {
                println!("{}", serde_json::to_string_pretty(record)?);
            }
            if let Some(note) = assistant.retry_note() {
                eprintln!("{}", note);
            }
        }
        Commands::Precautions { vaccine } => {
            let mut assistant = Assistant::new(backend, policy);
            for precaution in assistant.precautions(&vaccine).await {
                println!("- {}", precaution);
            }
        }
        Commands::Transcribe { path } => {
            let transcriber = speech_client(&config)?;
            let clip = read_clip(&path, &config).await?;
            let (transcriber, clip) = (&transcriber, &clip);
            let mut counter = RetryCounter::new();
            let text = policy
                .invoke(&mut counter, move || transcriber.transcribe(clip))
                .await?;
            println!("{}", text);
        }
        Commands::Form { recordings } => {
            let transcriber = speech_client(&config)?;
            let mut counter = RetryCounter::new();
            let mut form = Questionnaire::new();
            for path in recordings.iter().take(QUESTIONS.len()) {
                let clip = read_clip(path, &config).await?;
                form.fill_from_audio(&transcriber, &backend, &policy, &mut counter, &clip)
                    .await?;
            }
            print!("{}", form.report());
            if counter.total() > 0 {
                eprintln!("Total retries: {}", counter.total());
            }
        }
        Commands::Hospitals {
            max_minutes,
            speed_limits,
            address,
        } => {
            let maps = MapsClient::new(
                config
                    .maps
                    .clone()
                    .context("[maps] section missing from config")?,
            );
            let mut counter = RetryCounter::new();
            let search = maps
                .find_hospitals(
                    &policy,
                    &mut counter,
                    &address.join(" "),
                    max_minutes.saturating_mul(60),
                )
                .await?;

            println!("Hospitals near {}", search.origin.formatted_address);
            if search.ranked.is_empty() {
                println!("No hospitals reachable within {} minutes", max_minutes);
            }
            let groups = partition(&search.ranked);
            print_group("Emergency services", &groups.emergency);
            print_group("Multispeciality", &groups.multispeciality);
            print_group("Other hospitals", &groups.regular);

            if let Some(nearest) = search.ranked.first().filter(|_| speed_limits) {
                let path = search
                    .polylines
                    .get(&nearest.hospital.place_id)
                    .and_then(|encoded| decode_polyline(encoded))
                    .unwrap_or_default();
                let (maps, path) = (&maps, &path);
                let limits = policy
                    .invoke(&mut counter, move || maps.speed_limits(path))
                    .await?;
                println!(
                    "Speed limits to {}: {}",
                    nearest.hospital.name,
                    limits
                        .iter()
                        .map(|l| format!("{} {}", l.speed_limit, l.units))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
            if counter.total() > 0 {
                eprintln!("Total retries: {}", counter.total());
            }
        }
    }

    Ok(())
}
