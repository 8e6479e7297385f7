//! Runtime configuration read from the environment.

use std::net::SocketAddr;

use thiserror::Error;

const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";
const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
const DEFAULT_VOICE: &str = "Kore";
const DEFAULT_SPEECH_CHUNK_CHARS: usize = 1500;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: String,
    pub text_model: String,
    pub tts_model: String,
    pub image_model: String,
    pub voice: String,
    /// Upper bound on characters per speech request.
    pub speech_chunk_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: String::new(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            tts_model: DEFAULT_TTS_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            speech_chunk_chars: DEFAULT_SPEECH_CHUNK_CHARS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub llm: LlmConfig,
    /// Lowercased emails allowed past the sign-in gate.
    pub allowed_emails: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            llm: LlmConfig::default(),
            allowed_emails: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let bind = var("BIND_ADDR", DEFAULT_BIND_ADDR);
        let bind_addr = bind.parse().map_err(|_| ConfigError::Invalid {
            name: "BIND_ADDR",
            value: bind.clone(),
        })?;

        let chunk = var("SPEECH_CHUNK_CHARS", &DEFAULT_SPEECH_CHUNK_CHARS.to_string());
        let speech_chunk_chars = chunk
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ConfigError::Invalid {
                name: "SPEECH_CHUNK_CHARS",
                value: chunk.clone(),
            })?;

        let allowed_emails = var("ALLOWED_EMAILS", "")
            .split(',')
            .map(|email| email.trim().to_lowercase())
            .filter(|email| !email.is_empty())
            .collect();

        Ok(Self {
            bind_addr,
            llm: LlmConfig {
                api_url: var("LLM_API_URL", DEFAULT_API_URL)
                    .trim_end_matches('/')
                    .to_string(),
                api_key: var("LLM_API_KEY", ""),
                text_model: var("LLM_TEXT_MODEL", DEFAULT_TEXT_MODEL),
                tts_model: var("LLM_TTS_MODEL", DEFAULT_TTS_MODEL),
                image_model: var("LLM_IMAGE_MODEL", DEFAULT_IMAGE_MODEL),
                voice: var("LLM_VOICE", DEFAULT_VOICE),
                speech_chunk_chars,
            },
            allowed_emails,
        })
    }
}
