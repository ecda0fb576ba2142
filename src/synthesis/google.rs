//! Google Translate text and speech endpoints

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{EncodedClip, SpeechSynthesizer, Translator};
use crate::config::{SynthesisConfig, TranslationConfig};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)";

/// Translator backed by the public `translate_a/single` endpoint
pub struct GoogleTranslator {
    client: reqwest::Client,
    endpoint: String,
    source_language: String,
}

impl GoogleTranslator {
    pub fn new(config: &TranslationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            source_language: config.source_language.clone(),
        })
    }

    fn request_url(&self, text: &str, target_code: &str) -> Result<Url> {
        Url::parse_with_params(
            &self.endpoint,
            &[
                ("client", "gtx"),
                ("sl", self.source_language.as_str()),
                ("tl", target_code),
                ("dt", "t"),
                ("q", text),
            ],
        )
        .context("Invalid translation endpoint")
    }
}

/// Join the translated sentence fragments of a `translate_a/single` reply
fn parse_translation(body: &serde_json::Value) -> Result<String> {
    let sentences = body
        .get(0)
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("Unexpected translation response shape"))?;

    Ok(sentences
        .iter()
        .filter_map(|s| s.get(0).and_then(|t| t.as_str()))
        .collect::<String>())
}

#[async_trait]
impl Translator for GoogleTranslator {
    async fn translate(&self, text: &str, target_code: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }

        let response = self
            .client
            .get(self.request_url(text, target_code)?)
            .send()
            .await
            .context("Translation request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("Translation service returned {}", response.status()));
        }

        let body: serde_json::Value = response.json().await.context("Parse translation response")?;
        let translated = parse_translation(&body)?;
        debug!("Translated {} chars to {} ({} chars)", text.len(), target_code, translated.len());
        Ok(translated)
    }

    fn name(&self) -> &str {
        "google-translate"
    }
}

/// Speech synthesis through the `translate_tts` endpoint
pub struct GoogleTts {
    client: reqwest::Client,
    endpoint: String,
    max_chars: usize,
    slow: bool,
}

impl GoogleTts {
    pub fn new(config: &SynthesisConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            max_chars: config.max_chars.max(1),
            slow: config.slow,
        })
    }

    fn request_url(&self, chunk: &str, language_code: &str, idx: usize, total: usize) -> Result<Url> {
        let total = total.to_string();
        let idx = idx.to_string();
        let textlen = chunk.chars().count().to_string();
        Url::parse_with_params(
            &self.endpoint,
            &[
                ("ie", "UTF-8"),
                ("client", "tw-ob"),
                ("q", chunk),
                ("tl", language_code),
                ("ttsspeed", if self.slow { "0.3" } else { "1" }),
                ("total", total.as_str()),
                ("idx", idx.as_str()),
                ("textlen", textlen.as_str()),
            ],
        )
        .context("Invalid speech endpoint")
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleTts {
    async fn synthesize(&self, text: &str, language_code: &str) -> Result<EncodedClip> {
        let chunks = chunk_text(text, self.max_chars);
        if chunks.is_empty() {
            return Err(anyhow!("Nothing to speak"));
        }

        // mp3 frames from consecutive requests concatenate into one stream
        let mut bytes = Vec::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            let response = self
                .client
                .get(self.request_url(chunk, language_code, idx, chunks.len())?)
                .send()
                .await
                .context("Speech request failed")?;

            if !response.status().is_success() {
                return Err(anyhow!(
                    "Speech service returned {} for chunk {}/{}",
                    response.status(),
                    idx + 1,
                    chunks.len()
                ));
            }
            bytes.extend_from_slice(&response.bytes().await?);
        }

        if bytes.is_empty() {
            return Err(anyhow!("Speech service returned no audio"));
        }

        Ok(EncodedClip {
            bytes,
            extension: "mp3".to_string(),
        })
    }

    fn name(&self) -> &str {
        "google-tts"
    }
}

/// A run of text up to and including its closing punctuation
static SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?;:,।॥\n]+[.!?;:,।॥\n]*").expect("sentence pattern is valid"));

/// Split text into pieces of at most `max_chars` characters.
///
/// Prefers sentence punctuation, then whitespace; words longer than the
/// limit are cut.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);

    let mut chunks = Vec::new();
    let mut current = String::new();

    let push_piece = |piece: &str, current: &mut String, chunks: &mut Vec<String>| {
        let piece = piece.trim();
        if piece.is_empty() {
            return;
        }
        let needed = if current.is_empty() { 0 } else { 1 } + piece.chars().count();
        if current.chars().count() + needed <= max_chars {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(piece);
        } else {
            if !current.is_empty() {
                chunks.push(std::mem::take(current));
            }
            current.push_str(piece);
        }
    };

    for sentence in SENTENCE.find_iter(text) {
        let sentence = sentence.as_str().trim();
        if sentence.chars().count() <= max_chars {
            push_piece(sentence, &mut current, &mut chunks);
            continue;
        }
        for word in sentence.split_whitespace() {
            if word.chars().count() <= max_chars {
                push_piece(word, &mut current, &mut chunks);
            } else {
                let chars: Vec<char> = word.chars().collect();
                for part in chars.chunks(max_chars) {
                    push_piece(&part.iter().collect::<String>(), &mut current, &mut chunks);
                }
            }
        }
    }

    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}
