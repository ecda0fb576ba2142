pub mod google;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::audio::PcmBuffer;
use crate::error::DubbingError;
use crate::languages::Language;
use crate::media::MediaToolkit;
use crate::timeline::Segment;

pub use google::{GoogleTranslator, GoogleTts};

/// Text translation collaborator
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target_code: &str) -> Result<String>;
    fn name(&self) -> &str;
}

/// Encoded audio returned by a speech service
#[derive(Debug, Clone)]
pub struct EncodedClip {
    pub bytes: Vec<u8>,
    /// File extension understood by the decoder, e.g. "mp3"
    pub extension: String,
}

/// Text-to-speech collaborator
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, language_code: &str) -> Result<EncodedClip>;
    fn name(&self) -> &str;
}

/// Translated speech for one segment, at its natural length
#[derive(Debug, Clone)]
pub struct SynthesizedClip {
    pub segment_index: usize,
    pub audio: PcmBuffer,
    pub translated_text: String,
}

/// Turns a segment's source text into decoded speech in the target language
#[derive(Clone)]
pub struct SlotSynthesizer {
    translator: Arc<dyn Translator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    media: Arc<dyn MediaToolkit>,
    sample_rate: u32,
}

impl SlotSynthesizer {
    pub fn new(
        translator: Arc<dyn Translator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        media: Arc<dyn MediaToolkit>,
        sample_rate: u32,
    ) -> Self {
        Self {
            translator,
            synthesizer,
            media,
            sample_rate,
        }
    }

    /// Translate, synthesize and decode one segment.
    ///
    /// Encoded audio goes to a temporary file inside `scratch_dir` that is
    /// removed on every exit path. An empty translation yields an empty
    /// clip without calling the speech service.
    pub async fn synthesize_segment(
        &self,
        segment: &Segment,
        language: &Language,
        scratch_dir: &Path,
    ) -> Result<SynthesizedClip, DubbingError> {
        let translated = self
            .translator
            .translate(&segment.source_text, language.code)
            .await
            .map_err(|e| DubbingError::synthesis(segment.index, format!("translation: {:#}", e)))?;
        let translated = translated.trim().to_string();

        if translated.is_empty() {
            debug!("Segment {} translated to empty text, leaving it silent", segment.index);
            return Ok(SynthesizedClip {
                segment_index: segment.index,
                audio: PcmBuffer::new(Vec::new(), self.sample_rate),
                translated_text: translated,
            });
        }

        let encoded = self
            .synthesizer
            .synthesize(&translated, language.code)
            .await
            .map_err(|e| DubbingError::synthesis(segment.index, format!("speech: {:#}", e)))?;

        let audio = self
            .decode(segment.index, &encoded, scratch_dir)
            .await
            .map_err(|e| DubbingError::synthesis(segment.index, format!("decode: {:#}", e)))?;

        debug!(
            "Segment {}: {:.2}s of speech for a {:.2}s slot",
            segment.index,
            audio.duration_seconds(),
            segment.duration()
        );

        Ok(SynthesizedClip {
            segment_index: segment.index,
            audio,
            translated_text: translated,
        })
    }

    async fn decode(&self, index: usize, encoded: &EncodedClip, scratch_dir: &Path) -> Result<PcmBuffer> {
        let encoded_file = tempfile::Builder::new()
            .prefix(&format!("tts_{:04}_", index))
            .suffix(&format!(".{}", encoded.extension))
            .tempfile_in(scratch_dir)?;
        let wav_file = tempfile::Builder::new()
            .prefix(&format!("tts_{:04}_", index))
            .suffix(".wav")
            .tempfile_in(scratch_dir)?;

        tokio::fs::write(encoded_file.path(), &encoded.bytes).await?;
        let pcm = self.media.decode_audio(encoded_file.path(), wav_file.path()).await?;

        if pcm.sample_rate != self.sample_rate {
            anyhow::bail!("decoded clip is {}Hz, expected {}Hz", pcm.sample_rate, self.sample_rate);
        }
        Ok(pcm)
    }

    /// Clips for `segments` with up to `concurrency` in flight, yielded in
    /// segment order
    pub fn synthesize_stream<'a>(
        &'a self,
        segments: &'a [Segment],
        language: &'a Language,
        scratch_dir: &'a Path,
        concurrency: usize,
    ) -> impl Stream<Item = Result<SynthesizedClip, DubbingError>> + 'a {
        info!("🗣️ Synthesizing {} segments in {} ({} at a time)", segments.len(), language.name, concurrency.max(1));

        stream::iter(segments)
            .map(move |segment| self.synthesize_segment(segment, language, scratch_dir))
            .buffered(concurrency.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioInfo;
    use crate::video::{VideoComposition, VideoInfo};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct UpperTranslator;

    #[async_trait]
    impl Translator for UpperTranslator {
        async fn translate(&self, text: &str, _target_code: &str) -> Result<String> {
            if text == "mute" {
                return Ok("  ".to_string());
            }
            Ok(text.to_uppercase())
        }
        fn name(&self) -> &str {
            "upper"
        }
    }

    /// One byte per sample so decoded length follows text length
    struct LengthTts {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SpeechSynthesizer for LengthTts {
        async fn synthesize(&self, text: &str, _language_code: &str) -> Result<EncodedClip> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text == "FAIL" {
                anyhow::bail!("service unavailable");
            }
            Ok(EncodedClip {
                bytes: vec![1; text.len() * 10],
                extension: "mp3".to_string(),
            })
        }
        fn name(&self) -> &str {
            "length"
        }
    }

    struct ByteDecoder;

    #[async_trait]
    impl MediaToolkit for ByteDecoder {
        async fn probe_video(&self, _video_path: &Path) -> Result<VideoInfo> {
            anyhow::bail!("unused")
        }
        async fn extract_audio(&self, _v: &Path, _a: &Path, _r: u32) -> Result<AudioInfo> {
            anyhow::bail!("unused")
        }
        async fn decode_audio(&self, encoded_path: &Path, _scratch_wav: &Path) -> Result<PcmBuffer> {
            let bytes = tokio::fs::read(encoded_path).await?;
            Ok(PcmBuffer::new(vec![0.25; bytes.len()], 1_000))
        }
        async fn encode(&self, _c: &VideoComposition, _o: &Path) -> Result<()> {
            anyhow::bail!("unused")
        }
    }

    fn synthesizer(tts: Arc<LengthTts>) -> SlotSynthesizer {
        SlotSynthesizer::new(Arc::new(UpperTranslator), tts, Arc::new(ByteDecoder), 1_000)
    }

    fn hindi() -> Language {
        Language { name: "Hindi", code: "hi" }
    }

    #[tokio::test]
    async fn test_clips_come_back_in_segment_order() {
        let dir = tempfile::tempdir().unwrap();
        let tts = Arc::new(LengthTts { calls: AtomicUsize::new(0) });
        let segments: Vec<Segment> = (0..6)
            .map(|i| Segment::new(i, i as f64, i as f64 + 0.5, &"x".repeat(6 - i)).unwrap())
            .collect();

        let clips: Vec<SynthesizedClip> = synthesizer(tts.clone())
            .synthesize_stream(&segments, &hindi(), dir.path(), 3)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        let order: Vec<usize> = clips.iter().map(|c| c.segment_index).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(clips[0].audio.len(), 60);
        assert_eq!(clips[0].translated_text, "XXXXXX");
        assert_eq!(tts.calls.load(Ordering::SeqCst), 6);

        // Scratch files are gone
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_empty_translation_skips_speech() {
        let dir = tempfile::tempdir().unwrap();
        let tts = Arc::new(LengthTts { calls: AtomicUsize::new(0) });
        let segment = Segment::new(0, 0.0, 1.0, "mute").unwrap();

        let clip = synthesizer(tts.clone())
            .synthesize_segment(&segment, &hindi(), dir.path())
            .await
            .unwrap();

        assert!(clip.audio.is_empty());
        assert!(clip.translated_text.is_empty());
        assert_eq!(tts.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_names_segment() {
        let dir = tempfile::tempdir().unwrap();
        let tts = Arc::new(LengthTts { calls: AtomicUsize::new(0) });
        let segments = vec![
            Segment::new(0, 0.0, 1.0, "ok").unwrap(),
            Segment::new(1, 1.0, 2.0, "fail").unwrap(),
        ];

        let err = synthesizer(tts)
            .synthesize_stream(&segments, &hindi(), dir.path(), 1)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .find_map(|r| r.err())
            .unwrap();

        match err {
            DubbingError::Synthesis { segment, message } => {
                assert_eq!(segment, 1);
                assert!(message.contains("service unavailable"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
