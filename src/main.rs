use anyhow::{anyhow, Result};
use clap::{Arg, ArgMatches, Command};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use segment_dubber::config::{Config, TranscriptionProvider};
use segment_dubber::languages::SUPPORTED_LANGUAGES;
use segment_dubber::media::FfmpegToolkit;
use segment_dubber::pipeline::{self, Collaborators, DubbingPipeline, DubbingRequest};
use segment_dubber::state::JobRegistry;
use segment_dubber::transcription::WhisperTranscriber;

fn cli() -> Command {
    Command::new("Segment Dubber")
        .version(env!("CARGO_PKG_VERSION"))
        .author("TigreRoll")
        .about("Dub videos into another language, segment by segment")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (TOML)")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("dub")
                .about("Dub a single video")
                .arg(
                    Arg::new("video")
                        .short('i')
                        .long("video")
                        .value_name("FILE")
                        .help("Video to dub")
                        .required(true),
                )
                .arg(
                    Arg::new("lang")
                        .short('l')
                        .long("lang")
                        .value_name("LANG")
                        .help("Target language code or name")
                        .default_value("hi"),
                )
                .arg(
                    Arg::new("output-dir")
                        .short('o')
                        .long("output-dir")
                        .value_name("DIR")
                        .help("Output directory for dubbed videos"),
                )
                .arg(
                    Arg::new("srt")
                        .long("srt")
                        .help("Also write the translated captions as .srt")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("serve")
                .about("Run the upload/download HTTP service")
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .help("Port to listen on")
                        .value_parser(clap::value_parser!(u16)),
                ),
        )
        .subcommand(Command::new("languages").about("List supported target languages"))
        .subcommand(
            Command::new("inspect")
                .about("Transcribe a video and print its segment timeline as SRT")
                .arg(
                    Arg::new("video")
                        .short('i')
                        .long("video")
                        .value_name("FILE")
                        .help("Video to transcribe")
                        .required(true),
                ),
        )
}

fn init_logging(verbose: bool, default_level: &str) {
    let default_directives = if verbose {
        "segment_dubber=debug,dubber=debug,tower_http=debug,warn".to_string()
    } else {
        format!("segment_dubber={0},dubber={0},warn", default_level)
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_thread_ids(verbose)
        .init();
}

fn load_config(matches: &ArgMatches) -> Result<Config> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => {
            let mut config = Config::from_file(Path::new(path))?;
            config.apply_env();
            config
        }
        None => Config::load().unwrap_or_else(|e| {
            eprintln!("Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };

    if let Some(("dub", sub)) = matches.subcommand() {
        if let Some(dir) = sub.get_one::<String>("output-dir") {
            config.storage.output_dir = PathBuf::from(dir);
        }
        if sub.get_flag("srt") {
            config.captions.export_srt = true;
        }
    }
    if let Some(("serve", sub)) = matches.subcommand() {
        if let Some(port) = sub.get_one::<u16>("port") {
            config.server.port = *port;
        }
    }

    config.validate()?;
    Ok(config)
}

async fn build_pipeline(config: Config) -> Result<DubbingPipeline> {
    config.ensure_directories()?;

    if !FfmpegToolkit::check_availability().await {
        warn!("⚠️ ffmpeg/ffprobe unavailable, jobs will fail at audio extraction");
    }
    if config.transcription.provider == TranscriptionProvider::Local {
        match WhisperTranscriber::check_availability().await {
            Ok(backend) => info!("🎤 {}", backend),
            Err(e) => warn!("⚠️ {}", e),
        }
    }

    let registry = match &config.storage.state_dir {
        Some(dir) => JobRegistry::persistent(dir.clone()).await?,
        None => JobRegistry::in_memory(),
    }
    .with_max_finished(config.storage.max_job_records);
    let collaborators = Collaborators::from_config(&config)?;

    Ok(DubbingPipeline::new(config, collaborators, registry))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let verbose = matches.get_flag("verbose");

    let config = load_config(&matches)?;
    init_logging(verbose, &config.server.log_level);

    if verbose {
        info!("Verbose logging enabled");
        info!("{}", config.summary());
    }

    match matches.subcommand() {
        Some(("languages", _)) => {
            let mut languages: Vec<_> = SUPPORTED_LANGUAGES.iter().collect();
            languages.sort_by_key(|l| l.name);
            for language in languages {
                println!("{:<6} {}", language.code, language.name);
            }
            Ok(())
        }

        Some(("dub", sub)) => {
            let video = sub
                .get_one::<String>("video")
                .ok_or_else(|| anyhow!("--video is required"))?;
            let lang = sub
                .get_one::<String>("lang")
                .map(String::as_str)
                .unwrap_or("hi");

            info!("🚀 Segment Dubber starting...");
            info!("🎬 Input: {}", video);
            info!("📂 Output directory: {}", config.storage.output_dir.display());

            let pipeline = build_pipeline(config).await?;
            let mut request = DubbingRequest::new(video, lang);
            request.delete_input = pipeline.config().processing.delete_input;

            match pipeline.run(request).await {
                Ok(outcome) => {
                    info!("🎉 Dubbed into {} in {:.2}s", outcome.language.name, outcome.elapsed_seconds);
                    info!(
                        "📊 {} segments, {} captions, {} truncated, {} padded",
                        outcome.segment_count,
                        outcome.caption_count,
                        outcome.reconciliation.truncated,
                        outcome.reconciliation.padded
                    );
                    if let Some(srt) = &outcome.subtitle_path {
                        info!("📝 Subtitles: {}", srt.display());
                    }
                    println!("{}", outcome.output_path.display());
                    Ok(())
                }
                Err(failure) => {
                    error!("❌ {}", failure);
                    Err(failure.into())
                }
            }
        }

        Some(("inspect", sub)) => {
            let video = sub
                .get_one::<String>("video")
                .ok_or_else(|| anyhow!("--video is required"))?;
            let pipeline = build_pipeline(config).await?;

            let (transcript, timeline) = pipeline.inspect(Path::new(video)).await?;
            info!(
                "📝 {} raw segments, {} after repair ({:?})",
                transcript.segments.len(),
                timeline.len(),
                timeline.repairs()
            );
            print!("{}", pipeline::source_subtitles(&timeline).generate());
            Ok(())
        }

        Some(("serve", _)) => serve(config).await,

        _ => Err(anyhow!("Unknown command, see --help")),
    }
}

#[cfg(feature = "api")]
async fn serve(config: Config) -> Result<()> {
    let port = config.server.port;
    let pipeline = std::sync::Arc::new(build_pipeline(config).await?);
    segment_dubber::api::ApiServer::new(pipeline, port).start().await
}

#[cfg(not(feature = "api"))]
async fn serve(_config: Config) -> Result<()> {
    Err(anyhow!("Built without the `api` feature"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn test_dub_arguments() {
        let matches = cli()
            .try_get_matches_from(["dubber", "dub", "--video", "talk.mp4", "--lang", "ta", "-v"])
            .unwrap();
        assert!(matches.get_flag("verbose"));
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "dub");
        assert_eq!(sub.get_one::<String>("lang").unwrap(), "ta");
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(cli().try_get_matches_from(["dubber"]).is_err());
    }
}
