//! StoryReel command line.
//!
//! ```text
//! storyreel <events|video> <topic> [--voice ID] [--owner ID] [--mock]
//! storyreel segments <story-id>
//! storyreel watch <story-id>
//! ```
//!
//! `segments` prints a finished story's record and cached segments, `watch`
//! follows the events another process publishes for a story.

use std::sync::Arc;

use anyhow::{bail, Context};
use futures::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storyreel_cache::{CacheConfig, EventChannel, SegmentCacheClient, StoryStore};
use storyreel_media::FfmpegRunner;
use storyreel_models::{StoryId, StoryRequest};
use storyreel_pipeline::mock::{
    AppendConcatenator, CopyVideoCreator, InMemoryMediaStore, InMemorySegmentCache,
    InMemoryStorySaver, InMemoryVideoPublisher, ScriptedTextGenerator, StaticMediaGenerator,
};
use storyreel_pipeline::{
    CancelToken, FfmpegConcatenator, FfmpegVideoCreator, PipelineConfig, SegmentPipeline,
    TaskDispatcher, VideoCollaborators, VideoPipeline,
};
use storyreel_providers::{ChatConfig, ChatStreamClient, ImageClient, ImageConfig, SpeechClient, SpeechConfig};
use storyreel_storage::R2Client;

const USAGE: &str = "usage: storyreel <events|video> <topic> [--voice ID] [--owner ID] [--mock]\n       storyreel <segments|watch> <story-id>";
const DEFAULT_VOICE: &str = "21m00Tcm4TlvDq8ikWAM";
const DEFAULT_OWNER: &str = "local";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Events,
    Video,
    Segments,
    Watch,
}

#[derive(Debug)]
struct Cli {
    mode: Mode,
    /// Topic for generating modes, story id for the others
    target: String,
    voice_id: String,
    owner_id: String,
    mock: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Cli> {
    let mode = match args.next().as_deref() {
        Some("events") => Mode::Events,
        Some("video") => Mode::Video,
        Some("segments") => Mode::Segments,
        Some("watch") => Mode::Watch,
        _ => bail!(USAGE),
    };

    let mut target = None;
    let mut voice_id = DEFAULT_VOICE.to_string();
    let mut owner_id = DEFAULT_OWNER.to_string();
    let mut mock = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--voice" => voice_id = args.next().context("--voice needs a value")?,
            "--owner" => owner_id = args.next().context("--owner needs a value")?,
            "--mock" => mock = true,
            flag if flag.starts_with("--") => bail!("unknown flag {}\n{}", flag, USAGE),
            _ if target.is_none() => target = Some(arg),
            _ => bail!(USAGE),
        }
    }

    let generating = matches!(mode, Mode::Events | Mode::Video);
    if !generating && mock {
        bail!("--mock only applies to events and video");
    }

    Ok(Cli {
        mode,
        target: target.context(USAGE)?,
        voice_id,
        owner_id,
        mock,
    })
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("storyreel=info,warn"));

    // Logs go to stderr so stdout stays machine-readable
    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();

    let cli = parse_args(std::env::args().skip(1))?;
    match cli.mode {
        Mode::Segments => return show_story(StoryId::from(cli.target.as_str())).await,
        Mode::Watch => return watch_story(StoryId::from(cli.target.as_str())).await,
        Mode::Events | Mode::Video => {}
    }

    let mut config = PipelineConfig::from_env();
    info!("Pipeline config: {:?}", config);

    let dispatcher = TaskDispatcher::new(config.max_workers, config.max_backlog);
    let run_token = CancelToken::new();

    let ctrl_c_token = run_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, cancelling run");
            ctrl_c_token.cancel();
        }
    });

    let request = StoryRequest::new(cli.target.clone(), cli.voice_id.clone(), cli.owner_id.clone())
        .with_words_per_story(config.words_per_story);
    info!(story_id = %request.story_id, "Starting story");

    if cli.mock {
        // Offline runs need a real file behind unmatched narration
        tokio::fs::create_dir_all(&config.work_dir).await?;
        let background = config.work_dir.join("mock-background.png");
        tokio::fs::write(&background, b"background").await?;
        config.default_background = background;
    }

    let result = if cli.mode == Mode::Video {
        run_video(&cli, config, dispatcher.clone(), request, &run_token).await
    } else {
        run_events(&cli, &config, dispatcher.clone(), request, &run_token).await
    };

    dispatcher.shutdown();
    result
}

async fn run_events(
    cli: &Cli,
    config: &PipelineConfig,
    dispatcher: TaskDispatcher,
    request: StoryRequest,
    run_token: &CancelToken,
) -> anyhow::Result<()> {
    let (pipeline, channel): (SegmentPipeline, Option<EventChannel>) = if cli.mock {
        let media = Arc::new(StaticMediaGenerator::default());
        let pipeline = SegmentPipeline::new(
            dispatcher,
            config,
            Arc::new(ScriptedTextGenerator::default()),
            media.clone(),
            media,
            Arc::new(InMemoryMediaStore::new()),
            Arc::new(InMemorySegmentCache::new()),
            Arc::new(InMemoryStorySaver::new()),
        );
        (pipeline, None)
    } else {
        let cache_config = CacheConfig::from_env()?;
        let pipeline = SegmentPipeline::new(
            dispatcher,
            config,
            Arc::new(ChatStreamClient::new(ChatConfig::from_env()?)?),
            Arc::new(ImageClient::new(ImageConfig::from_env()?)?),
            Arc::new(SpeechClient::new(SpeechConfig::from_env()?)?),
            Arc::new(R2Client::from_env()?),
            Arc::new(SegmentCacheClient::new(&cache_config)?),
            Arc::new(StoryStore::new(&cache_config)?),
        );
        (pipeline, Some(EventChannel::new(&cache_config.redis_url)?))
    };

    let mut events = pipeline.run(request, run_token);
    while let Some(event) = events.recv().await {
        println!("{}", serde_json::to_string(&event)?);
        if let Some(channel) = &channel {
            if let Err(e) = channel.publish(&event).await {
                warn!("Failed to publish event: {}", e);
            }
        }
        if event.is_terminal() {
            break;
        }
    }
    Ok(())
}

async fn run_video(
    cli: &Cli,
    config: PipelineConfig,
    dispatcher: TaskDispatcher,
    request: StoryRequest,
    run_token: &CancelToken,
) -> anyhow::Result<()> {
    let collaborators = if cli.mock {
        let media = Arc::new(StaticMediaGenerator::default());
        VideoCollaborators {
            text: Arc::new(ScriptedTextGenerator::default()),
            images: media.clone(),
            audio: media,
            creator: Arc::new(CopyVideoCreator::default()),
            concatenator: Arc::new(AppendConcatenator),
            publisher: Arc::new(InMemoryVideoPublisher::new()),
        }
    } else {
        let runner = FfmpegRunner::new().with_timeout(config.ffmpeg_timeout_secs);
        VideoCollaborators {
            text: Arc::new(ChatStreamClient::new(ChatConfig::from_env()?)?),
            images: Arc::new(ImageClient::new(ImageConfig::from_env()?)?),
            audio: Arc::new(SpeechClient::new(SpeechConfig::from_env()?)?),
            creator: Arc::new(FfmpegVideoCreator::new(runner.clone())),
            concatenator: Arc::new(FfmpegConcatenator::new(runner)),
            publisher: Arc::new(R2Client::from_env()?),
        }
    };

    let pipeline = VideoPipeline::new(dispatcher, config, collaborators);
    let response = pipeline.run(request, run_token).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn show_story(story_id: StoryId) -> anyhow::Result<()> {
    let cache_config = CacheConfig::from_env()?;

    match StoryStore::new(&cache_config)?.load(&story_id).await? {
        Some(story) => println!("{}", serde_json::to_string(&story)?),
        None => warn!(story_id = %story_id, "No saved record for story"),
    }

    let segments = SegmentCacheClient::new(&cache_config)?
        .load_story(&story_id)
        .await?;
    info!(story_id = %story_id, "{} cached segments", segments.len());
    for segment in segments {
        println!("{}", serde_json::to_string(&segment)?);
    }
    Ok(())
}

async fn watch_story(story_id: StoryId) -> anyhow::Result<()> {
    let cache_config = CacheConfig::from_env()?;
    let mut events = EventChannel::new(&cache_config.redis_url)?
        .subscribe(&story_id)
        .await?;
    info!(story_id = %story_id, "Watching story events");

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.next() => event,
        };
        let Some(event) = event else {
            bail!("event channel closed before the story finished");
        };
        println!("{}", serde_json::to_string(&event)?);
        if event.is_terminal() {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_parse_args() {
        let cli = parse_args(args(&["video", "a brave fox", "--voice", "v1", "--mock"])).unwrap();
        assert_eq!(cli.mode, Mode::Video);
        assert_eq!(cli.target, "a brave fox");
        assert_eq!(cli.voice_id, "v1");
        assert_eq!(cli.owner_id, DEFAULT_OWNER);
        assert!(cli.mock);
    }

    #[test]
    fn test_parse_args_rejects_bad_input() {
        assert!(parse_args(args(&["render", "x"])).is_err());
        assert!(parse_args(args(&["events"])).is_err());
        assert!(parse_args(args(&["events", "x", "--voice"])).is_err());
        assert!(parse_args(args(&["events", "x", "--fast"])).is_err());
        assert!(parse_args(args(&["watch", "s-1", "--mock"])).is_err());
    }

    #[test]
    fn test_parse_story_commands() {
        let cli = parse_args(args(&["segments", "s-1"])).unwrap();
        assert_eq!(cli.mode, Mode::Segments);
        assert_eq!(cli.target, "s-1");

        let cli = parse_args(args(&["watch", "s-2"])).unwrap();
        assert_eq!(cli.mode, Mode::Watch);
        assert_eq!(cli.target, "s-2");
    }
}
