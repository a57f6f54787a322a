//! Streaming segment extractor.
//!
//! Text arrives token by token. After every token the buffer is scanned:
//!
//! 1. A complete `[description]` becomes an image segment and is replaced in
//!    the buffer by a `{id}` back-reference.
//! 2. An unterminated `[` defers all extraction until its `]` arrives.
//! 3. Once the buffer holds `sentences_per_segment` punctuation marks, the
//!    text up to the last of them becomes an audio segment. If that span
//!    carries two or more back-references it is cut before the second one, so
//!    each audio segment embeds at most one image.
//!
//! An audio segment's background is the image referenced inside it, else the
//! most recently extracted image, else the default background.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tokio::sync::mpsc;
use tracing::debug;

use storyreel_models::{BackgroundImage, Segment, SegmentId, StoryId};

use crate::cancel::CancelToken;
use crate::dispatcher::TaskDispatcher;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::RunLogger;
use crate::stage::{recv_or_cancel, spawn_stage, StageOutput, StageSink};

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?:;]").expect("valid punctuation regex"));
// Innermost brace pair; narration may contain braces of its own
static BACK_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]*)\}").expect("valid back-reference regex"));

/// Strip backslashes and redundant whitespace.
pub fn clean_text(raw: &str) -> String {
    raw.replace('\\', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Buffer-driven segment parser for one story.
#[derive(Debug)]
pub struct SegmentParser {
    story_id: StoryId,
    sentences_per_segment: usize,
    buffer: String,
    audio_ordinal: u32,
    image_ordinal: u32,
    last_image: Option<SegmentId>,
    images: HashSet<SegmentId>,
}

impl SegmentParser {
    pub fn new(story_id: StoryId, sentences_per_segment: usize) -> Self {
        Self {
            story_id,
            sentences_per_segment: sentences_per_segment.max(1),
            buffer: String::new(),
            audio_ordinal: 0,
            image_ordinal: 0,
            last_image: None,
            images: HashSet::new(),
        }
    }

    /// Append a token and return every segment it completes, in discovery order.
    pub fn push(&mut self, token: &str) -> PipelineResult<Vec<Segment>> {
        self.buffer.push_str(token);
        let mut segments = Vec::new();

        loop {
            let open = self.buffer.find('[');
            let close = self.buffer.find(']');

            match (open, close) {
                (Some(o), Some(c)) if o < c => {
                    if let Some(image) = self.cut_image(o, c) {
                        segments.push(image);
                    }
                }
                (_, Some(_)) => {
                    return Err(PipelineError::parse(
                        "closing bracket without a matching opening bracket",
                    ));
                }
                (Some(_), None) => break,
                (None, None) => {
                    let Some(cut) = self.audio_boundary() else {
                        break;
                    };
                    let span: String = self.buffer.drain(..cut).collect();
                    if let Some(audio) = self.audio_segment(&span) {
                        segments.push(audio);
                    }
                }
            }
        }

        Ok(segments)
    }

    /// Flush the remaining text as a final audio segment.
    ///
    /// An unterminated description at the end is dropped; a flush that cleans
    /// to nothing produces no segment.
    pub fn finish(&mut self) -> Option<Segment> {
        let mut span = std::mem::take(&mut self.buffer);
        if let Some(open) = span.find('[') {
            debug!("Dropping unterminated description: {}", &span[open..]);
            span.truncate(open);
        }
        self.audio_segment(&span)
    }

    pub fn audio_count(&self) -> u32 {
        self.audio_ordinal
    }

    pub fn image_count(&self) -> u32 {
        self.image_ordinal
    }

    fn cut_image(&mut self, open: usize, close: usize) -> Option<Segment> {
        let description = self.buffer[open + 1..close].trim().to_string();
        if description.is_empty() {
            self.buffer.replace_range(open..=close, "");
            return None;
        }

        let id = SegmentId::new();
        self.buffer.replace_range(open..=close, &format!("{{{}}}", id));

        let image = Segment::image(id.clone(), self.story_id.clone(), description, self.image_ordinal);
        self.image_ordinal += 1;
        self.images.insert(id.clone());
        self.last_image = Some(id);
        Some(image)
    }

    /// Byte offset the next audio segment ends at, if the buffer holds one.
    fn audio_boundary(&self) -> Option<usize> {
        let mark = PUNCTUATION
            .find_iter(&self.buffer)
            .nth(self.sentences_per_segment - 1)?;
        let end = mark.end();

        let second_reference = self
            .known_references(&self.buffer[..end])
            .nth(1)
            .map(|(start, _)| start);
        Some(second_reference.unwrap_or(end))
    }

    /// Back-references to images of this story inside `text`, with their offsets.
    fn known_references<'a>(&'a self, text: &'a str) -> impl Iterator<Item = (usize, SegmentId)> + 'a {
        BACK_REFERENCE.captures_iter(text).filter_map(move |caps| {
            let whole = caps.get(0)?;
            let id = SegmentId::from_string(caps.get(1)?.as_str());
            self.images.contains(&id).then_some((whole.start(), id))
        })
    }

    /// `text` with every back-reference to an image of this story removed.
    fn strip_references(&self, text: &str) -> String {
        let mut stripped = String::with_capacity(text.len());
        let mut last = 0;
        for (start, id) in self.known_references(text) {
            stripped.push_str(&text[last..start]);
            stripped.push(' ');
            last = start + id.as_str().len() + 2;
        }
        stripped.push_str(&text[last..]);
        stripped
    }

    fn audio_segment(&mut self, span: &str) -> Option<Segment> {
        let text = clean_text(&self.strip_references(span));
        if text.is_empty() {
            return None;
        }

        let background = self
            .known_references(span)
            .next()
            .map(|(_, id)| id)
            .or_else(|| self.last_image.clone())
            .map(BackgroundImage::Segment)
            .unwrap_or(BackgroundImage::Default);

        let audio = Segment::audio(
            SegmentId::new(),
            self.story_id.clone(),
            text,
            self.audio_ordinal,
            background,
        );
        self.audio_ordinal += 1;
        Some(audio)
    }
}

/// Extraction stage over a live token queue.
#[derive(Debug, Clone)]
pub struct SegmentExtractor {
    sentences_per_segment: usize,
}

impl SegmentExtractor {
    pub fn new(sentences_per_segment: usize) -> Self {
        Self {
            sentences_per_segment,
        }
    }

    /// Parse a complete token sequence.
    pub fn extract_all<'a>(
        &self,
        story_id: StoryId,
        tokens: impl IntoIterator<Item = &'a str>,
    ) -> PipelineResult<Vec<Segment>> {
        let mut parser = SegmentParser::new(story_id, self.sentences_per_segment);
        let mut segments = Vec::new();
        for token in tokens {
            segments.extend(parser.push(token)?);
        }
        segments.extend(parser.finish());
        Ok(segments)
    }

    /// Run the extractor as a stage.
    ///
    /// The final flush happens only when the token queue closes normally; a
    /// cancelled run (including one failed by the text generator) ends
    /// without it.
    pub fn extract(
        &self,
        dispatcher: &TaskDispatcher,
        story_id: StoryId,
        mut tokens: mpsc::Receiver<String>,
        cancel: CancelToken,
    ) -> StageOutput<Segment> {
        let (sink, output) = StageSink::channel(cancel.clone(), "extractor");
        let reporter = sink.reporter();
        let logger = RunLogger::new(&story_id, "extractor");
        let mut parser = SegmentParser::new(story_id, self.sentences_per_segment);

        let body = async move {
            while let Some(token) = recv_or_cancel(&mut tokens, &cancel).await {
                match parser.push(&token) {
                    Ok(segments) => {
                        for segment in segments {
                            if sink.send(segment).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        logger.log_error(&e.to_string());
                        sink.fail(e);
                        return;
                    }
                }
            }

            if cancel.is_cancelled() {
                logger.log_warning("cancelled before the token stream ended");
                return;
            }
            if let Some(last) = parser.finish() {
                if sink.send(last).await.is_err() {
                    return;
                }
            }
            logger.log_completion(&format!(
                "{} audio and {} image segments",
                parser.audio_count(),
                parser.image_count()
            ));
        };

        spawn_stage(dispatcher, "extractor", reporter, body);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyreel_models::SegmentType;

    fn words(text: &str) -> Vec<String> {
        text.split_inclusive(' ').map(str::to_string).collect()
    }

    fn parse(text: &str) -> PipelineResult<Vec<Segment>> {
        let tokens = words(text);
        SegmentExtractor::new(3).extract_all(StoryId::from("s-1"), tokens.iter().map(String::as_str))
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(
            clean_text("  It stretches.\n\tIt\\ yawns.  "),
            "It stretches. It yawns."
        );
    }

    #[test]
    fn test_pinned_scenario() {
        let segments = parse("A cat wakes up. [A sunny meadow] It stretches. It yawns. It walks.").unwrap();
        assert_eq!(segments.len(), 3);

        let image = &segments[0];
        assert_eq!(image.segment_type, SegmentType::Image);
        assert_eq!(image.text, "A sunny meadow");
        assert_eq!(image.ordinal, 0);

        let first = &segments[1];
        assert_eq!(first.segment_type, SegmentType::Audio);
        assert_eq!(first.text, "A cat wakes up. It stretches. It yawns.");
        assert_eq!(first.ordinal, 0);
        assert_eq!(first.background_image, Some(BackgroundImage::Segment(image.id.clone())));

        let second = &segments[2];
        assert_eq!(second.text, "It walks.");
        assert_eq!(second.ordinal, 1);
        assert_eq!(second.background_image, Some(BackgroundImage::Segment(image.id.clone())));
    }

    #[test]
    fn test_audio_before_any_image_uses_default() {
        let segments = parse("One. Two. Three. Four.").unwrap();
        assert_eq!(segments[0].text, "One. Two. Three.");
        assert_eq!(segments[0].background_image, Some(BackgroundImage::Default));
        assert_eq!(segments[1].text, "Four.");
        assert_eq!(segments[1].ordinal, 1);
    }

    #[test]
    fn test_open_bracket_defers_extraction() {
        let mut parser = SegmentParser::new(StoryId::from("s"), 3);
        assert!(parser.push("One. Two. [A dark").unwrap().is_empty());
        assert!(parser.push(" forest. Three.").unwrap().is_empty());

        let segments = parser.push("] Four.").unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "A dark forest. Three.");
        assert_eq!(segments[1].text, "One. Two. Four.");
    }

    #[test]
    fn test_two_references_split_the_audio() {
        let segments = parse("[Castle] Knock. [Hall] Step. Walk.").unwrap();
        let castle = &segments[0];
        let hall = &segments[1];
        assert_eq!(castle.text, "Castle");
        assert_eq!(hall.text, "Hall");
        assert_eq!(hall.ordinal, 1);

        let audio: Vec<&Segment> = segments.iter().filter(|s| s.is_audio()).collect();
        assert_eq!(audio.len(), 2);
        assert_eq!(audio[0].text, "Knock.");
        assert_eq!(audio[0].background_image, Some(BackgroundImage::Segment(castle.id.clone())));
        assert_eq!(audio[1].text, "Step. Walk.");
        assert_eq!(audio[1].background_image, Some(BackgroundImage::Segment(hall.id.clone())));
    }

    #[test]
    fn test_stray_closing_bracket_is_parse_error() {
        let err = parse("Hello. world] again.").unwrap_err();
        assert!(matches!(err, PipelineError::Parse(_)));
    }

    #[test]
    fn test_flush_drops_unterminated_description() {
        let segments = parse("Alone here. [Half a").unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "Alone here.");
    }

    #[test]
    fn test_empty_flush_emits_nothing() {
        let segments = parse("One. Two. Three.   \n").unwrap();
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn test_text_is_preserved_without_brackets() {
        let input = "It rained! Did it stop? No: it went on; and on. The end.";
        let segments = parse(input).unwrap();
        let joined: String = segments.iter().map(|s| s.text.as_str()).collect();
        let strip = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
        assert_eq!(strip(&joined), strip(input));

        let ordinals: Vec<u32> = segments.iter().map(|s| s.ordinal).collect();
        assert_eq!(ordinals, (0..segments.len() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn test_literal_braces_survive() {
        let segments = parse("He drew { a shape. [Sky] It rose. It fell. Done.").unwrap();
        assert_eq!(segments.len(), 3);

        let sky = &segments[0];
        assert_eq!(sky.text, "Sky");

        assert_eq!(segments[1].text, "He drew { a shape. It rose. It fell.");
        assert_eq!(segments[1].background_image, Some(BackgroundImage::Segment(sky.id.clone())));
        assert_eq!(segments[2].text, "Done.");

        let segments = parse("A {curly} word. Two. Three.").unwrap();
        assert_eq!(segments[0].text, "A {curly} word. Two. Three.");
        assert_eq!(segments[0].background_image, Some(BackgroundImage::Default));
    }

    #[test]
    fn test_rerun_is_identical_apart_from_ids() {
        let input = "[Sea] Waves roll. Gulls cry. Wind blows. [Port] Ships dock.";
        let strip_ids = |segments: Vec<Segment>| {
            segments
                .into_iter()
                .map(|s| (s.text, s.segment_type, s.ordinal))
                .collect::<Vec<_>>()
        };
        assert_eq!(strip_ids(parse(input).unwrap()), strip_ids(parse(input).unwrap()));
    }
}
