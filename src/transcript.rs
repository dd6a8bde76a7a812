//! Transcription result model
//!
//! A [`TranscriptionResult`] is what one engine invocation produced, already
//! mapped back onto the timeline of the submitted audio. Its `full_text` is
//! never stored: it is always derived from the segments.

use log::debug;

/// A word inside a segment
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    /// Surface form as emitted by the engine
    pub text: String,
    /// Confidence in `[0, 1]`
    pub probability: f32,
}

/// Word-level detail of a segment
///
/// Engines state explicitly whether they produced word timings. A segment with
/// `Available(vec![])` had word timing enabled but no words, which is normal
/// for segments that are mostly silence.
#[derive(Debug, Clone, PartialEq)]
pub enum WordDetail {
    Available(Vec<Word>),
    Unavailable,
}

impl WordDetail {
    /// Words of the segment, empty when the engine produced none
    pub fn words(&self) -> &[Word] {
        match self {
            WordDetail::Available(words) => words,
            WordDetail::Unavailable => &[],
        }
    }
}

/// A contiguous span of recognized speech
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    pub text: String,
    pub words: WordDetail,
}

impl Segment {
    /// Absorb `other`, which starts within this segment
    fn merge(&mut self, other: Segment) {
        self.end = self.end.max(other.end);
        let text = other.text.trim();
        if !text.is_empty() {
            self.text = format!("{} {}", self.text.trim_end(), text);
        }
        if let (WordDetail::Available(words), WordDetail::Available(more)) =
            (&mut self.words, other.words)
        {
            words.extend(more);
            words.sort_by(|a, b| a.start.total_cmp(&b.start));
        }
    }
}

/// Output of one transcription, on the original audio timeline
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionResult {
    segments: Vec<Segment>,
    language: Option<String>,
    language_probability: f32,
    duration: f64,
}

impl TranscriptionResult {
    /// Build a result, putting segments in strictly increasing start order
    ///
    /// A segment lying inside its predecessor, or starting at the same time,
    /// is merged into it. A segment that only overlaps the end of its
    /// predecessor is moved to start where the predecessor ends.
    pub fn new(
        mut segments: Vec<Segment>,
        language: Option<String>,
        language_probability: f32,
        duration: f64,
    ) -> Self {
        segments.sort_by(|a, b| a.start.total_cmp(&b.start));

        let mut ordered: Vec<Segment> = Vec::with_capacity(segments.len());
        for mut segment in segments {
            let Some(previous) = ordered.last_mut() else {
                ordered.push(segment);
                continue;
            };
            if segment.end <= previous.end || segment.start <= previous.start {
                debug!(
                    "Merging segment {:.3}s-{:.3}s into {:.3}s-{:.3}s",
                    segment.start, segment.end, previous.start, previous.end
                );
                previous.merge(segment);
                continue;
            }
            if segment.start < previous.end {
                debug!(
                    "Clamping overlapping segment start {:.3}s to {:.3}s",
                    segment.start, previous.end
                );
                segment.start = previous.end;
            }
            ordered.push(segment);
        }

        Self {
            segments: ordered,
            language,
            language_probability,
            duration,
        }
    }

    /// Result for audio in which no speech was found
    pub fn empty(duration: f64) -> Self {
        Self::new(Vec::new(), None, 0.0, duration)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Detected language code, `None` when nothing was transcribed
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn language_probability(&self) -> f32 {
        self.language_probability
    }

    /// Duration of the submitted audio in seconds
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Segment texts, each trimmed, joined by single spaces in segment order
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|segment| segment.text.trim())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
