//! Sentiment scoring of event text.

use tracing::debug;

use crate::core::timeline::{Timeline, TimelineError};
use crate::schema::event::EventId;

/// An external sentiment analyser.
///
/// Returns a score in `[0, 1]` (0 negative, 1 positive), or `None` when the
/// analyser is unavailable or fails. `None` is not an error.
pub trait SentimentScorer {
    fn score(&self, text: &str) -> Option<f64>;
}

impl<F> SentimentScorer for F
where
    F: Fn(&str) -> Option<f64>,
{
    fn score(&self, text: &str) -> Option<f64> {
        self(text)
    }
}

/// Coarse reading of a sentiment score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn from_score(score: f64) -> Self {
        if score > 0.6 {
            Self::Positive
        } else if score < 0.4 {
            Self::Negative
        } else {
            Self::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }
}

impl Timeline {
    /// Record a sentiment score on an event, replacing any earlier one.
    ///
    /// Scores are clamped to `[0, 1]`; NaN and infinities are rejected.
    pub fn set_sentiment(&mut self, id: &EventId, score: f64) -> Result<(), TimelineError> {
        if !score.is_finite() {
            return Err(TimelineError::InvalidSentiment(score));
        }
        let event = self
            .events
            .get_mut(id)
            .ok_or_else(|| TimelineError::EventNotFound(id.clone()))?;
        event.sentiment = Some(score.clamp(0.0, 1.0));
        self.mark_dirty();
        Ok(())
    }

    /// Score an event's text and store the result.
    ///
    /// Returns `Ok(None)` when the event has no text or the scorer gives no
    /// finite answer; the stored score is then left as it was.
    pub fn analyze_sentiment(
        &mut self,
        id: &EventId,
        scorer: &dyn SentimentScorer,
    ) -> Result<Option<f64>, TimelineError> {
        let event = self
            .get_event(id)
            .ok_or_else(|| TimelineError::EventNotFound(id.clone()))?;
        let Some(score) = event
            .text()
            .filter(|t| !t.trim().is_empty())
            .and_then(|t| scorer.score(t))
            .filter(|score| score.is_finite())
        else {
            debug!(event = %id, "sentiment unavailable");
            return Ok(None);
        };
        self.set_sentiment(id, score)?;
        Ok(Some(score.clamp(0.0, 1.0)))
    }
}
