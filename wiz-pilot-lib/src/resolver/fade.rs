use std::time::Duration;

use crate::config::{ParameterSet, MAX_DIMMING};
use crate::resolver::EffectiveParameters;

/// A dimming ramp expressed as a sequence of timed parameter sets.
///
/// Frame `i` is due at `i * interval`. The first frame carries the starting
/// dimming, the last one carries the target; nothing between overshoots it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FadeSequence {
    frames: Vec<(Duration, ParameterSet)>,
}

impl FadeSequence {
    /// A `step` of zero is treated as one.
    pub fn new(
        start: &EffectiveParameters,
        target_dimming: u8,
        step: u8,
        interval: Duration,
    ) -> Self {
        let step = i16::from(step.max(1));
        let target = i16::from(target_dimming.min(MAX_DIMMING));
        let mut level = i16::from(start.params.dimming.unwrap_or(MAX_DIMMING));

        let mut frames = Vec::new();
        let mut offset = Duration::ZERO;
        loop {
            frames.push((offset, start.params.with_dimming(level as u8)));
            if level == target {
                break;
            }
            level = if level > target {
                (level - step).max(target)
            } else {
                (level + step).min(target)
            };
            offset += interval;
        }

        FadeSequence { frames }
    }

    pub fn frames(&self) -> &[(Duration, ParameterSet)] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
