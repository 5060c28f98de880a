//! Size-bounded compression policy.
//!
//! The policy is kept apart from the codec so the step sequence and the
//! attempt bound can be reasoned about (and tested) without encoding images.
//!
//! Order is strict: quality drops first, in fixed steps, down to its floor;
//! only then does the width shrink, by a fixed percentage, down to its floor.

/// One encoder setting: lossy quality and target width in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionStep {
    pub quality: u8,
    pub width: u32,
}

/// Parameters of the iterative reduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionPlan {
    /// Output size ceiling in bytes.
    pub max_bytes: usize,
    /// Quality floor.
    pub min_quality: u8,
    /// Amount quality drops per step.
    pub quality_step: u8,
    /// Width floor. Images already narrower are never touched.
    pub min_width: u32,
    /// Width kept per width step, in percent (90 = shrink by 10%).
    pub width_keep_percent: u32,
    /// Total encode attempts allowed, the first one included.
    pub max_attempts: u32,
}

impl Default for CompressionPlan {
    fn default() -> Self {
        Self {
            max_bytes: 2 * 1024 * 1024, // 2 MiB
            min_quality: 60,
            quality_step: 5,
            min_width: 1280,
            width_keep_percent: 90,
            max_attempts: 20,
        }
    }
}

/// Output of [`CompressionPlan::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionResult {
    pub bytes: Vec<u8>,
    /// Setting that produced `bytes`.
    pub step: CompressionStep,
    /// Number of encodes performed.
    pub attempts: u32,
    pub within_budget: bool,
}

impl CompressionPlan {
    /// The setting to try after `current`, or `None` once both floors are hit.
    pub fn next(&self, current: CompressionStep) -> Option<CompressionStep> {
        if current.quality > self.min_quality {
            let quality = current
                .quality
                .saturating_sub(self.quality_step)
                .max(self.min_quality);
            return Some(CompressionStep { quality, ..current });
        }

        if current.width > self.min_width {
            let scaled = (current.width as u64 * self.width_keep_percent as u64 + 50) / 100;
            // Tiny widths can round back to themselves; always make progress.
            let scaled = (scaled as u32).min(current.width - 1);
            let width = scaled.max(self.min_width);
            return Some(CompressionStep { width, ..current });
        }

        None
    }

    /// Encode at `start`, then keep stepping down until the output fits
    /// `max_bytes`, the plan runs out of steps, or `max_attempts` encodes
    /// have been made.
    ///
    /// When nothing fits, the smallest output seen is returned rather than
    /// the last one; the two differ whenever the codec output is not
    /// monotonic in quality/width.
    pub fn run<E>(
        &self,
        start: CompressionStep,
        mut encode: impl FnMut(CompressionStep) -> Result<Vec<u8>, E>,
    ) -> Result<CompressionResult, E> {
        let first = encode(start)?;
        let mut attempts = 1;
        let mut best = (first, start);
        let mut step = start;

        while best.0.len() > self.max_bytes && attempts < self.max_attempts {
            let Some(next) = self.next(step) else {
                break;
            };
            step = next;

            let bytes = encode(step)?;
            attempts += 1;
            if bytes.len() < best.0.len() {
                best = (bytes, step);
            }
        }

        let (bytes, step) = best;
        Ok(CompressionResult {
            within_budget: bytes.len() <= self.max_bytes,
            bytes,
            step,
            attempts,
        })
    }
}
