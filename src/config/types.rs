use cmafkit_media::ResegmentOptions;
use cmafkit_verify::{Tolerances, VerifyOptions};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub resegment: ResegmentConfig,

    #[serde(default)]
    pub verify: VerifyConfig,

    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ResegmentConfig {
    /// Minimum duration of every output segment but the last
    #[serde(default = "default_target_ms")]
    pub target_ms: u64,

    /// Write a `sidx` in front of the segments
    #[serde(default = "default_true")]
    pub write_sidx: bool,

    /// Copy a file to `<file>_bup` before overwriting it in place
    #[serde(default = "default_true")]
    pub backup: bool,
}

impl Default for ResegmentConfig {
    fn default() -> Self {
        Self {
            target_ms: default_target_ms(),
            write_sidx: true,
            backup: true,
        }
    }
}

impl ResegmentConfig {
    pub fn options(&self) -> ResegmentOptions {
        ResegmentOptions {
            target_ms: self.target_ms,
            write_sidx: self.write_sidx,
        }
    }
}

fn default_target_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

/// Tolerances between adaptation sets, in seconds. Exceeding them is only
/// reported as a warning.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VerifyConfig {
    #[serde(default = "default_total_tolerance")]
    pub total_duration_tolerance_secs: f64,

    #[serde(default = "default_segment_tolerance")]
    pub segment_duration_tolerance_secs: f64,

    #[serde(default = "default_segment_tolerance")]
    pub average_duration_tolerance_secs: f64,

    #[serde(default = "default_max_video_sets")]
    pub max_video_adaptation_sets: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            total_duration_tolerance_secs: default_total_tolerance(),
            segment_duration_tolerance_secs: default_segment_tolerance(),
            average_duration_tolerance_secs: default_segment_tolerance(),
            max_video_adaptation_sets: default_max_video_sets(),
        }
    }
}

impl VerifyConfig {
    pub fn options(&self) -> VerifyOptions {
        VerifyOptions {
            tolerances: Tolerances {
                total_duration: self.total_duration_tolerance_secs,
                segment_duration: self.segment_duration_tolerance_secs,
                average_duration: self.average_duration_tolerance_secs,
            },
            max_video_adaptation_sets: self.max_video_adaptation_sets,
        }
    }
}

fn default_total_tolerance() -> f64 {
    0.3
}

fn default_segment_tolerance() -> f64 {
    0.05
}

fn default_max_video_sets() -> usize {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BatchConfig {
    /// Worker threads for batch runs; 0 uses one per CPU
    #[serde(default)]
    pub workers: usize,
}
