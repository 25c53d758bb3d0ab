//! Per-asset conformance verification.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use cmafkit_media::TrackModel;
use tracing::{error, info, warn};

use crate::checks::{check_track, count_misaligned, inter_set_warnings, Tolerances};
use crate::manifest::{MediaType, Mpd};
use crate::timeline::Timeline;
use crate::{Badness, Result, VerifyError};

/// Where manifests and track files come from.
pub trait TrackSource {
    fn read_manifest(&self, path: &Path) -> Result<String>;
    fn read_track(&self, path: &Path) -> Result<Vec<u8>>;
}

/// Reads from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSource;

impl TrackSource for FsSource {
    fn read_manifest(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path).map_err(|e| VerifyError::io(path, e))
    }

    fn read_track(&self, path: &Path) -> Result<Vec<u8>> {
        std::fs::read(path).map_err(|e| VerifyError::io(path, e))
    }
}

/// In-memory files keyed by path.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: HashMap<PathBuf, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) -> &mut Self {
        self.files.insert(path.into(), data.into());
        self
    }

    fn get(&self, path: &Path) -> Result<&[u8]> {
        self.files.get(path).map(Vec::as_slice).ok_or_else(|| {
            VerifyError::io(path, std::io::Error::from(std::io::ErrorKind::NotFound))
        })
    }
}

impl TrackSource for MemorySource {
    fn read_manifest(&self, path: &Path) -> Result<String> {
        let data = self.get(path)?;
        String::from_utf8(data.to_vec())
            .map_err(|e| VerifyError::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }

    fn read_track(&self, path: &Path) -> Result<Vec<u8>> {
        self.get(path).map(<[u8]>::to_vec)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerifyOptions {
    pub tolerances: Tolerances,
    /// More video adaptation sets than this is logged as a warning.
    pub max_video_adaptation_sets: usize,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            tolerances: Tolerances::default(),
            max_video_adaptation_sets: 1,
        }
    }
}

/// Outcome of checking one manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetReport {
    pub path: PathBuf,
    pub badness: Badness,
    /// Cross adaptation set findings. Informational only.
    pub warnings: usize,
}

impl AssetReport {
    pub fn is_ok(&self) -> bool {
        self.badness.is_empty()
    }

    /// One line for the batch output.
    pub fn summary(&self) -> String {
        if self.is_ok() {
            format!("Asset {} is OK", self.path.display())
        } else {
            format!(
                "Asset {} has badness {}: {}",
                self.path.display(),
                self.badness.bits(),
                self.badness.describe()
            )
        }
    }
}

impl VerifyError {
    /// Category an error counts as when it ends the check of an asset.
    pub fn badness(&self) -> Badness {
        match self {
            VerifyError::ManifestStructure(_) | VerifyError::UnsupportedUrl(_) => Badness::MANIFEST,
            _ => Badness::OTHER,
        }
    }
}

struct AssetChecks {
    badness: Badness,
    warnings: usize,
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Checks DASH-OnDemand assets read through a [`TrackSource`].
pub struct Verifier<S = FsSource> {
    source: S,
    options: VerifyOptions,
}

impl Verifier<FsSource> {
    pub fn new(options: VerifyOptions) -> Self {
        Self::with_source(FsSource, options)
    }
}

impl<S: TrackSource> Verifier<S> {
    pub fn with_source(source: S, options: VerifyOptions) -> Self {
        Self { source, options }
    }

    /// Check one manifest and all its audio and video tracks.
    ///
    /// Never fails: an error ends the check of this asset and is reported
    /// as [`Badness::MANIFEST`] or [`Badness::OTHER`].
    pub fn check_asset(&self, mpd_path: &Path) -> AssetReport {
        let (badness, warnings) = match self.run_checks(mpd_path) {
            Ok(checks) => (checks.badness, checks.warnings),
            Err(e) => {
                error!("{}: {}", mpd_path.display(), e);
                (e.badness(), 0)
            }
        };

        let report = AssetReport {
            path: mpd_path.to_path_buf(),
            badness,
            warnings,
        };
        if report.is_ok() {
            info!("{}", report.summary());
        } else {
            error!("{}", report.summary());
        }
        report
    }

    fn run_checks(&self, mpd_path: &Path) -> Result<AssetChecks> {
        let xml = self.source.read_manifest(mpd_path)?;
        let mpd = Mpd::parse(&xml)?;
        mpd.validate()?;

        let manifest_dir = mpd_path.parent().unwrap_or_else(|| Path::new(""));
        let groups = mpd.track_groups(manifest_dir)?;

        let video_sets = groups.iter().filter(|g| g.media_type == MediaType::Video).count();
        if video_sets > self.options.max_video_adaptation_sets {
            warn!(
                "{}: {} video adaptation sets, expected at most {}",
                mpd_path.display(),
                video_sets,
                self.options.max_video_adaptation_sets
            );
        }

        let mut badness = Badness::empty();
        let mut set_durations = Vec::new();
        for (nr, group) in groups.iter().enumerate() {
            info!(
                "checking adaptation set {} ({} files)",
                nr + 1,
                group.paths.len()
            );

            let mut track_durations = Vec::new();
            let mut timescales: Option<(u32, Option<u32>)> = None;
            for (i, path) in group.paths.iter().enumerate() {
                let name = display_name(path);
                let data = self.source.read_track(path)?;
                let model = TrackModel::extract(&data)?;
                if model.fragments.is_empty() {
                    return Err(VerifyError::EmptyTrack(path.clone()));
                }

                let fragments = Timeline::from_fragments(&model);
                let index = model.index.as_ref().map(Timeline::from_index);

                let this = (fragments.timescale, index.as_ref().map(|t| t.timescale));
                match timescales {
                    None => timescales = Some(this),
                    Some((track, sidx)) => {
                        if this.0 != track {
                            return Err(VerifyError::TimescaleMismatch {
                                path: path.clone(),
                                what: "track",
                                found: this.0,
                                expected: track,
                            });
                        }
                        if let (Some(found), Some(expected)) = (this.1, sidx) {
                            if found != expected {
                                return Err(VerifyError::TimescaleMismatch {
                                    path: path.clone(),
                                    what: "sidx",
                                    found,
                                    expected,
                                });
                            }
                        }
                    }
                }
                info!(
                    "representation {} of {}: {} timescale={} sidx_timescale={:?}",
                    i + 1,
                    group.paths.len(),
                    path.display(),
                    fragments.timescale,
                    this.1
                );

                badness |= check_track(&name, &fragments, index.as_ref());
                if i == 0 {
                    set_durations.push((name.clone(), fragments.durations_secs()));
                }
                track_durations.push((name, fragments.durations()));
            }

            if count_misaligned(&track_durations) > 0 {
                badness |= Badness::ALIGNMENT;
            }
        }

        let warnings = inter_set_warnings(&set_durations, &self.options.tolerances);
        if warnings > 0 {
            warn!(
                "{}: {} warnings on alignment between adaptation sets",
                mpd_path.display(),
                warnings
            );
        }

        Ok(AssetChecks { badness, warnings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmafkit_media::fixture::TrackFixture;

    fn manifest(reps: &[(&str, &str)]) -> String {
        let reps: String = reps
            .iter()
            .map(|(id, url)| {
                format!(
                    r#"<Representation id="{}"><BaseURL>{}</BaseURL><SegmentBase indexRange="0-1"/></Representation>"#,
                    id, url
                )
            })
            .collect();
        format!(
            r#"<MPD type="static"><Period><AdaptationSet mimeType="audio/mp4">{}</AdaptationSet></Period></MPD>"#,
            reps
        )
    }

    #[test]
    fn test_conformant_asset() {
        let track = TrackFixture::audio(48000, 1024).fragments(3, 94).with_sidx().build();
        let mut source = MemorySource::new();
        source
            .insert("asset/a.mpd", manifest(&[("a1", "a1.mp4")]))
            .insert("asset/a1.mp4", track);

        let report = Verifier::with_source(source, VerifyOptions::default()).check_asset(Path::new("asset/a.mpd"));
        assert!(report.is_ok(), "{}", report.summary());
        assert_eq!(report.summary(), "Asset asset/a.mpd is OK");
    }

    #[test]
    fn test_missing_track_is_other() {
        let mut source = MemorySource::new();
        source.insert("a.mpd", manifest(&[("a1", "missing.mp4")]));
        let report = Verifier::with_source(source, VerifyOptions::default()).check_asset(Path::new("a.mpd"));
        assert_eq!(report.badness, Badness::OTHER);
        assert_eq!(report.summary(), "Asset a.mpd has badness 128: other problem");
    }

    #[test]
    fn test_timescale_mismatch_is_other() {
        let mut source = MemorySource::new();
        source
            .insert("a.mpd", manifest(&[("a1", "a1.mp4"), ("a2", "a2.mp4")]))
            .insert("a1.mp4", TrackFixture::audio(48000, 1024).fragments(2, 4).with_sidx().build())
            .insert("a2.mp4", TrackFixture::audio(44100, 1024).fragments(2, 4).with_sidx().build());
        let report = Verifier::with_source(source, VerifyOptions::default()).check_asset(Path::new("a.mpd"));
        assert_eq!(report.badness, Badness::OTHER);
    }

    #[test]
    fn test_corrupt_index_does_not_stop_other_assets() {
        let good = TrackFixture::audio(48000, 1024).fragments(2, 4).with_sidx().build();
        let broken = TrackFixture::audio(48000, 1024)
            .fragments(2, 4)
            .sidx_first_offset(u64::MAX)
            .build();
        let mut source = MemorySource::new();
        source
            .insert("bad/a.mpd", manifest(&[("a1", "a1.mp4")]))
            .insert("bad/a1.mp4", broken)
            .insert("good/a.mpd", manifest(&[("a1", "a1.mp4")]))
            .insert("good/a1.mp4", good);

        let verifier = Verifier::with_source(source, VerifyOptions::default());
        let reports: Vec<_> = ["bad/a.mpd", "good/a.mpd"]
            .iter()
            .map(|p| verifier.check_asset(Path::new(p)))
            .collect();
        assert_eq!(reports[0].badness, Badness::OTHER);
        assert!(reports[1].is_ok(), "{}", reports[1].summary());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(VerifyError::manifest("x").badness(), Badness::MANIFEST);
        assert_eq!(VerifyError::EmptyTrack(PathBuf::from("t")).badness(), Badness::OTHER);
    }
}
