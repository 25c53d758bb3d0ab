//! File discovery and parallel execution for batch runs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;
use walkdir::WalkDir;

/// Expand `paths` into manifest files: files are taken as given,
/// directories are searched recursively for `*.mpd`.
pub fn find_manifests(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for path in paths {
        if !path.is_dir() {
            found.push(path.clone());
            continue;
        }
        let mut in_dir: Vec<PathBuf> = WalkDir::new(path)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("mpd")))
            .collect();
        in_dir.sort();
        found.extend(in_dir);
    }
    found
}

/// Run `job` on every item using at most `workers` threads (0 for one per
/// CPU). Results keep the order of `items`.
pub fn run_parallel<T, F>(items: &[PathBuf], workers: usize, job: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(&Path) -> T + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("Failed to build worker pool")?;
    Ok(pool.install(|| items.par_iter().map(|item| job(item)).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_find_manifests() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("b/nested")).unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("b/nested/two.mpd"), "").unwrap();
        fs::write(dir.path().join("a/one.MPD"), "").unwrap();
        fs::write(dir.path().join("a/track.mp4"), "").unwrap();
        let single = dir.path().join("single.xml");

        let found = find_manifests(&[dir.path().to_path_buf(), single.clone()]);
        assert_eq!(
            found,
            vec![dir.path().join("a/one.MPD"), dir.path().join("b/nested/two.mpd"), single]
        );
    }

    #[test]
    fn test_corrupt_asset_does_not_abort_batch() {
        use cmafkit_media::fixture::TrackFixture;
        use cmafkit_verify::{Badness, Verifier, VerifyOptions};

        let dir = tempfile::tempdir().unwrap();
        let tracks = [
            ("bad", TrackFixture::audio(48000, 1024).fragments(2, 4).sidx_first_offset(u64::MAX)),
            ("good", TrackFixture::audio(48000, 1024).fragments(2, 4).with_sidx()),
        ];
        for (name, fixture) in &tracks {
            let asset = dir.path().join(name);
            fs::create_dir_all(&asset).unwrap();
            fs::write(asset.join("a1.mp4"), fixture.build()).unwrap();
            fs::write(
                asset.join("manifest.mpd"),
                r#"<MPD type="static"><Period><AdaptationSet mimeType="audio/mp4"><Representation id="a1"><BaseURL>a1.mp4</BaseURL><SegmentBase indexRange="0-1"/></Representation></AdaptationSet></Period></MPD>"#,
            )
            .unwrap();
        }

        let manifests = find_manifests(&[dir.path().to_path_buf()]);
        let verifier = Verifier::new(VerifyOptions::default());
        let reports = run_parallel(&manifests, 2, |path| verifier.check_asset(path)).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].badness, Badness::OTHER);
        assert!(reports[1].is_ok(), "{}", reports[1].summary());
    }

    #[test]
    fn test_run_parallel_keeps_order() {
        let items: Vec<PathBuf> = (0..20).map(|i| PathBuf::from(format!("{}.mpd", i))).collect();
        let names = run_parallel(&items, 3, |p| p.display().to_string()).unwrap();
        assert_eq!(names[0], "0.mpd");
        assert_eq!(names[19], "19.mpd");
        assert_eq!(names.len(), 20);
    }
}
