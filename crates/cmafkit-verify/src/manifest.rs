//! The subset of a DASH MPD that on-demand verification reads.
//!
//! Deserialized with `quick_xml::de`; attributes are `@name` fields and
//! element text is `$text`. Unknown elements and attributes are ignored.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::{Result, VerifyError};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BaseUrl {
    #[serde(rename = "$text", default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SegmentBase {
    #[serde(rename = "@indexRange")]
    pub index_range: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Representation {
    #[serde(rename = "@id")]
    pub id: Option<String>,
    #[serde(rename = "@mimeType")]
    pub mime_type: Option<String>,
    #[serde(rename = "BaseURL", default)]
    pub base_url: Vec<BaseUrl>,
    #[serde(rename = "SegmentBase")]
    pub segment_base: Option<SegmentBase>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdaptationSet {
    #[serde(rename = "@mimeType")]
    pub mime_type: Option<String>,
    #[serde(rename = "BaseURL", default)]
    pub base_url: Vec<BaseUrl>,
    #[serde(rename = "Representation", default)]
    pub representations: Vec<Representation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Period {
    #[serde(rename = "AdaptationSet", default)]
    pub adaptation_sets: Vec<AdaptationSet>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Mpd {
    #[serde(rename = "@type")]
    pub mpd_type: Option<String>,
    #[serde(rename = "BaseURL", default)]
    pub base_url: Vec<BaseUrl>,
    #[serde(rename = "Period", default)]
    pub periods: Vec<Period>,
}

/// Kind of media a representation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Video,
    Audio,
    /// Side-loaded subtitles (WebVTT, TTML, SRT). Not checked for timing.
    Text,
}

impl MediaType {
    pub fn from_mime_type(mime_type: &str) -> Result<Self> {
        match mime_type {
            m if m.starts_with("video") => Ok(Self::Video),
            m if m.starts_with("audio") => Ok(Self::Audio),
            "text/vtt" | "text/wvtt" | "text/srt" | "application/ttml+xml" => Ok(Self::Text),
            "application/mp4" => Err(VerifyError::manifest(
                "mime type application/mp4 is not supported, use side-loaded text files for subtitles",
            )),
            other => Err(VerifyError::manifest(format!("unrecognized mime type {}", other))),
        }
    }
}

impl Representation {
    fn label(&self) -> &str {
        self.id.as_deref().unwrap_or("<no id>")
    }

    /// Media type from the representation's mime type, else the set's.
    pub fn media_type(&self, set: &AdaptationSet) -> Result<MediaType> {
        let mime_type = self
            .mime_type
            .as_deref()
            .or(set.mime_type.as_deref())
            .ok_or_else(|| VerifyError::manifest(format!("representation id={} lacks mime type", self.label())))?;
        MediaType::from_mime_type(mime_type)
    }
}

/// The track files of one adaptation set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackGroup {
    pub media_type: MediaType,
    pub paths: Vec<PathBuf>,
}

fn join_url(base: &Path, url: &BaseUrl) -> Result<PathBuf> {
    let url = url.url.trim();
    if url.contains("://") {
        return Err(VerifyError::UnsupportedUrl(url.to_string()));
    }
    Ok(base.join(url))
}

impl Mpd {
    pub fn parse(xml: &str) -> Result<Self> {
        Ok(quick_xml::de::from_str(xml)?)
    }

    /// Check that the manifest is a single-period static on-demand
    /// presentation addressed by `BaseURL` + `SegmentBase@indexRange`.
    pub fn validate(&self) -> Result<()> {
        // A missing type attribute defaults to static.
        if let Some(t) = self.mpd_type.as_deref() {
            if t != "static" {
                return Err(VerifyError::manifest(format!("MPD type is {}, not static", t)));
            }
        }
        if self.periods.len() != 1 {
            return Err(VerifyError::manifest(format!(
                "exactly one Period is supported, found {}",
                self.periods.len()
            )));
        }

        for set in &self.periods[0].adaptation_sets {
            for rep in &set.representations {
                if rep.id.as_deref().map_or(true, str::is_empty) {
                    return Err(VerifyError::manifest("representation without id attribute"));
                }
                if rep.base_url.is_empty() {
                    return Err(VerifyError::manifest(format!(
                        "representation id={} has no BaseURL",
                        rep.label()
                    )));
                }
                if rep.media_type(set)? == MediaType::Text {
                    continue;
                }
                match &rep.segment_base {
                    None => {
                        return Err(VerifyError::manifest(format!(
                            "representation id={} has no SegmentBase",
                            rep.label()
                        )))
                    }
                    Some(SegmentBase { index_range: None }) => {
                        return Err(VerifyError::manifest(format!(
                            "representation id={} has no SegmentBase@indexRange",
                            rep.label()
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Track paths per audio/video adaptation set, resolved against
    /// `manifest_dir` and the MPD and adaptation set `BaseURL`s.
    ///
    /// Call after [`Mpd::validate`].
    pub fn track_groups(&self, manifest_dir: &Path) -> Result<Vec<TrackGroup>> {
        let mpd_base = match self.base_url.first() {
            Some(url) => join_url(manifest_dir, url)?,
            None => manifest_dir.to_path_buf(),
        };

        let mut groups = Vec::new();
        for set in self.periods.iter().flat_map(|p| &p.adaptation_sets) {
            let Some(first) = set.representations.first() else {
                continue;
            };
            let media_type = first.media_type(set)?;
            if media_type == MediaType::Text {
                debug!("skipping text adaptation set");
                continue;
            }
            let set_base = match set.base_url.first() {
                Some(url) => join_url(&mpd_base, url)?,
                None => mpd_base.clone(),
            };
            let paths = set
                .representations
                .iter()
                .map(|rep| match rep.base_url.first() {
                    Some(url) => join_url(&set_base, url),
                    None => Err(VerifyError::manifest(format!(
                        "representation id={} has no BaseURL",
                        rep.label()
                    ))),
                })
                .collect::<Result<Vec<_>>>()?;
            groups.push(TrackGroup { media_type, paths });
        }
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ON_DEMAND: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" profiles="urn:mpeg:dash:profile:isoff-on-demand:2011">
  <BaseURL>media/</BaseURL>
  <Period id="p0">
    <AdaptationSet mimeType="video/mp4" segmentAlignment="true">
      <Representation id="v1" bandwidth="500000">
        <BaseURL>v1.mp4</BaseURL>
        <SegmentBase indexRange="800-900"/>
      </Representation>
      <Representation id="v2" bandwidth="900000">
        <BaseURL>v2.mp4</BaseURL>
        <SegmentBase indexRange="800-900"/>
      </Representation>
    </AdaptationSet>
    <AdaptationSet lang="en">
      <BaseURL>audio/</BaseURL>
      <Representation id="a1" mimeType="audio/mp4">
        <BaseURL>a1.mp4</BaseURL>
        <SegmentBase indexRange="700-780"/>
      </Representation>
    </AdaptationSet>
    <AdaptationSet mimeType="text/vtt" lang="sv">
      <Representation id="s1">
        <BaseURL>sub_sv.vtt</BaseURL>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn test_valid_on_demand_manifest() {
        let mpd = Mpd::parse(ON_DEMAND).unwrap();
        mpd.validate().unwrap();
        let groups = mpd.track_groups(Path::new("/assets/a")).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].media_type, MediaType::Video);
        assert_eq!(
            groups[0].paths,
            vec![PathBuf::from("/assets/a/media/v1.mp4"), PathBuf::from("/assets/a/media/v2.mp4")]
        );
        assert_eq!(groups[1].paths, vec![PathBuf::from("/assets/a/media/audio/a1.mp4")]);
    }

    #[test]
    fn test_dynamic_manifest_rejected() {
        let xml = ON_DEMAND.replace(r#"type="static""#, r#"type="dynamic""#);
        let err = Mpd::parse(&xml).unwrap().validate().unwrap_err();
        assert!(matches!(err, VerifyError::ManifestStructure(_)));
    }

    #[test]
    fn test_missing_type_is_static() {
        let xml = ON_DEMAND.replace(r#"type="static""#, "");
        Mpd::parse(&xml).unwrap().validate().unwrap();
    }

    #[test]
    fn test_missing_index_range_rejected() {
        let xml = ON_DEMAND.replace(r#"<SegmentBase indexRange="700-780"/>"#, "<SegmentBase/>");
        let err = Mpd::parse(&xml).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("indexRange"), "{}", err);
    }

    #[test]
    fn test_two_periods_rejected() {
        let xml = ON_DEMAND.replace("</Period>", "</Period><Period id=\"p1\"/>");
        assert!(Mpd::parse(&xml).unwrap().validate().is_err());
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(MediaType::from_mime_type("audio/mp4").unwrap(), MediaType::Audio);
        assert_eq!(MediaType::from_mime_type("application/ttml+xml").unwrap(), MediaType::Text);
        assert!(MediaType::from_mime_type("application/mp4").is_err());
        assert!(MediaType::from_mime_type("image/png").is_err());
    }

    #[test]
    fn test_remote_base_url_unsupported() {
        let xml = ON_DEMAND.replace("<BaseURL>media/</BaseURL>", "<BaseURL>https://cdn.example.com/</BaseURL>");
        let mpd = Mpd::parse(&xml).unwrap();
        assert!(matches!(
            mpd.track_groups(Path::new(".")),
            Err(VerifyError::UnsupportedUrl(_))
        ));
    }
}
