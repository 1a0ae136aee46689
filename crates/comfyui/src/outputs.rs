//! Artifact collection from the engine's final output map.
//!
//! The output map is keyed by node id; each node's record may carry
//! `images` and `gifs` lists whose entries look like
//! `{"filename": "...", "subfolder": "...", "type": "output"|"temp"}`.
//! Only entries tagged `output` are real results; `temp` entries are
//! previews and intermediates.

use std::path::PathBuf;

use relay_core::job::Artifact;

/// Output-record keys that hold media entries.
const MEDIA_KEYS: [&str; 2] = ["images", "gifs"];

/// Tag of final (non-preview) outputs.
const OUTPUT_TAG: &str = "output";

/// How artifact paths are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMode {
    /// Absolute path: the data-volume root joined with the filename.
    DataVolume(PathBuf),
    /// `subfolder/filename`, or just `filename` when the subfolder is empty.
    Relative,
}

/// Builds artifact descriptors from an engine output map.
#[derive(Debug, Clone)]
pub struct ArtifactCollector {
    mode: PathMode,
}

impl ArtifactCollector {
    pub fn new(mode: PathMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> &PathMode {
        &self.mode
    }

    /// Collect every output-tagged media file, ordered by node id (the
    /// output map's key order), then by position within the node's list.
    ///
    /// Nodes without media and malformed entries are skipped; a bad entry
    /// never hides the valid ones around it.
    pub fn collect(&self, outputs: &serde_json::Value) -> Vec<Artifact> {
        let Some(nodes) = outputs.as_object() else {
            tracing::warn!("Engine outputs are not a JSON object, nothing to collect");
            return Vec::new();
        };

        let mut artifacts = Vec::new();
        for (node_id, record) in nodes {
            for key in MEDIA_KEYS {
                let Some(entries) = record.get(key) else {
                    continue;
                };
                let Some(entries) = entries.as_array() else {
                    tracing::warn!(node_id = %node_id, key, "Output media list is not an array");
                    continue;
                };
                for entry in entries {
                    if let Some(artifact) = self.artifact_from_entry(node_id, entry) {
                        artifacts.push(artifact);
                    }
                }
            }
        }

        tracing::info!(count = artifacts.len(), "Collected output files");
        artifacts
    }

    fn artifact_from_entry(&self, node_id: &str, entry: &serde_json::Value) -> Option<Artifact> {
        if entry.get("type").and_then(|t| t.as_str()) != Some(OUTPUT_TAG) {
            return None;
        }
        let filename = match entry.get("filename").and_then(|f| f.as_str()) {
            Some(name) if !name.is_empty() => name,
            _ => {
                tracing::warn!(node_id, entry = %entry, "Skipping output entry without filename");
                return None;
            }
        };

        let path = match &self.mode {
            PathMode::DataVolume(root) => root.join(filename).to_string_lossy().into_owned(),
            PathMode::Relative => match entry.get("subfolder").and_then(|s| s.as_str()) {
                Some(subfolder) if !subfolder.is_empty() => format!("{subfolder}/{filename}"),
                _ => filename.to_string(),
            },
        };

        Some(Artifact::new(filename, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_outputs() -> serde_json::Value {
        json!({
            "9": {
                "images": [
                    {"filename": "render_00001_.png", "subfolder": "", "type": "output"},
                    {"filename": "preview.png", "subfolder": "", "type": "temp"}
                ]
            },
            "12": {
                "gifs": [
                    {"filename": "clip_00001_.mp4", "subfolder": "videos", "type": "output", "format": "video/h264-mp4"}
                ]
            },
            "15": {"text": ["no media here"]}
        })
    }

    #[test]
    fn data_volume_mode_joins_root() {
        let collector = ArtifactCollector::new(PathMode::DataVolume(PathBuf::from("/runpod-volume/output")));
        let artifacts = collector.collect(&sample_outputs());

        assert_eq!(artifacts.len(), 2);
        let render = artifacts.iter().find(|a| a.name == "render_00001_.png").unwrap();
        assert_eq!(render.path, "/runpod-volume/output/render_00001_.png");
        assert!(!render.is_uploaded());
    }

    #[test]
    fn relative_mode_uses_subfolder_when_present() {
        let collector = ArtifactCollector::new(PathMode::Relative);
        let artifacts = collector.collect(&sample_outputs());

        let clip = artifacts.iter().find(|a| a.name == "clip_00001_.mp4").unwrap();
        assert_eq!(clip.path, "videos/clip_00001_.mp4");
        let render = artifacts.iter().find(|a| a.name == "render_00001_.png").unwrap();
        assert_eq!(render.path, "render_00001_.png");
    }

    #[test]
    fn temp_entries_are_excluded() {
        let collector = ArtifactCollector::new(PathMode::Relative);
        let artifacts = collector.collect(&sample_outputs());
        assert!(artifacts.iter().all(|a| a.name != "preview.png"));
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let outputs = json!({
            "1": {"images": "not-a-list"},
            "2": {"images": [
                {"type": "output"},
                {"filename": 7, "type": "output"},
                42,
                {"filename": "good.png", "type": "output"}
            ]},
            "3": null
        });
        let collector = ArtifactCollector::new(PathMode::Relative);
        let artifacts = collector.collect(&outputs);
        assert_eq!(artifacts, vec![Artifact::new("good.png", "good.png")]);
    }

    #[test]
    fn artifacts_follow_output_map_key_order() {
        let outputs = json!({
            "9": {"images": [{"filename": "nine.png", "type": "output"}]},
            "10": {"images": [
                {"filename": "ten_a.png", "type": "output"},
                {"filename": "ten_b.png", "type": "output"}
            ]}
        });
        let collector = ArtifactCollector::new(PathMode::Relative);
        let names: Vec<_> = collector.collect(&outputs).into_iter().map(|a| a.name).collect();

        let mut expected = Vec::new();
        for node_id in outputs.as_object().unwrap().keys() {
            match node_id.as_str() {
                "9" => expected.push("nine.png"),
                _ => expected.extend(["ten_a.png", "ten_b.png"]),
            }
        }
        assert_eq!(names, expected);
    }

    #[test]
    fn non_object_outputs_yield_nothing() {
        let collector = ArtifactCollector::new(PathMode::Relative);
        assert!(collector.collect(&json!(["x"])).is_empty());
    }
}
