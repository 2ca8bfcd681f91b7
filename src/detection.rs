/// Detection payload parser
///
/// This module parses the JSON returned by the detection endpoint, either a single
/// image result or a batch result (see `crate::batch`).
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use log::debug;
use serde::{Deserialize, Deserializer, Serialize};

use crate::batch::BatchResult;

/// Pixel size of the image as measured by the server, the coordinate basis of every bbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ImageMeta {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    #[serde(default)]
    pub width: f32,
    #[serde(default)]
    pub height: f32,
}

impl BoundingBox {
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            width: x2 - x1,
            height: y2 - y1,
        }
    }

    pub fn is_finite(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2].iter().all(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<i64>,
    #[serde(default)]
    pub class_name: String,
    #[serde(default = "missing_confidence", deserialize_with = "confidence_or_nan")]
    pub confidence: f32,
}

fn missing_confidence() -> f32 {
    f32::NAN
}

// `null` confidences are kept as NaN so the tooltip can fall back to the bare class name.
fn confidence_or_nan<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f32>::deserialize(deserializer)?.unwrap_or(f32::NAN))
}

impl Detection {
    /// Class identity used for counting and styling: the class name, or the numeric id
    /// when the server sent no name.
    pub fn class_key(&self) -> Cow<'_, str> {
        if !self.class_name.is_empty() {
            return Cow::Borrowed(self.class_name.as_str());
        }
        match self.class_id {
            Some(id) => Cow::Owned(id.to_string()),
            None => Cow::Borrowed(""),
        }
    }
}

/// Result for a single image
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DetectionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageMeta>,
    #[serde(default)]
    pub inference_ms: f64,
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub counts: HashMap<String, u32>,
    #[serde(default)]
    pub total: u32,
    /// Server-annotated JPEG, base64 encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_b64: Option<String>,
}

impl DetectionResult {
    /// Parse a result from a JSON string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, String> {
        serde_json::from_str(content)
            .map_err(|e| format!("Failed to parse detection result JSON: {}", e))
    }

    /// Check if JSON content looks like a single-image result (quick detection)
    pub fn is_result_format(content: &str) -> bool {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(content) {
            if let Some(obj) = value.as_object() {
                return obj.contains_key("detections") && !obj.contains_key("items");
            }
        }
        false
    }

    /// Drop detections with unusable boxes and repair the rest.
    /// Returns number of skipped detections and warnings
    pub fn validate_and_clean(&mut self) -> (usize, Vec<String>) {
        let mut warnings = Vec::new();

        if let Some(meta) = self.image {
            if meta.width == 0 || meta.height == 0 {
                warnings.push(format!(
                    "Image metadata is degenerate ({}x{}), boxes will be drawn unscaled",
                    meta.width, meta.height
                ));
            }
        }

        let original_count = self.detections.len();
        let mut index = 0;
        self.detections.retain_mut(|det| {
            index += 1;
            let bbox = &mut det.bbox;
            if !bbox.is_finite() {
                warnings.push(format!("Skipping detection {}: non-finite bbox", index - 1));
                return false;
            }
            if bbox.x2 < bbox.x1 || bbox.y2 < bbox.y1 {
                warnings.push(format!(
                    "Skipping detection {}: inverted bbox ({}, {}, {}, {})",
                    index - 1, bbox.x1, bbox.y1, bbox.x2, bbox.y2
                ));
                return false;
            }
            let (width, height) = (bbox.x2 - bbox.x1, bbox.y2 - bbox.y1);
            if bbox.width != width || bbox.height != height {
                debug!(
                    "Repairing bbox size of detection {}: {}x{} -> {}x{}",
                    index - 1, bbox.width, bbox.height, width, height
                );
                bbox.width = width;
                bbox.height = height;
            }
            true
        });

        if self.counts.is_empty() && !self.detections.is_empty() {
            self.counts = count_by_class(&self.detections);
            self.total = self.counts.values().sum();
        }

        let skipped_count = original_count - self.detections.len();
        (skipped_count, warnings)
    }

    /// Freeze detections and image metadata into the unit handed to the renderer
    pub fn result_set(&self) -> ResultSet {
        ResultSet::new(self.image, self.detections.clone())
    }
}

/// Count detections per class key
pub fn count_by_class(detections: &[Detection]) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for det in detections {
        *counts.entry(det.class_key().into_owned()).or_insert(0) += 1;
    }
    counts
}

/// Detections and original image metadata as one immutable, cheaply cloned unit
#[derive(Debug, Clone)]
pub struct ResultSet {
    original: Option<ImageMeta>,
    detections: Arc<[Detection]>,
}

impl Default for ResultSet {
    fn default() -> Self {
        Self::new(None, Vec::new())
    }
}

impl ResultSet {
    pub fn new(original: Option<ImageMeta>, detections: Vec<Detection>) -> Self {
        Self {
            original,
            detections: detections.into(),
        }
    }

    pub fn original(&self) -> Option<ImageMeta> {
        self.original
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    /// True when both sets share the same detections allocation and metadata
    pub fn same_as(&self, other: &ResultSet) -> bool {
        self.original == other.original && Arc::ptr_eq(&self.detections, &other.detections)
    }
}

/// Either payload shape the endpoint can return
#[derive(Debug, Clone)]
pub enum Payload {
    Single(DetectionResult),
    Batch(BatchResult),
}

impl Payload {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read payload file: {}", e))?;

        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, String> {
        if BatchResult::is_batch_format(content) {
            BatchResult::from_str(content).map(Payload::Batch)
        } else if DetectionResult::is_result_format(content) {
            DetectionResult::from_str(content).map(Payload::Single)
        } else {
            Err("JSON is neither a detection result nor a batch result".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE: &str = r#"{
        "image": {"width": 1000, "height": 500},
        "inference_ms": 42,
        "detections": [
            {
                "class_name": "0",
                "confidence": 0.91,
                "bbox": {"x1": 100.0, "y1": 50.0, "x2": 300.0, "y2": 150.0, "width": 200.0, "height": 100.0}
            },
            {
                "class_name": "2",
                "confidence": null,
                "bbox": {"x1": 10.0, "y1": 10.0, "x2": 20.0, "y2": 30.0}
            }
        ],
        "counts": {"0": 1, "2": 1},
        "total": 2
    }"#;

    #[test]
    fn test_result_parsing() {
        let result = DetectionResult::from_str(SINGLE).unwrap();
        assert_eq!(result.image, Some(ImageMeta { width: 1000, height: 500 }));
        assert_eq!(result.detections.len(), 2);
        assert_eq!(result.total, 2);
        assert!(result.image_b64.is_none());
        assert!(result.detections[1].confidence.is_nan());
        assert_eq!(result.detections[1].class_id, None);
    }

    #[test]
    fn test_format_detection() {
        assert!(DetectionResult::is_result_format(SINGLE));
        assert!(!DetectionResult::is_result_format(r#"{"items": [], "detections": []}"#));
        assert!(!DetectionResult::is_result_format(r#"{"foo": "bar"}"#));
        assert!(!DetectionResult::is_result_format("not json"));
    }

    #[test]
    fn test_validate_repairs_and_skips() {
        let mut result = DetectionResult::from_str(SINGLE).unwrap();
        result.detections.push(Detection {
            bbox: BoundingBox::from_corners(50.0, 50.0, 10.0, 60.0),
            class_id: Some(1),
            class_name: "1".to_string(),
            confidence: 0.5,
        });

        let (skipped, warnings) = result.validate_and_clean();
        assert_eq!(skipped, 1);
        assert_eq!(warnings.len(), 1);
        assert_eq!(result.detections.len(), 2);
        // Missing width/height were filled in from the corners
        assert_eq!(result.detections[1].bbox.width, 10.0);
        assert_eq!(result.detections[1].bbox.height, 20.0);
    }

    #[test]
    fn test_counts_derived_when_missing() {
        let mut result = DetectionResult::from_str(
            r#"{"detections": [
                {"class_id": 3, "confidence": 0.4, "bbox": {"x1": 0, "y1": 0, "x2": 1, "y2": 1}},
                {"class_name": "1", "confidence": 0.6, "bbox": {"x1": 0, "y1": 0, "x2": 1, "y2": 1}},
                {"class_name": "1", "confidence": 0.7, "bbox": {"x1": 0, "y1": 0, "x2": 1, "y2": 1}}
            ]}"#,
        )
        .unwrap();
        result.validate_and_clean();
        assert_eq!(result.total, 3);
        assert_eq!(result.counts.get("1"), Some(&2));
        assert_eq!(result.counts.get("3"), Some(&1));
    }

    #[test]
    fn test_result_set_identity() {
        let result = DetectionResult::from_str(SINGLE).unwrap();
        let set = result.result_set();
        let shared = set.clone();
        assert!(set.same_as(&shared));
        assert!(!set.same_as(&result.result_set()));
        assert_eq!(set.detections().len(), 2);
    }

    #[test]
    fn test_payload_dispatch() {
        assert!(matches!(Payload::from_str(SINGLE), Ok(Payload::Single(_))));
        let batch = r#"{"params": {"conf": 0.25, "imgsz": 640, "device": "cpu", "images": 0},
                        "items": [], "collection": {"counts": {}, "total": 0, "inference_ms_total": 0}}"#;
        assert!(matches!(Payload::from_str(batch), Ok(Payload::Batch(_))));
        assert!(Payload::from_str("[]").is_err());
    }

    #[test]
    fn test_payload_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        std::fs::write(&path, SINGLE).unwrap();
        match Payload::from_file(&path) {
            Ok(Payload::Single(result)) => assert_eq!(result.detections.len(), 2),
            other => panic!("unexpected payload {other:?}"),
        }
        assert!(Payload::from_file(&dir.path().join("absent.json")).is_err());
    }
}
