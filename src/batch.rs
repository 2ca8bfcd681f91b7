/// Batch results and paginated review
use std::collections::HashMap;
use std::ops::Range;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::detection::DetectionResult;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BatchParams {
    #[serde(default)]
    pub conf: f32,
    #[serde(default)]
    pub imgsz: u32,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub images: u32,
}

/// One image of a batch. Failed images carry `error` and usually no detections.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BatchItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub result: DetectionResult,
}

impl BatchItem {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CollectionSummary {
    #[serde(default)]
    pub counts: HashMap<String, u32>,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub inference_ms_total: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BatchResult {
    #[serde(default)]
    pub params: BatchParams,
    #[serde(default)]
    pub items: Vec<BatchItem>,
    #[serde(default)]
    pub collection: CollectionSummary,
}

impl BatchResult {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, String> {
        serde_json::from_str(content)
            .map_err(|e| format!("Failed to parse batch result JSON: {}", e))
    }

    /// Check if JSON content looks like a batch result (quick detection)
    pub fn is_batch_format(content: &str) -> bool {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(content) {
            if let Some(obj) = value.as_object() {
                return obj.get("items").map_or(false, |items| items.is_array());
            }
        }
        false
    }

    /// Validate every item; returns total skipped detections and warnings prefixed
    /// with the item name
    pub fn validate_and_clean(&mut self) -> (usize, Vec<String>) {
        let mut skipped = 0;
        let mut warnings = Vec::new();
        for item in &mut self.items {
            let (item_skipped, item_warnings) = item.result.validate_and_clean();
            skipped += item_skipped;
            warnings.extend(item_warnings.into_iter().map(|w| format!("{}: {}", item.name, w)));
        }
        (skipped, warnings)
    }

    /// Rebuild the collection summary from the items, skipping failed ones
    pub fn recompute_collection(&mut self) {
        let mut collection = CollectionSummary::default();
        for item in self.items.iter().filter(|item| item.is_ok()) {
            merge_counts(&mut collection.counts, &item.result.counts);
            collection.inference_ms_total += item.result.inference_ms;
        }
        collection.total = collection.counts.values().sum();
        debug!(
            "Recomputed collection: {} classes, {} detections",
            collection.counts.len(),
            collection.total
        );
        self.collection = collection;
    }

    pub fn failed_items(&self) -> impl Iterator<Item = &BatchItem> {
        self.items.iter().filter(|item| !item.is_ok())
    }
}

/// Add `src` counts into `dst`
pub fn merge_counts(dst: &mut HashMap<String, u32>, src: &HashMap<String, u32>) {
    for (class, count) in src {
        *dst.entry(class.clone()).or_insert(0) += count;
    }
}

/// `"<count> <class>"` lines, most frequent first, ties by class name
pub fn summary_lines(counts: &HashMap<String, u32>) -> Vec<String> {
    let mut sorted: Vec<_> = counts.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    sorted
        .into_iter()
        .map(|(class, count)| format!("{} {}", count, class))
        .collect()
}

/// Zero-based page cursor over a list of items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    page_size: usize,
    page: usize,
}

impl Pagination {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            page: 0,
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Always at least one page, even for an empty list
    pub fn page_count(&self, total: usize) -> usize {
        total.div_ceil(self.page_size).max(1)
    }

    pub fn set_page(&mut self, page: usize, total: usize) {
        self.page = page.min(self.page_count(total) - 1);
    }

    /// Returns false when already on the last page
    pub fn next(&mut self, total: usize) -> bool {
        if self.page + 1 < self.page_count(total) {
            self.page += 1;
            true
        } else {
            false
        }
    }

    /// Returns false when already on the first page
    pub fn prev(&mut self) -> bool {
        if self.page > 0 {
            self.page -= 1;
            true
        } else {
            false
        }
    }

    pub fn range(&self, total: usize) -> Range<usize> {
        let start = (self.page * self.page_size).min(total);
        let end = (start + self.page_size).min(total);
        start..end
    }

    pub fn page_items<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        &items[self.range(items.len())]
    }
}
