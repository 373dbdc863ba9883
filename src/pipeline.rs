//! Scan pipeline
//!
//! Capture → binarize → recognize → match, shared by the manual single-shot
//! path and the auto-capture loop. Both paths use the same recognition
//! adapter, so the engine is constructed once per session.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::capture::{capture_region, CaptureSettings, DisplayRect, NormalizedRegion, VideoFrame};
use crate::matching::{MatchGate, SkillPair, Vocabularies, WaitDetector};
use crate::storage::{RecordError, RecordRef, RecordStore};
use crate::vision::{PercentCallback, Preprocessor, RecognitionAdapter, RecognitionError};

/// Where to sample and which table results belong to
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureTarget {
    pub region: NormalizedRegion,
    pub display: DisplayRect,
    pub table_key: String,
}

impl CaptureTarget {
    pub fn new(region: NormalizedRegion, display: DisplayRect, table_key: impl Into<String>) -> Self {
        Self {
            region,
            display,
            table_key: table_key.into(),
        }
    }
}

/// Result of a manual single-shot scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub raw_text: String,
    /// Placeholder text; `pair` is not computed
    pub waiting: bool,
    pub pair: Option<SkillPair>,
}

/// What a manual capture did to the record store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualAction {
    Created(RecordRef),
    Updated { id: String },
}

/// The shared capture-to-match chain
pub struct ScanPipeline {
    capture: CaptureSettings,
    preprocessor: Preprocessor,
    adapter: Arc<RecognitionAdapter>,
    vocabularies: Vocabularies,
    wait: WaitDetector,
    gate: MatchGate,
}

impl ScanPipeline {
    pub fn new(adapter: Arc<RecognitionAdapter>, vocabularies: Vocabularies) -> Self {
        Self {
            capture: CaptureSettings::default(),
            preprocessor: Preprocessor::cpu(crate::vision::DEFAULT_THRESHOLD),
            adapter,
            vocabularies,
            wait: WaitDetector::default(),
            gate: MatchGate::default(),
        }
    }

    pub fn with_capture_settings(mut self, capture: CaptureSettings) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_wait_detector(mut self, wait: WaitDetector) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_gate(mut self, gate: MatchGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn adapter(&self) -> &Arc<RecognitionAdapter> {
        &self.adapter
    }

    pub fn gate(&self) -> &MatchGate {
        &self.gate
    }

    pub fn vocabularies(&self) -> &Vocabularies {
        &self.vocabularies
    }

    /// Crop and binarize the target region, `None` when capture is skipped
    pub async fn capture(&self, frame: &VideoFrame, target: &CaptureTarget) -> Option<RgbaImage> {
        if !target.region.is_usable(self.capture.min_region_fraction) {
            debug!("Capture skipped: region {:?} is too small", target.region);
            return None;
        }

        let mut image = capture_region(frame, &target.region, target.display, self.capture.max_width)?;
        self.preprocessor.binarize(&mut image).await;
        Some(image)
    }

    /// Capture, preprocess and recognize; `Ok(None)` when capture is skipped
    pub async fn sample(
        &self,
        frame: &VideoFrame,
        target: &CaptureTarget,
        on_progress: Option<PercentCallback>,
    ) -> Result<Option<String>, RecognitionError> {
        let Some(image) = self.capture(frame, target).await else {
            return Ok(None);
        };
        self.adapter.recognize(&image, on_progress).await.map(Some)
    }

    /// Whether raw text is a loading placeholder
    pub fn is_waiting(&self, raw: &str) -> bool {
        self.wait.is_waiting(raw)
    }

    /// Match raw text against both vocabularies
    pub fn match_text(&self, raw: &str) -> SkillPair {
        SkillPair::from_raw(raw, &self.vocabularies)
    }

    /// Manual single-shot scan; the matcher's decision is taken as is
    pub async fn scan_once(
        &self,
        frame: &VideoFrame,
        target: &CaptureTarget,
        on_progress: Option<PercentCallback>,
    ) -> Result<Option<ScanOutcome>, RecognitionError> {
        let Some(raw_text) = self.sample(frame, target, on_progress).await? else {
            return Ok(None);
        };

        let waiting = self.is_waiting(&raw_text);
        let pair = (!waiting).then(|| self.match_text(&raw_text));
        if let Some(pair) = &pair {
            info!(
                "Scanned series '{}' ({}) / group '{}' ({})",
                pair.series.skill, pair.series.mode, pair.group.skill, pair.group.mode
            );
        }

        Ok(Some(ScanOutcome {
            raw_text,
            waiting,
            pair,
        }))
    }

    /// Write a manual result: relabel `existing` or append a new record
    pub async fn apply_manual(
        &self,
        store: &dyn RecordStore,
        table_key: &str,
        pair: &SkillPair,
        existing: Option<&str>,
    ) -> Result<ManualAction, RecordError> {
        match existing {
            Some(id) => {
                store
                    .update_record(table_key, id, &pair.group.skill, &pair.series.skill)
                    .await?;
                Ok(ManualAction::Updated { id: id.to_string() })
            }
            None => {
                let record = store
                    .create_record(table_key, &pair.group.skill, &pair.series.skill)
                    .await?;
                Ok(ManualAction::Created(record))
            }
        }
    }
}
