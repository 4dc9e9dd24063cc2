//! Merge text-extraction and template-match detections for one capture.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::types::{DetectionSource, EntityKind, RawDetection, RecognizedEntity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Detections below this confidence are discarded before deduplication.
    pub min_confidence: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
        }
    }
}

/// Fuse raw detections into at most one entity per `(kind, slot_index)`.
///
/// Confidences outside `[0, 1]` (NaN included) are dropped. Higher confidence
/// wins. On equal confidence template matches win, except
/// for numeric fields where text extraction wins. Output is ordered by key.
pub fn fuse(
    detections: impl IntoIterator<Item = RawDetection>,
    min_confidence: f64,
) -> Vec<RecognizedEntity> {
    let mut best: BTreeMap<(EntityKind, u32), RawDetection> = BTreeMap::new();
    for detection in detections {
        let confidence = detection.confidence;
        if !(0.0..=1.0).contains(&confidence) || confidence < min_confidence {
            continue;
        }
        let key = (detection.kind, detection.slot_index);
        match best.get(&key) {
            Some(incumbent) if !replaces(&detection, incumbent) => {}
            _ => {
                best.insert(key, detection);
            }
        }
    }
    best.into_values()
        .map(RecognizedEntity::from_detection)
        .collect()
}

fn replaces(candidate: &RawDetection, incumbent: &RawDetection) -> bool {
    if candidate.confidence != incumbent.confidence {
        return candidate.confidence > incumbent.confidence;
    }
    if candidate.source == incumbent.source {
        return false;
    }
    candidate.source == preferred_on_tie(candidate.kind)
}

fn preferred_on_tie(kind: EntityKind) -> DetectionSource {
    match kind {
        EntityKind::NumericField => DetectionSource::TextExtraction,
        _ => DetectionSource::TemplateMatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{detection, text, template};

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(fuse(Vec::new(), 0.5).is_empty());
    }

    #[test]
    fn keeps_one_entity_per_key() {
        let fused = fuse(
            vec![
                text(EntityKind::ShopSlot, 0, "Garen", 0.7),
                template(EntityKind::ShopSlot, 0, "Garen", 0.9),
                template(EntityKind::ShopSlot, 1, "Lux", 0.8),
                text(EntityKind::ShopSlot, 1, "Lux", 0.75),
            ],
            0.5,
        );
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].confidence(), 0.9);
        assert_eq!(fused[1].source(), DetectionSource::TemplateMatch);
    }

    #[test]
    fn higher_confidence_wins_regardless_of_source() {
        let fused = fuse(
            vec![
                template(EntityKind::BoardCell, 3, "Ahri", 0.7),
                text(EntityKind::BoardCell, 3, "Annie", 0.8),
            ],
            0.5,
        );
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].label(), "Annie");
    }

    #[test]
    fn tie_prefers_template_for_non_numeric() {
        let fused = fuse(
            vec![
                text(EntityKind::SynergyBadge, 0, "Knight:2", 0.8),
                template(EntityKind::SynergyBadge, 0, "Knight:3", 0.8),
            ],
            0.5,
        );
        assert_eq!(fused[0].label(), "Knight:3");
        assert_eq!(fused[0].source(), DetectionSource::TemplateMatch);
    }

    #[test]
    fn tie_prefers_text_for_numeric_fields() {
        let fused = fuse(
            vec![
                text(EntityKind::NumericField, 0, "12", 0.8),
                template(EntityKind::NumericField, 0, "13", 0.8),
            ],
            0.5,
        );
        assert_eq!(fused[0].label(), "12");

        let reversed = fuse(
            vec![
                template(EntityKind::NumericField, 0, "13", 0.8),
                text(EntityKind::NumericField, 0, "12", 0.8),
            ],
            0.5,
        );
        assert_eq!(reversed[0].label(), "12");
    }

    #[test]
    fn drops_low_confidence_and_nan() {
        let fused = fuse(
            vec![
                text(EntityKind::ItemSlot, 0, "Sword", 0.2),
                detection(
                    EntityKind::ItemSlot,
                    1,
                    "Bow",
                    f64::NAN,
                    DetectionSource::TemplateMatch,
                ),
                template(EntityKind::ItemSlot, 2, "Rod", 0.6),
            ],
            0.6,
        );
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].label(), "Rod");
    }

    #[test]
    fn single_backend_passes_through() {
        let fused = fuse(
            vec![
                text(EntityKind::NumericField, 0, "10", 0.9),
                text(EntityKind::NumericField, 2, "4", 0.9),
            ],
            0.5,
        );
        assert_eq!(fused.len(), 2);
        assert!(
            fused
                .iter()
                .all(|entity| entity.source() == DetectionSource::TextExtraction)
        );
    }

    #[test]
    fn out_of_range_confidence_never_wins() {
        let fused = fuse(
            vec![
                template(EntityKind::ShopSlot, 0, "Garen", 0.9),
                text(EntityKind::ShopSlot, 0, "Ahri", 1.5),
                template(EntityKind::ShopSlot, 1, "Lux", f64::INFINITY),
            ],
            0.5,
        );
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].label(), "Garen");
    }
}
