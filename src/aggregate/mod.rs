//! Finding aggregation and deduplication.
//!
//! Fuses finding lists from multiple sources (LLM chunks, test-failure
//! mapping, static tools) into one list. Findings are duplicates when
//! they share file and severity, their normalized titles score at or
//! above the similarity threshold, and their lines fall within a small
//! tolerance window; each duplicate group keeps its best member.
//!
//! Confidence filtering and per-file caps run in the prioritization step
//! (see [`prioritize`]) so that the included/filtered accounting adds up
//! against the aggregated list.

pub mod prioritize;
pub mod similarity;

use crate::models::finding::{Finding, Note};

pub use prioritize::{prioritize, PrioritizedFindings, PrioritizerConfig, PriorityMetrics};
pub use similarity::{normalize_title, TitleSimilarity};

/// Aggregation tuning.
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    pub deduplication_enabled: bool,
    /// Normalized-title similarity at or above which two findings can be
    /// duplicates.
    pub similarity_threshold: f64,
    /// Maximum line distance for two findings to be duplicates.
    pub line_tolerance: u32,
    pub similarity: TitleSimilarity,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            deduplication_enabled: true,
            similarity_threshold: 0.85,
            line_tolerance: 5,
            similarity: TitleSimilarity::default(),
        }
    }
}

/// The fused output of aggregation.
#[derive(Debug, Clone, Default)]
pub struct AggregatedFindings {
    pub issues: Vec<Finding>,
    pub notes: Vec<Note>,
    pub summary: String,
}

/// Fuse finding lists, deduplicate, and carry notes plus the summary
/// through.
pub fn aggregate(
    batches: Vec<Vec<Finding>>,
    notes: Vec<Note>,
    summary: String,
    config: &AggregationConfig,
) -> AggregatedFindings {
    let all: Vec<Finding> = batches.into_iter().flatten().collect();

    let issues = if config.deduplication_enabled {
        deduplicate(all, config)
    } else {
        all
    };

    AggregatedFindings {
        issues,
        notes,
        summary,
    }
}

/// Collapse duplicate findings, keeping each group's best member.
fn deduplicate(findings: Vec<Finding>, config: &AggregationConfig) -> Vec<Finding> {
    if findings.len() <= 1 {
        return findings;
    }

    let mut kept: Vec<(Finding, String)> = Vec::new();

    for finding in findings {
        let normalized = normalize_title(&finding.title);
        let duplicate_of = kept.iter_mut().find(|(existing, existing_title)| {
            is_duplicate(existing, existing_title, &finding, &normalized, config)
        });

        match duplicate_of {
            Some((existing, existing_title)) => {
                if prefer_over(&finding, existing) {
                    *existing = finding;
                    *existing_title = normalized;
                }
            }
            None => kept.push((finding, normalized)),
        }
    }

    kept.into_iter().map(|(finding, _)| finding).collect()
}

/// Duplicate test: same file, same severity, titles similar enough,
/// lines within the tolerance window.
fn is_duplicate(
    a: &Finding,
    a_title: &str,
    b: &Finding,
    b_title: &str,
    config: &AggregationConfig,
) -> bool {
    a.file == b.file
        && a.severity == b.severity
        && a.start_line.abs_diff(b.start_line) <= config.line_tolerance
        && config.similarity.score(a_title, b_title) >= config.similarity_threshold
}

/// Whether `candidate` should replace `incumbent` inside a duplicate
/// group: highest confidence wins, then severity weight, then source
/// precedence.
fn prefer_over(candidate: &Finding, incumbent: &Finding) -> bool {
    let by_confidence = candidate
        .confidence_or_zero()
        .partial_cmp(&incumbent.confidence_or_zero())
        .unwrap_or(std::cmp::Ordering::Equal);
    if by_confidence != std::cmp::Ordering::Equal {
        return by_confidence.is_gt();
    }

    let by_weight = candidate
        .severity
        .weight()
        .partial_cmp(&incumbent.severity.weight())
        .unwrap_or(std::cmp::Ordering::Equal);
    if by_weight != std::cmp::Ordering::Equal {
        return by_weight.is_gt();
    }

    candidate.source.precedence() > incumbent.source.precedence()
}
