//! Confidence + severity prioritization.
//!
//! Applies the confidence floor and the per-file cap, then buckets the
//! survivors into priority tiers. The included and filtered counts
//! always add up to the aggregated issue count.

use indexmap::IndexMap;

use crate::models::finding::{Finding, Severity};

use super::AggregatedFindings;

/// Prioritizer tuning.
#[derive(Debug, Clone)]
pub struct PrioritizerConfig {
    /// Findings scored below this are dropped; unscored findings pass.
    pub min_confidence: f64,
    /// Maximum findings retained per file.
    pub max_issues_per_file: usize,
}

impl Default for PrioritizerConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.7,
            max_issues_per_file: 10,
        }
    }
}

/// Counters surfaced into the published summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriorityMetrics {
    /// Issues entering prioritization.
    pub input_count: usize,
    /// Issues surviving into the buckets.
    pub output_count: usize,
    /// Dropped for low confidence.
    pub filtered_low_confidence: usize,
    /// Dropped by the per-file cap.
    pub filtered_per_file_cap: usize,
    /// Mean confidence of scored survivors, 0 when none are scored.
    pub average_confidence: f64,
}

/// Bucketed findings in priority order.
#[derive(Debug, Clone, Default)]
pub struct PrioritizedFindings {
    pub critical_issues: Vec<Finding>,
    pub high_priority_issues: Vec<Finding>,
    pub medium_priority_issues: Vec<Finding>,
    pub low_priority_issues: Vec<Finding>,
    pub metrics: PriorityMetrics,
    pub total_included_count: usize,
    pub total_filtered_count: usize,
}

impl PrioritizedFindings {
    /// All included findings in bucket-concatenated order.
    pub fn all_issues(&self) -> Vec<&Finding> {
        self.critical_issues
            .iter()
            .chain(&self.high_priority_issues)
            .chain(&self.medium_priority_issues)
            .chain(&self.low_priority_issues)
            .collect()
    }

    /// Clone all included findings in bucket order.
    pub fn into_ordered_issues(self) -> Vec<Finding> {
        let mut issues = self.critical_issues;
        issues.extend(self.high_priority_issues);
        issues.extend(self.medium_priority_issues);
        issues.extend(self.low_priority_issues);
        issues
    }

    /// One-line breakdown used when rebuilding the summary.
    pub fn breakdown(&self) -> String {
        format!(
            "{} critical, {} high, {} medium, {} low ({} filtered)",
            self.critical_issues.len(),
            self.high_priority_issues.len(),
            self.medium_priority_issues.len(),
            self.low_priority_issues.len(),
            self.total_filtered_count,
        )
    }
}

/// Filter and bucket aggregated findings.
pub fn prioritize(aggregated: &AggregatedFindings, config: &PrioritizerConfig) -> PrioritizedFindings {
    let input_count = aggregated.issues.len();
    let mut filtered_low_confidence = 0usize;

    // Confidence floor. Unscored findings pass (the schema makes the
    // score optional).
    let confident: Vec<Finding> = aggregated
        .issues
        .iter()
        .filter(|f| match f.confidence_score {
            Some(score) if score < config.min_confidence => {
                filtered_low_confidence += 1;
                false
            }
            _ => true,
        })
        .cloned()
        .collect();

    // Per-file cap after a severity-then-confidence sort, preserving
    // first-seen file order.
    let mut by_file: IndexMap<String, Vec<Finding>> = IndexMap::new();
    for finding in confident {
        by_file.entry(finding.file.clone()).or_default().push(finding);
    }

    let mut filtered_per_file_cap = 0usize;
    let mut result = PrioritizedFindings::default();
    let mut confidence_sum = 0.0f64;
    let mut confidence_samples = 0usize;

    for (_, mut findings) in by_file {
        findings.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| {
                    b.confidence_or_zero()
                        .partial_cmp(&a.confidence_or_zero())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });
        if findings.len() > config.max_issues_per_file.max(1) {
            filtered_per_file_cap += findings.len() - config.max_issues_per_file.max(1);
            findings.truncate(config.max_issues_per_file.max(1));
        }

        for finding in findings {
            if let Some(score) = finding.confidence_score {
                confidence_sum += score;
                confidence_samples += 1;
            }
            match finding.severity {
                Severity::Critical => result.critical_issues.push(finding),
                Severity::Major => result.high_priority_issues.push(finding),
                Severity::Minor => result.medium_priority_issues.push(finding),
                Severity::Info => result.low_priority_issues.push(finding),
            }
        }
    }

    let output_count = result.critical_issues.len()
        + result.high_priority_issues.len()
        + result.medium_priority_issues.len()
        + result.low_priority_issues.len();

    result.metrics = PriorityMetrics {
        input_count,
        output_count,
        filtered_low_confidence,
        filtered_per_file_cap,
        average_confidence: if confidence_samples > 0 {
            confidence_sum / confidence_samples as f64
        } else {
            0.0
        },
    };
    result.total_included_count = output_count;
    result.total_filtered_count = filtered_low_confidence + filtered_per_file_cap;
    result
}
