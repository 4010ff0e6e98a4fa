use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{AppError, Category, ErrorCode, Severity};

/// Running aggregate counts over every logged error
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStats {
    pub total: u64,
    pub by_category: BTreeMap<Category, u64>,
    pub by_code: BTreeMap<ErrorCode, u64>,
    pub by_severity: BTreeMap<Severity, u64>,
    /// Newest first
    pub recent: Vec<AppError>,
}

impl ErrorStats {
    pub fn record(&mut self, error: &AppError, recent_capacity: usize) {
        self.total += 1;
        *self.by_category.entry(error.category()).or_insert(0) += 1;
        *self.by_code.entry(error.code()).or_insert(0) += 1;
        *self.by_severity.entry(error.severity()).or_insert(0) += 1;

        self.recent.insert(0, error.clone());
        self.recent.truncate(recent_capacity);
    }

    pub fn count_for_code(&self, code: ErrorCode) -> u64 {
        self.by_code.get(&code).copied().unwrap_or(0)
    }

    pub fn count_for_category(&self, category: Category) -> u64 {
        self.by_category.get(&category).copied().unwrap_or(0)
    }

    pub fn count_for_severity(&self, severity: Severity) -> u64 {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_updates_every_aggregate() {
        let mut stats = ErrorStats::default();
        for _ in 0..12 {
            stats.record(&AppError::from_code(ErrorCode::NetworkTimeout), 10);
        }
        stats.record(&AppError::from_code(ErrorCode::RenderFailed), 10);

        assert_eq!(stats.total, 13);
        assert_eq!(stats.count_for_code(ErrorCode::NetworkTimeout), 12);
        assert_eq!(stats.count_for_category(Category::Network), 12);
        assert_eq!(stats.count_for_severity(Severity::Critical), 1);
        assert_eq!(stats.recent.len(), 10);
        assert_eq!(stats.recent[0].code(), ErrorCode::RenderFailed);
    }

    #[test]
    fn test_stats_serialize_with_wire_names() {
        let mut stats = ErrorStats::default();
        stats.record(&AppError::from_code(ErrorCode::AiRateLimited), 10);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["byCategory"]["ai-service"], 1);
        assert_eq!(json["byCode"]["AI_RATE_LIMITED"], 1);
    }
}
