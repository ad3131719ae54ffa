use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub item: String,
    pub error: String,
}

/// 批量操作的汇总，每一项独立成功或失败
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, item: impl Into<String>, error: impl std::fmt::Display) {
        self.failed += 1;
        self.failures.push(BatchFailure {
            item: item.into(),
            error: error.to_string(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}
