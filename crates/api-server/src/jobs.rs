//! In-memory job registry for analysis result exports. Process-lifetime
//! only; durable tracking is an external concern.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub status: JobStatus,
    pub download_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct JobStore {
    jobs: DashMap<String, JobRecord>,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
        }
    }

    pub fn save(&self, job_id: &str) {
        self.jobs.insert(
            job_id.to_string(),
            JobRecord {
                status: JobStatus::Processing,
                download_url: None,
                created_at: Utc::now(),
            },
        );
    }

    pub fn update(&self, job_id: &str, status: JobStatus, download_url: Option<String>) {
        if let Some(mut record) = self.jobs.get_mut(job_id) {
            record.status = status;
            record.download_url = download_url;
        }
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.get(job_id).map(|r| r.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_lifecycle() {
        let store = JobStore::new();
        store.save("j1");
        assert_eq!(store.get("j1").unwrap().status, JobStatus::Processing);

        store.update("j1", JobStatus::Ready, Some("/exports/j1".to_string()));
        let record = store.get("j1").unwrap();
        assert_eq!(record.status, JobStatus::Ready);
        assert_eq!(record.download_url.as_deref(), Some("/exports/j1"));

        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_update_unknown_job_is_noop() {
        let store = JobStore::new();
        store.update("ghost", JobStatus::Failed, None);
        assert!(store.get("ghost").is_none());
    }
}
