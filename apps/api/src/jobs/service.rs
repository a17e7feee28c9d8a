use tracing::info;

use crate::errors::AppError;
use crate::jobs::store::{JobStore, NewJob};
use crate::models::job::JobRow;

#[derive(Debug, Clone)]
pub struct JobCreation {
    pub job: JobRow,
    /// True when an equivalent job already existed and was returned instead.
    pub reused: bool,
}

/// Returns the existing equivalent job for non-forced requests, otherwise
/// inserts a new one. `force` always inserts.
pub async fn create_or_reuse_job(store: &dyn JobStore, job: &NewJob) -> Result<JobCreation, AppError> {
    if !job.force {
        if let Some(existing) = store.find_equivalent(job).await? {
            info!(job_id = %existing.id, "Reusing equivalent job");
            return Ok(JobCreation {
                job: existing,
                reused: true,
            });
        }
    }

    if let Some(created) = store.insert(job).await? {
        info!(job_id = %created.id, job_type = job.job_type.as_str(), force = job.force, "Job created");
        return Ok(JobCreation {
            job: created,
            reused: false,
        });
    }

    // Lost the insert race to an equivalent request.
    let existing = store.find_equivalent(job).await?.ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "Job insert conflicted but no equivalent job was found"
        ))
    })?;
    Ok(JobCreation {
        job: existing,
        reused: true,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::jobs::selector::JobType;
    use crate::jobs::store::memory::MemoryJobStore;

    const NOTES_REPO: Uuid = Uuid::from_u128(0x4e07e5);

    fn new_job(user_id: Uuid, force: bool) -> NewJob {
        NewJob {
            user_id,
            repo_id: NOTES_REPO,
            job_type: JobType::ProcessCommits,
            selector: json!({ "commitIds": ["abcdef1"] }),
            force,
            repo_path: "/srv/repos/ada/notes".to_string(),
        }
    }

    #[tokio::test]
    async fn test_identical_request_reuses_job() {
        let store = MemoryJobStore::default();
        let user_id = Uuid::new_v4();

        let first = create_or_reuse_job(&store, &new_job(user_id, false)).await.unwrap();
        let second = create_or_reuse_job(&store, &new_job(user_id, false)).await.unwrap();

        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(first.job.id, second.job.id);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_force_always_creates() {
        let store = MemoryJobStore::default();
        let user_id = Uuid::new_v4();

        let base = create_or_reuse_job(&store, &new_job(user_id, false)).await.unwrap();
        let forced_a = create_or_reuse_job(&store, &new_job(user_id, true)).await.unwrap();
        let forced_b = create_or_reuse_job(&store, &new_job(user_id, true)).await.unwrap();

        assert!(!forced_a.reused && !forced_b.reused);
        assert_ne!(forced_a.job.id, base.job.id);
        assert_ne!(forced_a.job.id, forced_b.job.id);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_other_users_do_not_share_jobs() {
        let store = MemoryJobStore::default();
        let a = create_or_reuse_job(&store, &new_job(Uuid::new_v4(), false)).await.unwrap();
        let b = create_or_reuse_job(&store, &new_job(Uuid::new_v4(), false)).await.unwrap();
        assert_ne!(a.job.id, b.job.id);
    }

    #[tokio::test]
    async fn test_different_selector_creates_new_job() {
        let store = MemoryJobStore::default();
        let user_id = Uuid::new_v4();
        create_or_reuse_job(&store, &new_job(user_id, false)).await.unwrap();

        let mut other = new_job(user_id, false);
        other.selector = json!({ "commitIds": ["1234567"] });
        let created = create_or_reuse_job(&store, &other).await.unwrap();
        assert!(!created.reused);
    }

    #[tokio::test]
    async fn test_same_selector_on_another_repo_creates_new_job() {
        let store = MemoryJobStore::default();
        let user_id = Uuid::new_v4();
        let mut analysis = new_job(user_id, false);
        analysis.job_type = JobType::ProcessRange;
        analysis.selector = json!({ "course": "math214", "since": "2024-09-01" });
        analysis.repo_path = "/srv/repos/ada/analysis".to_string();
        let mut algebra = analysis.clone();
        algebra.repo_id = Uuid::new_v4();
        algebra.repo_path = "/srv/repos/ada/algebra".to_string();

        let first = create_or_reuse_job(&store, &analysis).await.unwrap();
        let second = create_or_reuse_job(&store, &algebra).await.unwrap();

        assert!(!second.reused);
        assert_ne!(first.job.id, second.job.id);
        assert_eq!(second.job.repo_path, "/srv/repos/ada/algebra");
        assert_eq!(store.len(), 2);
    }
}
