//! School directory: teacher roster and student list
//!
//! Each attempt is bounded by its own timeout; timeouts and other transient
//! failures are retried by the supplied policy.

use crate::backend::{rpc, Backend};
use crate::errors::{AppError, Result};
use crate::models::{StudentSummary, TeacherSummary};
use crate::resolver::Identity;
use crate::retry::RetryPolicy;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Teachers of the identity's school
pub async fn list_teachers(
    backend: &dyn Backend,
    identity: &Identity,
    policy: &RetryPolicy,
    attempt_timeout: Duration,
) -> Result<Vec<TeacherSummary>> {
    let school_id = school_of(identity)?;
    let teachers = policy
        .run(rpc::GET_SCHOOL_TEACHERS, || {
            bounded(rpc::GET_SCHOOL_TEACHERS, attempt_timeout, rpc::school_teachers(backend, school_id))
        })
        .await?;

    debug!(school_id = school_id, count = teachers.len(), "Loaded teacher roster");
    Ok(teachers)
}

/// Students of the identity's school
pub async fn list_students(
    backend: &dyn Backend,
    identity: &Identity,
    policy: &RetryPolicy,
    attempt_timeout: Duration,
) -> Result<Vec<StudentSummary>> {
    let school_id = school_of(identity)?;
    let students = policy
        .run(rpc::GET_SCHOOL_STUDENTS, || {
            bounded(rpc::GET_SCHOOL_STUDENTS, attempt_timeout, rpc::school_students(backend, school_id))
        })
        .await?;

    debug!(school_id = school_id, count = students.len(), "Loaded student list");
    Ok(students)
}

fn school_of(identity: &Identity) -> Result<&str> {
    identity.school_id.as_deref().ok_or(AppError::SchoolNotResolved)
}

/// Abort `attempt` after `limit`
async fn bounded<T>(operation: &str, limit: Duration, attempt: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(limit, attempt).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout {
            operation: operation.to_string(),
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use serde_json::json;

    fn identity(school_id: Option<&str>) -> Identity {
        Identity {
            school_id: school_id.map(String::from),
            ..Identity::default()
        }
    }

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_teachers_for_school() {
        let backend = MockBackend::new().with_rpc(
            rpc::GET_SCHOOL_TEACHERS,
            json!([
                { "id": "t1", "teacher_name": "Ada", "is_supervisor": true },
                { "id": "t2", "full_name": "Grace" }
            ]),
        );

        let teachers = list_teachers(&backend, &identity(Some("s-1")), &quick(1), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(teachers.len(), 2);
        assert_eq!(teachers[0].name, "Ada");
        assert_eq!(teachers[1].name, "Grace");
        assert_eq!(backend.rpc_calls()[0].1["p_school_id"], "s-1");
    }

    #[tokio::test]
    async fn test_missing_school() {
        let backend = MockBackend::new();
        let result = list_students(&backend, &identity(None), &quick(3), Duration::from_secs(1)).await;

        assert!(matches!(result, Err(AppError::SchoolNotResolved)));
        assert!(backend.rpc_calls().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failures_retry() {
        let backend = MockBackend::new().with_rpc(rpc::GET_SCHOOL_STUDENTS, json!([{ "id": "p1", "name": "Lin" }]));
        backend.fail_rpc(rpc::GET_SCHOOL_STUDENTS, 2);

        let students = list_students(&backend, &identity(Some("s-1")), &quick(3), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(students[0].name, "Lin");
        assert_eq!(backend.rpc_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_slow_attempts_time_out() {
        let backend = MockBackend::new().with_rpc(rpc::GET_SCHOOL_TEACHERS, json!([]));
        backend.delay_rpc(Some(Duration::from_millis(200)));

        let result = list_teachers(&backend, &identity(Some("s-1")), &quick(2), Duration::from_millis(20)).await;

        assert!(matches!(result, Err(AppError::Timeout { .. })));
        assert_eq!(backend.rpc_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let backend = MockBackend::new();

        let result = list_teachers(&backend, &identity(Some("s-1")), &quick(3), Duration::from_secs(1)).await;

        assert!(matches!(result, Err(AppError::Backend { status: 404, .. })));
        assert_eq!(backend.rpc_calls().len(), 1);
    }
}
