use axum::extract::State;
use shared::models::JobStatus;
use shared::AppError;

use crate::state::AppState;

fn status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "queued",
        JobStatus::Active => "active",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
    }
}

/// `GET /admin/metrics`: a Prometheus text-format export of two
/// operator-visible gauges: each team's deferred-job backlog and NuQ's
/// per-status row counts. No metrics crate in the workspace, so this is
/// hand-formatted rather than pulled in as an opaque dependency.
pub async fn metrics(State(state): State<AppState>) -> Result<String, AppError> {
    let mut out = String::new();

    out.push_str("# HELP concurrency_limit_queue_job_count Jobs parked in a team's deferred queue.\n");
    out.push_str("# TYPE concurrency_limit_queue_job_count gauge\n");
    for team_id in state.admission.deferred_teams().await? {
        let count = state.admission.deferred_count(team_id).await?;
        out.push_str(&format!("concurrency_limit_queue_job_count{{team_id=\"{team_id}\"}} {count}\n"));
    }

    out.push_str("# HELP nuq_queue_scrape_job_count Rows in queue_scrape by status.\n");
    out.push_str("# TYPE nuq_queue_scrape_job_count gauge\n");
    for (status, count) in state.queue.job_counts_by_status().await? {
        out.push_str(&format!("nuq_queue_scrape_job_count{{status=\"{}\"}} {count}\n", status_str(status)));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_str_matches_the_lowercase_enum_rename() {
        assert_eq!(status_str(JobStatus::Queued), "queued");
        assert_eq!(status_str(JobStatus::Active), "active");
        assert_eq!(status_str(JobStatus::Completed), "completed");
        assert_eq!(status_str(JobStatus::Failed), "failed");
    }
}
