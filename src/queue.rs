use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use tokio::{sync::mpsc, time};
use tracing::{error, info};

use crate::{
    config::{Config, SearchBackendKind},
    models::{ErrorPayload, JobState},
    queries,
    rebuild::{self, RebuildEvent, RebuildRun},
    search::{ElasticsearchBackend, SearchBackend, SqliteBackend},
    AppState,
};

pub fn build_backend(config: &Config) -> Result<Arc<dyn SearchBackend>> {
    let backend: Arc<dyn SearchBackend> = match config.search_backend {
        SearchBackendKind::Elasticsearch => Arc::new(
            ElasticsearchBackend::new(&config.elasticsearch_url, config.search.reindex_timeout)
                .context("Failed building Elasticsearch client")?,
        ),
        SearchBackendKind::Sqlite => Arc::new(
            SqliteBackend::open(&config.sqlite_index_path).with_context(|| {
                format!("Failed opening {}", config.sqlite_index_path.display())
            })?,
        ),
    };
    Ok(backend)
}

pub fn spawn_rebuild_worker(state: AppState, mut queue_rx: mpsc::Receiver<String>) {
    tokio::spawn(async move {
        while let Some(job_id) = queue_rx.recv().await {
            info!(job_id = %job_id, "Worker picked rebuild job");
            if let Err(err) = process_rebuild_job(state.clone(), &job_id).await {
                error!("Rebuild job {job_id} failed: {err:#}");
                record_failure(&state, &job_id, &err).await;
            }
        }
    });
}

pub fn spawn_cleanup_worker(state: AppState) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            expire_finished_jobs(&state).await;
        }
    });
}

async fn set_job_progress(
    state: &AppState,
    job_id: &str,
    progress: f64,
    message: impl Into<String>,
) -> Result<bool> {
    let message = message.into();
    let mut jobs = state.jobs.write().await;
    let Some(job) = jobs.get_mut(job_id) else {
        anyhow::bail!("Unknown job id: {job_id}");
    };

    if matches!(job.status, JobState::Canceled) {
        info!(job_id = %job_id, progress, "Skipping progress update: job canceled");
        return Ok(false);
    }

    job.progress = progress;
    job.message = Some(message.clone());
    job.updated_at = Utc::now();

    info!(job_id = %job_id, progress, message = %message, "Rebuild progress update");
    Ok(true)
}

/// A job canceled while its last alias was still running stays canceled.
async fn record_failure(state: &AppState, job_id: &str, err: &anyhow::Error) {
    let mut jobs = state.jobs.write().await;
    let Some(job) = jobs.get_mut(job_id) else {
        return;
    };
    if matches!(job.status, JobState::Canceled) {
        info!(job_id = %job_id, "Not recording failure: job canceled");
        return;
    }

    job.status = JobState::Failed;
    job.progress = 100.0;
    job.updated_at = Utc::now();
    job.error = Some(ErrorPayload {
        code: "REBUILD_FAILED".to_string(),
        message: format!("{err:#}"),
    });
    job.message = Some("Rebuild failed".to_string());
}

async fn record_event(state: &AppState, job_id: &str, event: RebuildEvent) -> Result<bool> {
    match event {
        RebuildEvent::AliasStarted {
            position,
            total,
            alias,
        } => {
            let progress = 10.0 + 85.0 * position as f64 / total.max(1) as f64;
            set_job_progress(state, job_id, progress, format!("Rebuilding alias {alias}")).await
        }
        RebuildEvent::AliasFinished(outcome) => {
            let mut jobs = state.jobs.write().await;
            if let Some(job) = jobs.get_mut(job_id) {
                job.results.push(outcome);
            }
            Ok(true)
        }
    }
}

async fn process_rebuild_job(state: AppState, job_id: &str) -> Result<()> {
    let run = RebuildRun::new();
    let request = {
        let mut jobs = state.jobs.write().await;
        let Some(job) = jobs.get_mut(job_id) else {
            anyhow::bail!("Unknown job id: {job_id}");
        };

        if matches!(job.status, JobState::Canceled) {
            info!("Skipping canceled job {job_id}");
            return Ok(());
        }

        job.status = JobState::Running;
        job.progress = 5.0;
        job.message = Some("Connecting to database".to_string());
        job.updated_at = Utc::now();
        job.run_id = Some(run.run_id.clone());
        job.error = None;

        job.request.clone()
    };

    info!(
        job_id = %job_id,
        run_id = %run.run_id,
        apps = ?request.apps,
        from_scratch = request.from_scratch,
        "Rebuild job started"
    );

    let plans = rebuild::plan(&state.indexers, &request.apps, request.from_scratch)?;
    let client = queries::connect(&state.config.database_url)
        .await
        .context("Failed connecting to database")?;

    let outcomes = rebuild::rebuild(
        &plans,
        &run,
        &state.config.search,
        &client,
        state.backend.as_ref(),
        |event| {
            let state = state.clone();
            let job_id = job_id.to_string();
            async move { record_event(&state, &job_id, event).await }
        },
    )
    .await?;

    let mut jobs = state.jobs.write().await;
    if let Some(job) = jobs.get_mut(job_id) {
        if matches!(job.status, JobState::Canceled) {
            return Ok(());
        }
        job.status = JobState::Completed;
        job.progress = 100.0;
        job.message = Some(format!("Rebuilt {} aliases", job.results.len()));
        job.updated_at = Utc::now();
        job.error = None;
    }

    info!(job_id = %job_id, run_id = %run.run_id, aliases = outcomes.len(), "Rebuild job completed");
    Ok(())
}

async fn expire_finished_jobs(state: &AppState) {
    let now = Utc::now();
    let retention = ChronoDuration::seconds(state.config.retention_seconds as i64);

    let mut jobs = state.jobs.write().await;
    let before = jobs.len();
    jobs.retain(|_, job| {
        !(matches!(job.status, JobState::Expired) && job.updated_at + retention <= now)
    });
    if jobs.len() < before {
        info!(dropped = before - jobs.len(), "Dropped expired job records");
    }

    for job in jobs.values_mut() {
        if !job.status.is_finished() || job.updated_at + retention > now {
            continue;
        }
        info!(job_id = %job.job_id, "Expiring rebuild job");
        job.status = JobState::Expired;
        job.updated_at = now;
        job.message = Some("Job record expired".to_string());
        job.results.clear();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::{
        models::{JobRecord, RebuildRequest},
        rebuild::AliasOutcome,
        test_state,
    };

    #[tokio::test]
    async fn finished_jobs_expire_after_retention() {
        let (state, _rx) = test_state(0);
        let old = Utc::now() - ChronoDuration::seconds(10);
        {
            let mut jobs = state.jobs.write().await;
            let mut done = JobRecord::queued("done".into(), RebuildRequest::default(), old);
            done.status = JobState::Completed;
            jobs.insert("done".into(), done);
            jobs.insert(
                "waiting".into(),
                JobRecord::queued("waiting".into(), RebuildRequest::default(), old),
            );
        }

        expire_finished_jobs(&state).await;

        let jobs = state.jobs.read().await;
        assert_eq!(jobs["done"].status, JobState::Expired);
        assert_eq!(jobs["waiting"].status, JobState::Queued);
    }

    #[tokio::test]
    async fn canceled_jobs_skip_progress() {
        let (state, _rx) = test_state(3600);
        {
            let mut jobs = state.jobs.write().await;
            let mut job = JobRecord::queued("job".into(), RebuildRequest::default(), Utc::now());
            job.status = JobState::Canceled;
            jobs.insert("job".into(), job);
        }

        assert!(!set_job_progress(&state, "job", 50.0, "ignored").await.unwrap());
        assert!(set_job_progress(&state, "missing", 50.0, "x").await.is_err());
    }

    #[tokio::test]
    async fn failure_after_cancel_keeps_job_canceled() {
        let (state, _rx) = test_state(3600);
        {
            let mut jobs = state.jobs.write().await;
            let mut canceled = JobRecord::queued("canceled".into(), RebuildRequest::default(), Utc::now());
            canceled.status = JobState::Canceled;
            jobs.insert("canceled".into(), canceled);
            let mut running = JobRecord::queued("running".into(), RebuildRequest::default(), Utc::now());
            running.status = JobState::Running;
            jobs.insert("running".into(), running);
        }

        let err = anyhow::anyhow!("bulk request failed");
        record_failure(&state, "canceled", &err).await;
        record_failure(&state, "running", &err).await;
        record_failure(&state, "missing", &err).await;

        let jobs = state.jobs.read().await;
        assert_eq!(jobs["canceled"].status, JobState::Canceled);
        assert!(jobs["canceled"].error.is_none());
        assert_eq!(jobs["running"].status, JobState::Failed);
        assert_eq!(jobs["running"].error.as_ref().unwrap().code, "REBUILD_FAILED");
    }

    #[tokio::test]
    async fn events_update_progress_and_results() {
        let (state, _rx) = test_state(3600);
        {
            let mut jobs = state.jobs.write().await;
            jobs.insert(
                "job".into(),
                JobRecord::queued("job".into(), RebuildRequest::default(), Utc::now()),
            );
        }

        let started = RebuildEvent::AliasStarted {
            position: 1,
            total: 2,
            alias: "officers",
        };
        assert!(record_event(&state, "job", started).await.unwrap());
        let outcome = AliasOutcome {
            alias: "officers".to_string(),
            index: "officers_1".to_string(),
            doc_types: vec!["officer_coaccusals".to_string()],
            migrated_doc_types: Vec::new(),
            documents: 2,
        };
        assert!(record_event(&state, "job", RebuildEvent::AliasFinished(outcome.clone()))
            .await
            .unwrap());
        {
            let jobs = state.jobs.read().await;
            assert_eq!(jobs["job"].progress, 52.5);
            assert_eq!(jobs["job"].message.as_deref(), Some("Rebuilding alias officers"));
            assert_eq!(jobs["job"].results, vec![outcome]);
        }

        state.jobs.write().await.get_mut("job").unwrap().status = JobState::Canceled;
        let started = RebuildEvent::AliasStarted {
            position: 0,
            total: 2,
            alias: "crs",
        };
        assert!(!record_event(&state, "job", started).await.unwrap());
    }
}
