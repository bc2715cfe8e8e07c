//! `fieldops-sync`: runs a job list synchronizer against a seeded in-memory
//! store and logs every published view until Ctrl-C.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};

use fieldops_client::config::CACHE_DB_ENV;
use fieldops_client::{
    CacheStorage, JobListSynchronizer, JobListView, SqliteStorage, SyncConfig, UserDirectoryStore,
    VisibilitySignal,
};
use fieldops_core::UserId;
use fieldops_jobs::{
    AssigneeRef, Evidence, InMemoryJobStore, Job, JobId, NewJob, UserDirectory, UserProfile,
};

const JOHN: &str = "8e08c810-8a76-4ca9-a484-059d994cad08";
const SARAH: &str = "3f6b2a91-0c4d-4e57-9b1a-7d2e5c8f9a10";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fieldops_observability::init();

    let config = SyncConfig::from_env();

    let storage: Arc<dyn CacheStorage> = match std::env::var(CACHE_DB_ENV) {
        Ok(path) => Arc::new(SqliteStorage::open(&path).await?),
        Err(_) => Arc::new(SqliteStorage::open_default().await?),
    };

    let (jobs, users) = seed().context("failed to build sample jobs")?;
    let directory = UserDirectoryStore::new(storage.clone())
        .with_seed(users)
        .load()
        .await;
    let store = Arc::new(InMemoryJobStore::with_jobs(jobs));
    let signal = VisibilitySignal::visible();

    tracing::info!(
        poll_interval = ?config.poll_interval,
        fetch_cooldown = ?config.fetch_cooldown,
        cache_ttl = ?config.cache.ttl,
        users = directory.len(),
        "starting fieldops-sync"
    );

    let sync = JobListSynchronizer::spawn_with_storage(store, storage, &signal, config);
    let mut views = sync.subscribe();
    let initial = views.borrow_and_update().clone();
    log_view(&initial, &directory);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    tracing::warn!("failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                log_view(&view, &directory);
            }
        }
    }

    sync.shutdown().await;
    Ok(())
}

fn log_view(view: &JobListView, directory: &UserDirectory) {
    let mut by_status: BTreeMap<&str, usize> = BTreeMap::new();
    for job in view.jobs.iter() {
        *by_status.entry(job.status.label()).or_default() += 1;
    }

    tracing::info!(
        state = view.state.as_str(),
        jobs = view.len(),
        from_cache = view.from_cache,
        fetched_at = ?view.fetched_at,
        error = ?view.last_error,
        "job list: {:?}",
        by_status
    );

    for job in view.jobs.iter() {
        let assignee = job
            .accepted_by
            .as_ref()
            .map(|a| directory.display_name(a))
            .unwrap_or_else(|| "-".to_string());
        tracing::debug!(
            job_id = %job.id,
            status = job.status.label(),
            assignee = %assignee,
            "{}",
            job.title
        );
    }
}

fn seed() -> anyhow::Result<(Vec<Job>, Vec<(UserId, UserProfile)>)> {
    let now = Utc::now();
    let john = UserId::parse_hyphenated(JOHN)?;
    let sarah = UserId::parse_hyphenated(SARAH)?;

    let profile = |email: &str, name: Option<&str>| UserProfile {
        email: email.to_string(),
        name: name.map(str::to_string),
        updated_at: now,
    };
    let users = vec![
        (john, profile("john@example.com", Some("John Smith"))),
        (sarah, profile("sarah@example.com", None)),
    ];

    let open = |id: &str, title: &str, company: &str, age_days: i64| {
        Job::open(
            JobId::new(id),
            NewJob::new(title, format!("{title} requested by {company}"), company),
            now - Duration::days(age_days),
        )
    };

    let hvac = open("JOB001", "HVAC Maintenance", "Tech Corp", 4)?;

    let mut electrical = open("JOB002", "Electrical Panel Upgrade", "Shopping Mall", 3)?;
    electrical.accept(AssigneeRef::Id(john), now - Duration::days(2))?;

    let mut plumbing = open("JOB003", "Plumbing Repair", "Riverside Apartments", 2)?;
    plumbing.accept(AssigneeRef::Id(sarah), now - Duration::days(1))?;
    plumbing.mark_onsite(
        now - Duration::hours(3),
        Evidence::none().with_notes("Leak traced to main valve"),
    )?;

    let mut fire = open("JOB004", "Fire Safety Inspection", "City Library", 5)?;
    fire.accept(AssigneeRef::from("Mike Johnson"), now - Duration::days(4))?;
    fire.mark_onsite(now - Duration::days(3), Evidence::none())?;
    fire.complete(
        now - Duration::days(3) + Duration::hours(2),
        Evidence::none().with_notes("All extinguishers certified"),
    )?;
    fire.set_invoiced(true);

    Ok((vec![hvac, electrical, plumbing, fire], users))
}
