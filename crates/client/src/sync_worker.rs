//! Background task behind a [`JobListSynchronizer`](crate::JobListSynchronizer).
//!
//! The worker owns all mutable synchronizer state. It reacts to one event at
//! a time: shutdown, a refresh command, a poll tick or an activity change.

use std::ops::ControlFlow;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use fieldops_jobs::{Job, JobStore, JobStoreError, sort_by_status_priority};

use crate::activity::Activity;
use crate::cache::JobCache;
use crate::config::SyncConfig;
use crate::sync::{SyncCommand, SyncError};
use crate::types::{JobListView, SyncState};

type RefreshReply = oneshot::Sender<Result<usize, SyncError>>;

/// What started a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchTrigger {
    /// No usable cache at startup.
    Initial,
    /// Poll timer.
    Tick,
    /// View became visible with an invalid cache.
    Resume,
    /// `refresh()`.
    Manual,
}

impl FetchTrigger {
    /// Whether the view should show a loading state. Background fetches
    /// keep the current list on screen without a spinner.
    fn shows_loading(self) -> bool {
        matches!(self, FetchTrigger::Initial | FetchTrigger::Manual)
    }

    fn as_str(self) -> &'static str {
        match self {
            FetchTrigger::Initial => "initial",
            FetchTrigger::Tick => "tick",
            FetchTrigger::Resume => "resume",
            FetchTrigger::Manual => "manual",
        }
    }
}

pub(crate) struct SyncWorker {
    store: Arc<dyn JobStore>,
    cache: JobCache,
    config: SyncConfig,
    commands: mpsc::Receiver<SyncCommand>,
    activity: watch::Receiver<Activity>,
    view: watch::Sender<JobListView>,
    shutdown: Arc<Notify>,
    active: bool,
    /// False once every activity sender is gone; the last value then sticks.
    activity_open: bool,
    commands_open: bool,
    /// Start of the most recent successful fetch.
    last_fetch: Option<Instant>,
}

impl SyncWorker {
    pub(crate) fn new(
        store: Arc<dyn JobStore>,
        cache: JobCache,
        config: SyncConfig,
        commands: mpsc::Receiver<SyncCommand>,
        activity: watch::Receiver<Activity>,
        view: watch::Sender<JobListView>,
        shutdown: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            cache,
            config,
            commands,
            activity,
            view,
            shutdown,
            active: true,
            activity_open: true,
            commands_open: true,
            last_fetch: None,
        }
    }

    pub(crate) async fn run(mut self) {
        self.active = self.activity.borrow_and_update().is_active();
        tracing::info!(
            name = %self.config.name,
            active = self.active,
            "job list synchronizer started"
        );

        if self.load_initial().await.is_continue() {
            self.event_loop().await;
        }

        tracing::info!(name = %self.config.name, "job list synchronizer stopped");
    }

    /// Serve the cache if it is valid, otherwise fetch.
    async fn load_initial(&mut self) -> ControlFlow<()> {
        match self.cache.get_entry().await {
            Some(entry) => {
                let jobs = sort_by_status_priority(entry.jobs);
                tracing::debug!(name = %self.config.name, jobs = jobs.len(), "serving cached job list");
                let state = self.settled_state();
                self.view.send_modify(|view| {
                    view.jobs = Arc::new(jobs);
                    view.state = state;
                    view.last_error = None;
                    view.fetched_at = Some(entry.timestamp);
                    view.from_cache = true;
                });
                ControlFlow::Continue(())
            }
            None => self.fetch(FetchTrigger::Initial, Vec::new()).await,
        }
    }

    async fn event_loop(&mut self) {
        let period = self.config.poll_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let flow = tokio::select! {
                _ = self.shutdown.notified() => {
                    tracing::info!(name = %self.config.name, "job list synchronizer received shutdown signal");
                    ControlFlow::Break(())
                }
                cmd = self.commands.recv(), if self.commands_open => match cmd {
                    Some(SyncCommand::Refresh { reply }) => self.refresh(reply).await,
                    None => {
                        self.commands_open = false;
                        ControlFlow::Break(())
                    }
                },
                _ = ticker.tick(), if self.active => self.on_tick().await,
                changed = self.activity.changed(), if self.activity_open => match changed {
                    Ok(()) => {
                        let active = self.activity.borrow_and_update().is_active();
                        self.on_activity(active, &mut ticker).await
                    }
                    Err(_) => {
                        tracing::debug!(
                            name = %self.config.name,
                            active = self.active,
                            "activity signal dropped; keeping last state"
                        );
                        self.activity_open = false;
                        ControlFlow::Continue(())
                    }
                },
            };

            if flow.is_break() {
                break;
            }
        }
    }

    async fn refresh(&mut self, reply: RefreshReply) -> ControlFlow<()> {
        tracing::info!(name = %self.config.name, "manual refresh requested");
        self.cache.clear().await;
        self.fetch(FetchTrigger::Manual, vec![reply]).await
    }

    async fn on_tick(&mut self) -> ControlFlow<()> {
        if !self.cooldown_elapsed() {
            tracing::debug!(
                name = %self.config.name,
                cooldown = ?self.config.fetch_cooldown,
                "skipping scheduled fetch; last fetch is too recent"
            );
            return ControlFlow::Continue(());
        }
        self.fetch(FetchTrigger::Tick, Vec::new()).await
    }

    async fn on_activity(&mut self, active: bool, ticker: &mut Interval) -> ControlFlow<()> {
        if active == self.active {
            return ControlFlow::Continue(());
        }
        self.active = active;

        if !active {
            tracing::info!(name = %self.config.name, "view hidden; pausing background refresh");
            self.set_state(SyncState::Paused);
            return ControlFlow::Continue(());
        }

        tracing::info!(name = %self.config.name, "view visible; resuming background refresh");
        self.set_state(SyncState::Ready);

        let flow = if self.cache.is_valid().await {
            ControlFlow::Continue(())
        } else {
            self.fetch(FetchTrigger::Resume, Vec::new()).await
        };
        ticker.reset();
        flow
    }

    /// Fetch from the store, then publish and cache the sorted result.
    ///
    /// Refresh commands arriving meanwhile join `waiters` and share the
    /// outcome instead of starting another fetch.
    async fn fetch(&mut self, trigger: FetchTrigger, mut waiters: Vec<RefreshReply>) -> ControlFlow<()> {
        if trigger.shows_loading() {
            self.set_state(SyncState::Loading);
        }
        tracing::debug!(name = %self.config.name, trigger = trigger.as_str(), "fetching jobs");

        let started = Instant::now();
        let mut generation = self.cache.generation();
        let Some(mut result) = self.request(&mut waiters, &mut generation).await else {
            return ControlFlow::Break(());
        };

        // Someone else invalidated the cache while the request was out, so
        // the response may predate their write. Ask once more.
        if result.is_ok() && self.cache.generation() != generation {
            tracing::debug!(name = %self.config.name, "job cache invalidated during fetch; fetching again");
            generation = self.cache.generation();
            result = match self.request(&mut waiters, &mut generation).await {
                Some(result) => result,
                None => return ControlFlow::Break(()),
            };
        }

        match result {
            Ok(jobs) => {
                let jobs = sort_by_status_priority(jobs);
                let inconsistent = jobs.iter().filter(|job| !job.is_consistent()).count();
                if inconsistent > 0 {
                    tracing::warn!(
                        name = %self.config.name,
                        inconsistent,
                        "store returned jobs with timestamps that do not match their status"
                    );
                }

                let captured = Utc::now();
                self.cache.set_if_generation(&jobs, generation, captured).await;
                self.last_fetch = Some(started);

                let count = jobs.len();
                let state = self.settled_state();
                self.view.send_modify(|view| {
                    view.jobs = Arc::new(jobs);
                    view.state = state;
                    view.last_error = None;
                    view.fetched_at = Some(captured);
                    view.from_cache = false;
                });
                tracing::debug!(
                    name = %self.config.name,
                    trigger = trigger.as_str(),
                    jobs = count,
                    "job list updated"
                );

                for waiter in waiters {
                    let _ = waiter.send(Ok(count));
                }
            }
            Err(err) => {
                tracing::warn!(
                    name = %self.config.name,
                    trigger = trigger.as_str(),
                    transient = err.is_transient(),
                    "failed to fetch jobs: {}",
                    err
                );

                let state = self.settled_state();
                let message = err.to_string();
                self.view.send_modify(|view| {
                    view.state = state;
                    view.last_error = Some(message);
                });

                for waiter in waiters {
                    let _ = waiter.send(Err(SyncError::Fetch(err.clone())));
                }
            }
        }

        ControlFlow::Continue(())
    }

    /// Await one store request, taking in refresh commands meanwhile.
    ///
    /// A joining refresh clears the cache like any other refresh. When that
    /// clear is the only one since `generation`, the request is still
    /// considered current and `generation` moves past it. Returns `None` on
    /// shutdown.
    async fn request(
        &mut self,
        waiters: &mut Vec<RefreshReply>,
        generation: &mut u64,
    ) -> Option<Result<Vec<Job>, JobStoreError>> {
        let store = Arc::clone(&self.store);
        let request = async move { store.fetch_all_jobs().await };
        tokio::pin!(request);

        loop {
            tokio::select! {
                result = &mut request => return Some(result),
                _ = self.shutdown.notified() => {
                    tracing::info!(
                        name = %self.config.name,
                        "job list synchronizer received shutdown signal during fetch"
                    );
                    return None;
                }
                cmd = self.commands.recv(), if self.commands_open => match cmd {
                    Some(SyncCommand::Refresh { reply }) => {
                        tracing::debug!(name = %self.config.name, "refresh joined in-flight fetch");
                        waiters.push(reply);
                        self.set_state(SyncState::Loading);
                        if self.cache.invalidate().await == *generation {
                            *generation += 1;
                        }
                    }
                    None => self.commands_open = false,
                },
            }
        }
    }

    fn settled_state(&self) -> SyncState {
        if self.active {
            SyncState::Ready
        } else {
            SyncState::Paused
        }
    }

    fn set_state(&self, state: SyncState) {
        self.view.send_if_modified(|view| {
            if view.state == state {
                false
            } else {
                view.state = state;
                true
            }
        });
    }

    fn cooldown_elapsed(&self) -> bool {
        self.last_fetch
            .is_none_or(|at| at.elapsed() >= self.config.fetch_cooldown)
    }
}
