use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::backoff::Backoff;
use super::error::SchedulerError;
use super::handle::SchedulerHandle;
use super::state::{ForceSnapshotAccepted, LiveVisibility, SchedulerState, SchedulerStatus};
use super::SchedulerConfig;
use crate::fetch::{AircraftSet, AircraftSource, ElementCatalog, FetchError, TleSource};
use crate::horizon::HorizonProfile;
use crate::observer::ObserverLocation;
use crate::snapshot::SnapshotStore;
use crate::visibility::{compute_visibility, VisibilityReport};

const COMMAND_QUEUE: usize = 16;
const MIN_TICK: Duration = Duration::from_millis(10);

type ForceReply = Result<ForceSnapshotAccepted, SchedulerError>;

pub(super) enum Command {
    ForceSnapshot {
        wait_for_aircraft: bool,
        reply: oneshot::Sender<ForceReply>,
    },
}

enum FetchOutcome {
    Tle(Result<Arc<ElementCatalog>, FetchError>),
    Aircraft(Result<Arc<AircraftSet>, FetchError>),
}

struct PendingForce {
    reply: oneshot::Sender<ForceReply>,
    deadline: DateTime<Utc>,
}

/// Background task owning all refresh, computation and snapshot timing.
///
/// Every mutation of [`SchedulerState`], the element catalog, the aircraft
/// set and the published report happens inside this one loop. Fetches run as
/// separate tasks and report back over a channel, so a slow upstream never
/// holds up the tick.
pub struct Coordinator {
    config: SchedulerConfig,
    observer: ObserverLocation,
    horizon: Arc<HorizonProfile>,
    tle: Arc<dyn TleSource>,
    aircraft: Arc<dyn AircraftSource>,
    store: Arc<SnapshotStore>,

    state: SchedulerState,
    catalog: Arc<ElementCatalog>,
    planes: Arc<AircraftSet>,

    tle_backoff: Backoff,
    aircraft_backoff: Backoff,
    save_backoff: Backoff,
    tle_in_flight: bool,
    aircraft_in_flight: bool,
    snapshot_due: bool,
    pending_force: Option<PendingForce>,

    commands: mpsc::Receiver<Command>,
    results_tx: mpsc::UnboundedSender<FetchOutcome>,
    results: mpsc::UnboundedReceiver<FetchOutcome>,
    latest: watch::Sender<Arc<LiveVisibility>>,
    status: watch::Sender<SchedulerStatus>,
}

/// Running coordinator task.
pub struct SchedulerTask {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl SchedulerTask {
    /// Stop the loop after the current step finishes. A snapshot write in
    /// progress is allowed to complete.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        if let Err(err) = self.join.await {
            log::error!("Scheduler task failed: {}", err);
        }
    }
}

impl Coordinator {
    /// Build the coordinator and the handle request handlers use to reach
    /// it. Whatever the sources already hold (a warm TLE cache) is picked up
    /// as the starting data.
    pub fn new(
        config: SchedulerConfig,
        observer: ObserverLocation,
        horizon: Arc<HorizonProfile>,
        tle: Arc<dyn TleSource>,
        aircraft: Arc<dyn AircraftSource>,
        store: Arc<SnapshotStore>,
        now: DateTime<Utc>,
    ) -> (Self, SchedulerHandle) {
        let catalog = tle.cached();
        let planes = aircraft.cached();

        let state = SchedulerState {
            last_tle_fetch: tle.last_success(),
            last_aircraft_fetch: aircraft.last_success(),
            next_snapshot_at: Some(aligned_after(now, config.snapshot_interval)),
            aircraft_rate_limit_until: aircraft.rate_limited_until(),
            satellites_tracked: catalog.len(),
            aircraft_tracked: planes.len(),
            ..Default::default()
        };

        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (results_tx, results) = mpsc::unbounded_channel();
        let (latest, latest_rx) = watch::channel(Arc::new(LiveVisibility {
            report: VisibilityReport::empty(now),
            tle_fetched_at: state.last_tle_fetch,
            aircraft_fetched_at: state.last_aircraft_fetch,
        }));
        let (status, status_rx) = watch::channel(SchedulerStatus::from(&state));

        let handle = SchedulerHandle::new(commands_tx, latest_rx, status_rx, store.clone());

        let coordinator = Self {
            tle_backoff: Backoff::new(config.tick, config.tle_fetch_interval),
            aircraft_backoff: Backoff::new(config.tick, config.plane_fetch_interval),
            save_backoff: Backoff::new(config.tick, config.snapshot_interval),
            config,
            observer,
            horizon,
            tle,
            aircraft,
            store,
            state,
            catalog,
            planes,
            tle_in_flight: false,
            aircraft_in_flight: false,
            snapshot_due: false,
            pending_force: None,
            commands,
            results_tx,
            results,
            latest,
            status,
        };

        (coordinator, handle)
    }

    pub fn spawn(self) -> SchedulerTask {
        let (stop_tx, stop_rx) = oneshot::channel();
        let join = tokio::spawn(self.run(stop_rx));
        SchedulerTask { stop_tx, join }
    }

    pub async fn run(mut self, mut stop_rx: oneshot::Receiver<()>) {
        self.startup(Utc::now()).await;

        let mut ticker = tokio::time::interval(self.config.tick.max(MIN_TICK));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => self.tick(Utc::now()).await,
                Some(command) = self.commands.recv() => {
                    self.handle_command(command, Utc::now()).await
                }
                Some(outcome) = self.results.recv() => self.on_fetch(outcome, Utc::now()).await,
            }
        }

        log::info!("Scheduler stopped");
    }

    async fn startup(&mut self, now: DateTime<Utc>) {
        log::info!(
            "Scheduler starting with {} cached element sets, first snapshot at {}",
            self.catalog.len(),
            self.state
                .next_snapshot_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_default()
        );
        self.purge(now).await;
        self.recompute(now);
        self.publish_status();
    }

    async fn tick(&mut self, now: DateTime<Utc>) {
        if self.tle_due(now) {
            self.spawn_tle_fetch();
        }
        if self.aircraft_due(now) {
            self.spawn_aircraft_fetch();
        }

        self.expire_stale_aircraft(now);

        if self
            .pending_force
            .as_ref()
            .is_some_and(|pending| now >= pending.deadline)
        {
            if let Some(pending) = self.pending_force.take() {
                log::warn!("No aircraft data before force snapshot deadline, saving without");
                self.complete_force(pending.reply, now).await;
            }
        }

        if self.state.next_snapshot_at.is_some_and(|at| now >= at) {
            self.state.next_snapshot_at = Some(now + chrono_duration(self.config.snapshot_interval));
            self.snapshot_due = true;
        }
        if self.snapshot_due && self.save_backoff.ready(now) {
            self.scheduled_save(now).await;
        }

        self.publish_status();
    }

    async fn on_fetch(&mut self, outcome: FetchOutcome, now: DateTime<Utc>) {
        match outcome {
            FetchOutcome::Tle(result) => {
                self.tle_in_flight = false;
                match result {
                    Ok(catalog) => {
                        log::info!("Fetched {} element sets", catalog.len());
                        self.catalog = catalog;
                        self.state.last_tle_fetch = Some(now);
                        self.state.last_tle_error = None;
                        self.tle_backoff.reset();
                    }
                    Err(err) => {
                        let delay = self.tle_backoff.fail(now);
                        log::warn!(
                            "TLE fetch failed, keeping {} cached element sets, retry in {:?}: {}",
                            self.catalog.len(),
                            delay,
                            err
                        );
                        self.state.last_tle_error = Some(err.to_string());
                    }
                }
                self.recompute(now);
            }
            FetchOutcome::Aircraft(result) => {
                self.aircraft_in_flight = false;
                match result {
                    Ok(planes) => {
                        log::debug!("Fetched {} aircraft", planes.len());
                        self.planes = planes;
                        self.state.last_aircraft_fetch = Some(now);
                        self.state.last_aircraft_error = None;
                        self.aircraft_backoff.reset();
                    }
                    Err(err) => {
                        if !matches!(err, FetchError::RateLimited { .. }) {
                            let delay = self.aircraft_backoff.fail(now);
                            log::warn!("Aircraft fetch failed, retry in {:?}: {}", delay, err);
                        }
                        self.state.last_aircraft_error = Some(err.to_string());
                        self.expire_stale_aircraft(now);
                    }
                }
                self.state.aircraft_rate_limit_until = self.aircraft.rate_limited_until();

                match self.pending_force.take() {
                    Some(pending) => self.complete_force(pending.reply, now).await,
                    None => {
                        self.recompute(now);
                    }
                }
            }
        }

        self.publish_status();
    }

    async fn handle_command(&mut self, command: Command, now: DateTime<Utc>) {
        match command {
            Command::ForceSnapshot {
                wait_for_aircraft,
                reply,
            } => self.force_snapshot(wait_for_aircraft, reply, now).await,
        }
        self.publish_status();
    }

    async fn force_snapshot(
        &mut self,
        wait_for_aircraft: bool,
        reply: oneshot::Sender<ForceReply>,
        now: DateTime<Utc>,
    ) {
        let blocked_until = [
            self.state.force_cooldown_until,
            self.pending_force.as_ref().map(|p| p.deadline),
        ]
        .into_iter()
        .flatten()
        .filter(|until| now < *until)
        .max();

        if let Some(until) = blocked_until {
            let retry_after_seconds = ceil_seconds(until - now);
            log::info!(
                "Rejected force snapshot, available again in {}s",
                retry_after_seconds
            );
            let _ = reply.send(Err(SchedulerError::RateLimited {
                retry_after_seconds,
            }));
            return;
        }

        self.state.force_cooldown_until =
            Some(now + chrono_duration(self.config.force_snapshot_cooldown));

        let no_aircraft = self.state.last_aircraft_fetch.is_none() || self.planes.is_empty();
        if wait_for_aircraft && no_aircraft {
            log::info!(
                "Force snapshot waiting up to {:?} for aircraft data",
                self.config.force_wait_timeout
            );
            self.pending_force = Some(PendingForce {
                reply,
                deadline: now + chrono_duration(self.config.force_wait_timeout),
            });
            if !self.aircraft_in_flight && !self.aircraft_rate_limited(now) {
                self.spawn_aircraft_fetch();
            }
            return;
        }

        self.complete_force(reply, now).await;
    }

    async fn complete_force(&mut self, reply: oneshot::Sender<ForceReply>, now: DateTime<Utc>) {
        let live = self.recompute(now);
        let report = &live.report;

        let result = match self.store.save(report).await {
            Ok(id) => {
                log::info!(
                    "Saved forced snapshot {} ({} satellites, {} aircraft)",
                    id,
                    report.satellite_count(),
                    report.aircraft_count()
                );
                self.state.last_snapshot_id = Some(id);
                self.state.last_snapshot_error = None;
                Ok(ForceSnapshotAccepted {
                    id,
                    timestamp: report.timestamp,
                    satellites: report.satellite_count(),
                    aircraft: report.aircraft_count(),
                })
            }
            Err(err) => {
                log::error!("Forced snapshot save failed: {}", err);
                self.state.last_snapshot_error = Some(err.to_string());
                Err(SchedulerError::Storage(err))
            }
        };

        let _ = reply.send(result);
    }

    async fn scheduled_save(&mut self, now: DateTime<Utc>) {
        let live = self.recompute(now);
        match self.store.save(&live.report).await {
            Ok(id) => {
                log::info!(
                    "Saved snapshot {} ({} satellites, {} aircraft)",
                    id,
                    live.report.satellite_count(),
                    live.report.aircraft_count()
                );
                self.snapshot_due = false;
                self.save_backoff.reset();
                self.state.last_snapshot_id = Some(id);
                self.state.last_snapshot_error = None;
                self.purge(now).await;
            }
            Err(err) => {
                let delay = self.save_backoff.fail(now);
                log::error!("Snapshot save failed, retrying in {:?}: {}", delay, err);
                self.state.last_snapshot_error = Some(err.to_string());
            }
        }
    }

    async fn purge(&mut self, now: DateTime<Utc>) {
        match self
            .store
            .purge_older_than(self.config.retention_days, now)
            .await
        {
            Ok(0) => {}
            Ok(removed) => log::info!(
                "Purged {} snapshots older than {} days",
                removed,
                self.config.retention_days
            ),
            Err(err) => log::warn!("Retention sweep failed: {}", err),
        }
    }

    /// Recompute visibility from the current data and publish it.
    fn recompute(&mut self, now: DateTime<Utc>) -> Arc<LiveVisibility> {
        let report = compute_visibility(
            &self.observer,
            &self.horizon,
            &self.catalog,
            &self.planes,
            now,
        );
        log::debug!(
            "Visible: {} satellites, {} aircraft",
            report.satellite_count(),
            report.aircraft_count()
        );

        self.state.last_computation = Some(now);
        let live = Arc::new(LiveVisibility {
            report,
            tle_fetched_at: self.state.last_tle_fetch,
            aircraft_fetched_at: self.state.last_aircraft_fetch,
        });
        self.latest.send_replace(live.clone());
        live
    }

    fn publish_status(&mut self) {
        self.state.satellites_tracked = self.catalog.len();
        self.state.aircraft_tracked = self.planes.len();
        self.status.send_replace(SchedulerStatus::from(&self.state));
    }

    fn expire_stale_aircraft(&mut self, now: DateTime<Utc>) {
        if self.planes.is_empty() {
            return;
        }
        let stale_after = chrono_duration(self.config.aircraft_stale_after);
        let stale = self
            .state
            .last_aircraft_fetch
            .is_none_or(|t| now - t > stale_after);
        if stale {
            log::warn!(
                "Aircraft data older than {:?}, dropping {} aircraft",
                self.config.aircraft_stale_after,
                self.planes.len()
            );
            self.planes = Arc::new(AircraftSet::new());
            self.recompute(now);
        }
    }

    fn tle_due(&self, now: DateTime<Utc>) -> bool {
        !self.tle_in_flight
            && self.tle_backoff.ready(now)
            && interval_elapsed(self.state.last_tle_fetch, self.config.tle_fetch_interval, now)
    }

    fn aircraft_due(&self, now: DateTime<Utc>) -> bool {
        !self.aircraft_in_flight
            && !self.aircraft_rate_limited(now)
            && self.aircraft_backoff.ready(now)
            && interval_elapsed(
                self.state.last_aircraft_fetch,
                self.config.plane_fetch_interval,
                now,
            )
    }

    fn aircraft_rate_limited(&self, now: DateTime<Utc>) -> bool {
        self.state
            .aircraft_rate_limit_until
            .is_some_and(|until| now < until)
    }

    fn spawn_tle_fetch(&mut self) {
        self.tle_in_flight = true;
        let source = self.tle.clone();
        let results = self.results_tx.clone();
        tokio::spawn(async move {
            let outcome = source.fetch().await;
            let _ = results.send(FetchOutcome::Tle(outcome));
        });
    }

    fn spawn_aircraft_fetch(&mut self) {
        self.aircraft_in_flight = true;
        let source = self.aircraft.clone();
        let results = self.results_tx.clone();
        tokio::spawn(async move {
            let outcome = source.fetch().await;
            let _ = results.send(FetchOutcome::Aircraft(outcome));
        });
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

fn interval_elapsed(last: Option<DateTime<Utc>>, interval: Duration, now: DateTime<Utc>) -> bool {
    last.is_none_or(|t| now - t >= chrono_duration(interval))
}

fn ceil_seconds(d: chrono::Duration) -> u64 {
    let millis = d.num_milliseconds().max(0);
    (((millis + 999) / 1000) as u64).max(1)
}

/// Next instant after `now` that is a whole multiple of `interval` since the
/// Unix epoch.
fn aligned_after(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = interval.as_secs().max(1) as i64;
    let next = (now.timestamp().div_euclid(step) + 1) * step;
    DateTime::from_timestamp(next, 0).unwrap_or(now)
}
