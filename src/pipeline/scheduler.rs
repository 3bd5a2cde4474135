// src/pipeline/scheduler.rs
//! Fires pipeline runs on a fixed interval and/or at fixed times of day,
//! plus on manual triggers.
//!
//! Triggers go through a channel of capacity 1: while a run is pending a
//! second manual trigger is coalesced, and a trigger that fires during a run
//! is picked up once the run finishes. Runs never overlap.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use metrics::counter;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::{outcome_label, Pipeline, TriggerKind};
use crate::config::{parse_time_of_day, ConfigError, ScheduleConfig};
use crate::error::PipelineError;
use crate::retry::Cancel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub interval: Option<Duration>,
    /// Sorted, deduplicated local times.
    pub times_of_day: Vec<NaiveTime>,
    pub utc_offset_minutes: i32,
    pub run_on_start: bool,
}

impl Schedule {
    pub fn from_config(cfg: &ScheduleConfig) -> Result<Self, ConfigError> {
        let mut times = cfg
            .times_of_day
            .iter()
            .map(|t| parse_time_of_day(t))
            .collect::<Result<Vec<_>, _>>()?;
        times.sort();
        times.dedup();
        let interval = cfg
            .interval_minutes
            .filter(|m| *m > 0)
            .map(|m| Duration::from_secs(m * 60));
        if interval.is_none() && times.is_empty() {
            return Err(ConfigError::EmptySchedule);
        }
        Ok(Self {
            interval,
            times_of_day: times,
            utc_offset_minutes: cfg.utc_offset_minutes,
            run_on_start: cfg.run_on_start,
        })
    }

    /// Next time-of-day fire strictly after `now`.
    fn next_time_of_day(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let offset = ChronoDuration::minutes(self.utc_offset_minutes as i64);
        let local = (now + offset).naive_utc();
        let today = local.date();
        [today, today + ChronoDuration::days(1)]
            .iter()
            .flat_map(|d| self.times_of_day.iter().map(move |t| d.and_time(*t)))
            .find(|at| *at > local)
            .map(|at| at.and_utc() - offset)
    }

    /// Earliest upcoming fire. `last_fire` anchors the interval; without it
    /// the interval counts from `now`.
    pub fn next_fire(&self, now: DateTime<Utc>, last_fire: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        let by_interval = self.interval.and_then(|iv| {
            let iv = ChronoDuration::from_std(iv).ok()?;
            let anchor = last_fire.unwrap_or(now);
            let mut at = anchor + iv;
            while at <= now {
                at += iv;
            }
            Some(at)
        });
        match (by_interval, self.next_time_of_day(now)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Result of a manual trigger request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAck {
    Queued,
    /// A trigger is already waiting; this one was coalesced into it.
    AlreadyPending,
    /// The scheduler is gone.
    Closed,
}

#[derive(Debug, Clone)]
pub struct TriggerSender(mpsc::Sender<TriggerKind>);

impl TriggerSender {
    pub fn trigger_run(&self) -> TriggerAck {
        match self.0.try_send(TriggerKind::Manual) {
            Ok(()) => TriggerAck::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => TriggerAck::AlreadyPending,
            Err(mpsc::error::TrySendError::Closed(_)) => TriggerAck::Closed,
        }
    }
}

pub fn trigger_channel() -> (TriggerSender, mpsc::Receiver<TriggerKind>) {
    let (tx, rx) = mpsc::channel(1);
    (TriggerSender(tx), rx)
}

async fn run_logged(pipeline: &Pipeline, trigger: TriggerKind, cancel: &Cancel) {
    counter!("pipeline_triggers_total", "kind" => trigger_label(trigger)).increment(1);
    match pipeline.run(trigger, cancel).await {
        Ok(rec) => tracing::info!(
            target: "scheduler",
            run_id = rec.run_id,
            outcome = outcome_label(&rec.outcome),
            "scheduled run complete"
        ),
        Err(PipelineError::RunInProgress) => {
            tracing::info!(target: "scheduler", trigger = ?trigger, "run already in progress; trigger skipped")
        }
        Err(e) => tracing::error!(target: "scheduler", error = %e, "run failed"),
    }
}

fn trigger_label(t: TriggerKind) -> &'static str {
    match t {
        TriggerKind::Startup => "startup",
        TriggerKind::Scheduled => "scheduled",
        TriggerKind::Manual => "manual",
    }
}

/// Spawn the scheduler loop. It exits when `shutdown` flips to `true` or
/// all trigger senders are dropped; the shutdown signal also cancels an
/// in-flight run between stages.
pub fn spawn_scheduler(
    pipeline: Arc<Pipeline>,
    schedule: Schedule,
    mut triggers: mpsc::Receiver<TriggerKind>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let cancel = Cancel::from_watch(shutdown.clone());
        if schedule.run_on_start {
            run_logged(&pipeline, TriggerKind::Startup, &cancel).await;
        }
        let mut last_fire: Option<DateTime<Utc>> = None;
        loop {
            let now = Utc::now();
            let next = schedule.next_fire(now, last_fire);
            let sleep_for = next
                .and_then(|at| (at - now).to_std().ok())
                .unwrap_or(Duration::from_secs(3_600));
            if let Some(at) = next {
                tracing::debug!(target: "scheduler", next = %at, "waiting for next fire");
            }

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    last_fire = next;
                    if next.is_some() {
                        run_logged(&pipeline, TriggerKind::Scheduled, &cancel).await;
                    }
                }
                msg = triggers.recv() => match msg {
                    Some(kind) => run_logged(&pipeline, kind, &cancel).await,
                    None => {
                        tracing::info!(target: "scheduler", "trigger channel closed, stopping");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!(target: "scheduler", "shutdown requested, stopping");
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, h, m, 0).unwrap()
    }

    fn times(ts: &[&str]) -> ScheduleConfig {
        ScheduleConfig {
            interval_minutes: None,
            times_of_day: ts.iter().map(|s| s.to_string()).collect(),
            utc_offset_minutes: 0,
            run_on_start: false,
        }
    }

    #[test]
    fn times_of_day_roll_over_to_tomorrow() {
        let s = Schedule::from_config(&times(&["17:00", "09:00", "13:00"])).unwrap();
        assert_eq!(s.next_fire(at(8, 0), None), Some(at(9, 0)));
        assert_eq!(s.next_fire(at(9, 0), None), Some(at(13, 0)));
        let tomorrow_nine = Utc.with_ymd_and_hms(2025, 6, 3, 9, 0, 0).unwrap();
        assert_eq!(s.next_fire(at(18, 30), None), Some(tomorrow_nine));
    }

    #[test]
    fn utc_offset_shifts_local_times() {
        // 09:00 at UTC-05:00 is 14:00 UTC
        let mut cfg = times(&["09:00"]);
        cfg.utc_offset_minutes = -300;
        let s = Schedule::from_config(&cfg).unwrap();
        assert_eq!(s.next_fire(at(10, 0), None), Some(at(14, 0)));
    }

    #[test]
    fn interval_and_times_take_the_earliest() {
        let mut cfg = times(&["12:00"]);
        cfg.interval_minutes = Some(30);
        let s = Schedule::from_config(&cfg).unwrap();
        assert_eq!(s.next_fire(at(10, 0), None), Some(at(10, 30)));
        assert_eq!(s.next_fire(at(11, 50), Some(at(11, 40))), Some(at(12, 0)));
        // a stale anchor skips forward past now
        assert_eq!(s.next_fire(at(10, 5), Some(at(9, 0))), Some(at(10, 30)));
    }

    #[test]
    fn empty_schedule_is_rejected() {
        assert!(matches!(Schedule::from_config(&times(&[])), Err(ConfigError::EmptySchedule)));
    }

    #[tokio::test]
    async fn manual_triggers_coalesce() {
        let (tx, mut rx) = trigger_channel();
        assert_eq!(tx.trigger_run(), TriggerAck::Queued);
        assert_eq!(tx.trigger_run(), TriggerAck::AlreadyPending);
        assert_eq!(rx.recv().await, Some(TriggerKind::Manual));
        assert_eq!(tx.trigger_run(), TriggerAck::Queued);
        drop(rx);
        assert_eq!(tx.trigger_run(), TriggerAck::Closed);
    }
}
