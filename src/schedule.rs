//! Weekly scheduled runs.
//!
//! One background task sleeps until the configured send slot and asks the
//! controller for a `scheduled` run. A slot that lands while another run is
//! active is skipped, not queued.

use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Datelike, NaiveTime, TimeDelta, TimeZone, Utc, Weekday};
use metrics::{counter, gauge};
use tokio::task::JoinHandle;

use crate::config::DeliverySettings;
use crate::metrics::{SCHEDULED_RUNS, SCHEDULER_NEXT_RUN_TS};
use crate::pipeline::{PipelineController, StartError};

pub const SCHEDULED_RUN_TYPE: &str = "scheduled";

/// Longest single sleep; the wall clock is re-read after each one.
const MAX_NAP: Duration = Duration::from_secs(60);

/// A weekly send slot in a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklySchedule {
    pub day: Weekday,
    pub at: NaiveTime,
    pub utc_offset_hours: i32,
}

impl WeeklySchedule {
    /// `None` when scheduled delivery is switched off.
    pub fn from_settings(s: &DeliverySettings) -> Result<Option<Self>> {
        if !s.scheduled {
            return Ok(None);
        }
        let day: Weekday = s
            .send_day
            .trim()
            .parse()
            .map_err(|_| anyhow!("send_day '{}' is not a weekday", s.send_day))?;
        let at = NaiveTime::parse_from_str(s.send_time.trim(), "%H:%M")
            .with_context(|| format!("send_time '{}' is not HH:MM", s.send_time))?;
        if !(-12..=14).contains(&s.utc_offset_hours) {
            bail!("utc_offset_hours {} out of range -12..=14", s.utc_offset_hours);
        }
        Ok(Some(Self {
            day,
            at,
            utc_offset_hours: s.utc_offset_hours,
        }))
    }

    /// First send slot strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let offset = TimeDelta::hours(i64::from(self.utc_offset_hours));
        let local = now.naive_utc() + offset;
        let days_ahead = (7 + i64::from(self.day.num_days_from_monday())
            - i64::from(local.weekday().num_days_from_monday()))
            % 7;
        let mut slot = (local.date() + TimeDelta::days(days_ahead)).and_time(self.at);
        if slot <= local {
            slot += TimeDelta::days(7);
        }
        Utc.from_utc_datetime(&(slot - offset))
    }
}

impl fmt::Display for WeeklySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} UTC{:+}",
            self.day,
            self.at.format("%H:%M"),
            self.utc_offset_hours
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Started,
    /// Another run held the controller.
    Skipped,
}

/// Ask the controller for a scheduled run.
pub fn trigger(controller: &PipelineController) -> Trigger {
    match controller.start(SCHEDULED_RUN_TYPE) {
        Ok(_) => {
            counter!(SCHEDULED_RUNS, "outcome" => "started").increment(1);
            tracing::info!("scheduled run started");
            Trigger::Started
        }
        Err(StartError::AlreadyRunning) => {
            counter!(SCHEDULED_RUNS, "outcome" => "skipped").increment(1);
            tracing::warn!("scheduled slot skipped, a run is already active");
            Trigger::Skipped
        }
    }
}

/// Background loop firing `trigger` once per weekly slot.
pub fn spawn_weekly(controller: PipelineController, schedule: WeeklySchedule) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(%schedule, "weekly scheduler started");
        loop {
            let next = schedule.next_after(Utc::now());
            gauge!(SCHEDULER_NEXT_RUN_TS).set(next.timestamp() as f64);
            tracing::info!(next_run = %next, "next scheduled run");
            sleep_until(next).await;
            trigger(&controller);
        }
    })
}

async fn sleep_until(at: DateTime<Utc>) {
    loop {
        let left = match (at - Utc::now()).to_std() {
            Ok(d) if !d.is_zero() => d,
            _ => return,
        };
        tokio::time::sleep(left.min(MAX_NAP)).await;
    }
}
