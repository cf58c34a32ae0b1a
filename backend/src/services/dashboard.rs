//! Operational dashboard

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveTime, Utc};
use shared::{
    AlertCount, DashboardAlert, DashboardSummary, DashboardWindow, FumigationStatus,
    StatusCount, TodaySummary,
};

use crate::config::DashboardConfig;
use crate::error::AppResult;
use crate::ledger::{settle, Ledger};

#[derive(Clone)]
pub struct DashboardService {
    ledger: Arc<dyn Ledger>,
    thresholds: DashboardConfig,
}

impl DashboardService {
    pub fn new(ledger: Arc<dyn Ledger>, thresholds: DashboardConfig) -> Self {
        Self { ledger, thresholds }
    }

    fn hours(&self, alert: DashboardAlert) -> i64 {
        match alert {
            DashboardAlert::NoQc => self.thresholds.no_qc_hours,
            DashboardAlert::MissingNetWeight => self.thresholds.missing_net_weight_hours,
            DashboardAlert::NoFumigation => self.thresholds.no_fumigation_hours,
        }
    }

    /// Query bounds for `now`; "today" is the calendar day in `now`'s offset
    pub fn window(&self, now: DateTime<FixedOffset>) -> DashboardWindow {
        let today_start = now - (now.time() - NaiveTime::MIN);
        let cutoff = |alert| (now - Duration::hours(self.hours(alert))).with_timezone(&Utc);

        DashboardWindow {
            today_start: today_start.with_timezone(&Utc),
            today_end: (today_start + Duration::days(1)).with_timezone(&Utc),
            no_qc_cutoff: cutoff(DashboardAlert::NoQc),
            missing_net_weight_cutoff: cutoff(DashboardAlert::MissingNetWeight),
            no_fumigation_cutoff: cutoff(DashboardAlert::NoFumigation),
        }
    }

    /// Summary as seen from the server's local clock
    pub async fn summary(&self) -> AppResult<DashboardSummary> {
        let now = Local::now();
        self.summary_at(now.with_timezone(now.offset())).await
    }

    pub async fn summary_at(&self, now: DateTime<FixedOffset>) -> AppResult<DashboardSummary> {
        let window = self.window(now);
        let mut tx = self.ledger.begin().await?;
        let result = tx.dashboard_counts(&window).await;
        let counts = settle(tx, result).await?;

        let fumigation_status = FumigationStatus::ALL
            .iter()
            .zip(counts.status_counts)
            .map(|(status, count)| StatusCount {
                status: *status,
                label: status.label().to_string(),
                count,
            })
            .collect();

        let alerts = DashboardAlert::ALL
            .iter()
            .map(|alert| {
                let hours = self.hours(*alert);
                let count = match alert {
                    DashboardAlert::NoQc => counts.no_qc,
                    DashboardAlert::MissingNetWeight => counts.missing_net_weight,
                    DashboardAlert::NoFumigation => counts.no_fumigation,
                };
                AlertCount {
                    alert: *alert,
                    label: alert.label(hours),
                    hours,
                    count,
                }
            })
            .collect();

        Ok(DashboardSummary {
            generated_at: now,
            today: TodaySummary {
                lots_received: counts.lots_received_today,
                kilograms_received: counts.kilograms_received_today,
            },
            fumigation_status,
            alerts,
        })
    }
}
