// service/background_jobs.rs
use std::sync::Arc;
use chrono::Utc;
use tokio::time::{interval, Duration};

use crate::AppState;

const RETRY_BATCH: i64 = 50;

/// Re-drives due settlements and agreed threads that never reached settlement.
pub async fn start_settlement_retry_job(app_state: Arc<AppState>) {
    let period = app_state.env.settlement_retry_interval_secs.max(1);
    let mut interval = interval(Duration::from_secs(period));

    loop {
        interval.tick().await;

        tracing::debug!("Running settlement retry job at {}", Utc::now());

        match app_state.settlement_service.retry_due(RETRY_BATCH).await {
            Ok(report) if report.settled + report.failed > 0 => tracing::info!(
                "Settlement retry job: {} settled, {} still pending",
                report.settled,
                report.failed
            ),
            Ok(_) => {}
            Err(e) => tracing::error!("Settlement retry job failed: {}", e),
        }
    }
}
