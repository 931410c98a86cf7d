use std::time::Instant;

use log::info;

use crate::db::Connector;
use crate::models::{ConnectionConfig, TestConnectionResult};

use super::metadata::DEFAULT_QUERY;

/// Open a connection, run the default query, close it and report latency.
pub async fn test_connection<C: Connector>(
    connector: &C,
    config: &ConnectionConfig,
) -> TestConnectionResult {
    let start = Instant::now();

    let mut session = match connector.open(config).await {
        Ok(session) => session,
        Err(e) => {
            return TestConnectionResult {
                success: false,
                latency_ms: None,
                error: Some(e.to_string()),
            }
        }
    };

    let outcome = session.run(DEFAULT_QUERY.trim().trim_end_matches(';')).await;
    session.close().await;

    match outcome {
        Ok(_) => {
            let latency = start.elapsed().as_millis() as u64;
            info!("Connection test succeeded in {} ms", latency);
            TestConnectionResult {
                success: true,
                latency_ms: Some(latency),
                error: None,
            }
        }
        Err(e) => TestConnectionResult {
            success: false,
            latency_ms: None,
            error: Some(e.to_string()),
        },
    }
}
