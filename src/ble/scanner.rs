//! BLE scanning functionality.
//!
//! A scan cycle starts the adapter's scan, lets advertisement reports
//! accumulate for a fixed time, stops the scan and collects the results.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ble::binding::{AdapterBinding, ScanResult};
use crate::error::{Error, Result};

/// A running native scan. Dropping an unstopped session stops the scan in
/// the background.
pub(crate) struct ScanSession {
    adapter: Arc<dyn AdapterBinding>,
    active: bool,
}

impl ScanSession {
    pub(crate) async fn start(adapter: Arc<dyn AdapterBinding>) -> Result<Self> {
        info!("Starting BLE scan on {}", adapter.identifier());
        adapter.scan_start().await?;
        Ok(Self {
            adapter,
            active: true,
        })
    }

    pub(crate) async fn stop(mut self) -> Result<()> {
        self.active = false;
        info!("Stopping BLE scan on {}", self.adapter.identifier());
        self.adapter.scan_stop().await?;
        Ok(())
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        if !self.active {
            return;
        }

        let adapter = self.adapter.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = adapter.scan_stop().await {
                        warn!("Failed to stop abandoned scan on {}: {}", adapter.identifier(), e);
                    }
                });
            }
            Err(_) => warn!(
                "Scan on {} abandoned outside a runtime; it was not stopped",
                self.adapter.identifier()
            ),
        }
    }
}

/// Run one scan cycle of `duration` on `adapter`.
///
/// # Errors
///
/// `Canceled` if `signal` fires before the cycle completes (the scan is
/// still stopped), or the binding's error if the scan cannot be started,
/// stopped or read.
pub(crate) async fn scan_cycle(
    adapter: &Arc<dyn AdapterBinding>,
    duration: Duration,
    signal: Option<&CancellationToken>,
) -> Result<Vec<ScanResult>> {
    if signal.is_some_and(|signal| signal.is_cancelled()) {
        return Err(Error::Canceled);
    }

    let session = ScanSession::start(adapter.clone()).await?;

    let canceled = match signal {
        Some(signal) => tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = signal.cancelled() => true,
        },
        None => {
            tokio::time::sleep(duration).await;
            false
        }
    };

    if canceled {
        debug!("Scan cycle on {} canceled", adapter.identifier());
        if let Err(e) = session.stop().await {
            warn!("Failed to stop canceled scan on {}: {}", adapter.identifier(), e);
        }
        return Err(Error::Canceled);
    }

    session.stop().await?;
    let results = adapter.scan_results().await?;
    debug!(
        "Scan cycle on {} collected {} results",
        adapter.identifier(),
        results.len()
    );
    Ok(results)
}
