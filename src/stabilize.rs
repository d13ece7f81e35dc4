use std::time::Duration;

use serde_json::Value;

use crate::config::Timings;
use crate::error::{PilotError, PilotResult};
use crate::page::PageHandle;

const READY_STATE: &str = "document.readyState";

/// Resources seen so far. The timing buffer stops filling at its size limit,
/// so after the first call new entries are counted by an observer.
const RESOURCE_COUNT: &str = r#"(() => {
  if (typeof window.__pilotResources !== 'number') {
    window.__pilotResources = performance.getEntriesByType('resource').length;
    try {
      new PerformanceObserver((list) => { window.__pilotResources += list.getEntries().length; })
        .observe({ type: 'resource' });
    } catch (e) {}
  }
  return window.__pilotResources;
})()"#;

const BUSY_MARKERS: &str = r#"!!document.querySelector('[aria-busy="true"], [role="progressbar"], .loading, .spinner, .loader, [class*="skeleton"], progress:not([value])')"#;

/// Resource count must hold still this long to count as network quiet.
const QUIET_WINDOW: Duration = Duration::from_millis(500);

/// Best-effort wait before every perception. Never fails; each sub-wait
/// only bounds how long the step may stall.
pub async fn wait_for_stable(page: &dyn PageHandle, timings: &Timings) {
    let interval = Duration::from_millis(timings.poll_interval_ms.max(10));

    if let Err(e) = dom_ready(page, Duration::from_millis(timings.dom_ready_ms), interval).await {
        tracing::warn!(target: "pilot::stabilize", error = %e, "continuing before DOM ready");
    }

    let network = network_quiet(page, Duration::from_millis(timings.network_idle_ms), interval);
    let busy = busy_cleared(page, Duration::from_millis(timings.busy_indicator_ms), interval);
    let (network, busy) = tokio::join!(network, busy);
    for result in [network, busy] {
        if let Err(e) = result {
            tracing::debug!(target: "pilot::stabilize", error = %e, "sub-wait gave up");
        }
    }

    tokio::time::sleep(Duration::from_millis(timings.settle_ms)).await;
}

async fn dom_ready(page: &dyn PageHandle, limit: Duration, interval: Duration) -> PilotResult<()> {
    poll_until(page, READY_STATE, limit, interval, "DOM ready", |v| {
        matches!(v.as_str(), Some("interactive" | "complete"))
    })
    .await
}

async fn busy_cleared(page: &dyn PageHandle, limit: Duration, interval: Duration) -> PilotResult<()> {
    poll_until(page, BUSY_MARKERS, limit, interval, "busy indicators", |v| {
        v.as_bool() == Some(false)
    })
    .await
}

async fn network_quiet(page: &dyn PageHandle, limit: Duration, interval: Duration) -> PilotResult<()> {
    let watch = async {
        let mut last: Option<u64> = None;
        let mut still_for = Duration::ZERO;
        loop {
            let count = page.evaluate(RESOURCE_COUNT).await.ok().and_then(|v| v.as_u64());
            if count.is_some() && count == last {
                still_for += interval;
                if still_for >= QUIET_WINDOW {
                    return;
                }
            } else {
                still_for = Duration::ZERO;
            }
            last = count;
            tokio::time::sleep(interval).await;
        }
    };
    tokio::time::timeout(limit, watch)
        .await
        .map_err(|_| PilotError::PerceptionDegraded(format!("network busy after {limit:?}")))
}

async fn poll_until<F>(
    page: &dyn PageHandle,
    expression: &str,
    limit: Duration,
    interval: Duration,
    what: &str,
    done: F,
) -> PilotResult<()>
where
    F: Fn(&Value) -> bool,
{
    let poll = async {
        loop {
            if let Ok(value) = page.evaluate(expression).await {
                if done(&value) {
                    return;
                }
            }
            tokio::time::sleep(interval).await;
        }
    };
    tokio::time::timeout(limit, poll)
        .await
        .map_err(|_| PilotError::PerceptionDegraded(format!("{what} not reached after {limit:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_counter_is_installed_once_per_document() {
        let guard = RESOURCE_COUNT.find("typeof window.__pilotResources").unwrap();
        let observer = RESOURCE_COUNT.find("new PerformanceObserver").unwrap();
        let buffered = RESOURCE_COUNT.find("getEntriesByType").unwrap();
        assert!(guard < buffered && buffered < observer);
        assert!(!RESOURCE_COUNT.contains("buffered: true"));
    }
}
