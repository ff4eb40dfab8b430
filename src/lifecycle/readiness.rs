//! Waits for the server to answer before pointing a browser at it.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Poll `url` until it answers with a success status or `timeout` passes.
pub async fn wait_until_ready(url: &str, timeout: Duration) -> bool {
    let client = match reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build() {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!(error = %err, "Cannot build readiness client");
            return false;
        }
    };

    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        match client.get(url).send().await {
            Ok(response) if response.status().is_success() => return true,
            Ok(response) => tracing::debug!(status = %response.status(), "Server not ready yet"),
            Err(err) => tracing::debug!(error = %err, "Server not reachable yet"),
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    false
}

/// Wait for readiness in the background, then open the default browser.
///
/// A failed wait is logged and nothing is opened; the server keeps running.
pub fn spawn_browser_opener(url: String, timeout: Duration, open_browser: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !wait_until_ready(&url, timeout).await {
            tracing::warn!("Server started but did not answer within {}s: {}", timeout.as_secs(), url);
            return;
        }

        tracing::info!("WhisperTrans is running at: {}", url);
        if open_browser {
            match webbrowser::open(&url) {
                Ok(()) => tracing::info!("Web interface opened in your default browser"),
                Err(err) => tracing::warn!(error = %err, "Could not open a browser, visit {} manually", url),
            }
        }
        tracing::info!("Press Ctrl+C to stop the server");
    })
}
