//! Desktop notifications for `--notification`

use tracing::{debug, warn};

const APP_NAME: &str = "ucsf-vpn";

/// Show a desktop notification; failures are logged, never fatal
pub fn send(summary: &str, body: &str, is_error: bool) {
    debug!("Notification: {}: {}", summary, body);

    #[cfg(not(windows))]
    {
        let icon = if is_error {
            "dialog-error"
        } else {
            "network-vpn"
        };
        let result = notify_rust::Notification::new()
            .appname(APP_NAME)
            .summary(summary)
            .body(body)
            .icon(icon)
            .show();
        if let Err(e) = result {
            warn!("Failed to show notification: {}", e);
        }
    }

    #[cfg(windows)]
    {
        let _ = is_error;
        warn!("Desktop notifications are not supported on this platform");
    }
}
