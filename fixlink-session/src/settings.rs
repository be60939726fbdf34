use chrono::NaiveTime;
use chrono_tz::Tz;
use fixlink_codec::SOH;
use serde::{Deserialize, Deserializer};
use tokio::time::Duration;

fn duration_from_seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Duration::from_secs(u64::deserialize(deserializer)?))
}

fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_heartbeat_threshold() -> Duration {
    Duration::from_secs(1)
}

fn default_logon_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_separator() -> u8 {
    SOH
}

fn default_convert_sep() -> bool {
    true
}

/// Daily session window in a named time zone. The acceptor waits for the
/// window on connect and logs the peer out when it closes.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct SessionWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub time_zone: Tz,
}

/// Per-session configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    /// SenderCompID<49> stamped on outgoing messages.
    pub sender_comp_id: String,
    /// TargetCompID<56> stamped on outgoing messages.
    pub target_comp_id: String,
    /// Idle interval \[s\] after which a Heartbeat<0> is sent; also the
    /// HeartBtInt<108> value advertised on Logon<A>.
    #[serde(
        deserialize_with = "duration_from_seconds",
        default = "default_heartbeat_timeout"
    )]
    pub heartbeat_timeout: Duration,
    /// Slack \[s\] beyond the heartbeat interval before an inbound gap
    /// triggers a TestRequest<1> probe.
    #[serde(
        deserialize_with = "duration_from_seconds",
        default = "default_heartbeat_threshold"
    )]
    pub heartbeat_threshold: Duration,
    /// Timeout \[s\] for the Logon<A> exchange.
    #[serde(
        deserialize_with = "duration_from_seconds",
        default = "default_logon_timeout"
    )]
    pub logon_timeout: Duration,
    /// Grace period \[s\] the session task gets to wind down after the
    /// stream closes or the engine is cancelled.
    #[serde(
        deserialize_with = "duration_from_seconds",
        default = "default_shutdown_timeout"
    )]
    pub shutdown_timeout: Duration,
    /// Field separator; SOH on production links, `|` for diagnostics.
    #[serde(default = "default_separator")]
    pub separator: u8,
    /// Substitute the separator with SOH before checksum arithmetic when
    /// a non-SOH separator is used.
    #[serde(default = "default_convert_sep")]
    pub convert_sep_for_checksum: bool,
    #[serde(default)]
    pub session_window: Option<SessionWindow>,
}

impl Settings {
    pub fn new(sender_comp_id: impl Into<String>, target_comp_id: impl Into<String>) -> Settings {
        Settings {
            sender_comp_id: sender_comp_id.into(),
            target_comp_id: target_comp_id.into(),
            heartbeat_timeout: default_heartbeat_timeout(),
            heartbeat_threshold: default_heartbeat_threshold(),
            logon_timeout: default_logon_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
            separator: SOH,
            convert_sep_for_checksum: true,
            session_window: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        settings: Settings,
    }

    #[test]
    fn deserialize_with_defaults() {
        let json = r#"{
            "settings": {
                "sender_comp_id": "SENDER",
                "target_comp_id": "TARGET",
                "heartbeat_timeout": 20
            }
        }"#;
        let Wrapper { settings } = serde_json::from_str(json).unwrap();
        assert_eq!(settings.sender_comp_id, "SENDER");
        assert_eq!(settings.heartbeat_timeout, Duration::from_secs(20));
        assert_eq!(settings.logon_timeout, Duration::from_secs(60));
        assert_eq!(settings.separator, SOH);
        assert!(settings.session_window.is_none());
    }

    #[test]
    fn deserialize_session_window() {
        let json = r#"{
            "settings": {
                "sender_comp_id": "S",
                "target_comp_id": "T",
                "session_window": {
                    "start": "08:00:00",
                    "end": "17:00:00",
                    "time_zone": "Europe/London"
                }
            }
        }"#;
        let Wrapper { settings } = serde_json::from_str(json).unwrap();
        let window = settings.session_window.unwrap();
        assert_eq!(window.time_zone, chrono_tz::Europe::London);
        assert_eq!(
            window.start,
            NaiveTime::from_hms_opt(8, 0, 0).unwrap()
        );
    }
}
