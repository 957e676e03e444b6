use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ClinicConfig {
    /// Fixed clinic timezone as whole hours east of UTC (WIB is +7).
    pub clinic_utc_offset_hours: i32,
    pub max_reschedules: u32,
    pub meeting_link_expiry_hours: i64,
    /// Minutes past the scheduled slot before an unattended meeting is cancelled.
    pub no_show_grace_minutes: i64,
    /// Window before the slot in which a missing meeting link triggers a reminder.
    pub link_reminder_window_hours: i64,
    pub sweep_interval_secs: u64,
    pub admin_fee_percent: u32,
    pub midtrans_base_url: String,
    pub midtrans_server_key: String,
    pub listen_port: u16,
}

impl ClinicConfig {
    pub fn from_env() -> Self {
        let config = Self {
            clinic_utc_offset_hours: parse_env("CLINIC_UTC_OFFSET_HOURS", 7),
            max_reschedules: parse_env("MAX_RESCHEDULES", 3),
            meeting_link_expiry_hours: parse_env("MEETING_LINK_EXPIRY_HOURS", 2),
            no_show_grace_minutes: parse_env("NO_SHOW_GRACE_MINUTES", 15),
            link_reminder_window_hours: parse_env("LINK_REMINDER_WINDOW_HOURS", 24),
            sweep_interval_secs: parse_env("SWEEP_INTERVAL_SECS", 60),
            admin_fee_percent: parse_env("ADMIN_FEE_PERCENT", 10),
            midtrans_base_url: env::var("MIDTRANS_BASE_URL")
                .unwrap_or_else(|_| {
                    warn!("MIDTRANS_BASE_URL not set, using sandbox");
                    "https://api.sandbox.midtrans.com".to_string()
                }),
            midtrans_server_key: env::var("MIDTRANS_SERVER_KEY")
                .unwrap_or_else(|_| {
                    warn!("MIDTRANS_SERVER_KEY not set, using empty value");
                    String::new()
                }),
            listen_port: parse_env("PORT", 3000),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.midtrans_server_key.is_empty()
    }
}

impl Default for ClinicConfig {
    fn default() -> Self {
        Self {
            clinic_utc_offset_hours: 7,
            max_reschedules: 3,
            meeting_link_expiry_hours: 2,
            no_show_grace_minutes: 15,
            link_reminder_window_hours: 24,
            sweep_interval_secs: 60,
            admin_fee_percent: 10,
            midtrans_base_url: "https://api.sandbox.midtrans.com".to_string(),
            midtrans_server_key: String::new(),
            listen_port: 3000,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("{} has an invalid value, using default", key);
                default
            }
        },
        Err(_) => default,
    }
}
