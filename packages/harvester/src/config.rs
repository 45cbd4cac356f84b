use serde::Deserialize;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub browser: BrowserSettings,
    pub signing: SigningSettings,
    pub interception: InterceptionSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_body_size: usize,
    pub cors_allowed_origins: String,
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 11000,
            max_body_size: 1_048_576, // 1 MB
            cors_allowed_origins: "*".to_string(),
            shutdown_timeout_secs: 30,
        }
    }
}

/// Browser process and tab lifecycle
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Explicit Chrome/Chromium binary; looked up on PATH when unset
    pub chrome_path: Option<String>,
    pub headless: bool,
    pub args: Vec<String>,
    /// One is picked at random per session
    pub user_agents: Vec<String>,
    pub launch_timeout_ms: u64,
    /// Page every fresh session opens first
    pub home_url: String,
    pub session_warmup_ms: u64,
    pub navigation_timeout_ms: u64,
    pub navigation_settle_ms: u64,
    /// Pause between closing the tab and stopping the process
    pub close_delay_ms: u64,
    /// Pause after the process is gone, before the next session may start
    pub drain_delay_ms: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            args: vec![
                "--no-sandbox".to_string(),
                "--disable-gpu".to_string(),
                "--disable-dev-shm-usage".to_string(),
                "--disable-blink-features=AutomationControlled".to_string(),
            ],
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36"
                    .to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36"
                    .to_string(),
            ],
            launch_timeout_ms: 20_000,
            home_url: "https://id.trip.com/flights".to_string(),
            session_warmup_ms: 3_000,
            navigation_timeout_ms: 30_000,
            navigation_settle_ms: 5_000,
            close_delay_ms: 500,
            drain_delay_ms: 2_000,
        }
    }
}

impl BrowserSettings {
    pub fn session_warmup(&self) -> Duration {
        Duration::from_millis(self.session_warmup_ms)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn navigation_settle(&self) -> Duration {
        Duration::from_millis(self.navigation_settle_ms)
    }

    pub fn close_delay(&self) -> Duration {
        Duration::from_millis(self.close_delay_ms)
    }

    pub fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.drain_delay_ms)
    }
}

/// Names and endpoints used while deriving request tokens
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SigningSettings {
    /// API path hashed into the x-ctx-wclient-req header
    pub endpoint: String,
    /// Global function producing the request signature
    pub signature_function: String,
    /// Global object whose `toString` turns a digest into w-payload-source
    pub payload_signer: String,
    /// Streaming search endpoint called by the direct scrape flow
    pub search_api_path: String,
    pub bootstrap_wait_ms: u64,
}

impl Default for SigningSettings {
    fn default() -> Self {
        Self {
            endpoint: "/restapi/soa2/14427/GetLowPriceInCalender".to_string(),
            signature_function: "signature".to_string(),
            payload_signer: "c_sign".to_string(),
            search_api_path: "/restapi/soa2/27015/FlightListSearchSSE".to_string(),
            bootstrap_wait_ms: 3_000,
        }
    }
}

impl SigningSettings {
    pub fn bootstrap_wait(&self) -> Duration {
        Duration::from_millis(self.bootstrap_wait_ms)
    }
}

/// Stream capture and completion heuristics.
///
/// The completion thresholds are tuned against the current response shape of
/// the search stream; they are not a protocol guarantee.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterceptionSettings {
    /// Substring a request URL must contain to be captured
    pub target_substring: String,
    pub poll_interval_ms: u64,
    /// Log a diagnostic snapshot every N polls
    pub diagnostic_every: u32,
    /// A body must be strictly longer than this to count as real data
    pub min_body_chars: usize,
    pub completion_markers: Vec<String>,
    pub settle_window_ms: u64,
    pub default_timeout_secs: u64,
    pub install_delay_ms: u64,
    pub warmup_ms: u64,
    pub raw_preview_chars: usize,
}

impl Default for InterceptionSettings {
    fn default() -> Self {
        Self {
            target_substring: "FlightListSearchSSE".to_string(),
            poll_interval_ms: 500,
            diagnostic_every: 10,
            min_body_chars: 500,
            completion_markers: vec![
                "flightList".to_string(),
                "itineraryList".to_string(),
                "basicInfo".to_string(),
            ],
            settle_window_ms: 10_000,
            default_timeout_secs: 90,
            install_delay_ms: 1_000,
            warmup_ms: 3_000,
            raw_preview_chars: 1_000,
        }
    }
}

impl InterceptionSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_window_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn install_delay(&self) -> Duration {
        Duration::from_millis(self.install_delay_ms)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }
}

impl Settings {
    /// Load configuration from defaults, an optional `harvester.toml` and
    /// `HARVESTER__`-prefixed environment variables (later sources win)
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("harvester").required(false))
            .add_source(
                config::Environment::with_prefix("HARVESTER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Settings>()?;

        Ok(settings)
    }
}

#[cfg(test)]
impl Settings {
    /// Defaults with every fixed wait shrunk so tests run on the real clock
    pub(crate) fn fast() -> Self {
        let mut settings = Settings::default();
        settings.browser.session_warmup_ms = 0;
        settings.browser.navigation_settle_ms = 0;
        settings.browser.close_delay_ms = 0;
        settings.browser.drain_delay_ms = 0;
        settings.signing.bootstrap_wait_ms = 0;
        settings.interception.poll_interval_ms = 20;
        settings.interception.settle_window_ms = 50;
        settings.interception.install_delay_ms = 0;
        settings.interception.warmup_ms = 0;
        settings
    }
}
