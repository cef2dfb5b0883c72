pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 60;
const MAX_SESSION_TTL_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// `None` when unset or blank; calls then fail with a missing-credentials error.
    pub api_key: Option<String>,
    pub api_base: String,
    pub text_model: String,
    pub image_model: String,
    pub port: u16,
    /// Sessions untouched for this long are evicted by the background sweep.
    pub session_ttl_minutes: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_blank = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            api_key: non_blank("GEMINI_API_KEY"),
            api_base: non_blank("GEMINI_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            text_model: non_blank("GEMINI_TEXT_MODEL").unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
            image_model: non_blank("GEMINI_IMAGE_MODEL").unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            port: non_blank("PORT").and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_PORT),
            session_ttl_minutes: non_blank("SESSION_TTL_MINUTES")
                .and_then(|v| v.parse().ok())
                .filter(|minutes: &i64| (1..=MAX_SESSION_TTL_MINUTES).contains(minutes))
                .unwrap_or(DEFAULT_SESSION_TTL_MINUTES),
        }
    }
}
