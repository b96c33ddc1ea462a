use crate::config::environment::AppConfig;

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: Option<String>,
}

impl RedisConfig {
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            url: app
                .redis_url
                .clone()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),
        }
    }
}
