//! Crawler configuration.

/// Default base URL of the admission site.
pub const DEFAULT_BASE_URL: &str = "https://vstup.osvita.ua";
/// Default endpoint of the admissions API.
pub const DEFAULT_API_URL: &str = "https://vstup.osvita.ua/api/";
/// City the first release is scoped to.
pub const DEFAULT_CITY_FILTER: &str = "Київ";

/// Settings for one crawl run.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Base URL all site-relative request parameters resolve against.
    pub base_url: String,
    /// Admissions API endpoint for application lookups.
    pub api_url: String,
    /// When set, the universities stage only visits cities with this exact
    /// name. The current release deliberately scopes the crawl to the
    /// capital; `None` crawls every discovered city.
    pub city_filter: Option<String>,
}

impl CrawlerConfig {
    /// Creates a configuration with the production defaults.
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            city_filter: Some(DEFAULT_CITY_FILTER.to_string()),
        }
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the admissions API endpoint.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Restricts the crawl to one city by exact name.
    pub fn with_city_filter(mut self, city: impl Into<String>) -> Self {
        self.city_filter = Some(city.into());
        self
    }

    /// Crawls every discovered city.
    pub fn all_cities(mut self) -> Self {
        self.city_filter = None;
        self
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self::new()
    }
}
