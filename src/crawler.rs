//! The four-stage extraction pipeline.
//!
//! Cities -> Universities -> Offers -> Applications, strictly sequential,
//! one unit of work at a time. Every stage derives its skip conditions
//! from counts already in the store, so re-running the pipeline after a
//! crash or cancellation resumes from the first incomplete unit without
//! re-issuing completed requests.

use std::collections::HashSet;
use std::sync::Arc;

use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CrawlerConfig;
use crate::error::{CrawlError, Result};
use crate::events::{CrawlObserver, NullObserver, ProgressSnapshot};
use crate::gateway::HttpGateway;
use crate::model::{Application, City, Offer, Person, University};
use crate::progress::ProgressTracker;
use crate::store::CrawlStore;

/// Offer level marker: only Master's-level offers are extracted.
pub const MASTERS_MARKER: &str = "Магістр";

const CITY_ROW_SELECTOR: &str =
    "body > div:nth-child(10) > div > div:nth-child(2) > div > div > table > tbody > tr";
const CITY_ANCHOR_SELECTOR: &str = "td:nth-child(1) > a";
const UNIVERSITY_LINK_SELECTOR: &str = "ul.section-search-result-list > li > a";
const OFFER_ROW_SELECTOR: &str =
    "div.row.no-gutters.table-of-specs-item-row.qual2.base620.hidden";
const OFFER_LEVEL_SELECTOR: &str = "div:nth-child(1) > div.table-of-specs-item > b:nth-child(1)";
const OFFER_SPECIALITY_SELECTOR: &str =
    "div:nth-child(1) > div.table-of-specs-item > span > a";
const OFFER_LINK_SELECTOR: &str = "div.col-xl-2.col-lg-2.col-md-12 > div > a";

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| CrawlError::Parse(format!("bad selector: {:?}", e)))
}

fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(CrawlError::Cancelled)
    } else {
        Ok(())
    }
}

/// Extracts `(name, href)` per city row of the index page, in document order.
pub fn parse_city_rows(html: &str) -> Result<Vec<(String, String)>> {
    let document = Html::parse_document(html);
    let row_selector = selector(CITY_ROW_SELECTOR)?;
    let anchor_selector = selector(CITY_ANCHOR_SELECTOR)?;

    let mut rows = Vec::new();
    for row in document.select(&row_selector) {
        let Some(anchor) = row.select(&anchor_selector).next() else {
            continue;
        };
        let name = anchor.text().collect::<String>().trim().to_string();
        let href = anchor.value().attr("href").unwrap_or_default().to_string();
        rows.push((name, href));
    }
    Ok(rows)
}

/// Extracts `(name, href)` per university link on a city page.
///
/// The link's `title` attribute wins over its text when present.
pub fn parse_university_links(html: &str) -> Result<Vec<(String, String)>> {
    let document = Html::parse_document(html);
    let link_selector = selector(UNIVERSITY_LINK_SELECTOR)?;

    let mut links = Vec::new();
    for anchor in document.select(&link_selector) {
        let name = match anchor.value().attr("title") {
            Some(title) if !title.trim().is_empty() => title.trim().to_string(),
            _ => anchor.text().collect::<String>().trim().to_string(),
        };
        let href = anchor.value().attr("href").unwrap_or_default().to_string();
        links.push((name, href));
    }
    Ok(links)
}

/// One Master's-level offer row on a university page.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferRow {
    pub speciality: String,
    pub href: String,
}

/// Extracts the Master's-level offer rows from a university page.
///
/// Rows whose level label is not [`MASTERS_MARKER`], or that lack a
/// speciality anchor or detail link, are dropped.
pub fn parse_offer_rows(html: &str) -> Result<Vec<OfferRow>> {
    let document = Html::parse_document(html);
    let row_selector = selector(OFFER_ROW_SELECTOR)?;
    let level_selector = selector(OFFER_LEVEL_SELECTOR)?;
    let speciality_selector = selector(OFFER_SPECIALITY_SELECTOR)?;
    let link_selector = selector(OFFER_LINK_SELECTOR)?;

    let mut offers = Vec::new();
    for row in document.select(&row_selector) {
        let level = row
            .select(&level_selector)
            .next()
            .map(|e| e.text().collect::<String>());
        if level.as_deref().map(str::trim) != Some(MASTERS_MARKER) {
            continue;
        }

        let Some(speciality) = row.select(&speciality_selector).next() else {
            continue;
        };
        let Some(href) = row
            .select(&link_selector)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };

        offers.push(OfferRow {
            speciality: speciality.text().collect::<String>().trim().to_string(),
            href: href.to_string(),
        });
    }
    Ok(offers)
}

/// Decomposed offer request parameter used to query the admissions API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferRequest {
    /// Year with the leading "y" marker stripped.
    pub year: String,
    pub university_token: String,
    pub speciality_token: String,
}

/// Splits an offer's request parameter into its API tokens.
///
/// Returns `None` when the parameter is empty or has fewer than 4
/// non-empty `/`-separated segments; such offers have no applications
/// to fetch.
pub fn split_offer_request(parameter: &str) -> Option<OfferRequest> {
    let segments: Vec<&str> = parameter.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 4 {
        return None;
    }

    Some(OfferRequest {
        year: segments[0].trim_start_matches('y').to_string(),
        university_token: segments[2].to_string(),
        speciality_token: segments[3].to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct ApiFollowUp {
    #[serde(default, alias = "Url", alias = "URL")]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdmissionsPayload {
    #[serde(default, alias = "Requests")]
    requests: Vec<Vec<Value>>,
}

/// One decoded applicant entry from the admissions row array.
#[derive(Debug, Clone, PartialEq)]
struct ApplicantRow {
    name: String,
    grade: f64,
    state: Option<String>,
    priority: Option<u32>,
}

/// Decodes the positional admissions row: index 4 is the applicant name,
/// index 5 the grade (0 when absent or non-numeric), index 1 the state
/// string and index 2 the priority when numeric. Rows without a usable
/// name are dropped.
fn decode_applicant_row(row: &[Value]) -> Option<ApplicantRow> {
    let name = row.get(4)?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }

    Some(ApplicantRow {
        name: name.to_string(),
        grade: row.get(5).and_then(Value::as_f64).unwrap_or(0.0),
        state: row.get(1).and_then(Value::as_str).map(str::to_string),
        priority: row
            .get(2)
            .and_then(Value::as_u64)
            .and_then(|p| u32::try_from(p).ok()),
    })
}

/// The resumable crawl pipeline.
pub struct Crawler {
    config: CrawlerConfig,
    gateway: Arc<dyn HttpGateway>,
    store: CrawlStore,
    observer: Arc<dyn CrawlObserver>,
    progress: ProgressTracker,
}

impl Crawler {
    /// Creates a crawler with a no-op observer.
    pub fn new(config: CrawlerConfig, gateway: Arc<dyn HttpGateway>, store: CrawlStore) -> Self {
        Self {
            config,
            gateway,
            store,
            observer: Arc::new(NullObserver),
            progress: ProgressTracker::new(),
        }
    }

    /// Sets the progress/log observer.
    pub fn with_observer(mut self, observer: Arc<dyn CrawlObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Current aggregate progress.
    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    fn emit_progress(&self) {
        self.observer.on_progress(&self.progress.snapshot());
    }

    /// Runs the four stages in order, resuming past completed work.
    ///
    /// On any error the staged remainder of the interrupted batch is
    /// dropped, so a later run refetches that unit instead of treating it
    /// as done.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        match self.run_stages(cancel).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Err(rollback_error) = self.store.rollback().await {
                    warn!("failed to drop staged records: {}", rollback_error);
                }
                Err(e)
            }
        }
    }

    async fn run_stages(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.sync_counters().await?;

        self.parse_cities(cancel).await?;
        ensure_live(cancel)?;

        self.parse_universities(cancel).await?;
        ensure_live(cancel)?;

        self.parse_offers(cancel).await?;
        ensure_live(cancel)?;

        self.parse_applications(cancel).await?;

        self.emit_progress();
        info!("crawl finished: {}", self.progress.current_stage());
        Ok(())
    }

    /// Seeds the progress counters from what the store already holds.
    async fn sync_counters(&mut self) -> Result<()> {
        let cities = self.store.cities.count().await?;
        let universities = self.store.universities.count().await?;
        let offers = self.store.offers.count().await?;

        let offers_with_applications = {
            let applications = self.store.applications.all().await?;
            applications
                .iter()
                .map(|a| a.offer_id.as_str())
                .collect::<HashSet<_>>()
                .len()
        };

        self.progress
            .seed(cities, universities, offers, offers_with_applications);
        Ok(())
    }

    // Stage 1 - Cities
    async fn parse_cities(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.store.cities.count().await? == 0 {
            let html = self.gateway.fetch_text(&self.config.base_url, cancel).await?;
            let rows = parse_city_rows(&html)?;

            self.progress.set_total_cities(rows.len());
            self.emit_progress();

            for (name, href) in rows {
                ensure_live(cancel)?;
                self.store.cities.add(City::new(name, href)).await?;
                self.progress.inc_cities();
                self.emit_progress();
            }

            self.store.cities.commit().await?;
        }

        self.progress.finish_cities();
        self.emit_progress();
        Ok(())
    }

    // Stage 2 - Universities
    async fn parse_universities(&mut self, cancel: &CancellationToken) -> Result<()> {
        let cities = self.store.cities.all().await?;

        for city in cities {
            if let Some(filter) = &self.config.city_filter {
                if city.name != *filter {
                    continue;
                }
            }
            ensure_live(cancel)?;

            let city_id = city.id.clone();
            let already = self
                .store
                .universities
                .exists(&|u: &University| u.city_id == city_id)
                .await?;
            if already {
                continue;
            }

            let url = format!("{}{}", self.config.base_url, city.request_parameter);
            let html = self.gateway.fetch_text(&url, cancel).await?;
            let links = parse_university_links(&html)?;

            self.progress
                .raise_university_total(self.progress.parsed_universities() + links.len());
            self.emit_progress();

            for (name, href) in links {
                ensure_live(cancel)?;
                self.store
                    .universities
                    .add(University::new(city.id.clone(), name, href))
                    .await?;
                self.progress.inc_universities();
                self.emit_progress();
            }

            self.store.universities.commit().await?;
        }

        self.progress.finish_universities();
        self.emit_progress();
        Ok(())
    }

    // Stage 3 - Offers
    async fn parse_offers(&mut self, cancel: &CancellationToken) -> Result<()> {
        let universities = self.store.universities.all().await?;

        for university in universities {
            ensure_live(cancel)?;

            let university_id = university.id.clone();
            let already = self
                .store
                .offers
                .exists(&|o: &Offer| o.university_id == university_id)
                .await?;
            if already {
                continue;
            }

            let url = format!("{}{}", self.config.base_url, university.request_parameter);
            let html = self.gateway.fetch_text(&url, cancel).await?;
            let rows = parse_offer_rows(&html)?;

            self.progress
                .raise_offer_total(self.progress.parsed_offers() + rows.len());
            self.emit_progress();

            for row in rows {
                ensure_live(cancel)?;
                self.store
                    .offers
                    .add(Offer::new(university.id.clone(), row.speciality, row.href))
                    .await?;
                self.progress.inc_offers();
                self.emit_progress();
            }

            self.store.offers.commit().await?;
        }

        self.progress.finish_offers();
        self.emit_progress();
        Ok(())
    }

    // Stage 4 - Applications
    async fn parse_applications(&mut self, cancel: &CancellationToken) -> Result<()> {
        let offers = self.store.offers.all().await?;
        self.progress.raise_application_total(offers.len());
        self.emit_progress();

        // A resumed run walks already-done offers again; the reported
        // count must never dip below what was seeded from the store.
        let seeded = self.progress.parsed_applications();
        let mut done = 0;
        for offer in offers {
            ensure_live(cancel)?;

            self.process_offer(&offer, cancel).await?;

            done += 1;
            self.progress.set_parsed_applications(done.max(seeded));
            self.emit_progress();
        }

        self.progress.finish_applications();
        self.emit_progress();
        Ok(())
    }

    /// Fetches and persists one offer's applications.
    ///
    /// Structural problems (malformed request parameter, no follow-up URL,
    /// empty payload) count the offer as done with nothing to extract.
    async fn process_offer(&mut self, offer: &Offer, cancel: &CancellationToken) -> Result<()> {
        let offer_id = offer.id.clone();
        let already = self
            .store
            .applications
            .exists(&|a: &Application| a.offer_id == offer_id)
            .await?;
        if already {
            return Ok(());
        }

        let Some(request) = split_offer_request(&offer.request_parameter) else {
            debug!(offer = %offer.id, "no usable request parameter, nothing to fetch");
            return Ok(());
        };

        let fields = [
            ("action", "requests".to_string()),
            ("y", request.year),
            ("uid", request.university_token),
            ("sid", request.speciality_token),
            ("last", "10".to_string()),
        ];
        let response = self
            .gateway
            .post_form(&self.config.api_url, &fields, cancel)
            .await?;

        let follow_up: ApiFollowUp = match response.json() {
            Ok(parsed) => parsed,
            Err(_) => {
                debug!(offer = %offer.id, status = response.status, "unreadable API response, skipping offer");
                return Ok(());
            }
        };
        let Some(rows_url) = follow_up.url else {
            return Ok(());
        };

        let value = self.gateway.fetch_json(&rows_url, cancel).await?;
        if value.is_null() {
            return Ok(());
        }
        let payload: AdmissionsPayload = serde_json::from_value(value)
            .map_err(|e| CrawlError::MalformedPayload(e.to_string()))?;

        for row in &payload.requests {
            ensure_live(cancel)?;

            let Some(applicant) = decode_applicant_row(row) else {
                continue;
            };

            let person_id = self.find_or_create_person(&applicant.name).await?;
            let mut application = Application::new(
                offer.id.clone(),
                person_id,
                applicant.grade,
                offer.request_parameter.clone(),
            );
            application.state = applicant.state;
            application.priority = applicant.priority;
            self.store.applications.add(application).await?;
        }

        self.store.applications.commit().await?;
        Ok(())
    }

    /// Returns the id of the person with this exact full name, creating
    /// and committing a new row when none exists yet.
    async fn find_or_create_person(&self, full_name: &str) -> Result<String> {
        let existing = self
            .store
            .persons
            .all()
            .await?
            .into_iter()
            .find(|p| p.full_name == full_name);
        if let Some(person) = existing {
            return Ok(person.id);
        }

        let person = Person::new(full_name);
        let id = person.id.clone();
        self.store.persons.add(person).await?;
        self.store.persons.commit().await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Index page whose table sits at the position the site renders it.
    fn city_page(rows: &[(&str, &str)]) -> String {
        let body_rows: String = rows
            .iter()
            .map(|(name, href)| {
                format!("<tr><td><a href=\"{}\">{}</a></td><td>12</td></tr>", href, name)
            })
            .collect();
        format!(
            "<html><body>{}<div><div><div></div><div><div><div><table><tbody>{}</tbody></table></div></div></div></div></div></body></html>",
            "<div></div>".repeat(9),
            body_rows
        )
    }

    fn university_page(links: &[(&str, &str, Option<&str>)]) -> String {
        let items: String = links
            .iter()
            .map(|(text, href, title)| match title {
                Some(title) => format!(
                    "<li><a href=\"{}\" title=\"{}\">{}</a></li>",
                    href, title, text
                ),
                None => format!("<li><a href=\"{}\">{}</a></li>", href, text),
            })
            .collect();
        format!(
            "<html><body><ul class=\"section-search-result-list\">{}</ul></body></html>",
            items
        )
    }

    fn offer_page(rows: &[(&str, &str, &str)]) -> String {
        let divs: String = rows
            .iter()
            .map(|(level, speciality, href)| {
                format!(
                    concat!(
                        "<div class=\"row no-gutters table-of-specs-item-row qual2 base620 hidden\">",
                        "<div><div class=\"table-of-specs-item\"><b>{}</b>",
                        "<span><a href=\"#\">{}</a></span></div></div>",
                        "<div class=\"col-xl-2 col-lg-2 col-md-12\"><div><a href=\"{}\">Подати</a></div></div>",
                        "</div>"
                    ),
                    level, speciality, href
                )
            })
            .collect();
        format!("<html><body>{}</body></html>", divs)
    }

    #[test]
    fn test_parse_city_rows_in_document_order() {
        let html = city_page(&[
            ("Київ", "/region/kyiv"),
            ("Львів", "/region/lviv"),
            ("Одеса", "/region/odesa"),
            ("Харків", "/region/kharkiv"),
            ("Дніпро", "/region/dnipro"),
        ]);
        let rows = parse_city_rows(&html).unwrap();

        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0], ("Київ".to_string(), "/region/kyiv".to_string()));
        assert_eq!(rows[4], ("Дніпро".to_string(), "/region/dnipro".to_string()));
    }

    #[test]
    fn test_parse_city_rows_empty_page() {
        let rows = parse_city_rows("<html><body></body></html>").unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_parse_university_links_title_wins() {
        let html = university_page(&[
            ("КПІ", "/u/1", Some("НТУУ КПІ ім. Ігоря Сікорського")),
            ("КНУ", "/u/2", None),
        ]);
        let links = parse_university_links(&html).unwrap();

        assert_eq!(links.len(), 2);
        assert_eq!(links[0].0, "НТУУ КПІ ім. Ігоря Сікорського");
        assert_eq!(links[0].1, "/u/1");
        assert_eq!(links[1].0, "КНУ");
    }

    #[test]
    fn test_parse_offer_rows_keeps_masters_only() {
        let html = offer_page(&[
            ("Магістр", "Комп'ютерні науки", "y24/x/UNI1/SPEC7"),
            ("Бакалавр", "Право", "y24/x/UNI1/SPEC8"),
            ("Магістр", "Філологія", "y24/x/UNI1/SPEC9"),
        ]);
        let rows = parse_offer_rows(&html).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].speciality, "Комп'ютерні науки");
        assert_eq!(rows[0].href, "y24/x/UNI1/SPEC7");
        assert_eq!(rows[1].speciality, "Філологія");
    }

    #[test]
    fn test_split_offer_request_valid() {
        let request = split_offer_request("y24/x/UNI1/SPEC7").unwrap();
        assert_eq!(request.year, "24");
        assert_eq!(request.university_token, "UNI1");
        assert_eq!(request.speciality_token, "SPEC7");
    }

    #[test]
    fn test_split_offer_request_ignores_empty_segments() {
        let request = split_offer_request("/y2024//x/UNI1/SPEC7").unwrap();
        assert_eq!(request.year, "2024");
        assert_eq!(request.university_token, "UNI1");
    }

    #[test]
    fn test_split_offer_request_malformed() {
        assert!(split_offer_request("").is_none());
        assert!(split_offer_request("bad").is_none());
        assert!(split_offer_request("y24/x/UNI1").is_none());
        assert!(split_offer_request("///").is_none());
    }

    #[test]
    fn test_decode_applicant_row() {
        let row = vec![
            json!(1),
            json!("Зараховано"),
            json!(2),
            json!("+"),
            json!("Іваненко Іван Іванович"),
            json!(187.5),
        ];
        let applicant = decode_applicant_row(&row).unwrap();
        assert_eq!(applicant.name, "Іваненко Іван Іванович");
        assert_eq!(applicant.grade, 187.5);
        assert_eq!(applicant.state.as_deref(), Some("Зараховано"));
        assert_eq!(applicant.priority, Some(2));
    }

    #[test]
    fn test_decode_applicant_row_defaults() {
        let row = vec![json!(1), json!(null), json!(null), json!(null), json!(" Петренко П. ")];
        let applicant = decode_applicant_row(&row).unwrap();
        assert_eq!(applicant.name, "Петренко П.");
        assert_eq!(applicant.grade, 0.0);
        assert!(applicant.state.is_none());
        assert!(applicant.priority.is_none());
    }

    #[test]
    fn test_decode_applicant_row_unusable_name() {
        assert!(decode_applicant_row(&[]).is_none());
        let short = vec![json!(1), json!(2)];
        assert!(decode_applicant_row(&short).is_none());
        let numeric_name = vec![json!(1), json!(2), json!(3), json!(4), json!(5)];
        assert!(decode_applicant_row(&numeric_name).is_none());
        let blank = vec![json!(1), json!(2), json!(3), json!(4), json!("   ")];
        assert!(decode_applicant_row(&blank).is_none());
    }

    #[test]
    fn test_api_follow_up_aliases() {
        let lower: ApiFollowUp = serde_json::from_str(r#"{"url":"https://a"}"#).unwrap();
        assert_eq!(lower.url.as_deref(), Some("https://a"));
        let upper: ApiFollowUp = serde_json::from_str(r#"{"Url":"https://b"}"#).unwrap();
        assert_eq!(upper.url.as_deref(), Some("https://b"));
        let missing: ApiFollowUp = serde_json::from_str("{}").unwrap();
        assert!(missing.url.is_none());
    }

    #[test]
    fn test_admissions_payload_tolerates_extra_fields() {
        let payload: AdmissionsPayload =
            serde_json::from_str(r#"{"Requests":[[1,2]],"total":99,"extra":"x"}"#).unwrap();
        assert_eq!(payload.requests.len(), 1);
    }
}
