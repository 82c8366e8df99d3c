//! Entities extracted by the crawl.
//!
//! Records are created once during the stage that discovers them and never
//! mutated or deleted by this crate afterwards. Identifiers are random
//! UUIDs assigned at discovery time.

use uuid::Uuid;

/// Generates a fresh entity identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// A city listed on the index page. Seed of the universities stage.
#[derive(Debug, Clone, PartialEq)]
pub struct City {
    pub id: String,
    pub name: String,
    /// Site-relative path used to fetch the city's university list.
    /// Immutable once set.
    pub request_parameter: String,
}

impl City {
    pub fn new(name: impl Into<String>, request_parameter: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            request_parameter: request_parameter.into(),
        }
    }
}

/// A university discovered under a city.
#[derive(Debug, Clone, PartialEq)]
pub struct University {
    pub id: String,
    pub city_id: String,
    pub name: String,
    /// Site-relative path to the university's offer listing.
    pub request_parameter: String,
}

impl University {
    pub fn new(
        city_id: impl Into<String>,
        name: impl Into<String>,
        request_parameter: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            city_id: city_id.into(),
            name: name.into(),
            request_parameter: request_parameter.into(),
        }
    }
}

/// A Master's-level degree offer at a university.
#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    pub id: String,
    pub university_id: String,
    pub speciality: String,
    /// Program name, when the listing exposes one.
    pub program: Option<String>,
    /// Budget-funded seat count; 0 when the listing does not expose it.
    pub budget_count: u32,
    /// Offer-detail path; decomposes into `year/_/uid/sid` segments when
    /// applications can be fetched, and may be empty or malformed.
    pub request_parameter: String,
}

impl Offer {
    pub fn new(
        university_id: impl Into<String>,
        speciality: impl Into<String>,
        request_parameter: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            university_id: university_id.into(),
            speciality: speciality.into(),
            program: None,
            budget_count: 0,
            request_parameter: request_parameter.into(),
        }
    }
}

/// An applicant, deduplicated by exact full-name match.
#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub id: String,
    pub full_name: String,
}

impl Person {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            full_name: full_name.into(),
        }
    }
}

/// One ranked applicant entry on an offer.
#[derive(Debug, Clone, PartialEq)]
pub struct Application {
    pub id: String,
    pub offer_id: String,
    pub person_id: String,
    pub grade: f64,
    /// Application state string as reported by the admissions API.
    pub state: Option<String>,
    /// Applicant's priority choice, when reported.
    pub priority: Option<u32>,
    /// Copy of the owning offer's request parameter.
    pub request_parameter: String,
}

impl Application {
    pub fn new(
        offer_id: impl Into<String>,
        person_id: impl Into<String>,
        grade: f64,
        request_parameter: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            offer_id: offer_id.into(),
            person_id: person_id.into(),
            grade,
            state: None,
            priority: None,
            request_parameter: request_parameter.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_is_unique() {
        assert_ne!(new_id(), new_id());
    }

    #[test]
    fn test_city_new() {
        let city = City::new("Київ", "/region/kyiv");
        assert_eq!(city.name, "Київ");
        assert_eq!(city.request_parameter, "/region/kyiv");
        assert!(!city.id.is_empty());
    }

    #[test]
    fn test_offer_defaults() {
        let offer = Offer::new("uni-1", "Computer Science", "y24/x/UNI1/SPEC7");
        assert_eq!(offer.program, None);
        assert_eq!(offer.budget_count, 0);
        assert_eq!(offer.request_parameter, "y24/x/UNI1/SPEC7");
    }

    #[test]
    fn test_application_links_person_and_offer() {
        let person = Person::new("Іваненко Іван Іванович");
        let app = Application::new("offer-1", person.id.clone(), 187.5, "y24/x/U/S");
        assert_eq!(app.person_id, person.id);
        assert_eq!(app.offer_id, "offer-1");
        assert_eq!(app.grade, 187.5);
        assert!(app.state.is_none());
        assert!(app.priority.is_none());
    }
}
