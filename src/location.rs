use serde::{Deserialize, Serialize};

/// Place fields resolved for a coordinate. Missing values are empty strings.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Location {
    pub country: String,
    pub countrycode: String,
    pub state: String,
    pub county: String,
    pub city: String,
    pub suburb: String,
    pub district: String,
    pub street: String,
    pub housenumber: String,
    pub postcode: String,
    pub name: String,
    pub locality: String,
}

impl Location {
    pub fn is_empty(&self) -> bool {
        [
            &self.country,
            &self.countrycode,
            &self.state,
            &self.county,
            &self.city,
            &self.suburb,
            &self.district,
            &self.street,
            &self.housenumber,
            &self.postcode,
            &self.name,
            &self.locality,
        ]
        .iter()
        .all(|field| field.is_empty())
    }

    pub fn sublocation(&self) -> Option<&str> {
        non_empty(&self.suburb).or_else(|| non_empty(&self.district))
    }

    /// Street followed by the house number, if any.
    pub fn street_line(&self) -> Option<String> {
        let street = non_empty(&self.street)?;
        match non_empty(&self.housenumber) {
            Some(number) => Some(format!("{} {}", street, number)),
            None => Some(street.to_string()),
        }
    }

    pub fn country_code(&self) -> Option<String> {
        non_empty(&self.countrycode).map(|code| code.to_uppercase())
    }

    /// One-line description, most specific part first.
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(street) = self.street_line() {
            parts.push(street);
        }
        if let Some(postcode) = non_empty(&self.postcode) {
            parts.push(postcode.to_string());
        }
        if let Some(sub) = self.sublocation() {
            parts.push(sub.to_string());
        }
        if let Some(city) = non_empty(&self.city) {
            parts.push(city.to_string());
        }
        if let Some(county) = non_empty(&self.county) {
            parts.push(format!("({})", county));
        }
        if let Some(state) = non_empty(&self.state) {
            parts.push(state.to_string());
        }
        if let Some(country) = non_empty(&self.country) {
            match self.country_code() {
                Some(code) => parts.push(format!("{} ({})", country, code)),
                None => parts.push(country.to_string()),
            }
        }
        parts.join(", ")
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
