use serde::{Deserialize, Serialize};

use crate::config::SearchSection;

use super::error::SearchError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub terms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

/// A request that passed validation: cleaned terms and an effective count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSearch {
    pub terms: Vec<String>,
    pub count: usize,
}

impl ValidatedSearch {
    pub fn query(&self) -> String {
        self.terms.join(" ")
    }
}

impl SearchRequest {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            terms: terms.into_iter().map(Into::into).collect(),
            count: None,
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn validate(&self, limits: &SearchSection) -> Result<ValidatedSearch, SearchError> {
        if self.terms.is_empty() {
            return Err(SearchError::InvalidInput(
                "at least one search term is required".into(),
            ));
        }

        let mut terms = Vec::with_capacity(self.terms.len());
        for raw in &self.terms {
            let term = raw.trim().trim_start_matches('#').trim();
            if term.is_empty() {
                return Err(SearchError::InvalidInput(format!(
                    "search term {raw:?} is empty"
                )));
            }
            if term.chars().count() > limits.max_term_length {
                return Err(SearchError::InvalidInput(format!(
                    "search term exceeds {} characters",
                    limits.max_term_length
                )));
            }
            terms.push(term.to_string());
        }

        let count = match self.count {
            Some(0) => {
                return Err(SearchError::InvalidInput(
                    "count must be at least 1".into(),
                ))
            }
            Some(count) => count.min(limits.max_count),
            None => limits.default_count.min(limits.max_count),
        };

        Ok(ValidatedSearch {
            terms,
            count: count as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> SearchSection {
        SearchSection::default()
    }

    #[test]
    fn hashtags_and_whitespace_are_stripped() {
        let validated = SearchRequest::new(["  #dance ", "##fyp", "cooking"])
            .validate(&limits())
            .unwrap();
        assert_eq!(validated.terms, vec!["dance", "fyp", "cooking"]);
        assert_eq!(validated.count, 30);
        assert_eq!(validated.query(), "dance fyp cooking");
    }

    #[test]
    fn empty_terms_are_rejected() {
        let none = SearchRequest::new(Vec::<String>::new()).validate(&limits());
        assert!(matches!(none, Err(SearchError::InvalidInput(_))));

        let blank = SearchRequest::new(["ok", " # "]).validate(&limits());
        assert!(matches!(blank, Err(SearchError::InvalidInput(_))));
    }

    #[test]
    fn overlong_terms_are_rejected() {
        let term = "x".repeat(101);
        let result = SearchRequest::new([term]).validate(&limits());
        assert!(matches!(result, Err(SearchError::InvalidInput(_))));

        let exact = "y".repeat(100);
        assert!(SearchRequest::new([exact]).validate(&limits()).is_ok());
    }

    #[test]
    fn count_is_checked_and_clamped() {
        let zero = SearchRequest::new(["cats"]).with_count(0).validate(&limits());
        assert!(matches!(zero, Err(SearchError::InvalidInput(_))));

        let clamped = SearchRequest::new(["cats"])
            .with_count(5_000)
            .validate(&limits())
            .unwrap();
        assert_eq!(clamped.count, 100);
    }
}
