//! Table-driven filters keyed on a single donor field.

use super::{FilterScore, FraudFilter};
use crate::donation::{DonationData, fields};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Field(&'static str),
    EmailDomain,
}

/// Adds a fixed score when a donor field matches an entry in the map.
///
/// Matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct FieldMapFilter {
    name: &'static str,
    source: Source,
    scores: BTreeMap<String, Decimal>,
}

impl FieldMapFilter {
    fn build(
        name: &'static str,
        source: Source,
        scores: impl IntoIterator<Item = (String, Decimal)>,
    ) -> Self {
        Self {
            name,
            source,
            scores: scores
                .into_iter()
                .map(|(k, v)| (k.trim().to_lowercase(), v))
                .collect(),
        }
    }

    pub fn country(scores: impl IntoIterator<Item = (String, Decimal)>) -> Self {
        Self::build("country_map", Source::Field(fields::COUNTRY), scores)
    }

    pub fn email_domain(scores: impl IntoIterator<Item = (String, Decimal)>) -> Self {
        Self::build("email_domain_map", Source::EmailDomain, scores)
    }

    pub fn utm_campaign(scores: impl IntoIterator<Item = (String, Decimal)>) -> Self {
        Self::build("utm_campaign_map", Source::Field(fields::UTM_CAMPAIGN), scores)
    }

    pub fn utm_medium(scores: impl IntoIterator<Item = (String, Decimal)>) -> Self {
        Self::build("utm_medium_map", Source::Field(fields::UTM_MEDIUM), scores)
    }

    pub fn utm_source(scores: impl IntoIterator<Item = (String, Decimal)>) -> Self {
        Self::build("utm_source_map", Source::Field(fields::UTM_SOURCE), scores)
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

#[async_trait]
impl FraudFilter for FieldMapFilter {
    fn name(&self) -> &str {
        self.name
    }

    async fn score(&self, data: &DonationData) -> FilterScore {
        let value = match self.source {
            Source::Field(field) => data.get(field),
            Source::EmailDomain => data.email_domain(),
        };
        let Some(value) = value.map(str::to_lowercase) else {
            return FilterScore::zero();
        };
        match self.scores.get(&value) {
            Some(delta) => FilterScore::new(*delta, format!("{}={value}", self.name)),
            None => FilterScore::zero(),
        }
    }
}
