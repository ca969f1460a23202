use std::collections::{BTreeMap, BTreeSet};

/// Currency to country rules forcing a 3-D Secure challenge.
///
/// An empty country set applies the rule to every country.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreeDSecureRules {
    rules: BTreeMap<String, BTreeSet<String>>,
}

impl ThreeDSecureRules {
    pub fn none() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }

    pub fn with_rule<I, S>(mut self, currency: &str, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.rules.insert(
            currency.to_ascii_uppercase(),
            countries
                .into_iter()
                .map(|c| c.as_ref().to_ascii_uppercase())
                .collect(),
        );
        self
    }

    pub fn requires(&self, currency: &str, country: Option<&str>) -> bool {
        match self.rules.get(currency) {
            Some(countries) if countries.is_empty() => true,
            Some(countries) => country.is_some_and(|c| countries.contains(c)),
            None => false,
        }
    }
}

impl Default for ThreeDSecureRules {
    /// INR in every country.
    fn default() -> Self {
        Self::none().with_rule("INR", Vec::<String>::new())
    }
}
