//! Landing pages after a donation attempt.

use dgw_sdk::objects::FinalStatus;
use url::Url;

/// Where the donor lands once an attempt is over, and where gateways send
/// the donor back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultPages {
    pub thank_you: String,
    pub fail: String,
    /// Our own result handler, handed to redirect and iframe gateways.
    pub return_url: String,
    /// Final statuses that land on the thank-you page.
    pub go_to_thank_you_on: Vec<FinalStatus>,
}

impl Default for ResultPages {
    fn default() -> Self {
        Self {
            thank_you: "https://donate.example.org/Donate-thanks".to_owned(),
            fail: "https://donate.example.org/Donate-error".to_owned(),
            return_url: "https://payments.example.org/result".to_owned(),
            go_to_thank_you_on: vec![FinalStatus::Complete, FinalStatus::Pending],
        }
    }
}

impl ResultPages {
    pub fn lands_on_thank_you(&self, status: Option<FinalStatus>) -> bool {
        status.is_some_and(|s| self.go_to_thank_you_on.contains(&s))
    }

    /// Thank-you page carrying the payment method for analytics.
    pub fn thank_you_url(
        &self,
        payment_method: Option<&str>,
        payment_submethod: Option<&str>,
    ) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.thank_you)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(method) = payment_method {
                query.append_pair("payment_method", method);
            }
            if let Some(submethod) = payment_submethod {
                query.append_pair("payment_submethod", submethod);
            }
        }
        strip_empty_query(&mut url);
        Ok(url)
    }

    /// Failure page in the donor's language.
    pub fn fail_url(&self, language: Option<&str>) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.fail)?;
        if let Some(language) = language {
            url.query_pairs_mut().append_pair("uselang", language);
        }
        Ok(url)
    }

    pub fn return_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.return_url)
    }
}

fn strip_empty_query(url: &mut Url) {
    if url.query() == Some("") {
        url.set_query(None);
    }
}
