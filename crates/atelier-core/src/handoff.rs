//! Desktop-to-phone hand-off links

use serde::{Deserialize, Serialize};
use url::Url;

/// Link a desktop user scans to open the model on a phone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffLink {
    pub url: String,
}

impl HandoffLink {
    pub fn new(base: &str, model_url: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            url: handoff_url(base, model_url)?,
        })
    }
}

/// `base` with the model URL appended as the `model` query parameter
pub fn handoff_url(base: &str, model_url: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(base.trim())?;
    url.query_pairs_mut().append_pair("model", model_url);
    Ok(url.into())
}
