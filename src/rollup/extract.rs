//! Extract stage: pageview facts to `(url, time)`.

use crate::fact::Fact;

/// URL and timestamp of one pageview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageView {
    pub url: String,
    pub time: i64,
}

/// `None` for any fact that is not a complete pageview.
pub fn extract(fact: &Fact) -> Option<PageView> {
    Some(PageView {
        url: fact.page_url()?.to_string(),
        time: fact.true_as_of()?,
    })
}
