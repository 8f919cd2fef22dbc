//! Layered merchant categorization.
//!
//! Lookup order, first hit wins:
//! 1. the owner's own override
//! 2. the shared merchant cache
//! 3. a fixed brand keyword table (result written to the shared cache)
//! 4. the external place directory (result written to the shared cache)
//!
//! Nothing here fails a job: store or directory errors are logged and the
//! merchant is left uncategorized.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::store::CategoryStore;
use crate::models::category::{merchant_key, Category, CategorySource};
use crate::services::places::{category_for_place_types, PlaceSearch};

/// Brand keywords matched as whole words of the normalized merchant name.
/// Ordered so longer, more specific keywords win ("uber eats" before "uber").
const BRAND_KEYWORDS: &[(&str, Category)] = &[
    ("uber eats", Category::Dining),
    ("doordash", Category::Dining),
    ("grubhub", Category::Dining),
    ("starbucks", Category::Dining),
    ("dunkin", Category::Dining),
    ("mcdonald", Category::Dining),
    ("chipotle", Category::Dining),
    ("chick-fil-a", Category::Dining),
    ("subway", Category::Dining),
    ("whole foods", Category::Groceries),
    ("trader joe", Category::Groceries),
    ("safeway", Category::Groceries),
    ("kroger", Category::Groceries),
    ("costco", Category::Groceries),
    ("instacart", Category::Groceries),
    ("shell", Category::Gas),
    ("chevron", Category::Gas),
    ("exxonmobil", Category::Gas),
    ("exxon", Category::Gas),
    ("mobil", Category::Gas),
    ("arco", Category::Gas),
    ("airbnb", Category::Travel),
    ("marriott", Category::Travel),
    ("hilton", Category::Travel),
    ("expedia", Category::Travel),
    ("delta air", Category::Travel),
    ("united airlines", Category::Travel),
    ("american airlines", Category::Travel),
    ("southwest", Category::Travel),
    ("uber", Category::Transportation),
    ("lyft", Category::Transportation),
    ("amazon", Category::Shopping),
    ("walmart", Category::Shopping),
    ("target", Category::Shopping),
    ("best buy", Category::Shopping),
    ("ebay", Category::Shopping),
    ("netflix", Category::Subscriptions),
    ("spotify", Category::Subscriptions),
    ("hulu", Category::Subscriptions),
    ("disney plus", Category::Subscriptions),
    ("apple.com", Category::Subscriptions),
    ("amc theatres", Category::Entertainment),
    ("ticketmaster", Category::Entertainment),
    ("steam", Category::Entertainment),
    ("cvs", Category::Health),
    ("walgreens", Category::Health),
    ("comcast", Category::Utilities),
    ("verizon", Category::Utilities),
    ("at&t", Category::Utilities),
];

/// Match a merchant name against the brand keyword table.
pub fn heuristic_category(merchant: &str) -> Option<Category> {
    let key = merchant_key(merchant);
    BRAND_KEYWORDS
        .iter()
        .find(|(keyword, _)| contains_word(&key, keyword))
        .map(|(_, category)| *category)
}

/// True when `keyword` occurs in `haystack` with no letter or digit directly
/// on either side, so "shell" matches "shell oil" but not "shellfish".
fn contains_word(haystack: &str, keyword: &str) -> bool {
    haystack.match_indices(keyword).any(|(start, matched)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + matched.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

pub struct CategoryResolver {
    store: Arc<dyn CategoryStore>,
    places: Option<Arc<dyn PlaceSearch>>,
}

impl CategoryResolver {
    /// `places` is optional; without it resolution stops after the keyword table.
    pub fn new(store: Arc<dyn CategoryStore>, places: Option<Arc<dyn PlaceSearch>>) -> Self {
        Self { store, places }
    }

    pub async fn resolve(&self, owner: &str, merchant: &str) -> Option<Category> {
        match self.store.owner_override(owner, merchant).await {
            Ok(Some(category)) => return Some(category),
            Ok(None) => {}
            Err(e) => warn!(merchant = %merchant, error = %e, "Override lookup failed"),
        }

        match self.store.global_lookup(merchant).await {
            Ok(Some(category)) => return Some(category),
            Ok(None) => {}
            Err(e) => warn!(merchant = %merchant, error = %e, "Category cache lookup failed"),
        }

        if let Some(category) = heuristic_category(merchant) {
            debug!(merchant = %merchant, category = %category, "Keyword match");
            self.backfill(merchant, category, CategorySource::Heuristic).await;
            return Some(category);
        }

        let places = self.places.as_ref()?;
        let types = match places.search(merchant).await {
            Ok(types) => types,
            Err(e) => {
                warn!(merchant = %merchant, error = %e, "Place search failed, leaving uncategorized");
                return None;
            }
        };

        let category = category_for_place_types(&types)?;
        info!(merchant = %merchant, category = %category, "Categorized via place search");
        self.backfill(merchant, category, CategorySource::External).await;
        Some(category)
    }

    async fn backfill(&self, merchant: &str, category: Category, source: CategorySource) {
        if let Err(e) = self.store.global_store(merchant, category, source).await {
            warn!(merchant = %merchant, error = %e, "Failed to write category cache");
        }
    }
}
