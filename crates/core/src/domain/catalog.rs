use serde::{Deserialize, Serialize};

/// One similarity-search result: a base product and its cosine similarity to
/// the query, in `[0, 1]`, highest first in any result list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductHit {
    pub base_random_key: String,
    pub persian_name: String,
    pub similarity: f64,
}

/// A row of the shop/product join produced per-query during conversation
/// narrowing. Never persisted.
///
/// `member_random_key` identifies a sellable listing; `shop_id` does not.
/// A shop may carry multiple listings for the same base product, so
/// resolving "which shop" is never enough to finalize a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateShop {
    pub base_random_key: String,
    pub product_name: String,
    pub shop_id: i64,
    pub price: i64,
    pub city: Option<String>,
    pub has_warranty: bool,
    pub score: f64,
    pub extra_features: Option<String>,
    pub member_random_key: String,
    pub brand_title: Option<String>,
    pub similarity: Option<f64>,
}

impl CandidateShop {
    /// User-facing description: display attributes only, plus the shop id as
    /// the single inspection-grade identifier. The member key stays internal
    /// until finalization.
    pub fn display_line(&self) -> String {
        let mut parts = vec![
            self.product_name.clone(),
            format!("قیمت: {}", self.price),
            format!("فروشگاه شماره {}", self.shop_id),
        ];
        if let Some(city) = &self.city {
            parts.push(format!("شهر: {city}"));
        }
        if let Some(brand) = &self.brand_title {
            parts.push(format!("برند: {brand}"));
        }
        parts.push(format!("امتیاز فروشگاه: {:.1}", self.score));
        if self.has_warranty {
            parts.push("دارای گارانتی".to_string());
        }
        parts.join(" | ")
    }
}
