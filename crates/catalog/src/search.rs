//! Layer listing filters, ordering and pagination.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::CatalogError;
use crate::model::{Layer, RatingSummary};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    Rating,
    Popularity,
    Title,
}

impl SortField {
    fn default_order(self) -> SortOrder {
        match self {
            SortField::Title => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Raw listing parameters as they arrive on the query string.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LayerQuery {
    pub query: Option<String>,
    pub category: Option<String>,
    pub license: Option<String>,
    /// Comma separated; every tag must be present.
    pub tags: Option<String>,
    pub min_rating: Option<f64>,
    pub sort_by: Option<SortField>,
    pub sort_order: Option<SortOrder>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;

/// Validated form of [`LayerQuery`].
#[derive(Debug, Clone, PartialEq)]
pub struct Search {
    needle: Option<String>,
    category: Option<String>,
    license: Option<String>,
    tags: Vec<String>,
    min_rating: Option<f64>,
    sort_by: SortField,
    order: SortOrder,
    pub page: u32,
    pub limit: u32,
}

impl LayerQuery {
    pub fn validate(&self) -> Result<Search, CatalogError> {
        let page = self.page.unwrap_or(1);
        if page < 1 {
            return Err(CatalogError::Invalid("page must be at least 1".to_string()));
        }
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(CatalogError::Invalid(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }
        if let Some(r) = self.min_rating {
            if !(0.0..=5.0).contains(&r) {
                return Err(CatalogError::Invalid(
                    "min_rating must be between 0 and 5".to_string(),
                ));
            }
        }
        let sort_by = self.sort_by.unwrap_or_default();

        Ok(Search {
            needle: non_blank(&self.query).map(|q| q.to_lowercase()),
            category: non_blank(&self.category),
            license: non_blank(&self.license),
            tags: self
                .tags
                .as_deref()
                .map(|t| {
                    t.split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            min_rating: self.min_rating,
            sort_by,
            order: self.sort_order.unwrap_or(sort_by.default_order()),
            page,
            limit,
        })
    }
}

fn non_blank(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl Search {
    pub fn matches(&self, layer: &Layer, rating: &RatingSummary) -> bool {
        if let Some(needle) = &self.needle {
            let hit = layer.title.to_lowercase().contains(needle)
                || layer
                    .description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(needle))
                || layer.tags.iter().any(|t| t.to_lowercase().contains(needle));
            if !hit {
                return false;
            }
        }
        if self.category.as_ref().is_some_and(|c| c != &layer.category) {
            return false;
        }
        if self.license.as_ref().is_some_and(|l| l != &layer.license) {
            return false;
        }
        if !self.tags.iter().all(|t| layer.tags.contains(t)) {
            return false;
        }
        if let Some(min) = self.min_rating {
            if rating.average() < min {
                return false;
            }
        }
        true
    }

    fn compare(&self, a: &(Layer, RatingSummary), b: &(Layer, RatingSummary)) -> Ordering {
        let primary = match self.sort_by {
            SortField::CreatedAt => a.0.created_at_ms.cmp(&b.0.created_at_ms),
            SortField::Rating => a.1.average().total_cmp(&b.1.average()),
            SortField::Popularity => a.0.view_count.cmp(&b.0.view_count),
            SortField::Title => a.0.title.to_lowercase().cmp(&b.0.title.to_lowercase()),
        };
        let ord = primary.then_with(|| a.0.id.cmp(&b.0.id));
        match self.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    }

    /// Filter, order and cut one page out of `candidates`.
    pub fn apply(
        &self,
        candidates: Vec<(Layer, RatingSummary)>,
    ) -> Vec<(Layer, RatingSummary)> {
        let mut hits: Vec<_> = candidates
            .into_iter()
            .filter(|(layer, rating)| self.matches(layer, rating))
            .collect();
        hits.sort_by(|a, b| self.compare(a, b));
        let skip = (self.page as usize - 1).saturating_mul(self.limit as usize);
        hits.into_iter().skip(skip).take(self.limit as usize).collect()
    }
}
