use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use shoprpc::{Context, Result};

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ListRecommendationsRequest {
    pub user_id: String,
    #[serde(default)]
    pub excluded_ids: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ListRecommendationsResponse {
    pub product_ids: Vec<String>,
}

#[shoprpc::service(package = "catalog")]
pub trait RecommendationService {
    async fn list_recommendations(
        &self,
        ctx: &Context,
        req: ListRecommendationsRequest,
    ) -> Result<ListRecommendationsResponse>;
}

/// Recommends catalog products the user has not excluded, in catalog order.
#[derive(Debug, Clone)]
pub struct CatalogRecommender {
    catalog: Vec<String>,
    max_results: usize,
}

impl CatalogRecommender {
    pub fn new(catalog: impl IntoIterator<Item = impl Into<String>>, max_results: usize) -> Self {
        Self {
            catalog: catalog.into_iter().map(Into::into).collect(),
            max_results,
        }
    }
}

impl RecommendationService for CatalogRecommender {
    async fn list_recommendations(
        &self,
        ctx: &Context,
        req: ListRecommendationsRequest,
    ) -> Result<ListRecommendationsResponse> {
        let excluded = req.excluded_ids.iter().collect::<HashSet<_>>();
        let product_ids = self
            .catalog
            .iter()
            .filter(|id| !excluded.contains(id))
            .take(self.max_results)
            .cloned()
            .collect::<Vec<_>>();
        tracing::debug!(
            "call {}: {} recommendations for user {}",
            ctx.call_id(),
            product_ids.len(),
            req.user_id
        );
        Ok(ListRecommendationsResponse { product_ids })
    }
}

/// A recommendation service that overrides nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRecommender;

impl RecommendationService for NoRecommender {}
