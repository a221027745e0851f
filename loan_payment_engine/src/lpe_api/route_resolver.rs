use log::*;

use crate::{
    db::traits::RouteManagement,
    db_types::{AccountRef, PaymentsRoute, RouteQuery},
    lpe_api::errors::LoanPaymentError,
};

/// Looks up the configured route template for a payment.
#[derive(Debug, Clone)]
pub struct RouteResolver<B> {
    db: B,
}

impl<B> RouteResolver<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }
}

impl<B> RouteResolver<B>
where B: RouteManagement
{
    /// Finds the route for the query. When several routes match, the oldest (lowest id) wins, so resolution is stable
    /// for a given configuration. Steps are returned in order.
    ///
    /// A missing route is a configuration problem and is returned as [`LoanPaymentError::NoRouteFound`].
    pub async fn resolve_route(&self, query: &RouteQuery) -> Result<PaymentsRoute, LoanPaymentError> {
        let routes = self.db.fetch_matching_routes(query).await?;
        if routes.len() > 1 {
            debug!("🗺️ {} routes match {query}. Using the oldest.", routes.len());
        }
        let mut route = routes.into_iter().min_by_key(|r| r.id).ok_or_else(|| {
            error!("🗺️ No payment route is configured for {query}");
            LoanPaymentError::NoRouteFound(query.to_string())
        })?;
        route.steps.sort_by_key(|s| s.order);
        trace!("🗺️ Route #{} '{}' selected for {query}", route.id, route.name);
        Ok(route)
    }

    /// The route's hops, in order, as (from, to) account references.
    pub async fn resolve_route_steps(&self, query: &RouteQuery) -> Result<Vec<(AccountRef, AccountRef)>, LoanPaymentError> {
        let route = self.resolve_route(query).await?;
        Ok(route.steps.iter().map(|s| (s.from_ref(), s.to_ref())).collect())
    }
}
