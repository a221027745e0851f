use std::future::Future;

use crate::{
    db::traits::LoanPaymentDatabaseError,
    db_types::{NewPaymentsRoute, PaymentsRoute, RouteQuery},
};

/// Route templates. These are configuration, and are only read at runtime.
pub trait RouteManagement {
    fn insert_route(
        &self,
        route: NewPaymentsRoute,
    ) -> impl Future<Output = Result<PaymentsRoute, LoanPaymentDatabaseError>> + Send;

    /// Every route matching all six account dimensions exactly, that supports the loan stage and loan type.
    /// Routes are returned by ascending id, with their steps in order.
    fn fetch_matching_routes(
        &self,
        query: &RouteQuery,
    ) -> impl Future<Output = Result<Vec<PaymentsRoute>, LoanPaymentDatabaseError>> + Send;
}
