//! Route templates are stored flat: one row for the route and its matching dimensions, plus one row per hop.
use std::str::FromStr;

use chrono::Utc;
use log::trace;
use sqlx::{FromRow, SqliteConnection};

use crate::{
    db::sqlite::SqliteDatabaseError,
    db_types::{
        AccountOwnership,
        AccountShape,
        AccountType,
        NewPaymentsRoute,
        PaymentProvider,
        PaymentsRoute,
        PaymentsRouteStep,
        RouteQuery,
    },
};

#[derive(Debug, Clone, FromRow)]
struct RouteRow {
    id: i64,
    name: String,
    from_account_type: AccountType,
    from_ownership: AccountOwnership,
    from_provider: PaymentProvider,
    to_account_type: AccountType,
    to_ownership: AccountOwnership,
    to_provider: PaymentProvider,
    loan_stages: String,
    loan_types: String,
}

#[derive(Debug, Clone, FromRow)]
struct RouteStepRow {
    step_order: i64,
    from_account_id: Option<i64>,
    to_account_id: Option<i64>,
}

impl From<RouteStepRow> for PaymentsRouteStep {
    fn from(row: RouteStepRow) -> Self {
        Self { order: row.step_order, from_account_id: row.from_account_id, to_account_id: row.to_account_id }
    }
}

fn join_list<T: ToString>(items: &[T]) -> String {
    items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",")
}

fn parse_list<T>(s: &str) -> Result<Vec<T>, SqliteDatabaseError>
where
    T: FromStr,
    T::Err: ToString,
{
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| item.parse::<T>().map_err(|e| SqliteDatabaseError::ConversionError(e.to_string())))
        .collect()
}

impl RouteRow {
    fn into_route(self, steps: Vec<PaymentsRouteStep>) -> Result<PaymentsRoute, SqliteDatabaseError> {
        Ok(PaymentsRoute {
            id: self.id,
            name: self.name,
            from: AccountShape {
                account_type: self.from_account_type,
                ownership: self.from_ownership,
                provider: self.from_provider,
            },
            to: AccountShape {
                account_type: self.to_account_type,
                ownership: self.to_ownership,
                provider: self.to_provider,
            },
            loan_stages: parse_list(&self.loan_stages)?,
            loan_types: parse_list(&self.loan_types)?,
            steps,
        })
    }
}

pub async fn insert_route(
    route: NewPaymentsRoute,
    conn: &mut SqliteConnection,
) -> Result<PaymentsRoute, SqliteDatabaseError> {
    let row: RouteRow = sqlx::query_as(
        r#"
            INSERT INTO payment_routes (
                name,
                from_account_type,
                from_ownership,
                from_provider,
                to_account_type,
                to_ownership,
                to_provider,
                loan_stages,
                loan_types,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *;
        "#,
    )
    .bind(&route.name)
    .bind(route.from.account_type)
    .bind(route.from.ownership)
    .bind(route.from.provider)
    .bind(route.to.account_type)
    .bind(route.to.ownership)
    .bind(route.to.provider)
    .bind(join_list(&route.loan_stages))
    .bind(join_list(&route.loan_types))
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;
    for step in &route.steps {
        sqlx::query(
            r#"
                INSERT INTO payment_route_steps (route_id, step_order, from_account_id, to_account_id)
                VALUES ($1, $2, $3, $4);
            "#,
        )
        .bind(row.id)
        .bind(step.order)
        .bind(step.from_account_id)
        .bind(step.to_account_id)
        .execute(&mut *conn)
        .await?;
    }
    trace!("🗃️ Route #{} '{}' saved with {} steps", row.id, row.name, route.steps.len());
    row.into_route(route.steps)
}

async fn fetch_route_steps(
    route_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<PaymentsRouteStep>, SqliteDatabaseError> {
    let rows: Vec<RouteStepRow> = sqlx::query_as(
        "SELECT step_order, from_account_id, to_account_id FROM payment_route_steps WHERE route_id = $1 ORDER BY \
         step_order",
    )
    .bind(route_id)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(PaymentsRouteStep::from).collect())
}

/// Fetches every route that matches the query's six account dimensions exactly, and whose stage and loan type lists
/// contain the query's stage and loan type. Results are ordered by route id.
pub async fn fetch_matching_routes(
    query: &RouteQuery,
    conn: &mut SqliteConnection,
) -> Result<Vec<PaymentsRoute>, SqliteDatabaseError> {
    let rows: Vec<RouteRow> = sqlx::query_as(
        r#"
            SELECT * FROM payment_routes
            WHERE from_account_type = $1
              AND from_ownership = $2
              AND from_provider = $3
              AND to_account_type = $4
              AND to_ownership = $5
              AND to_provider = $6
            ORDER BY id;
        "#,
    )
    .bind(query.from.account_type)
    .bind(query.from.ownership)
    .bind(query.from.provider)
    .bind(query.to.account_type)
    .bind(query.to.ownership)
    .bind(query.to.provider)
    .fetch_all(&mut *conn)
    .await?;
    let mut routes = Vec::with_capacity(rows.len());
    for row in rows {
        let steps = fetch_route_steps(row.id, &mut *conn).await?;
        let route = row.into_route(steps)?;
        if route.supports_stage(query.loan_stage) && route.loan_types.contains(&query.loan_type) {
            routes.push(route);
        }
    }
    Ok(routes)
}
