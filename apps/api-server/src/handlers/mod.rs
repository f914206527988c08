//! HTTP handlers and route configuration.

mod health;
mod widgets;

use actix_web::web;
use sluice_core::{ConfigurationError, ThrottleSettings};

use crate::config::WidgetLimits;
use crate::throttle::RouteTable;

/// Configure all application routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            // Public routes
            .route("/health", web::get().to(health::health_check))
            // Throttled routes
            .service(
                web::resource("/widgets")
                    .route(web::get().to(widgets::list))
                    .route(web::head().to(widgets::list))
                    .route(web::post().to(widgets::create)),
            )
            .route("/widgets/{id}", web::get().to(widgets::get)),
    );
}

/// Quotas for the routes registered in [`configure_routes`].
pub fn throttled_routes(limits: &WidgetLimits) -> Result<RouteTable, ConfigurationError> {
    let mut routes = RouteTable::new();

    routes.register("GET", "/api/widgets", &ThrottleSettings::hourly(limits.hourly))?;
    routes.register(
        "POST",
        "/api/widgets",
        &ThrottleSettings::per_period(limits.create_limit, limits.create_period),
    )?;
    routes.register(
        "GET",
        "/api/widgets/{id}",
        &ThrottleSettings::daily(limits.hourly.saturating_mul(24)),
    )?;

    Ok(routes)
}
