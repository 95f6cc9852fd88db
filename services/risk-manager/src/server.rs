//! HTTP and WebSocket surface
//!
//! Thin adapters from warp routes onto the risk manager, order gateway and
//! broadcast hub. All decisions live behind these handlers.

use crate::admission::{OrderGateway, OrderTicket, SubmitOutcome};
use crate::error::RiskError;
use crate::health::HealthProbe;
use crate::limits::{PositionLimitUpdate, RiskLimitsUpdate};
use crate::position::PositionLedger;
use crate::{RiskManager, metrics};
use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use services_common::{BroadcastHub, SubscriberSink, spawn_writer_pump};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

/// Header carrying the caller identity used for rate limiting
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Everything the handlers need
pub struct AppContext {
    pub risk: Arc<RiskManager>,
    pub gateway: Arc<OrderGateway>,
    pub ledger: Arc<PositionLedger>,
    pub health: Arc<HealthProbe>,
    pub default_identity: String,
}

#[derive(Debug, Default, Deserialize)]
struct AlertsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ResetRequest {
    id: i64,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

fn error_response(status: StatusCode, error: &str) -> Response {
    json_response(status, &ErrorBody { error })
}

fn with_ctx(ctx: Arc<AppContext>) -> impl Filter<Extract = (Arc<AppContext>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&ctx))
}

/// All routes
pub fn routes(ctx: Arc<AppContext>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let health = warp::path!("health")
        .and(warp::get())
        .and(with_ctx(Arc::clone(&ctx)))
        .and_then(health);

    let metrics_route = warp::path!("metrics")
        .and(warp::get())
        .map(metrics::render);

    let hub = ctx.risk.hub().clone();
    let ws = warp::path!("ws")
        .and(warp::ws())
        .and(warp::any().map(move || hub.clone()))
        .map(|ws: Ws, hub: BroadcastHub| ws.on_upgrade(move |socket| serve_subscriber(socket, hub)));

    let submit = warp::path!("api" / "order")
        .and(warp::post())
        .and(with_ctx(Arc::clone(&ctx)))
        .and(warp::header::optional::<String>(CLIENT_ID_HEADER))
        .and(warp::body::json())
        .and_then(submit_order);

    let cancel = warp::path!("api" / "order" / String)
        .and(warp::delete())
        .and(with_ctx(Arc::clone(&ctx)))
        .and_then(cancel_order);

    let positions = warp::path!("api" / "positions")
        .and(warp::get())
        .and(with_ctx(Arc::clone(&ctx)))
        .and_then(positions);

    let get_limits = warp::path!("api" / "risk" / "limits")
        .and(warp::get())
        .and(with_ctx(Arc::clone(&ctx)))
        .and_then(get_limits);

    let put_limits = warp::path!("api" / "risk" / "limits")
        .and(warp::put())
        .and(with_ctx(Arc::clone(&ctx)))
        .and(warp::body::json())
        .and_then(update_limits);

    let alerts = warp::path!("api" / "risk" / "alerts")
        .and(warp::get())
        .and(with_ctx(Arc::clone(&ctx)))
        .and(
            warp::query::<AlertsQuery>()
                .or(warp::any().map(AlertsQuery::default))
                .unify(),
        )
        .and_then(alerts);

    let daily_pnl = warp::path!("api" / "risk" / "daily-pnl")
        .and(warp::get())
        .and(with_ctx(Arc::clone(&ctx)))
        .and_then(daily_pnl);

    let breaker = warp::path!("api" / "risk" / "circuit-breaker")
        .and(warp::get())
        .and(with_ctx(Arc::clone(&ctx)))
        .and_then(breaker_status);

    let reset = warp::path!("api" / "risk" / "circuit-breaker" / "reset")
        .and(warp::post())
        .and(with_ctx(Arc::clone(&ctx)))
        .and(warp::body::json())
        .and_then(reset_breaker);

    let get_position_limit = warp::path!("api" / "risk" / "position-limits" / String)
        .and(warp::get())
        .and(with_ctx(Arc::clone(&ctx)))
        .and_then(get_position_limit);

    let put_position_limit = warp::path!("api" / "risk" / "position-limits" / String)
        .and(warp::put())
        .and(with_ctx(ctx))
        .and(warp::body::json())
        .and_then(set_position_limit);

    health
        .or(metrics_route)
        .or(ws)
        .or(submit)
        .or(cancel)
        .or(positions)
        .or(get_limits)
        .or(put_limits)
        .or(alerts)
        .or(daily_pnl)
        .or(breaker)
        .or(reset)
        .or(get_position_limit)
        .or(put_position_limit)
}

/// Serve until `shutdown` resolves
pub async fn serve(
    ctx: Arc<AppContext>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let (bound, server) = warp::serve(routes(ctx))
        .try_bind_with_graceful_shutdown(addr, shutdown)
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;
    info!("HTTP server listening on {}", bound);
    server.await;
    info!("HTTP server stopped");
    Ok(())
}

async fn health(ctx: Arc<AppContext>) -> Result<Response, Infallible> {
    Ok(json_response(StatusCode::OK, &ctx.health.check().await))
}

async fn submit_order(
    ctx: Arc<AppContext>,
    identity: Option<String>,
    ticket: OrderTicket,
) -> Result<Response, Infallible> {
    let identity = identity.unwrap_or_else(|| ctx.default_identity.clone());
    Ok(match ctx.gateway.submit(&ticket, &identity).await {
        Ok(SubmitOutcome::Accepted {
            order_id,
            ack,
            realized_pnl,
        }) => json_response(
            StatusCode::OK,
            &json!({
                "order_id": order_id,
                "status": ack.status,
                "fill_qty": ack.fill_qty,
                "fill_price": ack.fill_price,
                "remaining_qty": ack.remaining_qty,
                "realized_pnl": realized_pnl,
            }),
        ),
        Ok(SubmitOutcome::Rejected(decision)) => json_response(
            StatusCode::FORBIDDEN,
            &json!({
                "error": "Order rejected by risk management",
                "reason": decision.rejection_reason,
                "alerts": decision.alerts,
            }),
        ),
        Err(RiskError::InvalidOrder { reason }) => error_response(StatusCode::BAD_REQUEST, &reason),
        Err(e) => {
            error!(error = %e, "Order submission failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to submit order")
        }
    })
}

async fn cancel_order(order_id: String, ctx: Arc<AppContext>) -> Result<Response, Infallible> {
    Ok(match ctx.gateway.cancel(&order_id).await {
        Ok(ack) => json_response(
            StatusCode::OK,
            &json!({
                "order_id": order_id,
                "status": "cancel_requested",
                "message": ack.message,
            }),
        ),
        Err(e) => {
            error!(order_id, error = %e, "Order cancel failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to cancel order")
        }
    })
}

async fn positions(ctx: Arc<AppContext>) -> Result<Response, Infallible> {
    Ok(json_response(StatusCode::OK, &ctx.ledger.positions_view().await))
}

async fn get_limits(ctx: Arc<AppContext>) -> Result<Response, Infallible> {
    Ok(json_response(StatusCode::OK, &ctx.risk.limits()))
}

async fn update_limits(ctx: Arc<AppContext>, update: RiskLimitsUpdate) -> Result<Response, Infallible> {
    Ok(match ctx.risk.update_limits(update).await {
        Ok(limits) => json_response(StatusCode::OK, &limits),
        Err(RiskError::InvalidLimits { reason }) => error_response(StatusCode::BAD_REQUEST, &reason),
        Err(e) => {
            error!(error = %e, "Limits update failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update limits")
        }
    })
}

async fn alerts(ctx: Arc<AppContext>, query: AlertsQuery) -> Result<Response, Infallible> {
    Ok(match ctx.risk.recent_alerts(query.limit).await {
        Ok(alerts) => json_response(StatusCode::OK, &alerts),
        Err(e) => {
            error!(error = %e, "Alert query failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load alerts")
        }
    })
}

async fn daily_pnl(ctx: Arc<AppContext>) -> Result<Response, Infallible> {
    Ok(json_response(StatusCode::OK, &ctx.risk.daily_pnl()))
}

async fn breaker_status(ctx: Arc<AppContext>) -> Result<Response, Infallible> {
    Ok(json_response(StatusCode::OK, &ctx.risk.circuit_breaker_status()))
}

async fn reset_breaker(ctx: Arc<AppContext>, request: ResetRequest) -> Result<Response, Infallible> {
    Ok(match ctx.risk.reset_circuit_breaker(request.id).await {
        Ok(event) => json_response(StatusCode::OK, &event),
        Err(RiskError::BreakerNotFound { id }) => {
            error_response(StatusCode::NOT_FOUND, &format!("circuit breaker {id} not found"))
        }
        Err(e) => {
            error!(breaker_id = request.id, error = %e, "Breaker reset failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to reset circuit breaker")
        }
    })
}

async fn get_position_limit(symbol: String, ctx: Arc<AppContext>) -> Result<Response, Infallible> {
    Ok(json_response(StatusCode::OK, &ctx.risk.position_limit(&symbol)))
}

async fn set_position_limit(
    symbol: String,
    ctx: Arc<AppContext>,
    update: PositionLimitUpdate,
) -> Result<Response, Infallible> {
    Ok(match ctx.risk.set_position_limit(&symbol, update).await {
        Ok(limit) => json_response(StatusCode::OK, &limit),
        Err(RiskError::InvalidLimits { reason }) => error_response(StatusCode::BAD_REQUEST, &reason),
        Err(e) => {
            error!(symbol, error = %e, "Position limit update failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update position limit")
        }
    })
}

/// Outbound half of a subscriber socket
struct WsSink {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl SubscriberSink for WsSink {
    async fn send_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.sink.send(Message::text(text)).await?;
        Ok(())
    }

    async fn send_ping(&mut self) -> anyhow::Result<()> {
        self.sink.send(Message::ping(Vec::new())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            debug!(error = %e, "Subscriber socket close failed");
        }
    }
}

async fn serve_subscriber(socket: WebSocket, hub: BroadcastHub) {
    let (sink, mut incoming) = socket.split();
    let subscription = match hub.subscribe().await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(error = %e, "Broadcast hub unavailable, closing subscriber");
            return;
        }
    };
    let id = subscription.id();
    info!(subscriber = id, "Subscriber connected");
    let pump = spawn_writer_pump(subscription, WsSink { sink });

    // Reads only detect the peer going away
    while let Some(message) = incoming.next().await {
        match message {
            Ok(message) if message.is_close() => break,
            Ok(_) => {}
            Err(e) => {
                debug!(subscriber = id, error = %e, "Subscriber read failed");
                break;
            }
        }
    }

    pump.abort();
    metrics::set_subscribers(hub.subscriber_count());
    info!(subscriber = id, "Subscriber disconnected");
}
