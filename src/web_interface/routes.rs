use chrono::Utc;
use log::info;
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::reply::{self, Response};
use warp::{Filter, Rejection, Reply};

use crate::auth::Claims;
use crate::session_management::{RiskReport, RoundReport};
use crate::web_interface::filters::{
    admin_claims, json_body, player_claims, respond, run_blocking, with_claims,
};
use crate::web_interface::types::{
    ApiResponse, BalanceRequest, BalanceResponse, CredentialsRequest, EndSessionRequest,
    HealthResponse, IndexResponse, RegisterResponse, StartSessionRequest, UserInfoResponse,
    VerifiedUser, VerifyResponse,
};
use crate::web_interface::web_server::Services;

const ENDPOINTS: &[&str] = &[
    "GET /api/health",
    "POST /api/auth/register",
    "POST /api/auth/login",
    "POST /api/auth/admin/login",
    "POST /api/auth/verify",
    "GET /api/game/user/info",
    "GET /api/game/user/stats",
    "PUT /api/game/user/balance",
    "POST /api/game/session",
    "POST /api/game/session/:sessionId/round",
    "POST /api/game/session/:sessionId/end",
    "POST /api/game/risk-estimation",
    "GET /api/game/user/history",
    "GET /api/admin/stats",
    "GET /api/admin/users",
    "GET /api/admin/users/:userId",
    "GET /api/admin/users/:userId/reconcile",
    "DELETE /api/admin/users/:userId",
    "DELETE /api/admin/data/clear",
];

fn with_services(
    services: Services,
) -> impl Filter<Extract = (Services,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || services.clone())
}

/// Every route of the service, without rejection handling.
pub fn api_routes(services: Services) -> BoxedFilter<(Response,)> {
    index_route()
        .or(health_route())
        .unify()
        .or(auth_routes(services.clone()))
        .unify()
        .or(game_routes(services.clone()))
        .unify()
        .or(admin_routes(services))
        .unify()
        .boxed()
}

/// GET /
pub fn index_route() -> BoxedFilter<(Response,)> {
    warp::path::end()
        .and(warp::get())
        .map(|| {
            reply::json(&ApiResponse::ok(IndexResponse {
                name: env!("CARGO_PKG_NAME"),
                version: env!("CARGO_PKG_VERSION"),
                endpoints: ENDPOINTS,
            }))
            .into_response()
        })
        .boxed()
}

/// GET /api/health
pub fn health_route() -> BoxedFilter<(Response,)> {
    warp::path!("api" / "health")
        .and(warp::get())
        .map(|| {
            reply::json(&ApiResponse::ok(HealthResponse {
                status: "ok",
                timestamp: Utc::now(),
            }))
            .into_response()
        })
        .boxed()
}

pub fn auth_routes(services: Services) -> BoxedFilter<(Response,)> {
    // POST /api/auth/register
    let register = warp::path!("api" / "auth" / "register")
        .and(warp::post())
        .and(json_body::<CredentialsRequest>())
        .and(with_services(services.clone()))
        .and_then(|body: CredentialsRequest, services: Services| async move {
            let result = run_blocking(move || {
                let user = services.auth.register(&body.username, &body.password)?;
                Ok(RegisterResponse {
                    user_id: user.id,
                    username: user.username,
                })
            })
            .await;
            Ok::<_, Rejection>(respond(result, StatusCode::CREATED))
        });

    // POST /api/auth/login
    let login = warp::path!("api" / "auth" / "login")
        .and(warp::post())
        .and(json_body::<CredentialsRequest>())
        .and(with_services(services.clone()))
        .and_then(|body: CredentialsRequest, services: Services| async move {
            let result =
                run_blocking(move || services.auth.login(&body.username, &body.password)).await;
            Ok::<_, Rejection>(respond(result, StatusCode::OK))
        });

    // POST /api/auth/admin/login
    let admin_login = warp::path!("api" / "auth" / "admin" / "login")
        .and(warp::post())
        .and(json_body::<CredentialsRequest>())
        .and(with_services(services.clone()))
        .and_then(|body: CredentialsRequest, services: Services| async move {
            let result =
                run_blocking(move || services.auth.admin_login(&body.username, &body.password))
                    .await;
            Ok::<_, Rejection>(respond(result, StatusCode::OK))
        });

    // POST /api/auth/verify
    let verify = warp::path!("api" / "auth" / "verify")
        .and(warp::post())
        .and(with_claims(services.auth.clone()))
        .map(|claims: Claims| {
            respond(
                Ok(VerifyResponse {
                    user: VerifiedUser {
                        id: claims.user_id,
                        username: claims.username,
                        is_admin: claims.is_admin,
                    },
                }),
                StatusCode::OK,
            )
        });

    register
        .or(login)
        .unify()
        .or(admin_login)
        .unify()
        .or(verify)
        .unify()
        .boxed()
}

pub fn game_routes(services: Services) -> BoxedFilter<(Response,)> {
    let auth = services.auth.clone();

    // GET /api/game/user/info
    let user_info = warp::path!("api" / "game" / "user" / "info")
        .and(warp::get())
        .and(player_claims(auth.clone()))
        .and(with_services(services.clone()))
        .and_then(|claims: Claims, services: Services| async move {
            let result = run_blocking(move || {
                let user = services.balance.account(claims.user_id)?;
                Ok(UserInfoResponse {
                    id: user.id,
                    username: user.username,
                    balance: user.balance,
                })
            })
            .await;
            Ok::<_, Rejection>(respond(result, StatusCode::OK))
        });

    // GET /api/game/user/stats
    let user_stats = warp::path!("api" / "game" / "user" / "stats")
        .and(warp::get())
        .and(player_claims(auth.clone()))
        .and(with_services(services.clone()))
        .and_then(|claims: Claims, services: Services| async move {
            let result = run_blocking(move || services.stats.user_stats(claims.user_id)).await;
            Ok::<_, Rejection>(respond(result, StatusCode::OK))
        });

    // PUT /api/game/user/balance
    let set_balance = warp::path!("api" / "game" / "user" / "balance")
        .and(warp::put())
        .and(player_claims(auth.clone()))
        .and(json_body::<BalanceRequest>())
        .and(with_services(services.clone()))
        .and_then(
            |claims: Claims, body: BalanceRequest, services: Services| async move {
                let result = run_blocking(move || {
                    let balance = services.balance.set_balance(claims.user_id, body.balance)?;
                    Ok(BalanceResponse {
                        balance,
                        net_reward: services.balance.net_reward(balance),
                    })
                })
                .await;
                Ok::<_, Rejection>(respond(result, StatusCode::OK))
            },
        );

    // GET /api/game/user/history
    let history = warp::path!("api" / "game" / "user" / "history")
        .and(warp::get())
        .and(player_claims(auth.clone()))
        .and(with_services(services.clone()))
        .and_then(|claims: Claims, services: Services| async move {
            let result = run_blocking(move || services.recorder.history(claims.user_id)).await;
            Ok::<_, Rejection>(respond(result, StatusCode::OK))
        });

    // POST /api/game/session
    let start_session = warp::path!("api" / "game" / "session")
        .and(warp::post())
        .and(player_claims(auth.clone()))
        .and(json_body::<StartSessionRequest>())
        .and(with_services(services.clone()))
        .and_then(
            |claims: Claims, body: StartSessionRequest, services: Services| async move {
                let result = run_blocking(move || {
                    services.recorder.start_session(
                        claims.user_id,
                        body.session_id.as_deref(),
                        body.start_time,
                    )
                })
                .await;
                Ok::<_, Rejection>(respond(result, StatusCode::CREATED))
            },
        );

    // POST /api/game/session/:sessionId/round
    let record_round = warp::path!("api" / "game" / "session" / String / "round")
        .and(warp::post())
        .and(player_claims(auth.clone()))
        .and(json_body::<RoundReport>())
        .and(with_services(services.clone()))
        .and_then(
            |session_key: String, claims: Claims, body: RoundReport, services: Services| async move {
                let result = run_blocking(move || {
                    services
                        .recorder
                        .record_round(claims.user_id, &session_key, &body)
                })
                .await;
                Ok::<_, Rejection>(respond(result, StatusCode::CREATED))
            },
        );

    // POST /api/game/session/:sessionId/end
    let end_session = warp::path!("api" / "game" / "session" / String / "end")
        .and(warp::post())
        .and(player_claims(auth.clone()))
        .and(json_body::<EndSessionRequest>())
        .and(with_services(services.clone()))
        .and_then(
            |session_key: String, claims: Claims, body: EndSessionRequest, services: Services| async move {
                let result = run_blocking(move || {
                    services
                        .recorder
                        .end_session(claims.user_id, &session_key, body.end_time)
                })
                .await;
                Ok::<_, Rejection>(respond(result, StatusCode::OK))
            },
        );

    // POST /api/game/risk-estimation
    let risk_estimation = warp::path!("api" / "game" / "risk-estimation")
        .and(warp::post())
        .and(player_claims(auth))
        .and(json_body::<RiskReport>())
        .and(with_services(services))
        .and_then(
            |claims: Claims, body: RiskReport, services: Services| async move {
                let result = run_blocking(move || {
                    services
                        .recorder
                        .record_risk_estimation(claims.user_id, &body)
                })
                .await;
                Ok::<_, Rejection>(respond(result, StatusCode::CREATED))
            },
        );

    user_info
        .or(user_stats)
        .unify()
        .or(set_balance)
        .unify()
        .or(history)
        .unify()
        .or(start_session)
        .unify()
        .or(record_round)
        .unify()
        .or(end_session)
        .unify()
        .or(risk_estimation)
        .unify()
        .boxed()
}

pub fn admin_routes(services: Services) -> BoxedFilter<(Response,)> {
    let auth = services.auth.clone();

    // GET /api/admin/stats
    let stats = warp::path!("api" / "admin" / "stats")
        .and(warp::get())
        .and(admin_claims(auth.clone()))
        .and(with_services(services.clone()))
        .and_then(|_: Claims, services: Services| async move {
            let result = run_blocking(move || services.admin.global_stats()).await;
            Ok::<_, Rejection>(respond(result, StatusCode::OK))
        });

    // GET /api/admin/users
    let users = warp::path!("api" / "admin" / "users")
        .and(warp::get())
        .and(admin_claims(auth.clone()))
        .and(with_services(services.clone()))
        .and_then(|_: Claims, services: Services| async move {
            let result = run_blocking(move || services.admin.all_users_data()).await;
            Ok::<_, Rejection>(respond(result, StatusCode::OK))
        });

    // GET /api/admin/users/:userId
    let user_detail = warp::path!("api" / "admin" / "users" / i64)
        .and(warp::get())
        .and(admin_claims(auth.clone()))
        .and(with_services(services.clone()))
        .and_then(|user_id: i64, _: Claims, services: Services| async move {
            let result = run_blocking(move || services.admin.user_detail(user_id)).await;
            Ok::<_, Rejection>(respond(result, StatusCode::OK))
        });

    // GET /api/admin/users/:userId/reconcile
    let reconcile = warp::path!("api" / "admin" / "users" / i64 / "reconcile")
        .and(warp::get())
        .and(admin_claims(auth.clone()))
        .and(with_services(services.clone()))
        .and_then(|user_id: i64, _: Claims, services: Services| async move {
            let result = run_blocking(move || services.admin.reconcile_user(user_id)).await;
            Ok::<_, Rejection>(respond(result, StatusCode::OK))
        });

    // DELETE /api/admin/users/:userId
    let delete_user = warp::path!("api" / "admin" / "users" / i64)
        .and(warp::delete())
        .and(admin_claims(auth.clone()))
        .and(with_services(services.clone()))
        .and_then(|user_id: i64, claims: Claims, services: Services| async move {
            info!("{} requested deletion of user {}", claims.username, user_id);
            let result = run_blocking(move || services.admin.delete_user(user_id)).await;
            Ok::<_, Rejection>(respond(result, StatusCode::OK))
        });

    // DELETE /api/admin/data/clear
    let clear = warp::path!("api" / "admin" / "data" / "clear")
        .and(warp::delete())
        .and(admin_claims(auth))
        .and(with_services(services))
        .and_then(|claims: Claims, services: Services| async move {
            info!("{} requested a full data clear", claims.username);
            let result = run_blocking(move || services.admin.clear_all_data()).await;
            Ok::<_, Rejection>(respond(result, StatusCode::OK))
        });

    stats
        .or(users)
        .unify()
        .or(user_detail)
        .unify()
        .or(reconcile)
        .unify()
        .or(delete_user)
        .unify()
        .or(clear)
        .unify()
        .boxed()
}
