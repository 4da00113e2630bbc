use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, error, info};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DbBackend, DbErr, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, SqlErr, Statement, TransactionTrait,
};

use crate::configuration::StorageConfig;
use crate::error_handling::types::StorageError;
use crate::storage::db_entities::{game_rounds, game_sessions, risk_estimations, users};
use crate::storage::storage_trait::Storage;
use crate::storage::types::{
    ClearReport, EndReason, GameRound, GameSession, GlobalTotals, NewRiskEstimation,
    RiskEstimation, RoundOutcome, SessionTree, User, UserAggregate, UserCredentials,
    UserFootprint, SYSTEM_USER_ID,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        balance INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        last_login TEXT
    );",
    "CREATE TABLE IF NOT EXISTS game_sessions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_key TEXT NOT NULL UNIQUE,
        user_id INTEGER NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT,
        rounds_played INTEGER NOT NULL DEFAULT 0,
        cards_flipped INTEGER NOT NULL DEFAULT 0,
        bomb_hits INTEGER NOT NULL DEFAULT 0,
        total_bonus INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
    );",
    "CREATE INDEX IF NOT EXISTS idx_game_sessions_user ON game_sessions(user_id);",
    "CREATE TABLE IF NOT EXISTS game_rounds (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_key TEXT NOT NULL,
        user_id INTEGER NOT NULL,
        round_number INTEGER NOT NULL,
        flipped_cards INTEGER NOT NULL DEFAULT 0,
        round_bonus INTEGER NOT NULL DEFAULT 0,
        end_reason TEXT NOT NULL,
        penalty_amount INTEGER NOT NULL DEFAULT 0,
        bomb_count INTEGER NOT NULL DEFAULT 0,
        total_bonus_after INTEGER NOT NULL DEFAULT 0,
        total_cards INTEGER NOT NULL DEFAULT 16,
        duration_ms INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        FOREIGN KEY(session_key) REFERENCES game_sessions(session_key) ON DELETE CASCADE,
        FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
    );",
    "CREATE INDEX IF NOT EXISTS idx_game_rounds_user ON game_rounds(user_id);",
    "CREATE INDEX IF NOT EXISTS idx_game_rounds_session ON game_rounds(session_key);",
    "CREATE TABLE IF NOT EXISTS risk_estimations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_key TEXT NOT NULL,
        user_id INTEGER NOT NULL,
        round_number INTEGER,
        actual_bomb_prob REAL NOT NULL,
        flipped_count INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(session_key) REFERENCES game_sessions(session_key) ON DELETE CASCADE,
        FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
    );",
    "CREATE INDEX IF NOT EXISTS idx_risk_estimations_user ON risk_estimations(user_id);",
];

// Per-user counters are folded from raw rounds and sessions on every read.
// Value sums go through TOTAL(), which is REAL and never overflows; the cast
// back to INTEGER clamps at the i64 bounds.
const USER_AGGREGATE_SQL: &str = "
    WITH round_agg AS (
        SELECT
            user_id,
            COUNT(*) AS rounds_played,
            CAST(TOTAL(flipped_cards) AS INTEGER) AS total_flips,
            COALESCE(SUM(CASE WHEN end_reason = 'stop' THEN 1 ELSE 0 END), 0) AS early_exits,
            COALESCE(SUM(CASE WHEN end_reason = 'bomb' THEN 1 ELSE 0 END), 0) AS bomb_triggers,
            CAST(TOTAL(duration_ms) AS INTEGER) AS total_game_time_ms
        FROM game_rounds
        GROUP BY user_id
    ), session_agg AS (
        SELECT user_id, COUNT(*) AS games_played
        FROM game_sessions
        GROUP BY user_id
    )
    SELECT
        u.id AS user_id,
        u.username AS username,
        u.balance AS balance,
        u.created_at AS created_at,
        u.last_login AS last_login,
        COALESCE(sa.games_played, 0) AS games_played,
        COALESCE(ra.rounds_played, 0) AS rounds_played,
        COALESCE(ra.total_flips, 0) AS total_flips,
        COALESCE(ra.early_exits, 0) AS early_exits,
        COALESCE(ra.bomb_triggers, 0) AS bomb_triggers,
        COALESCE(ra.total_game_time_ms, 0) AS total_game_time_ms
    FROM users u
    LEFT JOIN round_agg ra ON ra.user_id = u.id
    LEFT JOIN session_agg sa ON sa.user_id = u.id";

const GLOBAL_TOTALS_SQL: &str = "
    SELECT
        (SELECT COUNT(*) FROM users WHERE id <> ?1) AS total_users,
        (SELECT CAST(TOTAL(balance) AS INTEGER) FROM users WHERE id <> ?1) AS balance_sum,
        (SELECT COUNT(*) FROM game_sessions WHERE user_id <> ?1) AS total_games,
        COUNT(r.id) AS total_rounds,
        CAST(TOTAL(r.flipped_cards) AS INTEGER) AS total_flips,
        COALESCE(SUM(CASE WHEN r.end_reason = 'stop' THEN 1 ELSE 0 END), 0) AS total_early_exits,
        COALESCE(SUM(CASE WHEN r.end_reason = 'bomb' THEN 1 ELSE 0 END), 0) AS total_bomb_triggers,
        CAST(TOTAL(r.duration_ms) AS INTEGER) AS total_game_time_ms
    FROM game_rounds r
    WHERE r.user_id <> ?1";

const ROUND_LEDGER_SQL: &str = "
    SELECT CAST(TOTAL(round_bonus - penalty_amount) AS INTEGER) AS net
    FROM game_rounds
    WHERE user_id = ?1";

#[derive(Debug, FromQueryResult)]
struct UserAggregateRow {
    user_id: i64,
    username: String,
    balance: i64,
    created_at: String,
    last_login: Option<String>,
    games_played: i64,
    rounds_played: i64,
    total_flips: i64,
    early_exits: i64,
    bomb_triggers: i64,
    total_game_time_ms: i64,
}

impl UserAggregateRow {
    fn into_aggregate(self) -> Result<UserAggregate, StorageError> {
        Ok(UserAggregate {
            user: User {
                id: self.user_id,
                username: self.username,
                balance: self.balance,
                created_at: parse_time(&self.created_at)?,
                last_login: parse_optional_time(self.last_login)?,
            },
            games_played: self.games_played,
            rounds_played: self.rounds_played,
            total_flips: self.total_flips,
            early_exits: self.early_exits,
            bomb_triggers: self.bomb_triggers,
            total_game_time_ms: self.total_game_time_ms,
        })
    }
}

#[derive(Debug, FromQueryResult)]
struct GlobalTotalsRow {
    total_users: i64,
    balance_sum: i64,
    total_games: i64,
    total_rounds: i64,
    total_flips: i64,
    total_early_exits: i64,
    total_bomb_triggers: i64,
    total_game_time_ms: i64,
}

#[derive(Debug, FromQueryResult)]
struct LedgerRow {
    net: i64,
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            error!("Corrupted timestamp '{}': {}", raw, e);
            StorageError::ReadFailed
        })
}

fn parse_optional_time(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StorageError> {
    raw.as_deref().map(parse_time).transpose()
}

fn user_from_model(model: users::Model) -> Result<User, StorageError> {
    Ok(User {
        id: model.id,
        username: model.username,
        balance: model.balance,
        created_at: parse_time(&model.created_at)?,
        last_login: parse_optional_time(model.last_login)?,
    })
}

fn session_from_model(model: game_sessions::Model) -> Result<GameSession, StorageError> {
    Ok(GameSession {
        session_key: model.session_key,
        user_id: model.user_id,
        start_time: parse_time(&model.start_time)?,
        end_time: parse_optional_time(model.end_time)?,
        rounds_played: model.rounds_played,
        cards_flipped: model.cards_flipped,
        bomb_hits: model.bomb_hits,
        total_bonus: model.total_bonus,
    })
}

fn round_from_model(model: game_rounds::Model) -> Result<GameRound, StorageError> {
    let end_reason = model.end_reason.parse::<EndReason>().map_err(|e| {
        error!("Round {} has {}", model.id, e);
        StorageError::ReadFailed
    })?;
    Ok(GameRound {
        id: model.id,
        session_key: model.session_key,
        user_id: model.user_id,
        round_number: model.round_number,
        flipped_cards: model.flipped_cards,
        round_bonus: model.round_bonus,
        end_reason,
        penalty_amount: model.penalty_amount,
        bomb_count: model.bomb_count,
        total_bonus_after: model.total_bonus_after,
        total_cards: model.total_cards,
        duration_ms: model.duration_ms,
        created_at: parse_time(&model.created_at)?,
    })
}

fn risk_from_model(model: risk_estimations::Model) -> Result<RiskEstimation, StorageError> {
    Ok(RiskEstimation {
        id: model.id,
        user_id: model.user_id,
        session_key: model.session_key,
        round_number: model.round_number,
        actual_bomb_prob: model.actual_bomb_prob,
        flipped_count: model.flipped_count,
        created_at: parse_time(&model.created_at)?,
    })
}

/// Maps a database error onto the storage taxonomy, `fallback` covering plain query failures.
fn classify(err: DbErr, fallback: StorageError) -> StorageError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(msg)) => return StorageError::Conflict(msg),
        Some(SqlErr::ForeignKeyConstraintViolation(_)) => return StorageError::NotFound,
        _ => {}
    }
    match err {
        DbErr::Conn(e) => {
            error!("Database connection error: {}", e);
            StorageError::ConnectionFailed
        }
        DbErr::ConnectionAcquire(e) => {
            error!("Could not acquire a database connection: {}", e);
            StorageError::ConnectionFailed
        }
        e => {
            error!("Database error: {}", e);
            fallback
        }
    }
}

fn read_err(err: DbErr) -> StorageError {
    classify(err, StorageError::ReadFailed)
}

fn write_err(err: DbErr) -> StorageError {
    classify(err, StorageError::WriteFailed)
}

/// SQLite ledger backed by SeaORM.
///
/// The storage API is synchronous: every call blocks on a private runtime and is bounded by
/// the configured operation timeout. Async callers should go through
/// `tokio::task::spawn_blocking`.
pub struct DatabaseStorage {
    rt: Option<tokio::runtime::Runtime>,
    db: DatabaseConnection,
    op_timeout: Duration,
}

impl DatabaseStorage {
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        Self::open(
            &config.database_path,
            config.max_connections,
            Duration::from_secs(config.operation_timeout_secs),
        )
    }

    /// Create or open the database file at `path` with default pool settings
    pub fn new_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let defaults = StorageConfig::default();
        Self::open(
            path,
            defaults.max_connections,
            Duration::from_secs(defaults.operation_timeout_secs),
        )
    }

    fn open<P: AsRef<Path>>(
        path: P,
        max_connections: u32,
        op_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("bombcard-db")
            .enable_all()
            .build()
            .map_err(|e| {
                error!("Failed to build the storage runtime: {}", e);
                StorageError::ConnectionFailed
            })?;
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    error!("Failed to create database dir {}: {}", parent.display(), e);
                    StorageError::WriteFailed
                })?;
            }
        }
        let url = format!("sqlite://{}?mode=rwc", path_ref.display());
        let db = rt.block_on(async {
            let mut opts = ConnectOptions::new(url);
            opts.max_connections(max_connections)
                .connect_timeout(op_timeout)
                .acquire_timeout(op_timeout)
                .sqlx_logging(false);
            let db = Database::connect(opts).await.map_err(|e| {
                error!("Failed to open database {}: {}", path_ref.display(), e);
                StorageError::ConnectionFailed
            })?;
            db.execute_unprepared("PRAGMA foreign_keys = ON;")
                .await
                .map_err(write_err)?;
            for statement in SCHEMA {
                db.execute_unprepared(statement).await.map_err(write_err)?;
            }
            Ok::<_, StorageError>(db)
        })?;
        info!("DatabaseStorage initialized at {}", path_ref.display());
        Ok(Self {
            rt: Some(rt),
            db,
            op_timeout,
        })
    }

    fn run<T, F>(&self, fut: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        let rt = self.rt.as_ref().ok_or(StorageError::ConnectionFailed)?;
        rt.block_on(async {
            match tokio::time::timeout(self.op_timeout, fut).await {
                Ok(result) => result,
                Err(_) => {
                    error!("Storage operation exceeded {:?}", self.op_timeout);
                    Err(StorageError::Timeout)
                }
            }
        })
    }

    async fn find_session<C: ConnectionTrait>(
        conn: &C,
        user_id: i64,
        session_key: &str,
    ) -> Result<game_sessions::Model, StorageError> {
        game_sessions::Entity::find()
            .filter(game_sessions::Column::SessionKey.eq(session_key))
            .filter(game_sessions::Column::UserId.eq(user_id))
            .one(conn)
            .await
            .map_err(read_err)?
            .ok_or(StorageError::NotFound)
    }

    async fn footprint<C: ConnectionTrait>(
        conn: &C,
        user_id: i64,
    ) -> Result<UserFootprint, StorageError> {
        let sessions = game_sessions::Entity::find()
            .filter(game_sessions::Column::UserId.eq(user_id))
            .count(conn)
            .await
            .map_err(read_err)?;
        let rounds = game_rounds::Entity::find()
            .filter(game_rounds::Column::UserId.eq(user_id))
            .count(conn)
            .await
            .map_err(read_err)?;
        let risk_estimations = risk_estimations::Entity::find()
            .filter(risk_estimations::Column::UserId.eq(user_id))
            .count(conn)
            .await
            .map_err(read_err)?;
        Ok(UserFootprint {
            sessions,
            rounds,
            risk_estimations,
        })
    }
}

impl Drop for DatabaseStorage {
    fn drop(&mut self) {
        // A runtime may not be dropped from async context, only shut down in the background.
        if let Some(rt) = self.rt.take() {
            rt.shutdown_background();
        }
    }
}

impl Storage for DatabaseStorage {
    fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        initial_balance: i64,
    ) -> Result<User, StorageError> {
        self.run(async {
            let model = users::ActiveModel {
                username: Set(username.to_string()),
                password_hash: Set(password_hash.to_string()),
                balance: Set(initial_balance),
                created_at: Set(format_time(&Utc::now())),
                last_login: Set(None),
                ..Default::default()
            }
            .insert(&self.db)
            .await
            .map_err(|e| match write_err(e) {
                StorageError::Conflict(_) => {
                    StorageError::Conflict(format!("username '{}' already exists", username))
                }
                other => other,
            })?;
            debug!("Created user {} ({})", model.id, model.username);
            user_from_model(model)
        })
    }

    fn ensure_system_user(&self, username: &str, password_hash: &str) -> Result<(), StorageError> {
        self.run(async {
            self.db
                .execute(Statement::from_sql_and_values(
                    DbBackend::Sqlite,
                    "INSERT INTO users (id, username, password_hash, balance, created_at)
                     VALUES (?1, ?2, ?3, 0, ?4)
                     ON CONFLICT(id) DO UPDATE SET
                       username = excluded.username,
                       password_hash = excluded.password_hash",
                    [
                        SYSTEM_USER_ID.into(),
                        username.into(),
                        password_hash.into(),
                        format_time(&Utc::now()).into(),
                    ],
                ))
                .await
                .map_err(write_err)?;
            Ok(())
        })
    }

    fn find_credentials(&self, username: &str) -> Result<Option<UserCredentials>, StorageError> {
        self.run(async {
            let model = users::Entity::find()
                .filter(users::Column::Username.eq(username))
                .one(&self.db)
                .await
                .map_err(read_err)?;
            Ok(model.map(|m| UserCredentials {
                id: m.id,
                username: m.username,
                password_hash: m.password_hash,
            }))
        })
    }

    fn get_user(&self, user_id: i64) -> Result<User, StorageError> {
        self.run(async {
            let model = users::Entity::find_by_id(user_id)
                .one(&self.db)
                .await
                .map_err(read_err)?
                .ok_or(StorageError::NotFound)?;
            user_from_model(model)
        })
    }

    fn touch_last_login(&self, user_id: i64, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.run(async {
            let result = users::Entity::update_many()
                .col_expr(users::Column::LastLogin, Expr::value(format_time(&at)))
                .filter(users::Column::Id.eq(user_id))
                .exec(&self.db)
                .await
                .map_err(write_err)?;
            if result.rows_affected == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
        })
    }

    fn set_balance(&self, user_id: i64, balance: i64) -> Result<i64, StorageError> {
        self.run(async {
            let result = users::Entity::update_many()
                .col_expr(users::Column::Balance, Expr::value(balance))
                .filter(users::Column::Id.eq(user_id))
                .exec(&self.db)
                .await
                .map_err(write_err)?;
            if result.rows_affected == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(balance)
        })
    }

    fn start_session(
        &self,
        user_id: i64,
        session_key: &str,
        start_time: DateTime<Utc>,
    ) -> Result<(GameSession, bool), StorageError> {
        self.run(async {
            let inserted = game_sessions::Entity::insert(game_sessions::ActiveModel {
                session_key: Set(session_key.to_string()),
                user_id: Set(user_id),
                start_time: Set(format_time(&start_time)),
                end_time: Set(None),
                rounds_played: Set(0),
                cards_flipped: Set(0),
                bomb_hits: Set(0),
                total_bonus: Set(0),
                created_at: Set(format_time(&Utc::now())),
                ..Default::default()
            })
            .on_conflict(
                OnConflict::column(game_sessions::Column::SessionKey)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .map_err(write_err)?;

            let model = game_sessions::Entity::find()
                .filter(game_sessions::Column::SessionKey.eq(session_key))
                .one(&self.db)
                .await
                .map_err(read_err)?
                .ok_or(StorageError::ReadFailed)?;
            if model.user_id != user_id {
                return Err(StorageError::Conflict(format!(
                    "session '{}' belongs to another user",
                    session_key
                )));
            }
            Ok((session_from_model(model)?, inserted > 0))
        })
    }

    fn end_session(
        &self,
        user_id: i64,
        session_key: &str,
        end_time: DateTime<Utc>,
    ) -> Result<GameSession, StorageError> {
        self.run(async {
            let result = game_sessions::Entity::update_many()
                .col_expr(
                    game_sessions::Column::EndTime,
                    Expr::value(format_time(&end_time)),
                )
                .filter(game_sessions::Column::SessionKey.eq(session_key))
                .filter(game_sessions::Column::UserId.eq(user_id))
                .exec(&self.db)
                .await
                .map_err(write_err)?;
            if result.rows_affected == 0 {
                return Err(StorageError::NotFound);
            }
            session_from_model(Self::find_session(&self.db, user_id, session_key).await?)
        })
    }

    fn get_session(&self, user_id: i64, session_key: &str) -> Result<GameSession, StorageError> {
        self.run(async {
            session_from_model(Self::find_session(&self.db, user_id, session_key).await?)
        })
    }

    fn record_round(
        &self,
        user_id: i64,
        session_key: &str,
        outcome: &RoundOutcome,
        apply_to_balance: bool,
    ) -> Result<GameRound, StorageError> {
        self.run(async {
            let txn = self.db.begin().await.map_err(write_err)?;

            // The counter update comes first so the write lock is taken before any read.
            let bomb_hit: i64 = if outcome.end_reason == EndReason::Bomb { 1 } else { 0 };
            let updated = game_sessions::Entity::update_many()
                .col_expr(
                    game_sessions::Column::RoundsPlayed,
                    Expr::col(game_sessions::Column::RoundsPlayed).add(1),
                )
                .col_expr(
                    game_sessions::Column::CardsFlipped,
                    Expr::col(game_sessions::Column::CardsFlipped).add(outcome.flipped_cards),
                )
                .col_expr(
                    game_sessions::Column::BombHits,
                    Expr::col(game_sessions::Column::BombHits).add(bomb_hit),
                )
                .col_expr(
                    game_sessions::Column::TotalBonus,
                    Expr::value(outcome.total_bonus_after),
                )
                .filter(game_sessions::Column::SessionKey.eq(session_key))
                .filter(game_sessions::Column::UserId.eq(user_id))
                .exec(&txn)
                .await
                .map_err(write_err)?;
            if updated.rows_affected == 0 {
                debug!(
                    "Rejecting round for unknown session {} of user {}",
                    session_key, user_id
                );
                return Err(StorageError::NotFound);
            }

            let session = Self::find_session(&txn, user_id, session_key).await?;
            let round = game_rounds::ActiveModel {
                session_key: Set(session_key.to_string()),
                user_id: Set(user_id),
                round_number: Set(session.rounds_played),
                flipped_cards: Set(outcome.flipped_cards),
                round_bonus: Set(outcome.round_bonus),
                end_reason: Set(outcome.end_reason.as_str().to_string()),
                penalty_amount: Set(outcome.penalty_amount),
                bomb_count: Set(outcome.bomb_count),
                total_bonus_after: Set(outcome.total_bonus_after),
                total_cards: Set(outcome.total_cards),
                duration_ms: Set(outcome.duration_ms),
                created_at: Set(format_time(&Utc::now())),
                ..Default::default()
            }
            .insert(&txn)
            .await
            .map_err(write_err)?;

            if apply_to_balance {
                users::Entity::update_many()
                    .col_expr(
                        users::Column::Balance,
                        Expr::col(users::Column::Balance).add(outcome.balance_delta()),
                    )
                    .filter(users::Column::Id.eq(user_id))
                    .exec(&txn)
                    .await
                    .map_err(write_err)?;
            }

            txn.commit().await.map_err(write_err)?;
            round_from_model(round)
        })
    }

    fn save_risk_estimation(
        &self,
        user_id: i64,
        sample: &NewRiskEstimation,
    ) -> Result<RiskEstimation, StorageError> {
        self.run(async {
            Self::find_session(&self.db, user_id, &sample.session_key).await?;
            let model = risk_estimations::ActiveModel {
                session_key: Set(sample.session_key.clone()),
                user_id: Set(user_id),
                round_number: Set(sample.round_number),
                actual_bomb_prob: Set(sample.actual_bomb_prob),
                flipped_count: Set(sample.flipped_count),
                created_at: Set(format_time(&Utc::now())),
                ..Default::default()
            }
            .insert(&self.db)
            .await
            .map_err(write_err)?;
            risk_from_model(model)
        })
    }

    fn user_aggregate(&self, user_id: i64) -> Result<UserAggregate, StorageError> {
        self.run(async {
            let sql = format!("{} WHERE u.id = ?1", USER_AGGREGATE_SQL);
            let row = UserAggregateRow::find_by_statement(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                sql,
                [user_id.into()],
            ))
            .one(&self.db)
            .await
            .map_err(read_err)?
            .ok_or(StorageError::NotFound)?;
            row.into_aggregate()
        })
    }

    fn all_user_aggregates(&self) -> Result<Vec<UserAggregate>, StorageError> {
        self.run(async {
            let sql = format!(
                "{} WHERE u.id <> ?1 ORDER BY u.created_at DESC, u.id DESC",
                USER_AGGREGATE_SQL
            );
            let rows = UserAggregateRow::find_by_statement(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                sql,
                [SYSTEM_USER_ID.into()],
            ))
            .all(&self.db)
            .await
            .map_err(read_err)?;
            rows.into_iter().map(UserAggregateRow::into_aggregate).collect()
        })
    }

    fn global_totals(&self) -> Result<GlobalTotals, StorageError> {
        self.run(async {
            let row = GlobalTotalsRow::find_by_statement(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                GLOBAL_TOTALS_SQL,
                [SYSTEM_USER_ID.into()],
            ))
            .one(&self.db)
            .await
            .map_err(read_err)?;
            Ok(row
                .map(|r| GlobalTotals {
                    total_users: r.total_users,
                    balance_sum: r.balance_sum,
                    total_games: r.total_games,
                    total_rounds: r.total_rounds,
                    total_flips: r.total_flips,
                    total_early_exits: r.total_early_exits,
                    total_bomb_triggers: r.total_bomb_triggers,
                    total_game_time_ms: r.total_game_time_ms,
                })
                .unwrap_or_default())
        })
    }

    fn round_ledger_sum(&self, user_id: i64) -> Result<i64, StorageError> {
        self.run(async {
            let row = LedgerRow::find_by_statement(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                ROUND_LEDGER_SQL,
                [user_id.into()],
            ))
            .one(&self.db)
            .await
            .map_err(read_err)?;
            Ok(row.map(|r| r.net).unwrap_or(0))
        })
    }

    fn recent_sessions(&self, user_id: i64, limit: u64) -> Result<Vec<GameSession>, StorageError> {
        self.run(async {
            let models = game_sessions::Entity::find()
                .filter(game_sessions::Column::UserId.eq(user_id))
                .order_by_desc(game_sessions::Column::StartTime)
                .order_by_desc(game_sessions::Column::Id)
                .limit(limit)
                .all(&self.db)
                .await
                .map_err(read_err)?;
            models.into_iter().map(session_from_model).collect()
        })
    }

    fn session_tree(&self, user_id: i64) -> Result<Vec<SessionTree>, StorageError> {
        self.run(async {
            let sessions = game_sessions::Entity::find()
                .filter(game_sessions::Column::UserId.eq(user_id))
                .order_by_desc(game_sessions::Column::StartTime)
                .order_by_desc(game_sessions::Column::Id)
                .all(&self.db)
                .await
                .map_err(read_err)?;
            let rounds = game_rounds::Entity::find()
                .filter(game_rounds::Column::UserId.eq(user_id))
                .order_by_asc(game_rounds::Column::RoundNumber)
                .order_by_asc(game_rounds::Column::Id)
                .all(&self.db)
                .await
                .map_err(read_err)?;

            let mut by_session: HashMap<String, Vec<GameRound>> = HashMap::new();
            for model in rounds {
                let round = round_from_model(model)?;
                by_session
                    .entry(round.session_key.clone())
                    .or_default()
                    .push(round);
            }

            sessions
                .into_iter()
                .map(|model| {
                    let rounds = by_session.remove(&model.session_key).unwrap_or_default();
                    Ok(SessionTree {
                        session: session_from_model(model)?,
                        rounds,
                    })
                })
                .collect()
        })
    }

    fn user_footprint(&self, user_id: i64) -> Result<UserFootprint, StorageError> {
        self.run(Self::footprint(&self.db, user_id))
    }

    fn delete_user(&self, user_id: i64) -> Result<UserFootprint, StorageError> {
        self.run(async {
            let txn = self.db.begin().await.map_err(write_err)?;
            let removed = Self::footprint(&txn, user_id).await?;

            risk_estimations::Entity::delete_many()
                .filter(risk_estimations::Column::UserId.eq(user_id))
                .exec(&txn)
                .await
                .map_err(write_err)?;
            game_rounds::Entity::delete_many()
                .filter(game_rounds::Column::UserId.eq(user_id))
                .exec(&txn)
                .await
                .map_err(write_err)?;
            game_sessions::Entity::delete_many()
                .filter(game_sessions::Column::UserId.eq(user_id))
                .exec(&txn)
                .await
                .map_err(write_err)?;
            let deleted = users::Entity::delete_by_id(user_id)
                .exec(&txn)
                .await
                .map_err(write_err)?;
            if deleted.rows_affected == 0 {
                // dropping the transaction rolls the dependent deletes back
                return Err(StorageError::NotFound);
            }

            txn.commit().await.map_err(write_err)?;
            info!(
                "Deleted user {} with {} sessions, {} rounds, {} risk samples",
                user_id, removed.sessions, removed.rounds, removed.risk_estimations
            );
            Ok(removed)
        })
    }

    fn clear_all_data(&self) -> Result<ClearReport, StorageError> {
        self.run(async {
            let txn = self.db.begin().await.map_err(write_err)?;
            let risk_estimations = risk_estimations::Entity::delete_many()
                .filter(risk_estimations::Column::UserId.ne(SYSTEM_USER_ID))
                .exec(&txn)
                .await
                .map_err(write_err)?
                .rows_affected;
            let rounds = game_rounds::Entity::delete_many()
                .filter(game_rounds::Column::UserId.ne(SYSTEM_USER_ID))
                .exec(&txn)
                .await
                .map_err(write_err)?
                .rows_affected;
            let sessions = game_sessions::Entity::delete_many()
                .filter(game_sessions::Column::UserId.ne(SYSTEM_USER_ID))
                .exec(&txn)
                .await
                .map_err(write_err)?
                .rows_affected;
            let users = users::Entity::delete_many()
                .filter(users::Column::Id.ne(SYSTEM_USER_ID))
                .exec(&txn)
                .await
                .map_err(write_err)?
                .rows_affected;
            txn.commit().await.map_err(write_err)?;
            info!(
                "Cleared {} users, {} sessions, {} rounds, {} risk samples",
                users, sessions, rounds, risk_estimations
            );
            Ok(ClearReport {
                users,
                sessions,
                rounds,
                risk_estimations,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn temp_db() -> DatabaseStorage {
        let dir = TempDir::new().unwrap();
        let path: PathBuf = dir.path().join("test.sqlite3");
        // Keep TempDir alive by leaking it for the test duration
        Box::leak(Box::new(dir));
        DatabaseStorage::new_file(path).unwrap()
    }

    fn outcome(end_reason: EndReason, flipped_cards: i64, total_bonus_after: i64) -> RoundOutcome {
        RoundOutcome {
            flipped_cards,
            round_bonus: if end_reason == EndReason::Bomb { 0 } else { 40 },
            end_reason,
            penalty_amount: if end_reason == EndReason::Bomb { 30 } else { 0 },
            bomb_count: if end_reason == EndReason::Bomb { 1 } else { 0 },
            total_bonus_after,
            total_cards: 16,
            duration_ms: 1500,
        }
    }

    #[test]
    fn test_db_create_user_and_duplicate() {
        let storage = temp_db();
        let user = storage.create_user("alice", "hash", 2000).unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.balance, 2000);
        assert!(user.last_login.is_none());

        let dup = storage.create_user("alice", "other", 2000);
        assert!(matches!(dup, Err(StorageError::Conflict(_))));

        let creds = storage.find_credentials("alice").unwrap().unwrap();
        assert_eq!(creds.id, user.id);
        assert_eq!(creds.password_hash, "hash");
        assert!(storage.find_credentials("bob").unwrap().is_none());
    }

    #[test]
    fn test_db_balance_and_last_login() {
        let storage = temp_db();
        let user = storage.create_user("alice", "hash", 2000).unwrap();
        assert_eq!(storage.set_balance(user.id, 2500).unwrap(), 2500);
        assert_eq!(storage.get_user(user.id).unwrap().balance, 2500);

        let now = Utc::now();
        storage.touch_last_login(user.id, now).unwrap();
        let login = storage.get_user(user.id).unwrap().last_login.unwrap();
        assert_eq!(login.timestamp_micros(), now.timestamp_micros());

        assert_eq!(storage.set_balance(999, 1), Err(StorageError::NotFound));
        assert_eq!(storage.get_user(999).unwrap_err(), StorageError::NotFound);
    }

    #[test]
    fn test_db_start_session_is_idempotent() {
        let storage = temp_db();
        let alice = storage.create_user("alice", "hash", 2000).unwrap();
        let bob = storage.create_user("bob", "hash", 2000).unwrap();
        let start = Utc::now();

        let (first, created) = storage.start_session(alice.id, "s-1", start).unwrap();
        assert!(created);
        assert_eq!(first.rounds_played, 0);
        let (second, created) = storage
            .start_session(alice.id, "s-1", start + ChronoDuration::seconds(5))
            .unwrap();
        assert!(!created);
        assert_eq!(second.start_time, first.start_time);
        assert_eq!(storage.user_footprint(alice.id).unwrap().sessions, 1);

        let stolen = storage.start_session(bob.id, "s-1", start);
        assert!(matches!(stolen, Err(StorageError::Conflict(_))));
    }

    #[test]
    fn test_db_record_round_updates_session_totals() {
        let storage = temp_db();
        let user = storage.create_user("alice", "hash", 2000).unwrap();
        storage.start_session(user.id, "s-1", Utc::now()).unwrap();

        let r1 = storage
            .record_round(user.id, "s-1", &outcome(EndReason::Stop, 5, 40), false)
            .unwrap();
        let r2 = storage
            .record_round(user.id, "s-1", &outcome(EndReason::Bomb, 3, 10), false)
            .unwrap();
        storage
            .record_round(user.id, "s-1", &outcome(EndReason::Win, 16, 90), false)
            .unwrap();
        assert_eq!(r1.round_number, 1);
        assert_eq!(r2.round_number, 2);
        assert_eq!(r2.end_reason, EndReason::Bomb);

        let session = storage.get_session(user.id, "s-1").unwrap();
        assert_eq!(session.rounds_played, 3);
        assert_eq!(session.cards_flipped, 24);
        assert_eq!(session.bomb_hits, 1);
        // last write wins, not a sum of deltas
        assert_eq!(session.total_bonus, 90);
        // balance untouched without ledger application
        assert_eq!(storage.get_user(user.id).unwrap().balance, 2000);
    }

    #[test]
    fn test_db_record_round_rejects_orphans() {
        let storage = temp_db();
        let alice = storage.create_user("alice", "hash", 2000).unwrap();
        let bob = storage.create_user("bob", "hash", 2000).unwrap();
        storage.start_session(alice.id, "s-1", Utc::now()).unwrap();

        let missing = storage.record_round(alice.id, "nope", &outcome(EndReason::Stop, 1, 0), false);
        assert_eq!(missing.unwrap_err(), StorageError::NotFound);
        let foreign = storage.record_round(bob.id, "s-1", &outcome(EndReason::Stop, 1, 0), false);
        assert_eq!(foreign.unwrap_err(), StorageError::NotFound);

        assert_eq!(storage.user_footprint(alice.id).unwrap().rounds, 0);
        assert_eq!(storage.user_footprint(bob.id).unwrap().rounds, 0);
        assert_eq!(storage.get_session(alice.id, "s-1").unwrap().rounds_played, 0);
    }

    #[test]
    fn test_db_record_round_applies_ledger_delta() {
        let storage = temp_db();
        let user = storage.create_user("alice", "hash", 2000).unwrap();
        storage.start_session(user.id, "s-1", Utc::now()).unwrap();
        storage
            .record_round(user.id, "s-1", &outcome(EndReason::Stop, 5, 40), true)
            .unwrap();
        storage
            .record_round(user.id, "s-1", &outcome(EndReason::Bomb, 2, 40), true)
            .unwrap();

        assert_eq!(storage.get_user(user.id).unwrap().balance, 2000 + 40 - 30);
        assert_eq!(storage.round_ledger_sum(user.id).unwrap(), 10);
        assert_eq!(storage.round_ledger_sum(999).unwrap(), 0);
    }

    #[test]
    fn test_db_user_aggregates() {
        let storage = temp_db();
        storage.ensure_system_user("admin", "hash").unwrap();
        let alice = storage.create_user("alice", "hash", 2000).unwrap();
        let bob = storage.create_user("bob", "hash", 2000).unwrap();
        storage.start_session(alice.id, "a-1", Utc::now()).unwrap();
        storage.start_session(alice.id, "a-2", Utc::now()).unwrap();
        for reason in [EndReason::Bomb, EndReason::Stop, EndReason::Stop, EndReason::Win] {
            storage
                .record_round(alice.id, "a-1", &outcome(reason, 4, 0), false)
                .unwrap();
        }

        let agg = storage.user_aggregate(alice.id).unwrap();
        assert_eq!(agg.games_played, 2);
        assert_eq!(agg.rounds_played, 4);
        assert_eq!(agg.total_flips, 16);
        assert_eq!(agg.early_exits, 2);
        assert_eq!(agg.bomb_triggers, 1);
        assert_eq!(agg.total_game_time_ms, 6000);

        let empty = storage.user_aggregate(bob.id).unwrap();
        assert_eq!(empty.rounds_played, 0);
        assert_eq!(empty.games_played, 0);

        let all = storage.all_user_aggregates().unwrap();
        assert_eq!(all.len(), 2);
        // newest account first, system account excluded
        assert_eq!(all[0].user.username, "bob");
        assert_eq!(all[1].user.username, "alice");

        assert_eq!(storage.user_aggregate(999).unwrap_err(), StorageError::NotFound);
    }

    #[test]
    fn test_db_global_totals_exclude_system_user() {
        let storage = temp_db();
        storage.ensure_system_user("admin", "hash").unwrap();
        let empty = storage.global_totals().unwrap();
        assert_eq!(empty, GlobalTotals::default());

        let alice = storage.create_user("alice", "hash", 2000).unwrap();
        storage.create_user("bob", "hash", 2000).unwrap();
        storage.set_balance(alice.id, 2600).unwrap();
        storage.start_session(alice.id, "a-1", Utc::now()).unwrap();
        storage
            .record_round(alice.id, "a-1", &outcome(EndReason::Bomb, 6, 0), false)
            .unwrap();

        let totals = storage.global_totals().unwrap();
        assert_eq!(totals.total_users, 2);
        assert_eq!(totals.balance_sum, 4600);
        assert_eq!(totals.total_games, 1);
        assert_eq!(totals.total_rounds, 1);
        assert_eq!(totals.total_flips, 6);
        assert_eq!(totals.total_bomb_triggers, 1);
        assert_eq!(totals.total_early_exits, 0);
    }

    #[test]
    fn test_db_aggregates_clamp_instead_of_failing() {
        let storage = temp_db();
        let alice = storage.create_user("alice", "hash", 2000).unwrap();
        let bob = storage.create_user("bob", "hash", 2000).unwrap();
        storage.set_balance(alice.id, i64::MAX).unwrap();
        storage.set_balance(bob.id, 5000).unwrap();

        let extreme = RoundOutcome {
            flipped_cards: i64::MAX,
            round_bonus: i64::MAX,
            end_reason: EndReason::Win,
            penalty_amount: 0,
            bomb_count: 0,
            total_bonus_after: 0,
            total_cards: i64::MAX,
            duration_ms: i64::MAX,
        };
        for key in ["a-1", "a-2"] {
            storage.start_session(alice.id, key, Utc::now()).unwrap();
            storage.record_round(alice.id, key, &extreme, false).unwrap();
        }

        let totals = storage.global_totals().unwrap();
        assert_eq!(totals.total_users, 2);
        assert_eq!(totals.balance_sum, i64::MAX);
        assert_eq!(totals.total_rounds, 2);
        assert_eq!(totals.total_flips, i64::MAX);
        assert_eq!(totals.total_game_time_ms, i64::MAX);

        let aggregate = storage.user_aggregate(alice.id).unwrap();
        assert_eq!(aggregate.total_flips, i64::MAX);
        assert_eq!(storage.all_user_aggregates().unwrap().len(), 2);
        assert_eq!(storage.round_ledger_sum(alice.id).unwrap(), i64::MAX);
    }

    #[test]
    fn test_db_session_tree_ordering() {
        let storage = temp_db();
        let user = storage.create_user("alice", "hash", 2000).unwrap();
        let start = Utc::now();
        storage.start_session(user.id, "old", start).unwrap();
        storage
            .start_session(user.id, "new", start + ChronoDuration::minutes(10))
            .unwrap();
        storage
            .record_round(user.id, "old", &outcome(EndReason::Stop, 1, 10), false)
            .unwrap();
        storage
            .record_round(user.id, "new", &outcome(EndReason::Win, 2, 20), false)
            .unwrap();
        storage
            .record_round(user.id, "old", &outcome(EndReason::Bomb, 3, 0), false)
            .unwrap();

        let tree = storage.session_tree(user.id).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].session.session_key, "new");
        assert_eq!(tree[0].rounds.len(), 1);
        assert_eq!(tree[1].session.session_key, "old");
        let numbers: Vec<i64> = tree[1].rounds.iter().map(|r| r.round_number).collect();
        assert_eq!(numbers, vec![1, 2]);

        let recent = storage.recent_sessions(user.id, 1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].session_key, "new");
    }

    #[test]
    fn test_db_end_session() {
        let storage = temp_db();
        let user = storage.create_user("alice", "hash", 2000).unwrap();
        let start = Utc::now();
        storage.start_session(user.id, "s-1", start).unwrap();
        let ended = storage
            .end_session(user.id, "s-1", start + ChronoDuration::minutes(3))
            .unwrap();
        assert!(ended.end_time.is_some());
        assert_eq!(
            storage.end_session(user.id, "nope", start).unwrap_err(),
            StorageError::NotFound
        );
    }

    #[test]
    fn test_db_risk_estimation_requires_session() {
        let storage = temp_db();
        let user = storage.create_user("alice", "hash", 2000).unwrap();
        let sample = NewRiskEstimation {
            session_key: "s-1".into(),
            round_number: Some(1),
            actual_bomb_prob: 0.25,
            flipped_count: 3,
        };
        assert_eq!(
            storage.save_risk_estimation(user.id, &sample).unwrap_err(),
            StorageError::NotFound
        );

        storage.start_session(user.id, "s-1", Utc::now()).unwrap();
        let saved = storage.save_risk_estimation(user.id, &sample).unwrap();
        assert_eq!(saved.actual_bomb_prob, 0.25);
        assert_eq!(storage.user_footprint(user.id).unwrap().risk_estimations, 1);
    }

    #[test]
    fn test_db_delete_user_cascades() {
        let storage = temp_db();
        let alice = storage.create_user("alice", "hash", 2000).unwrap();
        let bob = storage.create_user("bob", "hash", 2000).unwrap();
        for (user, key) in [(&alice, "a-1"), (&bob, "b-1")] {
            storage.start_session(user.id, key, Utc::now()).unwrap();
            storage
                .record_round(user.id, key, &outcome(EndReason::Stop, 2, 5), false)
                .unwrap();
            storage
                .save_risk_estimation(
                    user.id,
                    &NewRiskEstimation {
                        session_key: key.into(),
                        round_number: None,
                        actual_bomb_prob: 0.5,
                        flipped_count: 2,
                    },
                )
                .unwrap();
        }

        let removed = storage.delete_user(alice.id).unwrap();
        assert_eq!(
            removed,
            UserFootprint {
                sessions: 1,
                rounds: 1,
                risk_estimations: 1
            }
        );
        assert!(storage.user_footprint(alice.id).unwrap().is_empty());
        assert_eq!(storage.get_user(alice.id).unwrap_err(), StorageError::NotFound);
        assert_eq!(storage.user_footprint(bob.id).unwrap().rounds, 1);

        assert_eq!(storage.delete_user(alice.id).unwrap_err(), StorageError::NotFound);
    }

    #[test]
    fn test_db_clear_all_data_keeps_system_user() {
        let storage = temp_db();
        storage.ensure_system_user("admin", "hash").unwrap();
        let alice = storage.create_user("alice", "hash", 2000).unwrap();
        storage.start_session(alice.id, "a-1", Utc::now()).unwrap();
        storage
            .record_round(alice.id, "a-1", &outcome(EndReason::Win, 2, 5), false)
            .unwrap();

        let report = storage.clear_all_data().unwrap();
        assert_eq!(report.users, 1);
        assert_eq!(report.sessions, 1);
        assert_eq!(report.rounds, 1);

        let system = storage.get_user(SYSTEM_USER_ID).unwrap();
        assert_eq!(system.username, "admin");
        assert!(storage.all_user_aggregates().unwrap().is_empty());
    }

    #[test]
    fn test_db_ensure_system_user_refreshes_credentials() {
        let storage = temp_db();
        storage.ensure_system_user("admin", "first").unwrap();
        storage.ensure_system_user("root", "second").unwrap();
        assert!(storage.find_credentials("admin").unwrap().is_none());
        let creds = storage.find_credentials("root").unwrap().unwrap();
        assert_eq!(creds.id, SYSTEM_USER_ID);
        assert_eq!(creds.password_hash, "second");
    }
}
