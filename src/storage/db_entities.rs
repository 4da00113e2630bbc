//! SeaORM entity models used by the database storage backend.
//!
//! These structs map to the SQLite tables created by `database_storage`:
//! - `users`: accounts and their current balance
//! - `game_sessions`: one row per play session with its running totals
//! - `game_rounds`: immutable per-round results
//! - `risk_estimations`: append-only bomb probability samples
//!
//! Timestamps are stored as RFC3339 strings for portability.

/// Users table entity models.
pub mod users {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "users")]
    pub struct Model {
        /// Auto-increment id; `0` is reserved for the system account
        #[sea_orm(primary_key)]
        pub id: i64,
        #[sea_orm(unique)]
        pub username: String,
        /// argon2 PHC string
        pub password_hash: String,
        pub balance: i64,
        pub created_at: String,
        pub last_login: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Game sessions table entity models.
pub mod game_sessions {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "game_sessions")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        /// Opaque client-facing key
        #[sea_orm(unique)]
        pub session_key: String,
        /// Foreign key to `users.id`
        pub user_id: i64,
        pub start_time: String,
        pub end_time: Option<String>,
        pub rounds_played: i64,
        pub cards_flipped: i64,
        pub bomb_hits: i64,
        /// Cumulative bonus as last reported by a round
        pub total_bonus: i64,
        pub created_at: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Game rounds table entity models.
pub mod game_rounds {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "game_rounds")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        /// Foreign key to `game_sessions.session_key`
        pub session_key: String,
        pub user_id: i64,
        /// 1-based position inside the session
        pub round_number: i64,
        pub flipped_cards: i64,
        pub round_bonus: i64,
        /// One of `bomb`, `stop`, `win`
        pub end_reason: String,
        pub penalty_amount: i64,
        pub bomb_count: i64,
        pub total_bonus_after: i64,
        pub total_cards: i64,
        pub duration_ms: i64,
        pub created_at: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Risk estimation samples table entity models.
pub mod risk_estimations {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "risk_estimations")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub session_key: String,
        pub user_id: i64,
        pub round_number: Option<i64>,
        pub actual_bomb_prob: f64,
        pub flipped_count: i64,
        pub created_at: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
