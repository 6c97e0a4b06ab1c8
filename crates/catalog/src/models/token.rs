#[derive(sqlx::FromRow)]
pub(crate) struct TokenRow {
    pub(crate) name: String,
    pub(crate) issued_at: i64,
}
