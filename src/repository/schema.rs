//! Database schema.

use rusqlite::Connection;

pub(super) fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- One row per tracked product; the link is the identity key
        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category TEXT NOT NULL,
            subcategory TEXT NOT NULL,
            name TEXT NOT NULL,
            link TEXT NOT NULL UNIQUE,
            first_seen TEXT NOT NULL
        );

        -- Append-only observation history
        CREATE TABLE IF NOT EXISTS observations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            product_id INTEGER NOT NULL REFERENCES products(id),
            observed_at TEXT NOT NULL,
            stock_amount INTEGER,
            price_amount TEXT,
            price_units INTEGER,
            snapshot BLOB
        );

        CREATE INDEX IF NOT EXISTS idx_observations_product_time
            ON observations(product_id, observed_at);
        CREATE INDEX IF NOT EXISTS idx_observations_time
            ON observations(observed_at);

        CREATE TRIGGER IF NOT EXISTS products_link_immutable
            BEFORE UPDATE OF link ON products
            WHEN NEW.link IS NOT OLD.link
        BEGIN
            SELECT RAISE(ABORT, 'product link is immutable');
        END;

        CREATE TRIGGER IF NOT EXISTS observations_no_update
            BEFORE UPDATE ON observations
        BEGIN
            SELECT RAISE(ABORT, 'observations are append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS observations_no_delete
            BEFORE DELETE ON observations
        BEGIN
            SELECT RAISE(ABORT, 'observations are append-only');
        END;
        "#,
    )
}
