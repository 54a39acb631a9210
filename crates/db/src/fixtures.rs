//! Seed data for demos and integration tests.

use sqlx::Row as _;

use crate::DbPool;

/// What `seed_demo_dataset` inserts, for assertions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeedSummary {
    pub partners: i64,
    pub projects: i64,
    pub sales_orders: i64,
    pub quotes: i64,
    pub invoices: i64,
    pub stock_items: i64,
    pub emails: i64,
}

/// Populate an empty migrated database with a small but realistic dataset.
pub async fn seed_demo_dataset(pool: &DbPool) -> Result<SeedSummary, sqlx::Error> {
    sqlx::query(
        "INSERT INTO partners (code, name, kind, city, country) VALUES
            ('P001', 'Alpina d.o.o.', 'Customer', 'Kranj', 'SI'),
            ('P002', 'Metalka Trgovina', 'Supplier', 'Celje', 'SI'),
            ('P003', 'Bauhaus GmbH', 'Customer', 'Graz', 'AT')",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO contact_persons (partner_id, name, email) VALUES
            (1, 'Marta Kovac', 'marta.kovac@alpina.example'),
            (3, 'Hans Gruber', 'h.gruber@bauhaus.example')",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO projects (code, name, customer_id, phase, status, notes) VALUES
            ('PRJ-2026-001', 'Production hall extension', 1, 'Order', 'Active', ''),
            ('PRJ-2026-002', 'Warehouse racking', 3, 'Quote', 'Active', 'Waiting for revised drawings')",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO project_timeline (project_id, entry, actor) VALUES
            (1, 'Project created as PRJ-2026-001', 'assistant'),
            (1, 'Project updated: phase -> Order', 'assistant'),
            (2, 'Project created as PRJ-2026-002', 'assistant')",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO sales_orders (document_number, partner_id, status, order_date, total_amount) VALUES
            ('SO-26-0101', 1, 'Open', '2026-07-14', 48200.0),
            ('SO-26-0102', 3, 'Delivered', '2026-06-02', 12750.5)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO quotes (document_number, partner_id, status, quote_date, valid_until, total_amount) VALUES
            ('QT-26-0031', 3, 'Sent', '2026-08-01', '2026-09-01', 15400.0),
            ('QT-26-0032', 1, 'Draft', '2026-08-20', NULL, 9900.0)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO invoices (document_number, partner_id, invoice_date, due_date, total_amount, paid) VALUES
            ('IN-26-0451', 1, '2026-07-30', '2026-08-29', 24100.0, 0),
            ('IN-26-0452', 3, '2026-06-15', '2026-07-15', 12750.5, 1)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO stock_items (article_code, article_name, warehouse, quantity, unit) VALUES
            ('ART-100', 'Steel beam HEA 200', 'Main', 140, 'pcs'),
            ('ART-200', 'Anchor bolt M16', 'Main', 2300, 'pcs'),
            ('ART-100', 'Steel beam HEA 200', 'North', 18, 'pcs')",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO emails (sender, recipient, subject, body, category, status, project_id) VALUES
            ('h.gruber@bauhaus.example', 'marta', 'RFQ: warehouse racking rev B', 'Please quote revision B.', 'RFQ', 'New', NULL),
            ('marta.kovac@alpina.example', 'bojan', 'Delivery schedule', 'When can we expect delivery?', 'Order', 'Assigned', 1)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO work_orders (project_id, article, quantity, status) VALUES
            (1, 'Steel beam HEA 200', 60, 'Planned')",
    )
    .execute(pool)
    .await?;

    Ok(SeedSummary {
        partners: 3,
        projects: 2,
        sales_orders: 2,
        quotes: 2,
        invoices: 2,
        stock_items: 3,
        emails: 2,
    })
}

/// Verify the seeded counts against the live tables.
pub async fn verify_seed(pool: &DbPool, expected: &SeedSummary) -> Result<bool, sqlx::Error> {
    let count = |table: &'static str| async move {
        sqlx::query(&format!("SELECT COUNT(*) AS n FROM {table}"))
            .fetch_one(pool)
            .await
            .map(|row| row.get::<i64, _>("n"))
    };

    Ok(count("partners").await? == expected.partners
        && count("projects").await? == expected.projects
        && count("sales_orders").await? == expected.sales_orders
        && count("quotes").await? == expected.quotes
        && count("invoices").await? == expected.invoices
        && count("stock_items").await? == expected.stock_items
        && count("emails").await? == expected.emails)
}
