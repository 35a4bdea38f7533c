use anyhow::Result;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::domain::{Reading, ReadingFilter};

const READING_COLUMNS: &str = "id, device_id, voltage, current, power, frequency, delta_energy, raw_counter, ts, recorded_at";

/// Create the `readings` table and its indexes when they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readings (
            id           TEXT PRIMARY KEY,
            device_id    TEXT NOT NULL,
            voltage      DOUBLE PRECISION,
            current      DOUBLE PRECISION,
            power        DOUBLE PRECISION,
            frequency    DOUBLE PRECISION,
            delta_energy DOUBLE PRECISION NOT NULL,
            raw_counter  DOUBLE PRECISION NOT NULL,
            ts           TIMESTAMPTZ NOT NULL,
            recorded_at  TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS readings_device_ts_idx ON readings (device_id, ts DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS readings_ts_idx ON readings (ts DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS readings_recorded_at_idx ON readings (recorded_at)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn insert_reading(pool: &PgPool, r: &Reading) -> Result<()> {
    let mut builder = QueryBuilder::<Postgres>::new(format!("INSERT INTO readings ({READING_COLUMNS}) "));
    builder.push_values(std::iter::once(r), |mut b, r| {
        b.push_bind(&r.id)
            .push_bind(&r.device_id)
            .push_bind(r.voltage)
            .push_bind(r.current)
            .push_bind(r.power)
            .push_bind(r.frequency)
            .push_bind(r.delta_energy)
            .push_bind(r.raw_counter)
            .push_bind(r.timestamp)
            .push_bind(r.recorded_at);
    });

    builder.build().execute(pool).await?;
    Ok(())
}

/// Most recently timestamped reading, optionally for a single device.
pub async fn latest_reading(pool: &PgPool, device_id: Option<&str>) -> Result<Option<Reading>> {
    let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT {READING_COLUMNS} FROM readings"));
    if let Some(device_id) = device_id {
        builder.push(" WHERE device_id = ").push_bind(device_id);
    }
    builder.push(" ORDER BY ts DESC, recorded_at DESC LIMIT 1");

    let row = builder.build_query_as::<Reading>().fetch_optional(pool).await?;
    Ok(row)
}

/// One page of readings matching `filter`, newest timestamp first.
pub async fn history_page(
    pool: &PgPool,
    filter: &ReadingFilter,
    offset: i64,
    limit: i64,
) -> Result<Vec<Reading>> {
    let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT {READING_COLUMNS} FROM readings"));
    push_filter(&mut builder, filter);
    builder
        .push(" ORDER BY ts DESC, recorded_at DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let rows = builder.build_query_as::<Reading>().fetch_all(pool).await?;
    Ok(rows)
}

pub async fn count_readings(pool: &PgPool, filter: &ReadingFilter) -> Result<i64> {
    let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM readings");
    push_filter(&mut builder, filter);

    let total: i64 = builder.build_query_scalar().fetch_one(pool).await?;
    Ok(total)
}

/// Sum of `delta_energy` over readings recorded in `[start, end]`.
pub async fn sum_delta_recorded_between(
    pool: &PgPool,
    device_id: Option<&str>,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<f64> {
    let mut builder = QueryBuilder::<Postgres>::new(
        "SELECT COALESCE(SUM(delta_energy), 0)::DOUBLE PRECISION FROM readings WHERE recorded_at >= ",
    );
    builder.push_bind(start).push(" AND recorded_at <= ").push_bind(end);
    if let Some(device_id) = device_id {
        builder.push(" AND device_id = ").push_bind(device_id);
    }

    let total: f64 = builder.build_query_scalar().fetch_one(pool).await?;
    Ok(total)
}

fn push_filter<'a>(builder: &mut QueryBuilder<'a, Postgres>, filter: &'a ReadingFilter) {
    builder.push(" WHERE TRUE");
    if let Some(device_id) = &filter.device_id {
        builder.push(" AND device_id = ").push_bind(device_id);
    }
    if let Some(from) = filter.from {
        builder.push(" AND ts >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        builder.push(" AND ts <= ").push_bind(to);
    }
}
