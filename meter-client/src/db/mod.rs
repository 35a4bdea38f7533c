pub mod reading_queries;

pub use reading_queries::{
    count_readings, ensure_schema, history_page, insert_reading, latest_reading,
    sum_delta_recorded_between,
};
