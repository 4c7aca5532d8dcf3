// Diesel table definitions.
// Kept in sync by hand with src/repository/schema_sqlite.sql and
// src/repository/schema_postgres.sql.

diesel::table! {
    category_progress (id) {
        id -> Integer,
        category_name -> Text,
        status -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    downloaded_papers (id) {
        id -> Integer,
        entry_id -> Text,
        category -> Text,
        status -> Text,
        last_attempt -> Text,
        error_msg -> Nullable<Text>,
        etl_status -> Text,
        etl_batch_id -> Nullable<Text>,
    }
}

diesel::table! {
    raw_batches (batch_id) {
        batch_id -> Text,
        category -> Text,
        s3_path -> Text,
        record_count -> Integer,
        etl_status -> Text,
        created_at -> Text,
        etl_started_at -> Nullable<Text>,
        etl_finished_at -> Nullable<Text>,
        error_msg -> Nullable<Text>,
    }
}

diesel::table! {
    arxiv_papers (entry_id) {
        entry_id -> Text,
        title -> Text,
        authors -> Text,
        summary -> Nullable<Text>,
        primary_category -> Nullable<Text>,
        categories -> Text,
        published -> Nullable<Text>,
        updated -> Nullable<Text>,
        journal_ref -> Nullable<Text>,
        doi -> Nullable<Text>,
        comment -> Nullable<Text>,
        published_date -> Nullable<Text>,
        updated_date -> Nullable<Text>,
        loaded_at -> Text,
        version -> Integer,
        source_object_key -> Text,
    }
}

diesel::table! {
    arxiv_papers_history (event_id) {
        event_id -> Text,
        entry_id -> Text,
        event_ts -> Double,
        recorded_at -> Text,
        stage -> Text,
        operation -> Text,
        title -> Text,
        authors -> Text,
        summary -> Text,
        primary_category -> Nullable<Text>,
        categories -> Text,
        published -> Nullable<Text>,
        updated -> Nullable<Text>,
        journal_ref -> Nullable<Text>,
        doi -> Nullable<Text>,
        comment -> Nullable<Text>,
        source_object_key -> Text,
    }
}

diesel::table! {
    category_run_stats (id) {
        id -> Integer,
        category_name -> Text,
        time_sec -> Double,
        s3_count -> Integer,
        pg_count -> Integer,
        updated_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    category_progress,
    downloaded_papers,
    raw_batches,
    arxiv_papers,
    arxiv_papers_history,
    category_run_stats,
);
