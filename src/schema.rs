// Table definitions for the SQLite history store. Kept in sync by hand with
// `CREATE_TABLES` in `history.rs`.

diesel::table! {
    history_records (seq) {
        seq -> Integer,
        id -> Text,
        page_title -> Text,
        page_url -> Text,
        model_name -> Text,
        model_id -> Text,
        assistant_name -> Nullable<Text>,
        created_at -> BigInt,
    }
}

diesel::table! {
    history_messages (record_id, position) {
        record_id -> Text,
        position -> Integer,
        message_id -> Text,
        role -> Text,
        content -> Text,
        created_at -> BigInt,
    }
}

diesel::allow_tables_to_appear_in_same_query!(history_records, history_messages,);
