pub mod progress_record;
pub mod progress_store;
