pub mod fallback_cache;
pub mod flag_key;
pub mod flag_record;
pub mod flag_service;
