// Flag state counters
pub const FLAG_STORE_READS_COUNTER: &str = "flags_store_reads_total";
pub const FLAG_FALLBACK_CACHE_READS_COUNTER: &str = "flags_fallback_cache_reads_total";
pub const FLAG_CORRUPTED_RECORDS_COUNTER: &str = "flags_corrupted_records_total";
pub const FLAG_STORE_UNAVAILABLE_COUNTER: &str = "flags_store_unavailable_total";
pub const FLAG_MUTATIONS_COUNTER: &str = "flags_mutations_total";

// Admin plane
pub const ADMIN_RATE_LIMIT_REQUESTS_COUNTER: &str = "admin_rate_limit_requests_total";
pub const ADMIN_RATE_LIMITED_COUNTER: &str = "admin_rate_limited_total";
pub const ADMIN_RATE_LIMIT_STORE_ERRORS_COUNTER: &str = "admin_rate_limit_store_errors_total";
pub const ADMIN_AUTH_FAILURES_COUNTER: &str = "admin_auth_failures_total";
