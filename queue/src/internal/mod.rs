pub(crate) mod backoff;
pub(crate) mod cache_padded;
